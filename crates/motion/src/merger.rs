//! Step-event merger/splitter: a single staging slot that fuses
//! same-timestamp events across axes and splits overlong gaps into
//! placeholder events before they hit the 16-bit wire format.

use heapless::Vec;

use crate::step_event::{control, StepEventInfo, WideStepEvent, WireStepEvent, STEP_TIMER_MAX_TICKS};

/// Ticks per second of the step timer clock. Matches the move/step ISR
/// cadence assumed by `step_event::STEP_TIMER_MAX_TICKS`.
pub const STEP_TIMER_FREQUENCY: f32 = 100_000_000.0;

/// Upper bound on placeholder events a single flush can produce; purely a
/// buffer size, not a functional limit (callers drain before it fills).
pub const MAX_SPLIT_EVENTS: usize = 8;

pub struct StepEventMerger {
    /// The currently buffered (not yet flushed) event, in absolute ticks.
    staged: Option<WideStepEvent>,
    last_flushed_ticks: u32,
    seen_first_event: bool,
    motion_started: bool,
}

impl StepEventMerger {
    pub fn new() -> Self {
        Self {
            staged: None,
            last_flushed_ticks: 0,
            seen_first_event: false,
            motion_started: false,
        }
    }

    fn to_ticks(time: f32) -> u32 {
        (time * STEP_TIMER_FREQUENCY).max(0.0) as u32
    }

    /// Offers one generator's next step event to the staging slot. Returns
    /// any events that must be flushed to the step queue as a result
    /// (zero, one, or several when a gap had to be split).
    pub fn offer(&mut self, event: StepEventInfo) -> Vec<WireStepEvent, MAX_SPLIT_EVENTS> {
        let ticks = Self::to_ticks(event.time);
        let mut out = Vec::new();

        match self.staged {
            Some(buffered) if buffered.time_ticks == ticks => {
                let collides = (buffered.step_bits & event.step_bits) != 0
                    || (buffered.active_bits & event.active_bits & !(buffered.step_bits ^ event.step_bits)) != 0;
                let dir_conflict = {
                    let shared = buffered.active_bits & event.active_bits;
                    (buffered.direction_bits & shared) != (event.direction_bits & shared)
                };
                if !collides && !dir_conflict {
                    self.staged = Some(WideStepEvent {
                        time_ticks: ticks,
                        step_bits: buffered.step_bits | event.step_bits,
                        direction_bits: buffered.direction_bits | event.direction_bits,
                        active_bits: buffered.active_bits | event.active_bits,
                        control_bits: buffered.control_bits | event.control_bits,
                    });
                    return out;
                }
                self.flush_into(&mut out);
                self.stage(ticks, event);
            }
            Some(_) => {
                self.flush_into(&mut out);
                self.stage(ticks, event);
            }
            None => {
                self.stage(ticks, event);
            }
        }
        out
    }

    fn stage(&mut self, ticks: u32, event: StepEventInfo) {
        self.staged = Some(WideStepEvent {
            time_ticks: ticks,
            step_bits: event.step_bits,
            direction_bits: event.direction_bits,
            active_bits: event.active_bits,
            control_bits: event.control_bits,
        });
    }

    /// Flushes whatever is currently staged, splitting an overlong gap into
    /// `STEP_TIMER_MAX_TICKS`-sized placeholders per §4.5's splitter rule.
    fn flush_into(&mut self, out: &mut Vec<WireStepEvent, MAX_SPLIT_EVENTS>) {
        let Some(event) = self.staged.take() else { return };
        let delta = event.time_ticks.saturating_sub(self.last_flushed_ticks);

        let mut control_bits = event.control_bits;
        if !self.seen_first_event {
            control_bits |= control::FIRST_STEP;
            self.seen_first_event = true;
            self.motion_started = true;
        }

        let whole = delta / STEP_TIMER_MAX_TICKS;
        let remainder = delta % STEP_TIMER_MAX_TICKS;

        for _ in 0..whole {
            let _ = out.push(WireStepEvent {
                time_ticks: STEP_TIMER_MAX_TICKS as u16,
                step_bits: 0,
                direction_bits: event.direction_bits,
                active_bits: event.active_bits,
                control_bits: 0,
            });
        }
        let _ = out.push(WireStepEvent {
            time_ticks: remainder as u16,
            step_bits: event.step_bits,
            direction_bits: event.direction_bits,
            active_bits: event.active_bits,
            control_bits,
        });

        self.last_flushed_ticks = event.time_ticks;
    }

    /// Forces the staged event (if any) out, for use when the pipeline is
    /// draining and no further events will arrive at the same timestamp.
    pub fn flush(&mut self) -> Vec<WireStepEvent, MAX_SPLIT_EVENTS> {
        let mut out = Vec::new();
        self.flush_into(&mut out);
        out
    }

    /// Stamps and flushes a terminal zero-flag `end_of_motion` event once
    /// every generator has surfaced "end of motion".
    pub fn flush_end_of_motion(&mut self) -> Vec<WireStepEvent, MAX_SPLIT_EVENTS> {
        let mut out = self.flush();
        let _ = out.push(WireStepEvent {
            time_ticks: 0,
            step_bits: 0,
            direction_bits: 0,
            active_bits: 0,
            control_bits: control::END_OF_MOTION,
        });
        self.motion_started = false;
        self.seen_first_event = false;
        self.last_flushed_ticks = 0;
        out
    }

    pub fn is_motion_started(&self) -> bool {
        self.motion_started
    }
}

impl Default for StepEventMerger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(time: f32, step_bits: u8, dir_bits: u8, active: u8) -> StepEventInfo {
        StepEventInfo { time, step_bits, direction_bits: dir_bits, active_bits: active, control_bits: 0 }
    }

    #[test]
    fn same_tick_non_colliding_events_merge() {
        let mut m = StepEventMerger::new();
        let out1 = m.offer(ev(0.0, 0b0001, 0b0001, 0b0001));
        assert!(out1.is_empty());
        let out2 = m.offer(ev(0.0, 0b0010, 0b0010, 0b0010));
        assert!(out2.is_empty());
        let flushed = m.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].step_bits, 0b0011);
    }

    #[test]
    fn colliding_events_flush_separately() {
        let mut m = StepEventMerger::new();
        let out1 = m.offer(ev(0.0, 0b0001, 0b0001, 0b0001));
        assert!(out1.is_empty());
        // Same axis steps again at the same tick -> must flush first.
        let out2 = m.offer(ev(0.0, 0b0001, 0b0001, 0b0001));
        assert_eq!(out2.len(), 1);
    }

    #[test]
    fn overlong_gap_is_split_into_placeholders() {
        let mut m = StepEventMerger::new();
        let _ = m.offer(ev(0.0, 0b0001, 0, 0b0001));
        // ~2.5x STEP_TIMER_MAX_TICKS worth of seconds later.
        let big_time = (STEP_TIMER_MAX_TICKS as f32 * 2.5) / STEP_TIMER_FREQUENCY;
        let out = m.offer(ev(big_time, 0b0001, 0, 0b0001));
        // Flushing the *first* staged event (at t=0) happens here; it should
        // be a single event since nothing preceded it.
        assert_eq!(out.len(), 1);
        let flushed = m.flush();
        // The second event's gap (2.5x max) splits into 2 placeholders + 1 remainder.
        assert_eq!(flushed.len(), 3);
        assert_eq!(flushed[0].time_ticks, STEP_TIMER_MAX_TICKS as u16);
        assert_eq!(flushed[1].time_ticks, STEP_TIMER_MAX_TICKS as u16);
    }
}
