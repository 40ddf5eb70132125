//! Pressure-advance step generator: a FIR-smoothed extruder compensator
//! that replaces the classic generator on the E axis.

use crate::queue::{MoveQueue, SegIndex};
use crate::segment::AXIS_E;
use crate::step_event::{control, GeneratorOutcome, StepEventInfo};

pub const PRESSURE_ADVANCE_MIN_POSITION_DIFF: f32 = 1e-5;

/// Internal sample-rate constant the smoothing window is derived against.
/// Chosen to match the move/step ISR cadence described in §5.
const F_INTERNAL: f32 = 10_000.0;

pub const MAX_PA_SAMPLES: usize = 129;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Bartlett,
    Rectangular,
}

/// Pressure-advance configuration: `alpha` is the advance coefficient
/// (seconds), `half_smooth_time` the half-width of the smoothing window
/// (seconds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureAdvanceConfig {
    pub alpha: f32,
    pub half_smooth_time: f32,
    pub window: WindowKind,
}

impl PressureAdvanceConfig {
    pub fn disabled() -> Self {
        Self { alpha: 0.0, half_smooth_time: 0.0, window: WindowKind::Bartlett }
    }

    pub fn is_disabled(&self) -> bool {
        self.alpha <= 0.0
    }

    /// `N = 2*ceil(half_smooth_time * F_internal) + 1`, always odd.
    fn sample_count(&self) -> usize {
        if self.half_smooth_time <= 0.0 {
            return 1;
        }
        let half = (self.half_smooth_time * F_INTERNAL).ceil() as usize;
        (2 * half + 1).min(MAX_PA_SAMPLES)
    }
}

/// Per-tap window weights for a fixed `N`, normalized to sum to one.
fn window_weights(n: usize, kind: WindowKind, out: &mut [f32; MAX_PA_SAMPLES]) {
    let mid = (n - 1) as f32 / 2.0;
    let mut sum = 0.0;
    for (i, w) in out.iter_mut().take(n).enumerate() {
        *w = match kind {
            WindowKind::Rectangular => 1.0,
            WindowKind::Bartlett => {
                if mid > 0.0 {
                    1.0 - ((i as f32 - mid).abs() / mid)
                } else {
                    1.0
                }
            }
        };
        sum += *w;
    }
    if sum > 1e-9 {
        for w in out.iter_mut().take(n) {
            *w /= sum;
        }
    }
}

/// Raw extruder position ring buffer + convolution state, per §3
/// "Pressure-advance state".
pub struct PressureAdvanceGenerator {
    config: PressureAdvanceConfig,
    window: [f32; MAX_PA_SAMPLES],
    raw: [f32; MAX_PA_SAMPLES],
    n: usize,
    write_idx: usize,
    filled: usize,
    current: Option<SegIndex>,
    t_in_segment: f32,
    step_size: f32,
    step_count: i64,
    last_sample_pos: f32,
    last_sample_time: f32,
    emitted_first_step: bool,
}

impl PressureAdvanceGenerator {
    pub fn new(config: PressureAdvanceConfig, step_size: f32) -> Self {
        let mut window = [0.0; MAX_PA_SAMPLES];
        let n = config.sample_count();
        window_weights(n, config.window, &mut window);
        Self {
            config,
            window,
            raw: [0.0; MAX_PA_SAMPLES],
            n,
            write_idx: 0,
            filled: 0,
            current: None,
            t_in_segment: 0.0,
            step_size,
            step_count: 0,
            last_sample_pos: 0.0,
            last_sample_time: 0.0,
            emitted_first_step: false,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.config.is_disabled()
    }

    fn push_sample(&mut self, value: f32) {
        self.raw[self.write_idx] = value;
        self.write_idx = (self.write_idx + 1) % self.n;
        self.filled = (self.filled + 1).min(self.n);
    }

    fn filtered_output(&self) -> f32 {
        if self.filled < self.n {
            return *self.raw.get(self.write_idx.wrapping_sub(1) % self.n.max(1)).unwrap_or(&0.0);
        }
        let mut acc = 0.0;
        for i in 0..self.n {
            let idx = (self.write_idx + i) % self.n;
            acc += self.raw[idx] * self.window[i];
        }
        acc
    }

    fn ensure_attached<const N: usize>(&mut self, queue: &MoveQueue<N>) -> bool {
        if self.current.is_some() {
            return true;
        }
        let idx = queue.unprocessed();
        if queue.get(idx).is_none() {
            return false;
        }
        queue.acquire(idx);
        self.current = Some(idx);
        self.t_in_segment = 0.0;
        true
    }

    fn advance_segment<const N: usize>(&mut self, queue: &mut MoveQueue<N>) -> bool {
        let Some(cur) = self.current else { return false };
        let next = cur.wrapping_add(1);
        if queue.get(next).is_none() {
            queue.release(cur);
            self.current = None;
            return false;
        }
        queue.acquire(next);
        queue.release(cur);
        self.current = Some(next);
        self.t_in_segment = 0.0;
        true
    }

    /// Advances the E-axis signal sample-by-sample (at `1/F_INTERNAL`
    /// spacing) until the filtered output differs from the previous sample
    /// by more than half a mini-step, then emits a step at the linearly
    /// interpolated crossing time.
    pub fn advance<const N: usize>(&mut self, queue: &mut MoveQueue<N>) -> GeneratorOutcome {
        if self.is_disabled() {
            return GeneratorOutcome::NoValidStep;
        }
        if !self.ensure_attached(queue) {
            return GeneratorOutcome::WouldBlock;
        }

        let dt = 1.0 / F_INTERNAL;
        loop {
            let Some(idx) = self.current else { return GeneratorOutcome::WouldBlock };
            let Some(seg) = queue.get(idx).copied() else { return GeneratorOutcome::WouldBlock };

            if seg.flags.ending_empty {
                return GeneratorOutcome::EndOfMotion;
            }
            if !seg.is_axis_active(AXIS_E) {
                if !self.advance_segment(queue) {
                    return GeneratorOutcome::WouldBlock;
                }
                continue;
            }

            if self.t_in_segment >= seg.duration {
                if !self.advance_segment(queue) {
                    return GeneratorOutcome::WouldBlock;
                }
                continue;
            }

            let e_pos = seg.position_at(self.t_in_segment) * seg.axes_unit[AXIS_E] + seg.start_pos[AXIS_E];
            let e_vel = seg.velocity_at(self.t_in_segment) * seg.axes_unit[AXIS_E];
            let input = e_pos + self.config.alpha * e_vel;
            self.push_sample(input);
            let filtered = self.filtered_output();
            let sample_time = seg.print_time + self.t_in_segment;
            self.t_in_segment += dt;

            let diff = filtered - self.last_sample_pos;
            if diff.abs() <= PRESSURE_ADVANCE_MIN_POSITION_DIFF {
                self.last_sample_time = sample_time;
                continue;
            }

            let boundary_count = if diff > 0.0 { self.step_count + 1 } else { self.step_count - 1 };
            let boundary = boundary_count as f32 * self.step_size;
            if (diff > 0.0 && filtered < boundary) || (diff < 0.0 && filtered > boundary) {
                self.last_sample_pos = filtered;
                self.last_sample_time = sample_time;
                continue;
            }

            // Linear interpolation between the previous and current sample.
            let frac = if diff.abs() > 1e-12 { (boundary - self.last_sample_pos) / diff } else { 0.0 };
            let event_time = self.last_sample_time + frac.clamp(0.0, 1.0) * (sample_time - self.last_sample_time);

            self.step_count = boundary_count;
            self.last_sample_pos = filtered;
            self.last_sample_time = sample_time;

            let mut control_bits = 0u8;
            if !self.emitted_first_step {
                control_bits |= control::FIRST_STEP;
                self.emitted_first_step = true;
            }
            let dir_bit = if diff > 0.0 { 1 << AXIS_E } else { 0 };
            return GeneratorOutcome::Event(StepEventInfo {
                time: event_time,
                step_bits: 1 << AXIS_E,
                direction_bits: dir_bit,
                active_bits: 1 << AXIS_E,
                control_bits,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_generator_yields_no_valid_step() {
        let mut queue: crate::queue::MoveQueue<8> = crate::queue::MoveQueue::new();
        let mut gen = PressureAdvanceGenerator::new(PressureAdvanceConfig::disabled(), 0.01);
        assert_eq!(gen.advance(&mut queue), GeneratorOutcome::NoValidStep);
    }

    #[test]
    fn bartlett_window_sums_to_one() {
        let mut w = [0.0; MAX_PA_SAMPLES];
        window_weights(9, WindowKind::Bartlett, &mut w);
        let sum: f32 = w[..9].iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }
}
