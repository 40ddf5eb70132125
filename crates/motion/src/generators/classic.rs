//! Classic step generator: per-axis quadratic half-step-boundary solver.
//! Used directly on Cartesian axes, and as the A/B motor projection on
//! CoreXY.

use crate::queue::{MoveQueue, SegIndex};
use crate::segment::MoveSegment;
use crate::step_event::{control, GeneratorOutcome, StepEventInfo};

/// Per-axis classic generator state.
pub struct ClassicGenerator {
    axis: usize,
    step_size: f32,
    current: Option<SegIndex>,
    /// Integer microstep count reached so far on this axis (signed).
    step_count: i64,
    last_dir_positive: bool,
    /// Time already consumed within the current segment.
    t_in_segment: f32,
    emitted_first_step: bool,
}

impl ClassicGenerator {
    pub fn new(axis: usize, step_size: f32) -> Self {
        Self {
            axis,
            step_size,
            current: None,
            step_count: 0,
            last_dir_positive: true,
            t_in_segment: 0.0,
            emitted_first_step: false,
        }
    }

    pub fn step_count(&self) -> i64 {
        self.step_count
    }

    /// Attaches the generator to the first available segment in the queue
    /// if it isn't already attached to one.
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

    fn apply_reset_position(&mut self, seg: &MoveSegment) {
        if seg.flags.reset_position_bits & (1 << self.axis) != 0 {
            let physical = seg.start_pos[self.axis];
            self.step_count = (physical / self.step_size).round() as i64;
        }
    }

    /// Solves for the next half-step boundary crossing, advancing through
    /// segments as needed. Mirrors the source's branch-on-`step_dir`
    /// quadratic-formula selection.
    pub fn advance<const N: usize>(&mut self, queue: &mut MoveQueue<N>) -> GeneratorOutcome {
        if !self.ensure_attached(queue) {
            return GeneratorOutcome::WouldBlock;
        }
        loop {
            let Some(idx) = self.current else { return GeneratorOutcome::WouldBlock };
            let Some(seg) = queue.get(idx).copied() else { return GeneratorOutcome::WouldBlock };

            if seg.flags.ending_empty {
                return GeneratorOutcome::EndOfMotion;
            }
            if seg.flags.reset_position_bits & (1 << self.axis) != 0 && self.t_in_segment == 0.0 {
                self.apply_reset_position(&seg);
            }
            if !seg.is_axis_active(self.axis) {
                if !self.advance_segment(queue) {
                    return GeneratorOutcome::WouldBlock;
                }
                continue;
            }

            let dir_positive = seg.axis_direction_positive(self.axis);
            let axis_start_pos = seg.start_pos[self.axis];
            let axis_v = seg.start_v * seg.axes_unit[self.axis];
            let axis_a = seg.half_accel * seg.axes_unit[self.axis];

            let boundary_count = if dir_positive {
                self.step_count + 1
            } else {
                self.step_count - 1
            };
            let boundary = boundary_count as f32 * self.step_size;

            match solve_for_time(axis_start_pos, axis_v, axis_a, boundary, self.t_in_segment, seg.duration) {
                Some(t) => {
                    self.step_count = boundary_count;
                    self.t_in_segment = t;
                    let mut control_bits = 0u8;
                    if !self.emitted_first_step {
                        control_bits |= control::FIRST_STEP;
                        self.emitted_first_step = true;
                    }
                    if t == 0.0 && seg.flags.first_of_block {
                        control_bits |= control::BEGINNING_OF_MOVE;
                    }
                    let dir_bit = if dir_positive { 1 << self.axis } else { 0 };
                    let dir_changed = dir_positive != self.last_dir_positive;
                    self.last_dir_positive = dir_positive;
                    let _ = dir_changed; // caller compares against global state; bit suffices here
                    return GeneratorOutcome::Event(StepEventInfo {
                        time: seg.print_time + t,
                        step_bits: 1 << self.axis,
                        direction_bits: dir_bit,
                        active_bits: 1 << self.axis,
                        control_bits,
                    });
                }
                None => {
                    if !self.advance_segment(queue) {
                        return GeneratorOutcome::WouldBlock;
                    }
                }
            }
        }
    }
}

/// Finds the smallest `t > after` with `after <= t <= duration` solving
/// `start_pos + v*t + a*t^2 = boundary`. Returns `None` if no such `t`
/// exists within the segment (caller advances to the next segment).
fn solve_for_time(start_pos: f32, v: f32, a: f32, boundary: f32, after: f32, duration: f32) -> Option<f32> {
    let c = start_pos - boundary;
    let candidates: [Option<f32>; 2] = if a.abs() < 1e-9 {
        if v.abs() < 1e-9 {
            [None, None]
        } else {
            [Some(-c / v), None]
        }
    } else {
        let disc = v * v - 4.0 * a * c;
        if disc < 0.0 {
            [None, None]
        } else {
            let sq = disc.sqrt();
            [Some((-v + sq) / (2.0 * a)), Some((-v - sq) / (2.0 * a))]
        }
    };

    candidates
        .into_iter()
        .flatten()
        .filter(|&t| t > after && t <= duration && t.is_finite())
        .fold(None, |best, t| match best {
            None => Some(t),
            Some(b) if t < b => Some(t),
            Some(b) => Some(b),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{MoveSegmentBuilder, PlannerBlock};
    use crate::segment::AXIS_X;

    #[test]
    fn constant_velocity_produces_evenly_spaced_steps() {
        let mut queue: MoveQueue<32> = MoveQueue::new();
        let mut builder = MoveSegmentBuilder::new();
        builder.begin_motion(&mut queue, 0.0).unwrap();
        builder
            .build_block(
                &mut queue,
                &PlannerBlock {
                    unit_dir: [1.0, 0.0, 0.0, 0.0],
                    distance: 10.0,
                    v_start: 10.0,
                    v_cruise: 10.0,
                    v_end: 10.0,
                    accel: 1.0,
                    axis_used: 0b0001,
                },
            )
            .unwrap();
        builder.end_motion(&mut queue).unwrap();

        let mut gen = ClassicGenerator::new(AXIS_X, 0.01); // 100 steps/mm
        let mut steps = 0;
        loop {
            match gen.advance(&mut queue) {
                GeneratorOutcome::Event(_) => steps += 1,
                GeneratorOutcome::EndOfMotion => break,
                GeneratorOutcome::WouldBlock | GeneratorOutcome::NoValidStep => break,
            }
        }
        // 10 mm at 100 steps/mm = 1000 steps.
        assert_eq!(steps, 1000);
    }
}
