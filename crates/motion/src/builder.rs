//! Move-segment builder: turns planner blocks into up to three move
//! segments (accel / cruise / decel), plus the synthetic beginning/ending
//! empty moves that bound a motion run.

use crate::errors::{PlannerError, WouldBlock};
use crate::queue::MoveQueue;
use crate::segment::{
    MoveSegment, Phase, SegmentFlags, AXIS_COUNT, ENDING_EMPTY_MOVE_DURATION, EPSILON_DISTANCE,
};

/// One linear move as produced by the (external) planner: entry/cruise/exit
/// velocities, acceleration magnitude, distance, per-axis unit direction and
/// a bitmask of axes this block actually moves.
#[derive(Debug, Clone, Copy)]
pub struct PlannerBlock {
    pub unit_dir: [f32; AXIS_COUNT],
    pub distance: f32,
    pub v_start: f32,
    pub v_cruise: f32,
    pub v_end: f32,
    pub accel: f32,
    pub axis_used: u8,
}

/// Builds move segments from planner blocks and maintains the running
/// absolute position / print-time cursors across blocks.
pub struct MoveSegmentBuilder {
    position: [f32; AXIS_COUNT],
    print_time: f32,
    /// Axes touched since the last segment with `reset_position` stamped;
    /// propagated into the first move segment emitted after a halt.
    pending_axis_reset: u8,
    halted: bool,
}

impl MoveSegmentBuilder {
    pub fn new() -> Self {
        Self {
            position: [0.0; AXIS_COUNT],
            print_time: 0.0,
            pending_axis_reset: 0xFF,
            halted: true,
        }
    }

    pub fn position(&self) -> [f32; AXIS_COUNT] {
        self.position
    }

    /// Emits the beginning-empty move that must precede the first real
    /// segment after a halt, so every shaper tap can initialize pointing at
    /// a real segment before real motion starts. `lookback` is the maximum
    /// lookback time across all active generators.
    pub fn begin_motion<const N: usize>(
        &mut self,
        queue: &mut MoveQueue<N>,
        lookback: f32,
    ) -> Result<(), PlannerError> {
        if !self.halted {
            return Ok(());
        }
        let segment = MoveSegment {
            start_v: 0.0,
            half_accel: 0.0,
            duration: lookback + 0.001,
            print_time: self.print_time,
            axes_unit: [0.0; AXIS_COUNT],
            start_pos: self.position,
            flags: SegmentFlags {
                beginning_empty: true,
                first_of_block: true,
                ..Default::default()
            },
        };
        queue
            .push_reserved(segment)
            .map_err(|_| PlannerError::EmptyMoveEnqueueFailed)?;
        self.print_time += segment.duration;
        self.halted = false;
        Ok(())
    }

    /// Emits the ending-empty move once the planner has drained. Its
    /// presence drives every generator's "end of motion" surfacing.
    pub fn end_motion<const N: usize>(&mut self, queue: &mut MoveQueue<N>) -> Result<(), PlannerError> {
        let segment = MoveSegment {
            start_v: 0.0,
            half_accel: 0.0,
            duration: ENDING_EMPTY_MOVE_DURATION,
            print_time: self.print_time,
            axes_unit: [0.0; AXIS_COUNT],
            start_pos: self.position,
            flags: SegmentFlags {
                ending_empty: true,
                last_of_block: true,
                ..Default::default()
            },
        };
        queue
            .push_reserved(segment)
            .map_err(|_| PlannerError::EmptyMoveEnqueueFailed)?;
        self.print_time += segment.duration;
        self.halted = true;
        Ok(())
    }

    /// Splits one planner block into its accel/cruise/decel phases and
    /// enqueues each as a move segment. Returns `WouldBlock` if the queue
    /// has no free slot -- the caller should retry on the next move-ISR tick.
    pub fn build_block<const N: usize>(
        &mut self,
        queue: &mut MoveQueue<N>,
        block: &PlannerBlock,
    ) -> Result<(), WouldBlock> {
        let a = block.accel.max(1e-9);
        let total = block.distance;

        let mut d_accel = ((block.v_cruise * block.v_cruise - block.v_start * block.v_start)
            / (2.0 * a))
            .clamp(0.0, total);
        let mut d_decel = ((block.v_cruise * block.v_cruise - block.v_end * block.v_end)
            / (2.0 * a))
            .clamp(0.0, total);

        let (v_cruise, d_cruise) = if d_accel + d_decel >= total {
            // No cruise phase fits: recompute the reachable peak velocity and
            // split the whole distance between accel and decel only.
            let v_peak_sq = (2.0 * a * total + block.v_start * block.v_start
                + block.v_end * block.v_end)
                / 2.0;
            let v_peak = v_peak_sq.max(0.0).sqrt();
            d_accel = ((v_peak * v_peak - block.v_start * block.v_start) / (2.0 * a)).clamp(0.0, total);
            d_decel = (total - d_accel).max(0.0);
            (v_peak, 0.0)
        } else {
            (block.v_cruise, total - d_accel - d_decel)
        };

        // Merge sub-epsilon phases into an adjacent one.
        let mut phases: heapless::Vec<(Phase, f32, f32, f32), 3> = heapless::Vec::new();
        let merge_or_push =
            |phases: &mut heapless::Vec<(Phase, f32, f32, f32), 3>, phase, dist, v0, v1| {
                if dist < EPSILON_DISTANCE {
                    return;
                }
                let _ = phases.push((phase, dist, v0, v1));
            };
        merge_or_push(&mut phases, Phase::Accel, d_accel, block.v_start, v_cruise);
        merge_or_push(&mut phases, Phase::Cruise, d_cruise, v_cruise, v_cruise);
        merge_or_push(&mut phases, Phase::Decel, d_decel, v_cruise, block.v_end);

        if phases.is_empty() {
            return Ok(());
        }

        // Pre-flight: make sure we have room for every phase of this block
        // before mutating any state, so a partial block never lands.
        if queue.free_slots() <= crate::MOVE_SEGMENT_QUEUE_MIN_FREE_SLOTS + phases.len() as u32 {
            return Err(WouldBlock::Full);
        }

        let reset_bits = core::mem::take(&mut self.pending_axis_reset) & block.axis_used;

        let n_phases = phases.len();
        for (i, (phase, dist, v0, v1)) in phases.into_iter().enumerate() {
            let half_accel = if dist > EPSILON_DISTANCE {
                (v1 * v1 - v0 * v0) / (4.0 * dist)
            } else {
                0.0
            };
            let duration = if half_accel.abs() > 1e-9 {
                (v1 - v0) / (2.0 * half_accel)
            } else if v0.abs() > 1e-9 {
                dist / v0
            } else {
                0.0
            };

            let mut flags = SegmentFlags {
                phase: Some(phase),
                direction_bits: direction_bits(&block.unit_dir),
                active_bits: block.axis_used,
                first_of_block: i == 0,
                last_of_block: i == n_phases - 1,
                ..Default::default()
            };
            if i == 0 {
                flags.reset_position_bits = reset_bits;
            }

            let segment = MoveSegment {
                start_v: v0,
                half_accel,
                duration: duration.max(0.0),
                print_time: self.print_time,
                axes_unit: block.unit_dir,
                start_pos: self.position,
                flags,
            };

            queue.push(segment).map_err(|_| WouldBlock::Full)?;

            for axis in 0..AXIS_COUNT {
                self.position[axis] += block.unit_dir[axis] * dist;
            }
            self.print_time += segment.duration;
        }

        Ok(())
    }

    /// Called whenever a motion run halts (abort, or planner idle with no
    /// more blocks) so the next `begin_motion` re-primes the pipeline and
    /// the next block's first segment gets `reset_position` stamped.
    pub fn note_halted(&mut self, axes_used_since_halt: u8) {
        self.halted = true;
        self.pending_axis_reset = axes_used_since_halt;
    }
}

impl Default for MoveSegmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn direction_bits(unit: &[f32; AXIS_COUNT]) -> u8 {
    let mut bits = 0;
    for (axis, v) in unit.iter().enumerate() {
        if *v > 0.0 {
            bits |= 1 << axis;
        }
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(distance: f32, v_start: f32, v_cruise: f32, v_end: f32, accel: f32) -> PlannerBlock {
        PlannerBlock {
            unit_dir: [1.0, 0.0, 0.0, 0.0],
            distance,
            v_start,
            v_cruise,
            v_end,
            accel,
            axis_used: 0b0001,
        }
    }

    #[test]
    fn trapezoidal_block_emits_three_phases() {
        let mut queue: MoveQueue<16> = MoveQueue::new();
        let mut builder = MoveSegmentBuilder::new();
        builder.begin_motion(&mut queue, 0.01).unwrap();
        builder
            .build_block(&mut queue, &block(100.0, 0.0, 100.0, 0.0, 1000.0))
            .unwrap();
        // beginning-empty + 3 phases = 4 segments
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn triangular_block_has_no_cruise() {
        let mut queue: MoveQueue<16> = MoveQueue::new();
        let mut builder = MoveSegmentBuilder::new();
        builder.begin_motion(&mut queue, 0.01).unwrap();
        // distance too short to reach cruise_v
        builder
            .build_block(&mut queue, &block(1.0, 0.0, 100.0, 0.0, 1000.0))
            .unwrap();
        assert_eq!(queue.len(), 3); // beginning-empty + accel + decel
    }

    #[test]
    fn final_position_matches_total_distance() {
        let mut queue: MoveQueue<16> = MoveQueue::new();
        let mut builder = MoveSegmentBuilder::new();
        builder.begin_motion(&mut queue, 0.01).unwrap();
        builder
            .build_block(&mut queue, &block(100.0, 0.0, 100.0, 0.0, 1000.0))
            .unwrap();
        assert!((builder.position()[0] - 100.0).abs() < 1e-3);
    }
}
