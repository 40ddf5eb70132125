//! Move ISR scheduler: the periodic, lower-priority task that keeps the
//! move-segment queue fed from the planner and the step-event queue fed
//! from the per-axis generators.

use core::sync::atomic::{AtomicBool, Ordering};

use heapless::spsc::Producer;
use motion::builder::{MoveSegmentBuilder, PlannerBlock};
use motion::errors::Diagnostics;
use motion::generators::GeneratorKind;
use motion::kinematics::corexy_motor_component;
use motion::merger::StepEventMerger;
use motion::queue::MoveQueue;
use motion::step_event::{GeneratorOutcome, WireStepEvent};
use motion::{MAX_STEP_EVENTS_PER_ISR, STEP_QUEUE_CAPACITY};

use crate::phase_stepping::MoveTarget;

/// Supplies the move ISR with planner blocks. The planner itself lives
/// outside this core; callers plug in whatever channel carries blocks from
/// the G-code/lookahead stage.
pub trait BlockSource {
    fn next_block(&mut self) -> Option<PlannerBlock>;
}

/// One physical axis's classic/shaped/pressure-advance generator, plus (for
/// axes that may run in phase-stepping mode) a producer side for that
/// axis's `MoveTarget` queue.
pub struct AxisSlot<const PENDING: usize> {
    pub generator: GeneratorKind,
    pub phase_target_producer: Option<Producer<'static, MoveTarget, PENDING>>,
}

/// Runs the drain-queue / advance-generators / flush-merger loop, at
/// whatever period the caller's timer task is configured for (e.g. 10 kHz).
pub struct MoveIsrScheduler<const AXES: usize, const NQ: usize> {
    builder: MoveSegmentBuilder,
    queue: MoveQueue<NQ>,
    merger: StepEventMerger,
    step_producer: Producer<'static, WireStepEvent, STEP_QUEUE_CAPACITY>,
    diagnostics: Diagnostics,
}

impl<const AXES: usize, const NQ: usize> MoveIsrScheduler<AXES, NQ> {
    pub fn new(step_producer: Producer<'static, WireStepEvent, STEP_QUEUE_CAPACITY>) -> Self {
        Self {
            builder: MoveSegmentBuilder::new(),
            queue: MoveQueue::new(),
            merger: StepEventMerger::new(),
            step_producer,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    /// One tick of the move ISR: drain blocks, advance generators, flush the
    /// merger into the step queue. `lookback` is the
    /// maximum lookback time across all active generators, used when a halt
    /// requires re-emitting the beginning-empty move.
    pub fn tick(
        &mut self,
        blocks: &mut impl BlockSource,
        generators: &mut [GeneratorKind; AXES],
        lookback: f32,
        stop_pending: &AtomicBool,
    ) {
        if stop_pending.load(Ordering::Acquire) {
            self.reset_queues(generators, stop_pending);
            return;
        }

        self.drain_blocks(blocks, lookback);
        self.advance_generators(generators);
    }

    fn drain_blocks(&mut self, blocks: &mut impl BlockSource, lookback: f32) {
        let _ = self.builder.begin_motion(&mut self.queue, lookback);
        // Bounded so a pathological planner can't starve the generator pass
        // within one tick; +1 to also make room for an ending-empty move.
        for _ in 0..(NQ + 1) {
            match blocks.next_block() {
                Some(block) => {
                    if self.builder.build_block(&mut self.queue, &block).is_err() {
                        self.diagnostics.move_queue_stall += 1;
                        break;
                    }
                }
                None => break,
            }
        }
    }

    fn advance_generators(&mut self, generators: &mut [GeneratorKind; AXES]) {
        for generator in generators.iter_mut() {
            for _ in 0..MAX_STEP_EVENTS_PER_ISR {
                match generator.advance(&mut self.queue) {
                    GeneratorOutcome::Event(event) => {
                        for wire_event in self.merger.offer(event) {
                            let _ = self.step_producer.enqueue(wire_event);
                        }
                    }
                    GeneratorOutcome::NoValidStep | GeneratorOutcome::WouldBlock => break,
                    GeneratorOutcome::EndOfMotion => {
                        for wire_event in self.merger.flush_end_of_motion() {
                            let _ = self.step_producer.enqueue(wire_event);
                        }
                        break;
                    }
                }
            }
        }
    }

    /// Cancellation path: short-circuits the drain/advance loops and clears
    /// both queues. Generator state resets are left to the
    /// caller (constructing fresh `GeneratorKind`s), since only the caller
    /// knows which axes were mid-segment versus idle.
    fn reset_queues(&mut self, _generators: &mut [GeneratorKind; AXES], stop_pending: &AtomicBool) {
        self.queue = MoveQueue::new();
        self.merger = StepEventMerger::new();
        self.builder = MoveSegmentBuilder::new();
        stop_pending.store(false, Ordering::Release);
    }
}

/// Projects a shaped/classic generator's currently filtered kinematic state
/// onto a phase-stepping `MoveTarget`, applying the CoreXY A/B projection
/// when `axis` is a motor axis rather than a logical one. Runs in the same
/// tick as the generator pass, after it, for whichever axes currently have
/// phase stepping active.
pub fn prepare_move_target(
    start_pos_x: f32,
    start_pos_y: f32,
    start_v_x: f32,
    start_v_y: f32,
    half_accel_x: f32,
    half_accel_y: f32,
    duration: f32,
    motor_a: bool,
) -> MoveTarget {
    MoveTarget {
        initial_pos: corexy_motor_component(start_pos_x, start_pos_y, motor_a),
        start_v: corexy_motor_component(start_v_x, start_v_y, motor_a),
        half_accel: corexy_motor_component(half_accel_x, half_accel_y, motor_a),
        duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion::segment::AXIS_COUNT;

    struct NoBlocks;
    impl BlockSource for NoBlocks {
        fn next_block(&mut self) -> Option<PlannerBlock> {
            None
        }
    }

    #[test]
    fn corexy_projection_matches_plus_minus_rule() {
        let a = prepare_move_target(1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 1.0, true);
        let b = prepare_move_target(1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 1.0, false);
        assert_eq!(a.initial_pos, 3.0);
        assert_eq!(b.initial_pos, -1.0);
    }

    #[test]
    fn stop_pending_clears_the_flag_and_queue() {
        static mut QUEUE: heapless::spsc::Queue<WireStepEvent, STEP_QUEUE_CAPACITY> =
            heapless::spsc::Queue::new();
        let (producer, _consumer) = unsafe { QUEUE.split() };
        let mut scheduler: MoveIsrScheduler<AXIS_COUNT, 8> = MoveIsrScheduler::new(producer);
        let stop = AtomicBool::new(true);
        let mut generators: [GeneratorKind; AXIS_COUNT] = core::array::from_fn(|axis| {
            GeneratorKind::Classic(motion::generators::classic::ClassicGenerator::new(axis, 1.0 / 80.0))
        });
        scheduler.tick(&mut NoBlocks, &mut generators, 0.0, &stop);
        assert!(!stop.load(Ordering::Acquire));
    }
}
