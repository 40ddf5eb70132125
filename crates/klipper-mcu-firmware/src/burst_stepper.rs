//! GPIO-BSRR burst stepping.
//!
//! Optional companion to the per-tick step ISR, for boards where a handful
//! of axes share step pins on one GPIO port. Rather than taking an interrupt
//! per step, a short run of step transitions is pre-computed into a BSRR
//! event buffer and replayed by a second DMA stream at a fixed update rate.
//! Used to emit the few discrete steps needed during homing or driver-state
//! resync (disabling phase stepping re-syncs MSCNT this way) without
//! stealing CPU time from the step/phase-stepping ISRs.
//!
//! Ported from `burst_stepper.cpp`'s `GpioEventBuffer` + `set_phase_diff`/
//! `fire` pair.

use driver_stepper::AtomicGpioPort;

/// Maximum number of step transitions a single burst can carry.
pub const GPIO_BUFFER_SIZE: usize = 64;

/// Plays a precomputed sequence of BSRR events via DMA, one slot per update
/// tick. `busy()` mirrors the original's "DMA stream still has a nonzero
/// transfer count and is enabled" check.
pub trait BurstDmaPort {
    fn busy(&self) -> bool;
    fn play(&mut self, events: &[u32]);
}

/// A GPIO burst-DMA event buffer: each slot's low 16 bits set step pins
/// high, the high 16 bits clear them, matching a BSRR register's set/reset
/// halves directly so the DMA can write the whole word to the port with no
/// CPU involvement per step.
#[derive(Debug, Clone, Copy)]
struct GpioEventBuffer {
    buffer: [u32; GPIO_BUFFER_SIZE],
    max_idx: Option<usize>,
}

impl GpioEventBuffer {
    const fn new() -> Self {
        Self { buffer: [0; GPIO_BUFFER_SIZE], max_idx: None }
    }

    fn clear(&mut self) {
        if self.max_idx.is_none() {
            return;
        }
        self.buffer = [0; GPIO_BUFFER_SIZE];
        self.max_idx = None;
    }

    fn add_event(&mut self, idx: usize, event_mask: u32) {
        self.buffer[idx] |= event_mask;
    }

    fn mark_max_event(&mut self, idx: usize) {
        self.max_idx = Some(self.max_idx.map_or(idx, |m| m.max(idx)));
    }

    fn max_event_count(&self) -> usize {
        self.max_idx.map_or(0, |m| m + 1)
    }

    fn dma_buffer(&self) -> &[u32] {
        &self.buffer[..self.max_event_count()]
    }
}

/// Burst-stepping state for up to `N` axes sharing one GPIO port.
///
/// `set_phase_diff` is called at most once per axis between `fire()` calls
/// (mirrors the original's "ensure we're called at most once per burst"
/// assertion) to queue that axis's transitions into the in-progress setup
/// buffer; `fire()` hands the completed buffer to DMA and starts a new one.
pub struct BurstStepper<const N: usize> {
    step_masks: [u32; N],
    axis_direction: [bool; N],
    axis_step_state: [bool; N],
    axis_was_set: [bool; N],
    buffers: [GpioEventBuffer; 2],
    setup: usize,
}

impl<const N: usize> BurstStepper<N> {
    /// `step_masks` are this axis's step-pin bit within the shared port,
    /// already positioned for the set half of a BSRR write (bit 0..15).
    pub fn new(step_masks: [u32; N]) -> Self {
        assert!(N <= 8, "burst stepper supports at most 8 axes on one port");
        Self {
            step_masks,
            axis_direction: [true; N],
            axis_step_state: [false; N],
            axis_was_set: [false; N],
            buffers: [GpioEventBuffer::new(), GpioEventBuffer::new()],
            setup: 0,
        }
    }

    /// Queues `diff` step pulses for `axis` (negative reverses direction)
    /// into the burst currently being assembled.
    pub fn set_phase_diff(&mut self, axis: usize, diff: i32) {
        assert!(axis < N, "axis out of range for this burst stepper");
        assert!(!self.axis_was_set[axis], "set_phase_diff called twice for the same axis before fire()");

        if diff == 0 {
            return;
        }

        let (count, forward) = if diff < 0 { ((-diff) as usize, false) } else { (diff as usize, true) };
        assert!(count <= GPIO_BUFFER_SIZE, "burst step count exceeds buffer capacity");

        self.axis_direction[axis] = forward;
        let pos_mask = self.step_masks[axis];
        let neg_mask = pos_mask << 16;
        // 16.16 fixed-point spacing so `count` toggles land at evenly spread
        // slots across the buffer without floating point in this hot path.
        let spacing = (GPIO_BUFFER_SIZE << 16) / count;

        let mut state = self.axis_step_state[axis];
        let mut idx = 0;
        let buffer = &mut self.buffers[self.setup];
        for i in 0..count {
            state = !state;
            idx = (spacing * i) >> 16;
            buffer.add_event(idx, if state { pos_mask } else { neg_mask });
        }
        buffer.mark_max_event(idx);

        self.axis_step_state[axis] = state;
        self.axis_was_set[axis] = true;
    }

    /// Applies queued direction changes for axes touched since the last
    /// `fire()`, then hands the completed burst to `dma` for playback.
    /// Returns `false` without disturbing the pending setup if the previous
    /// burst hasn't finished yet.
    pub fn fire<DIR, DMA>(&mut self, dir_port: &mut DIR, dma: &mut DMA) -> bool
    where
        DIR: AtomicGpioPort,
        DMA: BurstDmaPort,
    {
        if dma.busy() {
            return false;
        }

        let mut touched = 0u8;
        let mut forward = 0u8;
        for axis in 0..N {
            if !self.axis_was_set[axis] {
                continue;
            }
            self.axis_was_set[axis] = false;
            touched |= 1 << axis;
            if self.axis_direction[axis] {
                forward |= 1 << axis;
            }
        }
        if touched != 0 {
            dir_port.set_and_clear_atomic(forward & touched, touched & !forward);
        }

        if self.buffers[self.setup].max_event_count() > 0 {
            let fire_idx = self.setup;
            self.setup = 1 - self.setup;
            dma.play(self.buffers[fire_idx].dma_buffer());
            self.buffers[self.setup].clear();
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MockDirPort {
        state: u8,
    }
    impl AtomicGpioPort for MockDirPort {
        fn set_and_clear_atomic(&mut self, set_mask: u8, clear_mask: u8) {
            self.state |= set_mask;
            self.state &= !clear_mask;
        }
        fn write(&mut self, mask: u8) {
            self.state = mask;
        }
    }

    #[derive(Default)]
    struct MockDma {
        busy: bool,
        last_play: heapless::Vec<u32, GPIO_BUFFER_SIZE>,
    }
    impl BurstDmaPort for MockDma {
        fn busy(&self) -> bool {
            self.busy
        }
        fn play(&mut self, events: &[u32]) {
            self.last_play = heapless::Vec::from_slice(events).unwrap();
        }
    }

    #[test]
    fn set_phase_diff_then_fire_plays_the_right_number_of_toggles() {
        let mut stepper = BurstStepper::<2>::new([1 << 0, 1 << 3]);
        let mut dir = MockDirPort::default();
        let mut dma = MockDma::default();

        stepper.set_phase_diff(0, 4);
        assert!(stepper.fire(&mut dir, &mut dma));

        assert_eq!(dma.last_play.len(), 4);
        // Every queued slot sets or clears axis 0's bit, never both.
        for &slot in dma.last_play.iter() {
            assert!((slot & 0x1) != 0 || (slot & (0x1 << 16)) != 0);
        }
    }

    #[test]
    fn negative_diff_reverses_direction_bit() {
        let mut stepper = BurstStepper::<2>::new([1 << 0, 1 << 3]);
        let mut dir = MockDirPort::default();
        let mut dma = MockDma::default();

        stepper.set_phase_diff(1, -3);
        stepper.fire(&mut dir, &mut dma);

        assert_eq!(dir.state & (1 << 1), 0);
    }

    #[test]
    fn zero_diff_is_a_no_op_and_does_not_mark_axis_set() {
        let mut stepper = BurstStepper::<2>::new([1 << 0, 1 << 3]);
        let mut dir = MockDirPort::default();
        let mut dma = MockDma::default();

        stepper.set_phase_diff(0, 0);
        stepper.fire(&mut dir, &mut dma);

        assert!(dma.last_play.is_empty());
    }

    #[test]
    fn fire_is_rejected_while_dma_still_busy() {
        let mut stepper = BurstStepper::<1>::new([1]);
        let mut dir = MockDirPort::default();
        let mut dma = MockDma { busy: true, ..Default::default() };

        stepper.set_phase_diff(0, 2);
        assert!(!stepper.fire(&mut dir, &mut dma));
        assert!(dma.last_play.is_empty());

        // The pending burst survives the rejected fire and plays once free.
        dma.busy = false;
        assert!(stepper.fire(&mut dir, &mut dma));
        assert_eq!(dma.last_play.len(), 2);
    }

    #[test]
    #[should_panic(expected = "set_phase_diff called twice")]
    fn set_phase_diff_twice_before_fire_panics() {
        let mut stepper = BurstStepper::<1>::new([1]);
        stepper.set_phase_diff(0, 1);
        stepper.set_phase_diff(0, 1);
    }
}
