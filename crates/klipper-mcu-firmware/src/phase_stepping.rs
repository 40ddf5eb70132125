//! Phase-stepping engine: the alternative output path that drives sinusoidal
//! coil currents directly into a stepper's windings instead of pulsing
//! STEP/DIR. Runs from a dedicated ~90 kHz timer interrupt, round-robining
//! the axes configured for it.

use driver_tmc::phase_stepping::{PhaseSteppingSpi, SharedBusLock};
use embedded_hal::spi::SpiBus;
use heapless::spsc::Consumer;

use crate::lut::{AxisLut, MOTOR_PERIOD};

/// Capacity of the per-axis `pending_moves` queue.
pub const PENDING_MOVES_CAPACITY: usize = 16;

/// Per-axis precomputed kinematic triple in electrical/physical units
/// appropriate to that axis (for CoreXY, the A/B projection has already
/// been applied by the producer).
#[derive(Debug, Clone, Copy)]
pub struct MoveTarget {
    pub initial_pos: f32,
    pub start_v: f32,
    pub half_accel: f32,
    pub duration: f32,
}

impl MoveTarget {
    pub fn position_at(&self, epoch: f32) -> f32 {
        self.initial_pos + self.start_v * epoch + self.half_accel * epoch * epoch
    }
}

/// Converts a physical-position delta into electrical-phase ticks:
/// `256 * steps_per_unit / microsteps`, folded into one scalar.
#[derive(Debug, Clone, Copy)]
pub struct PhaseConversion {
    pub ticks_per_unit: f32,
}

impl PhaseConversion {
    pub fn pos_to_phase(&self, position: f32) -> u16 {
        let raw = libm::floorf(position * self.ticks_per_unit) as i32;
        raw.rem_euclid(MOTOR_PERIOD as i32) as u16
    }
}

pub enum TickOutcome {
    /// Axis is not active; nothing was done.
    Idle,
    /// No pending move is available; held at the last commanded position.
    HoldAtPosition,
    /// Currents were committed successfully.
    Committed,
    /// The tick was skipped because the shared bus lock was held elsewhere.
    SkippedBusContention,
    /// The SPI write itself failed. Caller should consult `missed_tx_cnt`.
    SpiFault,
}

/// Per-axis phase-stepping state, owned rather than kept in a static array
/// indexed by axis.
pub struct AxisState {
    pub enabled: bool,
    pub active: bool,
    pub inverted: bool,
    pub zero_rotor_phase: u16,
    pub last_phase: u16,
    pub last_position: f32,
    pub conversion: PhaseConversion,
    pub lut: AxisLut,
    pub missed_tx_cnt: u32,
    current_move: Option<MoveTarget>,
    move_initial_time: f32,
    pending_moves: Consumer<'static, MoveTarget, PENDING_MOVES_CAPACITY>,
}

impl AxisState {
    pub fn new(
        conversion: PhaseConversion,
        pending_moves: Consumer<'static, MoveTarget, PENDING_MOVES_CAPACITY>,
    ) -> Self {
        Self {
            enabled: false,
            active: false,
            inverted: false,
            zero_rotor_phase: 0,
            last_phase: 0,
            last_position: 0.0,
            conversion,
            lut: AxisLut::identity(),
            missed_tx_cnt: 0,
            current_move: None,
            move_initial_time: 0.0,
        }
    }

    /// Advances to whichever `MoveTarget` covers `now`, retiring exhausted
    /// ones and pulling fresh ones off `pending_moves`. Returns `None` if no
    /// move data is available, in which case the axis holds its last
    /// commanded position.
    fn advance_to(&mut self, now: f32) -> Option<(MoveTarget, f32)> {
        if self.current_move.is_none() {
            self.current_move = self.pending_moves.dequeue();
            self.move_initial_time = now;
        }
        loop {
            let mv = self.current_move?;
            let epoch = now - self.move_initial_time;
            if epoch <= mv.duration {
                return Some((mv, epoch));
            }
            let overshoot = epoch - mv.duration;
            match self.pending_moves.dequeue() {
                Some(next) => {
                    self.current_move = Some(next);
                    self.move_initial_time = now - overshoot;
                }
                None => return Some((mv, mv.duration)),
            }
        }
    }

    /// Runs one round-robin tick for this axis: computes physical position,
    /// rotor phase, selects the LUT by direction of travel, and commits
    /// coil currents via SPI.
    pub fn tick<SPI, E>(
        &mut self,
        now: f32,
        spi: &mut PhaseSteppingSpi<SPI>,
        bus_lock: &SharedBusLock,
    ) -> TickOutcome
    where
        SPI: SpiBus<u8, Error = E>,
    {
        if !self.active {
            return TickOutcome::Idle;
        }
        let Some((mv, epoch)) = self.advance_to(now) else {
            return TickOutcome::HoldAtPosition;
        };

        let mut position = mv.position_at(epoch);
        if self.inverted {
            position = -position;
        }

        let moving_forward = position >= self.last_position;
        let phase = self.conversion.pos_to_phase(position);
        self.last_phase = phase.wrapping_add(self.zero_rotor_phase) % MOTOR_PERIOD;
        self.last_position = position;

        let table = self.lut.select(moving_forward);
        let (coil_a, coil_b) = table.coil_currents(self.last_phase);

        match spi.try_commit(bus_lock, coil_a, coil_b) {
            Ok(true) => {
                self.missed_tx_cnt = 0;
                TickOutcome::Committed
            }
            Ok(false) => TickOutcome::SkippedBusContention,
            Err(_) => {
                self.missed_tx_cnt = spi.missed_tx_count;
                TickOutcome::SpiFault
            }
        }
    }
}

/// Past this many consecutive SPI write failures on one axis, the fault is
/// fatal.
pub const SPI_FAULT_THRESHOLD: u32 = 5000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_conversion_wraps_into_motor_period() {
        let conv = PhaseConversion { ticks_per_unit: 200.0 };
        // 200 units/tick * 10 units = 2000 ticks, wraps to 2000 % 1024 = 976.
        assert_eq!(conv.pos_to_phase(10.0), 976);
    }

    #[test]
    fn move_target_position_matches_kinematic_formula() {
        let mv = MoveTarget { initial_pos: 1.0, start_v: 2.0, half_accel: 0.5, duration: 1.0 };
        assert!((mv.position_at(1.0) - (1.0 + 2.0 + 0.5)).abs() < 1e-6);
    }
}
