//! Corrected-current lookup table for phase stepping: one electrical period
//! (`MOTOR_PERIOD` ticks) of per-tick phase shift, built from a truncated
//! Fourier spectrum of the measured hysteresis. Forward and backward tables
//! are independent so motor/belt hysteresis can differ by direction of
//! travel.

use core::f32::consts::PI;

/// Ticks per electrical period (4 full steps on a two-phase motor at
/// 256-microstep resolution).
pub const MOTOR_PERIOD: u16 = 1024;

/// Number of harmonics carried in the correction table.
pub const NUM_HARMONICS: usize = 16;

/// Full-scale coil current, in the signed 16-bit units the driver's
/// `XDIRECT` register expects.
pub const CURRENT_AMPLITUDE: f32 = 31200.0;

/// Magnitude/phase of one harmonic of the correction spectrum.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Harmonic {
    pub magnitude: f32,
    pub phase: f32,
}

/// Per-tick phase-shift table for one direction of one axis. `mag_h`/`pha_h`
/// for harmonic `h` (1-indexed) contribute `mag_h * sin(h*theta + pha_h)`
/// radians of phase shift at electrical angle `theta`.
pub struct CorrectedCurrentLut {
    harmonics: [Harmonic; NUM_HARMONICS],
    shift_table: [f32; MOTOR_PERIOD as usize],
}

impl CorrectedCurrentLut {
    pub fn identity() -> Self {
        Self {
            harmonics: [Harmonic::default(); NUM_HARMONICS],
            shift_table: [0.0; MOTOR_PERIOD as usize],
        }
    }

    pub fn harmonics(&self) -> &[Harmonic; NUM_HARMONICS] {
        &self.harmonics
    }

    /// Sets harmonic `h` (0-indexed) and recomputes the per-tick table.
    pub fn set_harmonic(&mut self, h: usize, magnitude: f32, phase: f32) {
        self.harmonics[h] = Harmonic { magnitude, phase };
        self.recompute();
    }

    fn recompute(&mut self) {
        for (tick, shift) in self.shift_table.iter_mut().enumerate() {
            let theta = 2.0 * PI * tick as f32 / MOTOR_PERIOD as f32;
            let mut sum = 0.0f32;
            for (h, harmonic) in self.harmonics.iter().enumerate() {
                if harmonic.magnitude == 0.0 {
                    continue;
                }
                let order = (h + 1) as f32;
                sum += harmonic.magnitude * libm::sinf(order * theta + harmonic.phase);
            }
            *shift = sum;
        }
    }

    /// Looks up `(coil_a, coil_b)` currents for the given rotor phase
    /// (0..`MOTOR_PERIOD`), applying the harmonic correction before
    /// evaluating the ideal sine/cosine pair.
    pub fn coil_currents(&self, phase: u16) -> (i16, i16) {
        let tick = (phase % MOTOR_PERIOD) as usize;
        let ideal_theta = 2.0 * PI * tick as f32 / MOTOR_PERIOD as f32;
        let theta = ideal_theta + self.shift_table[tick];
        let coil_a = (CURRENT_AMPLITUDE * libm::cosf(theta)) as i16;
        let coil_b = (CURRENT_AMPLITUDE * libm::sinf(theta)) as i16;
        (coil_a, coil_b)
    }
}

/// Forward/backward pair of correction tables for one phase-stepping axis.
pub struct AxisLut {
    pub forward: CorrectedCurrentLut,
    pub backward: CorrectedCurrentLut,
}

impl AxisLut {
    pub fn identity() -> Self {
        Self {
            forward: CorrectedCurrentLut::identity(),
            backward: CorrectedCurrentLut::identity(),
        }
    }

    /// Selects the table by direction of motion since the last sampled
    /// position: forward when position increased.
    pub fn select(&self, moving_forward: bool) -> &CorrectedCurrentLut {
        if moving_forward {
            &self.forward
        } else {
            &self.backward
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_table_reproduces_pure_sine() {
        let lut = CorrectedCurrentLut::identity();
        let (a0, b0) = lut.coil_currents(0);
        assert_eq!(a0, CURRENT_AMPLITUDE as i16);
        assert_eq!(b0, 0);
        let (a_quarter, b_quarter) = lut.coil_currents(MOTOR_PERIOD / 4);
        assert!(a_quarter.abs() < 10);
        assert_eq!(b_quarter, CURRENT_AMPLITUDE as i16);
    }

    #[test]
    fn setting_a_harmonic_perturbs_but_preserves_unit_circle_scale() {
        let mut lut = CorrectedCurrentLut::identity();
        lut.set_harmonic(0, 0.05, 0.0);
        let (a, b) = lut.coil_currents(0);
        let magnitude = ((a as f32).powi(2) + (b as f32).powi(2)).sqrt();
        // A small first-harmonic correction should nudge, not blow up, the
        // resulting current vector's magnitude.
        assert!((magnitude - CURRENT_AMPLITUDE).abs() < CURRENT_AMPLITUDE * 0.1);
    }

    #[test]
    fn forward_and_backward_tables_are_independent() {
        let mut lut = AxisLut::identity();
        lut.forward.set_harmonic(2, 0.1, 1.0);
        assert_eq!(lut.backward.harmonics()[2], Harmonic::default());
    }
}
