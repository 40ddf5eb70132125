//! Input-shaper step generator: convolves a move with a small set of
//! weighted, delayed taps to cancel a dominant resonance.

use crate::queue::{MoveQueue, SegIndex};
use crate::segment::MoveSegment;
use crate::step_event::{control, GeneratorOutcome, StepEventInfo};

pub const MAX_PULSES: usize = 5;

pub const INPUT_SHAPER_VELOCITY_EPSILON: f32 = 1e-4;
pub const INPUT_SHAPER_ACCELERATION_EPSILON: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaperType {
    Null,
    ZV,
    ZVD,
    MZV,
    EI,
    EI2Hump,
    EI3Hump,
}

/// An ordered set of weighted delayed taps: `amplitude[i]` fires `delay[i]`
/// seconds after an un-shaped impulse would (so `delay[i] <= 0` once shifted
/// to a zero amplitude-weighted mean).
#[derive(Debug, Clone, Copy)]
pub struct Shaper {
    pub shaper_type: ShaperType,
    pub taps: [(f32, f32); MAX_PULSES], // (amplitude, delay)
    pub num_taps: usize,
}

impl Shaper {
    /// The identity shaper: a single tap at zero delay, full amplitude.
    pub fn null() -> Self {
        Self {
            shaper_type: ShaperType::Null,
            taps: [(1.0, 0.0), (0.0, 0.0), (0.0, 0.0), (0.0, 0.0), (0.0, 0.0)],
            num_taps: 1,
        }
    }

    /// Builds a shaper from the closed-form catalogue of §4.3. `frequency`
    /// is the target resonance in Hz, `damping_ratio` is `ζ`, `vibration_reduction`
    /// is `1/vr` used by the EI family.
    pub fn new(shaper_type: ShaperType, frequency: f32, damping_ratio: f32, vibration_reduction: f32) -> Self {
        if shaper_type == ShaperType::Null || frequency <= 0.0 {
            return Self::null();
        }
        let zeta = damping_ratio.clamp(0.0, 0.9);
        let k = (-zeta * core::f32::consts::PI / (1.0 - zeta * zeta).sqrt()).exp();
        let t_d = 1.0 / (frequency * (1.0 - zeta * zeta).sqrt());

        let mut taps: [(f32, f32); MAX_PULSES] = [(0.0, 0.0); MAX_PULSES];
        let num_taps;
        match shaper_type {
            ShaperType::ZV => {
                taps[0] = (1.0, 0.0);
                taps[1] = (k, 0.5 * t_d);
                num_taps = 2;
            }
            ShaperType::ZVD => {
                taps[0] = (1.0, 0.0);
                taps[1] = (2.0 * k, 0.5 * t_d);
                taps[2] = (k * k, t_d);
                num_taps = 3;
            }
            ShaperType::MZV => {
                let kp = (-0.75 * zeta * core::f32::consts::PI / (1.0 - zeta * zeta).sqrt()).exp();
                taps[0] = (1.0, 0.0);
                taps[1] = (2.0 * kp, 0.375 * t_d);
                taps[2] = (kp * kp, 0.75 * t_d);
                num_taps = 3;
            }
            ShaperType::EI => {
                let v_tol = 1.0 / vibration_reduction.max(1.0);
                let a0 = (1.0 + v_tol) / 4.0;
                let a1 = (1.0 - v_tol) / 2.0;
                let a2 = a0;
                taps[0] = (a0, 0.0);
                taps[1] = (a1, 0.5 * t_d);
                taps[2] = (a2, t_d);
                num_taps = 3;
            }
            ShaperType::EI2Hump => {
                let v_tol = 1.0 / vibration_reduction.max(1.0);
                let k2 = k * k;
                let a0 = 1.0 - 3.0 * v_tol.min(1.0) / 4.0; // monotone with k-weighting below
                let denom = 1.0 + a0 + a0 * k + a0 * k2;
                let denom = denom.max(1e-6);
                taps[0] = (1.0 / denom, 0.0);
                taps[1] = (a0 / denom, 0.5 * t_d);
                taps[2] = (a0 * k / denom, t_d);
                taps[3] = (a0 * k2 / denom, 1.5 * t_d);
                num_taps = 4;
            }
            ShaperType::EI3Hump => {
                let v_tol = 1.0 / vibration_reduction.max(1.0);
                let a0 = 1.0 - 3.0 * v_tol.min(1.0) / 4.0;
                let k2 = k * k;
                let k3 = k2 * k;
                let denom = (1.0 + a0 + a0 * k + a0 * k2 + k3).max(1e-6);
                taps[0] = (1.0 / denom, 0.0);
                taps[1] = (a0 / denom, 0.5 * t_d);
                taps[2] = (a0 * k / denom, t_d);
                taps[3] = (a0 * k2 / denom, 1.5 * t_d);
                taps[4] = (k3 / denom, 2.0 * t_d);
                num_taps = 5;
            }
            ShaperType::Null => unreachable!(),
        }

        let mut shaper = Self { shaper_type, taps, num_taps };
        shaper.normalize();
        shaper
    }

    /// Normalizes amplitudes to sum to one and shifts delays so their
    /// amplitude-weighted mean is zero, per the §3 invariant.
    fn normalize(&mut self) {
        let sum: f32 = self.taps[..self.num_taps].iter().map(|(a, _)| *a).sum();
        if sum > 1e-9 {
            for t in self.taps[..self.num_taps].iter_mut() {
                t.0 /= sum;
            }
        }
        let mean: f32 = self.taps[..self.num_taps].iter().map(|(a, t)| a * t).sum();
        for t in self.taps[..self.num_taps].iter_mut() {
            t.1 -= mean;
        }
    }

    /// The lookback time that must always be available in the move queue:
    /// `-min(t_i)`.
    pub fn lookback_time(&self) -> f32 {
        self.taps[..self.num_taps]
            .iter()
            .map(|(_, t)| *t)
            .fold(0.0_f32, |acc, t| acc.min(t))
            .abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepDir {
    Positive,
    Negative,
}

/// Per-axis shaped generator state (§3 "Input-shaper state (per axis)").
pub struct ShaperGenerator {
    axis: usize,
    shaper: Shaper,
    /// Current segment index each tap currently points into.
    tap_segment: [Option<SegIndex>; MAX_PULSES],
    /// Absolute time at which each tap's current segment ends.
    next_change: [f32; MAX_PULSES],
    start_pos: f32,
    start_v: f32,
    half_accel: f32,
    print_time: f32,
    step_dir: StepDir,
    crossing_zero_velocity: bool,
    step_count: i64,
    step_size: f32,
    emitted_first_step: bool,
}

impl ShaperGenerator {
    pub fn new(axis: usize, shaper: Shaper, step_size: f32) -> Self {
        Self {
            axis,
            shaper,
            tap_segment: [None; MAX_PULSES],
            next_change: [0.0; MAX_PULSES],
            start_pos: 0.0,
            start_v: 0.0,
            half_accel: 0.0,
            print_time: 0.0,
            step_dir: StepDir::Positive,
            crossing_zero_velocity: false,
            step_count: 0,
            step_size,
            emitted_first_step: false,
        }
    }

    fn ensure_attached<const N: usize>(&mut self, queue: &MoveQueue<N>) -> bool {
        if self.tap_segment[0].is_some() {
            return true;
        }
        let idx = queue.unprocessed();
        if queue.get(idx).is_none() {
            return false;
        }
        for i in 0..self.shaper.num_taps {
            queue.acquire(idx);
            self.tap_segment[i] = Some(idx);
            self.next_change[i] = queue.get(idx).unwrap().duration;
        }
        let seg = queue.get(idx).unwrap();
        self.start_pos = seg.start_pos[self.axis];
        self.start_v = 0.0;
        self.half_accel = 0.0;
        self.print_time = seg.print_time;
        true
    }

    /// Advances the tap at `tap` to the next segment in the queue. Returns
    /// `false` if no next segment is available yet.
    fn advance_tap<const N: usize>(&mut self, queue: &mut MoveQueue<N>, tap: usize) -> bool {
        let Some(cur) = self.tap_segment[tap] else { return false };
        let next = cur.wrapping_add(1);
        if queue.get(next).is_none() {
            return false;
        }
        queue.acquire(next);
        queue.release(cur);
        self.tap_segment[tap] = Some(next);
        let seg = queue.get(next).unwrap();
        self.next_change[tap] += seg.duration;
        true
    }

    fn nearest_tap(&self) -> usize {
        let mut best = 0;
        for i in 1..self.shaper.num_taps {
            if self.next_change[i] < self.next_change[best] {
                best = i;
            }
        }
        best
    }

    fn all_taps_same_segment(&self) -> bool {
        let first = self.tap_segment[0];
        self.tap_segment[..self.shaper.num_taps].iter().all(|s| *s == first)
    }

    /// Advances shaped state to the next tap change, per §4.3 steps 1-4.
    fn advance_filtered_state<const N: usize>(&mut self, queue: &mut MoveQueue<N>) -> bool {
        let tap = self.nearest_tap();
        let t_fire = self.next_change[tap];
        let dt = (t_fire - self.print_time).max(0.0);

        // Integrate the current filtered state up to the firing tap.
        self.start_pos += self.start_v * dt + self.half_accel * dt * dt;
        self.start_v += 2.0 * self.half_accel * dt;
        self.print_time = t_fire;

        let Some(cur_idx) = self.tap_segment[tap] else { return false };
        let Some(cur_seg) = queue.get(cur_idx).copied() else { return false };
        let v_end_current = cur_seg.end_v() * cur_seg.axes_unit[self.axis];

        if !self.advance_tap(queue, tap) {
            return false;
        }

        if self.all_taps_same_segment() {
            // Numerical-conditioning fast path (§9 "Numerical conditioning"):
            // recompute from the shared segment's own coefficients instead of
            // accumulating, to avoid drift on long moves.
            let idx = self.tap_segment[0].unwrap();
            let seg = queue.get(idx).copied().unwrap();
            self.start_pos = seg.start_pos[self.axis];
            self.start_v = seg.start_v * seg.axes_unit[self.axis];
            self.half_accel = self.shaper.taps[..self.shaper.num_taps]
                .iter()
                .map(|(a, _)| a * seg.half_accel * seg.axes_unit[self.axis])
                .sum();
        } else {
            let next_seg = queue.get(self.tap_segment[tap].unwrap()).copied().unwrap();
            let v_start_next = next_seg.start_v * next_seg.axes_unit[self.axis];
            let a_i = self.shaper.taps[tap].0;
            self.start_v += a_i * (v_start_next - v_end_current);
            self.half_accel = 0.0;
            for i in 0..self.shaper.num_taps {
                if let Some(idx) = self.tap_segment[i] {
                    if let Some(seg) = queue.get(idx) {
                        self.half_accel += self.shaper.taps[i].0 * seg.half_accel * seg.axes_unit[self.axis];
                    }
                }
            }
        }

        // Zero-velocity-crossing detection (§4.3 step 5).
        let v_at_end = self.start_v + 2.0 * self.half_accel * dt.max(0.0);
        if self.start_v.signum() != 0.0 && v_at_end.signum() != self.start_v.signum() && self.half_accel.abs() > 1e-12 {
            self.crossing_zero_velocity = true;
        } else {
            self.crossing_zero_velocity = false;
        }

        if self.start_v.abs() < INPUT_SHAPER_VELOCITY_EPSILON {
            self.start_v = 0.0;
        }
        if self.half_accel.abs() < INPUT_SHAPER_ACCELERATION_EPSILON {
            self.half_accel = 0.0;
        }

        // Step-direction rule (§4.3 step 6).
        self.step_dir = if self.start_v > 0.0 || (self.start_v == 0.0 && self.half_accel > 0.0) {
            StepDir::Positive
        } else if self.start_v < 0.0 || (self.start_v == 0.0 && self.half_accel < 0.0) {
            StepDir::Negative
        } else {
            self.step_dir
        };

        true
    }

    pub fn advance<const N: usize>(&mut self, queue: &mut MoveQueue<N>) -> GeneratorOutcome {
        if !self.ensure_attached(queue) {
            return GeneratorOutcome::WouldBlock;
        }

        loop {
            if let Some(idx) = self.tap_segment[0] {
                if let Some(seg) = queue.get(idx) {
                    if seg.flags.ending_empty {
                        return GeneratorOutcome::EndOfMotion;
                    }
                }
            }

            let boundary_count = match self.step_dir {
                StepDir::Positive => self.step_count + 1,
                StepDir::Negative => self.step_count - 1,
            };
            let boundary = boundary_count as f32 * self.step_size;

            // If crossing zero, cap the search window at the analytical
            // crossing time instead of the tap's segment boundary.
            let window_end = if self.crossing_zero_velocity && self.half_accel.abs() > 1e-12 {
                self.print_time + (-self.start_v / (2.0 * self.half_accel)).max(0.0)
            } else {
                self.next_change[self.nearest_tap()]
            };

            match solve_quadratic(self.start_pos, self.start_v, self.half_accel, boundary, self.print_time, window_end) {
                Some(t) => {
                    self.step_count = boundary_count;
                    let mut control_bits = 0u8;
                    if !self.emitted_first_step {
                        control_bits |= control::FIRST_STEP;
                        self.emitted_first_step = true;
                    }
                    let dir_bit = if self.step_dir == StepDir::Positive { 1 << self.axis } else { 0 };
                    return GeneratorOutcome::Event(StepEventInfo {
                        time: t,
                        step_bits: 1 << self.axis,
                        direction_bits: dir_bit,
                        active_bits: 1 << self.axis,
                        control_bits,
                    });
                }
                None => {
                    if self.crossing_zero_velocity {
                        self.crossing_zero_velocity = false;
                    }
                    if !self.advance_filtered_state(queue) {
                        return GeneratorOutcome::NoValidStep;
                    }
                }
            }
        }
    }
}

fn solve_quadratic(start_pos: f32, v: f32, a: f32, boundary: f32, t0: f32, t_max: f32) -> Option<f32> {
    let c = start_pos - boundary;
    let candidates: [Option<f32>; 2] = if a.abs() < 1e-9 {
        if v.abs() < 1e-9 {
            [None, None]
        } else {
            [Some(t0 - c / v), None]
        }
    } else {
        let disc = v * v - 4.0 * a * c;
        if disc < 0.0 {
            [None, None]
        } else {
            let sq = disc.sqrt();
            [Some(t0 + (-v + sq) / (2.0 * a)), Some(t0 + (-v - sq) / (2.0 * a))]
        }
    };
    candidates
        .into_iter()
        .flatten()
        .filter(|&t| t > t0 && t <= t_max && t.is_finite())
        .fold(None, |best, t| match best {
            None => Some(t),
            Some(b) if t < b => Some(t),
            Some(b) => Some(b),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zv_shaper_amplitudes_sum_to_one_and_mean_zero() {
        let s = Shaper::new(ShaperType::ZV, 50.0, 0.1, 20.0);
        let sum: f32 = s.taps[..s.num_taps].iter().map(|(a, _)| *a).sum();
        assert!((sum - 1.0).abs() < 1e-6);
        let mean: f32 = s.taps[..s.num_taps].iter().map(|(a, t)| a * t).sum();
        assert!(mean.abs() < 1e-6);
    }

    #[test]
    fn null_shaper_is_identity() {
        let s = Shaper::null();
        assert_eq!(s.num_taps, 1);
        assert_eq!(s.taps[0], (1.0, 0.0));
    }

    #[test]
    fn ei_family_amplitudes_sum_to_one() {
        for ty in [ShaperType::EI, ShaperType::EI2Hump, ShaperType::EI3Hump] {
            let s = Shaper::new(ty, 40.0, 0.05, 20.0);
            let sum: f32 = s.taps[..s.num_taps].iter().map(|(a, _)| *a).sum();
            assert!((sum - 1.0).abs() < 1e-5, "{ty:?} sum={sum}");
        }
    }
}
