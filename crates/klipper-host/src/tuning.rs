//! Vibration-sweep and phase-stepping calibration routines.
//!
//! Runs synchronously on the caller thread (the tokio task driving a `M958`/
//! `M959`/`M970`+ dispatch), the way the rest of the motion-tuning surface
//! does. Grounded on `fourier_series.h`/`.cpp`'s single-bin DFT, `M958.cpp`'s
//! `HarmonicGenerator`/`StepDir` step-delay trajectory, and `calibration.cpp`'s
//! `InterruptableGoldenSearch`.

use crate::config::{Axis, PhaseStepLut, ShaperTypeConfig};
use klipper_proto::fifo::AccelSample;
use motion::generators::shaper::Shaper;
use std::f32::consts::PI;

/// Accelerometer sampling rate is expected to sit near the satellite board's
/// fixed rate; outside this window a measurement is untrustworthy.
pub const ACCEL_SAMPLE_RATE_MIN_HZ: f32 = 1100.0;
pub const ACCEL_SAMPLE_RATE_MAX_HZ: f32 = 1500.0;

/// Matches `motion::merger::STEP_TIMER_FREQUENCY` -- the same tick rate the
/// step-event queue uses, so excitation pulses built here line up with the
/// rest of the motion core's time base.
const STEP_TIMER_FREQUENCY: f32 = motion::merger::STEP_TIMER_FREQUENCY;

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum TuningError {
    #[error("accelerometer sample rate {measured_hz:.1} Hz outside [{ACCEL_SAMPLE_RATE_MIN_HZ}, {ACCEL_SAMPLE_RATE_MAX_HZ}] Hz")]
    AccelSampleRateOutOfRange { measured_hz: f32 },
    #[error("no accelerometer samples collected")]
    NoSamples,
    #[error("measurement failed after all retries")]
    RetriesExhausted,
}

/// Single-bin discrete Fourier correlation against a known frequency,
/// accumulated one accelerometer sample at a time. A direct port of
/// `FourierSeries3d`: `amplitude = (sin(2*pi*f*t), cos(2*pi*f*t))` accumulated
/// per axis, magnitude read back as `2*|sum|/n`.
#[derive(Debug, Clone, Copy)]
pub struct FourierSeries3d {
    freq_2pi: f32,
    sum: [(f32, f32); 3],
    samples: u32,
}

impl FourierSeries3d {
    pub fn new(frequency: f32) -> Self {
        Self { freq_2pi: frequency * 2.0 * PI, sum: [(0.0, 0.0); 3], samples: 0 }
    }

    /// Accumulates one sample taken at `sample_time` (seconds since the
    /// measurement started). Returns the running sample count.
    pub fn add_sample(&mut self, sample_time: f32, sample: [f32; 3]) -> u32 {
        let theta = self.freq_2pi * sample_time;
        let (sin_t, cos_t) = (theta.sin(), theta.cos());
        for (axis, value) in sample.into_iter().enumerate() {
            self.sum[axis].0 += sin_t * value;
            self.sum[axis].1 += cos_t * value;
        }
        self.samples += 1;
        self.samples
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Per-axis complex-amplitude magnitude at the configured frequency.
    pub fn magnitude(&self) -> [f32; 3] {
        let n = self.samples.max(1) as f32;
        let mut out = [0.0; 3];
        for (axis, &(re, im)) in self.sum.iter().enumerate() {
            out[axis] = 2.0 * (re * re + im * im).sqrt() / n;
        }
        out
    }
}

/// Closed-form step-delay trajectory for a single-sine excitation. A direct
/// port of `HarmonicGenerator`: amplitude rounds to a whole step count, and
/// the emitted delay sequence is a `StepDir`-style sine stepping pattern
/// rather than a smoothly varying velocity.
pub struct HarmonicStepGenerator {
    amplitude_steps: i32,
    step_len: f32,
    freq2pi_inv: f32,
    last_time: f32,
    last_step: i32,
    dir_forward: bool,
}

impl HarmonicStepGenerator {
    /// Double-integral of acceleration over time: displacement amplitude in
    /// meters for a sine excitation at `frequency` Hz / `acceleration` m/s².
    pub fn amplitude_not_rounded(frequency: f32, acceleration: f32) -> f32 {
        acceleration / (4.0 * PI * PI * frequency * frequency)
    }

    fn amplitude_round_to_steps(amplitude_not_rounded: f32, step_len: f32) -> i32 {
        (amplitude_not_rounded / step_len).ceil().max(1.0) as i32
    }

    pub fn new(frequency: f32, amplitude: f32, step_len: f32) -> Self {
        let amplitude_steps = Self::amplitude_round_to_steps(amplitude, step_len);
        Self {
            amplitude_steps,
            step_len,
            freq2pi_inv: 1.0 / (frequency * 2.0 * PI),
            last_time: 1.0 / (frequency * 4.0),
            last_step: amplitude_steps - 1,
            dir_forward: false,
        }
    }

    /// Next inter-step delay, in seconds, signed by direction (negative =
    /// reverse). Mutates the internal sine-stepping state.
    pub fn next_delay_dir(&mut self) -> f32 {
        let new_time = ((self.last_step as f32) / self.amplitude_steps as f32).asin() * self.freq2pi_inv;

        if self.dir_forward {
            if self.last_step < self.amplitude_steps {
                self.last_step += 1;
            } else {
                self.last_step -= 1;
                self.dir_forward = false;
            }
        } else if self.last_step > -self.amplitude_steps {
            self.last_step -= 1;
        } else {
            self.last_step += 1;
            self.dir_forward = true;
        }

        let next_delay = new_time - self.last_time;
        self.last_time = new_time;
        next_delay
    }

    pub fn steps_per_period(&self) -> u32 {
        (self.amplitude_steps * 4) as u32
    }

    /// Re-derives the actual excitation frequency from the rounded step
    /// sequence by summing one full period's delays. Consumes a period of
    /// trajectory state -- build a fresh generator for the real excitation run.
    pub fn actual_frequency(&mut self) -> f32 {
        let mut period = 0.0f32;
        for _ in 0..self.steps_per_period() {
            period += self.next_delay_dir().abs();
        }
        1.0 / period
    }

    pub fn acceleration_at(&self, frequency: f32) -> f32 {
        self.amplitude_steps as f32 * self.step_len * 4.0 * PI * PI * frequency * frequency
    }
}

/// One excitation step pulse, ready to push directly into the step-event
/// queue, bypassing the move-segment builder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepPulse {
    pub delay_ticks: u32,
    pub direction: bool,
}

/// Request parameters for a single-frequency excitation probe (`M958`).
#[derive(Debug, Clone, Copy)]
pub struct VibrateParams {
    pub axis: Axis,
    pub frequency: f32,
    pub acceleration: f32,
    pub cycles: u32,
    pub step_len: f32,
}

/// Builds the excitation trajectory for `params`: the actual (rounded)
/// excitation frequency plus the step pulses to inject into the queue.
pub fn build_excitation(params: &VibrateParams) -> (f32, Vec<StepPulse>) {
    let amplitude = HarmonicStepGenerator::amplitude_not_rounded(params.frequency, params.acceleration);

    let mut probe = HarmonicStepGenerator::new(params.frequency, amplitude, params.step_len);
    let actual_frequency = probe.actual_frequency();

    let mut generator = HarmonicStepGenerator::new(params.frequency, amplitude, params.step_len);
    let total_steps = generator.steps_per_period() * params.cycles;
    let mut pulses = Vec::with_capacity(total_steps as usize);
    let mut fraction = 0.0f32;
    for _ in 0..total_steps {
        let delay_dir = generator.next_delay_dir();
        let direction = delay_dir < 0.0;
        let delay_ticks_f = delay_dir.abs() * STEP_TIMER_FREQUENCY + fraction;
        let delay_ticks = delay_ticks_f as u32;
        fraction = delay_ticks_f - delay_ticks as f32;
        pulses.push(StepPulse { delay_ticks, direction });
    }
    (actual_frequency, pulses)
}

/// Result of a single vibration-sweep measurement.
#[derive(Debug, Clone, Copy)]
pub struct VibrateMeasurement {
    pub excitation_frequency: f32,
    pub amplitude: [f32; 3],
    pub gain: [f32; 3],
}

/// Runs the single-bin DFT over pre-collected accelerometer samples and
/// derives `(amplitude, gain)`. `harmonic` lets phase-stepping calibration
/// measure at `h * excitation_frequency` instead of the fundamental.
pub fn vibrate_measure(
    excitation_frequency: f32,
    harmonic: u32,
    excitation_acceleration: f32,
    measured_sample_rate_hz: f32,
    samples: &[(f32, AccelSample)],
) -> Result<VibrateMeasurement, TuningError> {
    if !(ACCEL_SAMPLE_RATE_MIN_HZ..=ACCEL_SAMPLE_RATE_MAX_HZ).contains(&measured_sample_rate_hz) {
        return Err(TuningError::AccelSampleRateOutOfRange { measured_hz: measured_sample_rate_hz });
    }
    if samples.is_empty() {
        return Err(TuningError::NoSamples);
    }

    let mut dft = FourierSeries3d::new(excitation_frequency * harmonic.max(1) as f32);
    for (t, sample) in samples {
        dft.add_sample(*t, [sample.x, sample.y, sample.z]);
    }
    let amplitude = dft.magnitude();
    let denom = excitation_acceleration.abs().max(f32::EPSILON);
    let gain = amplitude.map(|a| a / denom);
    Ok(VibrateMeasurement { excitation_frequency, amplitude, gain })
}

/// Retries a full sample-and-measure cycle up to 3 times on transient errors
/// (accelerometer sample-rate sanity failures, empty captures). `sample_run`
/// performs the actual excitation + accelerometer capture and returns the
/// measured sample rate alongside the collected `(time, sample)` pairs.
pub fn vibrate_measure_with_retry<F>(
    excitation_frequency: f32,
    harmonic: u32,
    excitation_acceleration: f32,
    mut sample_run: F,
) -> Result<VibrateMeasurement, TuningError>
where
    F: FnMut() -> Result<(f32, Vec<(f32, AccelSample)>), TuningError>,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut last_err = TuningError::RetriesExhausted;
    for _ in 0..MAX_ATTEMPTS {
        let outcome = sample_run().and_then(|(rate_hz, samples)| {
            vibrate_measure(excitation_frequency, harmonic, excitation_acceleration, rate_hz, &samples)
        });
        match outcome {
            Ok(measurement) => return Ok(measurement),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

/// One point of a swept power-spectral-density table (`M959`).
#[derive(Debug, Clone, Copy)]
pub struct PsdSample {
    pub frequency: f32,
    pub psd: f32,
}

/// Result of fitting one shaper candidate against a PSD table.
#[derive(Debug, Clone, Copy)]
pub struct ShaperFit {
    pub shaper_type: ShaperTypeConfig,
    pub frequency: f32,
    pub damping: f32,
    pub score: f32,
    pub vibration_remaining: f32,
    pub smoothing: f32,
}

const DAMPING_CANDIDATES: [f32; 3] = [0.05, 0.10, 0.15];
const SHAPER_FREQ_MIN: f32 = 5.0;
const SHAPER_FREQ_MAX: f32 = 150.0;
const SHAPER_FREQ_STEP: f32 = 1.0;
/// Template acceleration/cruise-velocity pair the smoothing metric is
/// measured against.
const SMOOTHING_TEMPLATE_ACCEL: f32 = 5000.0;
const SMOOTHING_TEMPLATE_SCV: f32 = 5.0;

const SHAPER_TYPE_ORDER: [ShaperTypeConfig; 6] = [
    ShaperTypeConfig::Zv,
    ShaperTypeConfig::Zvd,
    ShaperTypeConfig::Mzv,
    ShaperTypeConfig::Ei,
    ShaperTypeConfig::Ei2Hump,
    ShaperTypeConfig::Ei3Hump,
];

/// The shaper's magnitude response at `frequency`: `|sum_i a_i * e^{-j*2*pi*f*t_i}|`.
fn frequency_response(shaper: &Shaper, frequency: f32) -> f32 {
    let omega = 2.0 * PI * frequency;
    let (mut re, mut im) = (0.0, 0.0);
    for &(amplitude, delay) in &shaper.taps[..shaper.num_taps] {
        re += amplitude * (omega * delay).cos();
        im += amplitude * (omega * delay).sin();
    }
    (re * re + im * im).sqrt()
}

/// Remaining vibration fraction: the PSD-weighted RMS of the shaper's
/// frequency response.
fn vibration_remaining(shaper: &Shaper, psd: &[PsdSample]) -> f32 {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for sample in psd {
        let response = frequency_response(shaper, sample.frequency);
        numerator += sample.psd * response * response;
        denominator += sample.psd;
    }
    if denominator <= 0.0 {
        0.0
    } else {
        (numerator / denominator).sqrt()
    }
}

/// Time-weighted amplitude offset of the shaper's taps against the
/// 5000 mm/s² / 5 mm/s template, approximating the extra deviation a shaped
/// move introduces at a sharp corner.
fn shaper_smoothing(shaper: &Shaper) -> f32 {
    let taps = &shaper.taps[..shaper.num_taps];
    let total_amplitude: f32 = taps.iter().map(|(a, _)| a).sum();
    if total_amplitude <= 0.0 {
        return 0.0;
    }
    let shift: f32 = taps.iter().map(|(a, t)| a * t).sum::<f32>() / total_amplitude;
    let offset: f32 = taps.iter().map(|(a, t)| a * (t - shift).abs()).sum::<f32>() / total_amplitude;
    SMOOTHING_TEMPLATE_ACCEL / 2.0 * offset * offset + SMOOTHING_TEMPLATE_SCV * offset
}

/// Sweeps `[5, 150]` Hz for each candidate shaper type, pessimising the
/// remaining vibration over `ζ ∈ {0.05, 0.10, 0.15}`, and selects the
/// earliest-catalogued type whose score is not clearly beaten by a later one.
pub fn find_best_shaper(psd: &[PsdSample]) -> Option<ShaperFit> {
    let mut per_type = Vec::with_capacity(SHAPER_TYPE_ORDER.len());

    for &shaper_type in &SHAPER_TYPE_ORDER {
        let mut best_for_type: Option<ShaperFit> = None;
        let mut frequency = SHAPER_FREQ_MIN;
        while frequency <= SHAPER_FREQ_MAX {
            let mut worst_vib = 0.0f32;
            let mut worst_smoothing = 0.0f32;
            for &damping in &DAMPING_CANDIDATES {
                let shaper = Shaper::new(shaper_type.to_motion(), frequency, damping, 20.0);
                let vib = vibration_remaining(&shaper, psd);
                if vib >= worst_vib {
                    worst_vib = vib;
                    worst_smoothing = shaper_smoothing(&shaper);
                }
            }
            let score = worst_smoothing * (worst_vib.powf(1.5) + 0.2 * worst_vib + 0.01);
            if best_for_type.map_or(true, |b| score < b.score) {
                best_for_type = Some(ShaperFit {
                    shaper_type,
                    frequency,
                    damping: DAMPING_CANDIDATES[1],
                    score,
                    vibration_remaining: worst_vib,
                    smoothing: worst_smoothing,
                });
            }
            frequency += SHAPER_FREQ_STEP;
        }
        if let Some(fit) = best_for_type {
            per_type.push(fit);
        }
    }

    let mut best: Option<ShaperFit> = None;
    for candidate in per_type {
        best = Some(match best {
            None => candidate,
            Some(b) => {
                let clearly_better = candidate.score <= b.score * 0.8;
                let tied_but_smoother = candidate.score <= b.score * 1.2 && candidate.smoothing <= b.smoothing * 0.9;
                if clearly_better || tied_but_smoother {
                    candidate
                } else {
                    b
                }
            }
        });
    }
    best
}

/// Coroutine-style golden-section search: `step()` either asks the caller to
/// evaluate the objective at `x()` or reports convergence, so a move + DFT
/// can run between calls without blocking the caller thread. A direct port
/// of `InterruptableGoldenSearch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GoldenSearchPhase {
    NotStarted,
    InitialFcRequested,
    InitialFdRequested,
    FcRequested,
    FdRequested,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GoldenSearchStep {
    /// Evaluate the objective at this `x` and call `step()` again with the result.
    Evaluate(f32),
    /// The search has converged; `x` minimises the objective with value `value`.
    Converged { x: f32, value: f32 },
}

/// Golden ratio `φ = (1 + √5) / 2`, matching `calibration.cpp`'s `PHI`.
const PHI: f32 = 1.618_034;

pub struct GoldenSearchState {
    phase: GoldenSearchPhase,
    iterations: u32,
    evals: u32,
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    fc: f32,
    fd: f32,
    requested_x: f32,
    result: f32,
    epsilon: f32,
}

impl GoldenSearchState {
    pub fn new(a: f32, b: f32, epsilon: f32) -> Self {
        Self {
            phase: GoldenSearchPhase::NotStarted,
            iterations: 0,
            evals: 0,
            a,
            b,
            c: 0.0,
            d: 0.0,
            fc: 0.0,
            fd: 0.0,
            requested_x: 0.0,
            result: 0.0,
            epsilon,
        }
    }

    pub fn x(&self) -> f32 {
        self.requested_x
    }

    fn do_iteration(&mut self) {
        if self.fc < self.fd {
            self.b = self.d;
            self.d = self.c;
            self.fd = self.fc;
            self.c = self.b - (self.b - self.a) / PHI;
            self.requested_x = self.c;
            self.phase = GoldenSearchPhase::FcRequested;
        } else {
            self.a = self.c;
            self.c = self.d;
            self.fc = self.fd;
            self.d = self.a + (self.b - self.a) / PHI;
            self.requested_x = self.d;
            self.phase = GoldenSearchPhase::FdRequested;
        }
        self.iterations += 1;
    }

    /// Submits the previous evaluation's result and advances the search.
    /// The first call's `fx` is never read (there is nothing to submit yet).
    pub fn step(&mut self, fx: f32) -> GoldenSearchStep {
        self.result = fx;
        match self.phase {
            GoldenSearchPhase::NotStarted => {
                self.c = self.b - (self.b - self.a) / PHI;
                self.d = self.a + (self.b - self.a) / PHI;
                self.requested_x = self.c;
                self.phase = GoldenSearchPhase::InitialFcRequested;
            }
            GoldenSearchPhase::InitialFcRequested => {
                self.fc = self.result;
                self.requested_x = self.d;
                self.phase = GoldenSearchPhase::InitialFdRequested;
            }
            GoldenSearchPhase::InitialFdRequested => {
                self.fd = self.result;
                self.do_iteration();
            }
            GoldenSearchPhase::FcRequested => {
                self.fc = self.result;
                self.do_iteration();
            }
            GoldenSearchPhase::FdRequested => {
                self.fd = self.result;
                self.do_iteration();
            }
        }
        self.evals += 1;

        if self.phase != GoldenSearchPhase::NotStarted && self.step_size() <= self.epsilon {
            GoldenSearchStep::Converged { x: self.arg_min(), value: self.min() }
        } else {
            GoldenSearchStep::Evaluate(self.x())
        }
    }

    pub fn step_size(&self) -> f32 {
        (self.b - self.a).abs()
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn evals(&self) -> u32 {
        self.evals
    }

    pub fn arg_min(&self) -> f32 {
        if self.fc < self.fd {
            self.c
        } else {
            self.d
        }
    }

    pub fn min(&self) -> f32 {
        self.fc.min(self.fd)
    }
}

const PHASE_SEARCH_WINDOW: f32 = 0.1;
const PHASE_SEARCH_EPSILON: f32 = 0.002;
const MAGNITUDE_SEARCH_WINDOW: f32 = 0.1;
const MAGNITUDE_SEARCH_EPSILON: f32 = 0.01;
/// Default number of phase/magnitude search iterations per harmonic.
pub const DEFAULT_PHASE_STEP_ITERATIONS: u32 = 18;
/// Consecutive accelerometer-sanity failures before a harmonic's phase is
/// left unchanged and calibration reports failure for it.
const CONSECUTIVE_FAILURE_LIMIT: u32 = 4;

/// Runs the phase, then magnitude, golden-section search for one harmonic,
/// driving `evaluate(phase, magnitude)` between search steps. `evaluate`
/// performs the short constant-velocity move and DFT, returning the
/// residual vibration at this harmonic's bin (or a transient measurement
/// error, counted towards the abort-on-error limit).
pub fn calibrate_harmonic<F>(
    initial_phase: f32,
    initial_magnitude: f32,
    mut evaluate: F,
) -> Result<(f32, f32), TuningError>
where
    F: FnMut(f32, f32) -> Result<f32, TuningError>,
{
    let best_phase = golden_section_minimize(
        initial_phase - PHASE_SEARCH_WINDOW / 2.0,
        initial_phase + PHASE_SEARCH_WINDOW / 2.0,
        PHASE_SEARCH_EPSILON,
        |phase| evaluate(phase, initial_magnitude),
    )?;

    let best_magnitude = golden_section_minimize(
        (initial_magnitude - MAGNITUDE_SEARCH_WINDOW / 2.0).max(0.0),
        initial_magnitude + MAGNITUDE_SEARCH_WINDOW / 2.0,
        MAGNITUDE_SEARCH_EPSILON,
        |magnitude| evaluate(best_phase, magnitude),
    )?;

    Ok((best_magnitude, best_phase))
}

fn golden_section_minimize<F>(lo: f32, hi: f32, epsilon: f32, mut evaluate: F) -> Result<f32, TuningError>
where
    F: FnMut(f32) -> Result<f32, TuningError>,
{
    let mut search = GoldenSearchState::new(lo, hi, epsilon);
    let mut fx = 0.0;
    let mut consecutive_failures = 0u32;
    loop {
        match search.step(fx) {
            GoldenSearchStep::Converged { x, .. } => return Ok(x),
            GoldenSearchStep::Evaluate(x) => match evaluate(x) {
                Ok(value) => {
                    fx = value;
                    consecutive_failures = 0;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= CONSECUTIVE_FAILURE_LIMIT {
                        return Err(e);
                    }
                    fx = f32::MAX;
                }
            },
        }
    }
}

/// Calibrates every harmonic of one LUT direction, applying each converged
/// `(mag, pha)` pair in place, for `iterations` passes over the harmonic set.
pub fn calibrate_lut<F>(lut: &mut PhaseStepLut, iterations: u32, mut evaluate: F) -> Result<(), TuningError>
where
    F: FnMut(u32, f32, f32) -> Result<f32, TuningError>,
{
    for _ in 0..iterations {
        for (harmonic, entry) in lut.harmonics.iter_mut().enumerate() {
            let harmonic = harmonic as u32;
            let initial_magnitude = if entry.magnitude > 0.0 { entry.magnitude } else { 0.05 };
            let (magnitude, phase) = calibrate_harmonic(entry.phase, initial_magnitude, |p, m| evaluate(harmonic, p, m))?;
            entry.magnitude = magnitude;
            entry.phase = phase;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourier_series_recovers_known_sine_amplitude() {
        let frequency = 50.0;
        let true_amplitude = 3.0;
        let mut dft = FourierSeries3d::new(frequency);
        let sample_rate = 1300.0;
        let n = 1300;
        for i in 0..n {
            let t = i as f32 / sample_rate;
            let value = true_amplitude * (2.0 * PI * frequency * t).sin();
            dft.add_sample(t, [value, 0.0, 0.0]);
        }
        let magnitude = dft.magnitude();
        assert!((magnitude[0] - true_amplitude).abs() < 0.05, "got {}", magnitude[0]);
        assert!(magnitude[1] < 0.05);
    }

    #[test]
    fn vibrate_measure_rejects_bad_sample_rate() {
        let samples = vec![(0.0, AccelSample { x: 1.0, y: 0.0, z: 0.0, overflow_at_source: false, sample_overrun: false })];
        let err = vibrate_measure(50.0, 1, 1.0, 2000.0, &samples).unwrap_err();
        assert_eq!(err, TuningError::AccelSampleRateOutOfRange { measured_hz: 2000.0 });
    }

    #[test]
    fn build_excitation_rounds_amplitude_to_whole_steps() {
        let params = VibrateParams { axis: Axis::X, frequency: 40.0, acceleration: 1000.0, cycles: 2, step_len: 1.0 / 80.0 / 0.001 };
        let (actual_frequency, pulses) = build_excitation(&params);
        assert!(actual_frequency > 0.0);
        assert!(!pulses.is_empty());
    }

    #[test]
    fn golden_search_converges_on_unimodal_parabola() {
        let minimum = golden_section_minimize(-1.0, 2.0, 1e-3, |x| Ok((x - 0.5) * (x - 0.5))).unwrap();
        assert!((minimum - 0.5).abs() < 0.01, "got {}", minimum);
    }

    #[test]
    fn find_best_shaper_prefers_zv_on_pure_tone() {
        let psd = vec![PsdSample { frequency: 50.0, psd: 1.0 }];
        let fit = find_best_shaper(&psd).expect("a fit is always found");
        assert_eq!(fit.shaper_type, ShaperTypeConfig::Zv);
        assert!((fit.frequency - 50.0).abs() <= 1.0);
    }
}
