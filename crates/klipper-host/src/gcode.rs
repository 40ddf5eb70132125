//! G-code Parser and Dispatcher
//!
//! This module provides a parser for G-code commands and a central dispatcher
//! that receives commands from a channel and acts on them, updating the printer
//! state and sending instructions to the MCU.
//!
//! Beyond motion G0/G1/G28/M112, the dispatcher recognizes the motion-tuning
//! subset: M74 (bed-mass hint), M572/M900 (pressure advance), M593
//! (input shaper), M958/M959 (vibration probe / auto-fit sweep) and
//! M970-975 (phase-stepping enable/LUT/calibration). These mutate
//! `PrinterConfig::tuning` and persist it via `save_tuning` on request.

use crate::{
    config::{Axis, PrinterConfig, ShaperTypeConfig},
    kinematics::{CartesianKinematics, Kinematics},
    state::{Position, PrinterState},
    tuning,
};
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{info, warn};

/// A command to be sent to the MCU.
#[derive(Debug)]
pub enum McuCommand {
    Move(Vec<crate::kinematics::Step>),
    Home,
    EmergencyStop,
    GetTemp,
    /// A precomputed excitation pulse train for a vibration probe, injected
    /// directly into the step queue rather than going through the move
    /// builder. Carries the axis so the MCU can route it to the right
    /// step/dir pins.
    Vibrate { axis: String, pulses: Vec<tuning::StepPulse> },
}

/// Represents a single parsed G-code command.
#[derive(Debug, PartialEq, Clone)]
pub struct GCode {
    pub command: String,
    pub params: Vec<(char, f32)>,
    /// Whitespace-delimited tokens that aren't a `<letter><number>` pair,
    /// preserved verbatim. Used by M973's CSV LUT argument.
    pub raw_tokens: Vec<String>,
}

/// G-code parser that handles commands, parameters, and comments.
pub fn parse_gcode(line: &str) -> Option<GCode> {
    let clean_line = line.split(';').next().unwrap_or("").trim();
    if clean_line.is_empty() {
        return None;
    }

    let mut parts = clean_line.split_whitespace();
    let command = parts.next()?.to_uppercase();
    let mut params = Vec::new();
    let mut raw_tokens = Vec::new();

    for part in parts {
        let mut chars = part.chars();
        if let Some(key) = chars.next() {
            let rest: String = chars.collect();
            if rest.is_empty() {
                // A bare flag letter, e.g. the `X`/`W` in `M593 X F40 D0.1 W`.
                params.push((key.to_ascii_uppercase(), 1.0));
            } else if let Ok(value) = rest.parse::<f32>() {
                params.push((key.to_ascii_uppercase(), value));
            } else {
                raw_tokens.push(part.to_string());
            }
        }
    }

    Some(GCode { command, params, raw_tokens })
}

/// The central dispatcher for processing G-code commands.
pub struct GCodeDispatcher {
    config: Arc<Mutex<PrinterConfig>>,
    state: Arc<Mutex<PrinterState>>,
    mcu_tx: Sender<McuCommand>,
    kinematics: Box<dyn Kinematics + Send>,
}

impl GCodeDispatcher {
    /// Creates a new `GCodeDispatcher`.
    pub fn new(
        config: Arc<Mutex<PrinterConfig>>,
        state: Arc<Mutex<PrinterState>>,
        mcu_tx: Sender<McuCommand>,
    ) -> Self {
        // In a real application, you would select the kinematics based on the config.
        let kinematics = {
            let cfg = config.lock();
            Box::new(CartesianKinematics {
                steps_per_mm_x: cfg.stepper_x.steps_per_mm,
                steps_per_mm_y: cfg.stepper_y.steps_per_mm,
                steps_per_mm_z: cfg.stepper_z.steps_per_mm,
            })
        };
        Self {
            config,
            state,
            mcu_tx,
            kinematics,
        }
    }

    /// The main run loop that listens for and processes G-code commands.
    pub async fn run(&mut self, mut gcode_rx: Receiver<GCode>) {
        info!("G-code dispatcher is running.");
        while let Some(gcode) = gcode_rx.recv().await {
            info!("Dispatching G-code: {:?}", gcode);
            if let Err(e) = self.dispatch(gcode).await {
                warn!("Error dispatching G-code: {}", e);
            }
        }
    }

    /// Routes a G-code command to the appropriate handler.
    async fn dispatch(&mut self, gcode: GCode) -> Result<()> {
        match gcode.command.as_str() {
            "G0" | "G1" => self.handle_g0_g1(gcode).await?,
            "G28" => self.handle_g28().await?,
            "M112" => self.handle_m112().await?,
            "M74" => self.handle_m74(gcode).await?,
            "M572" => self.handle_m572(gcode).await?,
            "M593" => self.handle_m593(gcode).await?,
            "M900" => self.handle_m900(gcode).await?,
            "M958" => self.handle_m958(gcode).await?,
            "M959" => self.handle_m959(gcode).await?,
            "M970" | "M971" | "M972" | "M973" | "M974" | "M975" => {
                self.handle_phase_step_command(&gcode.command, gcode).await?
            }
            _ => warn!("Unknown G-code command: {}", gcode.command),
        }
        Ok(())
    }

    /// Handles G0/G1 (Linear Move) commands.
    async fn handle_g0_g1(&mut self, gcode: GCode) -> Result<()> {
        let mut current_pos = self.state.lock().position.clone();
        let mut new_pos = current_pos.clone();

        for (param, value) in gcode.params {
            match param {
                'X' => new_pos.x = value,
                'Y' => new_pos.y = value,
                'Z' => new_pos.z = value,
                'E' => new_pos.e = value,
                'F' => { /* TODO: Handle feedrate */ }
                _ => {}
            }
        }

        let steps = self.kinematics.calculate_move(&current_pos, &new_pos);
        if !steps.is_empty() {
            self.mcu_tx.send(McuCommand::Move(steps)).await?;
            // In a real system, you'd wait for an "ok" from the MCU before updating state.
            self.state.lock().position = new_pos;
        }

        Ok(())
    }

    /// Handles G28 (Auto Home) commands.
    async fn handle_g28(&mut self) -> Result<()> {
        info!("Homing axes...");
        self.mcu_tx.send(McuCommand::Home).await?;
        // The MCU would eventually report back that homing is complete,
        // which would then update the state.
        self.state.lock().position = Position::default();
        info!("Homing complete. Position reset.");
        Ok(())
    }

    /// Handles M112 (Emergency Stop) commands.
    async fn handle_m112(&mut self) -> Result<()> {
        warn!("Emergency stop requested!");
        self.mcu_tx.send(McuCommand::EmergencyStop).await?;
        self.state.lock().status = crate::state::PrinterStatus::Error;
        self.state.lock().status_message = "Emergency Stop".to_string();
        Ok(())
    }

    fn param(gcode: &GCode, key: char) -> Option<f32> {
        gcode.params.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    fn axis_flag(gcode: &GCode, key: char) -> bool {
        gcode.params.iter().any(|(k, _)| *k == key)
    }

    /// M74 W<g>: sets the bed-mass hint. The weight-adjusted frequency is
    /// not cached here -- `effective_frequency` recomputes it from this hint
    /// plus the persisted axis config on every read, independent of whether
    /// M74 or M593 ran most recently.
    async fn handle_m74(&mut self, gcode: GCode) -> Result<()> {
        let Some(grams) = Self::param(&gcode, 'W') else {
            warn!("error: M74 missing W");
            return Ok(());
        };
        {
            let mut config = self.config.lock();
            config.tuning.bed_mass_grams = Some(grams);
            let effective = config.tuning.effective_frequency(Axis::Y);
            info!("bed mass set to {}g, effective Y shaper frequency now {}", grams, effective);
        }
        self.config.lock().save_tuning()?;
        Ok(())
    }

    /// M572 [S][W]: get/set pressure advance. No args prints the current
    /// `(advance, smooth_time)` pair.
    async fn handle_m572(&mut self, gcode: GCode) -> Result<()> {
        if gcode.params.is_empty() {
            let config = self.config.lock();
            let pa = config.tuning.pressure_advance;
            info!("pressure_advance S{} W{}", pa.advance, pa.smooth_time);
            return Ok(());
        }

        if let Some(s) = Self::param(&gcode, 'S') {
            if !(0.0..=10.0).contains(&s) {
                warn!("error: M572 S{} out of range [0, 10]", s);
                return Ok(());
            }
        }
        if let Some(w) = Self::param(&gcode, 'W') {
            if !(0.0..=0.2).contains(&w) {
                warn!("error: M572 W{} out of range [0, 0.2]", w);
                return Ok(());
            }
        }

        // A full implementation would also require the motion core to be
        // synchronized (queues drained, not mid-abort) before applying a
        // changed config; this host model has no queue-draining state to
        // consult and applies the change immediately.
        {
            let mut config = self.config.lock();
            if let Some(s) = Self::param(&gcode, 'S') {
                config.tuning.pressure_advance.advance = s;
            }
            if let Some(w) = Self::param(&gcode, 'W') {
                config.tuning.pressure_advance.smooth_time = w;
            }
        }
        self.config.lock().save_tuning()?;
        info!("pressure advance updated");
        Ok(())
    }

    /// M593 [X][Y][Z][D][F][T][R][A][M][W]: input-shaper config. Omitting
    /// axis selectors applies to all three axes; omitting every parameter
    /// prints the current per-axis state instead.
    async fn handle_m593(&mut self, gcode: GCode) -> Result<()> {
        if gcode.params.is_empty() {
            let config = self.config.lock();
            for axis in [Axis::X, Axis::Y, Axis::Z] {
                let cfg = config.tuning.shaper_axis(axis);
                info!(
                    "shaper {}: F{} D{} T{} R{}",
                    axis.as_str().to_uppercase(),
                    cfg.frequency,
                    cfg.damping,
                    cfg.shaper_type.code(),
                    cfg.vibration_reduction
                );
            }
            return Ok(());
        }

        let mut axes = Vec::new();
        if Self::axis_flag(&gcode, 'X') {
            axes.push(Axis::X);
        }
        if Self::axis_flag(&gcode, 'Y') {
            axes.push(Axis::Y);
        }
        if Self::axis_flag(&gcode, 'Z') {
            axes.push(Axis::Z);
        }
        if axes.is_empty() {
            axes = vec![Axis::X, Axis::Y, Axis::Z];
        }

        let mut config = self.config.lock();
        let (freq_min, freq_max) = config.shaper_frequency_range();

        if let Some(d) = Self::param(&gcode, 'D') {
            if !(0.0..=1.0).contains(&d) {
                warn!("error: M593 D{} out of range [0, 1]", d);
                return Ok(());
            }
        }
        if let Some(t) = Self::param(&gcode, 'T') {
            if ShaperTypeConfig::from_code(t as u32).is_none() {
                warn!("error: M593 T{} out of range [0, 5]", t);
                return Ok(());
            }
        }

        for axis in &axes {
            let cfg = config.tuning.shaper_axis_mut(*axis);
            if let Some(d) = Self::param(&gcode, 'D') {
                cfg.damping = d;
            }
            if let Some(t) = Self::param(&gcode, 'T') {
                if let Some(shaper_type) = ShaperTypeConfig::from_code(t as u32) {
                    cfg.shaper_type = shaper_type;
                }
            }
            if let Some(r) = Self::param(&gcode, 'R') {
                cfg.vibration_reduction = r;
            }
            if let Some(f) = Self::param(&gcode, 'F') {
                if f == 0.0 {
                    cfg.enabled = false;
                } else {
                    let clamped = f.clamp(freq_min, freq_max);
                    if clamped != f {
                        warn!("warning: M593 F clamped {} -> {}", f, clamped);
                    }
                    cfg.frequency = clamped;
                    cfg.enabled = true;
                }
            }
            if let Some(a) = Self::param(&gcode, 'A') {
                cfg.weight_adjust.frequency_delta = a;
            }
            if let Some(m) = Self::param(&gcode, 'M') {
                if m == 0.0 {
                    cfg.weight_adjust.enabled = false;
                } else {
                    cfg.weight_adjust.mass_limit = m;
                    cfg.weight_adjust.enabled = true;
                }
            }
        }

        let persist = Self::axis_flag(&gcode, 'W');
        drop(config);
        if persist {
            self.config.lock().save_tuning()?;
        }
        info!("shaper config updated for {:?}", axes);
        Ok(())
    }

    /// M900 K<k>: legacy linear-advance alias, routed to M572 S<k>.
    async fn handle_m900(&mut self, gcode: GCode) -> Result<()> {
        let Some(k) = Self::param(&gcode, 'K') else {
            warn!("error: M900 missing K");
            return Ok(());
        };
        let synthetic = GCode { command: "M572".to_string(), params: vec![('S', k)], raw_tokens: Vec::new() };
        self.handle_m572(synthetic).await
    }

    fn axis_from_flags(gcode: &GCode) -> Option<Axis> {
        if Self::axis_flag(gcode, 'X') {
            Some(Axis::X)
        } else if Self::axis_flag(gcode, 'Y') {
            Some(Axis::Y)
        } else if Self::axis_flag(gcode, 'Z') {
            Some(Axis::Z)
        } else {
            None
        }
    }

    /// M958 X|Y|Z F<Hz> A<accel> N<cycles> [C][K][I]: single-frequency
    /// excitation probe. Builds the excitation pulse train and forwards it
    /// to the MCU; the accelerometer FIFO capture that would feed
    /// `tuning::vibrate_measure` rides back over the same read path the MCU
    /// client leaves as a placeholder (see `mcu_client::mcu_comm_loop`), so
    /// this handler queues the excitation without waiting for a result.
    async fn handle_m958(&mut self, gcode: GCode) -> Result<()> {
        let Some(axis) = Self::axis_from_flags(&gcode) else {
            warn!("error: M958 missing axis selector");
            return Ok(());
        };
        let (Some(frequency), Some(acceleration)) = (Self::param(&gcode, 'F'), Self::param(&gcode, 'A')) else {
            warn!("error: M958 missing F or A");
            return Ok(());
        };
        let cycles = Self::param(&gcode, 'N').unwrap_or(1.0).max(1.0) as u32;

        let step_len = {
            let config = self.config.lock();
            let steps_per_mm = match axis {
                Axis::X => config.stepper_x.steps_per_mm,
                Axis::Y => config.stepper_y.steps_per_mm,
                Axis::Z => config.stepper_z.steps_per_mm,
            };
            1.0 / steps_per_mm / 1000.0
        };

        let params = tuning::VibrateParams { axis, frequency, acceleration, cycles, step_len };
        let (actual_frequency, pulses) = tuning::build_excitation(&params);
        info!(
            "M958 probe axis={} requested_f={} actual_f={} pulses={}",
            axis.as_str(),
            frequency,
            actual_frequency,
            pulses.len()
        );
        self.mcu_tx.send(McuCommand::Vibrate { axis: axis.as_str().to_string(), pulses }).await?;
        Ok(())
    }

    /// M959 X|Y|Z F<start> G<end> H<step> A<accel> N<cycles> D [W] [I]:
    /// sweeps a frequency range, queuing one excitation probe per step.
    /// Auto-fit selection (`find_best_shaper`) runs once a PSD table is
    /// available from the accelerometer capture, which this host model does
    /// not yet ingest -- see `handle_m958`'s note on the read-side placeholder.
    async fn handle_m959(&mut self, gcode: GCode) -> Result<()> {
        let Some(axis) = Self::axis_from_flags(&gcode) else {
            warn!("error: M959 missing axis selector");
            return Ok(());
        };
        let (Some(start), Some(end), Some(step), Some(acceleration)) = (
            Self::param(&gcode, 'F'),
            Self::param(&gcode, 'G'),
            Self::param(&gcode, 'H'),
            Self::param(&gcode, 'A'),
        ) else {
            warn!("error: M959 missing F, G, H or A");
            return Ok(());
        };
        if step <= 0.0 || end < start {
            warn!("error: M959 invalid sweep range [{}, {}] step {}", start, end, step);
            return Ok(());
        }
        let cycles = Self::param(&gcode, 'N').unwrap_or(1.0).max(1.0) as u32;

        let step_len = {
            let config = self.config.lock();
            let steps_per_mm = match axis {
                Axis::X => config.stepper_x.steps_per_mm,
                Axis::Y => config.stepper_y.steps_per_mm,
                Axis::Z => config.stepper_z.steps_per_mm,
            };
            1.0 / steps_per_mm / 1000.0
        };

        let mut frequency = start;
        let mut probes = 0;
        while frequency <= end {
            let params = tuning::VibrateParams { axis, frequency, acceleration, cycles, step_len };
            let (actual_frequency, pulses) = tuning::build_excitation(&params);
            self.mcu_tx
                .send(McuCommand::Vibrate { axis: axis.as_str().to_string(), pulses })
                .await?;
            info!("M959 sweep step f={} actual_f={}", frequency, actual_frequency);
            probes += 1;
            frequency += step;
        }
        info!("M959 sweep queued {} probes for {}", probes, axis.as_str());
        Ok(())
    }

    /// M970..M975: phase-stepping enable/disable/get-LUT/set-LUT/measure/probe.
    /// `F`/`R` select the forward/backward LUT direction (defaulting to both
    /// when neither is given); `X`/`Y` select the axis (both when neither is
    /// given, per the table's axis-flags convention).
    async fn handle_phase_step_command(&mut self, command: &str, gcode: GCode) -> Result<()> {
        let mut axes = Vec::new();
        if Self::axis_flag(&gcode, 'X') {
            axes.push(Axis::X);
        }
        if Self::axis_flag(&gcode, 'Y') {
            axes.push(Axis::Y);
        }
        if axes.is_empty() {
            axes = vec![Axis::X, Axis::Y];
        }

        match command {
            "M970" => {
                let mut config = self.config.lock();
                for axis in &axes {
                    config.tuning.phase_axis_mut(*axis).enabled = true;
                }
                drop(config);
                self.config.lock().save_tuning()?;
                info!("phase stepping enabled for {:?}", axes);
            }
            "M971" => {
                let mut config = self.config.lock();
                for axis in &axes {
                    config.tuning.phase_axis_mut(*axis).enabled = false;
                }
                drop(config);
                self.config.lock().save_tuning()?;
                info!("phase stepping disabled for {:?}", axes);
            }
            "M972" => {
                let config = self.config.lock();
                let want_forward = Self::axis_flag(&gcode, 'F');
                let want_backward = Self::axis_flag(&gcode, 'R');
                for axis in &axes {
                    let phase = config.tuning.phase_axis(*axis);
                    if want_forward || !want_backward {
                        info!("phase LUT {}/fwd: {:?}", axis.as_str(), phase.forward.harmonics);
                    }
                    if want_backward || !want_forward {
                        info!("phase LUT {}/bck: {:?}", axis.as_str(), phase.backward.harmonics);
                    }
                }
            }
            "M973" => {
                self.handle_m973_set_lut(&gcode, &axes)?;
            }
            "M974" => {
                warn!(
                    "M974 resonance measurement for {:?} requires an accelerometer capture \
                     this host model does not yet ingest; queued nothing",
                    axes
                );
            }
            "M975" => {
                warn!(
                    "M975 accelerometer sample-rate probe requires a live FIFO capture \
                     this host model does not yet ingest; queued nothing"
                );
            }
            _ => unreachable!("dispatch only routes M970..M975 here"),
        }
        Ok(())
    }

    /// M973: sets a phase-stepping LUT direction from a CSV string argument,
    /// e.g. `M973 X F S0.05,0.1,0.04,0.2,...` where the `S` token carries
    /// `mag,pha` pairs flattened in harmonic order.
    fn handle_m973_set_lut(&mut self, gcode: &GCode, axes: &[Axis]) -> Result<()> {
        let Some(csv_token) = gcode.raw_tokens.iter().find(|t| t.starts_with('S')) else {
            warn!("error: M973 missing S<csv> argument");
            return Ok(());
        };
        let values: Option<Vec<f32>> = csv_token[1..].split(',').map(|v| v.trim().parse::<f32>().ok()).collect();
        let Some(values) = values else {
            warn!("error: M973 malformed CSV in {}", csv_token);
            return Ok(());
        };
        if values.len() % 2 != 0 {
            warn!("error: M973 odd number of CSV values, expected mag,pha pairs");
            return Ok(());
        }

        let forward = Self::axis_flag(gcode, 'F');
        let backward = Self::axis_flag(gcode, 'R');
        let harmonics: Vec<crate::config::HarmonicEntry> = values
            .chunks(2)
            .map(|pair| crate::config::HarmonicEntry { magnitude: pair[0], phase: pair[1] })
            .collect();

        let mut config = self.config.lock();
        for axis in axes {
            let phase = config.tuning.phase_axis_mut(*axis);
            if forward || !backward {
                phase.forward.harmonics = harmonics.clone();
            }
            if backward || !forward {
                phase.backward.harmonics = harmonics.clone();
            }
        }
        drop(config);
        self.config.lock().save_tuning()?;
        info!("phase LUT updated for {:?} from CSV", axes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_gcode_handles_bare_flags_and_numeric_params() {
        let gcode = parse_gcode("M593 X F40 D0.1 W").unwrap();
        assert_eq!(gcode.command, "M593");
        assert!(gcode.params.contains(&('X', 1.0)));
        assert!(gcode.params.contains(&('F', 40.0)));
        assert!(gcode.params.contains(&('D', 0.1)));
        assert!(gcode.params.contains(&('W', 1.0)));
    }

    #[test]
    fn parse_gcode_preserves_unparseable_tokens_as_raw() {
        let gcode = parse_gcode("M973 X F S0.05,0.1,0.04,0.2").unwrap();
        assert!(gcode.raw_tokens.iter().any(|t| t.starts_with("S0.05")));
    }

    #[test]
    fn parse_gcode_skips_comments_and_blank_lines() {
        assert!(parse_gcode("; just a comment").is_none());
        assert!(parse_gcode("   ").is_none());
        let gcode = parse_gcode("G1 X10 Y20 ; move").unwrap();
        assert_eq!(gcode.command, "G1");
        assert_eq!(gcode.params, vec![('X', 10.0), ('Y', 20.0)]);
    }
}
