use std::f64::consts::TAU;

use crate::error::ControlError;
use crate::params::ModulationSpec;

/// Sine LFO producing `base + depth * sin(2π * speed * t)`.
///
/// The phase is never reset: spec and sample-rate changes only change the
/// per-sample increment, so the waveform stays continuous across edits.
#[derive(Debug, Clone)]
pub struct ModulationOscillator {
    spec: ModulationSpec,
    sample_rate: f32,
    /// Fractional cycle position in `[0, 1)`.
    phase: f64,
    /// Completed cycles, so the unwrapped phase can be observed.
    cycles: u64,
    increment: f64,
    last_output: f32,
}

impl ModulationOscillator {
    pub fn new(spec: ModulationSpec, sample_rate: f32) -> Result<Self, ControlError> {
        spec.validate()?;
        check_sample_rate(sample_rate)?;
        Ok(Self {
            spec,
            sample_rate,
            phase: 0.0,
            cycles: 0,
            increment: spec.speed as f64 / sample_rate as f64,
            last_output: spec.base,
        })
    }

    pub fn spec(&self) -> ModulationSpec {
        self.spec
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Phase advance per sample, in cycles.
    pub fn increment(&self) -> f64 {
        self.increment
    }

    /// Unwrapped phase in cycles; monotonically increasing.
    pub fn phase_position(&self) -> f64 {
        self.cycles as f64 + self.phase
    }

    pub fn last_output(&self) -> f32 {
        self.last_output
    }

    /// Replace the spec. Takes effect on the next produced sample.
    ///
    /// An invalid spec is rejected and the previous one keeps running.
    pub fn set_spec(&mut self, spec: ModulationSpec) -> Result<(), ControlError> {
        spec.validate()?;
        self.spec = spec;
        self.increment = spec.speed as f64 / self.sample_rate as f64;
        Ok(())
    }

    /// Rescale the phase increment for a new sample rate without touching the phase.
    pub fn set_sample_rate(&mut self, sample_rate: f32) -> Result<(), ControlError> {
        check_sample_rate(sample_rate)?;
        self.sample_rate = sample_rate;
        self.increment = self.spec.speed as f64 / sample_rate as f64;
        Ok(())
    }

    /// Produce the next sample and advance the phase.
    pub fn next_sample(&mut self) -> f32 {
        let value = self.spec.base as f64 + self.spec.depth as f64 * (TAU * self.phase).sin();
        self.advance();
        if value.is_finite() {
            self.last_output = value as f32;
        }
        self.last_output
    }

    /// Constant time whatever the increment.
    fn advance(&mut self) {
        let next = self.phase + self.increment;
        let whole = next.floor();
        self.cycles = self.cycles.saturating_add(whole as u64);
        self.phase = next - whole;
    }
}

impl Iterator for ModulationOscillator {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        Some(self.next_sample())
    }
}

fn check_sample_rate(sample_rate: f32) -> Result<(), ControlError> {
    if sample_rate.is_finite() && sample_rate > 0.0 {
        Ok(())
    } else {
        Err(ControlError::invalid("sample_rate", sample_rate as f64, "> 0 Hz"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 48000.0;

    fn osc(speed: f32, depth: f32, base: f32) -> ModulationOscillator {
        ModulationOscillator::new(ModulationSpec::new(speed, depth, base), SAMPLE_RATE)
            .expect("valid spec")
    }

    #[test]
    fn test_first_sample_is_base() {
        let mut lfo = osc(1.0, 0.5, 0.25);
        assert!((lfo.next_sample() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_quarter_period_reaches_peak() {
        let mut lfo = osc(1.0, 0.5, 0.0);
        let quarter = (SAMPLE_RATE / 4.0) as usize;
        let samples: Vec<f32> = lfo.by_ref().take(quarter + 1).collect();
        assert!((samples[quarter] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_speed_zero_rejected_and_previous_spec_kept() {
        let mut lfo = osc(2.0, 0.1, 0.5);
        let err = lfo.set_spec(ModulationSpec::new(0.0, 0.1, 0.5)).unwrap_err();
        assert!(matches!(err, ControlError::InvalidParameter { parameter: "speed", .. }));
        assert_eq!(lfo.spec().speed, 2.0);
    }

    #[test]
    fn test_new_rejects_bad_sample_rate() {
        let result = ModulationOscillator::new(ModulationSpec::new(1.0, 0.1, 0.0), 0.0);
        assert!(result.is_err());
    }

    #[test]
    fn test_set_sample_rate_rejects_non_positive() {
        let mut lfo = osc(1.0, 0.1, 0.0);
        assert!(lfo.set_sample_rate(-44100.0).is_err());
        assert_eq!(lfo.sample_rate(), SAMPLE_RATE);
    }

    #[test]
    fn test_negative_depth_inverts_waveform() {
        let mut up = osc(3.0, 0.2, 0.0);
        let mut down = osc(3.0, -0.2, 0.0);
        for _ in 0..5000 {
            let a = up.next_sample();
            let b = down.next_sample();
            assert!((a + b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rate_change_rescales_increment_keeps_phase() {
        let mut lfo = osc(5.0, 1.0, 0.0);
        for _ in 0..1234 {
            lfo.next_sample();
        }
        let before = lfo.phase_position();
        lfo.set_sample_rate(96000.0).expect("valid rate");
        assert_eq!(lfo.phase_position(), before);
        assert!((lfo.increment() - 5.0 / 96000.0).abs() < 1e-12);
    }

    #[test]
    fn test_huge_increment_advances_in_constant_time() {
        // A tiny sample rate makes the per-sample increment about 1e20 cycles.
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let mut lfo =
                ModulationOscillator::new(ModulationSpec::new(1000.0, 0.1, 0.5), 1.0e-17)
                    .expect("valid spec");
            for _ in 0..1000 {
                lfo.next_sample();
            }
            let _ = done_tx.send((lfo.phase_position(), lfo.last_output()));
        });
        let (position, output) = done_rx
            .recv_timeout(std::time::Duration::from_secs(2))
            .expect("oscillator stalled on a huge increment");
        assert!(position > 0.0);
        assert!(output.is_finite());
    }

    #[test]
    fn test_speed_above_limit_rejected() {
        let mut lfo = osc(2.0, 0.1, 0.5);
        let err = lfo.set_spec(ModulationSpec::new(1.0e20, 0.1, 0.5)).unwrap_err();
        assert!(matches!(err, ControlError::InvalidParameter { parameter: "speed", .. }));
        assert!(lfo.set_spec(ModulationSpec::new(1000.0, 0.1, 0.5)).is_ok());
        assert!(lfo.set_spec(ModulationSpec::new(1000.5, 0.1, 0.5)).is_err());
        assert_eq!(lfo.spec().speed, 1000.0);
    }
}
