use crate::dsp::modulation::ModulationOscillator;
use crate::error::ControlError;
use crate::params::ModulationSpec;

/// A position along the string in `[0, 1]`, swept by an LFO.
///
/// Out-of-range oscillator values saturate at the ends of the string.
#[derive(Debug, Clone)]
pub struct PickupPositionModulator {
    oscillator: ModulationOscillator,
    current: f32,
}

impl PickupPositionModulator {
    pub fn new(spec: ModulationSpec, sample_rate: f32) -> Result<Self, ControlError> {
        let oscillator = ModulationOscillator::new(spec, sample_rate)?;
        let current = oscillator.last_output().clamp(0.0, 1.0);
        Ok(Self {
            oscillator,
            current,
        })
    }

    pub fn current_value(&self) -> f32 {
        self.current
    }

    pub fn set_spec(&mut self, spec: ModulationSpec) -> Result<(), ControlError> {
        self.oscillator.set_spec(spec)
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) -> Result<(), ControlError> {
        self.oscillator.set_sample_rate(sample_rate)
    }

    pub fn oscillator(&self) -> &ModulationOscillator {
        &self.oscillator
    }

    /// Advance one sample and return the clamped position.
    pub fn tick(&mut self) -> f32 {
        self.current = self.oscillator.next_sample().clamp(0.0, 1.0);
        self.current
    }
}
