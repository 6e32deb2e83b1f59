use crate::dsp::modulation::ModulationOscillator;
use crate::dsp::utils::cents_to_ratio;
use crate::error::ControlError;
use crate::params::ModulationSpec;

/// Pitch vibrato applied multiplicatively to a fixed carrier frequency.
///
/// The oscillator output is a deviation in cents. Without a spec the
/// generator passes the carrier through unmodulated.
#[derive(Debug, Clone)]
pub struct VibratoGenerator {
    carrier: f32,
    sample_rate: f32,
    oscillator: Option<ModulationOscillator>,
    current: f32,
}

impl VibratoGenerator {
    pub fn new(
        carrier: f32,
        spec: Option<ModulationSpec>,
        sample_rate: f32,
    ) -> Result<Self, ControlError> {
        check_carrier(carrier)?;
        let oscillator = spec
            .map(|spec| ModulationOscillator::new(spec, sample_rate))
            .transpose()?;
        Ok(Self {
            carrier,
            sample_rate,
            oscillator,
            current: carrier,
        })
    }

    pub fn carrier(&self) -> f32 {
        self.carrier
    }

    /// Modulated excitation frequency of the last tick.
    pub fn current_value(&self) -> f32 {
        self.current
    }

    pub fn spec(&self) -> Option<ModulationSpec> {
        self.oscillator.as_ref().map(|o| o.spec())
    }

    pub fn set_carrier(&mut self, carrier: f32) -> Result<(), ControlError> {
        check_carrier(carrier)?;
        self.carrier = carrier;
        Ok(())
    }

    /// Set or replace the vibrato spec, keeping the running phase when one exists.
    pub fn set_spec(&mut self, spec: ModulationSpec) -> Result<(), ControlError> {
        match self.oscillator.as_mut() {
            Some(oscillator) => oscillator.set_spec(spec),
            None => {
                self.oscillator = Some(ModulationOscillator::new(spec, self.sample_rate)?);
                Ok(())
            }
        }
    }

    /// Stop modulating; the carrier passes through.
    pub fn clear(&mut self) {
        self.oscillator = None;
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) -> Result<(), ControlError> {
        if let Some(oscillator) = self.oscillator.as_mut() {
            oscillator.set_sample_rate(sample_rate)?;
        } else if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(ControlError::invalid("sample_rate", sample_rate as f64, "> 0 Hz"));
        }
        self.sample_rate = sample_rate;
        Ok(())
    }

    pub fn oscillator(&self) -> Option<&ModulationOscillator> {
        self.oscillator.as_ref()
    }

    /// Advance one sample and return the modulated frequency in Hz.
    pub fn tick(&mut self) -> f32 {
        let cents = match self.oscillator.as_mut() {
            Some(oscillator) => oscillator.next_sample(),
            None => 0.0,
        };
        self.current = self.carrier * cents_to_ratio(cents);
        self.current
    }
}

fn check_carrier(carrier: f32) -> Result<(), ControlError> {
    if carrier.is_finite() && carrier > 0.0 {
        Ok(())
    } else {
        Err(ControlError::invalid("carrier", carrier as f64, "> 0 Hz"))
    }
}
