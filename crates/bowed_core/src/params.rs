//! Physical parameter set and modulation specs.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// Inclusive numeric range a field must fall in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    pub description: &'static str,
}

impl ParamRange {
    const fn new(min: f64, max: f64, description: &'static str) -> Self {
        Self {
            min,
            max,
            description,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// Fields of a [`PhysicalParameterSet`], in commit-payload order (minus the rate hint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamField {
    FundamentalFrequency,
    FirstDecayFrequency,
    FirstDecayTime,
    SecondDecayFrequency,
    SecondDecayTime,
    Beta,
    RegularisationParameter,
    StabilitySetting,
    NonlinearMode,
}

impl ParamField {
    pub const ALL: [ParamField; 9] = [
        ParamField::FundamentalFrequency,
        ParamField::FirstDecayFrequency,
        ParamField::FirstDecayTime,
        ParamField::SecondDecayFrequency,
        ParamField::SecondDecayTime,
        ParamField::Beta,
        ParamField::RegularisationParameter,
        ParamField::StabilitySetting,
        ParamField::NonlinearMode,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ParamField::FundamentalFrequency => "fundamental_frequency",
            ParamField::FirstDecayFrequency => "first_decay_frequency",
            ParamField::FirstDecayTime => "first_decay_time",
            ParamField::SecondDecayFrequency => "second_decay_frequency",
            ParamField::SecondDecayTime => "second_decay_time",
            ParamField::Beta => "beta",
            ParamField::RegularisationParameter => "regularisation_parameter",
            ParamField::StabilitySetting => "stability_setting",
            ParamField::NonlinearMode => "nonlinear_mode",
        }
    }

    pub fn range(self) -> ParamRange {
        match self {
            ParamField::FundamentalFrequency => ParamRange::new(20.0, 4000.0, "20 ..= 4000 Hz"),
            ParamField::FirstDecayFrequency => ParamRange::new(0.0, 20000.0, "0 ..= 20000 Hz"),
            ParamField::FirstDecayTime => ParamRange::new(0.01, 60.0, "0.01 ..= 60 s"),
            ParamField::SecondDecayFrequency => ParamRange::new(0.0, 20000.0, "0 ..= 20000 Hz"),
            ParamField::SecondDecayTime => ParamRange::new(0.01, 60.0, "0.01 ..= 60 s"),
            ParamField::Beta => ParamRange::new(0.0, 0.5, "0 ..= 0.5"),
            ParamField::RegularisationParameter => ParamRange::new(0.0, 10000.0, "0 ..= 10000"),
            ParamField::StabilitySetting => ParamRange::new(0.1, 1.0, "0.1 ..= 1"),
            ParamField::NonlinearMode => ParamRange::new(0.0, 3.0, "an integer 0 ..= 3"),
        }
    }
}

impl FromStr for ParamField {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParamField::ALL
            .into_iter()
            .find(|field| field.name() == s)
            .ok_or_else(|| ControlError::MalformedPayload {
                reason: format!("unknown parameter '{}'", s),
            })
    }
}

/// String nonlinearity selected by the `nonlinear_mode` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonlinearMode {
    Linear,
    KirchhoffCarrier,
    CubicGeometric,
    Geometric,
}

impl NonlinearMode {
    pub fn from_field(value: f64) -> Option<Self> {
        if value.fract() != 0.0 {
            return None;
        }
        match value as i64 {
            0 => Some(NonlinearMode::Linear),
            1 => Some(NonlinearMode::KirchhoffCarrier),
            2 => Some(NonlinearMode::CubicGeometric),
            3 => Some(NonlinearMode::Geometric),
            _ => None,
        }
    }

    pub fn as_field(self) -> f64 {
        match self {
            NonlinearMode::Linear => 0.0,
            NonlinearMode::KirchhoffCarrier => 1.0,
            NonlinearMode::CubicGeometric => 2.0,
            NonlinearMode::Geometric => 3.0,
        }
    }
}

/// Physical constants of the modeled string.
///
/// Validity is all-or-nothing: [`PhysicalParameterSet::validate`] checks every
/// field, and a set that fails is never handed to the solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalParameterSet {
    pub fundamental_frequency: f64,
    pub first_decay_frequency: f64,
    pub first_decay_time: f64,
    pub second_decay_frequency: f64,
    pub second_decay_time: f64,
    pub beta: f64,
    pub regularisation_parameter: f64,
    pub stability_setting: f64,
    pub nonlinear_mode: f64,
}

impl Default for PhysicalParameterSet {
    fn default() -> Self {
        Self {
            fundamental_frequency: 220.0,
            first_decay_frequency: 0.0,
            first_decay_time: 8.0,
            second_decay_frequency: 1000.0,
            second_decay_time: 3.0,
            beta: 2.9e-4,
            regularisation_parameter: 0.0,
            stability_setting: 0.9,
            nonlinear_mode: NonlinearMode::CubicGeometric.as_field(),
        }
    }
}

impl PhysicalParameterSet {
    pub fn get(&self, field: ParamField) -> f64 {
        match field {
            ParamField::FundamentalFrequency => self.fundamental_frequency,
            ParamField::FirstDecayFrequency => self.first_decay_frequency,
            ParamField::FirstDecayTime => self.first_decay_time,
            ParamField::SecondDecayFrequency => self.second_decay_frequency,
            ParamField::SecondDecayTime => self.second_decay_time,
            ParamField::Beta => self.beta,
            ParamField::RegularisationParameter => self.regularisation_parameter,
            ParamField::StabilitySetting => self.stability_setting,
            ParamField::NonlinearMode => self.nonlinear_mode,
        }
    }

    pub fn set(&mut self, field: ParamField, value: f64) {
        let slot = match field {
            ParamField::FundamentalFrequency => &mut self.fundamental_frequency,
            ParamField::FirstDecayFrequency => &mut self.first_decay_frequency,
            ParamField::FirstDecayTime => &mut self.first_decay_time,
            ParamField::SecondDecayFrequency => &mut self.second_decay_frequency,
            ParamField::SecondDecayTime => &mut self.second_decay_time,
            ParamField::Beta => &mut self.beta,
            ParamField::RegularisationParameter => &mut self.regularisation_parameter,
            ParamField::StabilitySetting => &mut self.stability_setting,
            ParamField::NonlinearMode => &mut self.nonlinear_mode,
        };
        *slot = value;
    }

    /// Decoded nonlinearity. Falls back to `Linear` for a set that never passed validation.
    pub fn nonlinear(&self) -> NonlinearMode {
        NonlinearMode::from_field(self.nonlinear_mode).unwrap_or(NonlinearMode::Linear)
    }

    /// Every violation, in field order, followed by cross-field violations.
    pub fn violations(&self) -> Vec<ControlError> {
        let mut errors: Vec<ControlError> = ParamField::ALL
            .into_iter()
            .filter_map(|field| check_field(field, self.get(field)).err())
            .collect();

        if self.first_decay_frequency.is_finite()
            && self.second_decay_frequency.is_finite()
            && self.second_decay_frequency <= self.first_decay_frequency
        {
            errors.push(ControlError::invalid(
                ParamField::SecondDecayFrequency.name(),
                self.second_decay_frequency,
                "greater than first_decay_frequency",
            ));
        }
        errors
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        match self.violations().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Range-check a single field value.
pub fn check_field(field: ParamField, value: f64) -> Result<(), ControlError> {
    let range = field.range();
    let in_range = match field {
        ParamField::NonlinearMode => NonlinearMode::from_field(value).is_some(),
        _ => range.contains(value),
    };
    if in_range {
        Ok(())
    } else {
        Err(ControlError::invalid(field.name(), value, range.description))
    }
}

/// Which modulated inlet a spec drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulationTarget {
    ExcitationPosition,
    LeftListeningPosition,
    RightListeningPosition,
    Vibrato,
}

impl ModulationTarget {
    pub const ALL: [ModulationTarget; 4] = [
        ModulationTarget::ExcitationPosition,
        ModulationTarget::LeftListeningPosition,
        ModulationTarget::RightListeningPosition,
        ModulationTarget::Vibrato,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ModulationTarget::ExcitationPosition => "excitation",
            ModulationTarget::LeftListeningPosition => "left",
            ModulationTarget::RightListeningPosition => "right",
            ModulationTarget::Vibrato => "vibrato",
        }
    }
}

impl FromStr for ModulationTarget {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModulationTarget::ALL
            .into_iter()
            .find(|target| target.name() == s)
            .ok_or_else(|| ControlError::MalformedPayload {
                reason: format!("unknown modulation target '{}'", s),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModulationField {
    Speed,
    Depth,
    Base,
}

impl FromStr for ModulationField {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "speed" => Ok(ModulationField::Speed),
            "depth" => Ok(ModulationField::Depth),
            "base" => Ok(ModulationField::Base),
            other => Err(ControlError::MalformedPayload {
                reason: format!("unknown modulation field '{}'", other),
            }),
        }
    }
}

/// Fastest modulation rate accepted, below Nyquist at every supported rate.
pub const MAX_MODULATION_SPEED: f32 = 1000.0;

/// Speed (Hz), depth and base of a modulation oscillator.
///
/// Depth may be negative, which inverts the waveform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModulationSpec {
    pub speed: f32,
    pub depth: f32,
    pub base: f32,
}

impl ModulationSpec {
    pub fn new(speed: f32, depth: f32, base: f32) -> Self {
        Self { speed, depth, base }
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        if !(self.speed.is_finite() && self.speed > 0.0 && self.speed <= MAX_MODULATION_SPEED) {
            return Err(ControlError::invalid(
                "speed",
                self.speed as f64,
                "> 0 and <= 1000 Hz",
            ));
        }
        if !self.depth.is_finite() {
            return Err(ControlError::invalid("depth", self.depth as f64, "a finite number"));
        }
        if !self.base.is_finite() {
            return Err(ControlError::invalid("base", self.base as f64, "a finite number"));
        }
        Ok(())
    }

    /// Copy with one field replaced.
    pub fn with_field(self, field: ModulationField, value: f32) -> Self {
        let mut spec = self;
        match field {
            ModulationField::Speed => spec.speed = value,
            ModulationField::Depth => spec.depth = value,
            ModulationField::Base => spec.base = value,
        }
        spec
    }
}
