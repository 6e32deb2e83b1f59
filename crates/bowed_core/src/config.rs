//! Startup settings for an engine and its control surface.

use serde::{Deserialize, Serialize};

use crate::error::ControlError;
use crate::output::check_gain_db;
use crate::params::{ModulationSpec, PhysicalParameterSet};
use crate::rate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Committed once at patch load.
    pub params: PhysicalParameterSet,
    pub excitation: ModulationSpec,
    pub left_pickup: ModulationSpec,
    pub right_pickup: ModulationSpec,
    pub vibrato: Option<ModulationSpec>,
    /// Hz
    pub carrier: f32,
    pub bow_velocity: f32,
    pub normal_force: f32,
    pub gain_db: f32,
    pub sample_rate: u32,
    /// Frames buffered between monitor drains.
    pub monitor_capacity: usize,
    /// Frames of history kept by the monitor reader.
    pub monitor_history: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            params: PhysicalParameterSet::default(),
            excitation: ModulationSpec::new(0.1, 0.02, 0.13),
            left_pickup: ModulationSpec::new(0.23, 0.1, 0.3),
            right_pickup: ModulationSpec::new(0.31, 0.1, 0.7),
            vibrato: Some(ModulationSpec::new(5.5, 12.0, 0.0)),
            carrier: 220.0,
            bow_velocity: 0.2,
            normal_force: 1.0,
            gain_db: -6.0,
            sample_rate: 48000,
            monitor_capacity: 8192,
            monitor_history: 2048,
        }
    }
}

impl EngineSettings {
    /// Check everything the engine needs before it starts. The parameter set
    /// is validated separately by the patch-load commit.
    pub fn validate(&self) -> Result<(), ControlError> {
        if !rate::is_supported(self.sample_rate) {
            return Err(ControlError::UnsupportedRate {
                rate: self.sample_rate,
            });
        }
        self.excitation.validate()?;
        self.left_pickup.validate()?;
        self.right_pickup.validate()?;
        if let Some(vibrato) = &self.vibrato {
            vibrato.validate()?;
        }
        check_gain_db(self.gain_db)?;
        check_bow(self.bow_velocity, self.normal_force)?;
        if !(self.carrier.is_finite() && self.carrier > 0.0) {
            return Err(ControlError::invalid("carrier", self.carrier as f64, "> 0 Hz"));
        }
        Ok(())
    }
}

pub fn check_bow(velocity: f32, force: f32) -> Result<(), ControlError> {
    if !velocity.is_finite() {
        return Err(ControlError::invalid(
            "bow_velocity",
            velocity as f64,
            "a finite number",
        ));
    }
    if !(force.is_finite() && force >= 0.0) {
        return Err(ControlError::invalid("normal_force", force as f64, ">= 0"));
    }
    Ok(())
}
