//! Contract between the control layer and a string solver.
//!
//! A solver is split into a slow `design` step, which turns a committed
//! parameter set into coefficients off the audio thread, and a per-sample
//! `process` step that only ever reads fully formed coefficients.

pub mod modal;

use crate::snapshot::CommitSnapshot;

/// Per-sample signal inlets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverInlets {
    pub excitation_velocity: f32,
    pub normal_force: f32,
    /// Bow position along the string, `[0, 1]`.
    pub excitation_position: f32,
    pub left_position: f32,
    pub right_position: f32,
    /// Modulated excitation frequency in Hz.
    pub excitation_frequency: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StereoFrame {
    pub left: f32,
    pub right: f32,
}

pub trait StringSolver: Send + 'static {
    type Coefficients: Send + 'static;

    /// Coefficient recomputation for a committed snapshot at its sample rate.
    /// May allocate and take longer than an audio period.
    fn design(snapshot: &CommitSnapshot) -> Self::Coefficients;

    /// Swap in new coefficients, handing back the replaced ones so the caller
    /// can drop them elsewhere. Must not allocate.
    fn install(
        &mut self,
        coefficients: Box<Self::Coefficients>,
    ) -> Option<Box<Self::Coefficients>>;

    /// Retune timestep-dependent state. Must not allocate.
    fn set_sample_rate(&mut self, sample_rate: f32);

    fn sample_rate(&self) -> f32;

    fn process(&mut self, inlets: &SolverInlets) -> StereoFrame;
}
