//! Bowed string synthesizer core library
//!
//! Parameter commit and modulation routing for a physically modelled bowed
//! string. This crate is a pure library with no device I/O; the host binary
//! owns the audio device and the user-facing console.

pub mod commands;
pub mod commit;
pub mod config;
pub mod control;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod output;
pub mod params;
pub mod rate;
pub mod recompute;
pub mod snapshot;
pub mod solver;

// Re-export commonly used items
pub use commit::{CommitOutcome, CommitState, ParameterCommitController};
pub use config::EngineSettings;
pub use control::{ControlSurface, PollSummary, connect};
pub use engine::Engine;
pub use error::ControlError;
pub use params::{
    ModulationField, ModulationSpec, ModulationTarget, NonlinearMode, ParamField,
    PhysicalParameterSet,
};
pub use rate::{AudioDevice, SUPPORTED_SAMPLE_RATES, SampleRateCoordinator};
pub use snapshot::{CommitSnapshot, encode_payload, parse_payload};
pub use solver::modal::ModalString;
pub use solver::{SolverInlets, StereoFrame, StringSolver};
