//! Control-rate modulation sources that feed the solver's signal inlets.

mod oscillator;
mod pickup;
mod vibrato;

pub use oscillator::ModulationOscillator;
pub use pickup::PickupPositionModulator;
pub use vibrato::VibratoGenerator;
