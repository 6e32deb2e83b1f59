pub mod modulation;
pub mod utils;
