//! Queue types between the control context, the recompute worker and the
//! audio context.
//!
//! Everything the audio context receives is a complete value; everything it
//! sends back is allocation-free to construct.

use rtrb::{Consumer, Producer, RingBuffer};

use crate::error::ControlError;
use crate::params::{ModulationSpec, ModulationTarget};

/// Discrete control changes applied by the audio context at the start of a buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineCommand {
    /// Replace the spec of one modulation oscillator. Phase is kept.
    Modulation {
        target: ModulationTarget,
        spec: ModulationSpec,
    },

    /// Stop the vibrato; the carrier passes through unmodulated.
    ClearVibrato,

    /// Vibrato carrier frequency in Hz.
    Carrier(f32),

    Bow { velocity: f32, force: f32 },

    GainDb(f32),

    /// Retune modulation first, then the solver, before the next frame.
    SampleRate(u32),
}

/// Coefficients designed by the recompute worker for one committed snapshot.
pub struct CoefficientUpdate<C> {
    pub sequence: u64,
    /// Rate the coefficients were designed for.
    pub sample_rate: u32,
    pub coefficients: Box<C>,
}

/// Reports from the audio context, logged by the control context.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineReport {
    Installed { sequence: u64, sample_rate: u32 },

    /// A finished recomputation that was superseded or designed for another rate.
    Discarded(ControlError),

    RateApplied { rate: u32 },

    /// A command the audio context could not apply; prior state is kept.
    Rejected {
        command: &'static str,
        error: ControlError,
    },
}

/// Items dropped on the control thread instead of the audio thread.
/// The payload is never read; its value is in its `Drop`.
#[allow(dead_code)]
pub enum GarbageItem<C> {
    Coefficients(Box<C>),
}

/// Capacity for the command queue (control → audio)
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Capacity for the coefficient queue (worker → audio)
pub const COEFFICIENT_QUEUE_CAPACITY: usize = 16;

/// Capacity for the report queue (audio → control)
pub const REPORT_QUEUE_CAPACITY: usize = 256;

/// Capacity for the garbage queue (audio → control).
/// Larger than the coefficient queue so a slow drain never blocks an install.
pub const GARBAGE_QUEUE_CAPACITY: usize = 64;

/// Audio-context ends of the queues.
pub struct AudioQueues<C> {
    pub commands: Consumer<EngineCommand>,
    pub coefficients: Consumer<CoefficientUpdate<C>>,
    pub reports: Producer<EngineReport>,
    pub garbage: Producer<GarbageItem<C>>,
}

/// Control-context ends of the queues.
pub struct ControlQueues<C> {
    pub commands: Producer<EngineCommand>,
    pub reports: Consumer<EngineReport>,
    pub garbage: Consumer<GarbageItem<C>>,
}

/// Create every queue. The coefficient producer belongs to the recompute worker.
pub fn create_engine_queues<C>() -> (
    ControlQueues<C>,
    AudioQueues<C>,
    Producer<CoefficientUpdate<C>>,
) {
    let (command_tx, command_rx) = RingBuffer::new(COMMAND_QUEUE_CAPACITY);
    let (coefficient_tx, coefficient_rx) = RingBuffer::new(COEFFICIENT_QUEUE_CAPACITY);
    let (report_tx, report_rx) = RingBuffer::new(REPORT_QUEUE_CAPACITY);
    let (garbage_tx, garbage_rx) = RingBuffer::new(GARBAGE_QUEUE_CAPACITY);

    (
        ControlQueues {
            commands: command_tx,
            reports: report_rx,
            garbage: garbage_rx,
        },
        AudioQueues {
            commands: command_rx,
            coefficients: coefficient_rx,
            reports: report_tx,
            garbage: garbage_tx,
        },
        coefficient_tx,
    )
}
