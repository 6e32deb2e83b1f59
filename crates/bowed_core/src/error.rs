//! Error kinds shared by the control and audio contexts.
//!
//! The variants the audio context can raise carry only `Copy` data, so they can
//! be pushed through a lock-free queue without allocating.

/// Errors raised while editing, committing, or reconfiguring the synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlError {
    /// A draft field or oscillator spec is out of its declared range.
    InvalidParameter {
        parameter: &'static str,
        value: f64,
        expected: &'static str,
    },

    /// A sample rate outside the supported set was requested or reported.
    UnsupportedRate { rate: u32 },

    /// A recomputation is already outstanding; the request was queued behind it.
    CommitInFlight { sequence: u64 },

    /// A finished recomputation was superseded by a newer installed sequence.
    StaleCommitDiscarded { sequence: u64, installed: u64 },

    /// A commit payload could not be parsed.
    MalformedPayload { reason: String },

    /// The audio device refused a reconfiguration.
    Device { message: String },

    /// A cross-context queue was closed or full.
    Disconnected { channel: &'static str },
}

impl ControlError {
    pub(crate) fn invalid(parameter: &'static str, value: f64, expected: &'static str) -> Self {
        ControlError::InvalidParameter {
            parameter,
            value,
            expected,
        }
    }
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlError::InvalidParameter {
                parameter,
                value,
                expected,
            } => {
                write!(f, "Invalid {}: {} (expected {})", parameter, value, expected)
            }
            ControlError::UnsupportedRate { rate } => {
                write!(f, "Unsupported sample rate: {} Hz", rate)
            }
            ControlError::CommitInFlight { sequence } => {
                write!(f, "Commit #{} queued behind an in-flight recomputation", sequence)
            }
            ControlError::StaleCommitDiscarded {
                sequence,
                installed,
            } => {
                write!(
                    f,
                    "Discarded stale coefficients #{} (installed #{})",
                    sequence, installed
                )
            }
            ControlError::MalformedPayload { reason } => {
                write!(f, "Malformed commit payload: {}", reason)
            }
            ControlError::Device { message } => {
                write!(f, "Audio device error: {}", message)
            }
            ControlError::Disconnected { channel } => {
                write!(f, "Queue unavailable: {}", channel)
            }
        }
    }
}

impl std::error::Error for ControlError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_parameter_and_range() {
        let err = ControlError::invalid("beta", 2.0, "0 ..= 0.5");
        assert_eq!(err.to_string(), "Invalid beta: 2 (expected 0 ..= 0.5)");
    }

    #[test]
    fn test_display_unsupported_rate() {
        let err = ControlError::UnsupportedRate { rate: 22050 };
        assert_eq!(err.to_string(), "Unsupported sample rate: 22050 Hz");
    }
}
