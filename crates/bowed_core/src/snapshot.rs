//! Immutable commit snapshots and the 10-field textual commit payload.
//!
//! Payload field order:
//! `fundamental_frequency first_decay_frequency sample_rate_hint first_decay_time
//! second_decay_frequency second_decay_time beta regularisation_parameter
//! stability_setting nonlinear_mode`

use crate::error::ControlError;
use crate::params::PhysicalParameterSet;

pub const PAYLOAD_FIELD_COUNT: usize = 10;

/// A validated parameter set tagged with its commit sequence number.
///
/// Fields are private; a snapshot never changes after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitSnapshot {
    sequence: u64,
    params: PhysicalParameterSet,
    sample_rate: u32,
}

impl CommitSnapshot {
    pub(crate) fn new(sequence: u64, params: PhysicalParameterSet, sample_rate: u32) -> Self {
        Self {
            sequence,
            params,
            sample_rate,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn params(&self) -> &PhysicalParameterSet {
        &self.params
    }

    /// Sample rate the snapshot was committed at, sent as the payload's rate hint.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn to_payload(&self) -> String {
        encode_payload(&self.params, self.sample_rate as f64)
    }
}

pub fn encode_payload(params: &PhysicalParameterSet, sample_rate_hint: f64) -> String {
    let fields = [
        params.fundamental_frequency,
        params.first_decay_frequency,
        sample_rate_hint,
        params.first_decay_time,
        params.second_decay_frequency,
        params.second_decay_time,
        params.beta,
        params.regularisation_parameter,
        params.stability_setting,
        params.nonlinear_mode,
    ];
    fields
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a payload into a parameter set and its rate hint.
///
/// Only the syntax is checked here; ranges are checked by
/// [`PhysicalParameterSet::validate`].
pub fn parse_payload(payload: &str) -> Result<(PhysicalParameterSet, f64), ControlError> {
    let values = payload
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ControlError::MalformedPayload {
                    reason: format!("'{}' is not a finite number", token),
                })
        })
        .collect::<Result<Vec<f64>, _>>()?;

    if values.len() != PAYLOAD_FIELD_COUNT {
        return Err(ControlError::MalformedPayload {
            reason: format!(
                "expected {} fields, found {}",
                PAYLOAD_FIELD_COUNT,
                values.len()
            ),
        });
    }

    let params = PhysicalParameterSet {
        fundamental_frequency: values[0],
        first_decay_frequency: values[1],
        first_decay_time: values[3],
        second_decay_frequency: values[4],
        second_decay_time: values[5],
        beta: values[6],
        regularisation_parameter: values[7],
        stability_setting: values[8],
        nonlinear_mode: values[9],
    };
    Ok((params, values[2]))
}
