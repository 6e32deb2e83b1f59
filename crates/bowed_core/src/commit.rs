//! Parameter commit state machine.
//!
//! Edits land in a draft; an explicit commit gesture validates the draft as a
//! whole and turns it into a [`CommitSnapshot`]. At most one snapshot is being
//! recomputed by the solver at any time. A gesture that arrives while one is
//! outstanding is parked in a single pending slot, and a newer gesture replaces
//! whatever is parked there.

use std::sync::Arc;

use crate::error::ControlError;
use crate::params::{ParamField, PhysicalParameterSet};
use crate::snapshot::CommitSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Idle,
    Staged,
    Committing,
    Committed,
    Rejected,
}

/// Receiver of validated snapshots; the solver's parameter-apply entry point.
pub trait CommitSink {
    fn apply(&mut self, snapshot: Arc<CommitSnapshot>) -> Result<(), ControlError>;
}

/// What a successful commit gesture did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Sent to the solver immediately.
    Dispatched { sequence: u64 },
    /// Parked behind the in-flight recomputation.
    Queued { sequence: u64, in_flight: u64 },
}

impl CommitOutcome {
    pub fn sequence(&self) -> u64 {
        match self {
            CommitOutcome::Dispatched { sequence } | CommitOutcome::Queued { sequence, .. } => {
                *sequence
            }
        }
    }
}

pub struct ParameterCommitController {
    state: CommitState,
    draft: PhysicalParameterSet,
    baseline: Option<Arc<CommitSnapshot>>,
    next_sequence: u64,
    in_flight: Option<u64>,
    pending: Option<Arc<CommitSnapshot>>,
}

impl ParameterCommitController {
    pub fn new(defaults: PhysicalParameterSet) -> Self {
        Self {
            state: CommitState::Idle,
            draft: defaults,
            baseline: None,
            next_sequence: 1,
            in_flight: None,
            pending: None,
        }
    }

    pub fn state(&self) -> CommitState {
        self.state
    }

    pub fn draft(&self) -> &PhysicalParameterSet {
        &self.draft
    }

    /// Latest snapshot that passed validation, whether or not it has been dispatched yet.
    pub fn committed(&self) -> Option<&Arc<CommitSnapshot>> {
        self.baseline.as_ref()
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn pending(&self) -> Option<u64> {
        self.pending.as_ref().map(|s| s.sequence())
    }

    /// Stage a single field edit. Later edits to the same field win.
    pub fn edit(&mut self, field: ParamField, value: f64) {
        self.draft.set(field, value);
        self.state = CommitState::Staged;
    }

    /// Commit gesture: validate the draft and hand it to the solver.
    ///
    /// On validation failure the draft is kept for correction and nothing is sent.
    pub fn commit<S: CommitSink>(
        &mut self,
        sample_rate: u32,
        sink: &mut S,
    ) -> Result<CommitOutcome, ControlError> {
        self.state = CommitState::Committing;

        let violations = self.draft.violations();
        if let Some(first) = violations.first() {
            for violation in &violations {
                tracing::warn!("Commit rejected: {}", violation);
            }
            self.state = CommitState::Rejected;
            return Err(first.clone());
        }

        let snapshot = Arc::new(CommitSnapshot::new(
            self.next_sequence,
            self.draft,
            sample_rate,
        ));
        self.next_sequence += 1;
        self.baseline = Some(snapshot.clone());
        self.route(snapshot, sink)
    }

    /// Re-commit the latest committed values, e.g. after a sample-rate change.
    ///
    /// Returns `Ok(None)` when nothing has been committed yet. The draft and
    /// state are left alone.
    pub fn recommit<S: CommitSink>(
        &mut self,
        sample_rate: u32,
        sink: &mut S,
    ) -> Result<Option<CommitOutcome>, ControlError> {
        let Some(params) = self.baseline.as_ref().map(|s| *s.params()) else {
            return Ok(None);
        };
        let snapshot = Arc::new(CommitSnapshot::new(self.next_sequence, params, sample_rate));
        self.next_sequence += 1;
        self.baseline = Some(snapshot.clone());

        let state = self.state;
        let outcome = self.route(snapshot, sink);
        self.state = state;
        outcome.map(Some)
    }

    /// The solver finished recomputing `sequence`.
    ///
    /// Dispatches the pending snapshot, if any, and returns its sequence number.
    pub fn complete<S: CommitSink>(
        &mut self,
        sequence: u64,
        sink: &mut S,
    ) -> Result<Option<u64>, ControlError> {
        if self.in_flight != Some(sequence) {
            tracing::debug!(
                "Ignoring completion of #{} (in flight: {:?})",
                sequence,
                self.in_flight
            );
            return Ok(None);
        }
        self.in_flight = None;

        let Some(next) = self.pending.take() else {
            return Ok(None);
        };
        let next_sequence = next.sequence();
        self.dispatch(next, sink)?;
        if self.state == CommitState::Committing {
            self.state = CommitState::Committed;
        }
        Ok(Some(next_sequence))
    }

    fn route<S: CommitSink>(
        &mut self,
        snapshot: Arc<CommitSnapshot>,
        sink: &mut S,
    ) -> Result<CommitOutcome, ControlError> {
        let sequence = snapshot.sequence();

        if let Some(in_flight) = self.in_flight {
            if let Some(superseded) = self.pending.replace(snapshot) {
                tracing::debug!(
                    "Pending commit #{} superseded by #{}",
                    superseded.sequence(),
                    sequence
                );
            }
            tracing::info!("{}", ControlError::CommitInFlight { sequence });
            return Ok(CommitOutcome::Queued {
                sequence,
                in_flight,
            });
        }

        self.dispatch(snapshot, sink)?;
        self.state = CommitState::Committed;
        Ok(CommitOutcome::Dispatched { sequence })
    }

    fn dispatch<S: CommitSink>(
        &mut self,
        snapshot: Arc<CommitSnapshot>,
        sink: &mut S,
    ) -> Result<(), ControlError> {
        let sequence = snapshot.sequence();
        match sink.apply(snapshot) {
            Ok(()) => {
                self.in_flight = Some(sequence);
                Ok(())
            }
            Err(err) => {
                tracing::warn!("Commit #{} could not be sent: {}", sequence, err);
                self.state = CommitState::Staged;
                Err(err)
            }
        }
    }
}
