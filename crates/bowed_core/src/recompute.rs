//! Off-audio-thread coefficient recomputation.
//!
//! The worker owns the producer end of the coefficient queue. Each job is
//! designed, pushed to the audio context, and then acknowledged on the status
//! channel so the commit controller can release the next pending snapshot.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rtrb::{Producer, PushError};

use crate::commands::CoefficientUpdate;
use crate::commit::CommitSink;
use crate::error::ControlError;
use crate::snapshot::CommitSnapshot;
use crate::solver::StringSolver;

/// Back-off while the audio context has not drained the coefficient queue.
const FULL_QUEUE_BACKOFF: Duration = Duration::from_millis(1);

/// Status outlet of the solver: one message per finished job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecomputeStatus {
    /// Coefficients are queued for the audio context.
    Ready {
        sequence: u64,
        sample_rate: u32,
        elapsed: Duration,
    },
    /// The audio context is gone; the result was dropped.
    Abandoned { sequence: u64 },
}

impl RecomputeStatus {
    pub fn sequence(&self) -> u64 {
        match self {
            RecomputeStatus::Ready { sequence, .. } | RecomputeStatus::Abandoned { sequence } => {
                *sequence
            }
        }
    }
}

pub struct RecomputeWorker {
    jobs: Option<Sender<Arc<CommitSnapshot>>>,
    status: Receiver<RecomputeStatus>,
    handle: Option<JoinHandle<()>>,
}

impl RecomputeWorker {
    pub fn spawn<S: StringSolver>(
        updates: Producer<CoefficientUpdate<S::Coefficients>>,
    ) -> Result<Self, ControlError> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Arc<CommitSnapshot>>();
        let (status_tx, status_rx) = crossbeam_channel::unbounded();

        let handle = std::thread::Builder::new()
            .name("bowed-recompute".into())
            .spawn(move || run::<S>(job_rx, status_tx, updates))
            .map_err(|err| ControlError::Device {
                message: format!("failed to spawn recompute thread: {}", err),
            })?;

        Ok(Self {
            jobs: Some(job_tx),
            status: status_rx,
            handle: Some(handle),
        })
    }

    pub fn try_status(&self) -> Option<RecomputeStatus> {
        self.status.try_recv().ok()
    }

    pub fn wait_status(&self, timeout: Duration) -> Option<RecomputeStatus> {
        match self.status.recv_timeout(timeout) {
            Ok(status) => Some(status),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl CommitSink for RecomputeWorker {
    fn apply(&mut self, snapshot: Arc<CommitSnapshot>) -> Result<(), ControlError> {
        let jobs = self.jobs.as_ref().ok_or(ControlError::Disconnected {
            channel: "recompute jobs",
        })?;
        jobs.send(snapshot).map_err(|_| ControlError::Disconnected {
            channel: "recompute jobs",
        })
    }
}

impl Drop for RecomputeWorker {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop.
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Recompute thread panicked");
            }
        }
    }
}

fn run<S: StringSolver>(
    jobs: Receiver<Arc<CommitSnapshot>>,
    status: Sender<RecomputeStatus>,
    mut updates: Producer<CoefficientUpdate<S::Coefficients>>,
) {
    for snapshot in jobs.iter() {
        profiling::scope!("recompute");
        let started = Instant::now();
        let sequence = snapshot.sequence();
        let sample_rate = snapshot.sample_rate();

        let mut update = CoefficientUpdate {
            sequence,
            sample_rate,
            coefficients: Box::new(S::design(&snapshot)),
        };

        let delivered = loop {
            match updates.push(update) {
                Ok(()) => break true,
                Err(PushError::Full(rejected)) => {
                    if updates.is_abandoned() {
                        break false;
                    }
                    update = rejected;
                    std::thread::sleep(FULL_QUEUE_BACKOFF);
                }
            }
        };

        let message = if delivered {
            tracing::debug!(
                "Designed coefficients #{} at {} Hz in {:?}",
                sequence,
                sample_rate,
                started.elapsed()
            );
            RecomputeStatus::Ready {
                sequence,
                sample_rate,
                elapsed: started.elapsed(),
            }
        } else {
            RecomputeStatus::Abandoned { sequence }
        };
        if status.send(message).is_err() {
            break;
        }
    }
}
