//! Control-context facade.
//!
//! `ControlSurface` is the single writer toward the audio context. It owns
//! the commit controller, the sample-rate coordinator and the recompute worker,
//! and turns GUI-style events into queue messages.

use std::sync::Arc;

use rtrb::Producer;

use crate::commands::{ControlQueues, EngineCommand, EngineReport, create_engine_queues};
use crate::commit::{CommitOutcome, CommitState, ParameterCommitController};
use crate::config::{EngineSettings, check_bow};
use crate::engine::Engine;
use crate::error::ControlError;
use crate::output::{MonitorReader, MonitorStats, check_gain_db, monitor_channel};
use crate::params::{
    ModulationField, ModulationSpec, ModulationTarget, ParamField, PhysicalParameterSet,
    check_field,
};
use crate::rate::{AudioDevice, RateSink, SampleRateCoordinator};
use crate::recompute::{RecomputeStatus, RecomputeWorker};
use crate::snapshot::{CommitSnapshot, parse_payload};
use crate::solver::StringSolver;

/// Spec used when a vibrato field is edited while no vibrato is running.
const VIBRATO_TEMPLATE: ModulationSpec = ModulationSpec {
    speed: 5.0,
    depth: 0.0,
    base: 0.0,
};

impl RateSink for Producer<EngineCommand> {
    fn publish_rate(&mut self, rate: u32) -> Result<(), ControlError> {
        self.push(EngineCommand::SampleRate(rate))
            .map_err(|_| ControlError::Disconnected { channel: "commands" })
    }
}

/// What one `poll` observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub completed: usize,
    pub installed: usize,
    pub discarded: usize,
    pub rejected: usize,
    pub garbage: usize,
}

pub struct ControlSurface<S: StringSolver> {
    controller: ParameterCommitController,
    coordinator: SampleRateCoordinator,
    worker: RecomputeWorker,
    queues: ControlQueues<S::Coefficients>,
    monitor: MonitorReader,
    modulation: [ModulationSpec; 3],
    vibrato: Option<ModulationSpec>,
    carrier: f32,
    bow: (f32, f32),
    gain_db: f32,
    installed: u64,
}

/// Build an engine and its control surface from settings, then commit the
/// configured parameter set once (patch load).
pub fn connect<S: StringSolver>(
    solver: S,
    settings: &EngineSettings,
) -> Result<(ControlSurface<S>, Engine<S>), ControlError> {
    settings.validate()?;
    let (control, audio, updates) = create_engine_queues::<S::Coefficients>();
    let (tap, monitor) = monitor_channel(settings.monitor_capacity, settings.monitor_history);
    let engine = Engine::new(solver, settings, audio, Some(tap))?;

    let mut surface = ControlSurface {
        controller: ParameterCommitController::new(settings.params),
        coordinator: SampleRateCoordinator::new(settings.sample_rate)?,
        worker: RecomputeWorker::spawn::<S>(updates)?,
        queues: control,
        monitor,
        modulation: [
            settings.excitation,
            settings.left_pickup,
            settings.right_pickup,
        ],
        vibrato: settings.vibrato,
        carrier: settings.carrier,
        bow: (settings.bow_velocity, settings.normal_force),
        gain_db: settings.gain_db,
        installed: 0,
    };
    surface.commit()?;
    tracing::info!(
        "Engine ready at {} Hz, patch committed",
        settings.sample_rate
    );
    Ok((surface, engine))
}

impl<S: StringSolver> ControlSurface<S> {
    pub fn state(&self) -> CommitState {
        self.controller.state()
    }

    pub fn draft(&self) -> &PhysicalParameterSet {
        self.controller.draft()
    }

    pub fn committed(&self) -> Option<&Arc<CommitSnapshot>> {
        self.controller.committed()
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.controller.in_flight()
    }

    pub fn pending(&self) -> Option<u64> {
        self.controller.pending()
    }

    pub fn sample_rate(&self) -> u32 {
        self.coordinator.current()
    }

    /// Last sequence the audio context reported as installed.
    pub fn installed_sequence(&self) -> u64 {
        self.installed
    }

    pub fn modulation(&self, target: ModulationTarget) -> Option<ModulationSpec> {
        match target {
            ModulationTarget::ExcitationPosition => Some(self.modulation[0]),
            ModulationTarget::LeftListeningPosition => Some(self.modulation[1]),
            ModulationTarget::RightListeningPosition => Some(self.modulation[2]),
            ModulationTarget::Vibrato => self.vibrato,
        }
    }

    pub fn carrier(&self) -> f32 {
        self.carrier
    }

    pub fn bow(&self) -> (f32, f32) {
        self.bow
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    pub fn monitor_stats(&self) -> MonitorStats {
        self.monitor.stats()
    }

    pub fn monitor(&self) -> &MonitorReader {
        &self.monitor
    }

    /// Stage one field. Range problems are reported now but only enforced at commit.
    pub fn edit(&mut self, field: ParamField, value: f64) {
        if let Err(err) = check_field(field, value) {
            tracing::warn!("{} (commit will be rejected until corrected)", err);
        }
        self.controller.edit(field, value);
    }

    pub fn edit_by_name(&mut self, name: &str, value: f64) -> Result<(), ControlError> {
        let field: ParamField = name.parse()?;
        self.edit(field, value);
        Ok(())
    }

    /// Commit gesture.
    pub fn commit(&mut self) -> Result<CommitOutcome, ControlError> {
        let outcome = self
            .controller
            .commit(self.coordinator.current(), &mut self.worker)?;
        match outcome {
            CommitOutcome::Dispatched { sequence } => {
                tracing::info!("Commit #{} sent for recomputation", sequence)
            }
            CommitOutcome::Queued {
                sequence,
                in_flight,
            } => tracing::info!("Commit #{} queued behind #{}", sequence, in_flight),
        }
        Ok(outcome)
    }

    /// Stage every field of a 10-field textual payload and commit it as one unit.
    ///
    /// The payload's rate hint is informational; the snapshot always carries
    /// the coordinator's current rate.
    pub fn commit_payload(&mut self, payload: &str) -> Result<CommitOutcome, ControlError> {
        let (params, rate_hint) = parse_payload(payload)?;
        if rate_hint != self.coordinator.current() as f64 {
            tracing::debug!(
                "Payload rate hint {} differs from device rate {}",
                rate_hint,
                self.coordinator.current()
            );
        }
        for field in ParamField::ALL {
            self.controller.edit(field, params.get(field));
        }
        self.commit()
    }

    /// Solver-facing payload of the latest committed snapshot.
    pub fn payload(&self) -> Option<String> {
        self.controller.committed().map(|s| s.to_payload())
    }

    pub fn set_modulation(
        &mut self,
        target: ModulationTarget,
        spec: ModulationSpec,
    ) -> Result<(), ControlError> {
        spec.validate()?;
        self.send(EngineCommand::Modulation { target, spec })?;
        match target {
            ModulationTarget::ExcitationPosition => self.modulation[0] = spec,
            ModulationTarget::LeftListeningPosition => self.modulation[1] = spec,
            ModulationTarget::RightListeningPosition => self.modulation[2] = spec,
            ModulationTarget::Vibrato => self.vibrato = Some(spec),
        }
        Ok(())
    }

    /// Change one field of a modulation spec, keeping the others.
    pub fn set_modulation_field(
        &mut self,
        target: ModulationTarget,
        field: ModulationField,
        value: f32,
    ) -> Result<(), ControlError> {
        let current = self.modulation(target).unwrap_or(VIBRATO_TEMPLATE);
        self.set_modulation(target, current.with_field(field, value))
    }

    pub fn clear_vibrato(&mut self) -> Result<(), ControlError> {
        self.send(EngineCommand::ClearVibrato)?;
        self.vibrato = None;
        Ok(())
    }

    pub fn set_carrier(&mut self, carrier: f32) -> Result<(), ControlError> {
        if !(carrier.is_finite() && carrier > 0.0) {
            return Err(ControlError::invalid("carrier", carrier as f64, "> 0 Hz"));
        }
        self.send(EngineCommand::Carrier(carrier))?;
        self.carrier = carrier;
        Ok(())
    }

    pub fn set_bow(&mut self, velocity: f32, force: f32) -> Result<(), ControlError> {
        check_bow(velocity, force)?;
        self.send(EngineCommand::Bow { velocity, force })?;
        self.bow = (velocity, force);
        Ok(())
    }

    pub fn set_gain_db(&mut self, db: f32) -> Result<(), ControlError> {
        check_gain_db(db)?;
        self.send(EngineCommand::GainDb(db))?;
        self.gain_db = db;
        Ok(())
    }

    /// User rate selection. On success the committed parameters are redesigned
    /// for the new rate.
    pub fn select_rate<D: AudioDevice>(
        &mut self,
        rate: u32,
        device: &mut D,
    ) -> Result<bool, ControlError> {
        let changed = self
            .coordinator
            .select(rate, device, &mut self.queues.commands)?;
        if changed {
            self.recommit()?;
        }
        Ok(changed)
    }

    /// The device moved to `rate` on its own.
    pub fn device_rate_changed(&mut self, rate: u32) -> Result<bool, ControlError> {
        let changed = self
            .coordinator
            .device_reported(rate, &mut self.queues.commands)?;
        if changed {
            self.recommit()?;
        }
        Ok(changed)
    }

    /// Drain everything the worker and the audio context have sent back.
    pub fn poll(&mut self) -> PollSummary {
        let mut summary = PollSummary::default();

        while let Some(status) = self.worker.try_status() {
            summary.completed += 1;
            self.on_status(status);
        }

        while let Ok(report) = self.queues.reports.pop() {
            match report {
                EngineReport::Installed {
                    sequence,
                    sample_rate,
                } => {
                    summary.installed += 1;
                    self.installed = sequence;
                    tracing::info!("Coefficients #{} installed at {} Hz", sequence, sample_rate);
                }
                EngineReport::Discarded(err) => {
                    summary.discarded += 1;
                    tracing::debug!("{}", err);
                }
                EngineReport::RateApplied { rate } => {
                    tracing::info!("Audio context running at {} Hz", rate);
                }
                EngineReport::Rejected { command, error } => {
                    summary.rejected += 1;
                    tracing::warn!("Audio context rejected '{}': {}", command, error);
                }
            }
        }

        while self.queues.garbage.pop().is_ok() {
            summary.garbage += 1;
        }

        self.monitor.drain();
        summary
    }

    /// Block until the worker reports, for offline rendering and tests.
    pub fn wait_for_recompute(&mut self, timeout: std::time::Duration) -> bool {
        match self.worker.wait_status(timeout) {
            Some(status) => {
                self.on_status(status);
                true
            }
            None => false,
        }
    }

    fn on_status(&mut self, status: RecomputeStatus) {
        match status {
            RecomputeStatus::Ready {
                sequence, elapsed, ..
            } => tracing::debug!("Recompute #{} finished in {:?}", sequence, elapsed),
            RecomputeStatus::Abandoned { sequence } => {
                tracing::warn!("Recompute #{} dropped: audio context gone", sequence)
            }
        }
        match self.controller.complete(status.sequence(), &mut self.worker) {
            Ok(Some(next)) => tracing::info!("Pending commit #{} sent for recomputation", next),
            Ok(None) => {}
            Err(err) => tracing::warn!("Could not send pending commit: {}", err),
        }
    }

    fn recommit(&mut self) -> Result<(), ControlError> {
        let rate = self.coordinator.current();
        if let Some(outcome) = self.controller.recommit(rate, &mut self.worker)? {
            tracing::info!(
                "Re-committing parameters as #{} for {} Hz",
                outcome.sequence(),
                rate
            );
        }
        Ok(())
    }

    fn send(&mut self, command: EngineCommand) -> Result<(), ControlError> {
        self.queues
            .commands
            .push(command)
            .map_err(|_| ControlError::Disconnected { channel: "commands" })
    }
}
