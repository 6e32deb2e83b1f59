//! Audio-context engine.
//!
//! Runs on the real-time thread: drains commands and finished coefficient
//! updates at buffer boundaries, then renders frames in a fixed order
//! (modulation, solver, output). Nothing here allocates, locks or logs.

use crate::commands::{AudioQueues, CoefficientUpdate, EngineCommand, EngineReport, GarbageItem};
use crate::config::EngineSettings;
use crate::dsp::modulation::{PickupPositionModulator, VibratoGenerator};
use crate::error::ControlError;
use crate::output::{MonitorTap, OutputStage};
use crate::params::ModulationTarget;
use crate::rate;
use crate::solver::{SolverInlets, StereoFrame, StringSolver};

pub struct Engine<S: StringSolver> {
    solver: S,
    sample_rate: u32,
    /// Sequence of the coefficients the solver is running on; 0 before the first install.
    installed: u64,
    excitation: PickupPositionModulator,
    left: PickupPositionModulator,
    right: PickupPositionModulator,
    vibrato: VibratoGenerator,
    bow_velocity: f32,
    normal_force: f32,
    output: OutputStage,
    queues: AudioQueues<S::Coefficients>,
    frames: u64,
}

impl<S: StringSolver> Engine<S> {
    pub fn new(
        mut solver: S,
        settings: &EngineSettings,
        queues: AudioQueues<S::Coefficients>,
        monitor: Option<MonitorTap>,
    ) -> Result<Self, ControlError> {
        settings.validate()?;
        let rate = settings.sample_rate as f32;
        solver.set_sample_rate(rate);

        let mut output = OutputStage::new(settings.gain_db)?;
        if let Some(tap) = monitor {
            output.attach_monitor(tap);
        }

        Ok(Self {
            solver,
            sample_rate: settings.sample_rate,
            installed: 0,
            excitation: PickupPositionModulator::new(settings.excitation, rate)?,
            left: PickupPositionModulator::new(settings.left_pickup, rate)?,
            right: PickupPositionModulator::new(settings.right_pickup, rate)?,
            vibrato: VibratoGenerator::new(settings.carrier, settings.vibrato, rate)?,
            bow_velocity: settings.bow_velocity,
            normal_force: settings.normal_force,
            output,
            queues,
            frames: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn installed_sequence(&self) -> u64 {
        self.installed
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn excitation(&self) -> &PickupPositionModulator {
        &self.excitation
    }

    pub fn left_pickup(&self) -> &PickupPositionModulator {
        &self.left
    }

    pub fn right_pickup(&self) -> &PickupPositionModulator {
        &self.right
    }

    pub fn vibrato(&self) -> &VibratoGenerator {
        &self.vibrato
    }

    pub fn output(&self) -> &OutputStage {
        &self.output
    }

    /// Apply queued commands, then install the newest finished coefficients.
    ///
    /// Commands go first so a rate change in the same buffer is in effect
    /// before coefficients are checked against it.
    pub fn process_commands(&mut self) {
        profiling::scope!("process_commands");

        while let Ok(command) = self.queues.commands.pop() {
            self.apply_command(command);
        }

        while let Ok(update) = self.queues.coefficients.pop() {
            self.offer_coefficients(update);
        }
    }

    /// Fill an interleaved device buffer of `channels` samples per frame.
    pub fn render(&mut self, buffer: &mut [f32], channels: usize) {
        profiling::scope!("render");
        self.process_commands();

        let channels = channels.max(1);
        for frame in buffer.chunks_mut(channels) {
            let stereo = self.next_frame();
            self.output.process(stereo, frame);
        }
    }

    /// Modulation before solver, one sample.
    fn next_frame(&mut self) -> StereoFrame {
        let inlets = SolverInlets {
            excitation_velocity: self.bow_velocity,
            normal_force: self.normal_force,
            excitation_position: self.excitation.tick(),
            left_position: self.left.tick(),
            right_position: self.right.tick(),
            excitation_frequency: self.vibrato.tick(),
        };
        self.frames += 1;
        self.solver.process(&inlets)
    }

    fn apply_command(&mut self, command: EngineCommand) {
        let result = match command {
            EngineCommand::Modulation { target, spec } => match target {
                ModulationTarget::ExcitationPosition => self.excitation.set_spec(spec),
                ModulationTarget::LeftListeningPosition => self.left.set_spec(spec),
                ModulationTarget::RightListeningPosition => self.right.set_spec(spec),
                ModulationTarget::Vibrato => self.vibrato.set_spec(spec),
            },
            EngineCommand::ClearVibrato => {
                self.vibrato.clear();
                Ok(())
            }
            EngineCommand::Carrier(carrier) => self.vibrato.set_carrier(carrier),
            EngineCommand::Bow { velocity, force } => {
                crate::config::check_bow(velocity, force).map(|()| {
                    self.bow_velocity = velocity;
                    self.normal_force = force;
                })
            }
            EngineCommand::GainDb(db) => self.output.set_gain_db(db),
            EngineCommand::SampleRate(rate) => self.apply_sample_rate(rate),
        };

        if let Err(error) = result {
            self.report(EngineReport::Rejected {
                command: command_name(&command),
                error,
            });
        }
    }

    /// Oscillators are retuned before the solver so no frame mixes rates.
    fn apply_sample_rate(&mut self, rate: u32) -> Result<(), ControlError> {
        if !rate::is_supported(rate) {
            return Err(ControlError::UnsupportedRate { rate });
        }
        if rate == self.sample_rate {
            return Ok(());
        }
        let hz = rate as f32;
        self.excitation.set_sample_rate(hz)?;
        self.left.set_sample_rate(hz)?;
        self.right.set_sample_rate(hz)?;
        self.vibrato.set_sample_rate(hz)?;
        self.solver.set_sample_rate(hz);
        self.sample_rate = rate;
        self.report(EngineReport::RateApplied { rate });
        Ok(())
    }

    fn offer_coefficients(&mut self, update: CoefficientUpdate<S::Coefficients>) {
        if update.sequence <= self.installed || update.sample_rate != self.sample_rate {
            self.report(EngineReport::Discarded(ControlError::StaleCommitDiscarded {
                sequence: update.sequence,
                installed: self.installed,
            }));
            self.discard(update.coefficients);
            return;
        }

        if let Some(previous) = self.solver.install(update.coefficients) {
            self.discard(previous);
        }
        self.installed = update.sequence;
        self.report(EngineReport::Installed {
            sequence: update.sequence,
            sample_rate: update.sample_rate,
        });
    }

    fn discard(&mut self, coefficients: Box<S::Coefficients>) {
        // If the garbage queue is full the box is dropped here as a fallback.
        let _ = self
            .queues
            .garbage
            .push(GarbageItem::Coefficients(coefficients));
    }

    fn report(&mut self, report: EngineReport) {
        let _ = self.queues.reports.push(report);
    }
}

fn command_name(command: &EngineCommand) -> &'static str {
    match command {
        EngineCommand::Modulation { target, .. } => target.name(),
        EngineCommand::ClearVibrato => "vibrato off",
        EngineCommand::Carrier(_) => "carrier",
        EngineCommand::Bow { .. } => "bow",
        EngineCommand::GainDb(_) => "gain",
        EngineCommand::SampleRate(_) => "rate",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{ControlQueues, create_engine_queues};
    use crate::params::{ModulationSpec, PhysicalParameterSet};
    use crate::snapshot::CommitSnapshot;
    use crate::solver::modal::{ModalCoefficients, ModalString};
    use rtrb::Producer;

    type Queues = (
        ControlQueues<ModalCoefficients>,
        Producer<CoefficientUpdate<ModalCoefficients>>,
    );

    fn engine(settings: &EngineSettings) -> (Engine<ModalString>, Queues) {
        let (control, audio, coefficients) = create_engine_queues();
        let engine = Engine::new(
            ModalString::new(settings.sample_rate as f32),
            settings,
            audio,
            None,
        )
        .expect("engine");
        (engine, (control, coefficients))
    }

    fn update(sequence: u64, sample_rate: u32) -> CoefficientUpdate<ModalCoefficients> {
        let snapshot = CommitSnapshot::new(sequence, PhysicalParameterSet::default(), sample_rate);
        CoefficientUpdate {
            sequence,
            sample_rate,
            coefficients: Box::new(ModalCoefficients::design(&snapshot)),
        }
    }

    fn reports(control: &mut ControlQueues<ModalCoefficients>) -> Vec<EngineReport> {
        let mut out = Vec::new();
        while let Ok(report) = control.reports.pop() {
            out.push(report);
        }
        out
    }

    #[test]
    fn test_installs_newer_sequence() {
        let (mut engine, (mut control, mut coefficients)) = engine(&EngineSettings::default());
        assert!(coefficients.push(update(1, 48000)).is_ok());
        engine.process_commands();
        assert_eq!(engine.installed_sequence(), 1);
        assert_eq!(
            reports(&mut control),
            vec![EngineReport::Installed {
                sequence: 1,
                sample_rate: 48000
            }]
        );
        // the silent initial coefficients went to the garbage queue
        assert!(control.garbage.pop().is_ok());
    }

    #[test]
    fn test_discards_older_sequence() {
        let (mut engine, (mut control, mut coefficients)) = engine(&EngineSettings::default());
        assert!(coefficients.push(update(2, 48000)).is_ok());
        assert!(coefficients.push(update(1, 48000)).is_ok());
        engine.process_commands();
        assert_eq!(engine.installed_sequence(), 2);
        let reports = reports(&mut control);
        assert_eq!(
            reports[1],
            EngineReport::Discarded(ControlError::StaleCommitDiscarded {
                sequence: 1,
                installed: 2
            })
        );
    }

    #[test]
    fn test_discards_coefficients_for_other_rate() {
        let (mut engine, (mut control, mut coefficients)) = engine(&EngineSettings::default());
        assert!(coefficients.push(update(1, 44100)).is_ok());
        engine.process_commands();
        assert_eq!(engine.installed_sequence(), 0);
        assert!(matches!(
            reports(&mut control)[0],
            EngineReport::Discarded(ControlError::StaleCommitDiscarded { sequence: 1, .. })
        ));
    }

    #[test]
    fn test_rate_change_retunes_oscillators_and_solver_together() {
        let (mut engine, (mut control, _)) = engine(&EngineSettings {
            sample_rate: 44100,
            ..Default::default()
        });
        let mut buffer = vec![0.0f32; 256];
        engine.render(&mut buffer, 2);

        assert!(control.commands.push(EngineCommand::SampleRate(96000)).is_ok());
        engine.process_commands();

        assert_eq!(engine.sample_rate(), 96000);
        assert_eq!(engine.solver().sample_rate(), 96000.0);
        assert_eq!(engine.excitation().oscillator().sample_rate(), 96000.0);
        assert_eq!(engine.left_pickup().oscillator().sample_rate(), 96000.0);
        assert_eq!(engine.right_pickup().oscillator().sample_rate(), 96000.0);
        let vibrato = engine.vibrato().oscillator().expect("vibrato running");
        assert_eq!(vibrato.sample_rate(), 96000.0);
        assert_eq!(
            reports(&mut control),
            vec![EngineReport::RateApplied { rate: 96000 }]
        );
    }

    #[test]
    fn test_invalid_modulation_reported_and_previous_kept() {
        let (mut engine, (mut control, _)) = engine(&EngineSettings::default());
        let before = engine.left_pickup().oscillator().spec();
        let command = EngineCommand::Modulation {
            target: ModulationTarget::LeftListeningPosition,
            spec: ModulationSpec::new(0.0, 0.1, 0.5),
        };
        assert!(control.commands.push(command).is_ok());
        engine.process_commands();
        assert_eq!(engine.left_pickup().oscillator().spec(), before);
        assert!(matches!(
            reports(&mut control)[0],
            EngineReport::Rejected { command: "left", .. }
        ));
    }

    #[test]
    fn test_render_fills_every_frame() {
        let (mut engine, (_control, mut coefficients)) = engine(&EngineSettings {
            gain_db: 0.0,
            ..Default::default()
        });
        assert!(coefficients.push(update(1, 48000)).is_ok());
        let mut buffer = vec![0.0f32; 2 * 4800];
        engine.render(&mut buffer, 2);
        assert_eq!(engine.frames_rendered(), 4800);
        assert!(buffer.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
        let peak = buffer.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
        assert!(peak > 0.02, "default bowing too quiet: {}", peak);
    }
}
