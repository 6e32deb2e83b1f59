//! Line-based control console.
//!
//! Each line is one discrete control event: a field edit, a commit gesture,
//! a modulation change or a sample-rate selection.

use anyhow::{Context, Result, bail};
use bowed_core::dsp::utils::map_range;
use bowed_core::output::GAIN_FLOOR_DB;
use bowed_core::{
    AudioDevice, ControlSurface, ModulationField, ModulationTarget, ParamField, StringSolver,
    SUPPORTED_SAMPLE_RATES,
};
use std::io::Write;

pub const HELP: &str = "\
Commands:
  set <field> <value>                        stage a parameter edit
  commit                                     validate and send the staged parameters
  payload [<10 numbers>]                     show the committed payload, or commit one
  mod <target> <speed|depth|base> <value>    targets: excitation, left, right, vibrato
  vibrato off                                stop the vibrato
  carrier <hz>                               played pitch (vibrato carrier); the committed
                                             fundamental_frequency only shapes partials and damping
  bow <velocity> <force>
  gain <db>                                  -70 dB and below is silence
  rate <hz>                                  44100, 48000, 88200 or 96000
  status
  help
  quit";

const METER_WIDTH: usize = 24;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Set { field: ParamField, value: f64 },
    Commit,
    ShowPayload,
    CommitPayload(String),
    Modulate {
        target: ModulationTarget,
        field: ModulationField,
        value: f32,
    },
    VibratoOff,
    Carrier(f32),
    Bow { velocity: f32, force: f32 },
    Gain(f32),
    Rate(u32),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

fn number<T: std::str::FromStr>(token: Option<&str>, what: &str) -> Result<T> {
    let token = token.with_context(|| format!("missing {}", what))?;
    token
        .parse::<T>()
        .map_err(|_| anyhow::anyhow!("'{}' is not a valid {}", token, what))
}

fn no_more(tokens: &mut std::str::SplitWhitespace<'_>) -> Result<()> {
    match tokens.next() {
        Some(extra) => bail!("unexpected argument '{}'", extra),
        None => Ok(()),
    }
}

/// Parse one console line. Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut tokens = line.split_whitespace();
    let Some(verb) = tokens.next() else {
        return Ok(None);
    };

    let command = match verb {
        "set" => {
            let field: ParamField = tokens.next().context("missing field name")?.parse()?;
            let value = number(tokens.next(), "value")?;
            no_more(&mut tokens)?;
            ConsoleCommand::Set { field, value }
        }
        "commit" => {
            no_more(&mut tokens)?;
            ConsoleCommand::Commit
        }
        "payload" => {
            let rest: Vec<&str> = tokens.collect();
            if rest.is_empty() {
                ConsoleCommand::ShowPayload
            } else {
                ConsoleCommand::CommitPayload(rest.join(" "))
            }
        }
        "mod" => {
            let target: ModulationTarget =
                tokens.next().context("missing modulation target")?.parse()?;
            let field: ModulationField =
                tokens.next().context("missing speed, depth or base")?.parse()?;
            let value = number(tokens.next(), "value")?;
            no_more(&mut tokens)?;
            ConsoleCommand::Modulate {
                target,
                field,
                value,
            }
        }
        "vibrato" => match tokens.next() {
            Some("off") => {
                no_more(&mut tokens)?;
                ConsoleCommand::VibratoOff
            }
            _ => bail!("usage: vibrato off (use 'mod vibrato ...' to change it)"),
        },
        "carrier" => {
            let hz = number(tokens.next(), "frequency")?;
            no_more(&mut tokens)?;
            ConsoleCommand::Carrier(hz)
        }
        "bow" => {
            let velocity = number(tokens.next(), "velocity")?;
            let force = number(tokens.next(), "force")?;
            no_more(&mut tokens)?;
            ConsoleCommand::Bow { velocity, force }
        }
        "gain" => {
            let db = number(tokens.next(), "gain in dB")?;
            no_more(&mut tokens)?;
            ConsoleCommand::Gain(db)
        }
        "rate" => {
            let rate = number(tokens.next(), "sample rate")?;
            no_more(&mut tokens)?;
            ConsoleCommand::Rate(rate)
        }
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => bail!("unknown command '{}' (try 'help')", other),
    };
    Ok(Some(command))
}

/// Bar graph of a level in dB between the silence floor and full scale.
pub fn level_meter(db: f32) -> String {
    let filled = map_range(db.max(GAIN_FLOOR_DB), GAIN_FLOOR_DB, 0.0, 0.0, METER_WIDTH as f32)
        .round()
        .clamp(0.0, METER_WIDTH as f32) as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(METER_WIDTH - filled))
}

fn to_db(level: f32) -> f32 {
    if level > 0.0 {
        20.0 * level.log10()
    } else {
        f32::NEG_INFINITY
    }
}

/// Apply one command. Control errors are printed rather than returned so the
/// console keeps running; only output failures are errors.
pub fn execute<S, D, W>(
    command: ConsoleCommand,
    surface: &mut ControlSurface<S>,
    device: &mut D,
    out: &mut W,
    extra_status: &dyn Fn() -> String,
) -> Result<Flow>
where
    S: StringSolver,
    D: AudioDevice,
    W: Write,
{
    let result = match command {
        ConsoleCommand::Set { field, value } => {
            surface.edit(field, value);
            writeln!(out, "staged {} = {}", field.name(), value)?;
            Ok(())
        }
        ConsoleCommand::Commit => surface.commit().map(|outcome| {
            let _ = writeln!(out, "commit #{} accepted", outcome.sequence());
        }),
        ConsoleCommand::ShowPayload => {
            match surface.payload() {
                Some(payload) => writeln!(out, "{}", payload)?,
                None => writeln!(out, "nothing committed yet")?,
            }
            Ok(())
        }
        ConsoleCommand::CommitPayload(payload) => {
            surface.commit_payload(&payload).map(|outcome| {
                let _ = writeln!(out, "payload committed as #{}", outcome.sequence());
            })
        }
        ConsoleCommand::Modulate {
            target,
            field,
            value,
        } => surface.set_modulation_field(target, field, value),
        ConsoleCommand::VibratoOff => surface.clear_vibrato(),
        ConsoleCommand::Carrier(hz) => surface.set_carrier(hz),
        ConsoleCommand::Bow { velocity, force } => surface.set_bow(velocity, force),
        ConsoleCommand::Gain(db) => surface.set_gain_db(db),
        ConsoleCommand::Rate(rate) => surface.select_rate(rate, device).map(|changed| {
            let _ = if changed {
                writeln!(out, "now running at {} Hz", rate)
            } else {
                writeln!(out, "already at {} Hz", rate)
            };
        }),
        ConsoleCommand::Status => {
            write_status(surface, out, extra_status)?;
            Ok(())
        }
        ConsoleCommand::Help => {
            writeln!(out, "{}", HELP)?;
            Ok(())
        }
        ConsoleCommand::Quit => return Ok(Flow::Quit),
    };

    if let Err(err) = result {
        writeln!(out, "error: {}", err)?;
    }
    Ok(Flow::Continue)
}

fn write_status<S: StringSolver, W: Write>(
    surface: &ControlSurface<S>,
    out: &mut W,
    extra_status: &dyn Fn() -> String,
) -> Result<()> {
    writeln!(
        out,
        "state: {:?}  committed: #{}  installed: #{}  in flight: {:?}  pending: {:?}",
        surface.state(),
        surface.committed().map(|s| s.sequence()).unwrap_or(0),
        surface.installed_sequence(),
        surface.in_flight(),
        surface.pending(),
    )?;
    let rates: Vec<String> = SUPPORTED_SAMPLE_RATES.iter().map(|r| r.to_string()).collect();
    writeln!(
        out,
        "rate: {} Hz (supported: {})",
        surface.sample_rate(),
        rates.join(", ")
    )?;
    for target in ModulationTarget::ALL {
        match surface.modulation(target) {
            Some(spec) => writeln!(
                out,
                "{:>10}: speed {} Hz, depth {}, base {}",
                target.name(),
                spec.speed,
                spec.depth,
                spec.base
            )?,
            None => writeln!(out, "{:>10}: off", target.name())?,
        }
    }
    let (velocity, force) = surface.bow();
    writeln!(
        out,
        "carrier: {} Hz  bow: velocity {}, force {}  gain: {} dB",
        surface.carrier(),
        velocity,
        force,
        surface.gain_db()
    )?;

    let stats = surface.monitor_stats();
    let left_db = to_db(stats.peak_left);
    let right_db = to_db(stats.peak_right);
    writeln!(out, "L {} {:.1} dBFS peak", level_meter(left_db), left_db)?;
    writeln!(out, "R {} {:.1} dBFS peak", level_meter(right_db), right_db)?;
    if stats.dropped > 0 {
        writeln!(out, "monitor dropped {} frames", stats.dropped)?;
    }
    let extra = extra_status();
    if !extra.is_empty() {
        writeln!(out, "{}", extra)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bowed_core::{CommitState, ControlError, EngineSettings, ModalString, connect};

    struct FakeDevice {
        rate: u32,
    }

    impl AudioDevice for FakeDevice {
        fn sample_rate(&self) -> u32 {
            self.rate
        }

        fn select_sample_rate(&mut self, rate: u32) -> Result<(), ControlError> {
            self.rate = rate;
            Ok(())
        }

        fn resume(&mut self) -> Result<(), ControlError> {
            Ok(())
        }
    }

    fn run(surface: &mut ControlSurface<ModalString>, device: &mut FakeDevice, line: &str) -> String {
        let mut out = Vec::new();
        let command = parse_command(line).unwrap().expect("a command");
        execute(command, surface, device, &mut out, &|| String::new()).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_parse_set() {
        assert_eq!(
            parse_command("set beta 0.001").unwrap(),
            Some(ConsoleCommand::Set {
                field: ParamField::Beta,
                value: 0.001
            })
        );
    }

    #[test]
    fn test_parse_mod() {
        assert_eq!(
            parse_command("  mod left depth -0.25 ").unwrap(),
            Some(ConsoleCommand::Modulate {
                target: ModulationTarget::LeftListeningPosition,
                field: ModulationField::Depth,
                value: -0.25
            })
        );
    }

    #[test]
    fn test_parse_payload_variants() {
        assert_eq!(
            parse_command("payload").unwrap(),
            Some(ConsoleCommand::ShowPayload)
        );
        assert_eq!(
            parse_command("payload 1  2 3").unwrap(),
            Some(ConsoleCommand::CommitPayload("1 2 3".into()))
        );
    }

    #[test]
    fn test_parse_blank_and_comment() {
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(parse_command("# bow harder").unwrap(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("set nope 1").is_err());
        assert!(parse_command("set beta").is_err());
        assert!(parse_command("bow 0.1").is_err());
        assert!(parse_command("rate fast").is_err());
        assert!(parse_command("gain 1 2").is_err());
        assert!(parse_command("mod middle speed 1").is_err());
        assert!(parse_command("vibrato on").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[test]
    fn test_help_names_carrier_as_pitch() {
        assert!(HELP.contains("carrier <hz>"));
        assert!(HELP.contains("played pitch"));
    }

    #[test]
    fn test_level_meter() {
        assert_eq!(level_meter(0.0), format!("[{}]", "#".repeat(METER_WIDTH)));
        assert_eq!(level_meter(f32::NEG_INFINITY), format!("[{}]", "-".repeat(METER_WIDTH)));
        assert_eq!(level_meter(-35.0).matches('#').count(), METER_WIDTH / 2);
    }

    #[test]
    fn test_execute_edit_and_rejected_commit() {
        let (mut surface, _engine) =
            connect(ModalString::new(48000.0), &EngineSettings::default()).unwrap();
        let mut device = FakeDevice { rate: 48000 };

        run(&mut surface, &mut device, "set stability_setting 2");
        let output = run(&mut surface, &mut device, "commit");

        assert!(output.starts_with("error: Invalid stability_setting"), "{}", output);
        assert_eq!(surface.state(), CommitState::Rejected);
    }

    #[test]
    fn test_execute_rate_change() {
        let (mut surface, _engine) =
            connect(ModalString::new(48000.0), &EngineSettings::default()).unwrap();
        let mut device = FakeDevice { rate: 48000 };

        let output = run(&mut surface, &mut device, "rate 96000");
        assert_eq!(output.trim(), "now running at 96000 Hz");
        assert_eq!(device.rate, 96000);

        let output = run(&mut surface, &mut device, "rate 12345");
        assert!(output.contains("Unsupported sample rate: 12345 Hz"));
        assert_eq!(surface.sample_rate(), 96000);
    }

    #[test]
    fn test_execute_extreme_speed_is_refused() {
        let (mut surface, _engine) =
            connect(ModalString::new(48000.0), &EngineSettings::default()).unwrap();
        let mut device = FakeDevice { rate: 48000 };

        let output = run(&mut surface, &mut device, "mod excitation speed 1e20");
        assert!(output.starts_with("error: Invalid speed"), "{}", output);
        assert_eq!(
            surface.modulation(ModulationTarget::ExcitationPosition),
            Some(EngineSettings::default().excitation)
        );
    }

    #[test]
    fn test_execute_status_and_quit() {
        let (mut surface, _engine) =
            connect(ModalString::new(48000.0), &EngineSettings::default()).unwrap();
        let mut device = FakeDevice { rate: 48000 };

        let output = run(&mut surface, &mut device, "status");
        assert!(output.contains("rate: 48000 Hz"));
        assert!(output.contains("vibrato: speed"));

        let mut out = Vec::new();
        let flow = execute(
            ConsoleCommand::Quit,
            &mut surface,
            &mut device,
            &mut out,
            &|| String::new(),
        )
        .unwrap();
        assert_eq!(flow, Flow::Quit);
    }
}
