//! Offline rendering to a WAV file.
//!
//! Runs the same control surface and engine as the live host, with this thread
//! standing in for the audio callback.

use anyhow::{Context, Result, bail};
use bowed_core::{EngineSettings, ModalString, connect};
use std::path::Path;
use std::time::Duration;

const BLOCK_FRAMES: usize = 512;
const CHANNELS: u16 = 2;
const RECOMPUTE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSummary {
    pub frames: u64,
    pub sample_rate: u32,
    pub installed_sequence: u64,
    pub peak: f32,
}

pub fn render_to_wav(path: &Path, seconds: f32, settings: &EngineSettings) -> Result<RenderSummary> {
    if !(seconds.is_finite() && seconds > 0.0) {
        bail!("Render length must be positive, got {}", seconds);
    }

    let solver = ModalString::new(settings.sample_rate as f32);
    let (mut surface, mut engine) = connect(solver, settings).context("Failed to start engine")?;
    if !surface.wait_for_recompute(RECOMPUTE_TIMEOUT) {
        bail!("Coefficient design did not finish within {:?}", RECOMPUTE_TIMEOUT);
    }

    let spec = hound::WavSpec {
        channels: CHANNELS,
        sample_rate: settings.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let total_frames = (seconds as f64 * settings.sample_rate as f64).round() as u64;
    let mut buffer = vec![0.0f32; BLOCK_FRAMES * CHANNELS as usize];
    let mut written = 0u64;
    let mut peak = 0.0f32;

    while written < total_frames {
        let frames = (total_frames - written).min(BLOCK_FRAMES as u64) as usize;
        let block = &mut buffer[..frames * CHANNELS as usize];
        engine.render(block, CHANNELS as usize);
        for sample in block.iter() {
            peak = peak.max(sample.abs());
            writer.write_sample(*sample)?;
        }
        written += frames as u64;
        surface.poll();
    }

    writer
        .finalize()
        .with_context(|| format!("Failed to finalize {}", path.display()))?;

    let summary = RenderSummary {
        frames: written,
        sample_rate: settings.sample_rate,
        installed_sequence: engine.installed_sequence(),
        peak,
    };
    tracing::info!(
        "Rendered {} frames at {} Hz to {} (peak {:.3})",
        summary.frames,
        summary.sample_rate,
        path.display(),
        summary.peak
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_render_writes_stereo_float_wav() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bowed.wav");
        let settings = EngineSettings {
            sample_rate: 44100,
            gain_db: 0.0,
            ..Default::default()
        };

        let summary = render_to_wav(&path, 0.25, &settings).unwrap();
        assert_eq!(summary.frames, 11025);
        assert_eq!(summary.installed_sequence, 1);
        assert!(summary.peak > 0.03 && summary.peak <= 1.0, "peak {}", summary.peak);

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.sample_format, hound::SampleFormat::Float);
        assert_eq!(reader.duration(), 11025);
    }

    #[test]
    fn test_render_rejects_zero_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        assert!(render_to_wav(&path, 0.0, &EngineSettings::default()).is_err());
        assert!(!path.exists());
    }
}
