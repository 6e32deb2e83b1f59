//! cpal output device.

use anyhow::{Context, Result};
use bowed_core::{AudioDevice, ControlError, Engine, ModalString};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::config::DeviceOptions;

pub type SharedEngine = Arc<Mutex<Engine<ModalString>>>;

/// Frames rendered per engine call inside one callback.
const RENDER_CHUNK_FRAMES: usize = 1024;

#[derive(Default)]
pub struct AudioThreadHealth {
    /// Callbacks that output silence because the engine lock was held elsewhere.
    engine_lock_misses: AtomicU64,

    /// Callbacks whose execution time exceeded the duration of the buffer they
    /// were asked to fill.
    output_callback_overruns: AtomicU64,
    /// Max observed overrun (elapsed - expected) in nanoseconds.
    output_callback_overrun_max_ns: AtomicU64,
    /// Max observed total callback execution time in nanoseconds.
    output_callback_duration_max_ns: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioThreadHealthSnapshot {
    pub engine_lock_misses: u64,
    pub output_callback_overruns: u64,
    pub output_callback_overrun_max_ns: u64,
    pub output_callback_duration_max_ns: u64,
}

impl AudioThreadHealth {
    pub fn take_snapshot_and_reset(&self) -> AudioThreadHealthSnapshot {
        AudioThreadHealthSnapshot {
            engine_lock_misses: self.engine_lock_misses.swap(0, Ordering::Relaxed),
            output_callback_overruns: self.output_callback_overruns.swap(0, Ordering::Relaxed),
            output_callback_overrun_max_ns: self
                .output_callback_overrun_max_ns
                .swap(0, Ordering::Relaxed),
            output_callback_duration_max_ns: self
                .output_callback_duration_max_ns
                .swap(0, Ordering::Relaxed),
        }
    }

    fn record_callback(&self, elapsed_ns: u64, frames: usize, sample_rate_hz: f64) {
        self.output_callback_duration_max_ns
            .fetch_max(elapsed_ns, Ordering::Relaxed);

        let expected_ns = ((frames as f64 * 1_000_000_000.0) / sample_rate_hz) as u64;
        if elapsed_ns > expected_ns {
            self.output_callback_overruns.fetch_add(1, Ordering::Relaxed);
            self.output_callback_overrun_max_ns
                .fetch_max(elapsed_ns - expected_ns, Ordering::Relaxed);
        }
    }
}

/// The output device plus the stream currently feeding it.
///
/// A rate change tears the stream down and builds a new one, paused, at the
/// new rate. The engine is shared between successive streams.
pub struct CpalDevice {
    device: cpal::Device,
    sample_rate: u32,
    channels: u16,
    buffer_size: Option<u32>,
    engine: Option<SharedEngine>,
    health: Arc<AudioThreadHealth>,
    stream: Option<cpal::Stream>,
}

impl CpalDevice {
    /// Pick the host and device, preferring `preferred_rate` when the device supports it.
    pub fn open(options: &DeviceOptions, preferred_rate: u32) -> Result<Self> {
        let host = match &options.host {
            Some(name) => {
                let id = cpal::available_hosts()
                    .into_iter()
                    .find(|id| id.name().eq_ignore_ascii_case(name))
                    .ok_or_else(|| anyhow::anyhow!("Audio host '{}' not available", name))?;
                cpal::host_from_id(id)
                    .with_context(|| format!("Failed to open audio host '{}'", name))?
            }
            None => cpal::default_host(),
        };

        let device = match &options.output_device {
            Some(name) => host
                .output_devices()
                .context("Failed to enumerate output devices")?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| anyhow::anyhow!("Output device '{}' not found", name))?,
            None => host
                .default_output_device()
                .ok_or_else(|| anyhow::anyhow!("No audio output device found"))?,
        };

        let config = match find_config(&device, preferred_rate)? {
            Some(config) => config,
            None => {
                let fallback = device
                    .default_output_config()
                    .context("Failed to query default output config")?;
                tracing::warn!(
                    "Device does not support {} Hz, using its default {} Hz",
                    preferred_rate,
                    fallback.sample_rate().0
                );
                fallback
            }
        };

        Ok(Self {
            device,
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            buffer_size: options.buffer_size,
            engine: None,
            health: Arc::new(AudioThreadHealth::default()),
            stream: None,
        })
    }

    pub fn name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "<unnamed>".into())
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn health(&self) -> &Arc<AudioThreadHealth> {
        &self.health
    }

    /// Start streaming from `engine` at the device's current rate.
    pub fn start(&mut self, engine: SharedEngine) -> Result<()> {
        self.engine = Some(engine);
        self.rebuild(self.sample_rate)?;
        self.play()
    }

    /// Play the current stream, rebuilding it first if an earlier
    /// reconfiguration left none.
    fn play(&mut self) -> Result<()> {
        if self.stream.is_none() {
            self.rebuild(self.sample_rate)?;
        }
        if let Some(stream) = &self.stream {
            stream.play().context("Failed to start output stream")?;
        }
        Ok(())
    }

    /// Replace the stream with a paused one at `rate`.
    fn rebuild(&mut self, rate: u32) -> Result<()> {
        let engine = self
            .engine
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Output stream not started"))?;

        // Refuse unsupported rates while the old stream is still playing.
        let supported = find_config(&self.device, rate)?
            .ok_or_else(|| anyhow::anyhow!("Device does not support {} Hz", rate))?;

        // Drop the old stream first; some backends allow one stream per device.
        self.stream = None;
        let sample_format = supported.sample_format();
        let mut config: cpal::StreamConfig = supported.into();
        if let Some(frames) = self.buffer_size {
            config.buffer_size = cpal::BufferSize::Fixed(frames);
        }

        let stream = match sample_format {
            cpal::SampleFormat::I8 => make_stream::<i8>(&self.device, &config, &engine, &self.health)?,
            cpal::SampleFormat::I16 => make_stream::<i16>(&self.device, &config, &engine, &self.health)?,
            cpal::SampleFormat::I32 => make_stream::<i32>(&self.device, &config, &engine, &self.health)?,
            cpal::SampleFormat::F32 => make_stream::<f32>(&self.device, &config, &engine, &self.health)?,
            _ => Err(anyhow::anyhow!(
                "Unsupported sample format: {:?}",
                sample_format
            ))?,
        };
        if let Err(err) = stream.pause() {
            tracing::warn!(
                "Backend cannot pause a fresh stream ({}); audio may briefly run at {} Hz before the engine retunes",
                err,
                config.sample_rate.0
            );
        }

        tracing::info!(
            "Audio: {} Hz, {} channels, {:?}",
            config.sample_rate.0,
            config.channels,
            sample_format
        );
        self.sample_rate = config.sample_rate.0;
        self.channels = config.channels;
        self.stream = Some(stream);
        Ok(())
    }
}

impl AudioDevice for CpalDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn select_sample_rate(&mut self, rate: u32) -> Result<(), ControlError> {
        self.rebuild(rate).map_err(|err| ControlError::Device {
            message: format!("{:#}", err),
        })
    }

    fn resume(&mut self) -> Result<(), ControlError> {
        self.play().map_err(|err| ControlError::Device {
            message: format!("{:#}", err),
        })
    }
}

/// First supported output config that can run at `rate`.
fn find_config(device: &cpal::Device, rate: u32) -> Result<Option<cpal::SupportedStreamConfig>> {
    let configs = device
        .supported_output_configs()
        .context("Failed to query supported output configs")?;
    Ok(configs
        .filter(|range| range.min_sample_rate().0 <= rate && rate <= range.max_sample_rate().0)
        .max_by_key(|range| (range.sample_format() == cpal::SampleFormat::F32, range.channels()))
        .map(|range| range.with_sample_rate(cpal::SampleRate(rate))))
}

pub fn make_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    engine: &SharedEngine,
    health: &Arc<AudioThreadHealth>,
) -> Result<cpal::Stream, anyhow::Error>
where
    T: SizedSample + FromSample<f32>,
{
    let num_channels = (config.channels as usize).max(1);
    let sample_rate_hz = config.sample_rate.0 as f64;

    let err_fn = |err| tracing::error!("Output stream error: {err}");

    let engine = engine.clone();
    let health = health.clone();
    let mut scratch = vec![0.0f32; RENDER_CHUNK_FRAMES * num_channels];

    let stream = device.build_output_stream(
        config,
        move |output: &mut [T], _info: &cpal::OutputCallbackInfo| {
            profiling::scope!("audio_callback");
            let callback_start = Instant::now();

            // Skip the buffer rather than block if the control thread holds the engine.
            match engine.try_lock() {
                Some(mut engine) => {
                    for chunk in output.chunks_mut(scratch.len()) {
                        let rendered = &mut scratch[..chunk.len()];
                        engine.render(rendered, num_channels);
                        for (out, sample) in chunk.iter_mut().zip(rendered.iter()) {
                            *out = T::from_sample(*sample);
                        }
                    }
                }
                None => {
                    health.engine_lock_misses.fetch_add(1, Ordering::Relaxed);
                    for sample in output.iter_mut() {
                        *sample = T::EQUILIBRIUM;
                    }
                }
            }

            let elapsed_ns = callback_start.elapsed().as_nanos() as u64;
            health.record_callback(elapsed_ns, output.len() / num_channels, sample_rate_hz);
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_counts_overruns_and_resets() {
        let health = AudioThreadHealth::default();
        // 480 frames at 48 kHz is a 10 ms budget
        health.record_callback(5_000_000, 480, 48000.0);
        health.record_callback(12_000_000, 480, 48000.0);

        let snapshot = health.take_snapshot_and_reset();
        assert_eq!(snapshot.output_callback_overruns, 1);
        assert_eq!(snapshot.output_callback_overrun_max_ns, 2_000_000);
        assert_eq!(snapshot.output_callback_duration_max_ns, 12_000_000);

        assert_eq!(
            health.take_snapshot_and_reset(),
            AudioThreadHealthSnapshot::default()
        );
    }
}
