//! Final gain, device channel layout and the read-only monitoring tap.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rtrb::{Consumer, Producer, RingBuffer as SpscQueue};

use crate::dsp::utils::{db_to_gain, smooth_value};
use crate::error::ControlError;
use crate::solver::StereoFrame;

/// Levels at or below this are exact silence.
pub const GAIN_FLOOR_DB: f32 = -70.0;
pub const GAIN_CEILING_DB: f32 = 12.0;

/// Gain below which a fade toward silence snaps to zero.
const SILENCE_EPSILON: f32 = 1e-6;

fn gain_for_db(db: f32) -> f32 {
    if db <= GAIN_FLOOR_DB {
        0.0
    } else {
        db_to_gain(db)
    }
}

pub fn check_gain_db(db: f32) -> Result<(), ControlError> {
    if db.is_finite() && db <= GAIN_CEILING_DB {
        Ok(())
    } else {
        Err(ControlError::invalid(
            "gain_db",
            db as f64,
            "finite, <= 12 dB (<= -70 dB is silence)",
        ))
    }
}

pub struct OutputStage {
    target_db: f32,
    target_gain: f32,
    gain: f32,
    monitor: Option<MonitorTap>,
}

impl OutputStage {
    pub fn new(gain_db: f32) -> Result<Self, ControlError> {
        check_gain_db(gain_db)?;
        let gain = gain_for_db(gain_db);
        Ok(Self {
            target_db: gain_db,
            target_gain: gain,
            gain,
            monitor: None,
        })
    }

    pub fn gain_db(&self) -> f32 {
        self.target_db
    }

    /// Current smoothed linear gain.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Move the gain target. The applied gain glides toward it per sample.
    pub fn set_gain_db(&mut self, db: f32) -> Result<(), ControlError> {
        check_gain_db(db)?;
        self.target_db = db;
        self.target_gain = gain_for_db(db);
        Ok(())
    }

    pub fn attach_monitor(&mut self, tap: MonitorTap) {
        self.monitor = Some(tap);
    }

    /// Apply gain to one solver frame, feed the monitor, and write one device
    /// frame into `out` (one sample per channel).
    pub fn process(&mut self, frame: StereoFrame, out: &mut [f32]) {
        self.gain = smooth_value(self.gain, self.target_gain);
        if self.target_gain == 0.0 && self.gain < SILENCE_EPSILON {
            self.gain = 0.0;
        }

        let left = sanitize(frame.left * self.gain);
        let right = sanitize(frame.right * self.gain);

        if let Some(monitor) = self.monitor.as_mut() {
            monitor.push(StereoFrame { left, right });
        }

        write_layout(left, right, out);
    }
}

fn sanitize(sample: f32) -> f32 {
    if sample.is_finite() {
        sample.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Mono devices get the average, wider layouts alternate left and right.
fn write_layout(left: f32, right: f32, out: &mut [f32]) {
    if out.len() == 1 {
        out[0] = ((left + right) * 0.5).clamp(-1.0, 1.0);
        return;
    }
    for (channel, sample) in out.iter_mut().enumerate() {
        *sample = if channel % 2 == 0 { left } else { right };
    }
}

/// Audio-side end of the monitoring tap.
pub struct MonitorTap {
    producer: Producer<StereoFrame>,
    dropped: Arc<AtomicU64>,
}

impl MonitorTap {
    fn push(&mut self, frame: StereoFrame) {
        if self.producer.push(frame).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Fixed-size history of the most recent values.
#[derive(Clone)]
pub struct RingBuffer {
    pub buffer: Vec<f32>,
    capacity: usize,
    index: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            index: 0,
        }
    }

    pub fn push(&mut self, value: f32) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(value);
        } else {
            self.buffer[self.index] = value;
        }
        self.index = (self.index + 1) % self.capacity;
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Oldest to newest.
    pub fn to_vec(&self) -> Vec<f32> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let mut vec = Vec::with_capacity(self.buffer.len());
        if self.buffer.len() == self.capacity {
            vec.extend_from_slice(&self.buffer[self.index..]);
            vec.extend_from_slice(&self.buffer[..self.index]);
        } else {
            vec.extend_from_slice(&self.buffer);
        }
        vec
    }

    fn peak(&self) -> f32 {
        self.buffer.iter().fold(0.0f32, |acc, v| acc.max(v.abs()))
    }

    fn rms(&self) -> f32 {
        if self.buffer.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.buffer.iter().map(|v| v * v).sum();
        (sum / self.buffer.len() as f32).sqrt()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MonitorStats {
    pub frames: usize,
    pub peak_left: f32,
    pub peak_right: f32,
    pub rms_left: f32,
    pub rms_right: f32,
    pub dropped: u64,
}

/// Control-side end of the monitoring tap.
pub struct MonitorReader {
    consumer: Consumer<StereoFrame>,
    left: RingBuffer,
    right: RingBuffer,
    dropped: Arc<AtomicU64>,
}

impl MonitorReader {
    /// Pull every frame the audio side has published. Returns how many arrived.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Ok(frame) = self.consumer.pop() {
            self.left.push(frame.left);
            self.right.push(frame.right);
            count += 1;
        }
        count
    }

    pub fn left_history(&self) -> Vec<f32> {
        self.left.to_vec()
    }

    pub fn right_history(&self) -> Vec<f32> {
        self.right.to_vec()
    }

    /// Frames lost because the reader fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            frames: self.left.len(),
            peak_left: self.left.peak(),
            peak_right: self.right.peak(),
            rms_left: self.left.rms(),
            rms_right: self.right.rms(),
            dropped: self.dropped(),
        }
    }
}

/// Create a tap that buffers up to `capacity` frames between drains and
/// remembers the last `history` frames on the reader side.
pub fn monitor_channel(capacity: usize, history: usize) -> (MonitorTap, MonitorReader) {
    let (producer, consumer) = SpscQueue::new(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        MonitorTap {
            producer,
            dropped: dropped.clone(),
        },
        MonitorReader {
            consumer,
            left: RingBuffer::new(history),
            right: RingBuffer::new(history),
            dropped,
        },
    )
}
