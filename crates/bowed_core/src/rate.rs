//! Sample-rate coordination between the audio device, the modulation
//! oscillators and the solver.

use crate::error::ControlError;

/// Rates the device may be switched to.
pub const SUPPORTED_SAMPLE_RATES: [u32; 4] = [44100, 48000, 88200, 96000];

pub fn is_supported(rate: u32) -> bool {
    SUPPORTED_SAMPLE_RATES.contains(&rate)
}

/// The parts of the audio device the coordinator needs.
pub trait AudioDevice {
    /// Rate the device is currently running at.
    fn sample_rate(&self) -> u32;

    /// Reconfigure the device for `rate`, leaving output paused.
    ///
    /// A failed call may leave the device without a running output; the
    /// coordinator re-selects the last good rate afterwards.
    fn select_sample_rate(&mut self, rate: u32) -> Result<(), ControlError>;

    /// Resume output after a reconfiguration.
    fn resume(&mut self) -> Result<(), ControlError>;
}

/// Receiver of accepted rate changes. The audio context retunes modulation
/// before the solver when it handles the notice.
pub trait RateSink {
    fn publish_rate(&mut self, rate: u32) -> Result<(), ControlError>;
}

pub struct SampleRateCoordinator {
    current: u32,
}

impl SampleRateCoordinator {
    pub fn new(initial: u32) -> Result<Self, ControlError> {
        if !is_supported(initial) {
            return Err(ControlError::UnsupportedRate { rate: initial });
        }
        Ok(Self { current: initial })
    }

    /// Last known-good rate.
    pub fn current(&self) -> u32 {
        self.current
    }

    /// User selection of a new rate.
    ///
    /// Returns `Ok(true)` when the rate changed. On any failure the last good
    /// rate is kept and the device is put back on it.
    pub fn select<D: AudioDevice, S: RateSink>(
        &mut self,
        rate: u32,
        device: &mut D,
        sink: &mut S,
    ) -> Result<bool, ControlError> {
        if !is_supported(rate) {
            tracing::warn!(
                "Refusing sample rate {} Hz; staying at {} Hz",
                rate,
                self.current
            );
            return Err(ControlError::UnsupportedRate { rate });
        }
        if rate == self.current {
            return Ok(false);
        }

        if let Err(err) = device.select_sample_rate(rate) {
            tracing::warn!("Device refused {} Hz: {}", rate, err);
            self.restore(device);
            return Err(err);
        }

        let reported = device.sample_rate();
        if !is_supported(reported) {
            tracing::warn!(
                "Device reports unsupported rate {} Hz after selecting {} Hz",
                reported,
                rate
            );
            self.restore(device);
            return Err(ControlError::UnsupportedRate { rate: reported });
        }

        if let Err(err) = self.propagate(reported, sink) {
            self.restore(device);
            return Err(err);
        }
        device.resume()?;
        Ok(true)
    }

    /// The device changed rate on its own (or on request of another client).
    pub fn device_reported<S: RateSink>(
        &mut self,
        rate: u32,
        sink: &mut S,
    ) -> Result<bool, ControlError> {
        if !is_supported(rate) {
            tracing::warn!(
                "Device reported unsupported rate {} Hz; keeping {} Hz",
                rate,
                self.current
            );
            return Err(ControlError::UnsupportedRate { rate });
        }
        if rate == self.current {
            return Ok(false);
        }
        self.propagate(rate, sink)?;
        Ok(true)
    }

    /// Query the device and propagate its rate if it moved.
    pub fn refresh<D: AudioDevice, S: RateSink>(
        &mut self,
        device: &D,
        sink: &mut S,
    ) -> Result<bool, ControlError> {
        self.device_reported(device.sample_rate(), sink)
    }

    fn propagate<S: RateSink>(&mut self, rate: u32, sink: &mut S) -> Result<(), ControlError> {
        sink.publish_rate(rate)?;
        tracing::info!("Sample rate changed: {} Hz -> {} Hz", self.current, rate);
        self.current = rate;
        Ok(())
    }

    /// Put the device back on the last good rate after a failed switch.
    /// The device may have torn its output down even if its reported rate
    /// never changed, so the rate is always selected again.
    fn restore<D: AudioDevice>(&self, device: &mut D) {
        if let Err(err) = device.select_sample_rate(self.current) {
            tracing::warn!("Could not restore {} Hz: {}", self.current, err);
        }
        if let Err(err) = device.resume() {
            tracing::warn!("Could not resume output: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tears its stream down before checking a new rate, like a real backend.
    struct FakeDevice {
        rate: u32,
        refuse: Option<u32>,
        /// Rate of the built stream, if any.
        stream: Option<u32>,
        playing: bool,
        resumed: usize,
    }

    impl FakeDevice {
        fn new(rate: u32) -> Self {
            Self {
                rate,
                refuse: None,
                stream: Some(rate),
                playing: true,
                resumed: 0,
            }
        }
    }

    impl AudioDevice for FakeDevice {
        fn sample_rate(&self) -> u32 {
            self.rate
        }

        fn select_sample_rate(&mut self, rate: u32) -> Result<(), ControlError> {
            self.stream = None;
            self.playing = false;
            if self.refuse == Some(rate) {
                return Err(ControlError::Device {
                    message: "refused".to_string(),
                });
            }
            self.rate = rate;
            self.stream = Some(rate);
            Ok(())
        }

        fn resume(&mut self) -> Result<(), ControlError> {
            self.resumed += 1;
            match self.stream {
                Some(_) => {
                    self.playing = true;
                    Ok(())
                }
                None => Err(ControlError::Device {
                    message: "no stream".to_string(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        published: Vec<u32>,
    }

    impl RateSink for RecordingSink {
        fn publish_rate(&mut self, rate: u32) -> Result<(), ControlError> {
            self.published.push(rate);
            Ok(())
        }
    }

    #[test]
    fn test_rejects_unsupported_initial_rate() {
        assert_eq!(
            SampleRateCoordinator::new(22050).err(),
            Some(ControlError::UnsupportedRate { rate: 22050 })
        );
    }

    #[test]
    fn test_select_supported_rate_propagates() {
        let mut coordinator = SampleRateCoordinator::new(44100).expect("new failed");
        let mut device = FakeDevice::new(44100);
        let mut sink = RecordingSink::default();

        assert_eq!(coordinator.select(96000, &mut device, &mut sink), Ok(true));
        assert_eq!(coordinator.current(), 96000);
        assert_eq!(sink.published, vec![96000]);
        assert_eq!(device.rate, 96000);
        assert_eq!(device.resumed, 1);
    }

    #[test]
    fn test_select_unsupported_keeps_last_good_rate() {
        let mut coordinator = SampleRateCoordinator::new(48000).expect("new failed");
        let mut device = FakeDevice::new(48000);
        let mut sink = RecordingSink::default();

        assert_eq!(
            coordinator.select(32000, &mut device, &mut sink),
            Err(ControlError::UnsupportedRate { rate: 32000 })
        );
        assert_eq!(coordinator.current(), 48000);
        assert_eq!(device.rate, 48000);
        assert!(sink.published.is_empty());
    }

    #[test]
    fn test_select_same_rate_is_noop() {
        let mut coordinator = SampleRateCoordinator::new(48000).expect("new failed");
        let mut device = FakeDevice::new(48000);
        let mut sink = RecordingSink::default();
        assert_eq!(coordinator.select(48000, &mut device, &mut sink), Ok(false));
        assert!(sink.published.is_empty());
    }

    #[test]
    fn test_device_refusal_restores_previous_rate() {
        let mut coordinator = SampleRateCoordinator::new(44100).expect("new failed");
        let mut device = FakeDevice::new(44100);
        device.refuse = Some(88200);
        let mut sink = RecordingSink::default();

        assert!(coordinator.select(88200, &mut device, &mut sink).is_err());
        assert_eq!(coordinator.current(), 44100);
        assert_eq!(device.rate, 44100);
        assert_eq!(device.resumed, 1);
        assert!(sink.published.is_empty());
    }

    #[test]
    fn test_refused_rate_rebuilds_lost_stream() {
        let mut coordinator = SampleRateCoordinator::new(48000).expect("new failed");
        let mut device = FakeDevice::new(48000);
        device.refuse = Some(88200);
        let mut sink = RecordingSink::default();

        assert!(coordinator.select(88200, &mut device, &mut sink).is_err());
        // The refusal dropped the stream without changing the reported rate.
        assert_eq!(device.rate, 48000);
        assert_eq!(device.stream, Some(48000));
        assert!(device.playing, "output left silent after a refused rate");
        assert_eq!(coordinator.current(), 48000);
    }

    #[test]
    fn test_device_reporting_unsupported_rate_is_refused() {
        let mut coordinator = SampleRateCoordinator::new(44100).expect("new failed");
        let mut sink = RecordingSink::default();
        assert_eq!(
            coordinator.device_reported(11025, &mut sink),
            Err(ControlError::UnsupportedRate { rate: 11025 })
        );
        assert_eq!(coordinator.current(), 44100);
    }

    #[test]
    fn test_refresh_picks_up_device_change() {
        let mut coordinator = SampleRateCoordinator::new(44100).expect("new failed");
        let device = FakeDevice::new(48000);
        let mut sink = RecordingSink::default();
        assert_eq!(coordinator.refresh(&device, &mut sink), Ok(true));
        assert_eq!(coordinator.current(), 48000);
        assert_eq!(sink.published, vec![48000]);
    }
}
