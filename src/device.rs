//! High-level DT8824 driver: configuration, acquisition control, buffer streaming.

use std::thread;
use std::time::Instant;

use log::{debug, info, trace, warn};

use crate::protocol::*;
use crate::transport::{TcpTransport, Transport};
use crate::types::*;
use crate::Dt8824Error;

/// Driver for one Data Translation DT8824 ADC.
///
/// Holds the session, the cached configuration and the stream cursor.
/// Not safe to share between threads without external locking.
///
/// ```no_run
/// use dt8824::Dt8824;
///
/// let mut adc = Dt8824::open("192.168.1.50")?;
/// adc.set_frequency(100.0)?;
/// adc.set_channels([true, false, false, false])?;
/// let samples = adc.stream_next()?;
/// println!("{} samples", samples.len());
/// adc.stream_stop()?;
/// # Ok::<(), dt8824::Dt8824Error>(())
/// ```
pub struct Dt8824<T: Transport = TcpTransport> {
    transport: T,
    config: SessionConfig,
    identity: Identity,
    state: AcquisitionState,
    cursor: StreamCursor,
    frequency: f64,
    channels: [bool; NUM_CHANNELS],
    gains: [GainCode; NUM_CHANNELS],
    ranges: [VoltageRange; NUM_CHANNELS],
    buffer_mode: BufferMode,
}

impl Dt8824<TcpTransport> {
    /// Connect to the instrument at `address` with default settings.
    pub fn open(address: &str) -> Result<Self, Dt8824Error> {
        Self::connect(address, SessionConfig::default())
    }

    /// Connect to the instrument at `address`.
    pub fn connect(address: &str, config: SessionConfig) -> Result<Self, Dt8824Error> {
        let transport = TcpTransport::connect(address, &config)?;
        Self::with_transport(transport, config)
    }
}

impl<T: Transport> Dt8824<T> {
    /// Wrap an already-open session.
    ///
    /// Verifies the identity, unlocks privileged commands and loads the
    /// current configuration into the cache.
    pub fn with_transport(mut transport: T, config: SessionConfig) -> Result<Self, Dt8824Error> {
        let identity = parse_identity(&transport.query(CMD_IDN)?)?;
        info!(
            "Connected to {} {} (serial {}, fw {})",
            identity.manufacturer, identity.model, identity.serial, identity.firmware
        );

        let mut dev = Self {
            transport,
            config,
            identity,
            state: AcquisitionState::Idle,
            cursor: StreamCursor::default(),
            frequency: 0.0,
            channels: [false; NUM_CHANNELS],
            gains: [GainCode::X1; NUM_CHANNELS],
            ranges: [GainCode::X1.voltage_range(); NUM_CHANNELS],
            buffer_mode: BufferMode::Wrap,
        };
        dev.unlock()?;

        dev.get_frequency()?;
        dev.get_channels()?;
        dev.get_gain()?;
        dev.get_buffer_mode()?;
        Ok(dev)
    }

    /// Enable password-protected commands if they are not already enabled.
    fn unlock(&mut self) -> Result<(), Dt8824Error> {
        if parse_password_state(&self.transport.query(CMD_PASSWORD_STATE)?)? {
            return Ok(());
        }
        debug!("Enabling password-protected commands");
        self.transport.write(CMD_PASSWORD_ENABLE)?;
        thread::sleep(self.config.unlock_settle);
        if !parse_password_state(&self.transport.query(CMD_PASSWORD_STATE)?)? {
            return Err(Dt8824Error::UnlockFailed);
        }
        Ok(())
    }

    /// Close the session.
    pub fn close(self) {
        drop(self);
    }

    // --- Cached state ---

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The underlying session.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the session. Commands sent through it bypass the
    /// cached configuration and the stream cursor.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Last frequency reported by the instrument.
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn channels(&self) -> [bool; NUM_CHANNELS] {
        self.channels
    }

    pub fn gains(&self) -> [GainCode; NUM_CHANNELS] {
        self.gains
    }

    /// Input range of each channel, derived from the cached gains.
    pub fn voltage_ranges(&self) -> [VoltageRange; NUM_CHANNELS] {
        self.ranges
    }

    pub fn buffer_mode(&self) -> BufferMode {
        self.buffer_mode
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn cursor(&self) -> StreamCursor {
        self.cursor
    }

    // --- Status ---

    /// Read the 8-bit A/D status register, most significant bit first.
    pub fn get_status(&mut self) -> Result<[bool; 8], Dt8824Error> {
        parse_status_bits(&self.transport.query(CMD_STATUS)?)
    }

    // --- Configuration ---

    /// Apply frequency, gains, channels and buffer mode in one call.
    pub fn setup_all(
        &mut self,
        frequency: f64,
        gains: [i32; NUM_CHANNELS],
        channels: [bool; NUM_CHANNELS],
        mode: BufferMode,
    ) -> Result<FrequencySetting, Dt8824Error> {
        let setting = self.set_frequency(frequency)?;
        self.set_gain(gains)?;
        self.set_channels(channels)?;
        self.set_buffer_mode(mode)?;
        Ok(setting)
    }

    pub fn get_frequency(&mut self) -> Result<f64, Dt8824Error> {
        self.frequency = parse_frequency(&self.transport.query(CMD_GET_FREQUENCY)?)?;
        Ok(self.frequency)
    }

    /// Set the sample clock.
    ///
    /// Out-of-range requests are clamped to [`MIN_FREQUENCY`, `MAX_FREQUENCY`]
    /// and reported through [`FrequencySetting::clamp`]. The instrument rounds
    /// the value further; [`FrequencySetting::actual`] holds what it settled on.
    pub fn set_frequency(&mut self, requested: f64) -> Result<FrequencySetting, Dt8824Error> {
        let (frequency, clamp) = clamp_frequency(requested);
        if let Some(c) = clamp {
            warn!("Frequency {c}");
        }
        self.transport.write(&build_set_frequency(frequency))?;
        let actual = self.get_frequency()?;
        Ok(FrequencySetting {
            requested: frequency,
            actual,
            clamp,
        })
    }

    pub fn get_channels(&mut self) -> Result<[bool; NUM_CHANNELS], Dt8824Error> {
        self.channels = parse_channels(&self.transport.query(CMD_GET_CHANNELS)?)?;
        Ok(self.channels)
    }

    /// Enable exactly the channels set in `mask`; all others are disabled.
    pub fn set_channels(&mut self, mask: [bool; NUM_CHANNELS]) -> Result<(), Dt8824Error> {
        self.transport.write(CMD_DISABLE_ALL_CHANNELS)?;
        if let Some(cmd) = build_enable_channels(&mask) {
            self.transport.write(&cmd)?;
        }
        self.get_channels()?;
        Ok(())
    }

    pub fn get_gain(&mut self) -> Result<[GainCode; NUM_CHANNELS], Dt8824Error> {
        let gains = parse_gains(&self.transport.query(CMD_GET_GAIN)?)?;
        self.store_gains(gains);
        Ok(gains)
    }

    /// Set per-channel gains, snapping each request to the nearest valid code.
    pub fn set_gain(
        &mut self,
        requested: [i32; NUM_CHANNELS],
    ) -> Result<[GainCode; NUM_CHANNELS], Dt8824Error> {
        let gains = requested.map(GainCode::nearest);
        for (i, gain) in gains.iter().enumerate() {
            self.transport.write(&build_set_gain(*gain, i + 1))?;
        }
        self.store_gains(gains);
        Ok(gains)
    }

    fn store_gains(&mut self, gains: [GainCode; NUM_CHANNELS]) {
        self.gains = gains;
        self.ranges = gains.map(GainCode::voltage_range);
    }

    pub fn get_buffer_mode(&mut self) -> Result<BufferMode, Dt8824Error> {
        self.buffer_mode = parse_buffer_mode(&self.transport.query(CMD_GET_BUFFER_MODE)?)?;
        Ok(self.buffer_mode)
    }

    pub fn set_buffer_mode(&mut self, mode: BufferMode) -> Result<(), Dt8824Error> {
        self.transport.write(&build_set_buffer_mode(mode))?;
        self.buffer_mode = mode;
        Ok(())
    }

    // --- Acquisition control ---

    /// Start conversions: immediate trigger, arm, initiate.
    ///
    /// The state only becomes `Running` once all three commands went out.
    pub fn start(&mut self) -> Result<(), Dt8824Error> {
        self.transport.write(CMD_TRIGGER_IMMEDIATE)?;
        self.transport.write(CMD_ARM)?;
        self.transport.write(CMD_INIT)?;
        self.state = AcquisitionState::Running;
        debug!("Acquisition started");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), Dt8824Error> {
        self.transport.write(CMD_ABORT)?;
        self.state = AcquisitionState::Idle;
        debug!("Acquisition stopped");
        Ok(())
    }

    fn ensure_running(&mut self) -> Result<(), Dt8824Error> {
        if self.state == AcquisitionState::Idle {
            self.start()?;
        }
        Ok(())
    }

    // --- Buffer access ---

    fn write_pointer(&mut self) -> Result<u64, Dt8824Error> {
        parse_write_pointer(&self.transport.query(CMD_SCAN_STATUS)?)
    }

    fn fetch_frame(&mut self, start: u64) -> Result<Frame, Dt8824Error> {
        let frame = decode_frame(&self.transport.query_binary(&build_fetch(start))?)?;
        trace!("Fetch at {start}: {} samples", frame.returned);
        Ok(frame)
    }

    /// Sleep before the next poll, or fail if the poll deadline has passed.
    fn pace(&self, started: Instant) -> Result<(), Dt8824Error> {
        if let Some(limit) = self.config.poll_timeout {
            if started.elapsed() >= limit {
                return Err(Dt8824Error::PollTimeout(limit));
            }
        }
        if !self.config.poll_interval.is_zero() {
            thread::sleep(self.config.poll_interval);
        }
        Ok(())
    }

    /// Collect at least `target` samples starting just past the current
    /// write pointer.
    fn collect(&mut self, target: usize) -> Result<Vec<Sample>, Dt8824Error> {
        self.ensure_running()?;

        let started = Instant::now();
        let offset = self.write_pointer()?;
        debug!("Fetching {target} samples after index {offset}");

        let mut data = Vec::with_capacity(target);
        let mut total: u64 = 0;
        while total < target as u64 {
            let frame = self.fetch_frame(offset + total + 1)?;
            if frame.returned == 0 {
                self.pace(started)?;
                continue;
            }
            total += u64::from(frame.returned);
            data.extend(frame.samples);
        }
        Ok(data)
    }

    /// Fetch the newest samples.
    ///
    /// With `Some(n)`, returns exactly the first `n` samples collected. With
    /// `None`, waits for at least one sample and returns everything the
    /// satisfying frames delivered.
    pub fn fetch_series(&mut self, count: Option<usize>) -> Result<Vec<Sample>, Dt8824Error> {
        match count {
            Some(0) => Err(Dt8824Error::InvalidArgument(
                "fetch count must be at least 1".into(),
            )),
            Some(n) => {
                let mut data = self.collect(n)?;
                data.truncate(n);
                Ok(data)
            }
            None => self.collect(1),
        }
    }

    /// Mean of the samples [`fetch_series`](Self::fetch_series) would return.
    pub fn fetch_mean(&mut self, count: Option<usize>) -> Result<f64, Dt8824Error> {
        let data = self.fetch_series(count)?;
        let sum: f64 = data.iter().map(|&s| f64::from(s)).sum();
        Ok(sum / data.len() as f64)
    }

    /// Return the next block of samples in a continuous stream.
    ///
    /// The first call after [`stream_stop`](Self::stream_stop) (or after
    /// opening) anchors the stream at the current write pointer. Every later
    /// call continues exactly where the previous one ended. Polls until the
    /// instrument has at least one new sample.
    ///
    /// `poll_count` counts fetch attempts, including failed ones, so a call
    /// retried after an error keeps the existing anchor.
    pub fn stream_next(&mut self) -> Result<Vec<Sample>, Dt8824Error> {
        self.ensure_running()?;

        let started = Instant::now();
        loop {
            if self.cursor.poll_count == 0 {
                self.cursor.base_index = self.write_pointer()?;
                debug!("Stream anchored at index {}", self.cursor.base_index);
            }
            self.cursor.poll_count += 1;
            let frame = self.fetch_frame(self.cursor.next_index())?;
            if frame.returned != 0 {
                self.cursor.samples_consumed += u64::from(frame.returned);
                return Ok(frame.samples);
            }
            self.pace(started)?;
        }
    }

    /// Reset the stream cursor and stop acquisition.
    pub fn stream_stop(&mut self) -> Result<(), Dt8824Error> {
        self.cursor.reset();
        debug!("Stream reset");
        self.stop()
    }
}
