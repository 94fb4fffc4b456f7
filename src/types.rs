use std::fmt;
use std::time::Duration;

/// Number of analog input channels on the DT8824.
pub const NUM_CHANNELS: usize = 4;

/// Lowest sample clock frequency the instrument accepts (Hz).
pub const MIN_FREQUENCY: f64 = 1.175;
/// Highest sample clock frequency the instrument accepts (Hz).
pub const MAX_FREQUENCY: f64 = 4800.0;

/// A raw 32-bit ADC count as returned by the instrument.
pub type Sample = i32;

/// Input gain code. Each code selects a fixed input voltage range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum GainCode {
    /// ±10 V
    X1 = 1,
    /// ±1.25 V
    X8 = 8,
    /// ±0.625 V
    X16 = 16,
    /// ±0.3125 V
    X32 = 32,
}

impl GainCode {
    /// All codes in ascending order.
    pub const ALL: [GainCode; 4] = [GainCode::X1, GainCode::X8, GainCode::X16, GainCode::X32];

    /// Snap an arbitrary requested gain to the closest valid code.
    ///
    /// Ties resolve to the smaller code (12 → 8, 24 → 16).
    pub fn nearest(requested: i32) -> Self {
        let mut best = GainCode::X1;
        let mut best_diff = i64::MAX;
        for code in Self::ALL {
            let diff = (i64::from(requested) - i64::from(code.value())).abs();
            if diff < best_diff {
                best = code;
                best_diff = diff;
            }
        }
        best
    }

    /// The integer value sent on the wire.
    pub fn value(self) -> i32 {
        self as i32
    }

    /// Input range `(min, max)` in volts for this gain.
    pub fn voltage_range(self) -> VoltageRange {
        let span = match self {
            GainCode::X1 => 10.0,
            GainCode::X8 => 1.25,
            GainCode::X16 => 0.625,
            GainCode::X32 => 0.3125,
        };
        VoltageRange { min: -span, max: span }
    }
}

impl TryFrom<i32> for GainCode {
    type Error = i32;
    fn try_from(v: i32) -> Result<Self, i32> {
        match v {
            1 => Ok(Self::X1),
            8 => Ok(Self::X8),
            16 => Ok(Self::X16),
            32 => Ok(Self::X32),
            _ => Err(v),
        }
    }
}

impl fmt::Display for GainCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Input voltage range for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageRange {
    pub min: f64,
    pub max: f64,
}

/// Behavior of the onboard sample buffer once it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// Oldest samples are overwritten.
    Wrap,
    /// Acquisition stops when the buffer fills.
    NoWrap,
}

/// Whether the conversion engine has been started by this driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionState {
    #[default]
    Idle,
    Running,
}

/// Client-side position within the instrument's circular buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamCursor {
    /// Write pointer captured on the first poll of a streaming session.
    pub base_index: u64,
    /// Samples delivered since `base_index` was captured.
    pub samples_consumed: u64,
    /// Fetch attempts since the last reset, including empty ones.
    pub poll_count: u64,
}

impl StreamCursor {
    /// Buffer index the next fetch starts from.
    pub fn next_index(&self) -> u64 {
        self.base_index + self.samples_consumed + 1
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Non-fatal notice that a requested frequency was outside the valid range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrequencyClamp {
    /// Raised to [`MIN_FREQUENCY`].
    Min { requested: f64 },
    /// Lowered to [`MAX_FREQUENCY`].
    Max { requested: f64 },
}

impl fmt::Display for FrequencyClamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrequencyClamp::Min { requested } => {
                write!(f, "{requested} Hz below minimum, set to {MIN_FREQUENCY} Hz")
            }
            FrequencyClamp::Max { requested } => {
                write!(f, "{requested} Hz above maximum, set to {MAX_FREQUENCY} Hz")
            }
        }
    }
}

/// Outcome of a frequency write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencySetting {
    /// Value actually sent to the instrument (after clamping).
    pub requested: f64,
    /// Value the instrument reports after the write (after its own rounding).
    pub actual: f64,
    /// Set when `requested` differs from what the caller asked for.
    pub clamp: Option<FrequencyClamp>,
}

/// Parsed `*IDN?` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

/// Connection and polling parameters for a driver instance.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// SCPI raw socket port.
    pub port: u16,
    pub connect_timeout: Duration,
    /// Read/write timeout applied to every command.
    pub io_timeout: Duration,
    /// Wait between the unlock command and the status re-query.
    pub unlock_settle: Duration,
    /// Pause between fetches that returned no samples.
    pub poll_interval: Duration,
    /// Upper bound on one fetch or stream call. `None` polls indefinitely.
    pub poll_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: 5025,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(2),
            unlock_settle: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
            poll_timeout: None,
        }
    }
}
