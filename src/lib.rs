//! # dt8824
//!
//! Rust driver for the Data Translation DT8824 networked ADC.
//!
//! Configures the instrument (sample clock, gains, enabled channels,
//! buffer mode) and reads its circular sample buffer without losing or
//! repeating samples.
//!
//! ## Quick Start
//!
//! ```no_run
//! use dt8824::{BufferMode, Dt8824};
//!
//! let mut adc = Dt8824::open("192.168.1.50")?;
//!
//! let setting = adc.setup_all(250.0, [1, 1, 8, 8], [true, true, false, false], BufferMode::Wrap)?;
//! println!("Clock: {} Hz", setting.actual);
//!
//! // Mean of the 10 newest samples
//! println!("{}", adc.fetch_mean(Some(10))?);
//!
//! // Continuous streaming
//! for _ in 0..5 {
//!     let block = adc.stream_next()?;
//!     println!("{} samples", block.len());
//! }
//! adc.stream_stop()?;
//! # Ok::<(), dt8824::Dt8824Error>(())
//! ```

use std::time::Duration;

pub mod device;
pub mod protocol;
pub mod transport;
pub mod types;

pub use device::Dt8824;
pub use transport::{TcpTransport, Transport};
pub use types::*;

/// Errors returned by the dt8824 driver.
#[derive(Debug, thiserror::Error)]
pub enum Dt8824Error {
    /// Session closed, reset or timed out.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reply could not be decoded (bad text, short frame, unknown token).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// `*IDN?` did not name a Data Translation DT8824.
    #[error("Unexpected instrument: {manufacturer} {model}")]
    IdentityMismatch { manufacturer: String, model: String },

    /// Password-protected commands stayed disabled after the unlock attempt.
    #[error("Could not enable password protected commands")]
    UnlockFailed,

    /// Caller passed an argument the instrument cannot act on.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No new samples arrived within the configured poll timeout.
    #[error("No samples within {0:?}")]
    PollTimeout(Duration),
}
