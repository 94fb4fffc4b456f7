//! DT8824 SCPI command set: command builders, reply parsers, fetch frame decoder.
//!
//! Pure functions with no I/O, reusable with any transport.

use crate::types::*;
use crate::Dt8824Error;

// --- Identification / privileged mode ---
pub const CMD_IDN: &str = "*IDN?";
pub const CMD_PASSWORD_STATE: &str = ":SYST:PASS:CEN:STAT?";
pub const CMD_PASSWORD_ENABLE: &str = ":SYST:PASS:CEN admin";

pub const EXPECTED_MANUFACTURER: &str = "Data Translation";
pub const EXPECTED_MODEL: &str = "DT8824";

// --- Configuration ---
pub const CMD_GET_FREQUENCY: &str = ":AD:CLOC:FREQ?";
pub const CMD_GET_CHANNELS: &str = ":AD:ENAB?";
pub const CMD_DISABLE_ALL_CHANNELS: &str = ":AD:ENAB OFF,(@1:4)";
pub const CMD_GET_GAIN: &str = ":AD:GAIN?";
pub const CMD_GET_BUFFER_MODE: &str = ":AD:BUFF:MODE?";

// Reply tokens differ from the abbreviated write tokens.
pub const REPLY_WRAP: &str = "WRAp";
pub const REPLY_NOWRAP: &str = "NOWRAp";
pub const TOKEN_WRAP: &str = "WRA";
pub const TOKEN_NOWRAP: &str = "NOWRA";

// --- Acquisition ---
pub const CMD_TRIGGER_IMMEDIATE: &str = ":AD:TRIG:SOURR IMM";
pub const CMD_ARM: &str = ":AD:ARM";
pub const CMD_INIT: &str = ":AD:INIT";
pub const CMD_ABORT: &str = ":AD:ABOR";
pub const CMD_SCAN_STATUS: &str = ":AD:STAT:SCA?";
pub const CMD_STATUS: &str = "AD:STAT?";

// --- Fetch frame layout ---
pub const FRAME_HEADER_LEN: usize = 28;
pub const FRAME_COUNT_OFFSET: usize = 8;
pub const SAMPLE_LEN: usize = 4;
/// Largest sample count one fetch frame may claim. Counts above this
/// cannot come from the instrument's acquisition buffer.
pub const MAX_FRAME_SAMPLES: u32 = 1 << 20;

/// Build the sample clock write, formatted to millihertz.
pub fn build_set_frequency(frequency: f64) -> String {
    format!(":AD:CLOC:FREQ {frequency:.3}")
}

/// Build the enable command for the channels set in `mask`.
///
/// Returns `None` when no channel is selected.
pub fn build_enable_channels(mask: &[bool; NUM_CHANNELS]) -> Option<String> {
    let list: Vec<String> = mask
        .iter()
        .enumerate()
        .filter(|(_, on)| **on)
        .map(|(i, _)| (i + 1).to_string())
        .collect();
    if list.is_empty() {
        return None;
    }
    Some(format!(":AD:ENAB ON,(@{})", list.join(",")))
}

/// Build the gain write for one channel (1-indexed).
pub fn build_set_gain(gain: GainCode, channel: usize) -> String {
    format!(":AD:GAIN {},(@{channel})", gain.value())
}

pub fn build_set_buffer_mode(mode: BufferMode) -> String {
    let token = match mode {
        BufferMode::Wrap => TOKEN_WRAP,
        BufferMode::NoWrap => TOKEN_NOWRAP,
    };
    format!(":AD:BUFF:MODE {token}")
}

/// Build a binary fetch starting at buffer index `start`.
pub fn build_fetch(start: u64) -> String {
    format!(":AD:FETCH? {start}")
}

/// Clamp a requested frequency into the instrument's range.
pub fn clamp_frequency(requested: f64) -> (f64, Option<FrequencyClamp>) {
    if requested < MIN_FREQUENCY {
        (MIN_FREQUENCY, Some(FrequencyClamp::Min { requested }))
    } else if requested > MAX_FREQUENCY {
        (MAX_FREQUENCY, Some(FrequencyClamp::Max { requested }))
    } else {
        (requested, None)
    }
}

fn parse_int<T: std::str::FromStr>(field: &str, what: &str) -> Result<T, Dt8824Error> {
    field
        .trim()
        .parse()
        .map_err(|_| Dt8824Error::Protocol(format!("Cannot parse {what} from '{field}'")))
}

/// Split a reply into exactly one field per channel.
fn channel_fields<'a>(reply: &'a str, what: &str) -> Result<Vec<&'a str>, Dt8824Error> {
    let fields: Vec<&str> = reply.trim().split(',').collect();
    if fields.len() != NUM_CHANNELS {
        return Err(Dt8824Error::Protocol(format!(
            "Expected {NUM_CHANNELS} {what} fields, got '{reply}'"
        )));
    }
    Ok(fields)
}

/// Parse an `*IDN?` reply and check it names a DT8824.
pub fn parse_identity(reply: &str) -> Result<Identity, Dt8824Error> {
    let mut fields = reply.trim().split(',').map(str::trim);
    let manufacturer = fields.next().unwrap_or_default().to_string();
    let model = fields.next().unwrap_or_default().to_string();
    if manufacturer != EXPECTED_MANUFACTURER || model != EXPECTED_MODEL {
        return Err(Dt8824Error::IdentityMismatch { manufacturer, model });
    }
    Ok(Identity {
        manufacturer,
        model,
        serial: fields.next().unwrap_or_default().to_string(),
        firmware: fields.next().unwrap_or_default().to_string(),
    })
}

/// Parse `:SYST:PASS:CEN:STAT?`. `true` means privileged commands are enabled.
pub fn parse_password_state(reply: &str) -> Result<bool, Dt8824Error> {
    let state: i64 = parse_int(reply, "password state")?;
    Ok(state != 0)
}

pub fn parse_frequency(reply: &str) -> Result<f64, Dt8824Error> {
    reply
        .trim()
        .parse()
        .map_err(|_| Dt8824Error::Protocol(format!("Cannot parse frequency from '{reply}'")))
}

/// Parse `:AD:ENAB?` (`1,0,1,0`) into an enable mask.
pub fn parse_channels(reply: &str) -> Result<[bool; NUM_CHANNELS], Dt8824Error> {
    let mut mask = [false; NUM_CHANNELS];
    for (slot, field) in mask.iter_mut().zip(channel_fields(reply, "channel")?) {
        *slot = match parse_int::<i64>(field, "channel enable")? {
            0 => false,
            1 => true,
            v => {
                return Err(Dt8824Error::Protocol(format!(
                    "Channel enable flag must be 0 or 1, got {v}"
                )))
            }
        };
    }
    Ok(mask)
}

/// Parse `:AD:GAIN?` (`1,8,16,32`).
pub fn parse_gains(reply: &str) -> Result<[GainCode; NUM_CHANNELS], Dt8824Error> {
    let mut gains = [GainCode::X1; NUM_CHANNELS];
    for (slot, field) in gains.iter_mut().zip(channel_fields(reply, "gain")?) {
        let v: i32 = parse_int(field, "gain")?;
        *slot = GainCode::try_from(v)
            .map_err(|v| Dt8824Error::Protocol(format!("Unknown gain code: {v}")))?;
    }
    Ok(gains)
}

pub fn parse_buffer_mode(reply: &str) -> Result<BufferMode, Dt8824Error> {
    match reply.trim() {
        REPLY_WRAP => Ok(BufferMode::Wrap),
        REPLY_NOWRAP => Ok(BufferMode::NoWrap),
        other => Err(Dt8824Error::Protocol(format!("Unknown buffer mode: '{other}'"))),
    }
}

/// Parse `:AD:STAT:SCA?` (`<unused>,<write pointer>`) into the write pointer.
pub fn parse_write_pointer(reply: &str) -> Result<u64, Dt8824Error> {
    let mut fields = reply.trim().split(',');
    match (fields.next(), fields.next(), fields.next()) {
        (Some(_), Some(index), None) => parse_int(index, "write pointer"),
        _ => Err(Dt8824Error::Protocol(format!(
            "Malformed scan status reply: '{reply}'"
        ))),
    }
}

/// Parse `AD:STAT?` into its 8 bits, most significant first.
pub fn parse_status_bits(reply: &str) -> Result<[bool; 8], Dt8824Error> {
    let value: u8 = parse_int(reply, "status")?;
    let mut bits = [false; 8];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = (value >> (7 - i)) & 1 != 0;
    }
    Ok(bits)
}

/// Read the returned-sample count from a fetch frame header.
pub fn frame_sample_count(frame: &[u8]) -> Result<u32, Dt8824Error> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(Dt8824Error::Protocol(format!(
            "Fetch frame too short: {} bytes, header is {FRAME_HEADER_LEN}",
            frame.len()
        )));
    }
    let c = &frame[FRAME_COUNT_OFFSET..FRAME_COUNT_OFFSET + 4];
    let count = u32::from_be_bytes([c[0], c[1], c[2], c[3]]);
    if count > MAX_FRAME_SAMPLES {
        return Err(Dt8824Error::Protocol(format!(
            "Fetch frame claims {count} samples, limit is {MAX_FRAME_SAMPLES}"
        )));
    }
    Ok(count)
}

/// One decoded fetch reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sample count reported in the header.
    pub returned: u32,
    pub samples: Vec<Sample>,
}

/// Decode a fetch reply (terminator already stripped).
///
/// Samples are 4-byte big-endian words following the 28-byte header.
/// A payload holding fewer words than the header claims is rejected;
/// words beyond the claimed count are ignored.
pub fn decode_frame(frame: &[u8]) -> Result<Frame, Dt8824Error> {
    let returned = frame_sample_count(frame)?;
    let payload = &frame[FRAME_HEADER_LEN..];
    let available = payload.len() / SAMPLE_LEN;
    if available < returned as usize {
        return Err(Dt8824Error::Protocol(format!(
            "Fetch frame claims {returned} samples but carries {available}"
        )));
    }
    let samples = payload
        .chunks_exact(SAMPLE_LEN)
        .take(returned as usize)
        .map(|w| i32::from_be_bytes([w[0], w[1], w[2], w[3]]))
        .collect();
    Ok(Frame { returned, samples })
}
