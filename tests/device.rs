//! Integration tests: require a DT8824 on the network.
//!
//! Run with: DT8824_ADDR=192.168.1.50 cargo test --test device -- --test-threads=1
//!
//! These tests MUST run single-threaded (--test-threads=1) because they share
//! one instrument. Tests are skipped if DT8824_ADDR is not set or the
//! instrument does not answer.

use dt8824::*;

fn open_device() -> Option<Dt8824> {
    let addr = std::env::var("DT8824_ADDR").ok()?;
    match Dt8824::open(&addr) {
        Ok(dev) => Some(dev),
        Err(e) => {
            eprintln!("No DT8824 at {addr} ({e}), skipping integration tests");
            None
        }
    }
}

macro_rules! require_device {
    () => {
        match open_device() {
            Some(dev) => dev,
            None => return,
        }
    };
}

#[test]
fn identity() {
    let adc = require_device!();
    let id = adc.identity();
    assert_eq!(id.manufacturer, "Data Translation");
    assert_eq!(id.model, "DT8824");
    println!("Serial: {}, FW: {}", id.serial, id.firmware);
}

#[test]
fn frequency_clamps_to_max() {
    let mut adc = require_device!();
    let original = adc.get_frequency().expect("get_frequency failed");

    let s = adc.set_frequency(1e6).expect("set_frequency failed");
    assert_eq!(s.requested, MAX_FREQUENCY);
    assert!(s.clamp.is_some());
    assert!(s.actual <= MAX_FREQUENCY);

    adc.set_frequency(original).expect("restore frequency failed");
}

#[test]
fn frequency_rounding_is_cached() {
    let mut adc = require_device!();
    let s = adc.set_frequency(1000.0).expect("set_frequency failed");
    assert!(s.clamp.is_none());
    assert_eq!(adc.frequency(), s.actual);
    println!("Requested 1000 Hz, instrument chose {} Hz", s.actual);
}

#[test]
fn channels_roundtrip() {
    let mut adc = require_device!();
    let original = adc.get_channels().expect("get_channels failed");

    adc.set_channels([true, false, true, false]).expect("set_channels failed");
    assert_eq!(adc.get_channels().expect("readback failed"), [true, false, true, false]);

    adc.set_channels(original).expect("restore channels failed");
}

#[test]
fn gain_roundtrip() {
    let mut adc = require_device!();
    let original = adc.get_gain().expect("get_gain failed");

    let set = adc.set_gain([1, 12, 16, 40]).expect("set_gain failed");
    assert_eq!(set, [GainCode::X1, GainCode::X8, GainCode::X16, GainCode::X32]);
    assert_eq!(adc.get_gain().expect("readback failed"), set);

    adc.set_gain(original.map(GainCode::value)).expect("restore gain failed");
}

#[test]
fn buffer_mode_roundtrip() {
    let mut adc = require_device!();
    let original = adc.get_buffer_mode().expect("get_buffer_mode failed");

    for mode in [BufferMode::NoWrap, BufferMode::Wrap] {
        adc.set_buffer_mode(mode).expect("set_buffer_mode failed");
        assert_eq!(adc.get_buffer_mode().expect("readback failed"), mode);
    }

    adc.set_buffer_mode(original).expect("restore buffer mode failed");
}

#[test]
fn status_register() {
    let mut adc = require_device!();
    let bits = adc.get_status().expect("get_status failed");
    println!("Status: {bits:?}");
}

#[test]
fn fetch_series_exact_count() {
    let mut adc = require_device!();
    adc.set_channels([true, false, false, false]).expect("set_channels failed");
    adc.set_frequency(1000.0).expect("set_frequency failed");

    let data = adc.fetch_series(Some(50)).expect("fetch_series failed");
    assert_eq!(data.len(), 50);
    assert_eq!(adc.state(), AcquisitionState::Running);

    adc.stop().expect("stop failed");
}

#[test]
fn fetch_mean_is_finite() {
    let mut adc = require_device!();
    let mean = adc.fetch_mean(Some(10)).expect("fetch_mean failed");
    assert!(mean.is_finite());
    adc.stop().expect("stop failed");
}

#[test]
fn stream_advances_cursor() {
    let mut adc = require_device!();
    adc.set_frequency(1000.0).expect("set_frequency failed");

    let mut total = 0u64;
    for _ in 0..5 {
        let block = adc.stream_next().expect("stream_next failed");
        assert!(!block.is_empty());
        total += block.len() as u64;
    }
    assert_eq!(adc.cursor().samples_consumed, total);
    assert!(adc.cursor().poll_count >= 5);

    adc.stream_stop().expect("stream_stop failed");
    assert_eq!(adc.cursor(), StreamCursor::default());
    assert_eq!(adc.state(), AcquisitionState::Idle);
}

#[test]
fn stop_is_safe() {
    let mut adc = require_device!();
    // stop() should not fail even when nothing is running
    adc.stop().expect("stop failed");
    let _ = adc.get_status().expect("get_status after stop failed");
}
