use std::time::Duration;

use dt8824::{BufferMode, Dt8824, SessionConfig};

fn main() -> Result<(), dt8824::Dt8824Error> {
    let addr = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("usage: stream <instrument address>");
        std::process::exit(1);
    });

    let config = SessionConfig {
        poll_interval: Duration::from_millis(5),
        poll_timeout: Some(Duration::from_secs(5)),
        ..SessionConfig::default()
    };
    let mut adc = Dt8824::connect(&addr, config)?;

    let id = adc.identity();
    println!("Model:  {} {}", id.manufacturer, id.model);
    println!("Serial: {}", id.serial);
    println!("FW:     {}", id.firmware);

    // Configure
    let setting = adc.setup_all(500.0, [1, 8, 1, 1], [true, true, false, false], BufferMode::Wrap)?;
    if let Some(clamp) = setting.clamp {
        println!("Note: {clamp}");
    }
    println!("\nClock:  {} Hz", setting.actual);
    for (i, (on, range)) in adc.channels().iter().zip(adc.voltage_ranges()).enumerate() {
        println!("Ch{}:    {} [{} V, {} V]", i + 1, if *on { "on " } else { "off" }, range.min, range.max);
    }

    // One-shot reads
    println!("\nLatest 20: {:?}", adc.fetch_series(Some(20))?);
    println!("Mean of 100: {:.1}", adc.fetch_mean(Some(100))?);
    adc.stop()?;

    // Continuous
    let mut total = 0;
    for _ in 0..10 {
        let block = adc.stream_next()?;
        total += block.len();
        println!("+{:4} samples (cursor {:?})", block.len(), adc.cursor());
    }
    adc.stream_stop()?;
    println!("\nStreamed {total} samples.");

    println!("Status: {:?}", adc.get_status()?);
    adc.close();
    Ok(())
}
