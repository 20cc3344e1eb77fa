//! Capture raw signed 8-bit I/Q bytes from a HackRF to a file.
//!
//! ```sh
//! # One second at 100 MHz, 10 Msps
//! cargo run --example hackrf_capture -- -f 100000000 -r 10000000 -d 1 -o samples.iq
//! ```

use std::env;
use std::fs::File;
use std::io::Write;
use std::ops::ControlFlow;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Args {
    freq_hz: u64,
    rate_hz: f64,
    duration_secs: f64,
    output: String,
}

fn usage() -> ! {
    eprintln!("usage: hackrf_capture -f <hz> [-r <hz>] [-d <secs>] [-o <file>]");
    process::exit(2);
}

fn parse_args() -> Args {
    let mut args = Args {
        freq_hz: 0,
        rate_hz: 10_000_000.0,
        duration_secs: 1.0,
        output: "samples.iq".into(),
    };
    let argv: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "-f" | "--freq" => {
                i += 1;
                args.freq_hz = argv.get(i).and_then(|v| v.parse().ok()).unwrap_or_else(|| usage());
            }
            "-r" | "--rate" => {
                i += 1;
                args.rate_hz = argv.get(i).and_then(|v| v.parse().ok()).unwrap_or_else(|| usage());
            }
            "-d" | "--duration" => {
                i += 1;
                args.duration_secs = argv.get(i).and_then(|v| v.parse().ok()).unwrap_or_else(|| usage());
            }
            "-o" | "--output" => {
                i += 1;
                args.output = argv.get(i).cloned().unwrap_or_else(|| usage());
            }
            _ => usage(),
        }
        i += 1;
    }
    if args.freq_hz == 0 {
        usage();
    }
    args
}

fn run(args: &Args) -> Result<u64, Box<dyn std::error::Error>> {
    let mut dev = dynsdr::HackrfHandle::open(None)?;
    dev.set_sample_rate(args.rate_hz)?;
    dev.set_freq(args.freq_hz)?;

    let mut out = File::create(&args.output)?;
    let written = Arc::new(AtomicU64::new(0));
    let written_in_sink = Arc::clone(&written);
    let deadline = Instant::now() + Duration::from_secs_f64(args.duration_secs);

    dev.start_capture(Box::new(move |block: &[u8]| {
        if out.write_all(block).is_err() {
            return ControlFlow::Break(());
        }
        written_in_sink.fetch_add(block.len() as u64, Ordering::Relaxed);
        if Instant::now() >= deadline {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }))?;

    while dev.is_capturing() && Instant::now() < deadline + Duration::from_secs(2) {
        std::thread::sleep(Duration::from_millis(50));
    }
    dev.stop_capture()?;
    Ok(written.load(Ordering::Relaxed))
}

fn main() {
    let args = parse_args();
    eprintln!(
        "capturing {}s at {} Hz, {} samples/s -> {}",
        args.duration_secs, args.freq_hz, args.rate_hz, args.output
    );
    match run(&args) {
        Ok(bytes) => eprintln!("wrote {bytes} bytes"),
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(1);
        }
    }
}
