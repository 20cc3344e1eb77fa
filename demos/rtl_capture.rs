//! Stream samples from an RTL-SDR dongle into a raw f32 file.
//!
//! Usage:
//!   cargo run --example rtl_capture -- -f 100000000 -r 2400000 -g 0.5 -d 5 -o samples.f32

use std::fs::File;
use std::io::{BufWriter, Write};
use std::process::exit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sdrtap::{CaptureSource, RtlSdrSource, SampleSink};

struct Args {
    spec: String,
    freq_hz: u32,
    rate_hz: u32,
    gain: f32,
    duration_secs: u64,
    output: Option<String>,
}

fn usage() -> ! {
    eprintln!(
        "usage: rtl_capture [-a device] [-f freq_hz] [-r rate_hz] [-g gain01] [-d seconds] [-o out.f32]"
    );
    exit(1);
}

fn parse_args() -> Args {
    let mut args = Args {
        spec: "0".to_string(),
        freq_hz: 100_000_000,
        rate_hz: 2_400_000,
        gain: 0.5,
        duration_secs: 5,
        output: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        let value = it.next().unwrap_or_else(|| usage());
        match flag.as_str() {
            "-a" => args.spec = value,
            "-f" => args.freq_hz = value.parse().unwrap_or_else(|_| usage()),
            "-r" => args.rate_hz = value.parse().unwrap_or_else(|_| usage()),
            "-g" => args.gain = value.parse().unwrap_or_else(|_| usage()),
            "-d" => args.duration_secs = value.parse().unwrap_or_else(|_| usage()),
            "-o" => args.output = Some(value),
            _ => usage(),
        }
    }
    args
}

struct FileTap {
    out: Option<BufWriter<File>>,
    total: Arc<AtomicU64>,
}

impl SampleSink for FileTap {
    fn samples(&mut self, block: &[f32]) {
        self.total.fetch_add(block.len() as u64, Ordering::Relaxed);
        let Some(out) = self.out.as_mut() else { return };
        let mut failed = false;
        for &sample in block {
            if out.write_all(&sample.to_le_bytes()).is_err() {
                failed = true;
                break;
            }
        }
        if failed {
            eprintln!("write failed, discarding further samples");
            self.out = None;
        }
    }

    fn stream_fault(&mut self, observed_len: usize) {
        eprintln!("stream fault: vendor delivered {} bytes", observed_len);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let source: Arc<RtlSdrSource> = Arc::new(RtlSdrSource::new());
    source.init(&format!("args {} rate {}", args.spec, args.rate_hz))?;
    source.set_center_freq(args.freq_hz)?;
    source.set_gain(args.gain)?;
    println!(
        "{}: capturing at {} Hz, {} sps",
        source.name(),
        args.freq_hz,
        source.sample_rate()
    );

    let out = match args.output.as_deref() {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };
    let total = Arc::new(AtomicU64::new(0));

    let control = Arc::clone(&source);
    let seconds = args.duration_secs;
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(seconds));
        let _ = control.stop();
    });

    source.start_streaming(Box::new(FileTap {
        out,
        total: Arc::clone(&total),
    }))?;

    println!("captured {} samples", total.load(Ordering::Relaxed));
    Ok(())
}

fn main() {
    let args = parse_args();
    if let Err(err) = run(&args) {
        eprintln!("rtl_capture: {}", err);
        exit(1);
    }
}
