//! Consume a wideband capture as an async stream, printing per-block power.
//!
//! The trailing arguments form the device configuration string:
//!   cargo run --example async_tap -- rate 8000000 amp off

use std::sync::Arc;

use futures::StreamExt;
use sdrtap::{CaptureSource, HackrfSource, SampleStream};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = std::env::args().skip(1).collect::<Vec<_>>().join(" ");

    let source: Arc<HackrfSource> = Arc::new(HackrfSource::new());
    source.init(&config)?;
    source.set_gain(0.6)?;
    println!("{}: {} sps", source.name(), source.sample_rate());

    let mut stream = SampleStream::new(source);
    let mut blocks = 0u32;
    while let Some(item) = stream.next().await {
        let block = item?;
        let power: f32 = block.iter().map(|s| s * s).sum::<f32>() / block.len() as f32;
        println!("block {:>4}: mean power {:.6}", blocks, power);
        blocks += 1;
        if blocks == 100 {
            stream.stop();
        }
    }
    Ok(())
}
