#![doc = include_str!("../readme.md")]

pub mod async_stream;
pub mod config;
pub mod convert;
pub mod error;
pub mod gain;
pub mod hackrf;
pub mod rtlsdr;
pub mod stream;

pub use async_stream::SampleStream;
pub use convert::{SampleLaw, SAMPLE_MAX, SAMPLE_MIN};
pub use dynsdr::BlockSink;
pub use error::{Error, Result, Status};
pub use gain::{GainTable, SteppedGain};
pub use hackrf::HackrfSource;
pub use rtlsdr::RtlSdrSource;
pub use stream::{CaptureIo, RunFlag, SampleBridge};

/**
 * Normalized sample consumer
 */
///
/// Implemented by the application. Both methods are called on the capture
/// thread, so they should hand work off rather than stall the delivery.
pub trait SampleSink: Send {
    /// One block of converted samples, in delivery order. Values lie in
    /// `[-1.0, 127.0/128.0]`. The block is borrowed from a buffer that is
    /// reused for the next delivery.
    fn samples(&mut self, block: &[f32]);

    /// The capture chain delivered a malformed transfer of `observed_len`
    /// raw bytes. The stream is over; nothing further will be delivered.
    fn stream_fault(&mut self, observed_len: usize);
}

/**
 * Capture source contract
 */
///
/// One implementation per hardware family. A session is created idle,
/// opened with [`init`](CaptureSource::init), tuned, streamed, and
/// eventually torn down with [`cleanup`](CaptureSource::cleanup).
///
/// Every method takes `&self`: sessions are made to be shared (typically
/// in an [`std::sync::Arc`]) so that tuning calls and [`stop`](CaptureSource::stop)
/// remain available from other threads while one thread sits inside the
/// blocking [`start_streaming`](CaptureSource::start_streaming) call.
pub trait CaptureSource: Send + Sync {
    /// Human-readable device family name.
    fn name(&self) -> &'static str;

    /// Parses a whitespace `key value` configuration string, opens the
    /// device and applies the bring-up sequence. An unknown key or a
    /// malformed value is a parameter error and nothing is opened.
    fn init(&self, config: &str) -> Result<()>;

    /// Requests a sample rate and returns the rate actually in effect,
    /// which is also what [`sample_rate`](CaptureSource::sample_rate)
    /// reports from now on. While a stream runs the request is ignored
    /// and the running rate is returned.
    fn set_sample_rate(&self, rate: u32) -> Result<u32>;

    /// The current sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Tunes the center frequency, immediately if a stream is running.
    fn set_center_freq(&self, freq: u32) -> Result<()>;

    /// Requests a gain as a normalized float in `[0.0, 1.0]`, quantized
    /// onto the hardware's discrete settings. Out-of-range requests are
    /// clamped. May be called at any time, including mid-stream.
    fn set_gain(&self, gain: f32) -> Result<()>;

    /// Runs the capture, blocking until it ends: by [`stop`](CaptureSource::stop),
    /// by a stream fault, or by the vendor loop dying on its own. Sample
    /// blocks arrive on `sink` from the capture thread. The error, if
    /// any, describes why the capture could not start or shut down
    /// cleanly; a mid-stream fault is reported through the sink instead.
    fn start_streaming(&self, sink: Box<dyn SampleSink>) -> Result<()>;

    /// Signals a running stream to wind down and returns without
    /// waiting. Callable from any thread, idempotent, and always `Ok`,
    /// even when nothing is streaming.
    fn stop(&self) -> Result<()>;

    /// Stops any stream and releases the device. The session can be
    /// re-opened with [`init`](CaptureSource::init) afterwards.
    fn cleanup(&self);
}
