//! Test doubles for exercising capture sessions without hardware
//!
//! The mocks implement the same transport traits as the runtime-loaded
//! driver handles: a scripted feeder thread plays back canned raw blocks,
//! and every settings call is recorded so tests can assert on ordering.

// Each test target that includes this module uses a different subset.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use sdrtap::hackrf::WidebandIo;
use sdrtap::rtlsdr::TunerIo;
use sdrtap::stream::CaptureIo;
use sdrtap::{BlockSink, Error, Result, SampleSink};

/// A call a session made against a scripted device, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    Rate(u32),
    BasebandFilter(u32),
    HwSync(bool),
    Amp(bool),
    Lna(u32),
    Vga(u32),
    Freq(u64),
    GainMode { manual: bool },
    Gain(i32),
    GainList,
    Bandwidth(u32),
    ResetBuffer,
    StartCapture,
    StopCapture,
}

/// What the feeder does once the scripted blocks are all delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterScript {
    /// Keep the capture alive until it is cancelled.
    HoldOpen,
    /// End the delivery loop, as a dying device would.
    EndStream,
}

#[derive(Debug)]
struct Feeder {
    thread: JoinHandle<()>,
    live: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

fn spawn_feeder(script: Vec<Vec<u8>>, after: AfterScript, mut sink: BlockSink) -> Feeder {
    let live = Arc::new(AtomicBool::new(true));
    let cancel = Arc::new(AtomicBool::new(false));
    let live_in = Arc::clone(&live);
    let cancel_in = Arc::clone(&cancel);
    let thread = std::thread::spawn(move || {
        let mut broken = false;
        for block in &script {
            if cancel_in.load(Ordering::Acquire) {
                broken = true;
                break;
            }
            if sink(block).is_break() {
                broken = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        if after == AfterScript::HoldOpen && !broken {
            while !cancel_in.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(2));
            }
        }
        live_in.store(false, Ordering::Release);
    });
    Feeder {
        thread,
        live,
        cancel,
    }
}

fn stop_feeder(slot: &mut Option<Feeder>) {
    if let Some(feeder) = slot.take() {
        feeder.cancel.store(true, Ordering::Release);
        let _ = feeder.thread.join();
    }
}

/// Scripted wideband transceiver.
#[derive(Debug)]
pub struct MockWideband {
    calls: Arc<Mutex<Vec<DeviceCall>>>,
    script: Vec<Vec<u8>>,
    after: AfterScript,
    fail_rate: bool,
    feeder: Option<Feeder>,
}

impl MockWideband {
    pub fn new(script: Vec<Vec<u8>>, after: AfterScript) -> Self {
        MockWideband {
            calls: Arc::new(Mutex::new(Vec::new())),
            script,
            after,
            fail_rate: false,
            feeder: None,
        }
    }

    /// A device that refuses every sample rate request.
    pub fn failing_rate() -> Self {
        let mut mock = MockWideband::new(Vec::new(), AfterScript::HoldOpen);
        mock.fail_rate = true;
        mock
    }

    /// Shared handle onto the call log; clone before moving the mock
    /// into a session.
    pub fn calls(&self) -> Arc<Mutex<Vec<DeviceCall>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: DeviceCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Drop for MockWideband {
    fn drop(&mut self) {
        stop_feeder(&mut self.feeder);
    }
}

impl CaptureIo for MockWideband {
    fn start_capture(&mut self, sink: BlockSink) -> Result<()> {
        self.record(DeviceCall::StartCapture);
        if self.feeder.is_some() {
            return Err(Error::device("mock already capturing"));
        }
        self.feeder = Some(spawn_feeder(self.script.clone(), self.after, sink));
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.feeder
            .as_ref()
            .map_or(false, |f| f.live.load(Ordering::Acquire))
    }

    fn stop_capture(&mut self) -> Result<()> {
        self.record(DeviceCall::StopCapture);
        stop_feeder(&mut self.feeder);
        Ok(())
    }
}

impl WidebandIo for MockWideband {
    fn open(_serial: Option<&str>) -> Result<Self> {
        Ok(MockWideband::new(Vec::new(), AfterScript::HoldOpen))
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<()> {
        self.record(DeviceCall::Rate(hz));
        if self.fail_rate {
            return Err(Error::device("mock refuses this rate"));
        }
        Ok(())
    }

    fn set_baseband_filter(&mut self, hz: u32) -> Result<()> {
        self.record(DeviceCall::BasebandFilter(hz));
        Ok(())
    }

    fn set_hw_sync(&mut self, enabled: bool) -> Result<()> {
        self.record(DeviceCall::HwSync(enabled));
        Ok(())
    }

    fn set_amp(&mut self, enabled: bool) -> Result<()> {
        self.record(DeviceCall::Amp(enabled));
        Ok(())
    }

    fn set_lna_gain(&mut self, db: u32) -> Result<()> {
        self.record(DeviceCall::Lna(db));
        Ok(())
    }

    fn set_vga_gain(&mut self, db: u32) -> Result<()> {
        self.record(DeviceCall::Vga(db));
        Ok(())
    }

    fn set_center_freq(&mut self, hz: u64) -> Result<()> {
        self.record(DeviceCall::Freq(hz));
        Ok(())
    }
}

/// Scripted RTL2832U tuner.
pub struct MockTuner {
    calls: Arc<Mutex<Vec<DeviceCall>>>,
    script: Vec<Vec<u8>>,
    after: AfterScript,
    gains: Vec<i32>,
    /// Fixed read-back value; `None` echoes the last requested rate.
    confirmed_rate: Option<u32>,
    last_rate: u32,
    feeder: Option<Feeder>,
}

impl MockTuner {
    pub fn new(script: Vec<Vec<u8>>, after: AfterScript) -> Self {
        MockTuner {
            calls: Arc::new(Mutex::new(Vec::new())),
            script,
            after,
            gains: vec![0, 100, 200, 300, 400],
            confirmed_rate: None,
            last_rate: 0,
            feeder: None,
        }
    }

    /// Replaces the gain table the mock reports. Empty simulates a tuner
    /// with no table.
    pub fn with_gains(mut self, gains: Vec<i32>) -> Self {
        self.gains = gains;
        self
    }

    /// Makes every rate read-back report `hz`, like hardware that rounds
    /// requests to what its clocking can do.
    pub fn with_confirmed_rate(mut self, hz: u32) -> Self {
        self.confirmed_rate = Some(hz);
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<DeviceCall>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: DeviceCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Drop for MockTuner {
    fn drop(&mut self) {
        stop_feeder(&mut self.feeder);
    }
}

impl CaptureIo for MockTuner {
    fn start_capture(&mut self, sink: BlockSink) -> Result<()> {
        self.record(DeviceCall::StartCapture);
        if self.feeder.is_some() {
            return Err(Error::device("mock already capturing"));
        }
        self.feeder = Some(spawn_feeder(self.script.clone(), self.after, sink));
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.feeder
            .as_ref()
            .map_or(false, |f| f.live.load(Ordering::Acquire))
    }

    fn stop_capture(&mut self) -> Result<()> {
        self.record(DeviceCall::StopCapture);
        stop_feeder(&mut self.feeder);
        Ok(())
    }
}

impl TunerIo for MockTuner {
    fn open(_spec: &str) -> Result<Self> {
        Ok(MockTuner::new(Vec::new(), AfterScript::HoldOpen))
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<()> {
        self.record(DeviceCall::Rate(hz));
        self.last_rate = hz;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.confirmed_rate.unwrap_or(self.last_rate)
    }

    fn set_center_freq(&mut self, hz: u32) -> Result<()> {
        self.record(DeviceCall::Freq(hz as u64));
        Ok(())
    }

    fn set_manual_gain_mode(&mut self, manual: bool) -> Result<()> {
        self.record(DeviceCall::GainMode { manual });
        Ok(())
    }

    fn tuner_gains(&mut self) -> Result<Vec<i32>> {
        self.record(DeviceCall::GainList);
        Ok(self.gains.clone())
    }

    fn set_tuner_gain(&mut self, tenth_db: i32) -> Result<()> {
        self.record(DeviceCall::Gain(tenth_db));
        Ok(())
    }

    fn set_tuner_bandwidth(&mut self, hz: u32) -> Result<()> {
        self.record(DeviceCall::Bandwidth(hz));
        Ok(())
    }

    fn reset_buffer(&mut self) -> Result<()> {
        self.record(DeviceCall::ResetBuffer);
        Ok(())
    }
}

/// Everything a stream delivered, for later assertions.
#[derive(Default)]
pub struct StreamLog {
    pub blocks: Vec<Vec<f32>>,
    pub faults: Vec<usize>,
}

impl StreamLog {
    pub fn total_samples(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }
}

struct RecordingSink(Arc<Mutex<StreamLog>>);

impl SampleSink for RecordingSink {
    fn samples(&mut self, block: &[f32]) {
        self.0.lock().unwrap().blocks.push(block.to_vec());
    }

    fn stream_fault(&mut self, observed_len: usize) {
        self.0.lock().unwrap().faults.push(observed_len);
    }
}

/// A sink that records everything, plus the handle to read it back.
pub fn recording_sink() -> (Box<dyn SampleSink>, Arc<Mutex<StreamLog>>) {
    let log = Arc::new(Mutex::new(StreamLog::default()));
    (Box::new(RecordingSink(Arc::clone(&log))), log)
}

/// A raw block of `len` bytes, all `byte`.
pub fn block_of(len: usize, byte: u8) -> Vec<u8> {
    vec![byte; len]
}

/// Polls `cond` every couple of milliseconds until it holds; panics with
/// `what` after five seconds.
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::ControlFlow;

    #[test]
    fn test_feeder_plays_script_then_ends() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&delivered);
        let sink: BlockSink = Box::new(move |raw| {
            seen.lock().unwrap().push(raw.len());
            ControlFlow::Continue(())
        });
        let mut mock = MockWideband::new(
            vec![block_of(8, 0), block_of(4, 1)],
            AfterScript::EndStream,
        );
        mock.start_capture(sink).unwrap();
        wait_until("feeder to finish", || !mock.is_capturing());
        assert_eq!(*delivered.lock().unwrap(), vec![8, 4]);
        mock.stop_capture().unwrap();
    }

    #[test]
    fn test_feeder_stops_when_sink_breaks() {
        let sink: BlockSink = Box::new(|_| ControlFlow::Break(()));
        let mut mock = MockTuner::new(vec![block_of(8, 0); 10], AfterScript::HoldOpen);
        mock.start_capture(sink).unwrap();
        // The break must end the loop even though the mock holds open.
        wait_until("feeder to notice the break", || !mock.is_capturing());
        mock.stop_capture().unwrap();
        let calls = mock.calls();
        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![DeviceCall::StartCapture, DeviceCall::StopCapture]
        );
    }

    #[test]
    fn test_recording_sink_keeps_blocks_and_faults() {
        let (mut sink, log) = recording_sink();
        sink.samples(&[0.25, -0.25]);
        sink.stream_fault(7);
        let log = log.lock().unwrap();
        assert_eq!(log.blocks, vec![vec![0.25, -0.25]]);
        assert_eq!(log.faults, vec![7]);
        assert_eq!(log.total_samples(), 2);
    }
}
