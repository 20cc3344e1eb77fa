//! Shared streaming machinery
//!
//! A streaming call is the same shape for every backend: raise the run
//! flag, hand the vendor a [`SampleBridge`] wrapped as its raw block sink,
//! park until the flag clears or the vendor loop dies, then issue the
//! symmetric vendor stop. This module holds the pieces common to both
//! backends; the per-device wiring lives with each session.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use dynsdr::BlockSink;
use tracing::{trace, warn};

use crate::convert::{convert_block, SampleLaw};
use crate::error::Result;
use crate::SampleSink;

/// How often the parked controller re-checks that the vendor loop is
/// still alive, in case the stream dies without anyone clearing the flag.
const LIVENESS_PERIOD: Duration = Duration::from_millis(100);

/// Vendor-side capture transport: one raw capture loop per device.
///
/// Implemented by the runtime-loaded driver handles, and by scripted
/// devices in tests. `start_capture` returns once delivery is running;
/// blocks then arrive on a vendor-owned thread until the sink breaks,
/// the loop is cancelled, or the hardware goes away.
pub trait CaptureIo: Send {
    fn start_capture(&mut self, sink: BlockSink) -> Result<()>;

    /// True while the vendor loop is still delivering (or able to).
    fn is_capturing(&self) -> bool;

    /// Cancels the loop and waits for it to wind down. Idempotent.
    fn stop_capture(&mut self) -> Result<()>;
}

#[derive(Debug)]
struct FlagInner {
    up: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

/// Run/stop signal shared between a streaming session and the vendor
/// delivery thread.
///
/// The flag itself is an atomic so the per-block gate never takes a lock;
/// the mutex/condvar pair only serializes clear-versus-wait so a parked
/// controller cannot miss the wakeup.
#[derive(Clone, Debug)]
pub struct RunFlag {
    inner: Arc<FlagInner>,
}

impl RunFlag {
    pub fn new() -> Self {
        RunFlag {
            inner: Arc::new(FlagInner {
                up: AtomicBool::new(false),
                lock: Mutex::new(()),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn is_up(&self) -> bool {
        self.inner.up.load(Ordering::Acquire)
    }

    pub fn raise(&self) {
        let _held = self.guard();
        self.inner.up.store(true, Ordering::Release);
    }

    /// Lowers the flag and wakes every parked waiter. Idempotent.
    pub fn clear(&self) {
        let _held = self.guard();
        self.inner.up.store(false, Ordering::Release);
        self.inner.cond.notify_all();
    }

    /// Parks until the flag clears or `period` elapses; returns whether
    /// the flag is still up.
    pub fn wait_while_up(&self, period: Duration) -> bool {
        let held = self.guard();
        if !self.is_up() {
            return false;
        }
        let _ = self
            .inner
            .cond
            .wait_timeout(held, period)
            .unwrap_or_else(PoisonError::into_inner);
        self.is_up()
    }

    /// Parks the controller until the flag clears or `still_live` reports
    /// the vendor loop gone. The timeout bounds how long an unsignalled
    /// death can go unnoticed.
    pub fn await_shutdown(&self, still_live: impl Fn() -> bool) {
        while self.is_up() && still_live() {
            self.wait_while_up(LIVENESS_PERIOD);
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.inner
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        RunFlag::new()
    }
}

/// Per-streaming-call delivery context.
///
/// Owns the scratch buffer for the life of one capture loop: gates each
/// vendor block on the run flag, polices its length, converts it, and
/// forwards the floats to the application sink. Dropped by the transport
/// when the loop ends, which releases the scratch and wakes the parked
/// controller.
pub struct SampleBridge {
    flag: RunFlag,
    law: SampleLaw,
    expected_len: usize,
    scratch: Vec<f32>,
    sink: Box<dyn SampleSink>,
}

impl SampleBridge {
    pub fn new(
        flag: RunFlag,
        law: SampleLaw,
        expected_len: usize,
        sink: Box<dyn SampleSink>,
    ) -> Self {
        SampleBridge {
            flag,
            law,
            expected_len,
            scratch: vec![0.0; expected_len],
            sink,
        }
    }

    /// Handles one vendor block; `Break` ends the capture loop.
    pub fn deliver(&mut self, raw: &[u8]) -> ControlFlow<()> {
        if !self.flag.is_up() {
            // Deliveries can race the stop by one block; drop it unseen.
            trace!("block after stop discarded");
            return ControlFlow::Break(());
        }
        if raw.len() != self.expected_len {
            warn!(
                observed = raw.len(),
                expected = self.expected_len,
                "malformed transfer, ending stream"
            );
            self.sink.stream_fault(raw.len());
            self.flag.clear();
            return ControlFlow::Break(());
        }
        convert_block(self.law, raw, &mut self.scratch);
        self.sink.samples(&self.scratch);
        ControlFlow::Continue(())
    }

    /// Boxes the bridge into the raw sink shape the transports take.
    pub fn into_sink(self) -> BlockSink {
        let mut bridge = self;
        Box::new(move |raw| bridge.deliver(raw))
    }
}

impl Drop for SampleBridge {
    fn drop(&mut self) {
        // The loop is over one way or another; wake the controller.
        self.flag.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[derive(Default)]
    struct Recorder {
        blocks: Vec<Vec<f32>>,
        faults: Vec<usize>,
    }

    struct SharedRecorder(Arc<Mutex<Recorder>>);

    impl SampleSink for SharedRecorder {
        fn samples(&mut self, block: &[f32]) {
            self.0.lock().unwrap().blocks.push(block.to_vec());
        }

        fn stream_fault(&mut self, observed_len: usize) {
            self.0.lock().unwrap().faults.push(observed_len);
        }
    }

    fn bridge_with_recorder(
        flag: &RunFlag,
        expected_len: usize,
    ) -> (SampleBridge, Arc<Mutex<Recorder>>) {
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let bridge = SampleBridge::new(
            flag.clone(),
            SampleLaw::UnsignedOffset,
            expected_len,
            Box::new(SharedRecorder(Arc::clone(&recorder))),
        );
        (bridge, recorder)
    }

    #[test]
    fn test_flag_starts_down() {
        assert!(!RunFlag::new().is_up());
    }

    #[test]
    fn test_clear_wakes_parked_waiter() {
        let flag = RunFlag::new();
        flag.raise();
        let waiter = flag.clone();
        let start = Instant::now();
        let handle = std::thread::spawn(move || {
            waiter.await_shutdown(|| true);
            start.elapsed()
        });
        std::thread::sleep(Duration::from_millis(20));
        flag.clear();
        let waited = handle.join().unwrap();
        assert!(waited < Duration::from_secs(2), "waiter stuck: {:?}", waited);
    }

    #[test]
    fn test_await_shutdown_notices_dead_loop() {
        let flag = RunFlag::new();
        flag.raise();
        let polls = AtomicUsize::new(0);
        flag.await_shutdown(|| polls.fetch_add(1, Ordering::SeqCst) < 2);
        assert!(flag.is_up(), "liveness exit must not clear the flag itself");
        flag.clear();
    }

    #[test]
    fn test_bridge_converts_and_forwards() {
        let flag = RunFlag::new();
        flag.raise();
        let (mut bridge, recorder) = bridge_with_recorder(&flag, 4);
        let flow = bridge.deliver(&[0x00, 0x80, 0xff, 0x80]);
        assert!(matches!(flow, ControlFlow::Continue(())));
        let state = recorder.lock().unwrap();
        assert_eq!(state.blocks.len(), 1);
        assert_eq!(state.blocks[0], vec![-1.0, 0.0, 127.0 / 128.0, 0.0]);
        assert!(state.faults.is_empty());
    }

    #[test]
    fn test_bridge_reports_fault_once_and_stops() {
        let flag = RunFlag::new();
        flag.raise();
        let (mut bridge, recorder) = bridge_with_recorder(&flag, 4);
        let flow = bridge.deliver(&[0x80, 0x80]);
        assert!(matches!(flow, ControlFlow::Break(())));
        assert!(!flag.is_up(), "fault must clear the run flag");
        {
            let state = recorder.lock().unwrap();
            assert_eq!(state.faults, vec![2]);
            assert!(state.blocks.is_empty());
        }
        // A straggler block after the fault is dropped unseen.
        let flow = bridge.deliver(&[0x80; 4]);
        assert!(matches!(flow, ControlFlow::Break(())));
        assert!(recorder.lock().unwrap().blocks.is_empty());
    }

    #[test]
    fn test_bridge_gates_on_cleared_flag() {
        let flag = RunFlag::new();
        let (mut bridge, recorder) = bridge_with_recorder(&flag, 2);
        let flow = bridge.deliver(&[0x80, 0x80]);
        assert!(matches!(flow, ControlFlow::Break(())));
        let state = recorder.lock().unwrap();
        assert!(state.blocks.is_empty());
        assert!(state.faults.is_empty());
    }

    #[test]
    fn test_dropping_the_sink_clears_the_flag() {
        let flag = RunFlag::new();
        flag.raise();
        let (bridge, _recorder) = bridge_with_recorder(&flag, 2);
        drop(bridge.into_sink());
        assert!(!flag.is_up());
    }
}
