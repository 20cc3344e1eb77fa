//! Integration tests for the asynchronous stream adapter

mod helpers;

use std::sync::Arc;

use futures::StreamExt;
use helpers::{block_of, wait_until, AfterScript, DeviceCall, MockWideband};
use sdrtap::{hackrf, HackrfSource, SampleStream};

#[tokio::test]
async fn test_stream_yields_blocks_then_ends() {
    let len = hackrf::TRANSFER_LEN;
    let mock = MockWideband::new(
        vec![block_of(len, 0x80), block_of(len, 0x00)],
        AfterScript::EndStream,
    );
    let source = Arc::new(HackrfSource::with_device(mock, "").unwrap());

    let mut stream = SampleStream::new(source);
    let first = stream.next().await.expect("first block").expect("no fault");
    assert_eq!(first.len(), len);
    assert_eq!(first[0], -1.0);
    let second = stream.next().await.expect("second block").expect("no fault");
    assert_eq!(second[0], 0.0);
    assert!(
        stream.next().await.is_none(),
        "stream must end once the capture does"
    );
}

#[tokio::test]
async fn test_stream_surfaces_fault_as_final_item() {
    let mock = MockWideband::new(vec![block_of(16, 0x00)], AfterScript::EndStream);
    let source = Arc::new(HackrfSource::with_device(mock, "").unwrap());

    let mut stream = SampleStream::new(source);
    let item = stream.next().await.expect("the fault surfaces as an item");
    let err = item.expect_err("a malformed transfer must be an Err item");
    assert!(err.to_string().contains("16"));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_start_failure_surfaces_as_an_item() {
    // No device installed: the underlying streaming call fails outright.
    let source = Arc::new(HackrfSource::<MockWideband>::new());
    let mut stream = SampleStream::new(source);
    let item = stream.next().await.expect("the error surfaces as an item");
    assert!(item.is_err());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_stop_finishes_the_stream() {
    let len = hackrf::TRANSFER_LEN;
    let mock = MockWideband::new(vec![block_of(len, 0x40)], AfterScript::HoldOpen);
    let calls = mock.calls();
    let source = Arc::new(HackrfSource::with_device(mock, "").unwrap());

    let mut stream = SampleStream::new(source);
    let first = stream.next().await.expect("first block").expect("no fault");
    assert_eq!(first.len(), len);

    stream.stop();
    while let Some(item) = stream.next().await {
        item.expect("winding down must not produce faults");
    }

    wait_until("vendor stop", || {
        calls.lock().unwrap().contains(&DeviceCall::StopCapture)
    });
}
