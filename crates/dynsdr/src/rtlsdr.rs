//! librtlsdr bindings: device lookup, tuner control, and the blocking
//! async-read capture loop run on a dedicated reader thread.

use std::os::raw::{c_char, c_int, c_uchar, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{vendor_check, Error, Result};
use crate::{load_first, BlockSink};

/// Library names tried in order.
const LIB_NAMES: &[&str] = &[
    "librtlsdr.so.2",
    "librtlsdr.so.0",
    "librtlsdr.so",
    "librtlsdr.dylib",
    "rtlsdr.dll",
];

/// Default number of bytes per delivered block (librtlsdr wants a multiple
/// of 512).
pub const DEFAULT_TRANSFER_LEN: usize = 16 * 16384;

type ReadAsyncCb = unsafe extern "C" fn(buf: *mut c_uchar, len: u32, ctx: *mut c_void);

/// Resolved librtlsdr entry points.
struct Api {
    _lib: &'static libloading::Library,
    get_device_count: unsafe extern "C" fn() -> u32,
    get_device_usb_strings:
        unsafe extern "C" fn(u32, *mut c_char, *mut c_char, *mut c_char) -> c_int,
    get_device_name: unsafe extern "C" fn(u32) -> *const c_char,
    open: unsafe extern "C" fn(*mut *mut c_void, u32) -> c_int,
    close: unsafe extern "C" fn(*mut c_void) -> c_int,
    set_center_freq: unsafe extern "C" fn(*mut c_void, u32) -> c_int,
    set_sample_rate: unsafe extern "C" fn(*mut c_void, u32) -> c_int,
    get_sample_rate: unsafe extern "C" fn(*mut c_void) -> u32,
    set_tuner_gain_mode: unsafe extern "C" fn(*mut c_void, c_int) -> c_int,
    get_tuner_gains: unsafe extern "C" fn(*mut c_void, *mut c_int) -> c_int,
    set_tuner_gain: unsafe extern "C" fn(*mut c_void, c_int) -> c_int,
    set_tuner_bandwidth: unsafe extern "C" fn(*mut c_void, u32) -> c_int,
    reset_buffer: unsafe extern "C" fn(*mut c_void) -> c_int,
    read_async: unsafe extern "C" fn(*mut c_void, ReadAsyncCb, *mut c_void, u32, u32) -> c_int,
    cancel_async: unsafe extern "C" fn(*mut c_void) -> c_int,
}

static API: OnceLock<Option<Api>> = OnceLock::new();

fn api() -> Result<&'static Api> {
    API.get_or_init(Api::load)
        .as_ref()
        .ok_or(Error::MissingLibrary("librtlsdr"))
}

impl Api {
    fn load() -> Option<Self> {
        let lib = load_first(LIB_NAMES)?;
        macro_rules! sym {
            ($name:literal) => {
                match unsafe { lib.get($name) } {
                    Ok(sym) => *sym,
                    Err(err) => {
                        warn!(name = ?$name, %err, "librtlsdr is missing a symbol");
                        return None;
                    }
                }
            };
        }
        Some(Api {
            _lib: lib,
            get_device_count: sym!(b"rtlsdr_get_device_count\0"),
            get_device_usb_strings: sym!(b"rtlsdr_get_device_usb_strings\0"),
            get_device_name: sym!(b"rtlsdr_get_device_name\0"),
            open: sym!(b"rtlsdr_open\0"),
            close: sym!(b"rtlsdr_close\0"),
            set_center_freq: sym!(b"rtlsdr_set_center_freq\0"),
            set_sample_rate: sym!(b"rtlsdr_set_sample_rate\0"),
            get_sample_rate: sym!(b"rtlsdr_get_sample_rate\0"),
            set_tuner_gain_mode: sym!(b"rtlsdr_set_tuner_gain_mode\0"),
            get_tuner_gains: sym!(b"rtlsdr_get_tuner_gains\0"),
            set_tuner_gain: sym!(b"rtlsdr_set_tuner_gain\0"),
            set_tuner_bandwidth: sym!(b"rtlsdr_set_tuner_bandwidth\0"),
            reset_buffer: sym!(b"rtlsdr_reset_buffer\0"),
            read_async: sym!(b"rtlsdr_read_async\0"),
            cancel_async: sym!(b"rtlsdr_cancel_async\0"),
        })
    }
}

/// Device pointer that may be moved to the reader thread. librtlsdr permits
/// control calls (notably `rtlsdr_cancel_async`) from a thread other than
/// the one blocked in `rtlsdr_read_async`.
#[derive(Clone, Copy)]
struct DevPtr(*mut c_void);

unsafe impl Send for DevPtr {}

/// Number of connected dongles.
pub fn device_count() -> Result<u32> {
    let api = api()?;
    Ok(unsafe { (api.get_device_count)() })
}

/// USB descriptor strings `(vendor, product, serial)` for one device index.
pub fn device_strings(index: u32) -> Result<(String, String, String)> {
    let api = api()?;
    let mut vendor = [0 as c_char; 256];
    let mut product = [0 as c_char; 256];
    let mut serial = [0 as c_char; 256];
    let code = unsafe {
        (api.get_device_usb_strings)(
            index,
            vendor.as_mut_ptr(),
            product.as_mut_ptr(),
            serial.as_mut_ptr(),
        )
    };
    vendor_check("rtlsdr_get_device_usb_strings", code)?;
    Ok((
        c_buf_to_string(&vendor),
        c_buf_to_string(&product),
        c_buf_to_string(&serial),
    ))
}

/// Kernel-provided human-readable device name.
pub fn device_name(index: u32) -> String {
    let Ok(api) = api() else {
        return String::new();
    };
    let ptr = unsafe { (api.get_device_name)(index) };
    if ptr.is_null() {
        return String::new();
    }
    unsafe { std::ffi::CStr::from_ptr(ptr) }
        .to_string_lossy()
        .into_owned()
}

fn c_buf_to_string(buf: &[c_char]) -> String {
    let bytes: Vec<u8> = buf
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Resolves a device specifier to an index: a bare number first, then an
/// exact serial match, then a serial prefix, then a serial suffix. Logs the
/// device list it scanned.
pub fn find_device(spec: &str) -> Result<u32> {
    let count = device_count()?;
    if count == 0 {
        return Err(Error::NoDevice("no supported devices found".into()));
    }
    info!(count, "scanning devices");
    let mut serials = Vec::with_capacity(count as usize);
    for index in 0..count {
        let (vendor, product, serial) = device_strings(index)?;
        info!(index, vendor, product, serial, "device");
        serials.push(serial);
    }

    if let Ok(index) = spec.parse::<u32>() {
        if index < count {
            info!(index, name = device_name(index), "using device by index");
            return Ok(index);
        }
    }
    for pass in [str::eq as fn(&str, &str) -> bool, |s, p| s.starts_with(p), |s, p| {
        s.ends_with(p)
    }] {
        if let Some(index) = serials.iter().position(|serial| pass(serial, spec)) {
            let index = index as u32;
            info!(index, name = device_name(index), "using device by serial");
            return Ok(index);
        }
    }
    Err(Error::NoDevice(format!("no device matches {spec:?}")))
}

/// One open RTL-SDR dongle.
///
/// At most one capture runs per handle; the blocking vendor read loop lives
/// on a dedicated reader thread owned by the handle.
pub struct RtlSdrHandle {
    api: &'static Api,
    dev: DevPtr,
    transfer_len: usize,
    capture: Option<CaptureState>,
}

// The device pointer is only ever used for control calls from the owning
// thread plus the documented cross-thread cancel; see `DevPtr`.
unsafe impl Send for RtlSdrHandle {}

struct CaptureState {
    thread: JoinHandle<()>,
    live: Arc<AtomicBool>,
}

/// Trampoline context owned by the reader thread for the duration of the
/// blocking read; dropping it drops the sink.
struct ReadCtx {
    sink: BlockSink,
    dev: DevPtr,
    api: &'static Api,
}

unsafe extern "C" fn read_trampoline(buf: *mut c_uchar, len: u32, ctx: *mut c_void) {
    let ctx = &mut *(ctx as *mut ReadCtx);
    let block = std::slice::from_raw_parts(buf, len as usize);
    if (ctx.sink)(block).is_break() {
        ((ctx.api).cancel_async)(ctx.dev.0);
    }
}

impl RtlSdrHandle {
    /// Opens the dongle at `index`.
    pub fn open(index: u32) -> Result<Self> {
        let api = api()?;
        let mut dev: *mut c_void = ptr::null_mut();
        let code = unsafe { (api.open)(&mut dev, index) };
        vendor_check("rtlsdr_open", code)?;
        debug!(index, "opened rtlsdr device");
        Ok(RtlSdrHandle {
            api,
            dev: DevPtr(dev),
            transfer_len: DEFAULT_TRANSFER_LEN,
            capture: None,
        })
    }

    /// Opens the first device matching `spec` (see [`find_device`]).
    pub fn open_matching(spec: &str) -> Result<Self> {
        Self::open(find_device(spec)?)
    }

    /// Sets the block size for subsequent captures, in bytes.
    pub fn set_transfer_len(&mut self, len: usize) {
        self.transfer_len = len;
    }

    pub fn set_center_freq(&mut self, hz: u32) -> Result<()> {
        let code = unsafe { (self.api.set_center_freq)(self.dev.0, hz) };
        debug!(hz, code, "rtlsdr_set_center_freq");
        vendor_check("rtlsdr_set_center_freq", code)
    }

    pub fn set_sample_rate(&mut self, hz: u32) -> Result<()> {
        let code = unsafe { (self.api.set_sample_rate)(self.dev.0, hz) };
        debug!(hz, code, "rtlsdr_set_sample_rate");
        vendor_check("rtlsdr_set_sample_rate", code)
    }

    /// Sample rate the tuner is actually configured for.
    pub fn sample_rate(&self) -> u32 {
        unsafe { (self.api.get_sample_rate)(self.dev.0) }
    }

    /// `manual = true` selects manual gain mode, `false` automatic.
    pub fn set_tuner_gain_mode(&mut self, manual: bool) -> Result<()> {
        let code = unsafe { (self.api.set_tuner_gain_mode)(self.dev.0, manual as c_int) };
        debug!(manual, code, "rtlsdr_set_tuner_gain_mode");
        vendor_check("rtlsdr_set_tuner_gain_mode", code)
    }

    /// Gains supported by the tuner, in tenths of a dB, in vendor order.
    pub fn tuner_gains(&mut self) -> Result<Vec<i32>> {
        let count = unsafe { (self.api.get_tuner_gains)(self.dev.0, ptr::null_mut()) };
        if count < 0 {
            return Err(Error::vendor("rtlsdr_get_tuner_gains", count));
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut gains = vec![0 as c_int; count as usize];
        let filled = unsafe { (self.api.get_tuner_gains)(self.dev.0, gains.as_mut_ptr()) };
        vendor_check("rtlsdr_get_tuner_gains", filled)?;
        gains.truncate(filled as usize);
        Ok(gains.into_iter().map(|g| g as i32).collect())
    }

    /// Gain in tenths of a dB; only effective in manual gain mode.
    pub fn set_tuner_gain(&mut self, tenth_db: i32) -> Result<()> {
        let code = unsafe { (self.api.set_tuner_gain)(self.dev.0, tenth_db as c_int) };
        debug!(tenth_db, code, "rtlsdr_set_tuner_gain");
        vendor_check("rtlsdr_set_tuner_gain", code)
    }

    /// Tuner filter bandwidth in Hz; `0` selects automatic bandwidth.
    pub fn set_tuner_bandwidth(&mut self, hz: u32) -> Result<()> {
        let code = unsafe { (self.api.set_tuner_bandwidth)(self.dev.0, hz) };
        debug!(hz, code, "rtlsdr_set_tuner_bandwidth");
        vendor_check("rtlsdr_set_tuner_bandwidth", code)
    }

    /// Flushes stale samples buffered in the device before a capture.
    pub fn reset_buffer(&mut self) -> Result<()> {
        let code = unsafe { (self.api.reset_buffer)(self.dev.0) };
        vendor_check("rtlsdr_reset_buffer", code)
    }

    /// Starts the capture loop on a reader thread. Blocks delivered to
    /// `sink` are `transfer_len` bytes of unsigned 8-bit I/Q unless the
    /// device shortens one, which the caller is expected to treat as a
    /// fault. Returns once the loop is running.
    pub fn start_capture(&mut self, sink: BlockSink) -> Result<()> {
        if self.capture.is_some() {
            return Err(Error::CaptureBusy);
        }
        let api = self.api;
        let dev = self.dev;
        let len = self.transfer_len as u32;
        let live = Arc::new(AtomicBool::new(true));
        let thread_live = Arc::clone(&live);
        let thread = std::thread::Builder::new()
            .name("rtlsdr-read".into())
            .spawn(move || {
                let mut ctx = ReadCtx { sink, dev, api };
                let code = unsafe {
                    (api.read_async)(
                        dev.0,
                        read_trampoline,
                        &mut ctx as *mut ReadCtx as *mut c_void,
                        0,
                        len,
                    )
                };
                debug!(code, "rtlsdr_read_async returned");
                thread_live.store(false, Ordering::Release);
            })?;
        self.capture = Some(CaptureState { thread, live });
        Ok(())
    }

    /// Whether the capture loop is still running.
    pub fn is_capturing(&self) -> bool {
        self.capture
            .as_ref()
            .is_some_and(|c| c.live.load(Ordering::Acquire))
    }

    /// Cancels the capture loop and waits for the reader thread to finish.
    /// A no-op when no capture is active.
    pub fn stop_capture(&mut self) -> Result<()> {
        let Some(state) = self.capture.take() else {
            return Ok(());
        };
        // The vendor reports a negative code whenever the loop is not in
        // its running state. Usually that means the delivery callback
        // already canceled it on a sink break, or the loop returned on its
        // own; either way the reader thread is on its way out and the join
        // is bounded. A stop can also land before the reader has entered
        // the vendor loop at all, so keep canceling while the thread is
        // alive: once the loop is actually running, a cancel sticks.
        let mut code = unsafe { (self.api.cancel_async)(self.dev.0) };
        while code < 0 && state.live.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(2));
            if state.live.load(Ordering::Acquire) {
                code = unsafe { (self.api.cancel_async)(self.dev.0) };
            }
        }
        debug!(code, "rtlsdr_cancel_async");
        if state.thread.join().is_err() {
            warn!("rtlsdr reader thread panicked");
        }
        Ok(())
    }
}

impl Drop for RtlSdrHandle {
    fn drop(&mut self) {
        if let Err(err) = self.stop_capture() {
            warn!(%err, "stopping capture during drop");
        }
        let code = unsafe { (self.api.close)(self.dev.0) };
        debug!(code, "rtlsdr_close");
    }
}
