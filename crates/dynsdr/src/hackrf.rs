//! libhackrf bindings: board control plus the vendor-threaded receive loop.
//!
//! libhackrf runs its own USB transfer thread and invokes the receive
//! callback from there; a nonzero callback return ends the stream. That
//! convention is surfaced here as the [`BlockSink`] control-flow verdict.

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::error::{vendor_check, Error, Result};
use crate::{load_first, BlockSink};

const LIB_NAMES: &[&str] = &[
    "libhackrf.so.0",
    "libhackrf.so",
    "libhackrf.dylib",
    "hackrf.dll",
];

const HACKRF_TRUE: c_int = 1;

/// Bytes per receive transfer as configured by libhackrf.
pub const TRANSFER_LEN: usize = 262144;

/// Mirror of libhackrf's `hackrf_transfer`.
#[repr(C)]
struct Transfer {
    device: *mut c_void,
    buffer: *mut u8,
    buffer_length: c_int,
    valid_length: c_int,
    rx_ctx: *mut c_void,
    tx_ctx: *mut c_void,
}

type RxCallback = unsafe extern "C" fn(*mut Transfer) -> c_int;

/// Resolved libhackrf entry points; `hackrf_init` has already run.
struct Api {
    _lib: &'static libloading::Library,
    open: unsafe extern "C" fn(*mut *mut c_void) -> c_int,
    open_by_serial: unsafe extern "C" fn(*const c_char, *mut *mut c_void) -> c_int,
    close: unsafe extern "C" fn(*mut c_void) -> c_int,
    set_sample_rate: unsafe extern "C" fn(*mut c_void, f64) -> c_int,
    set_baseband_filter_bandwidth: unsafe extern "C" fn(*mut c_void, u32) -> c_int,
    set_hw_sync_mode: unsafe extern "C" fn(*mut c_void, u8) -> c_int,
    set_amp_enable: unsafe extern "C" fn(*mut c_void, u8) -> c_int,
    set_lna_gain: unsafe extern "C" fn(*mut c_void, u32) -> c_int,
    set_vga_gain: unsafe extern "C" fn(*mut c_void, u32) -> c_int,
    set_freq: unsafe extern "C" fn(*mut c_void, u64) -> c_int,
    start_rx: unsafe extern "C" fn(*mut c_void, RxCallback, *mut c_void) -> c_int,
    stop_rx: unsafe extern "C" fn(*mut c_void) -> c_int,
    is_streaming: unsafe extern "C" fn(*mut c_void) -> c_int,
}

static API: OnceLock<Option<Api>> = OnceLock::new();

fn api() -> Result<&'static Api> {
    API.get_or_init(Api::load)
        .as_ref()
        .ok_or(Error::MissingLibrary("libhackrf"))
}

impl Api {
    fn load() -> Option<Self> {
        let lib = load_first(LIB_NAMES)?;
        macro_rules! sym {
            ($name:literal) => {
                match unsafe { lib.get($name) } {
                    Ok(sym) => *sym,
                    Err(err) => {
                        warn!(name = ?$name, %err, "libhackrf is missing a symbol");
                        return None;
                    }
                }
            };
        }
        let init: unsafe extern "C" fn() -> c_int = sym!(b"hackrf_init\0");
        let code = unsafe { init() };
        if code != 0 {
            warn!(code, "hackrf_init failed");
            return None;
        }
        Some(Api {
            _lib: lib,
            open: sym!(b"hackrf_open\0"),
            open_by_serial: sym!(b"hackrf_open_by_serial\0"),
            close: sym!(b"hackrf_close\0"),
            set_sample_rate: sym!(b"hackrf_set_sample_rate\0"),
            set_baseband_filter_bandwidth: sym!(b"hackrf_set_baseband_filter_bandwidth\0"),
            set_hw_sync_mode: sym!(b"hackrf_set_hw_sync_mode\0"),
            set_amp_enable: sym!(b"hackrf_set_amp_enable\0"),
            set_lna_gain: sym!(b"hackrf_set_lna_gain\0"),
            set_vga_gain: sym!(b"hackrf_set_vga_gain\0"),
            set_freq: sym!(b"hackrf_set_freq\0"),
            start_rx: sym!(b"hackrf_start_rx\0"),
            stop_rx: sym!(b"hackrf_stop_rx\0"),
            is_streaming: sym!(b"hackrf_is_streaming\0"),
        })
    }
}

struct RxCtx {
    sink: BlockSink,
}

unsafe extern "C" fn rx_trampoline(transfer: *mut Transfer) -> c_int {
    let transfer = &mut *transfer;
    let ctx = &mut *(transfer.rx_ctx as *mut RxCtx);
    let block = std::slice::from_raw_parts(transfer.buffer, transfer.valid_length as usize);
    match (ctx.sink)(block) {
        std::ops::ControlFlow::Continue(()) => 0,
        std::ops::ControlFlow::Break(()) => 1,
    }
}

/// One open HackRF board.
pub struct HackrfHandle {
    api: &'static Api,
    dev: *mut c_void,
    // Capture context handed to libhackrf by address; kept boxed here so the
    // pointer stays valid while the vendor thread delivers, and dropped only
    // after the stream has been stopped.
    capture: Option<Box<RxCtx>>,
}

// Control calls may come from whichever thread owns the handle; only
// libhackrf's own transfer thread touches the capture context.
unsafe impl Send for HackrfHandle {}

impl HackrfHandle {
    /// Opens a board by serial number; `None` or an empty serial opens the
    /// first one found.
    pub fn open(serial: Option<&str>) -> Result<Self> {
        let api = api()?;
        let mut dev: *mut c_void = ptr::null_mut();
        let code = match serial {
            Some(s) if !s.is_empty() => {
                let serial = CString::new(s)
                    .map_err(|_| Error::NoDevice(format!("bad serial {s:?}")))?;
                unsafe { (api.open_by_serial)(serial.as_ptr(), &mut dev) }
            }
            _ => unsafe { (api.open)(&mut dev) },
        };
        vendor_check("hackrf_open", code)?;
        debug!(?serial, "opened hackrf device");
        Ok(HackrfHandle {
            api,
            dev,
            capture: None,
        })
    }

    pub fn set_sample_rate(&mut self, hz: f64) -> Result<()> {
        let code = unsafe { (self.api.set_sample_rate)(self.dev, hz) };
        debug!(hz, code, "hackrf_set_sample_rate");
        vendor_check("hackrf_set_sample_rate", code)
    }

    pub fn set_baseband_filter(&mut self, hz: u32) -> Result<()> {
        let code = unsafe { (self.api.set_baseband_filter_bandwidth)(self.dev, hz) };
        debug!(hz, code, "hackrf_set_baseband_filter_bandwidth");
        vendor_check("hackrf_set_baseband_filter_bandwidth", code)
    }

    /// Hardware sync is a trigger-input mode; captures here run free.
    pub fn set_hw_sync_mode(&mut self, enabled: bool) -> Result<()> {
        let code = unsafe { (self.api.set_hw_sync_mode)(self.dev, enabled as u8) };
        vendor_check("hackrf_set_hw_sync_mode", code)
    }

    pub fn set_amp_enable(&mut self, enabled: bool) -> Result<()> {
        let code = unsafe { (self.api.set_amp_enable)(self.dev, enabled as u8) };
        debug!(enabled, code, "hackrf_set_amp_enable");
        vendor_check("hackrf_set_amp_enable", code)
    }

    /// LNA gain in dB, 0–40 in 8 dB steps.
    pub fn set_lna_gain(&mut self, db: u32) -> Result<()> {
        let code = unsafe { (self.api.set_lna_gain)(self.dev, db) };
        debug!(db, code, "hackrf_set_lna_gain");
        vendor_check("hackrf_set_lna_gain", code)
    }

    /// VGA (baseband) gain in dB, 0–62 in 2 dB steps.
    pub fn set_vga_gain(&mut self, db: u32) -> Result<()> {
        let code = unsafe { (self.api.set_vga_gain)(self.dev, db) };
        debug!(db, code, "hackrf_set_vga_gain");
        vendor_check("hackrf_set_vga_gain", code)
    }

    pub fn set_freq(&mut self, hz: u64) -> Result<()> {
        let code = unsafe { (self.api.set_freq)(self.dev, hz) };
        debug!(hz, code, "hackrf_set_freq");
        vendor_check("hackrf_set_freq", code)
    }

    /// Starts the vendor receive loop. `sink` is invoked on libhackrf's
    /// transfer thread with blocks of signed 8-bit I/Q bytes, nominally
    /// [`TRANSFER_LEN`] long. Returns once the stream is running.
    pub fn start_capture(&mut self, sink: BlockSink) -> Result<()> {
        if self.capture.is_some() {
            return Err(Error::CaptureBusy);
        }
        let mut ctx = Box::new(RxCtx { sink });
        let code = unsafe {
            (self.api.start_rx)(
                self.dev,
                rx_trampoline,
                &mut *ctx as *mut RxCtx as *mut c_void,
            )
        };
        vendor_check("hackrf_start_rx", code)?;
        self.capture = Some(ctx);
        Ok(())
    }

    /// Whether the vendor still reports the stream as live.
    pub fn is_capturing(&self) -> bool {
        self.capture.is_some() && unsafe { (self.api.is_streaming)(self.dev) } == HACKRF_TRUE
    }

    /// Stops the receive loop. The capture context (and with it the sink)
    /// is released after the vendor stop call returns, when libhackrf no
    /// longer delivers.
    pub fn stop_capture(&mut self) -> Result<()> {
        let Some(ctx) = self.capture.take() else {
            return Ok(());
        };
        let code = unsafe { (self.api.stop_rx)(self.dev) };
        debug!(code, "hackrf_stop_rx");
        drop(ctx);
        vendor_check("hackrf_stop_rx", code)
    }
}

impl Drop for HackrfHandle {
    fn drop(&mut self) {
        if let Err(err) = self.stop_capture() {
            warn!(%err, "stopping capture during drop");
        }
        let code = unsafe { (self.api.close)(self.dev) };
        debug!(code, "hackrf_close");
    }
}
