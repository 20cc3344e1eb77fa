//! Runtime-loaded bindings to libhackrf and librtlsdr.
//!
//! # Overview
//!
//! `dynsdr` gives safe handle types over the two vendor SDKs without linking
//! against them: the shared libraries are resolved with `libloading` on first
//! use, so the crate builds and its tests run on machines where neither
//! library is installed. Opening a device on such a machine fails cleanly
//! with [`Error::MissingLibrary`].
//!
//! Each handle owns one open device, exposes the control calls the hardware
//! supports, and runs one capture at a time. Captured blocks are handed to a
//! [`BlockSink`] exactly as the vendor delivered them (raw bytes, vendor
//! timing, vendor thread); interpretation of the bytes is the caller's
//! business.
//!
//! # Example
//!
//! ```no_run
//! use std::ops::ControlFlow;
//!
//! let mut dev = dynsdr::RtlSdrHandle::open(0)?;
//! dev.set_center_freq(100_000_000)?;
//! dev.start_capture(Box::new(|block: &[u8]| {
//!     println!("{} raw bytes", block.len());
//!     ControlFlow::Break(())
//! }))?;
//! # Ok::<(), dynsdr::Error>(())
//! ```

use std::ops::ControlFlow;

use libloading::Library;
use tracing::debug;

pub mod error;
pub mod hackrf;
pub mod rtlsdr;

pub use error::{Error, Result};
pub use hackrf::HackrfHandle;
pub use rtlsdr::RtlSdrHandle;

/// Receives one raw vendor block per delivery, on the capture thread.
///
/// Returning [`ControlFlow::Break`] asks the vendor loop to end; the sink is
/// dropped once the loop has fully stopped.
pub type BlockSink = Box<dyn FnMut(&[u8]) -> ControlFlow<()> + Send>;

/// Loads the first resolvable library name and leaks it for the process
/// lifetime, which is what keeps the extracted symbols valid.
pub(crate) fn load_first(names: &[&str]) -> Option<&'static Library> {
    for name in names {
        match unsafe { Library::new(name) } {
            Ok(lib) => {
                debug!(name, "loaded vendor library");
                return Some(Box::leak(Box::new(lib)));
            }
            Err(err) => debug!(name, %err, "library name did not resolve"),
        }
    }
    None
}
