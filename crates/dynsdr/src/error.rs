//! Error types for the runtime-loaded vendor SDKs.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The vendor shared library is not installed on this system (or none of
    /// the known library names resolved).
    #[error("{0} is not available on this system")]
    MissingLibrary(&'static str),

    /// A vendor entry point reported failure.
    #[error("{call} failed with code {code}")]
    Vendor { call: &'static str, code: i32 },

    /// Device lookup found nothing matching the given specifier.
    #[error("no matching device: {0}")]
    NoDevice(String),

    /// A capture is already running on this handle.
    #[error("capture already running")]
    CaptureBusy,

    /// The capture thread could not be spawned.
    #[error("capture thread: {0}")]
    Thread(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn vendor(call: &'static str, code: i32) -> Self {
        Error::Vendor { call, code }
    }
}

/// Maps a vendor return code to `Ok(())` or a [`Error::Vendor`].
///
/// Both SDKs use the same convention: negative means failure.
pub(crate) fn vendor_check(call: &'static str, code: i32) -> Result<()> {
    if code < 0 {
        Err(Error::vendor(call, code))
    } else {
        Ok(())
    }
}
