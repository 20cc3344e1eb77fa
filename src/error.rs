//! Error handling for the sdrtap library
//!
//! This module provides a unified error type for all capture operations,
//! plus the small closed status code set a hosting application switches on.

use std::fmt;

/// A specialized Result type for sdrtap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sdrtap operations
///
/// Mid-stream faults are not represented here: a malformed vendor transfer
/// is reported through the delivery sink and ends the stream without
/// failing the call that started it.
#[derive(Debug)]
pub enum Error {
    /// Malformed or unrecognized configuration string
    Parameter(String),

    /// Device refused a call or is not usable in its current state
    Device(String),

    /// Failure from the runtime-loaded vendor driver layer
    Driver(dynsdr::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parameter(msg) => write!(f, "Parameter error: {}", msg),
            Error::Device(msg) => write!(f, "Device error: {}", msg),
            Error::Driver(err) => write!(f, "Driver error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Driver(err) => Some(err),
            _ => None,
        }
    }
}

impl From<dynsdr::Error> for Error {
    fn from(err: dynsdr::Error) -> Self {
        Error::Driver(err)
    }
}

// Helper constructors for common error scenarios

impl Error {
    /// Create a parameter error with a custom message
    pub fn parameter<S: Into<String>>(msg: S) -> Self {
        Error::Parameter(msg.into())
    }

    /// Create a device error with a custom message
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Error::Device(msg.into())
    }

    /// The status classification a hosting application sees for this error
    pub fn status(&self) -> Status {
        match self {
            Error::Parameter(_) => Status::InvalidParameters,
            Error::Device(_) | Error::Driver(_) => Status::CannotOpenDevice,
        }
    }
}

/// Host-facing status codes
///
/// The numeric values are part of the adapter contract and must not change;
/// diagnostic detail travels in the [`Error`] message, not the code.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    InvalidParameters = 1,
    CannotOpenDevice = 2,
}

impl Status {
    /// Numeric code as seen by a foreign host
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Stable short name for logs
    pub fn name(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::InvalidParameters => "INVALID_PARAMETERS",
            Status::CannotOpenDevice => "CANNOT_OPEN_DEVICE",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
