//! Raw vendor bytes to normalized f32 samples
//!
//! Both supported front ends deliver interleaved 8-bit I/Q, but disagree on
//! the encoding: the wideband transceiver sends two's-complement bytes, the
//! dongle sends offset binary. Each law maps a byte into `[-1.0, 127/128]`.

/// Byte encoding of an 8-bit sample stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleLaw {
    /// Two's-complement bytes, zero at `0x00`: `byte / 128`.
    SignedCentered,
    /// Offset-binary bytes, zero at `0x80`: `byte / 128 - 1`.
    UnsignedOffset,
}

/// Largest value either law can produce.
pub const SAMPLE_MAX: f32 = 127.0 / 128.0;
/// Smallest value either law can produce.
pub const SAMPLE_MIN: f32 = -1.0;

/// Converts `raw` elementwise into `out`. One pass, no allocation; the
/// caller guarantees matching lengths.
pub fn convert_block(law: SampleLaw, raw: &[u8], out: &mut [f32]) {
    debug_assert_eq!(raw.len(), out.len());
    match law {
        SampleLaw::SignedCentered => {
            for (dst, &byte) in out.iter_mut().zip(raw) {
                *dst = (byte as i8) as f32 / 128.0;
            }
        }
        SampleLaw::UnsignedOffset => {
            for (dst, &byte) in out.iter_mut().zip(raw) {
                *dst = byte as f32 / 128.0 - 1.0;
            }
        }
    }
}
