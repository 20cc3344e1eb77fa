//! Whitespace-separated key/value configuration strings
//!
//! Both backends are configured by a single string of `key value` pairs,
//! e.g. `"rate 2000000 bw 1750000"`. This module does the tokenizing and
//! the per-type decoding; each backend matches the keys it understands and
//! rejects the rest.

use crate::error::{Error, Result};

/// Splits `config` into `(key, value)` pairs on arbitrary whitespace.
///
/// An empty or all-whitespace string yields no pairs. A trailing key with
/// no value is a parameter error.
pub fn pairs(config: &str) -> Result<Vec<(&str, &str)>> {
    let mut out = Vec::new();
    let mut tokens = config.split_whitespace();
    while let Some(key) = tokens.next() {
        let value = tokens
            .next()
            .ok_or_else(|| Error::parameter(format!("missing value for key \"{}\"", key)))?;
        out.push((key, value));
    }
    Ok(out)
}

/// Decodes an unsigned integer value, naming the key in the error.
pub fn parse_u32(key: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| Error::parameter(format!("key \"{}\": expected an integer, got \"{}\"", key, value)))
}

/// Decodes an on/off value. Accepts `1/0`, `true/false`, `on/off`, `yes/no`.
pub fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(Error::parameter(format!(
            "key \"{}\": expected an on/off value, got \"{}\"",
            key, value
        ))),
    }
}

/// The parameter error every backend raises for a key it does not know.
pub fn unknown_key(key: &str) -> Error {
    Error::parameter(format!("unknown key \"{}\"", key))
}
