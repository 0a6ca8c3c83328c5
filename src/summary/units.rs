//! Magnitude + suffix tokens as printed by the load generator.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{EvalError, Result};

static LATENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]*\.?[0-9]+)([a-z]+)$").expect("valid latency regex"));

static THROUGHPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]*\.?[0-9]+)([a-z]?)$").expect("valid throughput regex"));

/// Converts a latency token (`12.5ms`, `300us`, `1.2s`) into milliseconds.
///
/// # Errors
/// [`EvalError::Format`] if the token is not `<number><unit>` or the unit is unknown.
pub fn parse_latency(token: &str) -> Result<f64> {
    let lowered = token.trim().to_ascii_lowercase();
    let format_error = || EvalError::Format {
        kind: "latency",
        token: token.to_string(),
    };

    let caps = LATENCY_RE.captures(&lowered).ok_or_else(format_error)?;
    let value: f64 = caps[1].parse().map_err(|_| format_error())?;
    let factor = match &caps[2] {
        "us" => 1e-3,
        "ms" => 1.0,
        "s" => 1e3,
        _ => return Err(format_error()),
    };
    Ok(value * factor)
}

/// Converts a throughput token (`850.3`, `2.5k`, `1.1M`) into requests per second.
///
/// `nan`, `-nan` and `+nan` read as `0.0`: wrk prints them when a thread collected no sample.
///
/// # Errors
/// [`EvalError::Format`] on anything else that is not `<number>[k|m|g]`.
pub fn parse_throughput(token: &str) -> Result<f64> {
    let lowered = token.trim().to_ascii_lowercase();
    if matches!(lowered.as_str(), "nan" | "-nan" | "+nan") {
        return Ok(0.0);
    }
    let format_error = || EvalError::Format {
        kind: "throughput",
        token: token.to_string(),
    };

    let caps = THROUGHPUT_RE.captures(&lowered).ok_or_else(format_error)?;
    let value: f64 = caps[1].parse().map_err(|_| format_error())?;
    let factor = match &caps[2] {
        "" => 1.0,
        "k" => 1e3,
        "m" => 1e6,
        "g" => 1e9,
        _ => return Err(format_error()),
    };
    Ok(value * factor)
}
