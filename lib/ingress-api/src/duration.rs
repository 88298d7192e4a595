//! Kubernetes duration strings
//!
//! CRD fields such as timeouts and probe intervals use the `metav1.Duration`
//! wire format: a sequence of decimal numbers with unit suffixes, e.g. "300ms",
//! "1.5s" or "2h45m". Valid units are "ns", "us" (or "µs"), "ms", "s", "m", "h".

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,

    #[error("negative duration: {0}")]
    Negative(String),

    #[error("invalid duration: {0}")]
    Invalid(String),

    #[error("missing unit in duration: {0}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input}")]
    UnknownUnit { unit: String, input: String },
}

/// Parse a Kubernetes duration string
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }

    let (negative, mut rest) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(DurationError::Invalid(input.to_string()));
    }

    let mut total_nanos: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(DurationError::Invalid(input.to_string()));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| DurationError::Invalid(input.to_string()))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        if unit_len == 0 {
            return Err(DurationError::MissingUnit(input.to_string()));
        }
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            _ => {
                return Err(DurationError::UnknownUnit {
                    unit: unit.to_string(),
                    input: input.to_string(),
                })
            }
        };
        total_nanos += value * scale;
    }

    if negative && total_nanos > 0.0 {
        return Err(DurationError::Negative(input.to_string()));
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
