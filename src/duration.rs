/*
 * duration.rs
 *
 * Parse the <timeoutSeconds> operand: "2", "0.5", ".25", "1e-3".
 * Always seconds. No unit suffixes: "2m" is rejected, not read as minutes.
 *
 * Two failure codes matter to scripts: "not a number" (108) and
 * "not positive" (109). Zero never means "run forever" here.
 *
 * Resolution is one microsecond; the timer can't do better anyway.
 */

use std::time::Duration;

use crate::error::{MaxtimeError, Result};

/// Parse a timeout operand (seconds) into a positive [`Duration`].
///
/// # Examples
///
/// ```
/// use maxtime::duration::parse_timeout;
/// use std::time::Duration;
///
/// assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
/// assert_eq!(parse_timeout("0.25").unwrap(), Duration::from_millis(250));
/// assert!(parse_timeout("2m").is_err());
/// assert!(parse_timeout("abc").is_err());
/// assert!(parse_timeout("0").is_err());
/// ```
///
/// # Errors
///
/// [`MaxtimeError::InvalidTimeout`] when the input isn't a finite decimal
/// number, [`MaxtimeError::NonPositiveTimeout`] when it is zero, negative, or
/// below one microsecond.
pub fn parse_timeout(input: &str) -> Result<Duration> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(MaxtimeError::InvalidTimeout("empty timeout".to_string()));
    }

    /* f64::from_str also takes "inf" and "nan"; a timeout is digits only */
    if !trimmed.bytes().all(is_number_byte) {
        return Err(MaxtimeError::InvalidTimeout(format!(
            "invalid number '{trimmed}'"
        )));
    }

    let value: f64 = trimmed
        .parse()
        .map_err(|_| MaxtimeError::InvalidTimeout(format!("invalid number '{trimmed}'")))?;

    /* -0 lands here too */
    if value <= 0.0 {
        return Err(MaxtimeError::NonPositiveTimeout(trimmed.to_string()));
    }

    let total = Duration::try_from_secs_f64(value)
        .map_err(|_| MaxtimeError::InvalidTimeout(format!("'{trimmed}' is too large")))?;

    let rounded = round_to_micros(total);
    if rounded.is_zero() {
        return Err(MaxtimeError::NonPositiveTimeout(trimmed.to_string()));
    }

    Ok(rounded)
}

/* nearest microsecond. 0.3 is 0.29999.. as f64, don't lose a whole microsecond to that */
#[inline]
fn round_to_micros(d: Duration) -> Duration {
    let micros = (d.subsec_nanos() + 500) / 1000;
    if micros >= 1_000_000 {
        Duration::from_secs(d.as_secs().saturating_add(1))
    } else {
        Duration::new(d.as_secs(), micros * 1000)
    }
}

#[inline]
const fn is_number_byte(b: u8) -> bool {
    matches!(b, b'0'..=b'9' | b'.' | b'+' | b'-' | b'e' | b'E')
}
