//! # Power Frame Codec
//!
//! Decodes the 30-second power notification pushed by the Energy Advisor.
//!
//! ## Frame Layout
//! ```text
//! offset  0..5   header, big-endian u40, must equal CMD_RETURN_30S_POWER
//! offset  5..9   packed timestamp, big-endian u32
//! offset  9..11  pulse count for the last 30 s window, big-endian u16
//! offset 11..    ignored
//! ```
//!
//! The packed timestamp is, from the most significant bit down,
//! `year-2000 (6) | month (4) | day (5) | hour (5) | minute (6) | second (6)`.
//! An impossible calendar value falls back to the capture time rather than
//! discarding the reading.
//!
//! `power_w` is rounded half away from zero to two decimals.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::PayloadError;
use crate::protocol::{CMD_RETURN_30S_POWER, HEADER_LEN, POWER_FRAME_LEN};

/// One decoded power sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerReading {
    pub power_w: f64,
    pub pulses_30s: u16,
    pub timestamp: DateTime<Utc>,
}

/// Decode a notification, using the current time if the device clock field is invalid.
pub fn decode(raw: &[u8], pulse_multiplier_kw: f64) -> Result<PowerReading, PayloadError> {
    decode_at(raw, pulse_multiplier_kw, Utc::now())
}

/// Decode a notification captured at `captured_at`.
pub fn decode_at(
    raw: &[u8],
    pulse_multiplier_kw: f64,
    captured_at: DateTime<Utc>,
) -> Result<PowerReading, PayloadError> {
    if raw.len() < POWER_FRAME_LEN {
        return Err(PayloadError::MalformedPayload { len: raw.len() });
    }

    let header = raw[..HEADER_LEN]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    if header != CMD_RETURN_30S_POWER {
        return Err(PayloadError::UnsupportedHeader { header });
    }

    let packed = u32::from_be_bytes([raw[5], raw[6], raw[7], raw[8]]);
    let pulses = u16::from_be_bytes([raw[9], raw[10]]);

    let timestamp = unpack_timestamp(packed).unwrap_or_else(|| {
        log::warn!(
            "Device clock field 0x{:08x} is not a valid date, using capture time",
            packed
        );
        captured_at
    });

    let power_kw = f64::from(pulses) * pulse_multiplier_kw;

    Ok(PowerReading {
        power_w: round_to_hundredths(power_kw * 1000.0),
        pulses_30s: pulses,
        timestamp,
    })
}

/// Unpack the device's bit-packed clock. `None` if the fields do not form a real date.
pub fn unpack_timestamp(packed: u32) -> Option<DateTime<Utc>> {
    let year = 2000 + (packed >> 26) as i32;
    let month = (packed >> 22) & 0x0f;
    let day = (packed >> 17) & 0x1f;
    let hour = (packed >> 12) & 0x1f;
    let minute = (packed >> 6) & 0x3f;
    let second = packed & 0x3f;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .map(|naive| naive.and_utc())
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
