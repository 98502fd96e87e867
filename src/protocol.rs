//! GATT identifiers and command frames of the Emerald Energy Advisor.
//!
//! These values are fixed by the device firmware and must stay bit-exact.

use uuid::Uuid;

/// Primary service advertised by the Energy Advisor
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x00001910_0000_1000_8000_00805f9b34fb);

/// Characteristic that accepts command frames
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x00002b11_0000_1000_8000_00805f9b34fb);

/// Characteristic that notifies command responses
pub const READ_CHAR_UUID: Uuid = Uuid::from_u128(0x00002b10_0000_1000_8000_00805f9b34fb);

/// Turns on periodic upload of 30-second power frames
pub const CMD_ENABLE_AUTO_UPLOAD: [u8; 6] = [0x00, 0x01, 0x02, 0x0b, 0x01, 0x01];

/// 40-bit header of a "return 30-second power" notification
pub const CMD_RETURN_30S_POWER: u64 = 0x00_0102_0a06;

/// Header + packed timestamp + pulse count
pub const POWER_FRAME_LEN: usize = 11;

pub const HEADER_LEN: usize = 5;

pub const DEFAULT_DEVICE_NAME: &str = "Emerald Energy Advisor";
pub const DEFAULT_PULSES_PER_KWH: u32 = 1000;
pub const MAX_PULSES_PER_KWH: u32 = 20_000;

/// Number of 30 s sample windows in an hour
pub const WINDOWS_PER_HOUR: f64 = 120.0;
