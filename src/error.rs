//! # Error Types Module
//!
//! Centralized error handling for the Emerald BLE poller.
//! Provides custom error types for each layer with proper context and error chaining.
//!
//! ## Error Types
//! - `PayloadError`: Notification payload could not be decoded
//! - `TransportError`: BLE adapter and GATT operation failures
//! - `FetchError`: Outcome of a failed poll against the device
//! - `ConfigError`: Configuration file I/O, parsing and validation errors
//! - `ScanError`: Bluetooth device scanning errors
//!
//! ## Usage Examples
//! ```rust
//! // Codec uses PayloadError
//! pub fn decode(raw: &[u8], pulse_multiplier_kw: f64) -> Result<PowerReading, PayloadError> { ... }
//!
//! // Session uses FetchError, wrapping TransportError and PayloadError
//! pub async fn fetch(&self, options: &FetchOptions) -> Result<PowerReading, FetchError> { ... }
//! ```

use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Errors produced while decoding a power notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Payload shorter than the fixed 11-byte frame
    MalformedPayload { len: usize },
    /// Frame header is not the 30-second power response
    UnsupportedHeader { header: u64 },
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::MalformedPayload { len } => {
                write!(f, "Unexpected payload length {}", len)
            }
            PayloadError::UnsupportedHeader { header } => {
                write!(f, "Unsupported command header 0x{:010x}", header)
            }
        }
    }
}

impl std::error::Error for PayloadError {}

/// Errors raised by the BLE transport
#[derive(Debug)]
pub enum TransportError {
    /// Bluetooth adapter not found or not available
    NoAdapter,
    /// Underlying btleplug failure
    Ble(btleplug::Error),
    /// The transport gave up on an operation after its own deadline
    Timeout,
    /// Required GATT characteristic was not discovered on the peripheral
    CharacteristicNotFound(Uuid),
    /// The notification listener went away before delivering a value
    ListenerClosed,
    /// Operation attempted on a connection that has already been closed
    NotConnected,
    /// Any other transport failure, described as text
    Other(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NoAdapter => {
                write!(f, "No Bluetooth adapter found. Please ensure Bluetooth is enabled.")
            }
            TransportError::Ble(e) => write!(f, "Bluetooth error: {}", e),
            TransportError::Timeout => write!(f, "Bluetooth operation timed out"),
            TransportError::CharacteristicNotFound(uuid) => {
                write!(f, "Characteristic {} not found on device", uuid)
            }
            TransportError::ListenerClosed => {
                write!(f, "Notification listener closed before any data arrived")
            }
            TransportError::NotConnected => write!(f, "Connection already closed"),
            TransportError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Ble(e) => Some(e),
            _ => None,
        }
    }
}

impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        TransportError::Ble(e)
    }
}

/// Errors that end a single fetch against the device
#[derive(Debug)]
pub enum FetchError {
    /// Address is not resolvable to a connectable peripheral
    DeviceNotFound { address: String },
    /// Connection was not established within the deadline
    ConnectionTimeout { address: String, timeout: Duration },
    /// Connect, subscribe or write failed
    CommunicationFailure(TransportError),
    /// Device did not notify within the deadline
    NotificationTimeout { timeout: Duration },
    /// Notification arrived but could not be decoded
    Payload(PayloadError),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::DeviceNotFound { address } => {
                write!(f, "Device {} not found via Bluetooth; is it in range?", address)
            }
            FetchError::ConnectionTimeout { address, timeout } => {
                write!(f, "Timed out connecting to {} after {:?}", address, timeout)
            }
            FetchError::CommunicationFailure(e) => {
                write!(f, "BLE communication failed: {}", e)
            }
            FetchError::NotificationTimeout { timeout } => {
                write!(f, "Timed out waiting for device notification after {:?}", timeout)
            }
            FetchError::Payload(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::CommunicationFailure(e) => Some(e),
            FetchError::Payload(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for FetchError {
    fn from(e: TransportError) -> Self {
        FetchError::CommunicationFailure(e)
    }
}

impl From<PayloadError> for FetchError {
    fn from(e: PayloadError) -> Self {
        FetchError::Payload(e)
    }
}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
    /// No device address configured
    MissingAddress,
    /// Calibration constant outside the accepted range
    InvalidPulsesPerKwh(u32),
    /// A timeout setting of zero seconds
    ZeroTimeout(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
            ConfigError::MissingAddress => {
                write!(f, "No device address configured; run `emerald-ble scan` to find one")
            }
            ConfigError::InvalidPulsesPerKwh(value) => {
                write!(f, "pulses_per_kwh must be between 1 and 20000, got {}", value)
            }
            ConfigError::ZeroTimeout(field) => {
                write!(f, "{} must be at least 1 second", field)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors that can occur during device scanning
#[derive(Debug)]
pub enum ScanError {
    /// Bluetooth manager initialization failed
    ManagerInit(btleplug::Error),
    /// No Bluetooth adapters available
    NoAdapters,
    /// Scan operation failed
    ScanFailed(btleplug::Error),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::ManagerInit(e) => {
                write!(f, "Failed to initialize Bluetooth manager: {}", e)
            }
            ScanError::NoAdapters => {
                write!(f, "No Bluetooth adapters found")
            }
            ScanError::ScanFailed(e) => {
                write!(f, "Scan operation failed: {}", e)
            }
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScanError::ManagerInit(e) | ScanError::ScanFailed(e) => Some(e),
            ScanError::NoAdapters => None,
        }
    }
}
