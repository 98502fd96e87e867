use crate::error::ConfigError;
use crate::protocol::{DEFAULT_DEVICE_NAME, WINDOWS_PER_HOUR};

/// Immutable description of one Energy Advisor.
///
/// Shared read-only across every fetch made against the device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    address: String,
    name: String,
    pulses_per_kwh: u32,
}

impl DeviceIdentity {
    pub fn new(
        address: impl Into<String>,
        name: Option<String>,
        pulses_per_kwh: u32,
    ) -> Result<Self, ConfigError> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(ConfigError::MissingAddress);
        }
        if pulses_per_kwh == 0 {
            return Err(ConfigError::InvalidPulsesPerKwh(pulses_per_kwh));
        }

        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string());

        Ok(Self {
            address,
            name,
            pulses_per_kwh,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pulses_per_kwh(&self) -> u32 {
        self.pulses_per_kwh
    }

    /// Converts a 30-second pulse count straight to kilowatts.
    pub fn pulse_multiplier_kw(&self) -> f64 {
        WINDOWS_PER_HOUR / f64::from(self.pulses_per_kwh)
    }
}
