use btleplug::api::{Central, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::Manager;
use serde::Serialize;
use std::time::Duration;

use crate::error::ScanError;
use crate::protocol::SERVICE_UUID;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BluetoothDevice {
    pub address: String,
    pub name: String,
    pub rssi: Option<i16>,
}

/// Does an advertisement look like an Energy Advisor?
fn is_energy_advisor(props: &PeripheralProperties) -> bool {
    props.services.contains(&SERVICE_UUID)
        || props
            .local_name
            .as_deref()
            .map(|name| name.to_lowercase().contains("emerald"))
            .unwrap_or(false)
}

/// Scans for nearby Emerald Energy Advisors
pub async fn scan_devices(duration: Duration) -> Result<Vec<BluetoothDevice>, ScanError> {
    let manager = Manager::new().await.map_err(ScanError::ManagerInit)?;

    let adapters = manager.adapters().await.map_err(ScanError::ManagerInit)?;
    let central = adapters.into_iter().next().ok_or(ScanError::NoAdapters)?;

    central
        .start_scan(ScanFilter::default())
        .await
        .map_err(ScanError::ScanFailed)?;

    tokio::time::sleep(duration).await;

    central.stop_scan().await.map_err(ScanError::ScanFailed)?;

    let peripherals = central.peripherals().await.map_err(ScanError::ScanFailed)?;

    let mut devices = Vec::new();
    for peripheral in peripherals {
        if let Ok(Some(props)) = peripheral.properties().await {
            if is_energy_advisor(&props) {
                log::debug!("Found candidate {:?} at {}", props.local_name, peripheral.address());
                devices.push(BluetoothDevice {
                    address: peripheral.address().to_string(),
                    name: props.local_name.clone().unwrap_or_default(),
                    rssi: props.rssi,
                });
            }
        }
    }

    // Strongest signal first
    devices.sort_by_key(|d| std::cmp::Reverse(d.rssi.unwrap_or(i16::MIN)));
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_by_service() {
        let mut props = PeripheralProperties::default();
        props.services = vec![SERVICE_UUID];
        assert!(is_energy_advisor(&props));
    }

    #[test]
    fn test_matches_by_name() {
        let mut props = PeripheralProperties::default();
        props.local_name = Some("Emerald EA-1234".to_string());
        assert!(is_energy_advisor(&props));
    }

    #[test]
    fn test_ignores_other_devices() {
        let mut props = PeripheralProperties::default();
        props.local_name = Some("Polar H10 12345678".to_string());
        assert!(!is_energy_advisor(&props));
        assert!(!is_energy_advisor(&PeripheralProperties::default()));
    }
}
