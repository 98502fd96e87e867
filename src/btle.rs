//! btleplug implementation of the transport traits.
//!
//! The adapter keeps a passive scan running for its whole lifetime so that
//! `resolve` can answer from the platform's list of seen peripherals without
//! starting a scan per poll.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::BTreeSet;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::TransportError;
use crate::protocol::{READ_CHAR_UUID, WRITE_CHAR_UUID};
use crate::transport::{
    BleAdapter, ConnectOptions, DisconnectFlag, GattConnection, NotificationListener,
};

pub struct BtleAdapter {
    adapter: Adapter,
}

impl BtleAdapter {
    /// Opens the first Bluetooth adapter and starts scanning in the background.
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        adapter.start_scan(ScanFilter::default()).await?;
        log::debug!("Background BLE scan started");

        Ok(Self { adapter })
    }

    async fn watch_disconnect(
        &self,
        peripheral: &Peripheral,
        flag: DisconnectFlag,
    ) -> Result<JoinHandle<()>, TransportError> {
        let mut events = self.adapter.events().await?;
        let id = peripheral.id();

        Ok(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        flag.mark();
                        break;
                    }
                }
            }
        }))
    }
}

impl Drop for BtleAdapter {
    fn drop(&mut self) {
        let adapter = self.adapter.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = adapter.stop_scan().await {
                    log::debug!("Failed to stop background scan: {}", e);
                }
            });
        }
    }
}

/// Compares a configured address against a peripheral's MAC and platform id.
///
/// macOS hides MAC addresses, so the platform peripheral id is accepted too.
/// Both comparisons are whole-string and case-insensitive.
fn address_matches(mac: &str, platform_id: &str, configured: &str) -> bool {
    let configured = configured.trim();
    !configured.is_empty()
        && (mac.eq_ignore_ascii_case(configured) || platform_id.eq_ignore_ascii_case(configured))
}

fn matches_address(peripheral: &Peripheral, address: &str) -> bool {
    address_matches(
        &peripheral.address().to_string(),
        &peripheral.id().to_string(),
        address,
    )
}

fn has_protocol_characteristics(characteristics: &BTreeSet<Characteristic>) -> bool {
    [READ_CHAR_UUID, WRITE_CHAR_UUID]
        .iter()
        .all(|uuid| characteristics.iter().any(|c| c.uuid == *uuid))
}

async fn establish(peripheral: &Peripheral, options: &ConnectOptions) -> Result<(), TransportError> {
    if !peripheral.is_connected().await.unwrap_or(false) {
        peripheral.connect().await?;
    }

    if options.use_service_cache && has_protocol_characteristics(&peripheral.characteristics()) {
        log::debug!("Reusing cached services for {}", peripheral.address());
    } else {
        peripheral.discover_services().await?;
    }

    if !has_protocol_characteristics(&peripheral.characteristics()) {
        return Err(TransportError::CharacteristicNotFound(READ_CHAR_UUID));
    }
    Ok(())
}

/// A link that is being brought up.
///
/// Until `finish` hands it over, dropping it (for example when the caller
/// gives up on `connect`) still disconnects the peripheral.
struct PendingLink {
    peripheral: Option<Peripheral>,
    disconnect_watch: Option<JoinHandle<()>>,
}

impl PendingLink {
    fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral: Some(peripheral),
            disconnect_watch: None,
        }
    }

    async fn release(mut self) {
        if let Some(watch) = self.disconnect_watch.take() {
            watch.abort();
        }
        if let Some(peripheral) = &self.peripheral {
            if let Err(e) = peripheral.disconnect().await {
                log::debug!("Disconnect after failed connect also failed: {}", e);
            }
        }
        self.peripheral = None;
    }

    fn finish(mut self) -> Option<BtleConnection> {
        let peripheral = self.peripheral.take()?;
        Some(BtleConnection {
            peripheral,
            listener_task: None,
            disconnect_watch: self.disconnect_watch.take(),
        })
    }
}

impl Drop for PendingLink {
    fn drop(&mut self) {
        if let Some(watch) = self.disconnect_watch.take() {
            watch.abort();
        }
        let Some(peripheral) = self.peripheral.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                log::debug!("Connect to {} abandoned, disconnecting", peripheral.address());
                handle.spawn(async move {
                    if let Err(e) = peripheral.disconnect().await {
                        log::debug!("Disconnect after abandoned connect failed: {}", e);
                    }
                });
            }
            Err(_) => {
                log::warn!("No runtime available to disconnect {}", peripheral.address());
            }
        }
    }
}

#[async_trait]
impl BleAdapter for BtleAdapter {
    type Handle = Peripheral;
    type Connection = BtleConnection;

    async fn resolve(&self, address: &str) -> Option<Peripheral> {
        let peripherals = match self.adapter.peripherals().await {
            Ok(peripherals) => peripherals,
            Err(e) => {
                log::warn!("Could not list peripherals: {}", e);
                return None;
            }
        };

        for peripheral in peripherals {
            if !matches_address(&peripheral, address) {
                continue;
            }
            // A peripheral without properties has not been seen advertising
            if let Ok(Some(_)) = peripheral.properties().await {
                return Some(peripheral);
            }
        }
        None
    }

    /// Brings the link up and discovers services, all within `options.timeout`.
    async fn connect(
        &self,
        peripheral: Peripheral,
        options: &ConnectOptions,
        on_disconnect: DisconnectFlag,
    ) -> Result<BtleConnection, TransportError> {
        let mut link = PendingLink::new(peripheral.clone());

        let attempt = timeout(options.timeout, async {
            link.disconnect_watch = Some(self.watch_disconnect(&peripheral, on_disconnect).await?);
            establish(&peripheral, options).await
        })
        .await;

        if let Err(e) = attempt.unwrap_or(Err(TransportError::Timeout)) {
            link.release().await;
            return Err(e);
        }

        log::debug!("Connected to {}", peripheral.address());
        link.finish().ok_or(TransportError::NotConnected)
    }
}

/// An open GATT connection to one peripheral
pub struct BtleConnection {
    peripheral: Peripheral,
    listener_task: Option<JoinHandle<()>>,
    disconnect_watch: Option<JoinHandle<()>>,
}

impl BtleConnection {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }

    fn stop_listener(&mut self) {
        if let Some(task) = self.listener_task.take() {
            task.abort();
        }
    }

    fn stop_tasks(&mut self) {
        self.stop_listener();
        if let Some(watch) = self.disconnect_watch.take() {
            watch.abort();
        }
    }
}

#[async_trait]
impl GattConnection for BtleConnection {
    async fn subscribe(
        &mut self,
        characteristic: Uuid,
        listener: NotificationListener,
    ) -> Result<(), TransportError> {
        let target = self.characteristic(characteristic)?;

        // Take the stream before enabling notify so the first value cannot be missed
        let mut notifications = self.peripheral.notifications().await?;
        self.stop_listener();
        self.listener_task = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid == characteristic {
                    listener(notification.value.as_slice());
                }
            }
        }));

        self.peripheral.subscribe(&target).await?;
        Ok(())
    }

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError> {
        self.stop_listener();
        let target = self.characteristic(characteristic)?;
        self.peripheral.unsubscribe(&target).await?;
        Ok(())
    }

    async fn write_without_response(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let target = self.characteristic(characteristic)?;
        self.peripheral
            .write(&target, data, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.stop_tasks();
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

impl Drop for BtleConnection {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}
