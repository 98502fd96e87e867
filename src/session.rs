//! # Session Management Module
//!
//! One fetch is one short-lived BLE session with the Energy Advisor:
//!
//! 1. resolve the address to a peripheral (`DeviceNotFound` if unseen)
//! 2. connect within the connect deadline (`ConnectionTimeout`); the adapter
//!    owns that deadline and the client only adds a backstop past it
//! 3. subscribe to the read characteristic before sending anything
//! 4. write the enable-upload command without response
//! 5. wait for the first notification within the notify deadline (`NotificationTimeout`)
//! 6. decode it
//! 7. unsubscribe and disconnect, whatever happened above
//!
//! Cleanup failures are logged and never replace the fetch result. If the
//! caller drops the fetch future mid-session, the guard schedules the same
//! cleanup on the runtime.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::codec::{self, PowerReading};
use crate::device::DeviceIdentity;
use crate::error::{FetchError, TransportError};
use crate::protocol::{CMD_ENABLE_AUTO_UPLOAD, READ_CHAR_UUID, WRITE_CHAR_UUID};
use crate::transport::{BleAdapter, ConnectOptions, DisconnectFlag, GattConnection};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(8);

/// Upper bound on how long the client waits past the adapter's own deadline
const CONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub connect_timeout: Duration,
    /// Measured from the moment the enable command is written
    pub notify_timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }
}

/// Holds at most one notification; the first offer wins.
pub struct NotificationSlot {
    sender: Mutex<Option<oneshot::Sender<Vec<u8>>>>,
}

impl NotificationSlot {
    pub fn new() -> (Self, oneshot::Receiver<Vec<u8>>) {
        let (sender, receiver) = oneshot::channel();
        let slot = Self {
            sender: Mutex::new(Some(sender)),
        };
        (slot, receiver)
    }

    /// Returns `true` only for the offer that filled the slot.
    pub fn offer(&self, data: &[u8]) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(sender) => sender.send(data.to_vec()).is_ok(),
            None => false,
        }
    }
}

/// Polls one Energy Advisor, one connection per fetch.
///
/// Fetches against the same client must not overlap.
pub struct EmeraldClient<A: BleAdapter> {
    adapter: A,
    identity: DeviceIdentity,
}

impl<A: BleAdapter> EmeraldClient<A> {
    pub fn new(adapter: A, identity: DeviceIdentity) -> Self {
        Self { adapter, identity }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub async fn fetch(&self, options: &FetchOptions) -> Result<PowerReading, FetchError> {
        let address = self.identity.address();

        let handle = self
            .adapter
            .resolve(address)
            .await
            .ok_or_else(|| FetchError::DeviceNotFound {
                address: address.to_string(),
            })?;

        let disconnected = DisconnectFlag::new();
        let connect_options = ConnectOptions {
            timeout: options.connect_timeout,
            use_service_cache: true,
        };
        let connecting = self
            .adapter
            .connect(handle, &connect_options, disconnected.clone());

        // Dropping a late connect is left to the adapter's cleanup
        let backstop = options.connect_timeout + (options.connect_timeout / 2).min(CONNECT_GRACE);
        let connection = match timeout(backstop, connecting).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(TransportError::Timeout)) | Err(_) => {
                return Err(FetchError::ConnectionTimeout {
                    address: address.to_string(),
                    timeout: options.connect_timeout,
                });
            }
            Ok(Err(e)) => return Err(FetchError::CommunicationFailure(e)),
        };
        log::debug!("{}: connected", address);

        let mut session = Session {
            connection: Some(connection),
            address: address.to_string(),
            disconnected,
        };
        let result = session
            .exchange(self.identity.pulse_multiplier_kw(), options.notify_timeout)
            .await;
        session.close().await;

        result
    }
}

/// Owns the connection between connect and teardown.
struct Session<C: GattConnection + 'static> {
    connection: Option<C>,
    address: String,
    disconnected: DisconnectFlag,
}

impl<C: GattConnection + 'static> Session<C> {
    async fn exchange(
        &mut self,
        pulse_multiplier_kw: f64,
        notify_timeout: Duration,
    ) -> Result<PowerReading, FetchError> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(TransportError::NotConnected)?;

        let (slot, reading) = NotificationSlot::new();
        let slot = Arc::new(slot);
        let listener_slot = Arc::clone(&slot);
        connection
            .subscribe(
                READ_CHAR_UUID,
                Box::new(move |data: &[u8]| {
                    if !listener_slot.offer(data) {
                        log::trace!("Ignoring extra notification of {} bytes", data.len());
                    }
                }),
            )
            .await?;

        connection
            .write_without_response(WRITE_CHAR_UUID, &CMD_ENABLE_AUTO_UPLOAD)
            .await?;

        let raw = match timeout(notify_timeout, reading).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(_)) => return Err(TransportError::ListenerClosed.into()),
            Err(_) => {
                return Err(FetchError::NotificationTimeout {
                    timeout: notify_timeout,
                })
            }
        };
        log::debug!("{}: received {} byte notification", self.address, raw.len());

        Ok(codec::decode(&raw, pulse_multiplier_kw)?)
    }

    async fn close(mut self) {
        if let Some(connection) = self.connection.take() {
            teardown(connection, &self.address).await;
        }
        if self.disconnected.is_set() {
            log::warn!("{}: device dropped the connection during the session", self.address);
        }
    }
}

impl<C: GattConnection + 'static> Drop for Session<C> {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        let address = self.address.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                log::debug!("{}: fetch abandoned, tearing down in background", address);
                runtime.spawn(async move {
                    teardown(connection, &address).await;
                });
            }
            Err(_) => {
                log::warn!("{}: no runtime available to close abandoned connection", address);
            }
        }
    }
}

async fn teardown<C: GattConnection>(mut connection: C, address: &str) {
    if let Err(e) = connection.unsubscribe(READ_CHAR_UUID).await {
        log::debug!("{}: unsubscribe failed: {}", address, e);
    }
    if let Err(e) = connection.disconnect().await {
        log::warn!("{}: disconnect failed: {}", address, e);
    }
}
