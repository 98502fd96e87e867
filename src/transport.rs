//! # BLE Transport Seam
//!
//! The session logic only needs "resolve an address", "connect with a deadline"
//! and a connection that can subscribe, write and disconnect. Those capabilities
//! are expressed as traits so the btleplug backend can be swapped for a fake in
//! tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::TransportError;

/// Callback invoked with each raw notification value.
///
/// May run on any task or thread the transport chooses.
pub type NotificationListener = Box<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// Hints passed to the adapter when connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    pub timeout: Duration,
    /// Skip GATT discovery when the characteristics are already known
    pub use_service_cache: bool,
}

/// Set by the transport when the peer drops the link on its own.
#[derive(Debug, Clone, Default)]
pub struct DisconnectFlag(Arc<AtomicBool>);

impl DisconnectFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[async_trait]
pub trait BleAdapter: Send + Sync {
    type Handle: Send;
    type Connection: GattConnection + 'static;

    /// Look up a connectable peripheral by address. `None` if it is not in range.
    async fn resolve(&self, address: &str) -> Option<Self::Handle>;

    async fn connect(
        &self,
        handle: Self::Handle,
        options: &ConnectOptions,
        on_disconnect: DisconnectFlag,
    ) -> Result<Self::Connection, TransportError>;
}

#[async_trait]
pub trait GattConnection: Send {
    async fn subscribe(
        &mut self,
        characteristic: Uuid,
        listener: NotificationListener,
    ) -> Result<(), TransportError>;

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError>;

    async fn write_without_response(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}
