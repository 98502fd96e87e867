//! In-memory transport used by the session and poller tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::TransportError;
use crate::protocol::CMD_ENABLE_AUTO_UPLOAD;
use crate::transport::{
    BleAdapter, ConnectOptions, DisconnectFlag, GattConnection, NotificationListener,
};

#[derive(Debug, Clone, Default)]
pub struct CallCounts {
    pub resolves: usize,
    pub connects: usize,
    pub subscribes: Vec<Uuid>,
    pub writes: Vec<(Uuid, Vec<u8>)>,
    pub unsubscribes: usize,
    pub disconnects: usize,
    /// Set while a connect attempt holds the link up
    pub link_up: bool,
    pub order: Vec<&'static str>,
    pub last_connect_options: Option<ConnectOptions>,
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<CallCounts>>);

impl CallLog {
    pub fn snapshot(&self) -> CallCounts {
        self.0.lock().unwrap().clone()
    }

    fn record(&self, f: impl FnOnce(&mut CallCounts)) {
        f(&mut self.0.lock().unwrap());
    }
}

/// What the device sends back after the enable command
#[derive(Debug, Clone)]
pub enum Reply {
    Frames(Vec<Vec<u8>>),
    Silent,
}

#[derive(Debug, Clone, Copy)]
pub enum ConnectBehavior {
    Succeed,
    Fail,
    Hang,
    TransportTimeout,
    /// Link comes up, then discovery stalls until the connect deadline
    LinkUpThenStall,
    /// Link comes up, then nothing returns until the future is dropped
    LinkUpThenHang,
}

/// A half-open link; dropping it disconnects, like the btleplug backend.
struct PendingLink {
    calls: CallLog,
}

impl PendingLink {
    fn up(calls: &CallLog) -> Self {
        calls.record(|c| c.link_up = true);
        Self {
            calls: calls.clone(),
        }
    }
}

impl Drop for PendingLink {
    fn drop(&mut self) {
        self.calls.record(|c| {
            c.link_up = false;
            c.disconnects += 1;
            c.order.push("disconnect");
        });
    }
}

#[derive(Clone)]
pub struct MockAdapter {
    pub known_address: String,
    pub connect: ConnectBehavior,
    pub reply: Reply,
    pub fail_write: bool,
    pub fail_unsubscribe: bool,
    pub fail_disconnect: bool,
    pub drop_link_on_write: bool,
    calls: CallLog,
}

impl MockAdapter {
    pub fn new(known_address: &str) -> Self {
        Self {
            known_address: known_address.to_string(),
            connect: ConnectBehavior::Succeed,
            reply: Reply::Silent,
            fail_write: false,
            fail_unsubscribe: false,
            fail_disconnect: false,
            drop_link_on_write: false,
            calls: CallLog::default(),
        }
    }

    pub fn with_reply(mut self, reply: Reply) -> Self {
        self.reply = reply;
        self
    }

    pub fn with_connect(mut self, connect: ConnectBehavior) -> Self {
        self.connect = connect;
        self
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    type Handle = String;
    type Connection = MockConnection;

    async fn resolve(&self, address: &str) -> Option<String> {
        self.calls.record(|c| c.resolves += 1);
        self.known_address
            .eq_ignore_ascii_case(address)
            .then(|| address.to_string())
    }

    async fn connect(
        &self,
        _handle: String,
        options: &ConnectOptions,
        on_disconnect: DisconnectFlag,
    ) -> Result<MockConnection, TransportError> {
        self.calls.record(|c| {
            c.connects += 1;
            c.last_connect_options = Some(*options);
        });

        match self.connect {
            ConnectBehavior::Succeed => Ok(MockConnection {
                adapter: self.clone(),
                listener: None,
                on_disconnect,
            }),
            ConnectBehavior::Fail => Err(TransportError::Other("connection refused".to_string())),
            ConnectBehavior::TransportTimeout => Err(TransportError::Timeout),
            ConnectBehavior::Hang => futures::future::pending().await,
            ConnectBehavior::LinkUpThenStall => {
                let link = PendingLink::up(&self.calls);
                let stalled = tokio::time::timeout(options.timeout, futures::future::pending::<()>());
                let _ = stalled.await;
                drop(link);
                Err(TransportError::Timeout)
            }
            ConnectBehavior::LinkUpThenHang => {
                let _link = PendingLink::up(&self.calls);
                futures::future::pending().await
            }
        }
    }
}

pub struct MockConnection {
    adapter: MockAdapter,
    listener: Option<Arc<NotificationListener>>,
    on_disconnect: DisconnectFlag,
}

#[async_trait]
impl GattConnection for MockConnection {
    async fn subscribe(
        &mut self,
        characteristic: Uuid,
        listener: NotificationListener,
    ) -> Result<(), TransportError> {
        self.adapter.calls.record(|c| {
            c.subscribes.push(characteristic);
            c.order.push("subscribe");
        });
        self.listener = Some(Arc::new(listener));
        Ok(())
    }

    async fn unsubscribe(&mut self, _characteristic: Uuid) -> Result<(), TransportError> {
        self.adapter.calls.record(|c| {
            c.unsubscribes += 1;
            c.order.push("unsubscribe");
        });
        self.listener = None;
        if self.adapter.fail_unsubscribe {
            return Err(TransportError::Other("unsubscribe rejected".to_string()));
        }
        Ok(())
    }

    async fn write_without_response(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.adapter.calls.record(|c| {
            c.writes.push((characteristic, data.to_vec()));
            c.order.push("write");
        });
        if self.adapter.fail_write {
            return Err(TransportError::Other("write rejected".to_string()));
        }
        if self.adapter.drop_link_on_write {
            self.on_disconnect.mark();
        }

        if let (Reply::Frames(frames), Some(listener)) = (&self.adapter.reply, &self.listener) {
            if data == CMD_ENABLE_AUTO_UPLOAD {
                let frames = frames.clone();
                let listener = Arc::clone(listener);
                // Notifications arrive from another task, like a real I/O callback
                tokio::spawn(async move {
                    for frame in frames {
                        listener(frame.as_slice());
                    }
                });
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.adapter.calls.record(|c| {
            c.disconnects += 1;
            c.order.push("disconnect");
        });
        if self.adapter.fail_disconnect {
            return Err(TransportError::Other("disconnect failed".to_string()));
        }
        Ok(())
    }
}
