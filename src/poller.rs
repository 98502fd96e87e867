//! # Poll Management Module
//!
//! Drives one `EmeraldClient` on a fixed interval and keeps the last-known-good
//! state for the consumer.
//!
//! ## Key Components
//! - `PollManager`: Runs the poll loop and processes commands
//! - `PollCommand`: Commands sent from the consumer to the poll loop
//! - `PollUpdate`: Results pushed back to the consumer
//! - `PollState` / `Diagnostics`: Counters and last reading/error
//!
//! A fetch that has started always runs to completion, teardown included,
//! before a shutdown request is honoured. Failures are reported and the next
//! tick tries again; there is no retry or backoff inside a tick.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::mpsc as command_channel;
use tokio::time::MissedTickBehavior;

use crate::codec::PowerReading;
use crate::error::FetchError;
use crate::session::{EmeraldClient, FetchOptions};
use crate::transport::BleAdapter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollCommand {
    PollNow,
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum PollUpdate {
    Reading(PowerReading),
    Failed(String),
    Stopped(Diagnostics),
}

/// Outcome history across polls
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollState {
    pub last_reading: Option<PowerReading>,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub consecutive_failures: u32,
}

impl PollState {
    pub fn record(&mut self, result: &Result<PowerReading, FetchError>) {
        match result {
            Ok(reading) => {
                self.last_reading = Some(reading.clone());
                self.last_success_at = Some(Utc::now());
                self.successful_polls += 1;
                self.consecutive_failures = 0;
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.failed_polls += 1;
                self.consecutive_failures += 1;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub address: String,
    pub name: String,
    pub pulses_per_kwh: u32,
    #[serde(flatten)]
    pub state: PollState,
}

pub struct PollManager<A: BleAdapter> {
    client: EmeraldClient<A>,
    options: FetchOptions,
    interval: Duration,
    command_receiver: command_channel::UnboundedReceiver<PollCommand>,
    update_sender: mpsc::Sender<PollUpdate>,
    state: PollState,
}

impl<A: BleAdapter> PollManager<A> {
    /// Creates a new PollManager.
    ///
    /// Returns the manager and a sender for issuing commands to the poll loop.
    pub fn new(
        client: EmeraldClient<A>,
        options: FetchOptions,
        interval: Duration,
        update_sender: mpsc::Sender<PollUpdate>,
    ) -> (Self, command_channel::UnboundedSender<PollCommand>) {
        let (command_sender, command_receiver) = command_channel::unbounded_channel();

        let manager = PollManager {
            client,
            options,
            interval,
            command_receiver,
            update_sender,
            state: PollState::default(),
        };

        (manager, command_sender)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let identity = self.client.identity();
        Diagnostics {
            address: identity.address().to_string(),
            name: identity.name().to_string(),
            pulses_per_kwh: identity.pulses_per_kwh(),
            state: self.state.clone(),
        }
    }

    async fn poll_once(&mut self) {
        let result = self.client.fetch(&self.options).await;
        self.state.record(&result);

        let update = match result {
            Ok(reading) => {
                log::debug!("Poll succeeded: {:?}", reading);
                PollUpdate::Reading(reading)
            }
            Err(e) => {
                log::warn!(
                    "Error communicating with {}: {} ({} consecutive failures)",
                    self.client.identity().name(),
                    e,
                    self.state.consecutive_failures
                );
                PollUpdate::Failed(e.to_string())
            }
        };

        if self.update_sender.send(update).is_err() {
            log::debug!("Poll manager: update receiver gone");
        }
    }

    fn finish(self) {
        let diagnostics = self.diagnostics();
        let _ = self.update_sender.send(PollUpdate::Stopped(diagnostics));
    }

    /// Polls a single time and stops.
    pub async fn run_once(mut self) {
        self.poll_once().await;
        self.finish();
    }

    /// Runs the poll loop until `Shutdown`, the command channel closing, or Ctrl-C.
    ///
    /// The first poll happens immediately.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        log::info!(
            "Polling {} every {:?}",
            self.client.identity().address(),
            self.interval
        );

        loop {
            tokio::select! {
                biased;

                _ = ticker.tick() => self.poll_once().await,
                command = self.command_receiver.recv() => match command {
                    Some(PollCommand::PollNow) => self.poll_once().await,
                    Some(PollCommand::Shutdown) | None => {
                        log::info!("Poll manager: shutdown requested");
                        break;
                    }
                },
                _ = &mut ctrl_c => {
                    log::info!("Poll manager: interrupted");
                    break;
                }
            }
        }

        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceIdentity;
    use crate::mock::{MockAdapter, Reply};

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    fn frame(pulses: u16) -> Vec<u8> {
        let mut raw = vec![0x00, 0x01, 0x02, 0x0a, 0x06, 0x00, 0x00, 0x00, 0x00];
        raw.extend_from_slice(&pulses.to_be_bytes());
        raw
    }

    fn build(
        adapter: MockAdapter,
        interval: Duration,
    ) -> (
        PollManager<MockAdapter>,
        command_channel::UnboundedSender<PollCommand>,
        mpsc::Receiver<PollUpdate>,
    ) {
        let identity = DeviceIdentity::new(ADDRESS, None, 1000).unwrap();
        let client = EmeraldClient::new(adapter, identity);
        let options = FetchOptions {
            connect_timeout: Duration::from_millis(200),
            notify_timeout: Duration::from_millis(100),
        };
        let (sender, receiver) = mpsc::channel();
        let (manager, commands) = PollManager::new(client, options, interval, sender);
        (manager, commands, receiver)
    }

    #[test]
    fn test_state_tracks_failures_and_recovery() {
        let mut state = PollState::default();
        state.record(&Err(FetchError::DeviceNotFound {
            address: ADDRESS.to_string(),
        }));
        state.record(&Err(FetchError::NotificationTimeout {
            timeout: Duration::from_secs(8),
        }));
        assert_eq!(state.consecutive_failures, 2);
        assert_eq!(state.failed_polls, 2);
        assert!(state.last_error.as_deref().unwrap().contains("notification"));

        let reading = crate::codec::decode(&frame(3), 0.12).unwrap();
        state.record(&Ok(reading.clone()));
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.successful_polls, 1);
        assert_eq!(state.last_reading, Some(reading));
        assert!(state.last_success_at.is_some());
    }

    #[tokio::test]
    async fn test_run_once_reports_reading() {
        let adapter = MockAdapter::new(ADDRESS).with_reply(Reply::Frames(vec![frame(25)]));
        let (manager, _commands, updates) = build(adapter, Duration::from_secs(30));

        manager.run_once().await;

        match updates.try_recv().unwrap() {
            PollUpdate::Reading(reading) => assert_eq!(reading.power_w, 3000.0),
            other => panic!("unexpected update: {:?}", other),
        }
        match updates.try_recv().unwrap() {
            PollUpdate::Stopped(diagnostics) => {
                assert_eq!(diagnostics.address, ADDRESS);
                assert_eq!(diagnostics.state.successful_polls, 1);
            }
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_once_reports_failure() {
        let adapter = MockAdapter::new("11:22:33:44:55:66");
        let (manager, _commands, updates) = build(adapter, Duration::from_secs(30));

        manager.run_once().await;

        assert!(matches!(updates.try_recv().unwrap(), PollUpdate::Failed(_)));
        match updates.try_recv().unwrap() {
            PollUpdate::Stopped(diagnostics) => {
                assert_eq!(diagnostics.state.consecutive_failures, 1);
                assert!(diagnostics.state.last_reading.is_none());
            }
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commands_drive_the_loop() {
        let adapter = MockAdapter::new(ADDRESS).with_reply(Reply::Frames(vec![frame(1)]));
        let calls = adapter.calls();
        let (manager, commands, updates) = build(adapter, Duration::from_secs(3600));

        commands.send(PollCommand::PollNow).unwrap();
        commands.send(PollCommand::Shutdown).unwrap();
        manager.run().await;

        let updates: Vec<PollUpdate> = updates.try_iter().collect();
        assert_eq!(updates.len(), 3);
        assert!(matches!(updates[0], PollUpdate::Reading(_)));
        assert!(matches!(updates[1], PollUpdate::Reading(_)));
        match &updates[2] {
            PollUpdate::Stopped(diagnostics) => assert_eq!(diagnostics.state.successful_polls, 2),
            other => panic!("unexpected update: {:?}", other),
        }
        assert_eq!(calls.snapshot().disconnects, 2);
    }

    #[tokio::test]
    async fn test_closed_command_channel_stops_loop() {
        let adapter = MockAdapter::new(ADDRESS).with_reply(Reply::Frames(vec![frame(1)]));
        let (manager, commands, updates) = build(adapter, Duration::from_secs(3600));
        drop(commands);

        manager.run().await;

        let last = updates.try_iter().last().unwrap();
        assert!(matches!(last, PollUpdate::Stopped(_)));
    }

    #[test]
    fn test_diagnostics_serialize_flat() {
        let diagnostics = Diagnostics {
            address: ADDRESS.to_string(),
            name: "Emerald Energy Advisor".to_string(),
            pulses_per_kwh: 1000,
            state: PollState::default(),
        };
        let json = serde_json::to_value(&diagnostics).unwrap();
        assert_eq!(json["address"], ADDRESS);
        assert_eq!(json["consecutive_failures"], 0);
        assert!(json["last_reading"].is_null());
    }
}
