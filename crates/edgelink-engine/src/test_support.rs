//! Scriptable plugin and event helpers for unit tests.
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::time::Instant;

use edgelink_core::event::EventReceiver;
use edgelink_core::types::Value;
use edgelink_devices::{
    ConnectionHandle, DataPoint, DeviceDescriptor, DeviceError, Endpoint, ProtocolPlugin,
    Result,
};

use crate::events::AdapterEvent;

#[derive(Debug, Default)]
struct MockState {
    init_error: Option<String>,
    init_calls: usize,
    rejected: HashMap<String, String>,
    connect_failures: HashMap<String, VecDeque<String>>,
    read_failures: HashMap<String, VecDeque<String>>,
    read_panics: HashMap<String, usize>,
    read_delays: HashMap<String, Duration>,
    connects: Vec<(String, Instant)>,
    reads: Vec<(String, Instant)>,
    disconnects: Vec<String>,
}

/// Plugin for the `mock` protocol whose failures are scripted per device
#[derive(Debug, Default)]
pub(crate) struct MockPlugin {
    state: Mutex<MockState>,
}

impl MockPlugin {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub(crate) fn fail_initialize(&self, message: &str) {
        self.with_state(|s| s.init_error = Some(message.to_string()));
    }

    pub(crate) fn reject(&self, device: &str, message: &str) {
        self.with_state(|s| s.rejected.insert(device.to_string(), message.to_string()));
    }

    pub(crate) fn fail_connects(&self, device: &str, times: usize, message: &str) {
        self.with_state(|s| {
            let queue = s.connect_failures.entry(device.to_string()).or_default();
            queue.extend(std::iter::repeat(message.to_string()).take(times));
        });
    }

    pub(crate) fn fail_reads(&self, device: &str, times: usize, message: &str) {
        self.with_state(|s| {
            let queue = s.read_failures.entry(device.to_string()).or_default();
            queue.extend(std::iter::repeat(message.to_string()).take(times));
        });
    }

    /// The next `times` reads of `device` panic instead of returning
    pub(crate) fn panic_reads(&self, device: &str, times: usize) {
        self.with_state(|s| *s.read_panics.entry(device.to_string()).or_default() += times);
    }

    pub(crate) fn delay_reads(&self, device: &str, delay: Duration) {
        self.with_state(|s| s.read_delays.insert(device.to_string(), delay));
    }

    pub(crate) fn initialize_calls(&self) -> usize {
        self.with_state(|s| s.init_calls)
    }

    pub(crate) fn connect_times(&self, device: &str) -> Vec<Instant> {
        self.with_state(|s| {
            s.connects
                .iter()
                .filter(|(d, _)| d == device)
                .map(|(_, at)| *at)
                .collect()
        })
    }

    pub(crate) fn read_times(&self, device: &str) -> Vec<Instant> {
        self.with_state(|s| {
            s.reads
                .iter()
                .filter(|(d, _)| d == device)
                .map(|(_, at)| *at)
                .collect()
        })
    }

    pub(crate) fn connect_calls(&self, device: &str) -> usize {
        self.connect_times(device).len()
    }

    pub(crate) fn read_calls(&self, device: &str) -> usize {
        self.read_times(device).len()
    }

    pub(crate) fn disconnect_calls(&self, device: &str) -> usize {
        self.with_state(|s| s.disconnects.iter().filter(|d| *d == device).count())
    }
}

#[async_trait]
impl ProtocolPlugin for MockPlugin {
    fn protocol_name(&self) -> &str {
        "mock"
    }

    async fn initialize(&self) -> Result<()> {
        self.with_state(|s| {
            s.init_calls += 1;
            match &s.init_error {
                Some(message) => Err(DeviceError::connect(message)),
                None => Ok(()),
            }
        })
    }

    fn validate_device_config(&self, descriptor: &DeviceDescriptor) -> Result<()> {
        self.with_state(|s| match s.rejected.get(&descriptor.name) {
            Some(message) => Err(DeviceError::config(message)),
            None => Ok(()),
        })
    }

    async fn connect_device(&self, descriptor: &DeviceDescriptor) -> Result<ConnectionHandle> {
        let failure = self.with_state(|s| {
            s.connects.push((descriptor.name.clone(), Instant::now()));
            s.connect_failures
                .get_mut(&descriptor.name)
                .and_then(VecDeque::pop_front)
        });
        match failure {
            Some(message) => Err(DeviceError::connect(message)),
            None => Ok(ConnectionHandle::new(
                descriptor.name.as_str(),
                Endpoint::new("mock", format!("mock://{}", descriptor.name)),
                Utc::now(),
            )),
        }
    }

    async fn disconnect_device(&self, device_name: &str) -> Result<()> {
        self.with_state(|s| s.disconnects.push(device_name.to_string()));
        Ok(())
    }

    async fn read_device_data(
        &self,
        device_name: &str,
        descriptor: &DeviceDescriptor,
    ) -> Result<Vec<DataPoint>> {
        let delay = self.with_state(|s| {
            s.reads.push((device_name.to_string(), Instant::now()));
            s.read_delays.get(device_name).copied()
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let panics = self.with_state(|s| match s.read_panics.get_mut(device_name) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        });
        if panics {
            panic!("driver bug: register map corrupted for {}", device_name);
        }
        let failure = self.with_state(|s| {
            s.read_failures
                .get_mut(device_name)
                .and_then(VecDeque::pop_front)
        });
        if let Some(message) = failure {
            return Err(DeviceError::read(message));
        }
        let now = Utc::now();
        Ok(descriptor
            .data_points
            .iter()
            .map(|p| DataPoint::good(device_name, p.name.as_str(), Value::Float(21.5), p.unit.clone(), now))
            .collect())
    }
}

/// Receive events until one matches, returning it
pub(crate) async fn recv_until<F>(rx: &mut EventReceiver<AdapterEvent>, pred: F) -> AdapterEvent
where
    F: Fn(&AdapterEvent) -> bool,
{
    loop {
        match rx.recv().await {
            Ok(event) if pred(&event) => return event,
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => panic!("event bus closed"),
        }
    }
}

/// Everything already queued on a receiver
pub(crate) fn drain(rx: &mut EventReceiver<AdapterEvent>) -> Vec<AdapterEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}
