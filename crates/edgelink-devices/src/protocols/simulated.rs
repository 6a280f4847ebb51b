/*!
 * In-memory field transport for demos and tests.
 *
 * Every address yields a deterministic value unless one was set explicitly.
 * Faults can be injected at runtime: refused opens, failing reads and slow
 * reads.
 */
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use edgelink_core::types::Value;

use crate::error::{DeviceError, Result};
use crate::protocol::{Endpoint, FieldTransport};

#[derive(Debug, Clone, Default)]
struct EndpointFault {
    refuse_open: Option<String>,
    fail_read: Option<String>,
}

/// A transport backed by an in-memory value table
#[derive(Debug, Default)]
pub struct SimulatedTransport {
    values: RwLock<HashMap<String, Value>>,
    open: RwLock<HashSet<String>>,
    refuse_open: RwLock<Option<String>>,
    fail_read: RwLock<Option<String>>,
    endpoint_faults: RwLock<HashMap<String, EndpointFault>>,
    read_latency: RwLock<Option<Duration>>,
    opens: AtomicUsize,
    reads: AtomicUsize,
    closes: AtomicUsize,
}

impl SimulatedTransport {
    /// Create a transport with no faults
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the value returned for an address
    pub fn set_value<A: Into<String>, V: Into<Value>>(&self, address: A, value: V) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.into(), value.into());
    }

    /// Make every subsequent open fail with `message`
    pub fn refuse_connections<S: Into<String>>(&self, message: S) {
        *self.refuse_open.write().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    /// Make every subsequent read fail with `message`
    pub fn fail_reads<S: Into<String>>(&self, message: S) {
        *self.fail_read.write().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    /// Make opens of one endpoint address fail with `message`
    pub fn refuse_connections_to<A: Into<String>, S: Into<String>>(&self, address: A, message: S) {
        self.endpoint_faults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(address.into())
            .or_default()
            .refuse_open = Some(message.into());
    }

    /// Make reads from one endpoint address fail with `message`
    pub fn fail_reads_from<A: Into<String>, S: Into<String>>(&self, address: A, message: S) {
        self.endpoint_faults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(address.into())
            .or_default()
            .fail_read = Some(message.into());
    }

    /// Delay every subsequent read by `latency`
    pub fn set_read_latency(&self, latency: Duration) {
        *self.read_latency.write().unwrap_or_else(PoisonError::into_inner) = Some(latency);
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        *self.refuse_open.write().unwrap_or_else(PoisonError::into_inner) = None;
        *self.fail_read.write().unwrap_or_else(PoisonError::into_inner) = None;
        *self.read_latency.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.endpoint_faults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Whether an endpoint address is currently open
    pub fn is_open(&self, address: &str) -> bool {
        self.open
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(address)
    }

    /// Number of successful opens so far
    pub fn open_calls(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of read calls so far, failed ones included
    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of close calls so far
    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn value_for(&self, address: &str) -> Value {
        if let Some(value) = self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
        {
            return value.clone();
        }
        let seed: i64 = address.bytes().map(i64::from).sum();
        Value::Integer(seed % 1000)
    }

    fn injected(slot: &RwLock<Option<String>>) -> Option<String> {
        slot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn endpoint_fault(&self, address: &str) -> EndpointFault {
        self.endpoint_faults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl FieldTransport for SimulatedTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<()> {
        if let Some(message) = Self::injected(&self.refuse_open)
            .or_else(|| self.endpoint_fault(&endpoint.address).refuse_open)
        {
            return Err(DeviceError::connect(message));
        }
        self.open
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint.address.clone());
        self.opens.fetch_add(1, Ordering::SeqCst);
        trace!("Simulated open of {}", endpoint);
        Ok(())
    }

    async fn read(&self, endpoint: &Endpoint, addresses: &[String]) -> Result<Vec<Value>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let latency = *self.read_latency.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(message) = Self::injected(&self.fail_read)
            .or_else(|| self.endpoint_fault(&endpoint.address).fail_read)
        {
            return Err(DeviceError::read(message));
        }
        if !self.is_open(&endpoint.address) {
            return Err(DeviceError::read(format!("endpoint {} not open", endpoint)));
        }
        Ok(addresses.iter().map(|a| self.value_for(a)).collect())
    }

    async fn close(&self, endpoint: &Endpoint) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&endpoint.address);
        Ok(())
    }
}
