/*!
 * The protocol adapter.
 *
 * An adapter owns one protocol plugin and a fixed device registry. `start()`
 * spawns a worker per enabled device; `stop()` cancels every worker, closes
 * every connection and publishes `stopped` last.
 */
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use edgelink_core::clock::{SharedClock, SystemClock};
use edgelink_core::config::AdapterConfig;
use edgelink_core::event::EventReceiver;
use edgelink_core::logging::operation_span;
use edgelink_core::utils::nonzero_millis;
use edgelink_devices::{
    DeviceDescriptor, DeviceError, DeviceRegistry, QualityTagger, SharedDeviceRegistry,
    SharedPlugin,
};

use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};
use crate::events::{AdapterEvent, AdapterEventBus};
use crate::poller::Poller;
use crate::state::{ConnectionStateMachine, DeviceStatus};
use crate::worker::{disconnect_quietly, DeviceWorker, SharedMachine};

/// Runtime settings of an adapter
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterSettings {
    /// Retry delay policy
    pub backoff: BackoffPolicy,
    /// Bound on a single read, `None` for unbounded
    pub read_timeout: Option<Duration>,
    /// Bound on a single disconnect, `None` for unbounded
    pub disconnect_timeout: Option<Duration>,
    /// Capacity of each subscriber's event queue
    pub event_capacity: usize,
    /// Emit DEVICE_OFFLINE placeholders while waiting to reconnect
    pub emit_offline_during_backoff: bool,
}

impl AdapterSettings {
    /// Settings from the `[adapter]` configuration section
    pub fn from_config(config: &AdapterConfig) -> Result<Self> {
        config.validate().map_err(|e| Error::config(e.to_string()))?;
        Ok(Self {
            backoff: BackoffPolicy::from_config(&config.backoff)?,
            read_timeout: nonzero_millis(config.read_timeout_ms),
            disconnect_timeout: nonzero_millis(config.disconnect_timeout_ms),
            event_capacity: config.event_capacity,
            emit_offline_during_backoff: config.emit_offline_during_backoff,
        })
    }
}

impl Default for AdapterSettings {
    fn default() -> Self {
        let config = AdapterConfig::default();
        Self {
            backoff: BackoffPolicy::default(),
            read_timeout: nonzero_millis(config.read_timeout_ms),
            disconnect_timeout: nonzero_millis(config.disconnect_timeout_ms),
            event_capacity: config.event_capacity,
            emit_offline_during_backoff: config.emit_offline_during_backoff,
        }
    }
}

#[derive(Debug, Default)]
struct RunState {
    running: bool,
    workers: Vec<(String, JoinHandle<()>)>,
}

/// Builder for [`ProtocolAdapter`]
#[derive(Debug)]
pub struct ProtocolAdapterBuilder {
    registry: DeviceRegistry,
    plugin: SharedPlugin,
    settings: AdapterSettings,
    clock: SharedClock,
    rng_seed: Option<u64>,
}

impl ProtocolAdapterBuilder {
    /// Use these settings
    pub fn settings(mut self, settings: AdapterSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Use settings from the `[adapter]` configuration section
    pub fn config(mut self, config: &AdapterConfig) -> Result<Self> {
        self.settings = AdapterSettings::from_config(config)?;
        Ok(self)
    }

    /// Use this backoff policy
    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.settings.backoff = policy;
        self
    }

    /// Use this clock for timestamps and waits
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Seed the jitter generators, for reproducible retry delays
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Build the adapter
    pub fn build(self) -> ProtocolAdapter {
        let registry = Arc::new(self.registry);
        let slots = fresh_slots(&registry, &self.settings.backoff);
        ProtocolAdapter {
            events: AdapterEventBus::with_capacity(self.settings.event_capacity),
            tagger: QualityTagger::new(self.clock.clone()),
            registry,
            plugin: self.plugin,
            settings: self.settings,
            clock: self.clock,
            rng_seed: self.rng_seed,
            slots: RwLock::new(slots),
            run: Mutex::new(RunState::default()),
            running: AtomicBool::new(false),
        }
    }
}

/// Manages a fixed set of devices over one protocol plugin
#[derive(Debug)]
pub struct ProtocolAdapter {
    registry: SharedDeviceRegistry,
    plugin: SharedPlugin,
    settings: AdapterSettings,
    clock: SharedClock,
    tagger: QualityTagger,
    events: AdapterEventBus,
    rng_seed: Option<u64>,
    slots: RwLock<HashMap<String, SharedMachine>>,
    run: Mutex<RunState>,
    running: AtomicBool,
}

impl ProtocolAdapter {
    /// Create an adapter with default settings
    pub fn new(registry: DeviceRegistry, plugin: SharedPlugin) -> Self {
        Self::builder(registry, plugin).build()
    }

    /// Start building an adapter
    pub fn builder(registry: DeviceRegistry, plugin: SharedPlugin) -> ProtocolAdapterBuilder {
        ProtocolAdapterBuilder {
            registry,
            plugin,
            settings: AdapterSettings::default(),
            clock: SystemClock::shared(),
            rng_seed: None,
        }
    }

    /// The device registry
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// The runtime settings
    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    /// Whether the adapter is started
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Subscribe to events published after this call
    pub fn subscribe(&self) -> EventReceiver<AdapterEvent> {
        self.events.subscribe()
    }

    /// Attach a callback subscriber on its own task
    pub fn listen<F>(&self, name: &str, handler: F) -> JoinHandle<()>
    where
        F: FnMut(AdapterEvent) + Send + 'static,
    {
        self.events.listen(name, handler)
    }

    /// Start managing devices. Calling `start()` on a started adapter does nothing.
    ///
    /// Devices with invalid descriptors are faulted without affecting the
    /// others. Only a plugin initialization failure aborts the start.
    pub async fn start(&self) -> Result<()> {
        let mut run = self.run.lock().await;
        if run.running {
            debug!("Adapter already running");
            return Ok(());
        }

        let protocol = self.plugin.protocol_name().to_string();
        info!(
            "Starting {} adapter with {} devices",
            protocol,
            self.registry.len()
        );

        if let Err(e) = self.plugin.initialize().await {
            error!("Plugin {} failed to initialize: {}", protocol, e);
            self.teardown(&mut run)
                .instrument(operation_span("teardown", &protocol))
                .await;
            return Err(Error::adapter(format!(
                "plugin '{}' failed to initialize: {}",
                protocol, e
            )));
        }

        run.running = true;
        self.running.store(true, Ordering::SeqCst);
        self.events.publish(AdapterEvent::Started);

        let slots = fresh_slots(&self.registry, &self.settings.backoff);
        *self.slots.write().unwrap_or_else(PoisonError::into_inner) = slots.clone();

        for (index, descriptor) in self.registry.all().iter().enumerate() {
            if !descriptor.enabled {
                debug!("Device {} is disabled", descriptor.name);
                continue;
            }
            let Some(machine) = slots.get(&descriptor.name).cloned() else {
                continue;
            };

            if let Err(e) = self.validate(descriptor) {
                self.fault(descriptor, &machine, e);
                continue;
            }

            let worker = self.worker(descriptor, machine, index as u64);
            run.workers
                .push((descriptor.name.clone(), tokio::spawn(worker.run())));
        }

        info!(
            "Adapter started, {} of {} devices active",
            run.workers.len(),
            self.registry.len()
        );
        Ok(())
    }

    /// Stop managing devices. Calling `stop()` on a stopped adapter does nothing.
    ///
    /// Once this returns no further event is published for any device, and
    /// `stopped` has been published exactly once.
    pub async fn stop(&self) -> Result<()> {
        let mut run = self.run.lock().await;
        if !run.running {
            debug!("Adapter not running");
            return Ok(());
        }

        info!("Stopping adapter");
        self.teardown(&mut run)
            .instrument(operation_span("stop", self.plugin.protocol_name()))
            .await;
        run.running = false;
        self.running.store(false, Ordering::SeqCst);
        self.events.publish(AdapterEvent::Stopped);
        info!("Adapter stopped");
        Ok(())
    }

    /// Status of every device, disabled ones included, in registry order
    pub fn device_statuses(&self) -> Vec<DeviceStatus> {
        self.registry
            .all()
            .iter()
            .filter_map(|d| self.device_status(&d.name))
            .collect()
    }

    /// Status of one device
    pub fn device_status(&self, name: &str) -> Option<DeviceStatus> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let machine = slots.get(name)?;
        let status = machine
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status();
        Some(status)
    }

    fn validate(&self, descriptor: &DeviceDescriptor) -> std::result::Result<(), DeviceError> {
        descriptor.validate_common()?;
        if !self.plugin.handles(&descriptor.protocol) {
            return Err(DeviceError::UnsupportedProtocol(format!(
                "device '{}' uses protocol '{}' but the adapter serves '{}'",
                descriptor.name,
                descriptor.protocol,
                self.plugin.protocol_name()
            )));
        }
        self.plugin.validate_device_config(descriptor)
    }

    fn fault(&self, descriptor: &DeviceDescriptor, machine: &SharedMachine, error: DeviceError) {
        let message = error.to_string();
        warn!("Device {} rejected: {}", descriptor.name, message);
        if let Err(e) = machine
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fault(message.as_str())
        {
            error!("{}", e);
        }
        self.events.publish(AdapterEvent::DeviceError {
            device: descriptor.name.clone(),
            error: message,
        });
        self.events
            .publish(AdapterEvent::DeviceDisconnected(descriptor.name.clone()));
    }

    fn worker(&self, descriptor: &DeviceDescriptor, machine: SharedMachine, index: u64) -> DeviceWorker {
        let descriptor = Arc::new(descriptor.clone());
        let rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index)),
            None => StdRng::from_entropy(),
        };
        DeviceWorker {
            poller: Poller::new(
                self.plugin.clone(),
                descriptor.clone(),
                self.tagger.clone(),
                self.clock.clone(),
                self.settings.read_timeout,
            ),
            descriptor,
            plugin: self.plugin.clone(),
            machine,
            events: self.events.clone(),
            clock: self.clock.clone(),
            policy: self.settings.backoff,
            rng,
            disconnect_timeout: self.settings.disconnect_timeout,
            emit_offline_during_backoff: self.settings.emit_offline_during_backoff,
        }
    }

    /// Cancel workers, close connections and discard per-device state
    async fn teardown(&self, run: &mut RunState) {
        let workers: Vec<_> = run.workers.drain(..).collect();
        for (_, handle) in &workers {
            handle.abort();
        }
        for (name, handle) in workers {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => debug!("Worker for {} cancelled", name),
                Err(e) => warn!("Worker for {} panicked: {}", name, e),
            }
        }

        let disconnects = self.registry.enabled().map(|d| {
            disconnect_quietly(&self.plugin, &*self.clock, &d.name, self.settings.disconnect_timeout)
        });
        join_all(disconnects).await;

        let slots = fresh_slots(&self.registry, &self.settings.backoff);
        for machine in slots.values() {
            machine.write().unwrap_or_else(PoisonError::into_inner).stop();
        }
        *self.slots.write().unwrap_or_else(PoisonError::into_inner) = slots;
    }
}

impl Drop for ProtocolAdapter {
    fn drop(&mut self) {
        if let Ok(run) = self.run.try_lock() {
            for (_, handle) in &run.workers {
                handle.abort();
            }
        }
    }
}

fn fresh_slots(registry: &DeviceRegistry, policy: &BackoffPolicy) -> HashMap<String, SharedMachine> {
    registry
        .all()
        .iter()
        .map(|d| {
            let machine = ConnectionStateMachine::new(d, *policy);
            (d.name.clone(), Arc::new(RwLock::new(machine)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LinkState;
    use crate::test_support::{recv_until, MockPlugin};
    use edgelink_devices::DataPointDescriptor;

    fn registry(devices: Vec<DeviceDescriptor>) -> DeviceRegistry {
        DeviceRegistry::new(devices).unwrap()
    }

    fn sensor(name: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(name, "mock", 1000)
            .with_point(DataPointDescriptor::new("temperature").with_unit("degC"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let plugin = Arc::new(MockPlugin::new());
        let adapter = ProtocolAdapter::new(registry(vec![sensor("a")]), plugin.clone());
        let mut rx = adapter.subscribe();

        adapter.start().await.unwrap();
        adapter.start().await.unwrap();
        assert!(adapter.is_running());
        assert_eq!(plugin.initialize_calls(), 1);

        adapter.stop().await.unwrap();
        adapter.stop().await.unwrap();
        assert!(!adapter.is_running());

        let mut started = 0;
        let mut stopped = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                AdapterEvent::Started => started += 1,
                AdapterEvent::Stopped => stopped += 1,
                _ => {}
            }
        }
        assert_eq!((started, stopped), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_device_is_never_touched() {
        let plugin = Arc::new(MockPlugin::new());
        let adapter = ProtocolAdapter::new(
            registry(vec![sensor("on"), sensor("off").enabled(false)]),
            plugin.clone(),
        );
        adapter.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        assert_eq!(plugin.connect_calls("off"), 0);
        assert_eq!(plugin.read_calls("off"), 0);
        let status = adapter.device_status("off").unwrap();
        assert!(!status.enabled);
        assert!(!status.connected);
        assert_eq!(status.state, LinkState::Uninitialized);
        assert!(plugin.read_calls("on") >= 4);

        adapter.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_descriptors_fault_only_their_device() {
        let plugin = Arc::new(MockPlugin::new());
        plugin.reject("bad", "unit_id out of range");
        let adapter = ProtocolAdapter::new(
            registry(vec![
                sensor("bad"),
                DeviceDescriptor::new("other-protocol", "canbus", 1000),
                DeviceDescriptor::new("zero-interval", "mock", 0),
                sensor("good"),
            ]),
            plugin.clone(),
        );
        let mut rx = adapter.subscribe();

        adapter.start().await.unwrap();
        assert!(adapter.is_running());

        for name in ["bad", "other-protocol", "zero-interval"] {
            let status = adapter.device_status(name).unwrap();
            assert_eq!(status.state, LinkState::Faulted, "{}", name);
            assert!(status.last_error.is_some());
            assert_eq!(plugin.connect_calls(name), 0);
        }
        let mismatch = adapter.device_status("other-protocol").unwrap().last_error.unwrap();
        assert!(mismatch.starts_with("Unsupported protocol:"), "{}", mismatch);

        let connected = recv_until(&mut rx, |e| matches!(e, AdapterEvent::DeviceConnected(_))).await;
        assert_eq!(connected.device(), Some("good"));

        adapter.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_failure_aborts_start() {
        let plugin = Arc::new(MockPlugin::new());
        plugin.fail_initialize("license server unreachable");
        let adapter = ProtocolAdapter::new(registry(vec![sensor("a")]), plugin.clone());
        let mut rx = adapter.subscribe();

        let err = adapter.start().await.unwrap_err();
        assert!(matches!(err, Error::Adapter(ref m) if m.contains("license server")));
        assert!(!adapter.is_running());
        assert_eq!(plugin.connect_calls("a"), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_disconnects_and_resets_state() {
        let plugin = Arc::new(MockPlugin::new());
        let adapter = ProtocolAdapter::new(registry(vec![sensor("a")]), plugin.clone());
        let mut rx = adapter.subscribe();
        adapter.start().await.unwrap();
        recv_until(&mut rx, |e| matches!(e, AdapterEvent::DataReceived { .. })).await;
        assert!(adapter.device_status("a").unwrap().connected);

        adapter.stop().await.unwrap();
        assert_eq!(plugin.disconnect_calls("a"), 1);
        let status = adapter.device_status("a").unwrap();
        assert_eq!(status.state, LinkState::Stopped);
        assert!(!status.connected);
        assert!(status.last_poll_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let plugin = Arc::new(MockPlugin::new());
        let adapter = ProtocolAdapter::new(registry(vec![sensor("a")]), plugin.clone());
        let mut rx = adapter.subscribe();
        adapter.start().await.unwrap();
        recv_until(&mut rx, |e| matches!(e, AdapterEvent::DeviceConnected(_))).await;
        adapter.stop().await.unwrap();
        assert_eq!(plugin.connect_calls("a"), 1);

        adapter.start().await.unwrap();
        recv_until(&mut rx, |e| matches!(e, AdapterEvent::DeviceConnected(_))).await;
        assert_eq!(plugin.connect_calls("a"), 2);
        adapter.stop().await.unwrap();
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = AdapterConfig::default();
        config.read_timeout_ms = 250;
        config.disconnect_timeout_ms = 0;
        let settings = AdapterSettings::from_config(&config).unwrap();
        assert_eq!(settings.read_timeout, Some(Duration::from_millis(250)));
        assert_eq!(settings.disconnect_timeout, None);

        config.event_capacity = 0;
        assert!(AdapterSettings::from_config(&config).is_err());
    }
}
