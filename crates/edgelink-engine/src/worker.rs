/*!
 * Device workers.
 *
 * Every enabled device runs on its own task: connect, poll until a read
 * fails, back off, repeat. Nothing a worker waits on is shared with another
 * device, so a hung read or a long backoff only ever stalls its own device.
 */
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use rand::rngs::StdRng;
use tracing::{debug, error, info, warn, Instrument};

use edgelink_core::clock::{deadline, Clock, SharedClock};
use edgelink_core::logging::device_span;
use edgelink_core::utils::{catch_panic, millis_to_duration};
use edgelink_devices::{ConnectionHandle, DeviceDescriptor, DeviceError, SharedPlugin};

use crate::backoff::BackoffPolicy;
use crate::error::Result;
use crate::events::{AdapterEvent, AdapterEventBus};
use crate::poller::{PollOutcome, Poller};
use crate::state::{ConnectionStateMachine, RetryPlan};

/// A device's state machine, shared between its worker and status readers
pub type SharedMachine = Arc<RwLock<ConnectionStateMachine>>;

/// Close a device's connection, logging rather than returning failures
pub(crate) async fn disconnect_quietly(
    plugin: &SharedPlugin,
    clock: &dyn Clock,
    device: &str,
    timeout: Option<Duration>,
) {
    let disconnect = catch_panic(plugin.disconnect_device(device), |message| {
        DeviceError::disconnect(format!("plugin panicked: {}", message))
    });
    let result = deadline(clock, timeout, disconnect, || {
        DeviceError::disconnect("disconnect timeout")
    })
    .await;
    match result {
        Ok(()) => debug!("Device {} disconnected", device),
        Err(e) => warn!("Disconnecting {} failed: {}", device, e.into_disconnect()),
    }
}

/// Drives one device through connect, poll and retry
pub(crate) struct DeviceWorker {
    pub(crate) descriptor: Arc<DeviceDescriptor>,
    pub(crate) plugin: SharedPlugin,
    pub(crate) poller: Poller,
    pub(crate) machine: SharedMachine,
    pub(crate) events: AdapterEventBus,
    pub(crate) clock: SharedClock,
    pub(crate) policy: BackoffPolicy,
    pub(crate) rng: StdRng,
    pub(crate) disconnect_timeout: Option<Duration>,
    pub(crate) emit_offline_during_backoff: bool,
}

impl DeviceWorker {
    /// Run until aborted
    pub(crate) async fn run(mut self) {
        let span = device_span(&self.descriptor.name, &self.descriptor.protocol);
        async move {
            if let Err(e) = self.run_loop().await {
                error!("Device worker for {} ended: {}", self.descriptor.name, e);
            }
        }
        .instrument(span)
        .await
    }

    async fn run_loop(&mut self) -> Result<()> {
        loop {
            let now = self.clock.now();
            self.transition(|m| m.begin_connect(now))?;
            debug!("Connecting to {}", self.descriptor.name);

            let connect = catch_panic(self.plugin.connect_device(&self.descriptor), |message| {
                DeviceError::connect(format!("plugin panicked: {}", message))
            });
            let plan = match connect.await {
                Ok(handle) => {
                    self.on_connected(&handle)?;
                    self.poll_until_failure().await?
                }
                Err(e) => self.on_failure(e.into_connect())?,
            };

            self.wait_for_retry(plan).await;
        }
    }

    fn on_connected(&self, handle: &ConnectionHandle) -> Result<()> {
        self.transition(|m| m.connected())?;
        info!("Device {} connected via {}", self.descriptor.name, handle.endpoint);
        self.publish(AdapterEvent::DeviceConnected(self.descriptor.name.clone()));
        Ok(())
    }

    /// Poll immediately, then every interval after each cycle completes.
    /// Returns once a read fails.
    async fn poll_until_failure(&mut self) -> Result<RetryPlan> {
        loop {
            let connected = self.read_machine(|m| m.is_connected());
            match self.poller.cycle(connected).await {
                PollOutcome::Live(points) => {
                    let now = self.clock.now();
                    self.transition(|m| m.poll_succeeded(now))?;
                    self.publish(AdapterEvent::Data(points.clone()));
                    self.publish(AdapterEvent::DataReceived {
                        device: self.descriptor.name.clone(),
                        points,
                    });
                }
                PollOutcome::Offline(points) => {
                    self.publish(AdapterEvent::Data(points));
                }
                PollOutcome::Failed { points, error } => {
                    self.publish(AdapterEvent::Data(points));
                    let plan = self.on_failure(error)?;
                    disconnect_quietly(
                        &self.plugin,
                        &*self.clock,
                        &self.descriptor.name,
                        self.disconnect_timeout,
                    )
                    .await;
                    return Ok(plan);
                }
            }
            self.clock.sleep(self.descriptor.poll_interval()).await;
        }
    }

    /// Bookkeeping shared by connect and read failures
    fn on_failure(&self, error: DeviceError) -> Result<RetryPlan> {
        let message = error.to_string();
        let plan = self.transition(|m| m.failed(message.as_str()))?;
        warn!(
            attempt = plan.attempt,
            "Device {} failed: {}", self.descriptor.name, message
        );
        self.publish(AdapterEvent::DeviceError {
            device: self.descriptor.name.clone(),
            error: message,
        });
        self.publish(AdapterEvent::DeviceDisconnected(self.descriptor.name.clone()));
        Ok(plan)
    }

    async fn wait_for_retry(&mut self, plan: RetryPlan) {
        let delay_ms = self.policy.delay_ms(plan.attempt, &mut self.rng);
        info!(
            "Retrying {} in {} ms (attempt {})",
            self.descriptor.name, delay_ms, plan.attempt
        );
        self.publish(AdapterEvent::RetryScheduled {
            device: self.descriptor.name.clone(),
            attempt: plan.attempt,
            delay_ms,
        });

        let mut remaining = millis_to_duration(delay_ms);
        if !self.emit_offline_during_backoff {
            self.clock.sleep(remaining).await;
            return;
        }

        let interval = self.descriptor.poll_interval();
        while !remaining.is_zero() {
            let step = interval.min(remaining);
            self.clock.sleep(step).await;
            remaining -= step;
            if !remaining.is_zero() {
                let outcome = self.poller.cycle(false).await;
                self.publish(AdapterEvent::Data(outcome.points().to_vec()));
            }
        }
    }

    fn publish(&self, event: AdapterEvent) {
        self.events.publish(event);
    }

    fn transition<T>(&self, f: impl FnOnce(&mut ConnectionStateMachine) -> Result<T>) -> Result<T> {
        let mut machine = self.machine.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut machine)
    }

    fn read_machine<T>(&self, f: impl FnOnce(&ConnectionStateMachine) -> T) -> T {
        let machine = self.machine.read().unwrap_or_else(PoisonError::into_inner);
        f(&machine)
    }
}
