//! Polls a small simulated Modbus plant, knocks one device off the bus for a
//! while and lets the adapter reconnect it.
//!
//! Settings can be overridden with `EDGELINK__ADAPTER__...` environment
//! variables, e.g. `EDGELINK__ADAPTER__BACKOFF__JITTER_FRACTION=0.2`.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use edgelink_core::config::ConfigBuilder;
use edgelink_core::logging;
use edgelink_devices::protocols::modbus::ModbusPlugin;
use edgelink_devices::protocols::simulated::SimulatedTransport;
use edgelink_devices::DeviceRegistry;
use edgelink_engine::{AdapterEvent, ProtocolAdapter};

const PLANT: &str = r#"
[[devices]]
name = "boiler"
protocol = "modbus"
poll_interval_ms = 1000

[devices.connection_params]
host = "192.168.1.20"
unit_id = 1

[[devices.data_points]]
name = "temperature"
address = "hr:100"
unit = "degC"
scaling = { factor = 0.1 }

[[devices.data_points]]
name = "burner_on"
address = "co:4"

[[devices]]
name = "pump"
protocol = "modbus"
poll_interval_ms = 2000

[devices.connection_params]
host = "192.168.1.21"

[[devices.data_points]]
name = "flow"
address = "ir:7"
unit = "m3/h"

[[devices]]
name = "spare"
protocol = "modbus"
enabled = false
poll_interval_ms = 1000

[devices.connection_params]
host = "192.168.1.99"
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigBuilder::new()
        .with_environment_prefix("EDGELINK")
        .build()
        .context("loading configuration")?;
    logging::init_from_config(&config.logging)?;

    let transport = Arc::new(SimulatedTransport::new());
    transport.set_value("hr:100", 652);
    transport.set_value("co:4", true);

    let registry = DeviceRegistry::from_toml(PLANT)?;
    let plugin = Arc::new(ModbusPlugin::new(transport.clone()));
    let adapter = ProtocolAdapter::builder(registry, plugin)
        .config(&config.adapter)?
        .build();

    let printer = adapter.listen("printer", |event| match &event {
        AdapterEvent::Data(points) => {
            for p in points {
                println!(
                    "{}.{} = {} {} [{}]",
                    p.device_name(),
                    p.point_name(),
                    p.value(),
                    p.unit().unwrap_or(""),
                    p.quality_code()
                );
            }
        }
        AdapterEvent::DataReceived { .. } => {}
        other => println!("event: {}", serde_json::to_string(other).unwrap_or_default()),
    });

    adapter.start().await?;
    tokio::time::sleep(Duration::from_secs(3)).await;

    info!("Pulling the pump off the bus");
    transport.fail_reads_from("192.168.1.21:502", "connection reset by peer");
    transport.refuse_connections_to("192.168.1.21:502", "connection refused");
    tokio::time::sleep(Duration::from_secs(8)).await;

    info!("Reconnecting the pump");
    transport.clear_faults();
    tokio::time::sleep(Duration::from_secs(6)).await;

    for status in adapter.device_statuses() {
        println!(
            "{}: {} connected={} errors={} backoff={}ms",
            status.device_name,
            status.state,
            status.connected,
            status.error_count,
            status.current_backoff_delay_ms
        );
    }

    adapter.stop().await?;
    printer.abort();
    Ok(())
}
