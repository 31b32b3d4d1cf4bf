//! Probe monitor example
//!
//! Waits for a Probe Plus relay to advertise, connects, and prints every
//! measurement it reports. Reconnects on its own when the relay drops out.
//!
//! Run with: cargo run --example monitor -- AA:BB:CC:DD:EE:FF
//!
//! Optional arguments:
//!   --timeout 20   connect/subscribe timeout in seconds

use probe_plus_ble::{
    Error, MeasurementRecord, PlatformBackend, ProbeConfig, ProbeCoordinator, Result,
};
use std::sync::Arc;
use std::time::Duration;

fn print_record(record: &MeasurementRecord) {
    let now = chrono::Local::now().format("%H:%M:%S");
    let readings: Vec<String> = record
        .present()
        .map(|(sensor, value)| format!("{}={} {}", sensor, value, sensor.unit()))
        .collect();

    if readings.is_empty() {
        println!("[{}] (no reading)", now);
    } else {
        println!("[{}] {}", now, readings.join("  "));
    }
}

/// Parse `[--timeout SECS] ADDRESS` in any order.
fn parse_args(args: impl IntoIterator<Item = String>) -> Result<(String, Duration)> {
    let mut address = None;
    let mut timeout = ProbeConfig::DEFAULT_CONNECT_TIMEOUT;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--timeout" => {
                let value = args.next().unwrap_or_default();
                let secs = value.parse::<u64>().map_err(|_| Error::InvalidParameter {
                    name: "timeout".to_string(),
                    value,
                })?;
                timeout = Duration::from_secs(secs);
            }
            _ if address.is_none() && !arg.starts_with("--") => address = Some(arg),
            _ => {}
        }
    }

    let address = address.ok_or_else(|| Error::InvalidParameter {
        name: "address".to_string(),
        value: "missing".to_string(),
    })?;

    Ok((address, timeout))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,probe_plus_ble=info".into()),
        )
        .init();

    println!("Probe Plus Monitor");
    println!("==================\n");

    // Parse command line arguments
    let (address, timeout) = parse_args(std::env::args().skip(1))?;

    let backend = Arc::new(PlatformBackend::new().await?);
    let config = ProbeConfig::new(address.to_uppercase()).with_connect_timeout(timeout);
    let coordinator = ProbeCoordinator::new(backend, config)?;

    let _handle = coordinator.add_listener(print_record);

    println!("Looking for relay {}...", coordinator.address());
    coordinator.start().await?;
    println!("Found it, connecting. (Ctrl+C to exit)\n");

    if let Some(mut states) = coordinator.subscribe_state().await {
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = *states.borrow();
                println!("-- {}", state);
            }
        });
    }

    let _ = tokio::signal::ctrl_c().await;

    println!("\nShutting down...");
    coordinator.stop().await;

    Ok(())
}
