//! Roaster monitor example
//!
//! Connects to a coffee roaster, prints bean temperature notifications and
//! optionally sets the heater duty cycle.
//!
//! Run with: cargo run --example roaster_monitor
//!
//! To target a specific roaster and set the duty cycle:
//!   cargo run --example roaster_monitor -- --address 3C:61:05:16:C8:36 --duty 60

use roaster_ble::{
    ConnectionEvent, ConnectionState, Result, Roaster, RoasterConfig, RoasterEvent,
    DEFAULT_DEVICE_ADDRESS,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,roaster_ble=info".into()),
        )
        .init();

    println!("Coffee Roaster Monitor");
    println!("======================\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let address = args
        .iter()
        .position(|arg| arg == "--address")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| DEFAULT_DEVICE_ADDRESS.to_string());
    let duty_cycle = args
        .iter()
        .position(|arg| arg == "--duty")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<f64>().ok());

    let roaster = Roaster::with_platform_adapter(RoasterConfig::new(address.as_str())?).await?;

    let readings = Arc::new(|event: &RoasterEvent| {
        println!(
            "[{}] Bean: {:>5.1}°C  Heater: {:>3.0}%",
            event.observed_at.format("%H:%M:%S"),
            event.temperature_celsius,
            event.duty_cycle_percent
        );
    });
    roaster.subscribe(&readings);

    let transitions = Arc::new(|event: &ConnectionEvent| match event.reason {
        Some(reason) => println!("Connection: {} ({:?})", event.state, reason),
        None => println!("Connection: {}", event.state),
    });
    roaster.add_connection_listener(&transitions);

    println!("Connecting to {}...\n", address);
    if !roaster.connect().await {
        eprintln!("Could not reach roaster at {}", address);
        return Ok(());
    }

    // Wait for discovery to complete
    let mut state = roaster.watch_state();
    let ready = tokio::time::timeout(
        Duration::from_secs(15),
        state.wait_for(|s| matches!(s, ConnectionState::Ready | ConnectionState::Disconnected)),
    )
    .await;

    if !roaster.is_connected() {
        if let Some(fault) = roaster.take_fault() {
            eprintln!("Session ended: {}", fault);
        } else if ready.is_err() {
            eprintln!("Timed out waiting for the roaster");
        }
        roaster.disconnect();
        return Ok(());
    }

    if let Some(percent) = duty_cycle {
        if roaster.set_duty_cycle(percent) {
            println!("Heater duty cycle set to {:.0}%", percent.trunc());
        } else {
            eprintln!("Duty cycle {} rejected", percent);
        }
    }

    println!("Press Ctrl+C to exit\n");
    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Unable to listen for Ctrl+C: {}", e);
    }

    println!("\nDisconnecting...");
    println!("Last snapshot: {:?}", roaster.snapshot());
    roaster.disconnect();
    tokio::time::sleep(Duration::from_millis(500)).await;

    Ok(())
}
