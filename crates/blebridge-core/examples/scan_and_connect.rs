//! Scan, connect to a peripheral by name or locator, and list its GATT tree

use std::env;
use std::time::Duration;

use blebridge_core::{BridgeConfig, BridgeService, BtleplugStack, ConnectionState, Reply};
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let target = if args.len() > 1 {
        args[1].to_lowercase()
    } else {
        eprintln!("Usage: {} <NAME_OR_ADDRESS>", args[0]);
        std::process::exit(1);
    };

    let (stack, events) = BtleplugStack::new().await?;
    let (client, service) = BridgeService::spawn(stack, events, BridgeConfig::default())?;

    println!("Scanning for {}...", target);
    let mut scan = client.start_scan().await?;
    let locator = timeout(Duration::from_secs(20), async {
        loop {
            if let Reply::Scan(record) = scan.next_reply().await?
                && (record.address.to_lowercase() == target
                    || record
                        .name
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(&target)))
            {
                return Ok::<_, blebridge_core::Error>(record.address);
            }
        }
    })
    .await??;
    client.stop_scan().await?;

    println!("Connecting to {}...", locator);
    let mut connection = client.connect(locator.as_str()).await?;
    let device = loop {
        if let Reply::Connection(info) = connection.next_reply().await?
            && info.state == ConnectionState::Connected
        {
            break info.device_handle;
        }
    };
    println!("Connected as device {}", device);
    println!("RSSI: {} dBm", client.rssi(device).await?);

    for record in client.services(device).await? {
        println!("Service: {} ({:?})", record.uuid, record.service_type);
        for characteristic in client.characteristics(device, record.handle).await? {
            println!(
                "  Characteristic: {} properties=0x{:02x} write_type={}",
                characteristic.uuid, characteristic.properties, characteristic.write_type
            );
            for descriptor in client.descriptors(device, characteristic.handle).await? {
                println!("    Descriptor: {}", descriptor.uuid);
            }
        }
    }

    client.close(device).await?;
    service.shutdown().await?;
    Ok(())
}
