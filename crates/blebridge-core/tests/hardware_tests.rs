//! Hardware integration tests for blebridge-core
//!
//! These tests require actual BLE hardware and should be run with:
//! ```text
//! cargo test --package blebridge-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Set `BLEBRIDGE_DEVICE` to the locator of a connectable peripheral
//! (MAC address, or the CoreBluetooth UUID on macOS). Tests that need it
//! are skipped when it is unset.

use std::env;
use std::time::Duration;

use blebridge_core::{
    BridgeClient, BridgeConfig, BridgeService, BtleplugStack, ConnectionState, Reply,
    ServiceHandle,
};
use tokio::time::timeout;

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

fn get_device() -> Option<String> {
    env::var("BLEBRIDGE_DEVICE").ok().filter(|s| !s.is_empty())
}

async fn start() -> (BridgeClient, ServiceHandle) {
    let (stack, events) = BtleplugStack::new().await.expect("no Bluetooth adapter");
    BridgeService::spawn(stack, events, BridgeConfig::default()).expect("invalid config")
}

/// Scan until `locator` shows up so the stack can retrieve it.
async fn scan_until_seen(client: &BridgeClient, locator: &str) {
    let mut scan = client.start_scan().await.unwrap();
    let seen = timeout(BLE_TIMEOUT, async {
        while let Ok(reply) = scan.next_reply().await {
            if let Reply::Scan(record) = reply
                && record.address.eq_ignore_ascii_case(locator)
            {
                return true;
            }
        }
        false
    })
    .await;
    client.stop_scan().await.unwrap();
    assert!(matches!(seen, Ok(true)), "{} was not seen", locator);
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_scan_reports_records() {
    let (client, service) = start().await;

    let mut scan = client.start_scan().await.unwrap();
    match timeout(BLE_TIMEOUT, scan.next_reply()).await {
        Ok(Ok(Reply::Scan(record))) => {
            println!(
                "Found {} ({}) at {} dBm",
                record.name.as_deref().unwrap_or("Unknown"),
                record.address,
                record.rssi
            );
        }
        Ok(other) => panic!("Unexpected scan reply: {:?}", other),
        Err(_) => panic!("No advertisement within {:?}", BLE_TIMEOUT),
    }

    client.stop_scan().await.unwrap();
    service.shutdown().await.unwrap();
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_connect_and_discover() {
    let Some(locator) = get_device() else {
        println!("BLEBRIDGE_DEVICE not set, skipping");
        return;
    };
    let (client, service) = start().await;
    scan_until_seen(&client, &locator).await;

    let mut connection = client.connect(locator.as_str()).await.unwrap();
    let device = loop {
        match timeout(BLE_TIMEOUT, connection.next_reply()).await {
            Ok(Ok(Reply::Connection(info))) if info.state == ConnectionState::Connected => {
                break info.device_handle;
            }
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => panic!("Connect failed: {}", e),
            Err(_) => panic!("Connect timed out"),
        }
    };

    let rssi = timeout(BLE_TIMEOUT, client.rssi(device)).await.unwrap();
    println!("RSSI: {:?}", rssi);

    let services = timeout(BLE_TIMEOUT, client.services(device))
        .await
        .unwrap()
        .unwrap();
    println!("{} services", services.len());
    for record in &services {
        let characteristics = timeout(BLE_TIMEOUT, client.characteristics(device, record.handle))
            .await
            .unwrap()
            .unwrap();
        println!("  {} ({} characteristics)", record.uuid, characteristics.len());
    }

    client.close(device).await.unwrap();
    service.shutdown().await.unwrap();
}
