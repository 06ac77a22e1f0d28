//! Integration tests for configuration loading
//!
//! Covers full and minimal files, defaults for omitted sections, the save/load
//! cycle through a temporary directory and rejection of invalid values.

use headunit::config::{HeadUnitConfig, load_config};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const FULL_CONFIG: &str = r#"
[general]
log_level = "debug"

[workers]
usb_event_workers = 2
io_workers = 8
usb_event_timeout_secs = 60

[usb]
filters = ["0x04e8:*", "0x18d1:0x4ee1"]
accessory_vendor_id = 0x18d1
accessory_product_ids = [0x2d00, 0x2d01, 0x2d04]
control_timeout_ms = 500
bulk_timeout_ms = 250

[accessory]
manufacturer = "Acme"
model = "Dash 9"
description = "In-car display"
version = "1.0"
uri = "https://example.com/dash"
serial = "DASH-0001"

[network]
default_port = 6000
connect_timeout_secs = 3

[entity]
relay_addr = "127.0.0.1:5288"
"#;

fn write_config(dir: &TempDir, content: &str) -> String {
    let path = dir.path().join("headunit.toml");
    fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn test_full_config() {
    let dir = TempDir::new().unwrap();
    let config = load_config(&write_config(&dir, FULL_CONFIG)).unwrap();

    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.workers.usb_event_workers, 2);
    assert_eq!(config.workers.io_workers, 8);
    assert_eq!(config.workers.usb_event_timeout(), Duration::from_secs(60));
    assert_eq!(config.usb.filters.len(), 2);
    assert!(config.usb.accessory_ids().matches(0x18d1, 0x2d04));
    assert_eq!(config.usb.control_timeout(), Duration::from_millis(500));
    assert_eq!(config.usb.bulk_timeout(), Duration::from_millis(250));
    assert_eq!(config.accessory.manufacturer, "Acme");
    assert_eq!(config.accessory.serial, "DASH-0001");
    assert_eq!(config.network.default_port, 6000);
    assert_eq!(config.network.connect_timeout(), Duration::from_secs(3));
    assert_eq!(config.entity.relay_addr.as_deref(), Some("127.0.0.1:5288"));
}

#[test]
fn test_empty_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let config = load_config(&write_config(&dir, "")).unwrap();
    let defaults = HeadUnitConfig::default();

    assert_eq!(config.general.log_level, defaults.general.log_level);
    assert_eq!(config.workers.usb_event_workers, 4);
    assert_eq!(config.workers.usb_event_timeout_secs, 180);
    assert_eq!(config.usb.accessory_product_ids, vec![0x2d00, 0x2d01]);
    assert_eq!(config.accessory, defaults.accessory);
    assert_eq!(config.network.default_port, 5277);
}

#[test]
fn test_partial_sections_fill_in_defaults() {
    let dir = TempDir::new().unwrap();
    let config = load_config(&write_config(
        &dir,
        r#"
[workers]
io_workers = 2

[accessory]
serial = "HU-TEST"
"#,
    ))
    .unwrap();

    assert_eq!(config.workers.io_workers, 2);
    assert_eq!(config.workers.usb_event_workers, 4);
    assert_eq!(config.accessory.serial, "HU-TEST");
    assert_eq!(config.accessory.manufacturer, "Android");
}

#[test]
fn test_save_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("headunit.toml");

    let mut config = HeadUnitConfig::default();
    config.usb.filters = vec!["0x04e8:*".to_string()];
    config.entity.relay_addr = Some("localhost:5288".to_string());
    config.save(&path).unwrap();

    let loaded = HeadUnitConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.usb.filters, config.usb.filters);
    assert_eq!(loaded.entity.relay_addr, config.entity.relay_addr);
    assert_eq!(loaded.accessory, config.accessory);
}

#[test]
fn test_invalid_values_rejected() {
    let dir = TempDir::new().unwrap();

    for content in [
        "[general]\nlog_level = \"chatty\"\n",
        "[workers]\nusb_event_workers = 0\n",
        "[usb]\nbulk_timeout_ms = 0\n",
        "[usb]\nfilters = [\"04e8\"]\n",
        "[usb]\naccessory_product_ids = []\n",
        "[entity]\nrelay_addr = \"no-port\"\n",
    ] {
        let path = write_config(&dir, content);
        assert!(load_config(&path).is_err(), "accepted: {}", content);
    }
}

#[test]
fn test_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let err = load_config(&write_config(&dir, "[workers\nio_workers = 2")).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[test]
fn test_missing_file() {
    let err = load_config("/nonexistent/headunit.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
