//! Configuration file loading

use std::io::Write;

use mqtt_queue_client::{ConfigError, ManagerConfig, PayloadEncoding, QosLevel};

#[test]
fn test_load_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"
        [clients.sensors]
        host = "broker.local"
        port = 8883
        wait_for_connection = true

        [clients.sensors.topics."sensors/+/reading"]
        subscribe = true
        encoding = "latin1"
        subscribe_options = {{ qos = "at_most_once" }}

        [clients.commands]
        host = "broker.local"
        "#
    )
    .expect("write config");

    let config = ManagerConfig::from_file(file.path()).expect("load");
    assert_eq!(config.clients.len(), 2);

    let sensors = &config.clients["sensors"];
    assert_eq!(sensors.port, 8883);
    assert!(sensors.wait_for_connection);
    let topic = &sensors.topics["sensors/+/reading"];
    assert!(topic.subscribe);
    assert_eq!(topic.encoding, PayloadEncoding::Latin1);
    assert_eq!(topic.subscribe_options.qos, QosLevel::AtMostOnce);

    let commands = &config.clients["commands"];
    assert_eq!(commands.port, 1883);
    assert!(commands.topics.is_empty());
}

#[test]
fn test_missing_file_is_an_io_error() {
    let result = ManagerConfig::from_file("/nonexistent/queue-client.toml");
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn test_invalid_client_in_file_fails_validation() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"
        [clients.bad]
        host = ""
        "#
    )
    .expect("write config");

    let result = ManagerConfig::from_file(file.path());
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}
