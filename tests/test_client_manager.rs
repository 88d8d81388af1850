//! Client construction and the named-client manager

use std::sync::Arc;
use std::time::Duration;

use mqtt_queue_client::testing::MockBinding;
use mqtt_queue_client::{
    ClientConfig, ClientManager, ManagerConfig, QueueClient, QueueError,
};

fn unreachable_config() -> ClientConfig {
    // Port 1 never hosts a broker; connects stay pending forever.
    ClientConfig::new("127.0.0.1", 1)
}

#[tokio::test]
async fn test_connect_returns_before_session_is_established() {
    let client = QueueClient::connect("eager", unreachable_config())
        .await
        .expect("connect is lazy by default");

    assert_eq!(client.name(), "eager");
    assert!(!client.is_connected());
    // No default topics declared, so the bootstrap completes trivially.
    assert!(client.topics().is_bootstrap_applied());

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_connect_with_wait_times_out_against_dead_broker() {
    let mut config = unreachable_config();
    config.wait_for_connection = true;
    config.wait_for_connection_timeout_secs = 1;

    let err = QueueClient::connect("blocked", config)
        .await
        .expect_err("no broker to reach");
    match err {
        QueueError::ConnectionTimeout { host, port } => {
            assert_eq!(host, "127.0.0.1");
            assert_eq!(port, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_publish_against_unreachable_broker_fails_after_budget() {
    let client = QueueClient::connect("offline", unreachable_config())
        .await
        .expect("lazy connect");
    let topic = client
        .topics()
        .add_topic("t/1", &mqtt_queue_client::AddTopicOptions::default());

    let start = std::time::Instant::now();
    let result = topic
        .publish_with_options("x", &mqtt_queue_client::PublishOptions::default(), 2)
        .await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(QueueError::PublishNotConnected { .. })));
    // 4 waits of 500ms each; allow scheduling slack on top.
    assert!(elapsed >= std::time::Duration::from_millis(1_900), "elapsed {elapsed:?}");
    assert!(elapsed < std::time::Duration::from_millis(3_500), "elapsed {elapsed:?}");

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_connect_rejects_invalid_config() {
    let config = ClientConfig::new("", 1883);
    let err = QueueClient::connect("bad", config)
        .await
        .expect_err("empty host");
    assert!(matches!(err, QueueError::Config(_)));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_connection_timeout_is_wall_clock_despite_flaps() {
    let binding = MockBinding::disconnected();
    let client = QueueClient::with_binding("flappy", "broker.local", 1883, binding.clone());

    // Paired flips resolve the waiter's wakeup while the flag still reads
    // disconnected; they must not eat into the readiness timeout.
    let flipper = binding.clone();
    let flips = tokio::spawn(async move {
        for _ in 0..20 {
            flipper.set_connected(true);
            flipper.set_connected(false);
            tokio::task::yield_now().await;
        }
    });

    let start = tokio::time::Instant::now();
    let err = client.wait_for_connection(2).await.expect_err("timeout");
    let elapsed = start.elapsed();
    flips.await.expect("flipper task");

    assert!(matches!(err, QueueError::ConnectionTimeout { .. }));
    assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_manager_build_connects_all_declared_clients() {
    let config = ManagerConfig::from_toml(
        r#"
        [clients.alpha]
        host = "127.0.0.1"
        port = 1

        [clients.beta]
        host = "127.0.0.1"
        port = 1
        "#,
    )
    .expect("parse");

    let manager = ClientManager::build(config).await.expect("build");
    assert!(manager.has_client("alpha").await);
    assert!(manager.has_client("beta").await);

    let mut names = manager.client_names().await;
    names.sort();
    assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);

    manager.close_all().await;
    assert!(manager.client_names().await.is_empty());
}

#[tokio::test]
async fn test_manager_get_returns_registered_instance() {
    let manager = ClientManager::new();
    let binding = MockBinding::connected();
    let client = QueueClient::with_binding("shared", "localhost", 1883, binding);
    manager.adopt(client.clone()).await;

    let fetched = manager.get("shared").await.expect("registered");
    assert!(Arc::ptr_eq(&fetched, &client));
    assert!(manager.get("missing").await.is_none());

    manager.close_all().await;
}

#[tokio::test]
async fn test_manager_remove_closes_the_client() {
    let manager = ClientManager::new();
    let binding = MockBinding::connected();
    let client = QueueClient::with_binding("doomed", "localhost", 1883, binding.clone());
    manager.adopt(client).await;

    assert!(manager.remove_client("doomed").await.expect("remove"));
    assert!(binding.is_closed());
    assert!(!manager.remove_client("doomed").await.expect("second remove"));
}
