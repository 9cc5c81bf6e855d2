use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use notifier::{
    app::Application,
    cli::{SubmitArgs, WorkerArgs},
    shutdown::ShutdownManager,
};
use notifier_core::{
    config::{AppConfig, BrokerType, EmailBackend},
    models::BOOKING_CONFIRMATION_TASK,
    traits::Broker,
};
use notifier_infrastructure::InMemoryBroker;

const CONFIG: &str = r#"
[broker]
type = "memory"
queue = "app.notifications"
heartbeat_queue = "app.heartbeat"

[retry]
max_attempts = 4
base_delay_ms = 10
max_delay_ms = 50

[worker]
worker_id = "app-worker"
concurrency = 2
task_timeout_seconds = 2
heartbeat_interval_seconds = 1
shutdown_grace_seconds = 10

[email]
backend = "console"
from_email = "bookings@example.com"
"#;

fn write_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    file
}

fn submit_args() -> SubmitArgs {
    SubmitArgs {
        booking_id: 1,
        email: "user@example.com".to_string(),
        listing: "Beach House".to_string(),
        check_in: NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
        check_out: NaiveDate::from_ymd_opt(2025, 12, 5).unwrap(),
        guests: Some(2),
    }
}

#[tokio::test]
async fn test_load_config_file_and_connect() {
    let file = write_config();
    let config = AppConfig::load(file.path().to_str()).unwrap();

    assert_eq!(config.broker.r#type, BrokerType::Memory);
    assert_eq!(config.broker.queue, "app.notifications");
    assert_eq!(config.retry.max_attempts, 4);
    assert_eq!(config.email.backend, EmailBackend::Console);

    let app = Application::new(config).await.unwrap();
    assert!(app.broker().is_healthy().await);

    let envelope = app.submit(&submit_args()).await.unwrap();
    assert_eq!(envelope.task_name(), BOOKING_CONFIRMATION_TASK);
    assert_eq!(envelope.max_attempts(), 4);
    assert_eq!(app.broker().queue_size("app.notifications").await.unwrap(), 1);

    app.close().await;
    assert!(!app.broker().is_healthy().await);
}

#[tokio::test]
async fn test_missing_config_file_is_rejected() {
    assert!(AppConfig::load(Some("/nonexistent/notifier.toml")).is_err());
}

#[tokio::test]
async fn test_invalid_submission_is_rejected_before_enqueue() {
    let file = write_config();
    let config = AppConfig::load(file.path().to_str()).unwrap();
    let app = Application::new(config).await.unwrap();

    let mut args = submit_args();
    args.check_out = args.check_in.pred_opt().unwrap();
    assert!(app.submit(&args).await.is_err());
    assert_eq!(app.broker().queue_size("app.notifications").await.unwrap(), 0);
}

#[tokio::test]
async fn test_worker_processes_submission_until_shutdown() {
    let file = write_config();
    let config = AppConfig::load(file.path().to_str()).unwrap();

    let memory = InMemoryBroker::new();
    let broker: Arc<dyn Broker> = Arc::new(memory.clone());
    let app = Arc::new(Application::with_broker(config, broker.clone()));
    let shutdown = ShutdownManager::new();

    let worker = {
        let app = app.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { app.run_worker(&WorkerArgs::default(), &shutdown).await })
    };

    let envelope = app.submit(&submit_args()).await.unwrap();

    let mut settled = false;
    for _ in 0..200 {
        if broker.queue_size("app.notifications").await.unwrap() == 0
            && memory.unacked_count("app.notifications").await == 0
        {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(settled, "task {} was not processed", envelope.task_id());
    assert!(broker
        .dead_letters("app.notifications")
        .await
        .unwrap()
        .is_empty());

    let heartbeats = app.inspect(Duration::from_millis(1500)).await.unwrap();
    assert_eq!(heartbeats.len(), 1);
    assert_eq!(heartbeats[0].worker_id, "app-worker");

    shutdown.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_solo_worker_stops_on_shutdown() {
    let file = write_config();
    let config = AppConfig::load(file.path().to_str()).unwrap();
    let app = Arc::new(Application::with_broker(
        config,
        Arc::new(InMemoryBroker::new()),
    ));
    let shutdown = ShutdownManager::new();

    let worker = {
        let app = app.clone();
        let shutdown = shutdown.clone();
        let args = WorkerArgs {
            solo: true,
            ..WorkerArgs::default()
        };
        tokio::spawn(async move { app.run_worker(&args, &shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker did not stop")
        .unwrap();
    assert!(result.is_ok());
}
