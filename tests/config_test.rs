use rask_log_relay::app::config::INLINE_CONFIG_ENV;
use rask_log_relay::app::{App, Config, ConfigError, LogFormat, LogLevel};
use rask_log_relay::domain::RelayError;
use rask_log_relay::reliability::RetryStrategy;
use rask_log_relay::transport::TransportMode;
use serial_test::serial;
use std::env;
use std::time::Duration;
use tempfile::TempDir;

fn clean_all_env_vars() {
    let env_vars = [
        "SINK_HOST",
        "SINK_PORT",
        "SINK_TRANSPORT",
        "QUEUE_CAPACITY",
        "CONNECT_TIMEOUT_MS",
        "RECONNECT_DELAY_MS",
        "SEND_TIMEOUT_MS",
        "MAX_SEND_ATTEMPTS",
        "RETRY_STRATEGY",
        "RETRY_BASE_DELAY_MS",
        "RETRY_MAX_DELAY_MS",
        "FLUSH_GRACE_MS",
        "TCP_NO_DELAY",
        "SEND_BUFFER_SIZE",
        "COMPRESSION",
        "UDP_CHUNK_SIZE",
        "GELF_HOST",
        "LOG_TOPIC",
        "CONSUMER_GROUP",
        "KAFKA_BROKERS",
        "CONSUMER_WORKERS",
        "POLL_BATCH_SIZE",
        "ENQUEUE_RETRY_BUDGET",
        "SOURCE_TAG",
        "MAX_PAYLOAD_BYTES",
        "DEGRADED_ALERT_THRESHOLD",
        "DEGRADED_ALERT_AFTER_SECS",
        "LOG_LEVEL",
        "LOG_FORMAT",
        "ENABLE_METRICS",
        "METRICS_PORT",
        "CONFIG_FILE",
        INLINE_CONFIG_ENV,
    ];

    unsafe {
        for var in &env_vars {
            env::remove_var(var);
        }
    }
}

#[test]
#[serial]
fn test_config_from_args() {
    clean_all_env_vars();

    let config = Config::load([
        "rask-log-relay",
        "--sink-host",
        "graylog.internal",
        "--sink-port",
        "12202",
        "--transport",
        "tcp",
        "--topic",
        "app-logs",
        "--consumer-workers",
        "4",
        "--log-level",
        "debug",
        "--log-format",
        "json",
        "--gelf-host",
        "relay-7",
    ])
    .unwrap();

    assert_eq!(config.sink_host, "graylog.internal");
    assert_eq!(config.sink_port, 12202);
    assert_eq!(config.transport, TransportMode::Tcp);
    assert_eq!(config.topic, "app-logs");
    assert_eq!(config.consumer_workers, 4);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.log_format, LogFormat::Json);

    let supervisor = config.supervisor_config();
    assert_eq!(supervisor.transport.target(), "tcp://graylog.internal:12202");
    assert_eq!(supervisor.consumer.topic, "app-logs");
    assert_eq!(supervisor.codec.host, "relay-7");
    assert_eq!(supervisor.consumer_workers, 4);
}

#[test]
#[serial]
fn test_config_from_environment() {
    clean_all_env_vars();

    unsafe {
        env::set_var("SINK_HOST", "  sink.example  ");
        env::set_var("SINK_TRANSPORT", "tcp");
        env::set_var("QUEUE_CAPACITY", "64");
        env::set_var("FLUSH_GRACE_MS", "250");
        env::set_var("RETRY_STRATEGY", "fixed");
        env::set_var("COMPRESSION", "false");
        env::set_var("CONSUMER_GROUP", "relay-group");
        env::set_var("LOG_LEVEL", "warn");
    }

    let config = Config::load(["rask-log-relay"]).unwrap();

    assert_eq!(config.sink_host, "sink.example");
    assert_eq!(config.transport, TransportMode::Tcp);
    assert_eq!(config.queue_capacity, 64);
    assert!(!config.compression);
    assert_eq!(config.consumer_group, "relay-group");
    assert_eq!(config.log_level, LogLevel::Warn);
    assert_eq!(
        config.transport_config().flush_grace,
        Duration::from_millis(250)
    );
    assert_eq!(
        config.transport_config().retry.strategy,
        RetryStrategy::FixedDelay
    );

    clean_all_env_vars();
}

#[test]
#[serial]
fn test_cli_overrides_environment() {
    clean_all_env_vars();

    unsafe {
        env::set_var("SINK_PORT", "5555");
    }
    let config = Config::load(["rask-log-relay", "--sink-port", "6666"]).unwrap();
    assert_eq!(config.sink_port, 6666);

    clean_all_env_vars();
}

#[test]
#[serial]
fn test_config_file_loading() {
    clean_all_env_vars();

    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("relay.toml");
    std::fs::write(
        &config_file,
        r#"
sink_host = "graylog.prod"
sink_port = 12201
transport = "tcp"
queue_capacity = 2048
topic = "prod-logs"
consumer_workers = 8
degraded_alert_after_secs = 10
log_format = "json"
"#,
    )
    .unwrap();

    let config = Config::load([
        "rask-log-relay",
        "--config-file",
        config_file.to_str().unwrap(),
        "--sink-host",
        "ignored-by-file",
        "--stdin",
    ])
    .unwrap();

    assert_eq!(config.sink_host, "graylog.prod");
    assert_eq!(config.transport, TransportMode::Tcp);
    assert_eq!(config.queue_capacity, 2048);
    assert_eq!(config.topic, "prod-logs");
    assert_eq!(config.consumer_workers, 8);
    assert_eq!(config.log_format, LogFormat::Json);
    assert_eq!(config.config_file.as_deref(), Some(config_file.as_path()));
    assert!(config.stdin);
    assert_eq!(
        config.supervisor_config().degraded_alert_after,
        Duration::from_secs(10)
    );

    let direct = Config::from_file(&config_file).unwrap();
    assert_eq!(direct.queue_capacity, 2048);
}

#[test]
#[serial]
fn test_config_file_errors() {
    clean_all_env_vars();

    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("missing.toml");
    assert!(matches!(
        Config::from_file(&missing),
        Err(ConfigError::FileError(_))
    ));

    let broken = temp_dir.path().join("broken.toml");
    std::fs::write(&broken, "sink_port = \"not a number\"").unwrap();
    assert!(matches!(
        Config::from_file(&broken),
        Err(ConfigError::ParseError(_))
    ));

    let invalid = temp_dir.path().join("invalid.toml");
    std::fs::write(&invalid, "consumer_workers = 0").unwrap();
    assert!(matches!(
        Config::from_file(&invalid),
        Err(ConfigError::InvalidConfig(_))
    ));
}

#[test]
#[serial]
fn test_inline_config_environment() {
    clean_all_env_vars();

    unsafe {
        env::set_var(
            INLINE_CONFIG_ENV,
            "sink_host = \"inline-sink\"\nudp_chunk_size = 1420\nsource_tag = \"edge\"",
        );
    }

    let config = Config::load(["rask-log-relay", "--sink-host", "cli-sink"]).unwrap();
    assert_eq!(config.sink_host, "inline-sink");
    assert_eq!(config.udp_chunk_size, 1420);
    assert_eq!(config.codec_config().source_tag, "edge");

    unsafe {
        env::set_var(INLINE_CONFIG_ENV, "udp_chunk_size = 512");
    }
    assert!(matches!(
        Config::load(["rask-log-relay"]),
        Err(ConfigError::InvalidConfig(_))
    ));

    clean_all_env_vars();
}

#[test]
#[serial]
fn test_help_is_reported_as_cli_error() {
    clean_all_env_vars();

    match App::from_args(["rask-log-relay", "--help"]) {
        Err(RelayError::Config(ConfigError::Cli(e))) => {
            assert_eq!(e.kind(), clap::error::ErrorKind::DisplayHelp);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("--help must not produce an app"),
    }
}

#[cfg(not(feature = "kafka"))]
#[test]
#[serial]
fn test_broker_mode_requires_kafka_feature() {
    clean_all_env_vars();

    let app = App::from_args(["rask-log-relay"]).unwrap();
    let shutdown = tokio_util::sync::CancellationToken::new();
    let result = tokio_test::block_on(app.run_until(shutdown));
    assert!(matches!(
        result,
        Err(RelayError::Config(ConfigError::InvalidConfig(_)))
    ));
}
