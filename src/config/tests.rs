use clap::Parser;
use uuid::Uuid;

use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_run_in_memory() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert!(settings.database.url.is_none());
    assert_eq!(settings.cache.backend, CacheBackend::Memory);
    assert_eq!(settings.cache.ttl(), Duration::from_secs(1800));
    assert_eq!(settings.cache.memory_capacity, 10_000);
    assert_eq!(settings.propagation.workers.get(), 4);
    let ticks: Vec<_> = settings
        .propagation
        .sweep_schedule
        .upcoming(chrono::Utc)
        .take(2)
        .collect();
    assert_eq!((ticks[1] - ticks[0]).num_seconds(), 30);
}

#[test]
fn rejects_malformed_sweep_schedule() {
    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&ServeOverrides {
        propagation_sweep_schedule: Some("every thirty seconds".to_string()),
        ..Default::default()
    });
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "propagation.sweep_schedule",
            ..
        })
    ));
}

#[test]
fn blank_database_url_means_memory_mode() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn postgres_cache_requires_database() {
    let mut raw = RawSettings::default();
    raw.cache.backend = Some("postgres".to_string());

    let err = Settings::from_raw(raw.clone()).expect_err("no database url");
    assert!(matches!(err, LoadError::Invalid { key: "cache.backend", .. }));

    raw.database.url = Some("postgres://localhost/namewright".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.backend, CacheBackend::Postgres);
}

#[test]
fn rejects_unknown_cache_backend() {
    let mut raw = RawSettings::default();
    raw.cache.backend = Some("redis".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.backend",
            ..
        })
    ));
}

#[test]
fn rejects_zero_values() {
    let mut raw = RawSettings::default();
    raw.cache.ttl_seconds = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.ttl_seconds",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.propagation.workers = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "propagation.workers",
            ..
        })
    ));
}

#[test]
fn rejects_ttl_beyond_a_week() {
    let mut raw = RawSettings::default();
    raw.cache.ttl_seconds = Some(u64::MAX);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.ttl_seconds",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.cache.ttl_seconds = Some(7 * 24 * 60 * 60);
    assert!(Settings::from_raw(raw).is_ok());
}

#[test]
fn rejects_unparseable_log_level() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "logging.level",
            ..
        })
    ));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["namewright"]);
    assert!(args.command.is_none());
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "namewright",
        "serve",
        "--server-port",
        "8080",
        "--cache-backend",
        "memory",
        "--propagation-workers",
        "2",
    ]);

    let Some(Command::Serve(serve)) = args.command else {
        panic!("expected serve command");
    };
    assert_eq!(serve.overrides.server_port, Some(8080));
    assert_eq!(serve.overrides.cache_backend.as_deref(), Some("memory"));
    assert_eq!(serve.overrides.propagation_workers, Some(2));
}

#[test]
fn parse_retry_arguments() {
    let job_id = Uuid::new_v4();
    let job_id_text = job_id.to_string();
    let args = CliArgs::parse_from([
        "namewright",
        "retry",
        job_id_text.as_str(),
        "--failed-only",
        "--database-url",
        "postgres://localhost/namewright",
    ]);

    let Some(Command::Retry(retry)) = args.command else {
        panic!("expected retry command");
    };
    assert_eq!(retry.job_id, job_id);
    assert!(retry.failed_only);
    assert_eq!(
        retry.database.database_url.as_deref(),
        Some("postgres://localhost/namewright")
    );
}

#[test]
fn parse_cancel_arguments() {
    let job_id = Uuid::new_v4();
    let job_id_text = job_id.to_string();
    let args = CliArgs::parse_from(["namewright", "cancel", job_id_text.as_str()]);

    let Some(Command::Cancel(cancel)) = args.command else {
        panic!("expected cancel command");
    };
    assert_eq!(cancel.job_id, job_id);
    assert!(cancel.database.database_url.is_none());
}
