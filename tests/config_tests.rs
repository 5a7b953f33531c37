//! Command line and environment configuration
//!
//! Environment variables are isolated per test with temp-env.

use clap::Parser;
use dark_detector::acquisition::CropRegion;
use dark_detector::config::Cli;
use dark_detector::DetectorError;
use pretty_assertions::assert_eq;
use std::io::Write;
use std::time::Duration;
use temp_env::with_vars;

const ALL_VARS: [&str; 15] = [
    "DARK_DETECTOR_CONFIG",
    "IMAGE_URL",
    "IMAGE_CROP",
    "INTERVAL",
    "MQTT_HOST",
    "MQTT_PORT",
    "MQTT_TOPIC",
    "MQTT_CLIENT_ID",
    "MQTT_USERNAME",
    "MQTT_PASSWORD",
    "HASS_AUTO_DISCOVERY_ENABLED",
    "HASS_AUTO_DISCOVERY_TOPIC",
    "HASS_NAME",
    "MAX_CONSECUTIVE_FAILURES",
    "DARK_DETECTOR_LOG_FILE",
];

/// Run `f` with only the given detector variables set
fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
    let mut all: Vec<(&str, Option<&str>)> = ALL_VARS.iter().map(|name| (*name, None)).collect();
    for &(name, value) in vars {
        all.retain(|(existing, _)| *existing != name);
        all.push((name, Some(value)));
    }
    with_vars(all, f);
}

fn parse(args: &[&str]) -> Cli {
    let mut argv = vec!["dark-detector"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

#[test]
fn test_minimal_environment_uses_defaults() {
    with_env(
        &[
            ("IMAGE_URL", "http://camera.local/snapshot.jpg"),
            ("MQTT_HOST", "broker.local"),
        ],
        || {
            let cli = parse(&[]);
            let config = cli.to_config().unwrap();

            assert_eq!(config.image.url, "http://camera.local/snapshot.jpg");
            assert_eq!(config.image.crop, None);
            assert_eq!(config.image.interval, Duration::from_secs(60));
            assert_eq!(config.mqtt.host, "broker.local");
            assert_eq!(config.mqtt.port, 1883);
            assert_eq!(config.mqtt.base_topic, "darkdetector");
            assert_eq!(config.mqtt.client_id, "darkdetector");
            assert_eq!(config.mqtt.credentials(), None);
            assert!(config.hass.discovery_enabled);
            assert_eq!(config.hass.discovery_topic, "homeassistant");
            assert_eq!(config.hass.entity_name, "Light Sensor");
            assert_eq!(cli.failure_policy().unwrap().max_consecutive_failures(), 1);
        },
    );
}

#[test]
fn test_full_environment() {
    with_env(
        &[
            ("IMAGE_URL", "https://camera.local/snap.png"),
            ("IMAGE_CROP", "10,20"),
            ("INTERVAL", "15"),
            ("MQTT_HOST", "10.0.0.2"),
            ("MQTT_PORT", "8883"),
            ("MQTT_TOPIC", "sensors"),
            ("MQTT_CLIENT_ID", "garage"),
            ("MQTT_USERNAME", "sensor"),
            ("MQTT_PASSWORD", "secret"),
            ("HASS_AUTO_DISCOVERY_ENABLED", "FALSE"),
            ("HASS_AUTO_DISCOVERY_TOPIC", "ha"),
            ("HASS_NAME", "Garage Light"),
            ("MAX_CONSECUTIVE_FAILURES", "4"),
        ],
        || {
            let cli = parse(&[]);
            let config = cli.to_config().unwrap();

            assert_eq!(config.image.crop, Some(CropRegion::new(10, 20, 100, 100)));
            assert_eq!(config.image.interval, Duration::from_secs(15));
            assert_eq!(config.mqtt.port, 8883);
            assert_eq!(config.mqtt.base_topic, "sensors");
            assert_eq!(config.mqtt.client_id, "garage");
            assert_eq!(config.mqtt.credentials(), Some(("sensor", "secret")));
            assert!(!config.hass.discovery_enabled);
            assert_eq!(config.hass.discovery_topic, "ha");
            assert_eq!(config.hass.entity_name, "Garage Light");
            assert_eq!(cli.failure_policy().unwrap().max_consecutive_failures(), 4);
        },
    );
}

#[test]
fn test_flags_override_environment() {
    with_env(
        &[
            ("IMAGE_URL", "http://camera.local/a.jpg"),
            ("MQTT_HOST", "broker.local"),
            ("INTERVAL", "15"),
        ],
        || {
            let cli = parse(&[
                "--image-url",
                "http://camera.local/b.jpg",
                "--interval",
                "5",
                "--image-crop",
                "1,2,3,4",
            ]);
            let config = cli.to_config().unwrap();

            assert_eq!(config.image.url, "http://camera.local/b.jpg");
            assert_eq!(config.image.interval, Duration::from_secs(5));
            assert_eq!(config.image.crop, Some(CropRegion::new(1, 2, 3, 4)));
        },
    );
}

#[test]
fn test_missing_image_url() {
    with_env(&[("MQTT_HOST", "broker.local")], || {
        let result = parse(&[]).to_config();
        match result {
            Err(DetectorError::Config(message)) => assert!(message.contains("IMAGE_URL")),
            other => panic!("expected config error, got {other:?}"),
        }
    });
}

#[test]
fn test_missing_mqtt_host() {
    with_env(&[("IMAGE_URL", "http://camera.local/a.jpg")], || {
        let result = parse(&[]).to_config();
        match result {
            Err(DetectorError::Config(message)) => assert!(message.contains("MQTT_HOST")),
            other => panic!("expected config error, got {other:?}"),
        }
    });
}

#[test]
fn test_invalid_values_are_rejected() {
    let base = [
        ("IMAGE_URL", "http://camera.local/a.jpg"),
        ("MQTT_HOST", "broker.local"),
    ];

    let mut vars = base.to_vec();
    vars.push(("IMAGE_CROP", "10"));
    with_env(&vars, || {
        assert!(matches!(parse(&[]).to_config(), Err(DetectorError::Config(_))));
    });

    let mut vars = base.to_vec();
    vars.push(("INTERVAL", "0"));
    with_env(&vars, || {
        assert!(matches!(parse(&[]).to_config(), Err(DetectorError::Config(_))));
    });

    let mut vars = base.to_vec();
    vars.push(("MAX_CONSECUTIVE_FAILURES", "0"));
    with_env(&vars, || {
        assert!(matches!(
            parse(&[]).failure_policy(),
            Err(DetectorError::Config(_))
        ));
    });

    with_env(&[("IMAGE_URL", "file:///tmp/a.jpg"), ("MQTT_HOST", "broker.local")], || {
        assert!(matches!(parse(&[]).to_config(), Err(DetectorError::Config(_))));
    });
}

#[test]
fn test_non_numeric_port_is_a_parse_error() {
    with_env(&[("MQTT_PORT", "eighteen")], || {
        assert!(Cli::try_parse_from(["dark-detector"]).is_err());
    });
}

#[test]
fn test_broker_address_with_scheme() {
    with_env(
        &[
            ("IMAGE_URL", "http://camera.local/a.jpg"),
            ("MQTT_HOST", "tcp://broker.local"),
            ("MQTT_PORT", "1884"),
        ],
        || {
            let config = parse(&[]).to_config().unwrap();
            assert_eq!(config.mqtt.host, "broker.local");
            assert_eq!(config.mqtt.port, 1884);
        },
    );

    with_env(
        &[
            ("IMAGE_URL", "http://camera.local/a.jpg"),
            ("MQTT_HOST", "mqtt://10.0.0.2:1885"),
        ],
        || {
            let config = parse(&[]).to_config().unwrap();
            assert_eq!(config.mqtt.host, "10.0.0.2");
            assert_eq!(config.mqtt.port, 1885);
        },
    );

    with_env(
        &[
            ("IMAGE_URL", "http://camera.local/a.jpg"),
            ("MQTT_HOST", "ssl://broker.local:8883"),
        ],
        || {
            assert!(matches!(parse(&[]).to_config(), Err(DetectorError::Config(_))));
        },
    );
}

#[test]
fn test_absurd_interval_is_rejected() {
    let interval = u64::MAX.to_string();
    with_env(
        &[
            ("IMAGE_URL", "http://camera.local/a.jpg"),
            ("MQTT_HOST", "broker.local"),
            ("INTERVAL", interval.as_str()),
        ],
        || match parse(&[]).to_config() {
            Err(DetectorError::Config(message)) => assert!(message.contains("interval")),
            other => panic!("expected config error, got {other:?}"),
        },
    );
}

#[test]
fn test_empty_crop_means_whole_image() {
    with_env(
        &[
            ("IMAGE_URL", "http://camera.local/a.jpg"),
            ("MQTT_HOST", "broker.local"),
            ("IMAGE_CROP", ""),
        ],
        || {
            assert_eq!(parse(&[]).to_config().unwrap().image.crop, None);
        },
    );
}

#[test]
fn test_toml_file_replaces_arguments() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
        [image]
        url = "http://camera.local/from-file.jpg"
        interval = "2m"

        [image.retry]
        max_attempts = 5
        initial_delay = "500ms"
        max_delay = "10s"
        multiplier = 3.0

        [mqtt]
        host = "file-broker.local"
        publish_timeout = "5s"
        "#
    )
    .unwrap();

    let path = file.path().to_string_lossy().into_owned();
    with_env(&[("DARK_DETECTOR_CONFIG", path.as_str())], || {
        let config = parse(&[]).to_config().unwrap();

        assert_eq!(config.image.url, "http://camera.local/from-file.jpg");
        assert_eq!(config.image.interval, Duration::from_secs(120));
        assert_eq!(config.image.retry.max_attempts, 5);
        assert_eq!(config.image.retry.initial_delay, Duration::from_millis(500));
        assert_eq!(config.mqtt.host, "file-broker.local");
        assert_eq!(config.mqtt.publish_timeout, Duration::from_secs(5));
        assert_eq!(config.hass.entity_name, "Light Sensor");
    });
}

#[test]
fn test_missing_toml_file() {
    with_env(&[("DARK_DETECTOR_CONFIG", "/nonexistent/dark-detector.toml")], || {
        assert!(matches!(parse(&[]).to_config(), Err(DetectorError::Config(_))));
    });
}
