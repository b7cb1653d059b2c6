use super::*;
use serial_test::serial;
use std::io::Write;

fn clear_env() {
    std::env::remove_var(ENV_API_BASE_URL);
    std::env::remove_var(ENV_HTTP_TIMEOUT_SECS);
    std::env::remove_var(ENV_CHECKOUT_GRACE_MS);
}

#[test]
fn test_defaults_are_valid() {
    let config = ClientConfig::default();
    config.validate().unwrap();

    assert_eq!(config.auth.renewal_interval(), Duration::from_secs(25 * 60));
    assert_eq!(config.auth.watchdog_interval(), Duration::from_secs(60));
    assert_eq!(config.auth.safety_margin(), chrono::Duration::minutes(5));
    assert_eq!(config.auth.expiry_strikes, 3);
    assert_eq!(config.billing.cache_ttl(), Duration::from_secs(30));
    assert_eq!(config.billing.checkout_grace(), Duration::from_millis(3000));
}

#[test]
fn test_partial_yaml_keeps_defaults() {
    let yaml = r#"
api_base_url: "https://api.example.com"
auth:
  safety_margin_secs: 120
billing:
  checkout_grace_ms: 5000
"#;
    let config = ClientConfig::from_yaml_str(yaml).unwrap();

    assert_eq!(config.api_base_url, "https://api.example.com");
    assert_eq!(config.auth.safety_margin_secs, 120);
    assert_eq!(config.auth.renewal_interval_secs, 1500);
    assert_eq!(config.http.timeout_secs, 30);
    assert_eq!(config.billing.checkout_grace_ms, 5000);
    assert_eq!(config.billing.cache_ttl_secs, 30);
}

#[test]
fn test_empty_yaml_is_default() {
    let config = ClientConfig::from_yaml_str("{}").unwrap();
    assert_eq!(config.api_base_url, "http://localhost:8000");
}

#[test]
fn test_malformed_yaml_is_rejected() {
    let err = ClientConfig::from_yaml_str("auth: [not, a, map]").unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse client config"));
}

#[test]
fn test_renewal_must_leave_room_before_expiry() {
    let mut config = ClientConfig::default();
    config.auth.renewal_interval_secs = 1800;

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("renewal_interval_secs"));
}

#[test]
fn test_watchdog_and_margin_bounds() {
    let mut config = ClientConfig::default();
    config.auth.watchdog_interval_secs = 0;
    assert!(config.validate().is_err());

    let mut config = ClientConfig::default();
    config.auth.safety_margin_secs = 1500;
    assert!(config.validate().is_err());

    let mut config = ClientConfig::default();
    config.auth.expiry_strikes = 0;
    assert!(config.validate().is_err());

    let mut config = ClientConfig::default();
    config.api_base_url = "  ".to_string();
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn test_env_overrides_apply() {
    clear_env();
    std::env::set_var(ENV_API_BASE_URL, "https://staging.example.com");
    std::env::set_var(ENV_HTTP_TIMEOUT_SECS, " 45 ");
    std::env::set_var(ENV_CHECKOUT_GRACE_MS, "100");

    let mut config = ClientConfig::default();
    let result = config.apply_env_overrides();
    clear_env();

    result.unwrap();
    assert_eq!(config.api_base_url, "https://staging.example.com");
    assert_eq!(config.http.timeout_secs, 45);
    assert_eq!(config.billing.checkout_grace_ms, 100);
}

#[test]
#[serial]
fn test_env_override_rejects_non_integer() {
    clear_env();
    std::env::set_var(ENV_HTTP_TIMEOUT_SECS, "thirty");

    let mut config = ClientConfig::default();
    let result = config.apply_env_overrides();
    clear_env();

    let err = result.unwrap_err();
    assert!(err.to_string().contains(ENV_HTTP_TIMEOUT_SECS));
}

#[test]
#[serial]
fn test_load_reads_file_and_validates() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client.yaml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "api_base_url: \"https://api.example.com\"").unwrap();
    writeln!(file, "http:\n  timeout_secs: 12").unwrap();
    drop(file);

    let config = ClientConfig::load(&path).unwrap();
    assert_eq!(config.api_base_url, "https://api.example.com");
    assert_eq!(config.http.timeout(), Duration::from_secs(12));

    let invalid = dir.path().join("invalid.yaml");
    std::fs::write(&invalid, "auth:\n  expiry_strikes: 0\n").unwrap();
    assert!(ClientConfig::load(&invalid).is_err());

    let missing = dir.path().join("missing.yaml");
    let err = ClientConfig::load(&missing).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
