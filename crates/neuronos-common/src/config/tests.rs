//! Configuration tests

use super::*;
use crate::NeuronError;
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

const ENV_VARS: [&str; 4] = [ENV_BACKEND, ENV_FEATURE_MASK, ENV_NUM_THREADS, ENV_VERIFY_BACKEND];

fn clear_env() {
    for var in &ENV_VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

#[test]
fn test_default_config() {
    let config = HalConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.backend, BackendPreference::Auto);
    assert_eq!(config.feature_mask, None);
    assert_eq!(config.num_threads, None);
    assert!(!config.verify_backend);
}

#[test]
fn test_config_validation() {
    let mut config = HalConfig { num_threads: Some(0), ..HalConfig::default() };
    assert!(config.validate().is_err());

    config.num_threads = Some(4);
    config.feature_mask = Some("avx2,warp-drive".to_string());
    let err = config.validate().unwrap_err();
    assert!(matches!(
        err,
        NeuronError::Config(ConfigError::InvalidValue { key: "feature_mask", .. })
    ));
}

#[test]
fn test_effective_capabilities_prefers_override() {
    let detected = CapabilityMask::AVX2 | CapabilityMask::SSSE3;
    let mut config = HalConfig::default();
    assert_eq!(config.effective_capabilities(detected).unwrap(), detected);

    config.feature_mask = Some("none".to_string());
    assert_eq!(config.effective_capabilities(detected).unwrap(), CapabilityMask::NONE);
}

#[test]
fn test_backend_preference_from_string() {
    assert_eq!(BackendPreference::from("auto".to_string()), BackendPreference::Auto);
    assert_eq!(BackendPreference::from("  AUTO ".to_string()), BackendPreference::Auto);
    assert_eq!(
        BackendPreference::from("scalar".to_string()),
        BackendPreference::Named("scalar".to_string())
    );
}

#[test]
#[serial]
fn test_toml_config_loading() {
    clear_env();

    let toml_content = r#"
backend = "scalar"
feature_mask = "sse3,ssse3"
num_threads = 4
verify_backend = true
"#;

    let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
    temp_file.write_all(toml_content.as_bytes()).unwrap();

    let config = HalConfig::load(Some(temp_file.path())).unwrap();
    assert_eq!(config.backend, BackendPreference::Named("scalar".to_string()));
    assert_eq!(
        config.feature_mask_override().unwrap(),
        Some(CapabilityMask::SSE3 | CapabilityMask::SSSE3)
    );
    assert_eq!(config.num_threads, Some(4));
    assert!(config.verify_backend);
}

#[test]
#[serial]
fn test_json_config_loading() {
    clear_env();

    let json_content = r#"{ "num_threads": 2, "feature_mask": "0x8" }"#;

    let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
    temp_file.write_all(json_content.as_bytes()).unwrap();

    let config = HalConfig::load(Some(temp_file.path())).unwrap();
    assert_eq!(config.backend, BackendPreference::Auto);
    assert_eq!(config.num_threads, Some(2));
    assert_eq!(config.feature_mask_override().unwrap(), Some(CapabilityMask::AVX2));
}

#[test]
fn test_unsupported_extension() {
    let temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
    let err = HalConfig::from_file(temp_file.path()).unwrap_err();
    assert!(matches!(err, NeuronError::Config(ConfigError::UnsupportedFormat(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
    temp_file.write_all(b"num_threads = \"many\"").unwrap();
    let err = HalConfig::from_file(temp_file.path()).unwrap_err();
    assert!(matches!(err, NeuronError::Config(ConfigError::Parse(_))));
}

#[test]
#[serial]
fn test_env_overrides() {
    clear_env();

    unsafe {
        env::set_var(ENV_BACKEND, "scalar");
    }
    unsafe {
        env::set_var(ENV_FEATURE_MASK, "neon");
    }
    unsafe {
        env::set_var(ENV_NUM_THREADS, "8");
    }
    unsafe {
        env::set_var(ENV_VERIFY_BACKEND, "yes");
    }

    let config = HalConfig::from_env().unwrap();
    assert_eq!(config.backend, BackendPreference::Named("scalar".to_string()));
    assert_eq!(config.feature_mask_override().unwrap(), Some(CapabilityMask::NEON));
    assert_eq!(config.num_threads, Some(8));
    assert!(config.verify_backend);

    clear_env();
}

#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_env();

    let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
    temp_file.write_all(b"num_threads = 2\n").unwrap();

    unsafe {
        env::set_var(ENV_NUM_THREADS, "6");
    }
    let config = HalConfig::load(Some(temp_file.path())).unwrap();
    assert_eq!(config.num_threads, Some(6));

    clear_env();
}

#[test]
#[serial]
fn test_invalid_env_value_is_rejected() {
    clear_env();

    unsafe {
        env::set_var(ENV_VERIFY_BACKEND, "sometimes");
    }
    let err = HalConfig::from_env().unwrap_err();
    assert!(matches!(
        err,
        NeuronError::Config(ConfigError::InvalidValue { key: ENV_VERIFY_BACKEND, .. })
    ));

    clear_env();
}
