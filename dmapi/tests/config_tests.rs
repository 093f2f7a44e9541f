use dmapi::config::{
    ENV_API_PATH, ENV_APP_ID, ENV_LAUNCHER_ENDPOINT, ENV_LAUNCHER_TOKEN, ENV_PIPE,
    ENV_PIPE_TIMEOUT_MS, ENV_PROTOCOL, ENV_PUBLIC_KEY,
};
use dmapi::session::DEFAULT_PIPE_TIMEOUT_MS;
use dmapi::{ProtocolVersion, SdkConfig};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::path::PathBuf;

fn config_from(pairs: &[(&str, &str)]) -> SdkConfig {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    SdkConfig::from_lookup(|key| vars.get(key).cloned())
}

#[test]
fn empty_environment_gives_defaults() {
    let config = config_from(&[]);
    assert_eq!(config, SdkConfig::default());
    assert_eq!(config.pipe_timeout_ms, DEFAULT_PIPE_TIMEOUT_MS);
    assert_eq!(config.protocol, ProtocolVersion::Enveloped);
    assert!(!config.channel_available());
    assert!(!config.launched_by_launcher());
}

#[test]
fn all_variables_are_read() {
    let config = config_from(&[
        (ENV_API_PATH, "/opt/app/libdm_api.so"),
        (ENV_PIPE, "dm-pipe-42"),
        (ENV_PIPE_TIMEOUT_MS, "2500"),
        (ENV_PROTOCOL, "legacy"),
        (ENV_APP_ID, "com.example.app"),
        (ENV_PUBLIC_KEY, "pk"),
        (ENV_LAUNCHER_ENDPOINT, "http://127.0.0.1:47110"),
        (ENV_LAUNCHER_TOKEN, "token"),
    ]);
    assert_eq!(
        config,
        SdkConfig {
            library_path: Some(PathBuf::from("/opt/app/libdm_api.so")),
            pipe: Some("dm-pipe-42".into()),
            pipe_timeout_ms: 2500,
            protocol: ProtocolVersion::Legacy,
            app_id: Some("com.example.app".into()),
            public_key: Some("pk".into()),
            launcher_endpoint: Some("http://127.0.0.1:47110".into()),
            launcher_token: Some("token".into()),
        }
    );
    assert!(config.channel_available());
    assert!(config.launched_by_launcher());
}

#[test]
fn blank_values_count_as_unset() {
    let config = config_from(&[(ENV_PIPE, "   "), (ENV_APP_ID, ""), (ENV_LAUNCHER_TOKEN, " ")]);
    assert_eq!(config.pipe, None);
    assert_eq!(config.app_id, None);
    assert_eq!(config.launcher_token, None);
}

#[test]
fn values_are_trimmed() {
    let config = config_from(&[(ENV_PIPE, " dm-pipe \n")]);
    assert_eq!(config.pipe.as_deref(), Some("dm-pipe"));
}

#[test]
fn invalid_values_fall_back_to_defaults() {
    let config = config_from(&[(ENV_PIPE_TIMEOUT_MS, "soon"), (ENV_PROTOCOL, "v7")]);
    assert_eq!(config.pipe_timeout_ms, DEFAULT_PIPE_TIMEOUT_MS);
    assert_eq!(config.protocol, ProtocolVersion::Enveloped);
}
