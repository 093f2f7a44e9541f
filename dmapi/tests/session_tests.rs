mod common;

use common::{stub_api, stub_config, stub_gateway, PIPE};
use dmapi::{ChannelState, DmApi, DmError, ProtocolVersion, SdkConfig, SessionChannel};
use pretty_assertions::assert_eq;
use serial_test::serial;

// ── Scoped lifecycle ─────────────────────────────────────────────

#[test]
#[serial]
fn channel_closes_when_scope_ends() {
    let api = stub_api();
    let state = api
        .with_session(|s| {
            assert!(dmapi_stub::is_connected());
            assert_eq!(s.channel().state(), ChannelState::Open);
            s.get_update_state()
        })
        .unwrap();
    assert_eq!(state.sequence, 0);
    assert!(!dmapi_stub::is_connected());
    assert_eq!(dmapi_stub::connect_count(), 1);
    assert_eq!(dmapi_stub::close_count(), 1);
}

#[test]
#[serial]
fn channel_closes_when_operation_fails() {
    let api = stub_api();
    let result: Result<(), DmError> = api.with_session(|s| {
        s.get_update_state()?;
        Err(DmError::InvalidArgument("bail out".into()))
    });
    assert!(result.is_err());
    assert!(!dmapi_stub::is_connected());
    assert_eq!(dmapi_stub::close_count(), 1);
}

#[test]
#[serial]
fn batched_calls_share_one_connect() {
    let api = stub_api();
    api.with_session(|s| {
        s.get_update_state()?;
        s.check_for_updates(None)?;
        s.get_update_state()
    })
    .unwrap();
    assert_eq!(dmapi_stub::connect_count(), 1);

    api.get_update_state();
    api.get_update_state();
    assert_eq!(dmapi_stub::connect_count(), 3);
    assert_eq!(dmapi_stub::close_count(), 3);
}

#[test]
#[serial]
fn close_is_idempotent() {
    dmapi_stub::reset();
    let gateway = stub_gateway();
    let mut channel =
        SessionChannel::open(&gateway, Some(PIPE), 0, ProtocolVersion::Enveloped).unwrap();
    channel.close();
    channel.close();
    assert_eq!(channel.state(), ChannelState::Closed);
    drop(channel);
    assert_eq!(dmapi_stub::close_count(), 1);
}

#[test]
#[serial]
fn invoke_after_close_is_rejected() {
    dmapi_stub::reset();
    let gateway = stub_gateway();
    let mut channel =
        SessionChannel::open(&gateway, Some(PIPE), 100, ProtocolVersion::Enveloped).unwrap();
    channel.close();
    let err = channel
        .invoke("DM_GetUpdateState", |gw| gw.call_owned(gw.procs().get_update_state))
        .unwrap_err();
    assert!(matches!(err, DmError::ChannelUnavailable(_)));
}

// ── Unavailable channel ──────────────────────────────────────────

#[test]
#[serial]
fn missing_pipe_is_unavailable_without_connecting() {
    dmapi_stub::reset();
    let api = DmApi::with_gateway(stub_gateway(), SdkConfig::default());
    let err = api.open_session().unwrap_err();
    assert!(matches!(err, DmError::ChannelUnavailable(_)));
    assert_eq!(api.get_update_state(), None);
    assert_eq!(api.check_for_updates(None), None);
    assert!(!api.quit_and_install(None));
    assert_eq!(dmapi_stub::connect_count(), 0);
}

#[test]
#[serial]
fn blank_pipe_is_unavailable() {
    dmapi_stub::reset();
    let gateway = stub_gateway();
    let err = SessionChannel::open(&gateway, Some("   "), 0, ProtocolVersion::default())
        .unwrap_err();
    assert!(matches!(err, DmError::ChannelUnavailable(_)));
}

#[test]
#[serial]
fn stopped_service_is_unavailable() {
    let api = stub_api();
    dmapi_stub::set_service_running(false);
    let err = api.open_session().unwrap_err();
    assert!(matches!(err, DmError::ChannelUnavailable(_)));
    assert_eq!(api.get_update_state(), None);
    assert_eq!(dmapi_stub::close_count(), 0);
}

#[test]
#[serial]
fn dropped_response_is_unavailable_and_still_closes() {
    let api = stub_api();
    dmapi_stub::set_drop_responses(true);
    let err = api.with_session(|s| s.get_update_state()).unwrap_err();
    assert!(matches!(err, DmError::ChannelUnavailable(_)));
    assert_eq!(api.check_for_updates(None), None);
    assert_eq!(dmapi_stub::connect_count(), 2);
    assert_eq!(dmapi_stub::close_count(), 2);
}

// ── Configuration ────────────────────────────────────────────────

#[test]
#[serial]
fn zero_pipe_timeout_uses_default() {
    let mut api = DmApi::with_gateway(stub_gateway(), stub_config());
    assert_eq!(api.pipe_timeout(), 1000);
    api.set_pipe_timeout(0);
    assert_eq!(api.pipe_timeout(), dmapi::session::DEFAULT_PIPE_TIMEOUT_MS);
}

#[test]
#[serial]
fn legacy_protocol_wraps_whole_response() {
    dmapi_stub::reset();
    let config = SdkConfig {
        protocol: ProtocolVersion::Legacy,
        ..stub_config()
    };
    let api = DmApi::with_gateway(stub_gateway(), config);
    let envelope = api.check_for_updates(None).unwrap();
    assert!(envelope.is_success());
    let data = envelope.data().unwrap();
    assert_eq!(data["status"], "ok");
    assert_eq!(data["data"]["state"], "up_to_date");
}

#[test]
#[serial]
fn responses_are_freed() {
    let api = stub_api();
    api.check_for_updates(None);
    api.get_update_state();
    api.get_post_update_info();
    assert_eq!(dmapi_stub::free_count(), 3);
    assert_eq!(dmapi_stub::live_strings(), 0);
}
