mod common;

use common::stub_api;
use dmapi::{
    DmError, Envelope, ProtocolVersion, UpdateEvent, UpdateSnapshot, UpdateState, UpdateWatcher,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use serial_test::serial;
use std::thread;
use std::time::{Duration, Instant};

fn snapshot(state: UpdateState, sequence: u64) -> UpdateSnapshot {
    serde_json::from_value(json!({ "state": state, "sequence": sequence })).unwrap()
}

// ── State model ──────────────────────────────────────────────────

#[test]
fn state_names_decode() {
    let cases = [
        ("idle", UpdateState::Idle),
        ("up_to_date", UpdateState::UpToDate),
        ("available", UpdateState::Available),
        ("update_available", UpdateState::Available),
        ("download_failed", UpdateState::DownloadFailed),
        ("rolling_back", UpdateState::Unknown),
    ];
    for (name, expected) in cases {
        let state: UpdateState = serde_json::from_value(json!(name)).unwrap();
        assert_eq!(state, expected, "{name}");
    }
}

#[test]
fn legal_and_illegal_transitions() {
    use UpdateState::*;
    assert!(Idle.can_transition_to(Checking));
    assert!(Checking.can_transition_to(Available));
    assert!(Available.can_transition_to(Downloading));
    assert!(Downloading.can_transition_to(Idle));
    assert!(Downloaded.can_transition_to(Installing));
    assert!(!Idle.can_transition_to(Installing));
    assert!(!UpToDate.can_transition_to(Downloading));
    assert!(Downloading.is_busy());
    assert!(!Downloaded.is_busy());
}

#[test]
fn snapshot_keeps_unmodelled_fields() {
    let snap: UpdateSnapshot = serde_json::from_value(json!({
        "state": "downloading",
        "sequence": 4,
        "progress": 0.5,
        "bytes_total": 1024
    }))
    .unwrap();
    assert_eq!(snap.progress, Some(0.5));
    assert_eq!(snap.extra["bytes_total"], 1024);
}

#[test]
fn failure_envelope_is_a_service_error() {
    let env = Envelope::decode(
        r#"{"status":"error","error":"not connected"}"#,
        ProtocolVersion::Enveloped,
    )
    .unwrap();
    let err = UpdateSnapshot::from_envelope("DM_GetUpdateState", env).unwrap_err();
    assert_eq!(
        err,
        DmError::Service {
            symbol: "DM_GetUpdateState",
            message: "not connected".into()
        }
    );
}

#[test]
fn success_without_state_is_a_decode_error() {
    let env = Envelope::decode(r#"{"status":"ok"}"#, ProtocolVersion::Enveloped).unwrap();
    let err = UpdateSnapshot::from_envelope("DM_GetUpdateState", env).unwrap_err();
    assert!(matches!(err, DmError::Decode(_)));
}

// ── Watcher ──────────────────────────────────────────────────────

#[test]
fn watcher_classifies_by_sequence() {
    let mut watcher = UpdateWatcher::new(10);
    assert!(matches!(
        watcher.observe(snapshot(UpdateState::Checking, 1)),
        UpdateEvent::Changed(_)
    ));
    assert!(matches!(
        watcher.observe(snapshot(UpdateState::Checking, 1)),
        UpdateEvent::TimedOut(_)
    ));
    // A jump over several transitions is still one change.
    let event = watcher.observe(snapshot(UpdateState::Downloaded, 5));
    assert_eq!(event.snapshot().state, UpdateState::Downloaded);
    assert!(matches!(event, UpdateEvent::Changed(_)));
    assert_eq!(watcher.last_sequence(), 5);
    assert_eq!(watcher.last_state(), Some(UpdateState::Downloaded));
}

#[test]
fn watcher_follows_service_restart() {
    let mut watcher = UpdateWatcher::starting_at(40, 10);
    let event = watcher.observe(snapshot(UpdateState::Idle, 2));
    assert!(matches!(event, UpdateEvent::Changed(_)));
    assert_eq!(watcher.last_sequence(), 2);
    assert!(matches!(
        watcher.observe(snapshot(UpdateState::Idle, 2)),
        UpdateEvent::TimedOut(_)
    ));
    assert!(matches!(
        watcher.observe(snapshot(UpdateState::Checking, 3)),
        UpdateEvent::Changed(_)
    ));
}

#[test]
fn restart_into_new_state_is_a_change() {
    let mut watcher = UpdateWatcher::starting_at(40, 10);
    watcher.observe(snapshot(UpdateState::Idle, 40));
    match watcher.observe(snapshot(UpdateState::Available, 2)) {
        UpdateEvent::Changed(snap) => assert_eq!(snap.state, UpdateState::Available),
        other => panic!("expected change, got {other:?}"),
    }
    assert_eq!(watcher.last_sequence(), 2);
    assert_eq!(watcher.last_state(), Some(UpdateState::Available));
}

#[test]
fn same_sequence_with_new_state_is_a_change() {
    let mut watcher = UpdateWatcher::new(10);
    watcher.observe(snapshot(UpdateState::Idle, 7));
    assert!(matches!(
        watcher.observe(snapshot(UpdateState::Checking, 7)),
        UpdateEvent::Changed(_)
    ));
}

// ── Long polling against the service ─────────────────────────────

#[test]
#[serial]
fn initial_state_is_idle() {
    let api = stub_api();
    let state = api.get_update_state().unwrap();
    assert_eq!(state.state, UpdateState::Idle);
    assert_eq!(state.sequence, 0);
}

#[test]
#[serial]
fn check_without_update_reaches_up_to_date() {
    let api = stub_api();
    let env = api.check_for_updates(None).unwrap();
    assert!(env.is_success());
    let state = api.get_update_state().unwrap();
    assert_eq!(state.state, UpdateState::UpToDate);
    assert_eq!(state.sequence, 2);
    assert_eq!(state.version, None);
}

#[test]
#[serial]
fn check_with_update_offers_version() {
    let api = stub_api();
    dmapi_stub::set_available_version(Some("2.1.0"));
    api.check_for_updates(None).unwrap();
    let state = api.get_update_state().unwrap();
    assert_eq!(state.state, UpdateState::Available);
    assert_eq!(state.version.as_deref(), Some("2.1.0"));
}

#[test]
#[serial]
fn wait_timeout_returns_same_state_and_sequence() {
    let api = stub_api();
    api.check_for_updates(None).unwrap();
    let before = api.get_update_state().unwrap();

    let started = Instant::now();
    let after = api
        .wait_for_update_state_change(before.sequence, 100)
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(90));
    assert_eq!(after, before);

    let mut watcher = UpdateWatcher::starting_at(before.sequence, 50);
    assert!(matches!(api.poll_watcher(&mut watcher), Some(UpdateEvent::TimedOut(_))));
}

#[test]
#[serial]
fn wait_returns_at_once_when_behind() {
    let api = stub_api();
    api.check_for_updates(None).unwrap();
    let started = Instant::now();
    let snap = api.wait_for_update_state_change(0, 10_000).unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(snap.sequence, 2);
}

#[test]
#[serial]
fn wait_is_woken_by_transition() {
    let api = stub_api();
    dmapi_stub::set_available_version(Some("2.1.0"));
    dmapi_stub::set_download_hold(true);

    let downloading = api
        .with_session(|s| {
            s.check_for_updates(None)?;
            s.download_update(None)?;
            s.get_update_state()
        })
        .unwrap();
    assert_eq!(downloading.state, UpdateState::Downloading);

    let finisher = thread::spawn(|| {
        thread::sleep(Duration::from_millis(100));
        dmapi_stub::complete_download();
    });
    let done = api
        .wait_for_update_state_change(downloading.sequence, 10_000)
        .unwrap();
    finisher.join().unwrap();

    assert_eq!(done.state, UpdateState::Downloaded);
    assert_eq!(done.sequence, downloading.sequence + 1);
    assert_eq!(done.progress, Some(1.0));
}

#[test]
#[serial]
fn watcher_sees_every_change_once() {
    let api = stub_api();
    dmapi_stub::set_available_version(Some("3.0.0"));
    let mut watcher = UpdateWatcher::new(50);
    assert_eq!(api.prime_watcher(&mut watcher).unwrap().state, UpdateState::Idle);

    api.check_for_updates(None).unwrap();
    match api.poll_watcher(&mut watcher) {
        Some(UpdateEvent::Changed(snap)) => assert_eq!(snap.state, UpdateState::Available),
        other => panic!("expected change, got {other:?}"),
    }
    assert!(matches!(api.poll_watcher(&mut watcher), Some(UpdateEvent::TimedOut(_))));
}

#[test]
#[serial]
fn poll_session_reuses_channel() {
    let api = stub_api();
    let mut watcher = UpdateWatcher::new(20);
    api.with_session(|s| {
        watcher.poll_session(s)?;
        s.check_for_updates(None)?;
        watcher.poll_session(s)
    })
    .unwrap();
    assert_eq!(watcher.last_state(), Some(UpdateState::UpToDate));
    assert_eq!(dmapi_stub::connect_count(), 1);
}

#[test]
#[serial]
fn watcher_yields_none_without_channel() {
    let api = stub_api();
    dmapi_stub::set_service_running(false);
    let mut watcher = UpdateWatcher::new(10);
    assert!(api.poll_watcher(&mut watcher).is_none());
    assert!(api.prime_watcher(&mut watcher).is_none());
}

// ── Download lifecycle ───────────────────────────────────────────

#[test]
#[serial]
fn download_without_offer_is_refused() {
    let api = stub_api();
    let env = api.download_update(None).unwrap();
    assert!(!env.is_success());
    assert_eq!(
        env.error_message().as_deref(),
        Some("no update available to download")
    );
}

#[test]
#[serial]
fn cancel_returns_to_idle() {
    let api = stub_api();
    dmapi_stub::set_available_version(Some("2.1.0"));
    dmapi_stub::set_download_hold(true);
    api.check_for_updates(None).unwrap();
    api.download_update(None).unwrap();

    let env = api.cancel_update_download(None).unwrap();
    assert!(env.is_success());
    assert_eq!(api.get_update_state().unwrap().state, UpdateState::Idle);

    let again = api.cancel_update_download(None).unwrap();
    assert!(!again.is_success());
}

#[test]
#[serial]
fn failed_download_can_be_retried() {
    let api = stub_api();
    dmapi_stub::set_available_version(Some("2.1.0"));
    dmapi_stub::set_download_hold(true);
    api.check_for_updates(None).unwrap();
    api.download_update(None).unwrap();
    dmapi_stub::fail_download("disk full");

    let failed = api.get_update_state().unwrap();
    assert_eq!(failed.state, UpdateState::DownloadFailed);
    assert_eq!(failed.error.as_deref(), Some("disk full"));

    dmapi_stub::set_download_hold(false);
    assert!(api.download_update(None).unwrap().is_success());
    let done = api.get_update_state().unwrap();
    assert_eq!(done.state, UpdateState::Downloaded);
    assert_eq!(done.error, None);
}

#[test]
#[serial]
fn quit_and_install_needs_downloaded_update() {
    let api = stub_api();
    assert!(!api.quit_and_install(None));

    dmapi_stub::set_available_version(Some("2.1.0"));
    api.check_for_updates(None).unwrap();
    api.download_update(None).unwrap();
    assert!(api.quit_and_install(None));
    assert_eq!(api.get_update_state().unwrap().state, UpdateState::Installing);
}

// ── Post-update handshake ────────────────────────────────────────

#[test]
#[serial]
fn post_update_info_repeats_until_acknowledged() {
    let api = stub_api();
    let info = json!({ "version": "2.1.0", "notes": "Faster startup" });
    dmapi_stub::set_pending_post_update_info(Some(info.clone()));

    assert_eq!(api.get_post_update_info(), Some(info.clone()));
    assert_eq!(api.get_post_update_info(), Some(info.clone()));

    let ack = api.ack_post_update_info(None).unwrap();
    assert!(ack.is_success());
    assert_eq!(ack.data(), Some(&json!({ "acknowledged": true, "info": info })));
    assert_eq!(api.get_post_update_info(), None);

    let again = api.ack_post_update_info(None).unwrap();
    assert_eq!(again, ack);
}

#[test]
#[serial]
fn nothing_pending_reads_as_none() {
    let api = stub_api();
    assert_eq!(api.get_post_update_info(), None);
    let ack = api.ack_post_update_info(None).unwrap();
    assert!(!ack.is_success());
}
