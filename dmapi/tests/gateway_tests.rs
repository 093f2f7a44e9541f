mod common;

use common::{api_from_table, stub_api, stub_gateway, stub_table};
use dmapi::{DmError, Gateway, OnceGate, SymbolTable};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

// ── Resolution ───────────────────────────────────────────────────

#[test]
fn resolves_full_surface_from_table() {
    let gateway = Gateway::from_source(stub_table()).unwrap();
    assert!(gateway.procs().set_activation_metadata.is_some());
}

#[test]
fn missing_required_symbol_is_fatal() {
    let mut table = stub_table();
    assert!(table.remove("DM_GetUpdateState"));
    let err = Gateway::from_source(table).unwrap_err();
    assert_eq!(
        err,
        DmError::MissingSymbol {
            symbol: "DM_GetUpdateState"
        }
    );
    assert!(err.is_fatal());
    assert_eq!(err.to_string(), "find proc DM_GetUpdateState: symbol not found");
}

#[test]
fn empty_table_fails_on_first_required_symbol() {
    let err = Gateway::from_source(SymbolTable::new()).unwrap_err();
    assert!(matches!(err, DmError::MissingSymbol { .. }));
}

#[test]
#[serial]
fn missing_optional_symbol_fails_only_that_call() {
    let mut table = stub_table();
    table.remove("SetActivationMetadata");
    let api = api_from_table(table);

    let err = api.set_activation_metadata("seat", "1").unwrap_err();
    assert_eq!(
        err,
        DmError::SymbolUnavailable {
            symbol: "SetActivationMetadata"
        }
    );
    assert!(!err.is_fatal());

    // Everything else still works.
    assert!(api.set_product_id("com.example.app").is_ok());
    assert!(api.get_update_state().is_some());
}

#[test]
fn missing_cancel_download_fails_init() {
    let mut table = stub_table();
    assert!(table.remove("DM_CancelUpdateDownload"));
    assert_eq!(
        Gateway::from_source(table).unwrap_err(),
        DmError::MissingSymbol {
            symbol: "DM_CancelUpdateDownload"
        }
    );
}

#[test]
fn load_from_missing_path_reports_library_error() {
    let err = unsafe { Gateway::load(Path::new("/nonexistent/libdm_api.so")) }.unwrap_err();
    match &err {
        DmError::LibraryLoad { path, .. } => assert!(path.contains("libdm_api.so")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_fatal());
}

#[test]
fn status_zero_is_success() {
    assert_eq!(Gateway::status("Reset", 0), Ok(()));
    assert_eq!(
        Gateway::status("Reset", 5),
        Err(DmError::CallFailed {
            symbol: "Reset",
            code: 5
        })
    );
}

// ── Single-flight init ───────────────────────────────────────────

#[test]
fn concurrent_first_use_runs_loader_once() {
    let gate = Arc::new(OnceGate::new());
    let loads = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let gate = Arc::clone(&gate);
            let loads = Arc::clone(&loads);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                gate.get_or_init(|| {
                    loads.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(50));
                    Gateway::from_source(stub_table())
                })
                .unwrap()
            })
        })
        .collect();

    let gateways: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    for gw in &gateways[1..] {
        assert!(Arc::ptr_eq(&gateways[0], gw));
    }
}

#[test]
fn failed_init_is_cached() {
    let gate = OnceGate::new();
    assert!(gate.get().is_none());

    let first = gate.get_or_init(|| {
        Err(DmError::LibraryLoad {
            path: "missing.so".into(),
            reason: "not found".into(),
        })
    });
    let second = gate.get_or_init(|| Gateway::from_source(stub_table()));

    assert_eq!(first.clone().unwrap_err(), second.unwrap_err());
    assert_eq!(gate.get().unwrap().unwrap_err(), first.unwrap_err());
}

#[test]
fn concurrent_callers_share_failure() {
    let gate = Arc::new(OnceGate::new());
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let gate = Arc::clone(&gate);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                gate.get_or_init(|| Gateway::from_source(SymbolTable::new()))
            })
        })
        .collect();
    for h in handles {
        let err = h.join().unwrap().unwrap_err();
        assert!(err.is_fatal());
    }
}

// ── Runtime calls ────────────────────────────────────────────────

#[test]
#[serial]
fn version_is_static_and_never_freed() {
    let api = stub_api();
    assert_eq!(api.get_version(), "1.4.0-stub");
    assert_eq!(api.get_version(), "1.4.0-stub");
    assert_eq!(dmapi_stub::free_count(), 0);
}

#[test]
#[serial]
fn canonical_json_sorts_keys_and_frees_result() {
    let api = stub_api();
    let canonical = api.json_to_canonical(r#"{ "b": 1, "a": [true, null] }"#).unwrap();
    assert_eq!(canonical, r#"{"a":[true,null],"b":1}"#);
    assert_eq!(dmapi_stub::free_count(), 1);
    assert_eq!(dmapi_stub::live_strings(), 0);
}

#[test]
#[serial]
fn canonical_json_null_result_is_failure() {
    let api = stub_api();
    let err = api.json_to_canonical("{not json").unwrap_err();
    assert_eq!(
        err,
        DmError::CallFailed {
            symbol: "DM_JsonToCanonical",
            code: -1
        }
    );
    assert!(api.get_last_error().starts_with("invalid json"));
    assert_eq!(dmapi_stub::live_strings(), 0);
}

#[test]
#[serial]
fn restart_not_required_under_stub() {
    let api = stub_api();
    assert!(!api.restart_app_if_necessary());
}

#[test]
fn gateway_is_shared_between_clients() {
    let gateway = stub_gateway();
    let a = dmapi::DmApi::with_gateway(Arc::clone(&gateway), common::stub_config());
    let b = a.clone();
    assert!(std::ptr::eq(a.gateway(), b.gateway()));
}
