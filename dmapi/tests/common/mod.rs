//! Shared helpers binding the client to the in-process stub.

#![allow(dead_code)]

use dmapi::{DmApi, Gateway, SdkConfig, SymbolTable};
use std::sync::Arc;

/// Pipe identifier the stub accepts.
pub const PIPE: &str = "dm-test-pipe";

/// Symbol table over every stub export.
pub fn stub_table() -> SymbolTable {
    SymbolTable::from_iter(dmapi_stub::symbol_table())
}

/// Gateway resolved against the stub. Does not touch stub state.
pub fn stub_gateway() -> Arc<Gateway> {
    Arc::new(Gateway::from_source(stub_table()).expect("stub exports every symbol"))
}

/// Config with the test pipe and a short connect timeout.
pub fn stub_config() -> SdkConfig {
    SdkConfig {
        pipe: Some(PIPE.to_string()),
        pipe_timeout_ms: 1000,
        ..SdkConfig::default()
    }
}

/// Resets the stub and returns a client connected to it.
pub fn stub_api() -> DmApi {
    dmapi_stub::reset();
    DmApi::with_gateway(stub_gateway(), stub_config())
}

/// Client over `table`, which may have symbols removed.
pub fn api_from_table(table: SymbolTable) -> DmApi {
    dmapi_stub::reset();
    let gateway = Gateway::from_source(table).expect("required symbols present");
    DmApi::with_gateway(Arc::new(gateway), stub_config())
}
