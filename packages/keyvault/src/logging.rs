//! Audit logging for security-relevant vault events
//!
//! Operational diagnostics go through `tracing`. Lifecycle events that change what a
//! client can see (delete, recover, purge, restore, release) are recorded here on the
//! `log` crate so an `env_logger` sink captures them as a flat audit trail. Item
//! values and key material never reach these helpers.

use crate::error::EntityKind;
use chrono::{SecondsFormat, Utc};
use log::{info, warn};
use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialize `env_logger` once per process.
///
/// Levels come from `RUST_LOG`, e.g. `RUST_LOG=cryypt_keyvault=debug`.
pub fn init() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::from_default_env()
            .format_timestamp_micros()
            .init();

        info!("Key vault logging initialized");
    });
}

/// Initialize logging for tests; repeated calls are harmless
pub fn init_test() {
    let _ = env_logger::Builder::from_default_env()
        .is_test(true)
        .try_init();
}

const AUDIT_TARGET: &str = "cryypt_keyvault::audit";

fn audit_line(event_type: &str, entity: EntityKind, name: &str, success: bool) -> String {
    let outcome = if success { "ok" } else { "failed" };
    format!(
        "{} {} {} '{}' {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        event_type,
        entity,
        name,
        outcome
    )
}

/// Audit a lifecycle transition on one named item.
///
/// Successes go out at info, failures at warn, both under the `cryypt_keyvault::audit` target.
pub fn log_lifecycle_event(event_type: &str, entity: EntityKind, name: &str, success: bool) {
    let line = audit_line(event_type, entity, name, success);
    if success {
        info!(target: AUDIT_TARGET, "{}", line);
    } else {
        warn!(target: AUDIT_TARGET, "{}", line);
    }
}
