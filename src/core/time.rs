//! Timestamps and the JSON wrapper printed by CLI commands.

use crate::core::ids;
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ENVELOPE_VERSION: &str = "1";

/// Seconds since the unix epoch followed by `Z`, e.g. `1771220592Z`.
///
/// Fixed width for the foreseeable future, so these sort as strings.
pub fn now_epoch_z() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{secs}Z")
}

/// Wrap a command result. Object fields of `body` are lifted to the top level;
/// any other value is placed under `"result"`.
pub fn command_envelope(cmd: &str, status: &str, body: Value) -> Value {
    let mut out = Map::new();
    out.insert("envelope".into(), ENVELOPE_VERSION.into());
    out.insert("cmd".into(), cmd.into());
    out.insert("status".into(), status.into());
    out.insert("at".into(), now_epoch_z().into());
    out.insert("event_id".into(), ids::new_id().into());
    match body {
        Value::Object(fields) => out.extend(fields),
        Value::Null => {}
        other => {
            out.insert("result".into(), other);
        }
    }
    Value::Object(out)
}
