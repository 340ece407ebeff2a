// SPDX-License-Identifier: MIT OR Apache-2.0
//! Field redaction for logged message content.
//!
//! Any log line that includes request or response content must pass the
//! value through [`redact_value`] first, so configured sensitive fields
//! (passwords, tokens, …) never reach a log sink.

use crate::value::Value;

/// Replacement written over redacted values.
pub const REDACTED: &str = "**redacted**";

/// Field names censored when no explicit set is configured.
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] =
    &["password", "passphrase", "secret", "token", "authorization"];

/// Return a copy of `value` with every map entry whose key matches one of
/// `sensitive` (case-insensitive) replaced by [`REDACTED`]. Recurses into
/// maps and lists; all other nodes are cloned verbatim.
#[must_use]
pub fn redact_value(value: &Value, sensitive: &[String]) -> Value {
    match value {
        Value::Map(m) => Value::Map(
            m.iter()
                .map(|(k, v)| {
                    if sensitive.iter().any(|s| s.eq_ignore_ascii_case(k)) {
                        (k.clone(), Value::String(REDACTED.into()))
                    } else {
                        (k.clone(), redact_value(v, sensitive))
                    }
                })
                .collect(),
        ),
        Value::List(l) => Value::List(l.iter().map(|v| redact_value(v, sensitive)).collect()),
        other => other.clone(),
    }
}
