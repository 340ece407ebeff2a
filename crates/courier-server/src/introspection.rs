// SPDX-License-Identifier: MIT OR Apache-2.0
//! The default `introspect` and `status` actions.
//!
//! Registered automatically for any service that does not provide its
//! own handlers under those names.

use courier_core::value::{Map, Value};

use crate::action::ActionRecord;

/// The introspection-relevant part of a registered action.
#[derive(Debug, Clone)]
pub struct ActionMetadata {
    /// Action name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Declared request schema, if any.
    pub request_schema: Option<Value>,
    /// Declared response schema, if any.
    pub response_schema: Option<Value>,
}

impl ActionMetadata {
    /// Extract metadata from a record.
    #[must_use]
    pub fn of(record: &ActionRecord) -> Self {
        Self {
            name: record.name.clone(),
            description: record.description.clone(),
            request_schema: record.request_schema.clone(),
            response_schema: record.response_schema.clone(),
        }
    }

    fn to_value(&self) -> Value {
        let mut m = Map::new();
        m.insert("description".into(), Value::from(self.description.as_str()));
        if let Some(schema) = &self.request_schema {
            m.insert("request_schema".into(), schema.clone());
        }
        if let Some(schema) = &self.response_schema {
            m.insert("response_schema".into(), schema.clone());
        }
        Value::Map(m)
    }
}

/// The default `status` action: service identity and liveness.
pub(crate) fn status_record(service_name: &str) -> ActionRecord {
    let service_name = service_name.to_owned();
    ActionRecord::new("status", move |_call| {
        let service_name = service_name.clone();
        async move {
            let mut body = Map::new();
            body.insert("service".into(), Value::from(service_name.as_str()));
            body.insert(
                "version".into(),
                Value::from(env!("CARGO_PKG_VERSION")),
            );
            body.insert("healthy".into(), Value::Bool(true));
            Ok(Value::Map(body))
        }
    })
    .with_description("Report the service's identity and health")
}

/// The default `introspect` action: enumerate registered actions and
/// their schemas.
pub(crate) fn introspect_record(mut metadata: Vec<ActionMetadata>) -> ActionRecord {
    metadata.sort_by(|a, b| a.name.cmp(&b.name));
    ActionRecord::new("introspect", move |_call| {
        let metadata = metadata.clone();
        async move {
            let actions: Map = metadata
                .iter()
                .map(|m| (m.name.clone(), m.to_value()))
                .collect();
            let mut body = Map::new();
            body.insert("actions".into(), Value::Map(actions));
            Ok(Value::Map(body))
        }
    })
    .with_description("Enumerate the service's registered actions and schemas")
}
