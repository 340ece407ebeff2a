// SPDX-License-Identifier: MIT OR Apache-2.0
//! Response expansion: replacing identifiers inside a response with full
//! objects fetched through follow-up batch action calls.
//!
//! Objects are recognised by a `_type` key. For each requested
//! `(type, expansion-name)` pair, the configured route names a service
//! action that accepts a list of ids under `request_field` and returns a
//! map keyed by id under `response_field`; fetched objects are spliced
//! into each matching object at `destination_field`. Expansion recurses
//! into spliced objects, bounded by a depth limit and a per-response
//! visited set so cyclic object graphs terminate. The whole pass is
//! idempotent: an object whose destination field is already present is
//! never re-fetched.

use std::collections::{BTreeMap, HashMap, HashSet};

use courier_core::model::JobResponse;
use courier_core::value::{Map, Value};
use courier_core::ClientError;
use serde::{Deserialize, Serialize};

use crate::{CallOptions, Client};

/// One configured expansion route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionRoute {
    /// The `_type` value this route applies to.
    pub type_name: String,
    /// The expansion's name, as callers request it.
    pub name: String,
    /// Field on the matching object holding the id (or list of ids).
    pub source_field: String,
    /// Field on the matching object the fetched object is spliced into.
    pub destination_field: String,
    /// Service handling the batch fetch.
    pub service: String,
    /// Action accepting a list of ids and returning a map keyed by id.
    pub action: String,
    /// Request body field carrying the id list.
    pub request_field: String,
    /// Response body field carrying the id → object map.
    pub response_field: String,
    /// Raise action errors from this route instead of suppressing them.
    #[serde(default)]
    pub raise_action_errors: bool,
}

/// All configured expansion routes, loaded at client construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionSettings {
    /// The routes, keyed logically by `(type_name, name)`.
    pub routes: Vec<ExpansionRoute>,
    /// Recursion bound for expansions that trigger further expansions.
    pub max_depth: u32,
}

impl Default for ExpansionSettings {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            max_depth: 4,
        }
    }
}

impl ExpansionSettings {
    /// The route for a `(type, expansion-name)` pair, if configured.
    #[must_use]
    pub fn route(&self, type_name: &str, name: &str) -> Option<&ExpansionRoute> {
        self.routes
            .iter()
            .find(|r| r.type_name == type_name && r.name == name)
    }
}

// ---------------------------------------------------------------------------
// The expansion pass
// ---------------------------------------------------------------------------

struct PendingFetch {
    route: ExpansionRoute,
    /// Stringified id → original id value, deduplicated.
    ids: BTreeMap<String, Value>,
}

/// Expand `response` in place per the caller's request.
///
/// # Errors
///
/// [`ClientError::Expansion`] for an unconfigured route; transport
/// errors from the follow-up calls always propagate; action errors are
/// suppressed unless the route opts in.
pub(crate) async fn perform_expansions(
    client: &Client,
    response: &mut JobResponse,
    requested: &BTreeMap<String, Vec<String>>,
    settings: &ExpansionSettings,
) -> Result<(), ClientError> {
    let mut visited: HashSet<(String, String)> = HashSet::new();

    for _ in 0..settings.max_depth {
        // Collect every id that still needs fetching.
        let mut pending: BTreeMap<(String, String), PendingFetch> = BTreeMap::new();
        for action in &response.actions {
            if let Some(body) = &action.body {
                collect_pending(body, requested, settings, &visited, &mut pending)?;
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        // Batch-fetch per route, then splice.
        let mut objects: HashMap<(String, String), Value> = HashMap::new();
        for ((type_name, _), fetch) in &pending {
            let id_values: Vec<Value> = fetch.ids.values().cloned().collect();
            let mut body = Map::new();
            body.insert(fetch.route.request_field.clone(), Value::List(id_values));

            // Action errors stay inside the response unless the route
            // opts into raising them; transport errors always propagate.
            let opts = CallOptions {
                raise_action_errors: fetch.route.raise_action_errors,
                ..CallOptions::default()
            };
            let action_response = Box::pin(client.call_action(
                &fetch.route.service,
                &fetch.route.action,
                Value::Map(body),
                &opts,
            ))
            .await?;
            if action_response.has_errors() {
                tracing::debug!(
                    target: "courier.client",
                    route_type = %type_name,
                    expansion = %fetch.route.name,
                    code = %action_response.errors[0].code,
                    "expansion fetch failed, leaving objects unexpanded"
                );
            }
            let by_id = action_response
                .body
                .as_ref()
                .and_then(|b| b.get(&fetch.route.response_field))
                .and_then(Value::as_map);
            if let Some(by_id) = by_id {
                for (id, object) in by_id {
                    objects.insert((type_name.clone(), id.clone()), object.clone());
                }
            }
            // Visited regardless of outcome, so a missing or failing id
            // is not refetched every round.
            for key in fetch.ids.keys() {
                visited.insert((type_name.clone(), key.clone()));
            }
        }

        for action in &mut response.actions {
            if let Some(body) = &mut action.body {
                splice(body, &pending, &objects);
            }
        }
    }
    Ok(())
}

fn collect_pending(
    value: &Value,
    requested: &BTreeMap<String, Vec<String>>,
    settings: &ExpansionSettings,
    visited: &HashSet<(String, String)>,
    pending: &mut BTreeMap<(String, String), PendingFetch>,
) -> Result<(), ClientError> {
    match value {
        Value::Map(m) => {
            if let Some(type_name) = m.get("_type").and_then(Value::as_str) {
                if let Some(names) = requested.get(type_name) {
                    for name in names {
                        let route = settings.route(type_name, name).ok_or_else(|| {
                            ClientError::Expansion(format!(
                                "no route configured for type '{type_name}' expansion '{name}'"
                            ))
                        })?;
                        if m.contains_key(&route.destination_field) {
                            continue;
                        }
                        let Some(source) = m.get(&route.source_field) else {
                            continue;
                        };
                        for id_value in iter_ids(source) {
                            let Some(key) = id_key(id_value) else {
                                continue;
                            };
                            if visited.contains(&(type_name.to_owned(), key.clone())) {
                                continue;
                            }
                            pending
                                .entry((type_name.to_owned(), name.clone()))
                                .or_insert_with(|| PendingFetch {
                                    route: route.clone(),
                                    ids: BTreeMap::new(),
                                })
                                .ids
                                .insert(key, id_value.clone());
                        }
                    }
                }
            }
            for v in m.values() {
                collect_pending(v, requested, settings, visited, pending)?;
            }
        }
        Value::List(items) => {
            for v in items {
                collect_pending(v, requested, settings, visited, pending)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn splice(
    value: &mut Value,
    pending: &BTreeMap<(String, String), PendingFetch>,
    objects: &HashMap<(String, String), Value>,
) {
    match value {
        Value::Map(m) => {
            let type_name = m.get("_type").and_then(Value::as_str).map(str::to_owned);
            if let Some(type_name) = type_name {
                let mut inserts: Vec<(String, Value)> = Vec::new();
                for ((fetch_type, _), fetch) in pending {
                    if *fetch_type != type_name
                        || m.contains_key(&fetch.route.destination_field)
                    {
                        continue;
                    }
                    let Some(source) = m.get(&fetch.route.source_field) else {
                        continue;
                    };
                    let matched: Vec<Value> = iter_ids(source)
                        .filter_map(id_key)
                        .filter_map(|key| objects.get(&(type_name.clone(), key)).cloned())
                        .collect();
                    if matched.is_empty() {
                        continue;
                    }
                    let spliced = if matches!(source, Value::List(_)) {
                        Value::List(matched)
                    } else {
                        matched.into_iter().next().unwrap_or(Value::Null)
                    };
                    inserts.push((fetch.route.destination_field.clone(), spliced));
                }
                for (field, object) in inserts {
                    m.insert(field, object);
                }
            }
            for v in m.values_mut() {
                splice(v, pending, objects);
            }
        }
        Value::List(items) => {
            for v in items {
                splice(v, pending, objects);
            }
        }
        _ => {}
    }
}

fn iter_ids(source: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match source {
        Value::List(items) => Box::new(items.iter()),
        other => Box::new(std::iter::once(other)),
    }
}

fn id_key(id: &Value) -> Option<String> {
    match id {
        Value::Int(i) => Some(i.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}
