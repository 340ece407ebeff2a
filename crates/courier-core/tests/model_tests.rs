// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire-map conversion tests for the job and action records.

use std::collections::BTreeMap;

use courier_core::model::{
    ActionRequest, ActionResponse, Context, Control, Error, JobRequest, JobResponse,
};
use courier_core::value::{Map, Value};

fn body(entries: &[(&str, Value)]) -> Value {
    Value::Map(
        entries
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// ActionRequest
// ---------------------------------------------------------------------------

#[test]
fn action_request_round_trips() {
    let req = ActionRequest::with_body("square", body(&[("number", Value::Int(7))]));
    let back = ActionRequest::from_value(req.to_value()).unwrap();
    assert_eq!(back, req);
}

#[test]
fn action_request_empty_name_rejected() {
    let mut m = Map::new();
    m.insert("action".into(), Value::from(""));
    m.insert("body".into(), Value::map());
    assert!(ActionRequest::from_value(Value::Map(m)).is_err());
}

#[test]
fn action_request_missing_body_defaults_to_empty_map() {
    let mut m = Map::new();
    m.insert("action".into(), Value::from("ping"));
    let req = ActionRequest::from_value(Value::Map(m)).unwrap();
    assert_eq!(req.body, Value::map());
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[test]
fn error_round_trips_with_all_fields() {
    let mut variables = BTreeMap::new();
    variables.insert("limit".to_owned(), "10".to_owned());
    let err = Error {
        code: "INVALID".into(),
        message: "number must be non-negative".into(),
        field: Some("number".into()),
        traceback: Some("…".into()),
        variables,
        denied_permissions: vec!["admin".into()],
        is_caller_error: true,
    };
    let back = Error::from_value(err.to_value()).unwrap();
    assert_eq!(back, err);
}

#[test]
fn error_optional_fields_omitted_from_wire_map() {
    let err = Error::new("SERVER_ERROR", "boom");
    let v = err.to_value();
    let m = v.as_map().unwrap();
    assert!(!m.contains_key("field"));
    assert!(!m.contains_key("traceback"));
    assert!(!m.contains_key("variables"));
    assert!(!m.contains_key("denied_permissions"));
}

#[test]
fn error_for_field_marks_caller_error() {
    let err = Error::new("INVALID", "bad").for_field("number");
    assert!(err.is_caller_error);
    assert_eq!(err.field.as_deref(), Some("number"));
}

// ---------------------------------------------------------------------------
// Context and Control
// ---------------------------------------------------------------------------

#[test]
fn context_switches_have_set_semantics() {
    let ctx = Context::new("abc").with_switch(3).with_switch(3).with_switch(7);
    assert_eq!(ctx.switches.len(), 2);
    assert!(ctx.is_switch_active(3));
    assert!(!ctx.is_switch_active(4));
}

#[test]
fn context_round_trips_with_extra_keys() {
    let mut ctx = Context::new("corr-1");
    ctx.request_id = 42;
    ctx.switches.insert(5);
    ctx.extra
        .insert("caller".into(), Value::from("service-a"));
    let back = Context::from_value(ctx.to_value()).unwrap();
    assert_eq!(back, ctx);
}

#[test]
fn control_defaults_are_false_and_unset() {
    let ctl = Control::from_value(Value::map()).unwrap();
    assert!(!ctl.continue_on_error);
    assert!(!ctl.suppress_response);
    assert_eq!(ctl.timeout, None);
}

#[test]
fn control_round_trips() {
    let ctl = Control {
        continue_on_error: true,
        suppress_response: false,
        timeout: Some(9),
        extra: Map::new(),
    };
    assert_eq!(Control::from_value(ctl.to_value()).unwrap(), ctl);
}

// ---------------------------------------------------------------------------
// JobRequest / JobResponse
// ---------------------------------------------------------------------------

#[test]
fn job_request_round_trips() {
    let mut req = JobRequest::new(vec![
        ActionRequest::with_body("square", body(&[("number", Value::Int(7))])),
        ActionRequest::new("ping"),
    ]);
    req.context = Context::new("corr").with_switch(1);
    req.control.continue_on_error = true;
    let back = JobRequest::from_value(req.to_value()).unwrap();
    assert_eq!(back, req);
}

#[test]
fn job_request_requires_actions_key() {
    assert!(JobRequest::from_value(Value::map()).is_err());
}

#[test]
fn job_response_round_trips_with_mixed_results() {
    let resp = JobResponse {
        actions: vec![
            ActionResponse::new("square", body(&[("square", Value::Int(49))])),
            ActionResponse::from_errors(
                "square",
                vec![Error::new("INVALID", "negative").for_field("number")],
            ),
        ],
        context: Map::new(),
        errors: vec![],
    };
    let back = JobResponse::from_value(resp.to_value()).unwrap();
    assert_eq!(back, resp);
    assert!(back.has_errors());
}

#[test]
fn job_response_error_body_is_null_on_wire() {
    let resp = ActionResponse::from_errors("x", vec![Error::new("E", "m")]);
    let v = resp.to_value();
    assert_eq!(v.get("body"), Some(&Value::Null));
}
