use super::*;

use chrono::DateTime;
use serde::Deserialize;

#[test]
fn request_wire_shape_is_camel_case_with_nulls_omitted() {
    let request = Request::new("Add", Value::Null, "resp-chan", None);
    let value: Value = serde_json::from_slice(&request.to_bytes().unwrap()).unwrap();
    let object = value.as_object().unwrap();

    assert!(object.contains_key("id"));
    assert_eq!(object.get("method"), Some(&json!("Add")));
    assert_eq!(object.get("responseChannel"), Some(&json!("resp-chan")));
    assert!(object.contains_key("timestamp"));
    assert!(!object.contains_key("parameters"));
    assert!(!object.contains_key("timeoutMs"));
    assert!(!object.contains_key("response_channel"));
}

#[test]
fn request_with_payload_carries_camel_case_timeout() {
    let request = Request::new("Add", json!({ "a": 1 }), "resp", Some(750));
    let value: Value = serde_json::from_slice(&request.to_bytes().unwrap()).unwrap();

    assert_eq!(value.get("timeoutMs"), Some(&json!(750)));
    assert_eq!(value.get("parameters"), Some(&json!({ "a": 1 })));
}

#[test]
fn unknown_fields_are_ignored_on_decode() {
    let raw = br#"{"id":"1","method":"Ping","responseChannel":"","timestamp":"2024-01-01T00:00:00Z","shoeSize":43}"#;
    let request = Request::from_bytes(raw).unwrap();

    assert_eq!(request.method, "Ping");
    assert!(request.is_notification());
    assert_eq!(request.parameters, Value::Null);
}

#[test]
fn parameters_round_trip_semantically() {
    for parameters in [
        json!(null),
        json!(42),
        json!("text"),
        json!(true),
        json!([1, 2, 3]),
        json!({ "nested": { "deep": [1, { "x": null }] } }),
    ] {
        let request = Request::new("M", parameters.clone(), "r", None);
        let decoded = Request::from_bytes(&request.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.parameters, parameters);
    }
}

#[test]
fn result_round_trips_semantically() {
    for result in [json!(null), json!(15), json!({ "total": 15 })] {
        let response = Response::success("id-1", result.clone());
        let decoded = Response::from_bytes(&response.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.result, result);
        assert!(decoded.success);
    }
}

#[test]
fn response_success_and_failure_shapes() {
    let ok = Response::success("abc", json!(15));
    let value: Value = serde_json::from_slice(&ok.to_bytes().unwrap()).unwrap();
    assert_eq!(value.get("success"), Some(&json!(true)));
    assert_eq!(value.get("result"), Some(&json!(15)));
    assert!(value.get("error").is_none());

    let info = ErrorInfo {
        code: CODE_INTERNAL_ERROR,
        message: "boom".to_string(),
        details: None,
        stack_trace: None,
    };
    let failed = Response::failure("abc", info);
    let value: Value = serde_json::from_slice(&failed.to_bytes().unwrap()).unwrap();
    assert_eq!(value.get("success"), Some(&json!(false)));
    assert!(value.get("result").is_none());
    let error = value.get("error").unwrap();
    assert_eq!(error.get("code"), Some(&json!(CODE_INTERNAL_ERROR)));
    assert_eq!(error.get("message"), Some(&json!("boom")));
    assert!(error.get("details").is_none());
    assert!(error.get("stackTrace").is_none());
}

#[test]
fn timestamps_are_rfc3339_utc() {
    let request = Request::new("M", Value::Null, "r", None);
    let parsed = DateTime::parse_from_rfc3339(&request.timestamp).unwrap();
    assert_eq!(parsed.offset().local_minus_utc(), 0);
    assert!(request.timestamp.ends_with('Z'));
}

#[test]
fn ids_are_unique_per_request() {
    let a = Request::new("M", Value::Null, "r", None);
    let b = Request::new("M", Value::Null, "r", None);
    assert_ne!(a.id, b.id);
}

#[derive(Debug, Deserialize, PartialEq)]
struct Point {
    x: i64,
    y: i64,
}

#[test]
fn coerce_result_handles_primitives_and_structs() {
    let n: i64 = coerce_result(json!(15)).unwrap();
    assert_eq!(n, 15);
    let s: String = coerce_result(json!("hello")).unwrap();
    assert_eq!(s, "hello");
    let p: Point = coerce_result(json!({ "x": 3, "y": -4 })).unwrap();
    assert_eq!(p, Point { x: 3, y: -4 });
    let absent: Option<i64> = coerce_result(Value::Null).unwrap();
    assert_eq!(absent, None);
}

#[test]
fn coercion_failures_surface_as_serialization_errors() {
    let err = coerce_result::<i64>(json!("not a number")).unwrap_err();
    assert!(matches!(err, RpcError::Serialization { .. }));
    let err = Request::from_bytes(b"not json").unwrap_err();
    assert!(matches!(err, RpcError::Serialization { .. }));
}
