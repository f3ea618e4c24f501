use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::models::ClickEvent;

pub const REQUIRED_FIELDS: [&str; 5] = [
    "user_id",
    "tab_name",
    "session_id",
    "app_version",
    "device_info",
];

/// Outcome of decoding an ingest payload.
#[derive(Debug)]
pub enum Validation {
    Valid(ClickEvent),
    Invalid { missing: Vec<&'static str> },
}

/// Presence check only: values of any JSON type are accepted.
pub fn is_valid(payload: &Map<String, Value>) -> bool {
    missing_fields(payload).is_empty()
}

pub fn missing_fields(payload: &Map<String, Value>) -> Vec<&'static str> {
    REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| !payload.contains_key(*field))
        .collect()
}

/// Decode a parsed body into a click event stamped with `received_at`.
///
/// Anything other than a JSON object carries none of the required fields.
pub fn validate(payload: &Value, received_at: DateTime<Utc>) -> Validation {
    let Some(fields) = payload.as_object() else {
        return Validation::Invalid {
            missing: REQUIRED_FIELDS.to_vec(),
        };
    };

    if !is_valid(fields) {
        return Validation::Invalid {
            missing: missing_fields(fields),
        };
    }

    Validation::Valid(ClickEvent {
        user_id: field_text(fields, "user_id"),
        tab_name: field_text(fields, "tab_name"),
        click_timestamp: received_at,
        session_id: field_text(fields, "session_id"),
        app_version: field_text(fields, "app_version"),
        device_info: field_text(fields, "device_info"),
    })
}

// Strings are stored verbatim, null as NULL, anything else as its JSON text.
fn field_text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_payload() -> Value {
        json!({
            "user_id": "u1",
            "tab_name": "Home",
            "session_id": "s1",
            "app_version": "1.0",
            "device_info": "iPhone14"
        })
    }

    #[test]
    fn accepts_complete_payload() {
        let payload = full_payload();
        assert!(is_valid(payload.as_object().unwrap()));

        let now = Utc::now();
        match validate(&payload, now) {
            Validation::Valid(event) => {
                assert_eq!(event.user_id.as_deref(), Some("u1"));
                assert_eq!(event.tab_name.as_deref(), Some("Home"));
                assert_eq!(event.session_id.as_deref(), Some("s1"));
                assert_eq!(event.app_version.as_deref(), Some("1.0"));
                assert_eq!(event.device_info.as_deref(), Some("iPhone14"));
                assert_eq!(event.click_timestamp, now);
            }
            Validation::Invalid { missing } => panic!("unexpected missing fields: {missing:?}"),
        }
    }

    #[test]
    fn each_required_field_is_enforced() {
        for field in REQUIRED_FIELDS {
            let mut payload = full_payload();
            payload.as_object_mut().unwrap().remove(field);
            assert!(!is_valid(payload.as_object().unwrap()));
            match validate(&payload, Utc::now()) {
                Validation::Invalid { missing } => assert_eq!(missing, vec![field]),
                Validation::Valid(_) => panic!("{field} should be required"),
            }
        }
    }

    #[test]
    fn reports_every_missing_field() {
        match validate(&json!({ "user_id": "u1" }), Utc::now()) {
            Validation::Invalid { missing } => assert_eq!(
                missing,
                vec!["tab_name", "session_id", "app_version", "device_info"]
            ),
            Validation::Valid(_) => panic!("expected invalid payload"),
        }
    }

    #[test]
    fn presence_is_the_only_check() {
        let mut payload = full_payload();
        let fields = payload.as_object_mut().unwrap();
        fields.insert("app_version".into(), json!(2));
        fields.insert("session_id".into(), json!(true));
        fields.insert("device_info".into(), Value::Null);
        fields.insert("extra".into(), json!("ignored"));

        match validate(&payload, Utc::now()) {
            Validation::Valid(event) => {
                assert_eq!(event.app_version.as_deref(), Some("2"));
                assert_eq!(event.session_id.as_deref(), Some("true"));
                assert_eq!(event.device_info, None);
            }
            Validation::Invalid { missing } => panic!("unexpected missing fields: {missing:?}"),
        }
    }

    #[test]
    fn null_is_not_the_text_null() {
        let mut payload = full_payload();
        let fields = payload.as_object_mut().unwrap();
        fields.insert("device_info".into(), Value::Null);
        let with_null = validate(&payload, Utc::now());

        payload
            .as_object_mut()
            .unwrap()
            .insert("device_info".into(), json!("null"));
        let with_text = validate(&payload, Utc::now());

        match (with_null, with_text) {
            (Validation::Valid(null_event), Validation::Valid(text_event)) => {
                assert_eq!(null_event.device_info, None);
                assert_eq!(text_event.device_info.as_deref(), Some("null"));
            }
            _ => panic!("both payloads carry every field"),
        }
    }

    #[test]
    fn non_object_bodies_miss_everything() {
        for payload in [json!([1, 2]), json!("user_id"), Value::Null] {
            match validate(&payload, Utc::now()) {
                Validation::Invalid { missing } => assert_eq!(missing, REQUIRED_FIELDS.to_vec()),
                Validation::Valid(_) => panic!("expected invalid payload"),
            }
        }
    }
}
