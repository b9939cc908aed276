// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An unvalidated record read from the test runner's output stream.
///
/// A raw record is a JSON object that carries at least one of the `event` and `id` keys. Objects
/// that carry neither are runner chatter and are never turned into a `RawRecord`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: Map<String, Value>,
}

impl RawRecord {
    /// The key holding the event kind.
    pub const EVENT_KEY: &'static str = "event";

    /// The key holding the test identifier.
    pub const ID_KEY: &'static str = "id";

    /// Creates a record out of a JSON value.
    ///
    /// Returns `None` if the value is not an object, or if the object has neither an `event` nor an
    /// `id` key.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields)
                if fields.contains_key(Self::EVENT_KEY) || fields.contains_key(Self::ID_KEY) =>
            {
                Some(Self { fields })
            }
            _ => None,
        }
    }

    /// Parses a single chunk of JSON text into a record.
    ///
    /// Returns `None` for text that isn't valid JSON, or for JSON that isn't a record (see
    /// [`Self::from_value`]).
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok().and_then(Self::from_value)
    }

    /// Returns the `event` field, if it is present and is a string.
    pub fn event(&self) -> Option<&str> {
        self.get_str(Self::EVENT_KEY)
    }

    /// Returns the `id` field, if it is present and is a string.
    pub fn id(&self) -> Option<&str> {
        self.get_str(Self::ID_KEY)
    }

    /// Returns the value associated with `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns the string value associated with `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Returns the underlying JSON object.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// A single source location attached to a failure in the runner's output.
///
/// Lines are 1-based, as the runner reports them.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// The file the frame points at.
    pub file: String,

    /// The 1-based line number within `file`.
    pub line: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(r#"{"event":"testStarted","id":"testBar"}"#, true ; "event and id")]
    #[test_case(r#"{"event":"somethingElse"}"#, true ; "event only")]
    #[test_case(r#"{"id":"testBar"}"#, true ; "id only")]
    #[test_case(r#"{"foo":"bar"}"#, false ; "neither key")]
    #[test_case(r#"["event","id"]"#, false ; "not an object")]
    #[test_case("PHPUnit 10.5.0 by Sebastian Bergmann", false ; "not json")]
    fn parse_record(input: &str, is_record: bool) {
        assert_eq!(RawRecord::parse(input).is_some(), is_record);
    }

    #[test]
    fn accessors() {
        let record = RawRecord::from_value(json!({
            "event": "testFinished",
            "id": "testBar",
            "duration": 5,
        }))
        .expect("valid record");

        assert_eq!(record.event(), Some("testFinished"));
        assert_eq!(record.id(), Some("testBar"));
        assert_eq!(record.get("duration"), Some(&json!(5)));
        assert_eq!(record.get_str("duration"), None);
    }

    #[test]
    fn failure_detail_deserialize() {
        let detail: FailureDetail =
            serde_json::from_value(json!({ "file": "FooTest.php", "line": 10 }))
                .expect("valid detail");
        assert_eq!(
            detail,
            FailureDetail {
                file: "FooTest.php".to_owned(),
                line: 10,
            }
        );
    }
}
