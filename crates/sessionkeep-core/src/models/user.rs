use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Profile returned by the server at login.
///
/// The shape is owned by the server; the client only reads a few
/// well-known fields for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserRecord(Value);

impl UserRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// User identifier, accepting either string or numeric ids.
    pub fn id(&self) -> Option<String> {
        match self.0.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.0.get("email").and_then(Value::as_str)
    }

    /// Best available human-readable name
    pub fn display_name(&self) -> Option<&str> {
        ["name", "email", "login"]
            .iter()
            .find_map(|field| self.0.get(*field).and_then(Value::as_str))
    }
}

impl From<Value> for UserRecord {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
