use crate::commands::{CMD_MODEL, CMD_MUTE, CMD_POWER, CMD_SOURCE, CMD_VERSION, CMD_VOLUME};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Command operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// `=`, set a value
    #[serde(rename = "=")]
    Assign,
    /// `+`, step up
    #[serde(rename = "+")]
    Increment,
    /// `-`, step down
    #[serde(rename = "-")]
    Decrement,
    /// `?`, ask for the current value
    #[serde(rename = "?")]
    Query,
}

impl Operator {
    /// The operator as it appears on the wire
    pub fn as_char(self) -> char {
        match self {
            Operator::Assign => '=',
            Operator::Increment => '+',
            Operator::Decrement => '-',
            Operator::Query => '?',
        }
    }

    /// Whether the operator carries a value
    pub fn takes_value(self) -> bool {
        self == Operator::Assign
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl TryFrom<char> for Operator {
    type Error = char;

    fn try_from(c: char) -> std::result::Result<Self, char> {
        match c {
            '=' => Ok(Operator::Assign),
            '+' => Ok(Operator::Increment),
            '-' => Ok(Operator::Decrement),
            '?' => Ok(Operator::Query),
            other => Err(other),
        }
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Operator::try_from(c).map_err(|c| format!("unknown operator '{}'", c)),
            _ => Err(format!("unknown operator '{}'", s)),
        }
    }
}

/// Typed value of a device setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<u8> for Value {
    fn from(i: u8) -> Self {
        Value::Int(i.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Snapshot of the device's last-known settings, keyed by command key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceState {
    values: BTreeMap<String, Value>,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value reported for a command key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }

    /// True when nothing is known, e.g. while disconnected
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn power(&self) -> Option<bool> {
        self.get(CMD_POWER).and_then(Value::as_bool)
    }

    pub fn mute(&self) -> Option<bool> {
        self.get(CMD_MUTE).and_then(Value::as_bool)
    }

    /// Volume in dB
    pub fn volume(&self) -> Option<f64> {
        self.get(CMD_VOLUME).and_then(Value::as_f64)
    }

    pub fn source(&self) -> Option<&str> {
        self.get(CMD_SOURCE).and_then(Value::as_str)
    }

    pub fn model(&self) -> Option<&str> {
        self.get(CMD_MODEL).and_then(Value::as_str)
    }

    pub fn version(&self) -> Option<f64> {
        self.get(CMD_VERSION).and_then(Value::as_f64)
    }
}

/// Lifecycle of the connection to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Open,
    /// Graceful disconnect requested, waiting for the device to close
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    /// No live connection and no attempt in progress
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_parses_wire_form() {
        assert_eq!("=".parse::<Operator>(), Ok(Operator::Assign));
        assert_eq!("?".parse::<Operator>(), Ok(Operator::Query));
        assert!("==".parse::<Operator>().is_err());
        assert!("*".parse::<Operator>().is_err());
        assert_eq!(Operator::Decrement.to_string(), "-");
    }

    #[test]
    fn only_assign_takes_a_value() {
        assert!(Operator::Assign.takes_value());
        assert!(!Operator::Increment.takes_value());
        assert!(!Operator::Query.takes_value());
    }

    #[test]
    fn state_accessors_read_typed_values() {
        let mut state = DeviceState::new();
        state.insert(CMD_POWER, Value::Bool(true));
        state.insert(CMD_VOLUME, Value::Float(-32.5));
        state.insert(CMD_SOURCE, Value::Text("Opt1".into()));

        assert_eq!(state.power(), Some(true));
        assert_eq!(state.volume(), Some(-32.5));
        assert_eq!(state.source(), Some("Opt1"));
        assert_eq!(state.mute(), None);
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn snapshot_serializes_as_flat_object() {
        let mut state = DeviceState::new();
        state.insert(CMD_MUTE, Value::Bool(false));
        state.insert(CMD_VOLUME, Value::Float(-12.0));
        state.insert(CMD_SOURCE, Value::Text("TV".into()));

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "Main.Mute": false,
                "Main.Source": "TV",
                "Main.Volume": -12.0,
            })
        );
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Closing.is_terminal());
        assert!(!SessionState::Open.is_terminal());
    }
}
