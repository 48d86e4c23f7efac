//! Command grammar for the C338-family streaming protocol.
//!
//! Each command key maps to the operators it accepts, the values it accepts
//! and how its values are typed. The table is checked once when it is loaded;
//! after that, [`Grammar::validate`] turns a (key, operator, value) triple into
//! a [`Command`] ready to be put on the wire.

use crate::error::{GrammarError, ValidationError};
use crate::types::{Operator, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

pub const CMD_MAIN: &str = "Main";
pub const CMD_ANALOG_GAIN: &str = "Main.AnalogGain";
pub const CMD_BRIGHTNESS: &str = "Main.Brightness";
pub const CMD_BASS_EQ: &str = "Main.Bass";
pub const CMD_CONTROL_STANDBY: &str = "Main.ControlStandby";
pub const CMD_AUTO_STANDBY: &str = "Main.AutoStandby";
pub const CMD_AUTO_SENSE: &str = "Main.AutoSense";
pub const CMD_VERSION: &str = "Main.Version";
pub const CMD_MODEL: &str = "Main.Model";
pub const CMD_MUTE: &str = "Main.Mute";
pub const CMD_POWER: &str = "Main.Power";
pub const CMD_SOURCE: &str = "Main.Source";
pub const CMD_VOLUME: &str = "Main.Volume";

pub const MSG_OFF: &str = "Off";
pub const MSG_ON: &str = "On";

const ALL_OPERATORS: &[Operator] = &[
    Operator::Increment,
    Operator::Decrement,
    Operator::Assign,
    Operator::Query,
];
const QUERY_ONLY: &[Operator] = &[Operator::Query];
const ON_OFF: &[&str] = &[MSG_OFF, MSG_ON];

/// How values of a command are typed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Two-valued; index 0 of the domain is `false`, index 1 is `true`
    Bool,
    Int,
    Float,
    /// One of a fixed set of strings
    Enum,
}

/// Values a command accepts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueDomain {
    Choices(&'static [&'static str]),
    /// Inclusive numeric range
    Range { min: f64, max: f64 },
}

/// Grammar entry for one command key
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub key: &'static str,
    pub operators: &'static [Operator],
    pub domain: Option<ValueDomain>,
    pub value_type: Option<ValueType>,
}

impl CommandSpec {
    fn new(key: &'static str, operators: &'static [Operator]) -> Self {
        Self {
            key,
            operators,
            domain: None,
            value_type: None,
        }
    }

    fn boolean(key: &'static str) -> Self {
        Self {
            key,
            operators: ALL_OPERATORS,
            domain: Some(ValueDomain::Choices(ON_OFF)),
            value_type: Some(ValueType::Bool),
        }
    }

    fn with_domain(mut self, domain: ValueDomain) -> Self {
        self.domain = Some(domain);
        self
    }

    fn with_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    pub fn supports(&self, operator: Operator) -> bool {
        self.operators.contains(&operator)
    }

    /// The enumerated values, if the domain is a closed set
    pub fn choices(&self) -> Option<&'static [&'static str]> {
        match self.domain {
            Some(ValueDomain::Choices(choices)) => Some(choices),
            _ => None,
        }
    }

    fn check(&self) -> Result<(), GrammarError> {
        if !is_well_formed_key(self.key) {
            return Err(GrammarError::MalformedKey(self.key.to_string()));
        }
        if self.operators.is_empty() {
            return Err(GrammarError::NoOperators(self.key.to_string()));
        }
        match (self.value_type, self.domain) {
            (Some(ValueType::Bool), Some(ValueDomain::Choices(c))) if c.len() == 2 => Ok(()),
            (Some(ValueType::Bool), _) => Err(GrammarError::BadBoolDomain(self.key.to_string())),
            (Some(ValueType::Int | ValueType::Float), Some(ValueDomain::Choices(_)))
            | (Some(ValueType::Enum), Some(ValueDomain::Range { .. }))
            | (Some(ValueType::Enum), None)
            | (None, Some(ValueDomain::Range { .. })) => {
                Err(GrammarError::DomainTypeMismatch(self.key.to_string()))
            }
            (_, Some(ValueDomain::Range { min, max })) if min > max => {
                Err(GrammarError::DomainTypeMismatch(self.key.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Dotted name of ASCII alphanumeric segments, e.g. `Main.Volume`
fn is_well_formed_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// A validated command, ready for encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub key: &'static str,
    pub operator: Operator,
    /// Wire form of the value; present only with `=`
    pub value: Option<String>,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.key, self.operator)?;
        if let Some(value) = &self.value {
            f.write_str(value)?;
        }
        Ok(())
    }
}

/// Immutable registry of command specs
#[derive(Debug)]
pub struct Grammar {
    specs: HashMap<&'static str, CommandSpec>,
}

impl Grammar {
    /// Build a grammar, checking every entry
    pub fn new(specs: impl IntoIterator<Item = CommandSpec>) -> Result<Self, GrammarError> {
        let mut map = HashMap::new();
        for spec in specs {
            spec.check()?;
            let key = spec.key;
            if map.insert(key, spec).is_some() {
                return Err(GrammarError::DuplicateKey(key.to_string()));
            }
        }
        Ok(Self { specs: map })
    }

    /// The command table of the C338 family, built on first use
    pub fn c338() -> &'static Grammar {
        static GRAMMAR: OnceLock<Grammar> = OnceLock::new();
        GRAMMAR.get_or_init(|| {
            Grammar::new(c338_specs()).expect("built-in C338 command table is well-formed")
        })
    }

    pub fn get(&self, key: &str) -> Option<&CommandSpec> {
        self.specs.get(key)
    }

    /// Check a command against the grammar and encode its value
    pub fn validate(
        &self,
        key: &str,
        operator: Operator,
        value: Option<Value>,
    ) -> Result<Command, ValidationError> {
        let spec = self
            .get(key)
            .ok_or_else(|| ValidationError::UnknownCommand(key.to_string()))?;

        if !spec.supports(operator) {
            return Err(ValidationError::UnsupportedOperator {
                key: spec.key.to_string(),
                operator,
            });
        }

        let value = match (operator.takes_value(), value) {
            (true, None) => return Err(ValidationError::MissingValue(spec.key.to_string())),
            (false, Some(_)) => {
                return Err(ValidationError::UnexpectedValue {
                    key: spec.key.to_string(),
                    operator,
                })
            }
            (true, Some(value)) => Some(encode_value(spec, value)?),
            (false, None) => None,
        };

        Ok(Command {
            key: spec.key,
            operator,
            value,
        })
    }
}

fn encode_value(spec: &CommandSpec, value: Value) -> Result<String, ValidationError> {
    let invalid = |value: &Value| ValidationError::InvalidValue {
        key: spec.key.to_string(),
        value: value.to_string(),
    };

    match spec.value_type {
        Some(ValueType::Bool) => {
            let choices = spec.choices().ok_or_else(|| invalid(&value))?;
            let index = match &value {
                Value::Bool(b) => usize::from(*b),
                Value::Int(i @ (0 | 1)) => *i as usize,
                Value::Text(s) => choices
                    .iter()
                    .position(|c| *c == s.as_str())
                    .ok_or_else(|| invalid(&value))?,
                _ => return Err(invalid(&value)),
            };
            Ok(choices[index].to_string())
        }
        Some(ValueType::Int) => {
            let n = match &value {
                Value::Int(i) => *i,
                Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => *f as i64,
                _ => return Err(invalid(&value)),
            };
            check_range(spec, n as f64).map_err(|_| invalid(&value))?;
            Ok(n.to_string())
        }
        Some(ValueType::Float) => {
            let n = value.as_f64().filter(|n| n.is_finite()).ok_or_else(|| invalid(&value))?;
            check_range(spec, n).map_err(|_| invalid(&value))?;
            Ok(format_number(n))
        }
        Some(ValueType::Enum) => match &value {
            Value::Text(s) if spec.choices().is_some_and(|c| c.contains(&s.as_str())) => {
                Ok(s.clone())
            }
            _ => Err(invalid(&value)),
        },
        None => match &value {
            Value::Text(s) => Ok(s.clone()),
            Value::Bool(_) => Err(invalid(&value)),
            Value::Int(i) => Ok(i.to_string()),
            other => other.as_f64().map(format_number).ok_or_else(|| invalid(other)),
        },
    }
}

fn check_range(spec: &CommandSpec, n: f64) -> Result<(), ()> {
    match spec.domain {
        Some(ValueDomain::Range { min, max }) if n < min || n > max => Err(()),
        _ => Ok(()),
    }
}

/// Plain decimal text; integral values carry no fraction (`-12`, `-12.5`)
pub(crate) fn format_number(n: f64) -> String {
    // avoid "-0"
    let n = if n == 0.0 { 0.0 } else { n };
    format!("{}", n)
}

fn c338_specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new(CMD_MAIN, QUERY_ONLY),
        CommandSpec::new(CMD_ANALOG_GAIN, ALL_OPERATORS).with_type(ValueType::Int),
        CommandSpec::new(CMD_BRIGHTNESS, ALL_OPERATORS)
            .with_domain(ValueDomain::Range { min: 0.0, max: 3.0 })
            .with_type(ValueType::Int),
        CommandSpec::boolean(CMD_MUTE),
        CommandSpec::boolean(CMD_POWER),
        CommandSpec::new(CMD_VOLUME, ALL_OPERATORS)
            .with_domain(ValueDomain::Range { min: -80.0, max: 0.0 })
            .with_type(ValueType::Float),
        CommandSpec::boolean(CMD_BASS_EQ),
        CommandSpec::boolean(CMD_CONTROL_STANDBY),
        CommandSpec::boolean(CMD_AUTO_STANDBY),
        CommandSpec::boolean(CMD_AUTO_SENSE),
        CommandSpec::new(CMD_SOURCE, ALL_OPERATORS)
            .with_domain(ValueDomain::Choices(&[
                "Stream", "Wireless", "TV", "Phono", "Coax1", "Coax2", "Opt1", "Opt2",
            ]))
            .with_type(ValueType::Enum),
        CommandSpec::new(CMD_VERSION, QUERY_ONLY).with_type(ValueType::Float),
        CommandSpec::new(CMD_MODEL, QUERY_ONLY)
            .with_domain(ValueDomain::Choices(&["NADC338"]))
            .with_type(ValueType::Enum),
    ]
}
