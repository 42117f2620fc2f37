// Tidal Bridge
// Copyright (C) 2021  Wesley Merkel
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Event records and the decoders that build them from OSC arguments.
//!
//! Each kind of incoming message has its own argument layout:
//!
//! * Trigger messages alternate between a field name and its value:
//!   `["s", "bd", "gain", 0.8]` becomes `{s: "bd", gain: 0.8}`.
//! * Tempo messages have three positional arguments: the cycle, the cycles per second, and
//!   whether the clock is paused.
//! * Metering messages start with an unused argument and the orbit number, followed by a peak
//!   and power level for each audio channel of that orbit.

use rosc::OscType;
use serde::Serialize;
use std::{collections::BTreeMap, convert::TryFrom, fmt};
use thiserror::Error;

/// The reserved trigger field holding the delay, in seconds, before an event should be emitted.
pub const DELTA: &str = "delta";

/// The error returned when an OSC argument list does not have the expected layout.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("trigger message has an odd number of arguments ({0}), the last key has no value")]
    UndefinedKey(usize),
    #[error("expected {expected} arguments, found {found}")]
    Arity { expected: &'static str, found: usize },
    #[error("metering message for orbit {orbit} has a peak level without a power level")]
    UnpairedLevel { orbit: i32 },
    #[error("expected {expected} for {field}, found {found}")]
    Type {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("unsupported OSC argument type {found} at position {position}")]
    Unsupported {
        position: usize,
        found: &'static str,
    },
}

type Result<T> = std::result::Result<T, DecodeError>;

/// A field value of a [`TriggerEvent`].
#[derive(Debug, Clone, PartialEq, PartialOrd, Serialize)]
#[serde(untagged)]
pub enum Value {
    Float(f32),
    Int(i32),
    String(String),
    Bool(bool),
}

impl Value {
    /// Returns the value as a number, if it is one.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(x) => Some(f64::from(x)),
            Value::Int(x) => Some(f64::from(x)),
            Value::String(_) | Value::Bool(_) => None,
        }
    }

    fn from_osc(position: usize, arg: &OscType) -> Result<Value> {
        match arg {
            OscType::Float(x) => Ok(Value::Float(*x)),
            OscType::Int(x) => Ok(Value::Int(*x)),
            OscType::String(x) => Ok(Value::String(x.clone())),
            OscType::Bool(x) => Ok(Value::Bool(*x)),
            // Widths the event record doesn't keep are narrowed, losing precision if necessary.
            OscType::Double(x) => Ok(Value::Float(*x as f32)),
            OscType::Long(x) => Ok(i32::try_from(*x)
                .map(Value::Int)
                .unwrap_or(Value::Float(*x as f32))),
            other => Err(DecodeError::Unsupported {
                position,
                found: type_name(other),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(x) => write!(f, "{}", x),
            Value::Int(x) => write!(f, "{}", x),
            Value::String(x) => write!(f, "{}", x),
            Value::Bool(x) => write!(f, "{}", x),
        }
    }
}

impl From<f32> for Value {
    fn from(x: f32) -> Value {
        Value::Float(x)
    }
}

impl From<i32> for Value {
    fn from(x: i32) -> Value {
        Value::Int(x)
    }
}

impl From<&str> for Value {
    fn from(x: &str) -> Value {
        Value::String(x.to_owned())
    }
}

impl From<String> for Value {
    fn from(x: String) -> Value {
        Value::String(x)
    }
}

impl From<bool> for Value {
    fn from(x: bool) -> Value {
        Value::Bool(x)
    }
}

/// A pattern event sent by Tidal, such as `{s: "bd", n: 3, orbit: 0}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TriggerEvent(BTreeMap<String, Value>);

impl TriggerEvent {
    pub fn new() -> TriggerEvent {
        TriggerEvent::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Sets a field, returning its previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(field, value)| (field.as_str(), value))
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl<K, V> std::iter::FromIterator<(K, V)> for TriggerEvent
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> TriggerEvent {
        TriggerEvent(
            iter.into_iter()
                .map(|(field, value)| (field.into(), value.into()))
                .collect(),
        )
    }
}

/// The state of Tidal's clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempoEvent {
    pub at_cycle: f32,
    pub cps: f32,
    pub paused: bool,
}

/// Signal levels of one orbit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeteringEvent {
    pub orbit: i32,
    pub channels: Vec<Level>,
}

/// The signal level of one audio channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Level {
    pub peak: f32,
    pub power: f32,
}

/// Builds a trigger event from alternating field names and values.
///
/// Field names that are not strings are formatted as strings. A field that appears more than once
/// keeps its last value.
///
/// # Errors
///
/// Returns [`DecodeError::UndefinedKey`] if the number of arguments is odd.
pub fn decode_trigger(args: &[OscType]) -> Result<TriggerEvent> {
    if args.len() % 2 != 0 {
        return Err(DecodeError::UndefinedKey(args.len()));
    }
    let mut event = TriggerEvent::new();
    for (i, pair) in args.chunks(2).enumerate() {
        let key = Value::from_osc(2 * i, &pair[0])?.to_string();
        let value = Value::from_osc(2 * i + 1, &pair[1])?;
        event.insert(key, value);
    }
    Ok(event)
}

/// Builds a tempo event from its three positional arguments.
pub fn decode_tempo(args: &[OscType]) -> Result<TempoEvent> {
    match args {
        [at_cycle, cps, paused] => Ok(TempoEvent {
            at_cycle: float("atCycle", at_cycle)?,
            cps: float("cps", cps)?,
            paused: boolean("paused", paused)?,
        }),
        _ => Err(DecodeError::Arity {
            expected: "exactly 3",
            found: args.len(),
        }),
    }
}

/// Builds a metering event. The first argument is ignored.
pub fn decode_metering(args: &[OscType]) -> Result<MeteringEvent> {
    if args.len() < 2 {
        return Err(DecodeError::Arity {
            expected: "at least 2",
            found: args.len(),
        });
    }
    let orbit = int("orbit", &args[1])?;
    let levels = &args[2..];
    if levels.len() % 2 != 0 {
        return Err(DecodeError::UnpairedLevel { orbit });
    }
    let channels = levels
        .chunks(2)
        .map(|pair| {
            Ok(Level {
                peak: float("peak", &pair[0])?,
                power: float("power", &pair[1])?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(MeteringEvent { orbit, channels })
}

fn float(field: &'static str, arg: &OscType) -> Result<f32> {
    match *arg {
        OscType::Float(x) => Ok(x),
        OscType::Double(x) => Ok(x as f32),
        OscType::Int(x) => Ok(x as f32),
        ref other => Err(type_error(field, "a number", other)),
    }
}

fn int(field: &'static str, arg: &OscType) -> Result<i32> {
    match *arg {
        OscType::Int(x) => Ok(x),
        OscType::Float(x) if x.fract() == 0.0 => Ok(x as i32),
        ref other => Err(type_error(field, "an integer", other)),
    }
}

fn boolean(field: &'static str, arg: &OscType) -> Result<bool> {
    match *arg {
        OscType::Bool(x) => Ok(x),
        OscType::Int(x) => Ok(x != 0),
        OscType::Float(x) => Ok(x != 0.0),
        ref other => Err(type_error(field, "a boolean", other)),
    }
}

fn type_error(field: &'static str, expected: &'static str, found: &OscType) -> DecodeError {
    DecodeError::Type {
        field,
        expected,
        found: type_name(found),
    }
}

fn type_name(arg: &OscType) -> &'static str {
    match arg {
        OscType::Int(..) => "int",
        OscType::Float(..) => "float",
        OscType::String(..) => "string",
        OscType::Blob(..) => "blob",
        OscType::Time(..) => "time",
        OscType::Long(..) => "long",
        OscType::Double(..) => "double",
        OscType::Char(..) => "char",
        OscType::Color(..) => "color",
        OscType::Midi(..) => "midi",
        OscType::Bool(..) => "bool",
        OscType::Array(..) => "array",
        OscType::Nil => "nil",
        OscType::Inf => "inf",
    }
}
