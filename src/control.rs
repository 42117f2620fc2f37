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

//! Control messages sent back to Tidal.
//!
//! Tidal's control bus accepts `/ctrl` messages with two arguments: the name of the control and
//! its new value, which may be a float, an integer, or a string. Patterns can then read the value
//! with `cF`, `cI` and `cS`.
//!
//! Numeric values are given as text and parsed leniently, the way a live performance tool wants:
//! a leading number is used and anything after it is ignored, and text that does not start with a
//! number produces no message at all.
//!
//! ```
//! use tidal_bridge::control::{ControlMessage, ControlValue};
//!
//! let message = ControlMessage::float("cutoff", "1.5").unwrap();
//! assert_eq!(message.value(), &ControlValue::Float(1.5));
//! assert!(ControlMessage::float("cutoff", "abc").is_none());
//! assert_eq!(ControlMessage::int("step", "3.9").unwrap().value(), &ControlValue::Int(3));
//! ```

use crate::transport::Message;
use rosc::{OscMessage, OscType};

/// The address of control messages.
pub const CTRL_ADDR: &str = "/ctrl";

/// The value of a control.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum ControlValue {
    Float(f32),
    Int(i32),
    String(String),
}

impl ControlValue {
    /// The OSC type tag the value is sent with.
    pub fn type_tag(&self) -> char {
        match self {
            ControlValue::Float(_) => 'f',
            ControlValue::Int(_) => 'i',
            ControlValue::String(_) => 's',
        }
    }

    fn into_osc_type(self) -> OscType {
        match self {
            ControlValue::Float(x) => x.into(),
            ControlValue::Int(x) => x.into(),
            ControlValue::String(x) => x.into(),
        }
    }
}

/// A named control value.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub struct ControlMessage {
    name: String,
    value: ControlValue,
}

impl ControlMessage {
    /// Creates a float control from the leading number in `value`.
    ///
    /// Returns `None` if `value` does not start with a number.
    pub fn float(name: impl Into<String>, value: &str) -> Option<ControlMessage> {
        let value = parse_float(value)?;
        Some(ControlMessage::new(name, ControlValue::Float(value)))
    }

    /// Creates an integer control from the leading integer in `value`. A fractional part is
    /// dropped.
    ///
    /// Returns `None` if `value` does not start with an integer.
    pub fn int(name: impl Into<String>, value: &str) -> Option<ControlMessage> {
        let value = parse_int(value)?;
        Some(ControlMessage::new(name, ControlValue::Int(value)))
    }

    /// Creates a string control.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> ControlMessage {
        ControlMessage::new(name, ControlValue::String(value.into()))
    }

    pub fn new(name: impl Into<String>, value: ControlValue) -> ControlMessage {
        ControlMessage {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &ControlValue {
        &self.value
    }

    /// Reads a control message back out of a `/ctrl` OSC message.
    ///
    /// Returns `None` if the message is not a well formed control message.
    pub fn parse(message: &OscMessage) -> Option<ControlMessage> {
        if message.addr != CTRL_ADDR {
            return None;
        }
        match message.args.as_slice() {
            [OscType::String(name), value] => {
                let value = match value {
                    OscType::Float(x) => ControlValue::Float(*x),
                    OscType::Int(x) => ControlValue::Int(*x),
                    OscType::String(x) => ControlValue::String(x.clone()),
                    _ => return None,
                };
                Some(ControlMessage::new(name.clone(), value))
            }
            _ => None,
        }
    }

    pub fn into_message(self) -> Message {
        Message::addr(CTRL_ADDR)
            .arg(self.name)
            .arg(self.value.into_osc_type())
    }
}

fn parse_float(text: &str) -> Option<f32> {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = sign_len(bytes);

    let int_digits = digits_len(&bytes[end..]);
    end += int_digits;
    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = digits_len(&bytes[end + 1..]);
        end += 1 + frac_digits;
    }
    if int_digits + frac_digits == 0 {
        return None;
    }

    if let Some(b'e') | Some(b'E') = bytes.get(end) {
        let exponent_sign = sign_len(&bytes[end + 1..]);
        let exponent_digits = digits_len(&bytes[end + 1 + exponent_sign..]);
        if exponent_digits > 0 {
            end += 1 + exponent_sign + exponent_digits;
        }
    }

    text[..end].parse().ok()
}

fn parse_int(text: &str) -> Option<i32> {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let sign = sign_len(bytes);
    let digits = digits_len(&bytes[sign..]);
    if digits == 0 {
        return None;
    }
    text[..sign + digits].parse().ok()
}

fn sign_len(bytes: &[u8]) -> usize {
    match bytes.first() {
        Some(b'+') | Some(b'-') => 1,
        _ => 0,
    }
}

fn digits_len(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}
