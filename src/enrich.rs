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

//! MIDI note numbers for trigger events.

use crate::decode::{TriggerEvent, Value};

const DEFAULT_OCTAVE: i32 = 5;

/// Adds a `midinote` field to a trigger event.
///
/// The note is taken from the `n` field, or from `note` when `n` is missing, or is 0 when both are
/// missing. The octave defaults to 5 when `octave` is missing. The note number is then
/// `n + (octave + 1) * 12`, so note 0 in octave 5 is MIDI note 72. The chosen note and octave are
/// also written back to `n` and `octave`.
///
/// The event is returned unchanged when `enabled` is false, or when any of the fields it reads
/// is not a number.
///
/// # Examples
///
/// ```
/// use tidal_bridge::{decode::{TriggerEvent, Value}, enrich::enrich};
///
/// let mut event = TriggerEvent::new();
/// event.insert("n", 7);
/// let event = enrich(event, true);
/// assert_eq!(event.get("midinote"), Some(&Value::Int(79)));
/// ```
pub fn enrich(mut event: TriggerEvent, enabled: bool) -> TriggerEvent {
    if !enabled {
        return event;
    }

    let octave = event
        .get("octave")
        .cloned()
        .unwrap_or(Value::Int(DEFAULT_OCTAVE));
    let n = event
        .get("n")
        .or_else(|| event.get("note"))
        .cloned()
        .unwrap_or(Value::Int(0));

    // Integers that overflow i32 fall through to float arithmetic.
    let exact = match (&n, &octave) {
        (Value::Int(n), Value::Int(octave)) => octave
            .checked_add(1)
            .and_then(|octave| octave.checked_mul(12))
            .and_then(|offset| n.checked_add(offset)),
        _ => None,
    };
    let midinote = match (exact, n.as_f64(), octave.as_f64()) {
        (Some(midinote), _, _) => Value::Int(midinote),
        (None, Some(n), Some(octave)) => Value::Float((n + (octave + 1.0) * 12.0) as f32),
        _ => {
            log::warn!("not adding midinote to event with non-numeric note: {:?}", event);
            return event;
        }
    };

    event.insert("octave", octave);
    event.insert("n", n);
    event.insert("midinote", midinote);
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_n_with_default_octave() {
        let event = enrich(event(vec![("n", Value::Int(7))]), true);
        assert_eq!(event.get("midinote"), Some(&Value::Int(79)));
        assert_eq!(event.get("octave"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_note_with_octave() {
        let event = enrich(
            event(vec![("note", Value::Int(3)), ("octave", Value::Int(4))]),
            true,
        );
        assert_eq!(event.get("midinote"), Some(&Value::Int(63)));
        assert_eq!(event.get("n"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_note_without_octave_uses_default_octave() {
        let event = enrich(event(vec![("note", Value::Int(3))]), true);
        assert_eq!(event.get("midinote"), Some(&Value::Int(75)));
    }

    #[test]
    fn test_n_takes_precedence_over_note() {
        let event = enrich(event(vec![("n", Value::Int(1)), ("note", Value::Int(3))]), true);
        assert_eq!(event.get("midinote"), Some(&Value::Int(73)));
    }

    #[test]
    fn test_no_note_is_zero() {
        let event = enrich(event(vec![("s", Value::from("bd"))]), true);
        assert_eq!(event.get("midinote"), Some(&Value::Int(72)));
    }

    #[test]
    fn test_float_note() {
        let event = enrich(event(vec![("n", Value::Float(0.5))]), true);
        assert_eq!(event.get("midinote"), Some(&Value::Float(72.5)));
    }

    #[test]
    fn test_overwrites_existing_midinote() {
        let event = enrich(
            event(vec![("n", Value::Int(0)), ("midinote", Value::Int(1))]),
            true,
        );
        assert_eq!(event.get("midinote"), Some(&Value::Int(72)));
    }

    #[test]
    fn test_disabled() {
        let original = event(vec![("n", Value::Int(7))]);
        assert_eq!(enrich(original.clone(), false), original);
    }

    #[test]
    fn test_non_numeric_note_is_left_alone() {
        let original = event(vec![("n", Value::from("c"))]);
        assert_eq!(enrich(original.clone(), true), original);
    }

    #[test]
    fn test_int_overflow_falls_back_to_float() {
        let high_note = enrich(event(vec![("n", Value::Int(i32::MAX))]), true);
        let expected = (f64::from(i32::MAX) + 72.0) as f32;
        assert_eq!(high_note.get("midinote"), Some(&Value::Float(expected)));
        assert_eq!(high_note.get("n"), Some(&Value::Int(i32::MAX)));

        let high_octave = enrich(
            event(vec![("n", Value::Int(0)), ("octave", Value::Int(i32::MAX))]),
            true,
        );
        let expected = ((f64::from(i32::MAX) + 1.0) * 12.0) as f32;
        assert_eq!(high_octave.get("midinote"), Some(&Value::Float(expected)));
    }

    fn event(fields: Vec<(&str, Value)>) -> TriggerEvent {
        fields.into_iter().collect()
    }
}
