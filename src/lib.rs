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

//! A bridge between [TidalCycles](https://tidalcycles.org/) and
//! [SuperDirt](https://github.com/musikinformatik/SuperDirt) for Rust programs.
//!
//! # Introduction
//!
//! Tidal is a live coding environment for patterns. It does not make any sound by itself;
//! instead it sends a stream of Open Sound Control (OSC) messages, one per event, to SuperDirt
//! running inside SuperCollider. This crate sits on that stream. It lets a Rust program see the
//! events Tidal plays, at the moment they are meant to be heard, and lets it send control values
//! back into Tidal's patterns.
//!
//! Point Tidal at the bridge (by default it listens on port 57120, the port SuperDirt normally
//! uses) and the bridge will report:
//!
//!  * **Trigger events** - every `/play2` message, decoded into a map of field names to values
//!    such as `{s: "bd", n: 3, orbit: 0}`. Tidal sends events a little ahead of time, along with
//!    a `delta` saying how far ahead. The bridge holds each event back by its delta, so events
//!    arrive when they would have been heard. See [`scheduler`].
//!
//!  * **Tempo events** - Tidal's clock, after subscribing to it with `/hello`.
//!
//!  * **Metering events** - per-orbit signal levels from SuperDirt, after subscribing with
//!    `/notify`.
//!
//! Control values are sent to Tidal as `/ctrl` messages and can be read in patterns with `cF`,
//! `cI` and `cS`. See [`control`].
//!
//! The crate is organized as:
//!
//!  * [`session`] - The [`Session`](session::Session) type that ties everything together.
//!  * [`config`] - Session options and their defaults.
//!  * [`transport`] - OSC over UDP.
//!  * [`router`], [`decode`], [`enrich`] - Turning incoming messages into events.
//!  * [`scheduler`] - Delaying trigger events by their delta.
//!  * [`control`] - Building outgoing control messages.
//!
//! # Examples
//!
//! Print every event Tidal plays and report the `gain` of each one back to Tidal as a control
//! value.
//!
//! ```no_run
//! use std::error::Error;
//! use tidal_bridge::{
//!     config::Config,
//!     decode::Value,
//!     session::{Event, Session},
//! };
//!
//! fn main() -> Result<(), Box<dyn Error>> {
//!     // Listen for Tidal on the default port and add midi note numbers to every event.
//!     let (session, events) = Session::open(Config::default().add_midi_data(true))?;
//!
//!     for event in events {
//!         match event {
//!             Event::Ready => println!("bridge ready on {}", session.local_addr()?),
//!             Event::Message(message) => {
//!                 println!("event: {}", serde_json::to_string(&message)?);
//!                 if let Some(Value::Float(gain)) = message.get("gain") {
//!                     session.send_float("lastgain", gain)?;
//!                 }
//!             }
//!             Event::Error(err) => eprintln!("error: {}", err),
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod control;
pub mod decode;
pub mod enrich;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod transport;
