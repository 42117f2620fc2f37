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

//! Session configuration.
//!
//! A [`Config`] is assembled once, before a [`Session`](crate::session::Session) is opened, and
//! never changes afterwards. Every option has a default, so the simplest configuration is
//! `Config::default()`. Options can be set with builder methods:
//!
//! ```
//! use tidal_bridge::config::Config;
//!
//! let config = Config::default()
//!     .in_port(9000)
//!     .listen_rms(true)
//!     .add_midi_data(true);
//! assert_eq!(config.rms_local_port().unwrap(), 9002);
//! ```
//!
//! Or read from JSON, using the same option names as the JavaScript bridge:
//!
//! ```
//! use tidal_bridge::config::Config;
//!
//! let config = Config::from_json(r#"{ "inPort": 9000, "listenTempo": true }"#)?;
//! assert_eq!(config.tempo_local_port().unwrap(), 9001);
//! # tidal_bridge::config::Result::Ok(())
//! ```

use crate::router::Patterns;
use crate::transport::Endpoint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A specialized [`Result`] type for configuration errors.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned when a [`Config`] cannot be read or used.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(ErrorInner);

#[derive(Debug, Error)]
enum ErrorInner {
    #[error("failed to deserialize config: {0}")]
    Deserialize(serde_json::Error),
    #[error("in port {in_port} leaves no room for the {listener} port at offset {offset}")]
    PortOverflow {
        in_port: u16,
        listener: &'static str,
        offset: u16,
    },
}

/// Configuration for a [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    in_address: String,
    in_port: u16,
    out_address: String,
    out_port: u16,
    address_pattern: String,
    add_midi_data: bool,
    listen_tempo: bool,
    tempo_address: String,
    tempo_port: u16,
    listen_rms: bool,
    rms_address: String,
    rms_port: u16,
}

impl Default for Config {
    /// Listens on `127.0.0.1:57120` for Tidal and sends control messages to `127.0.0.1:6010`.
    /// The tempo and metering listeners are disabled.
    fn default() -> Config {
        Config {
            in_address: "127.0.0.1".to_owned(),
            in_port: 57120,
            out_address: "127.0.0.1".to_owned(),
            out_port: 6010,
            address_pattern: crate::router::TRIGGER_ADDR.to_owned(),
            add_midi_data: false,
            listen_tempo: false,
            tempo_address: "127.0.0.1".to_owned(),
            tempo_port: 9160,
            listen_rms: false,
            rms_address: "127.0.0.1".to_owned(),
            rms_port: 57110,
        }
    }
}

impl Config {
    /// Reads a configuration from a JSON object. Missing options take their defaults.
    pub fn from_json(json: &str) -> Result<Config> {
        serde_json::from_str(json).map_err(|err| Error(ErrorInner::Deserialize(err)))
    }

    /// The local address that every listener binds to.
    pub fn in_address(mut self, address: impl Into<String>) -> Self {
        self.in_address = address.into();
        self
    }

    /// The local port of the main listener. The tempo listener uses the next port and the
    /// metering listener the one after that.
    pub fn in_port(mut self, port: u16) -> Self {
        self.in_port = port;
        self
    }

    /// The address that control messages are sent to.
    pub fn out_address(mut self, address: impl Into<String>) -> Self {
        self.out_address = address.into();
        self
    }

    /// The port that control messages are sent to.
    pub fn out_port(mut self, port: u16) -> Self {
        self.out_port = port;
        self
    }

    /// The address prefix of trigger messages. Defaults to `/play2`.
    pub fn address_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.address_pattern = pattern.into();
        self
    }

    /// Adds a `midinote` field to every trigger event. See [`enrich`](crate::enrich::enrich).
    pub fn add_midi_data(mut self, enabled: bool) -> Self {
        self.add_midi_data = enabled;
        self
    }

    pub fn listen_tempo(mut self, enabled: bool) -> Self {
        self.listen_tempo = enabled;
        self
    }

    pub fn tempo_address(mut self, address: impl Into<String>) -> Self {
        self.tempo_address = address.into();
        self
    }

    pub fn tempo_port(mut self, port: u16) -> Self {
        self.tempo_port = port;
        self
    }

    pub fn listen_rms(mut self, enabled: bool) -> Self {
        self.listen_rms = enabled;
        self
    }

    pub fn rms_address(mut self, address: impl Into<String>) -> Self {
        self.rms_address = address.into();
        self
    }

    pub fn rms_port(mut self, port: u16) -> Self {
        self.rms_port = port;
        self
    }

    pub fn midi_data_enabled(&self) -> bool {
        self.add_midi_data
    }

    pub fn tempo_enabled(&self) -> bool {
        self.listen_tempo
    }

    pub fn rms_enabled(&self) -> bool {
        self.listen_rms
    }

    pub fn patterns(&self) -> Patterns {
        Patterns::new(self.address_pattern.clone())
    }

    pub fn tempo_local_port(&self) -> Result<u16> {
        self.offset_port("tempo", 1)
    }

    pub fn rms_local_port(&self) -> Result<u16> {
        self.offset_port("metering", 2)
    }

    pub(crate) fn main_endpoint(&self) -> Endpoint {
        Endpoint::new(
            (self.in_address.clone(), self.in_port),
            (self.out_address.clone(), self.out_port),
        )
        .broadcast(true)
    }

    pub(crate) fn tempo_endpoint(&self) -> Result<Endpoint> {
        Ok(Endpoint::new(
            (self.in_address.clone(), self.tempo_local_port()?),
            (self.tempo_address.clone(), self.tempo_port),
        ))
    }

    pub(crate) fn rms_endpoint(&self) -> Result<Endpoint> {
        Ok(Endpoint::new(
            (self.in_address.clone(), self.rms_local_port()?),
            (self.rms_address.clone(), self.rms_port),
        ))
    }

    fn offset_port(&self, listener: &'static str, offset: u16) -> Result<u16> {
        self.in_port.checked_add(offset).ok_or(Error(ErrorInner::PortOverflow {
            in_port: self.in_port,
            listener,
            offset,
        }))
    }
}
