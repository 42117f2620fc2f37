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

use rosc::{OscMessage, OscPacket, OscType};

/// An outgoing OSC message.
///
/// # Examples
///
/// ```
/// use tidal_bridge::transport::Message;
///
/// let message = Message::addr("/notify").arg(1);
/// assert_eq!(message.address(), "/notify");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message(OscMessage);

impl Message {
    pub fn addr(addr: impl Into<String>) -> Message {
        Message(OscMessage {
            addr: addr.into(),
            args: Vec::new(),
        })
    }

    pub fn arg<T: Into<OscType>>(mut self, arg: T) -> Message {
        self.0.args.push(arg.into());
        self
    }

    pub fn address(&self) -> &str {
        &self.0.addr
    }

    pub fn arguments(&self) -> &[OscType] {
        &self.0.args
    }

    pub fn into_packet(self) -> OscPacket {
        OscPacket::Message(self.0)
    }
}

impl From<Message> for OscMessage {
    fn from(message: Message) -> OscMessage {
        message.0
    }
}
