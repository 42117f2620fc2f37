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

//! Classifies incoming OSC addresses.

/// The default address of trigger messages sent by Tidal.
pub const TRIGGER_ADDR: &str = "/play2";

/// The address of tempo messages.
pub const TEMPO_ADDR: &str = "/cps/cycle";

/// The address of metering messages.
pub const METERING_ADDR: &str = "/rms";

/// The kind of event an OSC message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Trigger,
    Tempo,
    Metering,
    Unmatched,
}

/// The addresses that a session listens for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patterns {
    matchers: Vec<Matcher>,
}

impl Default for Patterns {
    fn default() -> Patterns {
        Patterns::new(TRIGGER_ADDR)
    }
}

impl Patterns {
    /// Creates patterns that route messages whose address starts with `trigger` to
    /// [`Channel::Trigger`].
    ///
    /// Trigger addresses are matched by prefix so that senders can append extra path segments,
    /// like `/play2/orbit/1`.
    pub fn new(trigger: impl Into<String>) -> Patterns {
        // Matchers are tried in order. The exact tempo and metering addresses come before the
        // trigger prefix, so a trigger pattern like "/" or "/rms" never shadows them.
        Patterns {
            matchers: vec![
                Matcher::exact(TEMPO_ADDR, Channel::Tempo),
                Matcher::exact(METERING_ADDR, Channel::Metering),
                Matcher::prefix(trigger.into(), Channel::Trigger),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Matcher {
    addr: String,
    prefix: bool,
    channel: Channel,
}

impl Matcher {
    fn exact(addr: impl Into<String>, channel: Channel) -> Matcher {
        Matcher {
            addr: addr.into(),
            prefix: false,
            channel,
        }
    }

    fn prefix(addr: impl Into<String>, channel: Channel) -> Matcher {
        Matcher {
            addr: addr.into(),
            prefix: true,
            channel,
        }
    }

    fn matches(&self, address: &str) -> bool {
        if self.prefix {
            address.starts_with(&self.addr)
        } else {
            address == self.addr
        }
    }
}

/// Returns the channel that messages sent to `address` belong to.
///
/// # Examples
///
/// ```
/// use tidal_bridge::router::{classify, Channel, Patterns};
///
/// let patterns = Patterns::default();
/// assert_eq!(classify("/play2", &patterns), Channel::Trigger);
/// assert_eq!(classify("/cps/cycle", &patterns), Channel::Tempo);
/// assert_eq!(classify("/foo", &patterns), Channel::Unmatched);
/// ```
pub fn classify(address: &str, patterns: &Patterns) -> Channel {
    patterns
        .matchers
        .iter()
        .find(|matcher| matcher.matches(address))
        .map(|matcher| matcher.channel)
        .unwrap_or(Channel::Unmatched)
}
