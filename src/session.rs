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

//! A running bridge.
//!
//! A [`Session`] owns up to three UDP connections:
//!
//! * The main connection, which receives trigger messages from Tidal and sends control messages
//!   back to it.
//! * An optional tempo connection, bound to the main port plus one, which subscribes to Tidal's
//!   clock by sending `/hello` and then receives `/cps/cycle` messages.
//! * An optional metering connection, bound to the main port plus two, which subscribes to
//!   SuperDirt's signal levels by sending `/notify 1` and then receives `/rms` messages.
//!
//! Every connection is read on its own thread. Events decoded from incoming messages are handed
//! to an [`Observer`]. The simplest observer is a channel, which [`Session::open`] sets up:
//!
//! ```no_run
//! use tidal_bridge::{config::Config, session::{Event, Session}};
//!
//! let (session, events) = Session::open(Config::default().add_midi_data(true))?;
//! for event in events {
//!     match event {
//!         Event::Ready => println!("listening on {}", session.local_addr()?),
//!         Event::Message(message) => println!("message: {:?}", message),
//!         Event::Error(err) => eprintln!("error: {}", err),
//!         _ => {}
//!     }
//! }
//! # tidal_bridge::session::Result::Ok(())
//! ```
//!
//! Trigger events are delayed by their `delta` field before they reach the observer. See the
//! [`scheduler`](crate::scheduler) module.

use crate::{
    config::{self, Config},
    control::ControlMessage,
    decode::{
        decode_metering, decode_tempo, decode_trigger, MeteringEvent, TempoEvent, TriggerEvent,
    },
    enrich::enrich,
    router::{classify, Channel, Patterns},
    scheduler::Scheduler,
    transport::{self, Connection, Message},
};
use rosc::OscMessage;
use std::{
    fmt,
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Instant,
};
use thiserror::Error;

/// The address that subscribes to Tidal's clock.
pub const HELLO_ADDR: &str = "/hello";

/// The address that subscribes to SuperDirt's notifications.
pub const NOTIFY_ADDR: &str = "/notify";

/// A specialized [`Result`] type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by [`Session`] operations.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(ErrorInner);

#[derive(Debug, Error)]
enum ErrorInner {
    #[error(transparent)]
    Transport(transport::Error),
    #[error(transparent)]
    Config(config::Error),
}

impl From<transport::Error> for Error {
    fn from(err: transport::Error) -> Error {
        Error(ErrorInner::Transport(err))
    }
}

impl From<config::Error> for Error {
    fn from(err: config::Error) -> Error {
        Error(ErrorInner::Config(err))
    }
}

/// Receives the events of a [`Session`].
///
/// Methods are called from the session's reader and timer threads, possibly concurrently. Every
/// method does nothing by default.
pub trait Observer: Send + Sync {
    /// The main connection is ready. Called exactly once.
    fn ready(&self) {}

    /// A trigger event is due.
    fn message(&self, _event: TriggerEvent) {}

    /// Tidal's clock changed.
    fn tempo(&self, _event: TempoEvent) {}

    /// SuperDirt reported signal levels.
    fn rms(&self, _event: MeteringEvent) {}

    /// A connection failed to receive or decode a datagram. The session keeps running.
    fn error(&self, _error: transport::Error) {}
}

/// Everything an [`Observer`] can be told, as a value.
#[derive(Debug)]
pub enum Event {
    Ready,
    Message(TriggerEvent),
    Tempo(TempoEvent),
    Rms(MeteringEvent),
    Error(transport::Error),
}

/// An [`Observer`] that forwards every event into a channel.
#[derive(Debug)]
pub struct EventSender(Mutex<Sender<Event>>);

impl EventSender {
    pub fn new(sender: Sender<Event>) -> EventSender {
        EventSender(Mutex::new(sender))
    }

    fn send(&self, event: Event) {
        if let Ok(sender) = self.0.lock() {
            // The receiver may be gone; events are then discarded.
            let _ = sender.send(event);
        }
    }
}

impl Observer for EventSender {
    fn ready(&self) {
        self.send(Event::Ready)
    }

    fn message(&self, event: TriggerEvent) {
        self.send(Event::Message(event))
    }

    fn tempo(&self, event: TempoEvent) {
        self.send(Event::Tempo(event))
    }

    fn rms(&self, event: MeteringEvent) {
        self.send(Event::Rms(event))
    }

    fn error(&self, error: transport::Error) {
        self.send(Event::Error(error))
    }
}

/// A bridge between Tidal and SuperDirt.
///
/// Dropping the session closes all of its connections and drops any trigger events that are
/// still waiting for their delta.
pub struct Session {
    main: Connection,
    tempo: Option<Connection>,
    rms: Option<Connection>,
    dispatcher: Arc<Dispatcher>,
    readers: Vec<JoinHandle<()>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("main", &self.main)
            .field("tempo", &self.tempo)
            .field("rms", &self.rms)
            .field("scheduler", &self.dispatcher.scheduler)
            .finish()
    }
}

impl Session {
    /// Opens a session and returns it along with the receiving end of its events.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the configured connections cannot be opened.
    pub fn open(config: Config) -> Result<(Session, Receiver<Event>)> {
        let (sender, receiver) = mpsc::channel();
        let session = Session::open_with(config, Arc::new(EventSender::new(sender)))?;
        Ok((session, receiver))
    }

    /// Opens a session that reports its events to `observer`.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the configured connections cannot be opened.
    pub fn open_with(config: Config, observer: Arc<dyn Observer>) -> Result<Session> {
        let main = Connection::open(&config.main_endpoint())?;
        let tempo = if config.tempo_enabled() {
            Some(Connection::open(&config.tempo_endpoint()?)?)
        } else {
            None
        };
        let rms = if config.rms_enabled() {
            Some(Connection::open(&config.rms_endpoint()?)?)
        } else {
            None
        };

        let add_midi_data = config.midi_data_enabled();
        let scheduler = Scheduler::new({
            let observer = observer.clone();
            move |event| observer.message(enrich(event, add_midi_data))
        });
        let dispatcher = Arc::new(Dispatcher {
            patterns: config.patterns(),
            observer,
            scheduler,
        });

        let mut readers = vec![spawn_reader(main.clone(), dispatcher.clone(), true)];
        if let Some(tempo) = &tempo {
            readers.push(spawn_reader(tempo.clone(), dispatcher.clone(), false));
            dispatcher.handshake(tempo, Message::addr(HELLO_ADDR));
        }
        if let Some(rms) = &rms {
            readers.push(spawn_reader(rms.clone(), dispatcher.clone(), false));
            dispatcher.handshake(rms, Message::addr(NOTIFY_ADDR).arg(1));
        }

        Ok(Session {
            main,
            tempo,
            rms,
            dispatcher,
            readers,
        })
    }

    /// The address of the main connection.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.main.local_addr()?)
    }

    /// Sets a float control. Does nothing if `value` does not start with a number.
    ///
    /// # Errors
    ///
    /// Returns an error if the control message cannot be sent.
    pub fn send_float(&self, name: &str, value: impl ToString) -> Result<()> {
        let value = value.to_string();
        match ControlMessage::float(name, &value) {
            Some(control) => self.send_control(control),
            None => {
                log::debug!("not sending float control {}: {:?} is not a number", name, value);
                Ok(())
            }
        }
    }

    /// Sets an integer control. Does nothing if `value` does not start with an integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the control message cannot be sent.
    pub fn send_int(&self, name: &str, value: impl ToString) -> Result<()> {
        let value = value.to_string();
        match ControlMessage::int(name, &value) {
            Some(control) => self.send_control(control),
            None => {
                log::debug!("not sending int control {}: {:?} is not an integer", name, value);
                Ok(())
            }
        }
    }

    /// Sets a string control.
    ///
    /// # Errors
    ///
    /// Returns an error if the control message cannot be sent.
    pub fn send_string(&self, name: &str, value: impl ToString) -> Result<()> {
        self.send_control(ControlMessage::string(name, value.to_string()))
    }

    #[deprecated(note = "use `send_string` instead")]
    pub fn send_pattern(&self, name: &str, value: impl ToString) -> Result<()> {
        self.send_string(name, value)
    }

    /// Sends a control message over the main connection.
    pub fn send_control(&self, control: ControlMessage) -> Result<()> {
        self.main.send(control.into_message())?;
        Ok(())
    }

    /// Closes the session. Same as dropping it.
    pub fn close(self) {}

    fn connections(&self) -> impl Iterator<Item = &Connection> {
        std::iter::once(&self.main)
            .chain(self.tempo.iter())
            .chain(self.rms.iter())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispatcher.scheduler.handle().cancel();
        for connection in self.connections() {
            connection.close();
        }
        for reader in self.readers.drain(..) {
            if reader.join().is_err() {
                log::error!("session reader thread panicked");
            }
        }
    }
}

struct Dispatcher {
    patterns: Patterns,
    observer: Arc<dyn Observer>,
    scheduler: Scheduler,
}

impl Dispatcher {
    fn dispatch(&self, message: &OscMessage, received_at: Instant) {
        match classify(&message.addr, &self.patterns) {
            Channel::Trigger => match decode_trigger(&message.args) {
                Ok(event) => self.scheduler.schedule(event, received_at),
                Err(err) => log::warn!("dropping trigger message to {}: {}", message.addr, err),
            },
            Channel::Tempo => match decode_tempo(&message.args) {
                Ok(event) => self.observer.tempo(event),
                Err(err) => log::warn!("dropping tempo message: {}", err),
            },
            Channel::Metering => match decode_metering(&message.args) {
                Ok(event) => self.observer.rms(event),
                Err(err) => log::warn!("dropping metering message: {}", err),
            },
            Channel::Unmatched => log::trace!("ignoring message to {}", message.addr),
        }
    }

    fn handshake(&self, connection: &Connection, message: Message) {
        if let Err(err) = connection.send(message) {
            log::error!("error sending subscription handshake: {}", err);
            self.observer.error(err);
        }
    }
}

fn spawn_reader(
    connection: Connection,
    dispatcher: Arc<Dispatcher>,
    notify_ready: bool,
) -> JoinHandle<()> {
    thread::spawn(move || {
        if notify_ready {
            dispatcher.observer.ready();
        }
        for received in connection.incoming() {
            let handled = panic::catch_unwind(AssertUnwindSafe(|| match received {
                Ok(received) => {
                    for message in &received.messages {
                        dispatcher.dispatch(message, received.received_at);
                    }
                }
                Err(err) => {
                    log::error!("error receiving packet: {}", err);
                    dispatcher.observer.error(err);
                }
            }));
            if handled.is_err() {
                log::error!("observer panicked, dropping the rest of the datagram");
            }
        }
    })
}
