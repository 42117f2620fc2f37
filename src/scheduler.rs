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

//! Delayed delivery of trigger events.
//!
//! Tidal sends events ahead of time and attaches a `delta` field to each one: the number of
//! seconds after the message arrives at which the event should actually happen. A [`Scheduler`]
//! holds each event back until its delta has passed, measured from the moment its datagram was
//! received, then hands it to an emit function.
//!
//! Events without a `delta` are emitted immediately, on the calling thread. Delayed events are
//! emitted from a timer thread owned by the scheduler, in order of when they are due rather than
//! in the order they arrived.
//!
//! The `delta` field is removed from every event before it is emitted.
//!
//! # Examples
//!
//! ```
//! use tidal_bridge::{decode::TriggerEvent, scheduler::Scheduler};
//! use std::{sync::mpsc, sync::Mutex, time::Instant};
//!
//! let (sender, receiver) = mpsc::channel();
//! let sender = Mutex::new(sender);
//! let scheduler = Scheduler::new(move |event| {
//!     let _ = sender.lock().unwrap().send(event);
//! });
//!
//! let mut event = TriggerEvent::new();
//! event.insert("s", "bd");
//! event.insert("delta", 0.05f32);
//! scheduler.schedule(event, Instant::now());
//!
//! let event = receiver.recv().unwrap();
//! assert!(!event.contains("delta"));
//! ```

mod scheduler_impl;

use crate::decode::{TriggerEvent, DELTA};
use scheduler_impl::{Pending, TimerMessage};
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        mpsc::Sender,
        Arc, Mutex,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

type Emit = dyn Fn(TriggerEvent) + Send + Sync;

/// Holds trigger events until they are due.
pub struct Scheduler {
    emit: Arc<Emit>,
    sender: Mutex<Sender<TimerMessage>>,
    state: Arc<State>,
    sequence: AtomicU64,
    timer: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct State {
    cancelled: AtomicBool,
    pending: AtomicUsize,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state)
            .finish()
    }
}

impl Scheduler {
    /// Creates a scheduler that passes due events to `emit`.
    ///
    /// `emit` is called from the thread calling [`Scheduler::schedule`] for events that are
    /// already due, and from the scheduler's timer thread for the rest.
    pub fn new<F>(emit: F) -> Scheduler
    where
        F: Fn(TriggerEvent) + Send + Sync + 'static,
    {
        let emit: Arc<Emit> = Arc::new(emit);
        let state = Arc::new(State::default());
        let (sender, timer) = scheduler_impl::spawn_timer(emit.clone(), state.clone());
        Scheduler {
            emit,
            sender: Mutex::new(sender),
            state,
            sequence: AtomicU64::new(0),
            timer: Some(timer),
        }
    }

    /// Emits the event once its delta has passed, measured from `received_at`.
    ///
    /// Events without a numeric, positive `delta` are emitted before this method returns.
    pub fn schedule(&self, mut event: TriggerEvent, received_at: Instant) {
        if self.is_cancelled() {
            log::debug!("scheduler cancelled, dropping event: {:?}", event);
            return;
        }

        let delta = match event.remove(DELTA) {
            None => return emit_guarded(&*self.emit, event),
            Some(delta) => delta,
        };
        match delta.as_f64() {
            Some(seconds) if seconds.is_finite() && seconds > 0.0 => {
                let due = Duration::try_from_secs_f64(seconds)
                    .ok()
                    .and_then(|delay| received_at.checked_add(delay));
                match due {
                    Some(due) => self.arm(due, event),
                    None => log::warn!(
                        "dropping event with out of range delta {}: {:?}",
                        seconds,
                        event
                    ),
                }
            }
            Some(_) => emit_guarded(&*self.emit, event),
            None => {
                log::warn!("ignoring non-numeric delta {:?} on event: {:?}", delta, event);
                emit_guarded(&*self.emit, event)
            }
        }
    }

    fn arm(&self, due: Instant, event: TriggerEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.state.pending.fetch_add(1, Ordering::SeqCst);
        let sent = match self.sender.lock() {
            Ok(sender) => sender
                .send(TimerMessage::Schedule(Pending {
                    due,
                    sequence,
                    event,
                }))
                .is_ok(),
            Err(_) => false,
        };
        if !sent {
            self.state.pending.fetch_sub(1, Ordering::SeqCst);
            log::debug!("timer thread has stopped, dropping delayed event");
        }
    }

    /// The number of events waiting for their delta to pass.
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Returns a [`Handle`] which can cancel this scheduler from another thread.
    pub fn handle(&self) -> Handle {
        Handle {
            sender: self.sender.lock().ok().map(|sender| sender.clone()),
            state: self.state.clone(),
        }
    }

    /// Cancels the scheduler and waits for its timer thread to exit.
    ///
    /// Pending events are dropped without being emitted, and events scheduled afterwards are
    /// dropped as well.
    pub fn cancel(&mut self) {
        self.handle().cancel();
        if let Some(timer) = self.timer.take() {
            if timer.join().is_err() {
                log::error!("scheduler timer thread panicked");
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

// A panicking emit function loses its own event only. The reader and timer threads keep going.
fn emit_guarded(emit: &Emit, event: TriggerEvent) {
    if panic::catch_unwind(AssertUnwindSafe(|| emit(event))).is_err() {
        log::error!("emitting trigger event panicked, event dropped");
    }
}

/// A handle to a scheduler.
///
/// Returned by [`Scheduler::handle`].
#[derive(Debug, Clone)]
pub struct Handle {
    sender: Option<Sender<TimerMessage>>,
    state: Arc<State>,
}

impl Handle {
    /// Cancel the scheduler that created this handle.
    ///
    /// Events that are still waiting for their delta are never emitted.
    pub fn cancel(self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        if let Some(sender) = self.sender {
            let _ = sender.send(TimerMessage::Cancel);
        }
    }
}
