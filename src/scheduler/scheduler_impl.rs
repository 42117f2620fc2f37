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

use super::{emit_guarded, Emit, State};
use crate::decode::TriggerEvent;
use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::{
        atomic,
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

#[derive(Debug)]
pub(super) enum TimerMessage {
    Schedule(Pending),
    Cancel,
}

#[derive(Debug)]
pub(super) struct Pending {
    pub(super) due: Instant,
    pub(super) sequence: u64,
    pub(super) event: TriggerEvent,
}

// Reversed so that the BinaryHeap pops the earliest event first. Events due at the same instant
// keep the order they were scheduled in.
impl Ord for Pending {
    fn cmp(&self, other: &Pending) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Pending) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Pending) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}

impl Eq for Pending {}

pub(super) fn spawn_timer(
    emit: Arc<Emit>,
    state: Arc<State>,
) -> (Sender<TimerMessage>, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel();
    let timer = thread::spawn(move || run_timer(receiver, emit, state));
    (sender, timer)
}

fn run_timer(receiver: Receiver<TimerMessage>, emit: Arc<Emit>, state: Arc<State>) {
    let mut queue = BinaryHeap::new();

    loop {
        let now = Instant::now();
        while queue.peek().map_or(false, |next: &Pending| next.due <= now) {
            if state.cancelled.load(atomic::Ordering::SeqCst) {
                break;
            }
            if let Some(next) = queue.pop() {
                state.pending.fetch_sub(1, atomic::Ordering::SeqCst);
                emit_guarded(&*emit, next.event);
            }
        }
        if state.cancelled.load(atomic::Ordering::SeqCst) {
            break;
        }

        let message = match queue.peek() {
            Some(next) => match receiver.recv_timeout(next.due.saturating_duration_since(now)) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match receiver.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
        };

        match message {
            TimerMessage::Schedule(pending) => queue.push(pending),
            TimerMessage::Cancel => break,
        }
    }

    if !queue.is_empty() {
        log::debug!("abandoning {} delayed events", queue.len());
    }
    state.pending.store(0, atomic::Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_queue_pops_earliest_first() {
        let start = Instant::now();
        let mut queue = BinaryHeap::new();
        queue.push(pending(start + Duration::from_millis(20), 0));
        queue.push(pending(start + Duration::from_millis(10), 1));
        queue.push(pending(start + Duration::from_millis(10), 2));

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop())
            .map(|p| p.sequence)
            .collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    fn pending(due: Instant, sequence: u64) -> Pending {
        Pending {
            due,
            sequence,
            event: TriggerEvent::new(),
        }
    }
}
