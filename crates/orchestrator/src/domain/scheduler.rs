//! Deadline scheduler.
//!
//! One min-heap drives every soft-real-time edge in the fleet: idle reaps,
//! start countdowns, learning windows, round deadlines, and the host agent's
//! cycle. Scheduling a key that already has a pending timer replaces it (the
//! stale heap entry is dropped lazily); cancellation is idempotent. The
//! dispatcher never mutates arenas - it emits events that land in each
//! arena's mailbox.

use crate::infra::clock::Clock;
use arena_core::Address;
use log::{debug, info, warn};
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    sync::{Arc, Mutex},
};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    RegistrationDeadline,
    IdleReap,
    GameStartCountdown,
    LearningEnd,
    RoundDeadline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Arena { address: Address, kind: TimerKind },
    AgentCycle,
}

#[derive(Debug, Clone, Copy)]
pub struct TimerEvent {
    pub key: TimerKey,
    pub fires_at: OffsetDateTime,
}

#[derive(PartialEq, Eq)]
struct HeapEntry {
    fires_at: OffsetDateTime,
    seq: u64,
    generation: u64,
    key: TimerKey,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fires_at
            .cmp(&other.fires_at)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct SchedulerState {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    /// Current generation per key; heap entries from older generations are
    /// dead and skipped on pop.
    generations: HashMap<TimerKey, u64>,
    next_generation: u64,
    next_seq: u64,
    accepting: bool,
}

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    state: Mutex<SchedulerState>,
    events: mpsc::UnboundedSender<TimerEvent>,
    tick: std::time::Duration,
}

impl Scheduler {
    pub fn new(
        clock: Arc<dyn Clock>,
        tick_ms: u64,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TimerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Self {
            clock,
            state: Mutex::new(SchedulerState {
                accepting: true,
                ..SchedulerState::default()
            }),
            events,
            tick: std::time::Duration::from_millis(tick_ms),
        });
        (scheduler, receiver)
    }

    /// Schedule `key` for `fires_at`, replacing any pending timer for the
    /// same key. The later schedule always wins.
    pub fn schedule(&self, key: TimerKey, fires_at: OffsetDateTime) {
        let mut state = self.state.lock().expect("scheduler lock");
        if !state.accepting {
            debug!("Scheduler draining, dropped timer {:?}", key);
            return;
        }
        state.next_generation += 1;
        state.next_seq += 1;
        let generation = state.next_generation;
        let seq = state.next_seq;
        state.generations.insert(key, generation);
        state.heap.push(Reverse(HeapEntry {
            fires_at,
            seq,
            generation,
            key,
        }));
    }

    /// Remove the pending timer for `key` if any. Idempotent.
    pub fn cancel(&self, key: &TimerKey) {
        let mut state = self.state.lock().expect("scheduler lock");
        state.generations.remove(key);
    }

    /// Cancel every arena-scoped timer for `address`.
    pub fn cancel_arena(&self, address: &Address) {
        let mut state = self.state.lock().expect("scheduler lock");
        state
            .generations
            .retain(|key, _| !matches!(key, TimerKey::Arena { address: a, .. } if a == address));
    }

    pub fn pending(&self, key: &TimerKey) -> bool {
        let state = self.state.lock().expect("scheduler lock");
        state.generations.contains_key(key)
    }

    /// Stop accepting new timers; part of graceful shutdown.
    pub fn stop_accepting(&self) {
        let mut state = self.state.lock().expect("scheduler lock");
        state.accepting = false;
    }

    /// Pop and emit every timer due at `now`. Returns how many fired.
    pub fn fire_due(&self) -> usize {
        let now = self.clock.now();
        let due = {
            let mut state = self.state.lock().expect("scheduler lock");
            let mut due = Vec::new();
            while let Some(Reverse(head)) = state.heap.peek() {
                if head.fires_at > now {
                    break;
                }
                let Some(Reverse(entry)) = state.heap.pop() else {
                    break;
                };
                // Only the latest generation of a key is live.
                if state.generations.get(&entry.key) == Some(&entry.generation) {
                    state.generations.remove(&entry.key);
                    due.push(TimerEvent {
                        key: entry.key,
                        fires_at: entry.fires_at,
                    });
                }
            }
            due
        };

        let fired = due.len();
        for event in due {
            if self.events.send(event).is_err() {
                warn!("Timer event receiver dropped, timer {:?} lost", event.key);
            }
        }
        fired
    }

    fn sleep_until_next(&self) -> std::time::Duration {
        let state = self.state.lock().expect("scheduler lock");
        match state.heap.peek() {
            Some(Reverse(head)) => {
                let until = head.fires_at - self.clock.now();
                let millis = until
                    .whole_milliseconds()
                    .clamp(0, self.tick.as_millis() as i128) as u64;
                std::time::Duration::from_millis(millis)
            }
            None => self.tick,
        }
    }

    /// Dispatcher loop: fire whatever is due, sleep until the next deadline
    /// (capped at one tick), repeat until cancelled.
    pub async fn run(self: Arc<Self>, cancel_token: CancellationToken) {
        info!("Starting deadline scheduler");
        loop {
            if cancel_token.is_cancelled() {
                break;
            }
            self.fire_due();
            let sleep = self.sleep_until_next();
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = cancel_token.cancelled() => break,
            }
        }
        info!("Deadline scheduler stopped");
    }
}
