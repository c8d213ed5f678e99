use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TimerError;

use super::clock::Clock;

/// Identifier of a timer callback. Only names known to the registry at
/// construction can be scheduled.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(String);

impl CallbackId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallbackId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A timer that became due.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerEntry {
    pub key: String,
    pub callback: CallbackId,
    pub fire_at: DateTime<Utc>,
}

/// Result of [`TimerRegistry::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    Scheduled,
    /// An earlier pending entry for the same pair was cancelled.
    Replaced { previous: DateTime<Utc> },
}

type TimerKey = (String, CallbackId);

#[derive(Debug, Clone, Copy)]
struct Pending {
    fire_at: DateTime<Utc>,
    generation: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    pending: HashMap<TimerKey, Pending>,
    deadlines: BinaryHeap<Reverse<(DateTime<Utc>, u64, String, CallbackId)>>,
    next_generation: u64,
}

impl RegistryState {
    fn is_live(&self, key: &str, callback: &CallbackId, generation: u64) -> bool {
        self.pending
            .get(&(key.to_string(), callback.clone()))
            .is_some_and(|pending| pending.generation == generation)
    }

    fn prune_stale(&mut self) {
        while let Some(Reverse((_, generation, key, callback))) = self.deadlines.peek() {
            if self.is_live(key, callback, *generation) {
                break;
            }
            self.deadlines.pop();
        }
    }
}

/// In-memory timer table.
///
/// At most one entry is pending per `(key, callback)`; registering again
/// replaces it. Superseded heap entries are discarded lazily by generation.
pub struct TimerRegistry {
    clock: Arc<dyn Clock>,
    callbacks: BTreeSet<CallbackId>,
    state: Mutex<RegistryState>,
}

impl fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.state.lock().pending.len();
        f.debug_struct("TimerRegistry")
            .field("callbacks", &self.callbacks)
            .field("pending", &pending)
            .finish()
    }
}

impl TimerRegistry {
    pub fn new<I>(clock: Arc<dyn Clock>, callbacks: I) -> Self
    where
        I: IntoIterator<Item = CallbackId>,
    {
        Self {
            clock,
            callbacks: callbacks.into_iter().collect(),
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn knows(&self, callback: &CallbackId) -> bool {
        self.callbacks.contains(callback)
    }

    pub fn register(
        &self,
        key: &str,
        callback: &CallbackId,
        fire_at: DateTime<Utc>,
    ) -> Result<Registration, TimerError> {
        if key.is_empty() {
            return Err(TimerError::EmptyKey);
        }
        if !self.knows(callback) {
            return Err(TimerError::UnknownCallback(callback.to_string()));
        }

        let mut state = self.state.lock();
        let generation = state.next_generation;
        state.next_generation += 1;

        let previous = state.pending.insert(
            (key.to_string(), callback.clone()),
            Pending {
                fire_at,
                generation,
            },
        );
        state.deadlines.push(Reverse((
            fire_at,
            generation,
            key.to_string(),
            callback.clone(),
        )));

        debug!(target: "eventing::timers", key, callback = %callback, %fire_at, "timer scheduled");

        Ok(match previous {
            Some(previous) => Registration::Replaced {
                previous: previous.fire_at,
            },
            None => Registration::Scheduled,
        })
    }

    /// Cancels a pending timer. Returns `false` when nothing was scheduled.
    pub fn cancel(&self, key: &str, callback: &CallbackId) -> bool {
        let mut state = self.state.lock();
        let removed = state
            .pending
            .remove(&(key.to_string(), callback.clone()))
            .is_some();
        if removed {
            state.prune_stale();
            debug!(target: "eventing::timers", key, callback = %callback, "timer cancelled");
        }
        removed
    }

    pub fn pending(&self, key: &str, callback: &CallbackId) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .pending
            .get(&(key.to_string(), callback.clone()))
            .map(|pending| pending.fire_at)
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        let mut state = self.state.lock();
        state.prune_stale();
        state
            .deadlines
            .peek()
            .map(|Reverse((fire_at, ..))| *fire_at)
    }

    /// Removes and returns every entry due at or before `now`, earliest
    /// first. A returned entry is no longer pending, so each registration
    /// fires at most once.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<TimerEntry> {
        let mut state = self.state.lock();
        let mut due = Vec::new();

        while let Some(Reverse((fire_at, ..))) = state.deadlines.peek() {
            if *fire_at > now {
                break;
            }
            let Some(Reverse((fire_at, generation, key, callback))) = state.deadlines.pop()
            else {
                break;
            };
            if !state.is_live(&key, &callback, generation) {
                continue;
            }
            state.pending.remove(&(key.clone(), callback.clone()));
            due.push(TimerEntry {
                key,
                callback,
                fire_at,
            });
        }

        due
    }

    /// [`take_due`](Self::take_due) against the registry's clock.
    pub fn take_due_now(&self) -> Vec<TimerEntry> {
        self.take_due(self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timers::clock::ManualClock;
    use chrono::{Duration, TimeZone};

    fn setup() -> (Arc<ManualClock>, TimerRegistry) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let registry = TimerRegistry::new(clock.clone(), [CallbackId::new("audit")]);
        (clock, registry)
    }

    #[test]
    fn reregistration_fires_once_at_latest_deadline() {
        let (clock, registry) = setup();
        let audit = CallbackId::new("audit");
        let t0 = clock.now();

        assert_eq!(
            registry.register("u1", &audit, t0 + Duration::seconds(5)).unwrap(),
            Registration::Scheduled
        );
        assert_eq!(
            registry.register("u1", &audit, t0 + Duration::seconds(10)).unwrap(),
            Registration::Replaced {
                previous: t0 + Duration::seconds(5)
            }
        );

        clock.advance(Duration::seconds(6));
        assert!(registry.take_due_now().is_empty());

        clock.advance(Duration::seconds(5));
        let fired = registry.take_due_now();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].fire_at, t0 + Duration::seconds(10));
        assert!(registry.take_due_now().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn cancel_before_deadline_prevents_firing() {
        let (clock, registry) = setup();
        let audit = CallbackId::new("audit");
        registry
            .register("u1", &audit, clock.now() + Duration::seconds(1))
            .unwrap();

        assert!(registry.cancel("u1", &audit));
        assert!(!registry.cancel("u1", &audit));

        clock.advance(Duration::seconds(2));
        assert!(registry.take_due_now().is_empty());
        assert_eq!(registry.next_deadline(), None);
    }

    #[test]
    fn unknown_callback_and_empty_key_are_refused() {
        let (clock, registry) = setup();
        assert_eq!(
            registry.register("u1", &CallbackId::new("nope"), clock.now()),
            Err(TimerError::UnknownCallback("nope".into()))
        );
        assert_eq!(
            registry.register("", &CallbackId::new("audit"), clock.now()),
            Err(TimerError::EmptyKey)
        );
    }

    #[test]
    fn due_entries_come_out_earliest_first() {
        let (clock, registry) = setup();
        let audit = CallbackId::new("audit");
        let t0 = clock.now();
        registry.register("b", &audit, t0 + Duration::seconds(2)).unwrap();
        registry.register("a", &audit, t0 + Duration::seconds(1)).unwrap();

        assert_eq!(registry.next_deadline(), Some(t0 + Duration::seconds(1)));
        let keys: Vec<String> = registry
            .take_due(t0 + Duration::seconds(3))
            .into_iter()
            .map(|entry| entry.key)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn fired_pair_can_be_scheduled_again() {
        let (clock, registry) = setup();
        let audit = CallbackId::new("audit");
        registry.register("u1", &audit, clock.now()).unwrap();
        assert_eq!(registry.take_due_now().len(), 1);

        assert_eq!(
            registry.register("u1", &audit, clock.now()).unwrap(),
            Registration::Scheduled
        );
        assert_eq!(registry.take_due_now().len(), 1);
    }
}
