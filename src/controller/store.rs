//! # Controller State Store
//!
//! Shared, concurrency-safe map from slot index to [`ControllerState`].
//!
//! Every slot record sits behind its own mutex so writers on different slots
//! never contend. Two writers on the same slot are serialised per call but
//! their interleaving is unspecified; a closure passed to [`SlotStore::mutate`]
//! always sees and leaves a whole record.
//!
//! Writes mark the slot dirty and notify the server loop through an unbounded
//! channel. Only the clean → dirty edge sends an event, so a burst of writes
//! between two pushes costs one event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::debug;

use super::state::{ConnectionType, ControllerState, SlotStatus, DEFAULT_MOTOR_COUNT};
use crate::dsu::protocol::{BatteryStatus, MacAddress};

/// Notification from the store to the server loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    /// Slot state was written since the last push
    Changed(u32),
    /// A writer set the connection type to [`ConnectionType::Disconnect`]
    DisconnectRequested(u32),
}

/// Per-slot values applied whenever the slot is (re)allocated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotProfile {
    pub mac: Option<MacAddress>,
    pub connection_type: ConnectionType,
    pub battery: BatteryStatus,
    pub motor_count: u8,
}

impl Default for SlotProfile {
    fn default() -> Self {
        Self {
            mac: None,
            connection_type: ConnectionType::None,
            battery: BatteryStatus::Full,
            motor_count: DEFAULT_MOTOR_COUNT,
        }
    }
}

impl SlotProfile {
    fn apply(&self, state: &mut ControllerState) {
        if let Some(mac) = self.mac {
            state.mac = mac;
        }
        state.connection_type = self.connection_type;
        state.battery = self.battery;
        state.set_motor_count(self.motor_count);
    }
}

struct SlotEntry {
    state: Mutex<ControllerState>,
    dirty: AtomicBool,
}

impl SlotEntry {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        // A panicking script must not take the slot down with it
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct StoreInner {
    slots: RwLock<HashMap<u32, Arc<SlotEntry>>>,
    profiles: RwLock<HashMap<u32, SlotProfile>>,
    events: mpsc::UnboundedSender<SlotEvent>,
}

/// Cloneable handle to the shared slot map
#[derive(Clone)]
pub struct SlotStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for SlotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotStore")
            .field("slots", &self.slots())
            .finish_non_exhaustive()
    }
}

impl SlotStore {
    /// Create an empty store and the receiving end of its event channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SlotEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let store = Self {
            inner: Arc::new(StoreInner {
                slots: RwLock::new(HashMap::new()),
                profiles: RwLock::new(HashMap::new()),
                events,
            }),
        };
        (store, receiver)
    }

    /// Register the profile used whenever `slot` is allocated
    ///
    /// An already allocated slot picks the profile up immediately.
    pub fn set_profile(&self, slot: u32, profile: SlotProfile) {
        if let Some(entry) = self.existing(slot) {
            profile.apply(&mut entry.lock());
        }
        self.inner
            .profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slot, profile);
    }

    fn existing(&self, slot: u32) -> Option<Arc<SlotEntry>> {
        self.inner
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&slot)
            .cloned()
    }

    fn entry(&self, slot: u32) -> Arc<SlotEntry> {
        if let Some(entry) = self.existing(slot) {
            return entry;
        }

        let mut slots = self.inner.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(slot)
            .or_insert_with(|| {
                let mut state = ControllerState::new(slot);
                if let Some(profile) = self
                    .inner
                    .profiles
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&slot)
                {
                    profile.apply(&mut state);
                }
                debug!("Allocated slot {}", slot);
                Arc::new(SlotEntry {
                    state: Mutex::new(state),
                    dirty: AtomicBool::new(false),
                })
            })
            .clone()
    }

    /// Allocate `slot` with default state if absent and return its state
    ///
    /// This is the only allocation path; every other accessor that may create
    /// a slot goes through it.
    pub fn get_or_create(&self, slot: u32) -> ControllerState {
        self.entry(slot).lock().clone()
    }

    /// Snapshot of `slot`, allocating it if absent
    pub fn read(&self, slot: u32) -> ControllerState {
        self.get_or_create(slot)
    }

    /// Snapshot of `slot` without allocating
    pub fn peek(&self, slot: u32) -> Option<ControllerState> {
        self.existing(slot).map(|entry| entry.lock().clone())
    }

    pub fn contains(&self, slot: u32) -> bool {
        self.existing(slot).is_some()
    }

    /// Allocated slot indices in ascending order
    pub fn slots(&self) -> Vec<u32> {
        let mut slots: Vec<u32> = self
            .inner
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        slots.sort_unstable();
        slots
    }

    pub fn len(&self) -> usize {
        self.inner.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `f` to the slot under its record lock
    ///
    /// Allocates the slot if absent. Marks the slot dirty and, if `f` left the
    /// connection type at [`ConnectionType::Disconnect`], requests retirement.
    pub fn mutate<F, R>(&self, slot: u32, f: F) -> R
    where
        F: FnOnce(&mut ControllerState) -> R,
    {
        let entry = self.entry(slot);
        self.apply(slot, &entry, f)
    }

    /// Like [`SlotStore::mutate`], but leaves an absent slot absent
    pub fn mutate_existing<F, R>(&self, slot: u32, f: F) -> Option<R>
    where
        F: FnOnce(&mut ControllerState) -> R,
    {
        let entry = self.existing(slot)?;
        Some(self.apply(slot, &entry, f))
    }

    fn apply<F, R>(&self, slot: u32, entry: &SlotEntry, f: F) -> R
    where
        F: FnOnce(&mut ControllerState) -> R,
    {
        let (result, disconnect) = {
            let mut state = entry.lock();
            let result = f(&mut state);
            (result, state.connection_type == ConnectionType::Disconnect)
        };

        self.mark_dirty(slot, entry);
        if disconnect {
            let _ = self.inner.events.send(SlotEvent::DisconnectRequested(slot));
        }
        result
    }

    /// Set the connection status of `slot`, allocating it if absent
    pub fn set_status(&self, slot: u32, status: SlotStatus) {
        self.mutate(slot, |state| state.status = status);
    }

    /// Delete `slot`; a later access yields a fresh default record
    pub fn remove(&self, slot: u32) -> Option<ControllerState> {
        let removed = self
            .inner
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&slot);

        removed.map(|entry| {
            debug!("Removed slot {}", slot);
            entry.lock().clone()
        })
    }

    /// Advance the packet counter of an existing slot and return the state to send
    ///
    /// The counter wraps at `u32::MAX`. Does not mark the slot dirty.
    pub fn next_pad_snapshot(&self, slot: u32) -> Option<ControllerState> {
        let entry = self.existing(slot)?;
        let mut state = entry.lock();
        state.packet_counter = state.packet_counter.wrapping_add(1);
        Some(state.clone())
    }

    /// Clear the dirty flag so the next write notifies again
    pub fn clear_dirty(&self, slot: u32) {
        if let Some(entry) = self.existing(slot) {
            entry.dirty.store(false, Ordering::Release);
        }
    }

    /// Zero rumble motors not refreshed within `timeout`
    pub fn decay_rumble(&self, now: Instant, timeout: Duration) {
        for slot in self.slots() {
            if let Some(entry) = self.existing(slot) {
                let changed = entry.lock().decay_rumble(now, timeout);
                if changed {
                    debug!("Rumble on slot {} timed out", slot);
                }
            }
        }
    }

    fn mark_dirty(&self, slot: u32, entry: &SlotEntry) {
        if !entry.dirty.swap(true, Ordering::AcqRel) {
            // Receiver gone means the server has shut down
            let _ = self.inner.events.send(SlotEvent::Changed(slot));
        }
    }
}
