//! # Slot Lifecycle Module
//!
//! Binds slots to what drives them.
//!
//! This module handles:
//! - Parsing slot assignments (`none`, `idle` or a script name)
//! - Starting each script as its own cancellable tokio task
//! - Stopping the old task before a replacement starts
//! - Isolating script errors and panics to their slot
//! - Retiring slots whose script asked to be disconnected

pub mod catalog;
pub mod script;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::state::{ControllerState, SlotStatus};
use crate::controller::store::SlotStore;
use crate::error::{DsuError, Result};
use catalog::ScriptCatalog;
use script::{ControllerScript, ScriptContext};

/// How long a cancelled script may take to stop before it is aborted
pub const STOP_GRACE: Duration = Duration::from_secs(1);

/// What drives a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotAssignment {
    /// Allocated and reported disconnected
    None,
    /// Allocated and reported connected, with nothing driving it
    Idle,
    /// Driven by the named script
    Script(String),
}

impl FromStr for SlotAssignment {
    type Err = DsuError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DsuError::InvalidAssignment("empty slot assignment".to_string()));
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "none" => Ok(SlotAssignment::None),
            "idle" => Ok(SlotAssignment::Idle),
            _ => Ok(SlotAssignment::Script(trimmed.to_string())),
        }
    }
}

impl fmt::Display for SlotAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotAssignment::None => f.write_str("none"),
            SlotAssignment::Idle => f.write_str("idle"),
            SlotAssignment::Script(name) => f.write_str(name),
        }
    }
}

struct RunningScript {
    generation: u64,
    name: String,
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
    script_task: AbortHandle,
}

impl RunningScript {
    async fn stop(self, slot: u32) {
        self.cancel.cancel();

        let mut supervisor = self.supervisor;
        if tokio::time::timeout(STOP_GRACE, &mut supervisor).await.is_err() {
            warn!(
                "Script '{}' on slot {} ignored cancellation, aborting",
                self.name, slot
            );
            self.script_task.abort();
            let _ = supervisor.await;
        }
        debug!("Stopped script '{}' on slot {}", self.name, slot);
    }
}

#[derive(Default)]
struct LifecycleTable {
    next_generation: u64,
    running: HashMap<u32, RunningScript>,
}

/// Starts, replaces and stops the scripts bound to slots
///
/// Cheap to clone; clones share the same table of running scripts.
#[derive(Clone)]
pub struct SlotLifecycle {
    store: SlotStore,
    catalog: Arc<ScriptCatalog>,
    table: Arc<Mutex<LifecycleTable>>,
    /// Serialises reconfiguration so a replacement never overlaps its predecessor
    configure_lock: Arc<tokio::sync::Mutex<()>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for SlotLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotLifecycle")
            .field("running", &self.running_slots())
            .finish_non_exhaustive()
    }
}

impl SlotLifecycle {
    pub fn new(store: SlotStore, catalog: ScriptCatalog) -> Self {
        Self {
            store,
            catalog: Arc::new(catalog),
            table: Arc::new(Mutex::new(LifecycleTable::default())),
            configure_lock: Arc::new(tokio::sync::Mutex::new(())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &SlotStore {
        &self.store
    }

    fn table(&self) -> std::sync::MutexGuard<'_, LifecycleTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `assignment` to `slot`
    ///
    /// Any script already running on the slot is cancelled and awaited before
    /// the new assignment takes effect.
    ///
    /// # Errors
    ///
    /// Returns `UnknownScript` or `InvalidAssignment` if the script name does
    /// not resolve; the slot is left untouched in that case.
    pub async fn configure_slot(&self, slot: u32, assignment: &SlotAssignment) -> Result<()> {
        let script = match assignment {
            SlotAssignment::Script(name) => Some(self.catalog.resolve(name)?),
            SlotAssignment::None | SlotAssignment::Idle => None,
        };

        let _guard = self.configure_lock.lock().await;

        let previous = self.table().running.remove(&slot);
        if let Some(previous) = previous {
            previous.stop(slot).await;
        }

        match script {
            None => {
                let status = match assignment {
                    SlotAssignment::Idle => SlotStatus::Idle,
                    _ => SlotStatus::Disconnected,
                };
                self.store.set_status(slot, status);
                info!("Slot {} assigned '{}'", slot, assignment);
            }
            Some(script) => {
                self.store.set_status(slot, SlotStatus::Connected);
                self.spawn(slot, script);
            }
        }

        Ok(())
    }

    fn spawn(&self, slot: u32, script: Arc<dyn ControllerScript>) {
        let name = script.name().to_string();
        let cancel = self.shutdown.child_token();
        let ctx = ScriptContext::new(slot, self.store.clone(), cancel.clone());

        // Held until the entry is inserted, so the supervisor cannot observe a missing entry
        let mut table = self.table();
        table.next_generation += 1;
        let generation = table.next_generation;

        let script_task = tokio::spawn(async move { script.run(ctx).await });
        let abort = script_task.abort_handle();

        let store = self.store.clone();
        let shared_table = Arc::clone(&self.table);
        let task_name = name.clone();
        let supervisor = tokio::spawn(async move {
            match script_task.await {
                Ok(Ok(())) => info!("Script '{}' on slot {} finished", task_name, slot),
                Ok(Err(e)) => {
                    warn!("Script '{}' on slot {} failed: {}", task_name, slot, e);
                    store.set_status(slot, SlotStatus::Disconnected);
                }
                Err(e) if e.is_panic() => {
                    warn!("Script '{}' on slot {} panicked", task_name, slot);
                    store.set_status(slot, SlotStatus::Disconnected);
                }
                Err(_) => debug!("Script '{}' on slot {} aborted", task_name, slot),
            }

            let mut table = shared_table.lock().unwrap_or_else(PoisonError::into_inner);
            if table
                .running
                .get(&slot)
                .is_some_and(|running| running.generation == generation)
            {
                table.running.remove(&slot);
            }
        });

        info!("Started script '{}' on slot {}", name, slot);
        table.running.insert(
            slot,
            RunningScript {
                generation,
                name,
                cancel,
                supervisor,
                script_task: abort,
            },
        );
    }

    /// Stop the script on `slot`, leaving its last state in place
    ///
    /// Returns false if no script was running there.
    pub async fn stop(&self, slot: u32) -> bool {
        let _guard = self.configure_lock.lock().await;

        let running = self.table().running.remove(&slot);
        match running {
            Some(running) => {
                running.stop(slot).await;
                true
            }
            None => false,
        }
    }

    /// Slots that currently have a live script, ascending
    pub fn running_slots(&self) -> Vec<u32> {
        let mut slots: Vec<u32> = self
            .table()
            .running
            .iter()
            .filter(|(_, running)| !running.supervisor.is_finished())
            .map(|(slot, _)| *slot)
            .collect();
        slots.sort_unstable();
        slots
    }

    /// Name of the script running on `slot`, if any
    pub fn script_name(&self, slot: u32) -> Option<String> {
        self.table().running.get(&slot).map(|running| running.name.clone())
    }

    /// Delete the record of a slot whose script requested disconnection
    ///
    /// The script itself is not stopped; if it keeps writing, the slot is
    /// reallocated with default state.
    pub fn retire(&self, slot: u32) -> Option<ControllerState> {
        let removed = self.store.remove(slot);
        if removed.is_some() {
            info!("Retired slot {}", slot);
        }
        removed
    }

    /// Cancel every script and wait for all of them to stop
    pub async fn stop_all(&self) {
        let _guard = self.configure_lock.lock().await;
        self.shutdown.cancel();

        let running: Vec<(u32, RunningScript)> = self.table().running.drain().collect();
        for (slot, script) in running {
            script.stop(slot).await;
        }
        info!("All scripts stopped");
    }
}
