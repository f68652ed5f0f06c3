//! # Controller Scripts
//!
//! A script drives one slot from its own tokio task. It receives a
//! [`ScriptContext`] bound to that slot and must return promptly once the
//! context is cancelled; the frame-paced helpers below all do so.

use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::controller::state::{Button, ConnectionType, ControllerState};
use crate::controller::store::SlotStore;
use crate::error::Result;

/// Frames per second scripts are paced at
pub const FRAME_RATE_HZ: u32 = 60;

/// Duration of one frame (1/60 s)
pub const FRAME: Duration = Duration::from_micros(1_000_000 / FRAME_RATE_HZ as u64);

/// A producer of controller input bound to a single slot
#[async_trait]
pub trait ControllerScript: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Drive the slot until finished or cancelled
    ///
    /// Returning `Ok` leaves the slot's last state in place. Returning `Err`
    /// marks the slot disconnected.
    async fn run(&self, ctx: ScriptContext) -> Result<()>;
}

/// Everything a running script may touch
#[derive(Debug, Clone)]
pub struct ScriptContext {
    slot: u32,
    store: SlotStore,
    cancel: CancellationToken,
}

impl ScriptContext {
    pub fn new(slot: u32, store: SlotStore, cancel: CancellationToken) -> Self {
        Self { slot, store, cancel }
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// The whole store, for scripts that drive more than their own slot
    pub fn store(&self) -> &SlotStore {
        &self.store
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the script has been asked to stop
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Apply `f` to this script's slot
    pub fn mutate<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut ControllerState) -> R,
    {
        self.store.mutate(self.slot, f)
    }

    pub fn snapshot(&self) -> ControllerState {
        self.store.read(self.slot)
    }

    pub fn set_button(&self, button: Button, pressed: bool) {
        self.mutate(|state| state.set_button(button, pressed));
    }

    /// Flip `button` and return its new state
    pub fn toggle(&self, button: Button) -> bool {
        self.mutate(|state| {
            let pressed = !state.is_pressed(button);
            state.set_button(button, pressed);
            pressed
        })
    }

    /// Ask for this slot to be retired
    pub fn disconnect(&self) {
        self.mutate(|state| state.connection_type = ConnectionType::Disconnect);
    }

    /// Sleep for `frames` frames
    ///
    /// Returns false if cancelled before the time elapsed.
    pub async fn wait_frames(&self, frames: u32) -> bool {
        self.wait(FRAME * frames).await
    }

    /// Sleep for `duration`, returning false if cancelled first
    pub async fn wait(&self, duration: Duration) -> bool {
        self.wait_until(Instant::now() + duration).await
    }

    /// Sleep until `deadline`, returning false if cancelled first
    pub async fn wait_until(&self, deadline: Instant) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep_until(deadline) => true,
        }
    }

    /// Hold `button` for `frames` frames, then release it
    ///
    /// The button is released even when cancelled part way through.
    pub async fn hold(&self, button: Button, frames: u32) -> bool {
        self.set_button(button, true);
        let completed = self.wait_frames(frames).await;
        self.set_button(button, false);
        completed
    }

    /// Press `buttons` now and release them after `frames` frames
    ///
    /// Returns without waiting; the release runs on its own task, early if the
    /// script is cancelled. With `frames == 0` the buttons end up released and
    /// nothing is scheduled.
    pub fn pulse(&self, buttons: &[Button], frames: u32) -> Option<JoinHandle<()>> {
        let pressed = frames > 0;
        self.mutate(|state| {
            for button in buttons {
                state.set_button(*button, pressed);
            }
        });
        if !pressed {
            return None;
        }

        let buttons = buttons.to_vec();
        Some(self.schedule(self.slot, frames, move |state| {
            for button in buttons {
                state.release(button);
            }
        }))
    }

    /// XOR `buttons` on this slot and XOR them back after `frames` frames
    ///
    /// See [`ScriptContext::pulse_xor_slot`].
    pub fn pulse_xor(&self, buttons: &[Button], frames: u32) -> Option<JoinHandle<()>> {
        self.pulse_xor_slot(self.slot, buttons, frames)
    }

    /// XOR `buttons` on `slot` under one record lock, reverting after `frames`
    ///
    /// Returns without waiting. The revert runs early if the script is
    /// cancelled and is skipped if the slot has been retired meanwhile. With
    /// `frames == 0` the toggle stays and nothing is scheduled.
    pub fn pulse_xor_slot(
        &self,
        slot: u32,
        buttons: &[Button],
        frames: u32,
    ) -> Option<JoinHandle<()>> {
        self.store.mutate(slot, |state| state.toggle_buttons(buttons));
        if frames == 0 {
            return None;
        }

        let buttons = buttons.to_vec();
        Some(self.schedule(slot, frames, move |state| state.toggle_buttons(&buttons)))
    }

    fn schedule<F>(&self, slot: u32, frames: u32, revert: F) -> JoinHandle<()>
    where
        F: FnOnce(&mut ControllerState) + Send + 'static,
    {
        let store = self.store.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(FRAME * frames) => {}
            }
            if store.mutate_existing(slot, revert).is_none() {
                trace!("Slot {} retired before its pulse reverted", slot);
            }
        })
    }
}
