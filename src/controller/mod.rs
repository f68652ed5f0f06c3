//! # Controller Module
//!
//! Virtual controller slots.
//!
//! This module handles:
//! - The per-slot controller record and its wire representation
//! - Button, stick, motion and rumble state
//! - The shared slot store and its change notifications

pub mod state;
pub mod store;

pub use state::{Button, ConnectionType, ControllerState, SlotStatus};
pub use store::{SlotEvent, SlotProfile, SlotStore};
