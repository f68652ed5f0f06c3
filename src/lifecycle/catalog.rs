//! # Script Catalog
//!
//! Resolves the script names used in slot assignments:
//!
//! - any name registered with [`ScriptCatalog::register`]
//! - `<button>_loop`, e.g. `circle_loop`: press the button for 3 frames every 60
//! - `replay:<input.jsonl>[,<motion.jsonl>]`: replay a capture into the slot

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::script::{ControllerScript, ScriptContext};
use crate::capture::replay::ReplayScript;
use crate::controller::state::Button;
use crate::error::{DsuError, Result};

/// Frames a pulse loop holds its button
pub const PULSE_HOLD_FRAMES: u32 = 3;

/// Frames between the starts of two pulses
pub const PULSE_PERIOD_FRAMES: u32 = 60;

/// Prefix selecting the capture replay script
pub const REPLAY_PREFIX: &str = "replay:";

/// Presses one button periodically until cancelled
#[derive(Debug, Clone)]
pub struct PulseLoop {
    name: String,
    button: Button,
    hold_frames: u32,
    period_frames: u32,
}

impl PulseLoop {
    pub fn new(button: Button) -> Self {
        Self::with_timing(button, PULSE_HOLD_FRAMES, PULSE_PERIOD_FRAMES)
    }

    pub fn with_timing(button: Button, hold_frames: u32, period_frames: u32) -> Self {
        Self {
            name: format!("{}_loop", button.name()),
            button,
            hold_frames,
            period_frames: period_frames.max(hold_frames),
        }
    }
}

#[async_trait]
impl ControllerScript for PulseLoop {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: ScriptContext) -> Result<()> {
        loop {
            if !ctx.hold(self.button, self.hold_frames).await {
                break;
            }
            if !ctx.wait_frames(self.period_frames - self.hold_frames).await {
                break;
            }
        }
        Ok(())
    }
}

/// Named scripts available to slot assignments
pub struct ScriptCatalog {
    scripts: HashMap<String, Arc<dyn ControllerScript>>,
}

impl std::fmt::Debug for ScriptCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptCatalog")
            .field("scripts", &self.names())
            .finish()
    }
}

impl Default for ScriptCatalog {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ScriptCatalog {
    /// Catalog with no registered scripts
    ///
    /// `<button>_loop` and `replay:` names still resolve.
    pub fn empty() -> Self {
        Self {
            scripts: HashMap::new(),
        }
    }

    /// Catalog with the face button loops registered
    pub fn with_builtins() -> Self {
        let mut catalog = Self::empty();
        for button in [Button::Circle, Button::Cross, Button::Square, Button::Triangle] {
            catalog.register(Arc::new(PulseLoop::new(button)));
        }
        catalog
    }

    /// Register `script` under its own name, replacing any previous entry
    pub fn register(&mut self, script: Arc<dyn ControllerScript>) {
        self.scripts.insert(script.name().to_ascii_lowercase(), script);
    }

    /// Registered script names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scripts.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up the script for `name`
    ///
    /// # Errors
    ///
    /// Returns `UnknownScript` if nothing matches, or `InvalidAssignment` for
    /// a replay name without a path.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ControllerScript>> {
        let trimmed = name.trim();
        let lowered = trimmed.to_ascii_lowercase();

        if let Some(script) = self.scripts.get(&lowered) {
            return Ok(Arc::clone(script));
        }

        if lowered.starts_with(REPLAY_PREFIX) {
            return Self::replay(&trimmed[REPLAY_PREFIX.len()..]);
        }

        if let Some(button) = lowered.strip_suffix("_loop") {
            if let Ok(button) = button.parse::<Button>() {
                return Ok(Arc::new(PulseLoop::new(button)));
            }
        }

        Err(DsuError::UnknownScript(trimmed.to_string()))
    }

    fn replay(args: &str) -> Result<Arc<dyn ControllerScript>> {
        let mut paths = args.split(',').map(str::trim).filter(|part| !part.is_empty());

        let input = paths
            .next()
            .ok_or_else(|| DsuError::InvalidAssignment("replay needs a capture path".to_string()))?;
        let motion = paths.next().map(PathBuf::from);

        Ok(Arc::new(ReplayScript::new(PathBuf::from(input), motion)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::store::SlotStore;
    use crate::lifecycle::script::FRAME;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_builtin_names() {
        let catalog = ScriptCatalog::with_builtins();
        assert_eq!(
            catalog.names(),
            vec!["circle_loop", "cross_loop", "square_loop", "triangle_loop"]
        );
    }

    #[test]
    fn test_resolve_case_insensitive() {
        let catalog = ScriptCatalog::with_builtins();
        assert_eq!(catalog.resolve("Circle_Loop").unwrap().name(), "circle_loop");
    }

    #[test]
    fn test_resolve_any_button_loop() {
        let catalog = ScriptCatalog::empty();
        assert_eq!(catalog.resolve("l1_loop").unwrap().name(), "l1_loop");
        assert_eq!(catalog.resolve("up_loop").unwrap().name(), "dpad_up_loop");
    }

    #[test]
    fn test_resolve_unknown() {
        let catalog = ScriptCatalog::with_builtins();
        assert!(matches!(
            catalog.resolve("moonwalk"),
            Err(DsuError::UnknownScript(name)) if name == "moonwalk"
        ));
        assert!(matches!(catalog.resolve("start_loop"), Err(DsuError::UnknownScript(_))));
    }

    #[test]
    fn test_resolve_replay() {
        let catalog = ScriptCatalog::with_builtins();
        assert_eq!(catalog.resolve("replay:/tmp/in.jsonl").unwrap().name(), "replay");
        assert_eq!(
            catalog.resolve("REPLAY:in.jsonl, motion.jsonl").unwrap().name(),
            "replay"
        );
        assert!(matches!(catalog.resolve("replay:"), Err(DsuError::InvalidAssignment(_))));
    }

    #[test]
    fn test_register_custom_script() {
        let mut catalog = ScriptCatalog::empty();
        catalog.register(Arc::new(PulseLoop::with_timing(Button::Home, 1, 2)));
        assert_eq!(catalog.resolve("home_loop").unwrap().name(), "home_loop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_loop_timing() {
        let (store, _events) = SlotStore::new();
        let cancel = CancellationToken::new();
        let ctx = ScriptContext::new(0, store.clone(), cancel.clone());

        let task = tokio::spawn(async move { PulseLoop::new(Button::Circle).run(ctx).await });

        tokio::time::sleep(FRAME).await;
        assert!(store.read(0).is_pressed(Button::Circle));

        tokio::time::sleep(FRAME * 10).await;
        assert!(!store.read(0).is_pressed(Button::Circle));

        tokio::time::sleep(FRAME * 50).await;
        assert!(store.read(0).is_pressed(Button::Circle));

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(!store.read(0).is_pressed(Button::Circle));
    }
}
