//! Replays capture files into a slot, honouring the recorded timing

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{read_records, CaptureRecord, MotionRecord};
use crate::error::Result;
use crate::lifecycle::script::{ControllerScript, ScriptContext};

/// Records further than this from the start of a replay are skipped
pub const MAX_REPLAY_OFFSET: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// One step of a replay, merged from the input and motion streams
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEvent {
    Input(CaptureRecord),
    Motion(MotionRecord),
}

impl ReplayEvent {
    pub fn time(&self) -> f64 {
        match self {
            ReplayEvent::Input(record) => record.time,
            ReplayEvent::Motion(record) => record.time,
        }
    }

    fn source_slot(&self) -> u32 {
        match self {
            ReplayEvent::Input(record) => record.slot,
            ReplayEvent::Motion(record) => record.slot,
        }
    }

    /// Offset from the start of the replay
    ///
    /// Negative and NaN times play immediately; times too large for a
    /// `Duration` saturate.
    pub fn offset(&self) -> Duration {
        let time = self.time();
        if time.is_nan() || time <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(time).unwrap_or(Duration::MAX)
    }
}

/// Merge input and motion records into one timeline
///
/// Captures may hold several slots; only the slot of the earliest record is
/// kept. Records with equal times keep input before motion.
pub fn merge_timeline(inputs: Vec<CaptureRecord>, motions: Vec<MotionRecord>) -> Vec<ReplayEvent> {
    let mut events: Vec<ReplayEvent> = inputs
        .into_iter()
        .map(ReplayEvent::Input)
        .chain(motions.into_iter().map(ReplayEvent::Motion))
        .collect();
    events.sort_by(|a, b| a.time().total_cmp(&b.time()));

    if let Some(slot) = events.first().map(ReplayEvent::source_slot) {
        events.retain(|event| event.source_slot() == slot);
    }
    events
}

#[derive(Debug, Clone)]
enum ReplaySource {
    Files { input: PathBuf, motion: Option<PathBuf> },
    Timeline(Vec<ReplayEvent>),
}

/// Script that plays back captured input and motion once
#[derive(Debug, Clone)]
pub struct ReplayScript {
    source: ReplaySource,
}

impl ReplayScript {
    /// Replay the input capture at `input`, merged with an optional motion capture
    pub fn new(input: PathBuf, motion: Option<PathBuf>) -> Self {
        Self {
            source: ReplaySource::Files { input, motion },
        }
    }

    /// Replay an already merged timeline
    pub fn from_timeline(events: Vec<ReplayEvent>) -> Self {
        Self {
            source: ReplaySource::Timeline(events),
        }
    }

    async fn load(&self) -> Result<Vec<ReplayEvent>> {
        match &self.source {
            ReplaySource::Files { input, motion } => {
                let inputs: Vec<CaptureRecord> = read_records(input).await?;
                let motions: Vec<MotionRecord> = match motion {
                    Some(path) => read_records(path).await?,
                    None => Vec::new(),
                };
                info!(
                    "Loaded {} input and {} motion records from {}",
                    inputs.len(),
                    motions.len(),
                    input.display()
                );
                Ok(merge_timeline(inputs, motions))
            }
            ReplaySource::Timeline(events) => Ok(events.clone()),
        }
    }
}

#[async_trait]
impl ControllerScript for ReplayScript {
    fn name(&self) -> &str {
        "replay"
    }

    async fn run(&self, ctx: ScriptContext) -> Result<()> {
        let events = self.load().await?;
        info!("Replaying {} records into slot {}", events.len(), ctx.slot());

        let start = Instant::now();
        for (index, event) in events.iter().enumerate() {
            let offset = event.offset();
            let deadline = match start.checked_add(offset) {
                Some(deadline) if offset <= MAX_REPLAY_OFFSET => deadline,
                _ => {
                    // Timeline is sorted, so everything after is out of range too
                    warn!(
                        "Skipping {} replay records past {:?} on slot {}",
                        events.len() - index,
                        MAX_REPLAY_OFFSET,
                        ctx.slot()
                    );
                    break;
                }
            };

            if !ctx.wait_until(deadline).await {
                debug!("Replay on slot {} cancelled", ctx.slot());
                return Ok(());
            }

            match event {
                ReplayEvent::Input(record) => ctx.mutate(|state| record.apply(state)),
                ReplayEvent::Motion(record) => ctx.mutate(|state| record.apply(state)),
            }
        }

        info!("Replay on slot {} finished", ctx.slot());
        Ok(())
    }
}
