//! # Capture Module
//!
//! JSON Lines records of controller input and motion, as written by capture
//! tools watching a DSU server, and a script that replays them into a slot.
//!
//! Input and motion are captured into separate files. Each line is one JSON
//! object with `time` (seconds since capture start) and `slot`:
//!
//! ```text
//! {"time":0.0,"slot":0,"connected":true,"buttons1":0,"buttons2":32,...}
//! {"time":0.01,"slot":0,"motion_ts":1700000000,"accel":[0.0,-1.0,0.0],"gyro":[0.0,0.0,0.0]}
//! ```

pub mod replay;

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::controller::state::{ControllerState, SlotStatus};
use crate::dsu::protocol::TouchPoint;
use crate::error::Result;

/// One touchpad contact as captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TouchRecord {
    pub active: bool,
    pub id: u8,
    pub pos: [u16; 2],
}

impl From<TouchPoint> for TouchRecord {
    fn from(touch: TouchPoint) -> Self {
        Self {
            active: touch.active,
            id: touch.id,
            pos: [touch.x, touch.y],
        }
    }
}

impl From<TouchRecord> for TouchPoint {
    fn from(record: TouchRecord) -> Self {
        Self {
            active: record.active,
            id: record.id,
            x: record.pos[0],
            y: record.pos[1],
        }
    }
}

/// Input snapshot of one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub time: f64,
    pub slot: u32,
    pub connected: bool,
    pub buttons1: u8,
    pub buttons2: u8,
    pub home: bool,
    pub touch_button: bool,
    pub ls: [u8; 2],
    pub rs: [u8; 2],
    /// Wire order: left, down, right, up
    pub dpad: [u8; 4],
    /// Wire order: triangle, circle, cross, square
    pub face: [u8; 4],
    pub analog_r1: u8,
    pub analog_l1: u8,
    pub analog_r2: u8,
    pub analog_l2: u8,
    #[serde(default)]
    pub touch1: TouchRecord,
    #[serde(default)]
    pub touch2: TouchRecord,
}

impl CaptureRecord {
    /// Record the input part of `state` at `time`
    pub fn from_state(time: f64, state: &ControllerState) -> Self {
        Self {
            time,
            slot: state.slot,
            connected: state.status.is_active(),
            buttons1: state.buttons1,
            buttons2: state.buttons2,
            home: state.home,
            touch_button: state.touch_button,
            ls: state.left_stick,
            rs: state.right_stick,
            dpad: state.dpad_analog,
            face: state.face_analog,
            analog_r1: state.analog_r1,
            analog_l1: state.analog_l1,
            analog_r2: state.analog_r2,
            analog_l2: state.analog_l2,
            touch1: state.touches[0].into(),
            touch2: state.touches[1].into(),
        }
    }

    /// Write this record's input fields into `state`
    pub fn apply(&self, state: &mut ControllerState) {
        state.status = if self.connected {
            SlotStatus::Connected
        } else {
            SlotStatus::Disconnected
        };
        state.buttons1 = self.buttons1;
        state.buttons2 = self.buttons2;
        state.home = self.home;
        state.touch_button = self.touch_button;
        state.left_stick = self.ls;
        state.right_stick = self.rs;
        state.dpad_analog = self.dpad;
        state.face_analog = self.face;
        state.analog_r1 = self.analog_r1;
        state.analog_l1 = self.analog_l1;
        state.analog_r2 = self.analog_r2;
        state.analog_l2 = self.analog_l2;
        state.touches = [self.touch1.into(), self.touch2.into()];
    }
}

/// Motion sample of one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionRecord {
    pub time: f64,
    pub slot: u32,
    #[serde(default)]
    pub motion_ts: Option<u64>,
    #[serde(default)]
    pub accel: Option<[f32; 3]>,
    #[serde(default)]
    pub gyro: Option<[f32; 3]>,
}

impl MotionRecord {
    pub fn from_state(time: f64, state: &ControllerState) -> Self {
        Self {
            time,
            slot: state.slot,
            motion_ts: Some(state.motion_timestamp),
            accel: Some(state.accelerometer),
            gyro: Some(state.gyroscope),
        }
    }

    /// Write the fields present in this sample into `state`
    pub fn apply(&self, state: &mut ControllerState) {
        if let Some(timestamp) = self.motion_ts {
            state.motion_timestamp = timestamp;
        }
        if let Some(accel) = self.accel {
            state.accelerometer = accel;
        }
        if let Some(gyro) = self.gyro {
            state.gyroscope = gyro;
        }
    }
}

/// Parse JSON Lines text, skipping blank and malformed lines
pub fn parse_lines<T: DeserializeOwned>(text: &str) -> Vec<T> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping malformed capture line {}: {}", index + 1, e);
                None
            }
        })
        .collect()
}

/// Read a capture file of `T` records
///
/// # Errors
///
/// Returns error if the file cannot be read. Malformed lines are skipped.
pub async fn read_records<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<Vec<T>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(parse_lines(&text))
}

/// Serialise a record as one JSON line (without the trailing newline)
pub fn to_line<T: Serialize>(record: &T) -> Result<String> {
    Ok(serde_json::to_string(record)?)
}
