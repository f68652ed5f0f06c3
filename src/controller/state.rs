//! # Controller State
//!
//! The in-memory record of one virtual controller slot and its conversion to
//! the DSU wire structures.
//!
//! ## Button Groups
//!
//! | Group     | 0x80   | 0x40  | 0x20   | 0x10     | 0x08    | 0x04 | 0x02 | 0x01  |
//! |-----------|--------|-------|--------|----------|---------|------|------|-------|
//! | buttons1  | Left   | Down  | Right  | Up       | Options | R3   | L3   | Share |
//! | buttons2  | Square | Cross | Circle | Triangle | R1      | L1   | R2   | L2    |
//!
//! Home and touchpad click are tracked as separate flags.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use crate::dsu::protocol::{
    BatteryStatus, DeviceModel, MacAddress, PadData, SlotHeader, SlotState, TouchPoint,
    WireConnectionType,
};
use crate::error::DsuError;

/// Stick centre position
pub const STICK_CENTER: u8 = 128;

/// Default number of rumble motors reported per slot
pub const DEFAULT_MOTOR_COUNT: u8 = 2;

/// MACs for the first four slots, as commonly expected by DSU consumers
const LOW_SLOT_MACS: [MacAddress; 4] = [
    [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01],
    [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x02],
    [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x03],
    [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x04],
];

/// Deterministic MAC for a slot that has no configured override
///
/// Slots 0-3 use `AA:BB:CC:DD:EE:01..04`, every other slot encodes `slot + 1`
/// as a 48-bit big-endian integer.
pub fn default_mac(slot: u32) -> MacAddress {
    if let Some(mac) = LOW_SLOT_MACS.get(slot as usize) {
        return *mac;
    }

    let value = (slot as u64 + 1).to_be_bytes();
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&value[2..]);
    mac
}

/// Parse `AA:BB:CC:DD:EE:FF` (or `-` separated) into a MAC address
pub fn parse_mac(text: &str) -> Option<MacAddress> {
    let mut mac = [0u8; 6];
    let mut parts = text.trim().split([':', '-']);

    for byte in mac.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }

    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

/// Format a MAC address as `AA:BB:CC:DD:EE:FF`
pub fn format_mac(mac: &MacAddress) -> String {
    mac.iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<_>>()
        .join(":")
}

/// Slot connection status
///
/// `Idle` is a reserved slot with nothing driving it. DSU consumers only treat
/// state 2 as usable, so idle slots are reported as connected on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotStatus {
    #[default]
    Disconnected,
    Idle,
    Connected,
}

impl SlotStatus {
    pub fn is_active(self) -> bool {
        self != SlotStatus::Disconnected
    }

    pub fn wire_state(self) -> SlotState {
        match self {
            SlotStatus::Disconnected => SlotState::Disconnected,
            SlotStatus::Idle | SlotStatus::Connected => SlotState::Connected,
        }
    }
}

/// Physical connection type of a slot
///
/// `Disconnect` never reaches the wire: a script writes it to ask for its own
/// slot to be retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    #[default]
    None,
    Usb,
    Bluetooth,
    Disconnect,
}

impl ConnectionType {
    pub fn wire_type(self) -> WireConnectionType {
        match self {
            ConnectionType::Usb => WireConnectionType::Usb,
            ConnectionType::Bluetooth => WireConnectionType::Bluetooth,
            ConnectionType::None | ConnectionType::Disconnect => WireConnectionType::NotApplicable,
        }
    }
}

impl FromStr for ConnectionType {
    type Err = DsuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(ConnectionType::None),
            "usb" => Ok(ConnectionType::Usb),
            "bluetooth" | "bt" => Ok(ConnectionType::Bluetooth),
            "disconnect" => Ok(ConnectionType::Disconnect),
            other => Err(DsuError::InvalidAssignment(format!("unknown connection type '{}'", other))),
        }
    }
}

/// Parse a battery status name as used in configuration files
pub fn parse_battery(text: &str) -> Option<BatteryStatus> {
    let status = match text.trim().to_ascii_lowercase().as_str() {
        "none" | "na" | "not_applicable" => BatteryStatus::NotApplicable,
        "dying" => BatteryStatus::Dying,
        "low" => BatteryStatus::Low,
        "medium" => BatteryStatus::Medium,
        "high" => BatteryStatus::High,
        "full" => BatteryStatus::Full,
        "charging" => BatteryStatus::Charging,
        "charged" => BatteryStatus::Charged,
        _ => return None,
    };
    Some(status)
}

/// Digital buttons reported in pad data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Share,
    L3,
    R3,
    Options,
    DpadUp,
    DpadRight,
    DpadDown,
    DpadLeft,
    L2,
    R2,
    L1,
    R1,
    Triangle,
    Circle,
    Cross,
    Square,
    Home,
    Touch,
}

/// Where a button lives in the pad data report
enum ButtonSlot {
    Group1(u8),
    Group2(u8),
    Home,
    Touch,
}

impl Button {
    pub const ALL: [Button; 18] = [
        Button::Share,
        Button::L3,
        Button::R3,
        Button::Options,
        Button::DpadUp,
        Button::DpadRight,
        Button::DpadDown,
        Button::DpadLeft,
        Button::L2,
        Button::R2,
        Button::L1,
        Button::R1,
        Button::Triangle,
        Button::Circle,
        Button::Cross,
        Button::Square,
        Button::Home,
        Button::Touch,
    ];

    fn location(self) -> ButtonSlot {
        match self {
            Button::Share => ButtonSlot::Group1(0x01),
            Button::L3 => ButtonSlot::Group1(0x02),
            Button::R3 => ButtonSlot::Group1(0x04),
            Button::Options => ButtonSlot::Group1(0x08),
            Button::DpadUp => ButtonSlot::Group1(0x10),
            Button::DpadRight => ButtonSlot::Group1(0x20),
            Button::DpadDown => ButtonSlot::Group1(0x40),
            Button::DpadLeft => ButtonSlot::Group1(0x80),
            Button::L2 => ButtonSlot::Group2(0x01),
            Button::R2 => ButtonSlot::Group2(0x02),
            Button::L1 => ButtonSlot::Group2(0x04),
            Button::R1 => ButtonSlot::Group2(0x08),
            Button::Triangle => ButtonSlot::Group2(0x10),
            Button::Circle => ButtonSlot::Group2(0x20),
            Button::Cross => ButtonSlot::Group2(0x40),
            Button::Square => ButtonSlot::Group2(0x80),
            Button::Home => ButtonSlot::Home,
            Button::Touch => ButtonSlot::Touch,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Button::Share => "share",
            Button::L3 => "l3",
            Button::R3 => "r3",
            Button::Options => "options",
            Button::DpadUp => "dpad_up",
            Button::DpadRight => "dpad_right",
            Button::DpadDown => "dpad_down",
            Button::DpadLeft => "dpad_left",
            Button::L2 => "l2",
            Button::R2 => "r2",
            Button::L1 => "l1",
            Button::R1 => "r1",
            Button::Triangle => "triangle",
            Button::Circle => "circle",
            Button::Cross => "cross",
            Button::Square => "square",
            Button::Home => "home",
            Button::Touch => "touch",
        }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Button {
    type Err = DsuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let name = match lowered.as_str() {
            "up" => "dpad_up",
            "right" => "dpad_right",
            "down" => "dpad_down",
            "left" => "dpad_left",
            "ps" => "home",
            "touchpad" => "touch",
            other => other,
        };

        Button::ALL
            .iter()
            .copied()
            .find(|button| button.name() == name)
            .ok_or_else(|| DsuError::InvalidAssignment(format!("unknown button '{}'", s)))
    }
}

/// Current intensity of one rumble motor as last commanded by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Motor {
    pub intensity: u8,
    pub updated_at: Option<Instant>,
}

/// Full state of one controller slot
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub slot: u32,
    pub status: SlotStatus,
    pub connection_type: ConnectionType,
    pub model: DeviceModel,
    pub mac: MacAddress,
    pub battery: BatteryStatus,
    pub packet_counter: u32,

    pub buttons1: u8,
    pub buttons2: u8,
    pub home: bool,
    pub touch_button: bool,

    /// X, Y
    pub left_stick: [u8; 2],
    /// X, Y
    pub right_stick: [u8; 2],
    /// Left, Down, Right, Up
    pub dpad_analog: [u8; 4],
    /// Triangle, Circle, Cross, Square
    pub face_analog: [u8; 4],
    pub analog_r1: u8,
    pub analog_l1: u8,
    pub analog_r2: u8,
    pub analog_l2: u8,

    pub touches: [TouchPoint; 2],

    /// Microseconds
    pub motion_timestamp: u64,
    pub accelerometer: [f32; 3],
    /// Pitch, yaw, roll
    pub gyroscope: [f32; 3],

    pub motors: Vec<Motor>,
}

impl ControllerState {
    /// Default record for a freshly allocated slot
    pub fn new(slot: u32) -> Self {
        Self {
            slot,
            status: SlotStatus::Disconnected,
            connection_type: ConnectionType::None,
            model: DeviceModel::FullGyro,
            mac: default_mac(slot),
            battery: BatteryStatus::Full,
            packet_counter: 0,
            buttons1: 0,
            buttons2: 0,
            home: false,
            touch_button: false,
            left_stick: [STICK_CENTER; 2],
            right_stick: [STICK_CENTER; 2],
            dpad_analog: [0; 4],
            face_analog: [0; 4],
            analog_r1: 0,
            analog_l1: 0,
            analog_r2: 0,
            analog_l2: 0,
            touches: [TouchPoint::default(); 2],
            motion_timestamp: 0,
            accelerometer: [0.0; 3],
            gyroscope: [0.0; 3],
            motors: vec![Motor::default(); DEFAULT_MOTOR_COUNT as usize],
        }
    }

    /// Slot index as carried on the wire, if it fits
    pub fn wire_slot(&self) -> Option<u8> {
        u8::try_from(self.slot).ok()
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        match button.location() {
            ButtonSlot::Group1(mask) => self.buttons1 & mask != 0,
            ButtonSlot::Group2(mask) => self.buttons2 & mask != 0,
            ButtonSlot::Home => self.home,
            ButtonSlot::Touch => self.touch_button,
        }
    }

    /// Set a button and its matching analog pressure
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        match button.location() {
            ButtonSlot::Group1(mask) if pressed => self.buttons1 |= mask,
            ButtonSlot::Group1(mask) => self.buttons1 &= !mask,
            ButtonSlot::Group2(mask) if pressed => self.buttons2 |= mask,
            ButtonSlot::Group2(mask) => self.buttons2 &= !mask,
            ButtonSlot::Home => self.home = pressed,
            ButtonSlot::Touch => self.touch_button = pressed,
        }

        let pressure = if pressed { u8::MAX } else { 0 };
        if let Some(analog) = self.analog_mut(button) {
            *analog = pressure;
        }
    }

    pub fn press(&mut self, button: Button) {
        self.set_button(button, true);
    }

    pub fn release(&mut self, button: Button) {
        self.set_button(button, false);
    }

    /// XOR each distinct button in `buttons`
    ///
    /// Applying the same set twice restores the original state.
    pub fn toggle_buttons(&mut self, buttons: &[Button]) {
        for (index, button) in buttons.iter().enumerate() {
            if !buttons[..index].contains(button) {
                let pressed = self.is_pressed(*button);
                self.set_button(*button, !pressed);
            }
        }
    }

    fn analog_mut(&mut self, button: Button) -> Option<&mut u8> {
        match button {
            Button::DpadLeft => Some(&mut self.dpad_analog[0]),
            Button::DpadDown => Some(&mut self.dpad_analog[1]),
            Button::DpadRight => Some(&mut self.dpad_analog[2]),
            Button::DpadUp => Some(&mut self.dpad_analog[3]),
            Button::Triangle => Some(&mut self.face_analog[0]),
            Button::Circle => Some(&mut self.face_analog[1]),
            Button::Cross => Some(&mut self.face_analog[2]),
            Button::Square => Some(&mut self.face_analog[3]),
            Button::R1 => Some(&mut self.analog_r1),
            Button::L1 => Some(&mut self.analog_l1),
            Button::R2 => Some(&mut self.analog_r2),
            Button::L2 => Some(&mut self.analog_l2),
            _ => None,
        }
    }

    pub fn motor_count(&self) -> u8 {
        self.motors.len().min(u8::MAX as usize) as u8
    }

    pub fn set_motor_count(&mut self, count: u8) {
        self.motors.resize(count as usize, Motor::default());
    }

    /// Record a rumble command; unknown motor ids are ignored
    pub fn set_rumble(&mut self, motor_id: u8, intensity: u8, now: Instant) -> bool {
        match self.motors.get_mut(motor_id as usize) {
            Some(motor) => {
                motor.intensity = intensity;
                motor.updated_at = Some(now);
                true
            }
            None => false,
        }
    }

    /// Zero every motor whose last command is older than `timeout`
    ///
    /// Returns true if any motor was reset.
    pub fn decay_rumble(&mut self, now: Instant, timeout: std::time::Duration) -> bool {
        let mut changed = false;
        for motor in self.motors.iter_mut() {
            let expired = motor
                .updated_at
                .map_or(false, |at| now.saturating_duration_since(at) > timeout);
            if expired && motor.intensity != 0 {
                motor.intensity = 0;
                motor.updated_at = None;
                changed = true;
            }
        }
        changed
    }

    /// The 11-byte header reporting this slot, or `None` for slots past 255
    pub fn slot_header(&self) -> Option<SlotHeader> {
        let slot = self.wire_slot()?;

        if !self.status.is_active() {
            return Some(SlotHeader::disconnected(slot));
        }

        Some(SlotHeader {
            slot,
            state: self.status.wire_state(),
            model: self.model,
            connection_type: self.connection_type.wire_type(),
            mac: self.mac,
            battery: self.battery,
        })
    }

    /// Pad data report for this slot, or `None` for slots past 255
    pub fn pad_data(&self) -> Option<PadData> {
        let header = self.slot_header()?;

        Some(PadData {
            header,
            connected: self.status.is_active(),
            packet_counter: self.packet_counter,
            buttons1: self.buttons1,
            buttons2: self.buttons2,
            home: self.home,
            touch_button: self.touch_button,
            left_stick: self.left_stick,
            right_stick: self.right_stick,
            dpad_analog: self.dpad_analog,
            face_analog: self.face_analog,
            analog_r1: self.analog_r1,
            analog_l1: self.analog_l1,
            analog_r2: self.analog_r2,
            analog_l2: self.analog_l2,
            touches: self.touches,
            motion_timestamp: self.motion_timestamp,
            accelerometer: self.accelerometer,
            gyroscope: self.gyroscope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_toggle_buttons_xor() {
        let mut state = ControllerState::new(0);
        state.press(Button::Cross);

        state.toggle_buttons(&[Button::Cross, Button::Square, Button::Home, Button::Square]);
        assert!(!state.is_pressed(Button::Cross));
        assert!(state.is_pressed(Button::Square));
        assert!(state.is_pressed(Button::Home));
        assert_eq!(state.face_analog[3], u8::MAX);

        state.toggle_buttons(&[Button::Cross, Button::Square, Button::Home]);
        assert!(state.is_pressed(Button::Cross));
        assert!(!state.is_pressed(Button::Square));
        assert!(!state.is_pressed(Button::Home));
    }

    #[test]
    fn test_default_mac_low_slots() {
        assert_eq!(default_mac(0), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01]);
        assert_eq!(default_mac(1), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x02]);
        assert_eq!(default_mac(3), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x04]);
    }

    #[test]
    fn test_default_mac_high_slots() {
        assert_eq!(default_mac(4), [0, 0, 0, 0, 0, 5]);
        assert_eq!(default_mac(255), [0, 0, 0, 0, 1, 0]);
        assert_eq!(default_mac(0x0102_0304), [0, 0, 0x01, 0x02, 0x03, 0x05]);
    }

    #[test]
    fn test_parse_and_format_mac() {
        let mac = parse_mac("aa:bb:cc:dd:ee:0f").unwrap();
        assert_eq!(mac, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x0F]);
        assert_eq!(format_mac(&mac), "AA:BB:CC:DD:EE:0F");
        assert_eq!(parse_mac("01-02-03-04-05-06"), Some([1, 2, 3, 4, 5, 6]));

        assert!(parse_mac("aa:bb:cc:dd:ee").is_none());
        assert!(parse_mac("aa:bb:cc:dd:ee:ff:00").is_none());
        assert!(parse_mac("zz:bb:cc:dd:ee:ff").is_none());
        assert!(parse_mac("a:bb:cc:dd:ee:ff").is_none());
    }

    #[test]
    fn test_new_state_defaults() {
        let state = ControllerState::new(1);

        assert_eq!(state.status, SlotStatus::Disconnected);
        assert_eq!(state.connection_type, ConnectionType::None);
        assert_eq!(state.model, DeviceModel::FullGyro);
        assert_eq!(state.battery, BatteryStatus::Full);
        assert_eq!(state.left_stick, [128, 128]);
        assert_eq!(state.motor_count(), 2);
        assert_eq!(state.mac, default_mac(1));
    }

    #[test]
    fn test_button_bits() {
        let mut state = ControllerState::new(0);

        state.press(Button::Circle);
        assert_eq!(state.buttons2, 0x20);
        assert_eq!(state.face_analog[1], 255);

        state.press(Button::DpadLeft);
        state.press(Button::Share);
        assert_eq!(state.buttons1, 0x81);
        assert_eq!(state.dpad_analog[0], 255);

        state.release(Button::Circle);
        assert_eq!(state.buttons2, 0);
        assert_eq!(state.face_analog[1], 0);
        assert!(state.is_pressed(Button::DpadLeft));
        assert!(!state.is_pressed(Button::Circle));
    }

    #[test]
    fn test_home_and_touch_flags() {
        let mut state = ControllerState::new(0);
        state.press(Button::Home);
        state.press(Button::Touch);

        assert!(state.home && state.touch_button);
        assert_eq!(state.buttons1, 0);
        assert_eq!(state.buttons2, 0);
    }

    #[test]
    fn test_button_from_str() {
        assert_eq!("Circle".parse::<Button>().unwrap(), Button::Circle);
        assert_eq!("DPAD_UP".parse::<Button>().unwrap(), Button::DpadUp);
        assert_eq!("up".parse::<Button>().unwrap(), Button::DpadUp);
        assert_eq!("ps".parse::<Button>().unwrap(), Button::Home);
        assert!("start".parse::<Button>().is_err());

        for button in Button::ALL {
            assert_eq!(button.name().parse::<Button>().unwrap(), button);
        }
    }

    #[test]
    fn test_connection_type_from_str() {
        assert_eq!("USB".parse::<ConnectionType>().unwrap(), ConnectionType::Usb);
        assert_eq!("bluetooth".parse::<ConnectionType>().unwrap(), ConnectionType::Bluetooth);
        assert_eq!("None".parse::<ConnectionType>().unwrap(), ConnectionType::None);
        assert!("serial".parse::<ConnectionType>().is_err());
    }

    #[test]
    fn test_idle_reports_connected_with_no_type() {
        let mut state = ControllerState::new(1);
        state.status = SlotStatus::Idle;

        let header = state.slot_header().unwrap();
        assert_eq!(header.state, SlotState::Connected);
        assert_eq!(header.connection_type, WireConnectionType::NotApplicable);
        assert_eq!(header.mac, default_mac(1));
    }

    #[test]
    fn test_disconnected_header_is_zeroed() {
        let state = ControllerState::new(7);
        assert_eq!(state.slot_header(), Some(SlotHeader::disconnected(7)));
        assert!(!state.pad_data().unwrap().connected);
    }

    #[test]
    fn test_disconnect_sentinel_never_on_wire() {
        let mut state = ControllerState::new(2);
        state.status = SlotStatus::Connected;
        state.connection_type = ConnectionType::Disconnect;

        let header = state.slot_header().unwrap();
        assert_eq!(header.connection_type, WireConnectionType::NotApplicable);
    }

    #[test]
    fn test_high_slot_not_reportable() {
        let state = ControllerState::new(256);
        assert!(state.wire_slot().is_none());
        assert!(state.slot_header().is_none());
        assert!(state.pad_data().is_none());
    }

    #[test]
    fn test_pad_data_copies_fields() {
        let mut state = ControllerState::new(2);
        state.status = SlotStatus::Connected;
        state.packet_counter = 41;
        state.left_stick = [0, 255];
        state.gyroscope = [1.0, 2.0, 3.0];
        state.press(Button::R2);

        let pad = state.pad_data().unwrap();
        assert!(pad.connected);
        assert_eq!(pad.packet_counter, 41);
        assert_eq!(pad.left_stick, [0, 255]);
        assert_eq!(pad.buttons2, 0x02);
        assert_eq!(pad.analog_r2, 255);
        assert_eq!(pad.gyroscope, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_rumble_set_and_decay() {
        let mut state = ControllerState::new(0);
        let start = Instant::now();

        assert!(state.set_rumble(1, 200, start));
        assert!(!state.set_rumble(5, 200, start));
        assert_eq!(state.motors[1].intensity, 200);

        let timeout = Duration::from_millis(100);
        assert!(!state.decay_rumble(start + Duration::from_millis(50), timeout));
        assert!(state.decay_rumble(start + Duration::from_millis(150), timeout));
        assert_eq!(state.motors[1].intensity, 0);
    }

    #[test]
    fn test_set_motor_count() {
        let mut state = ControllerState::new(0);
        state.set_motor_count(0);
        assert_eq!(state.motor_count(), 0);
        state.set_motor_count(4);
        assert_eq!(state.motors.len(), 4);
    }
}
