use std::fmt;
use std::str::FromStr;

use cbm_emu_core::event::EventKind;
use cbm_emu_core::joystick::JoystickValues;
use cbm_emu_core::resources::DEFAULT_NETWORK_CONTROL;

use crate::NetworkError;

pub const CONTROL_KEYB: u32 = 0x01;
pub const CONTROL_JOY1: u32 = 0x02;
pub const CONTROL_JOY2: u32 = 0x04;
pub const CONTROL_DEVC: u32 = 0x08;
pub const CONTROL_RSRC: u32 = 0x10;

/// Client bits sit this far above the server bits.
pub const CLIENT_OFFSET: u32 = 8;

const ELEMENTS: [u32; 5] = [
    CONTROL_KEYB,
    CONTROL_JOY1,
    CONTROL_JOY2,
    CONTROL_DEVC,
    CONTROL_RSRC,
];

/// The `NetworkControl` mask: which inputs each side may feed into the
/// shared session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkControl(u32);

impl NetworkControl {
    /// The server always controls resources.
    pub fn new(bits: u32) -> Self {
        Self(bits | CONTROL_RSRC)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// The bits of one side, in server position.
    pub fn side(self, is_server: bool) -> u32 {
        if is_server {
            self.0 & 0xFF
        } else {
            (self.0 >> CLIENT_OFFSET) & 0xFF
        }
    }

    /// Whether the frame list of `is_server`'s side may carry `kind`.
    pub fn allows(self, is_server: bool, kind: &EventKind) -> bool {
        let side = self.side(is_server);
        match kind {
            EventKind::JoystickValue(_) => side & (CONTROL_JOY1 | CONTROL_JOY2) != 0,
            other => match required_bit(other) {
                Some(bit) => side & bit != 0,
                None => true,
            },
        }
    }

    pub fn controls_port(self, is_server: bool, port: usize) -> bool {
        let bit = match port {
            1 => CONTROL_JOY1,
            2 => CONTROL_JOY2,
            _ => return false,
        };
        self.side(is_server) & bit != 0
    }

    /// Overlay the ports `is_server`'s side controls from `sent` onto `base`.
    pub fn merge_joystick(
        self,
        is_server: bool,
        base: JoystickValues,
        sent: &JoystickValues,
    ) -> JoystickValues {
        let mut merged = base;
        for port in 1..=2 {
            if self.controls_port(is_server, port) {
                merged.set_port(port, sent.port(port));
            }
        }
        merged
    }
}

fn required_bit(kind: &EventKind) -> Option<u32> {
    match kind {
        EventKind::KeyboardMatrix(_) | EventKind::KeyboardRestore(_) => Some(CONTROL_KEYB),
        EventKind::Datasette(_)
        | EventKind::AttachDisk { .. }
        | EventKind::AttachTape { .. }
        | EventKind::AttachImage(_) => Some(CONTROL_DEVC),
        EventKind::Resource { .. } | EventKind::ResetCpu(_) => Some(CONTROL_RSRC),
        _ => None,
    }
}

impl Default for NetworkControl {
    fn default() -> Self {
        Self::new(DEFAULT_NETWORK_CONTROL)
    }
}

impl From<u32> for NetworkControl {
    fn from(bits: u32) -> Self {
        Self::new(bits)
    }
}

/// Parses `"k,j1,j2,d,r"`, each element 0 (none), 1 (server), 2 (client)
/// or 3 (both). Resources only go up to 2 since the server always has them.
impl FromStr for NetworkControl {
    type Err = NetworkError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || NetworkError::Protocol(format!("invalid network control '{text}'"));

        let values: Vec<u32> = text
            .split(',')
            .map(|part| part.trim().parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|_| invalid())?;
        if values.len() != ELEMENTS.len() {
            return Err(invalid());
        }

        let mut bits = 0;
        for (i, (&value, &bit)) in values.iter().zip(&ELEMENTS).enumerate() {
            let max = if i == ELEMENTS.len() - 1 { 2 } else { 3 };
            if value > max {
                return Err(invalid());
            }
            if value & 1 != 0 {
                bits |= bit;
            }
            if value & 2 != 0 {
                bits |= bit << CLIENT_OFFSET;
            }
        }
        Ok(Self::new(bits))
    }
}

impl fmt::Display for NetworkControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = ELEMENTS
            .iter()
            .map(|&bit| {
                let server = u32::from(self.0 & bit != 0);
                let client = u32::from(self.0 & (bit << CLIENT_OFFSET) != 0);
                (server | client << 1).to_string()
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}
