//! Keyboard matrix and its alarm-delayed latch.
//!
//! Host key presses land in a latch first. The latch is copied into the
//! machine's matrix when its alarm fires a short, fixed number of cycles
//! later, and that copy is what the event recorder sees. Every change made
//! between two firings collapses into one KEYBOARD_MATRIX event.

use log::trace;

use crate::clock::Clock;
use crate::cpu::CpuContext;
use crate::interrupt::AlarmId;

/// Cycles between a host key change and the matrix update.
pub const DEFAULT_LATCH_DELAY: Clock = 1;

/// 8x8 keyboard matrix, 1 = pressed.
///
/// `rows[r]` has bit `c` set when the key at (row r, column c) is down;
/// `columns[c]` holds the same information transposed. Both halves are
/// serialized, so the event payload is 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KeyboardMatrix {
    rows: [u8; 8],
    columns: [u8; 8],
}

impl KeyboardMatrix {
    pub const PAYLOAD_LEN: usize = 16;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear the key at `row`, `column`. Out-of-range positions are
    /// ignored.
    pub fn set_key(&mut self, row: u8, column: u8, pressed: bool) {
        if row >= 8 || column >= 8 {
            return;
        }
        if pressed {
            self.rows[row as usize] |= 1 << column;
            self.columns[column as usize] |= 1 << row;
        } else {
            self.rows[row as usize] &= !(1 << column);
            self.columns[column as usize] &= !(1 << row);
        }
    }

    pub fn is_pressed(&self, row: u8, column: u8) -> bool {
        row < 8 && column < 8 && self.rows[row as usize] & (1 << column) != 0
    }

    /// Rows read back for an active-low column select, as a CIA port sees
    /// them (0 = pressed).
    #[must_use]
    pub fn scan(&self, column_mask: u8) -> u8 {
        let mut result = 0u8;
        for (column, &bits) in self.columns.iter().enumerate() {
            if column_mask & (1 << column) == 0 {
                result |= bits;
            }
        }
        !result
    }

    pub fn release_all(&mut self) {
        *self = Self::default();
    }

    pub fn rows(&self) -> &[u8; 8] {
        &self.rows
    }

    pub fn to_bytes(&self) -> [u8; Self::PAYLOAD_LEN] {
        let mut out = [0u8; Self::PAYLOAD_LEN];
        out[..8].copy_from_slice(&self.rows);
        out[8..].copy_from_slice(&self.columns);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::PAYLOAD_LEN {
            return None;
        }
        let mut matrix = Self::default();
        matrix.rows.copy_from_slice(&bytes[..8]);
        matrix.columns.copy_from_slice(&bytes[8..]);
        Some(matrix)
    }
}

#[derive(Debug, Clone)]
pub struct KeyboardLatch {
    alarm: AlarmId,
    delay: Clock,
    latch: KeyboardMatrix,
    current: KeyboardMatrix,
}

impl KeyboardLatch {
    pub fn new(cpu: &mut CpuContext, delay: Clock) -> Self {
        Self {
            alarm: cpu.int_status.alarm_new("KeyboardLatch"),
            delay,
            latch: KeyboardMatrix::default(),
            current: KeyboardMatrix::default(),
        }
    }

    pub fn alarm(&self) -> AlarmId {
        self.alarm
    }

    pub fn set_key(&mut self, row: u8, column: u8, pressed: bool) {
        self.latch.set_key(row, column, pressed);
    }

    pub fn latch(&self) -> &KeyboardMatrix {
        &self.latch
    }

    /// The matrix the machine currently sees.
    pub fn current(&self) -> &KeyboardMatrix {
        &self.current
    }

    /// Arm the latch alarm unless it is already pending, so a burst of key
    /// changes is delivered in one step.
    pub fn schedule(&mut self, cpu: &mut CpuContext) {
        if cpu.int_status.is_alarm_set(self.alarm) {
            return;
        }
        cpu.int_status
            .set_alarm(self.alarm, cpu.clock.saturating_add(self.delay));
    }

    /// Re-arm after the alarm table was cleared (reset or snapshot load)
    /// while a change was still waiting in the latch.
    pub fn rearm(&mut self, cpu: &mut CpuContext) {
        if self.latch != self.current {
            self.schedule(cpu);
        }
    }

    /// The alarm fired: publish the latch and return the new matrix.
    pub fn fire(&mut self, cpu: &mut CpuContext) -> KeyboardMatrix {
        cpu.int_status.unset_alarm(self.alarm);
        self.current = self.latch;
        trace!("Keyboard: latch fired at {}", cpu.clock);
        self.current
    }

    /// Replay a recorded matrix immediately.
    pub fn playback(&mut self, matrix: KeyboardMatrix) {
        self.latch = matrix;
        self.current = matrix;
    }

    /// Replay a matrix received from a network peer: it goes through the
    /// latch like a local key press.
    pub fn delayed_playback(&mut self, matrix: KeyboardMatrix, cpu: &mut CpuContext) {
        self.latch = matrix;
        self.schedule(cpu);
    }
}
