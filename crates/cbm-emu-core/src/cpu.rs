use log::info;

use crate::clock::{Clock, ClockGuard};
use crate::interrupt::CpuIntStatus;

/// Cycles the 6502 family spends in its reset sequence.
pub const RESET_CYCLES: Clock = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetMode {
    Soft,
    Hard,
}

impl ResetMode {
    pub fn code(self) -> u8 {
        match self {
            Self::Soft => 0,
            Self::Hard => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Soft),
            1 => Some(Self::Hard),
            _ => None,
        }
    }
}

/// State the kernel shares with the CPU core: the logical clock, the
/// interrupt/alarm status block and a reset request waiting for the next
/// instruction boundary.
#[derive(Debug, Clone)]
pub struct CpuContext {
    pub clock: Clock,
    pub int_status: CpuIntStatus,
    pub clock_guard: ClockGuard,
    pending_reset: Option<ResetMode>,
}

impl CpuContext {
    pub fn new(num_lines: usize, num_alarms: usize) -> Self {
        Self {
            clock: 0,
            int_status: CpuIntStatus::new(num_lines, num_alarms),
            clock_guard: ClockGuard::new(),
            pending_reset: None,
        }
    }

    /// Request a reset. It is carried out by the emulator loop before the
    /// next instruction, which then acknowledges it to the event recorder.
    pub fn trigger_reset(&mut self, mode: ResetMode) {
        self.int_status.trigger_reset();
        // A hard request is never downgraded by a later soft one.
        if self.pending_reset != Some(ResetMode::Hard) {
            self.pending_reset = Some(mode);
        }
    }

    pub fn pending_reset(&self) -> Option<ResetMode> {
        self.pending_reset
    }

    /// Take and acknowledge the pending reset request, if any.
    pub fn take_pending_reset(&mut self) -> Option<ResetMode> {
        let mode = self.pending_reset.take()?;
        self.int_status.ack_reset();
        Some(mode)
    }

    /// Perform the CPU side of a reset.
    pub fn reset(&mut self) {
        info!("Main CPU: RESET.");
        self.int_status.reset();
        self.clock = RESET_CYCLES;
    }

    /// Load a clock value from a snapshot. Interrupt lines and alarms are
    /// cleared; their owners re-arm them after the load.
    pub fn restore_clock(&mut self, clock: Clock) {
        self.int_status.reset();
        self.clock = clock;
    }

    /// Rebase the clock if it is close to overflowing. Returns the amount
    /// subtracted (0 when nothing happened).
    pub fn prevent_overflow(&mut self, base_unit: Clock) -> Clock {
        let sub = self.int_status.prevent_overflow(&mut self.clock, base_unit);
        self.clock_guard.note_rebase(sub);
        sub
    }

    /// Steal `num` cycles for DMA starting at `start_clk`, then `extra_settle`
    /// cycles before the CPU resumes.
    pub fn steal_cycles(&mut self, start_clk: Clock, num: Clock, extra_settle: Clock) {
        self.int_status
            .steal_cycles(start_clk, &mut self.clock, num, extra_settle);
    }
}

impl Default for CpuContext {
    fn default() -> Self {
        Self::new(0, 0)
    }
}
