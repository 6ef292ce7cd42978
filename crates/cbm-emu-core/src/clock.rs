/// Emulated CPU cycles since power-on (or since the last reset).
///
/// The counter is 32 bits wide like the EVENT module's clock field, so it is
/// periodically rebased downward by [`crate::interrupt::CpuIntStatus::prevent_overflow`].
pub type Clock = u32;

/// Deadline value meaning "not scheduled".
pub const CLOCK_MAX: Clock = Clock::MAX;

/// Clock value above which a rebase is performed.
pub const PREVENT_CLK_OVERFLOW_TICK: Clock = CLOCK_MAX - 0x0010_0000;

/// Minimum clock value left after a rebase.
pub const CLKGUARD_SUB_MIN: Clock = 0x0001_0000;

/// Compute the amount to subtract from `clock` to keep it clear of overflow.
///
/// Returns 0 while `clock` is below [`PREVENT_CLK_OVERFLOW_TICK`]. Otherwise the
/// result is a multiple of `base_unit` that leaves at least
/// [`CLKGUARD_SUB_MIN`] cycles on the clock, so periodic alarms expressed in
/// `base_unit` stay phase-aligned.
///
/// # Panics
///
/// Panics if `base_unit` is 0 and a rebase is due.
pub fn overflow_subtrahend(clock: Clock, base_unit: Clock) -> Clock {
    if clock <= PREVENT_CLK_OVERFLOW_TICK {
        return 0;
    }
    ((clock - CLKGUARD_SUB_MIN) / base_unit) * base_unit
}

/// Remembers the clock rebases applied to one CPU.
///
/// Event playback uses [`ClockGuard::clock_sub`] to correct event clocks that
/// were recorded before the most recent rebase.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClockGuard {
    last_sub: Clock,
    total_sub: u64,
}

impl ClockGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_rebase(&mut self, sub: Clock) {
        if sub == 0 {
            return;
        }
        self.last_sub = sub;
        self.total_sub += u64::from(sub);
    }

    /// Subtrahend of the most recent rebase (0 if none happened yet).
    pub fn clock_sub(&self) -> Clock {
        self.last_sub
    }

    /// Sum of every subtrahend applied so far.
    pub fn total_sub(&self) -> u64 {
        self.total_sub
    }
}
