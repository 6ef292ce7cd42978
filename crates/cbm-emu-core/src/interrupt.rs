use log::{debug, trace};

use crate::clock::{CLOCK_MAX, Clock, overflow_subtrahend};

pub const IK_NONE: u8 = 0x00;
pub const IK_NMI: u8 = 0x01;
pub const IK_IRQ: u8 = 0x02;
pub const IK_RESET: u8 = 0x04;
pub const IK_TRAP: u8 = 0x08;
pub const IK_MONITOR: u8 = 0x10;

/// Cycles an interrupt must be pending before the CPU may take it.
pub const INTERRUPT_DELAY: Clock = 2;

/// Handle to one alarm slot in a [`CpuIntStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmId(usize);

impl AlarmId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle to one interrupt source line in a [`CpuIntStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntLine(usize);

impl IntLine {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct AlarmSlot {
    name: String,
    deadline: Clock,
    claimed: bool,
}

/// Interrupt and alarm bookkeeping for one CPU.
///
/// Holds the alarm deadlines (`CLOCK_MAX` when unset) together with a cached
/// earliest deadline, the pending interrupt masks of every source line, and
/// the stolen-cycle accounting used by DMA. Only the owning CPU context
/// mutates it.
#[derive(Debug, Clone)]
pub struct CpuIntStatus {
    alarms: Vec<AlarmSlot>,
    next_alarm_clk: Clock,
    next_alarm: Option<AlarmId>,

    pending_int: Vec<u8>,
    int_names: Vec<String>,
    nirq: u32,
    nnmi: u32,
    global_pending: u8,
    irq_clk: Clock,
    nmi_clk: Clock,

    num_last_stolen_cycles: Clock,
    last_stolen_cycles_clk: Clock,
}

impl CpuIntStatus {
    /// Create a status block with room for `num_lines` interrupt sources and
    /// `num_alarms` alarms. Every deadline starts unset and nothing is pending.
    pub fn new(num_lines: usize, num_alarms: usize) -> Self {
        Self {
            alarms: (0..num_alarms)
                .map(|_| AlarmSlot {
                    name: String::new(),
                    deadline: CLOCK_MAX,
                    claimed: false,
                })
                .collect(),
            next_alarm_clk: CLOCK_MAX,
            next_alarm: None,
            pending_int: Vec::with_capacity(num_lines),
            int_names: Vec::with_capacity(num_lines),
            nirq: 0,
            nnmi: 0,
            global_pending: IK_NONE,
            irq_clk: 0,
            nmi_clk: 0,
            num_last_stolen_cycles: 0,
            last_stolen_cycles_clk: 0,
        }
    }

    /// Claim an alarm slot. Slots preallocated by [`CpuIntStatus::new`] are
    /// used first; the table grows past that if needed.
    pub fn alarm_new(&mut self, name: &str) -> AlarmId {
        let index = match self.alarms.iter().position(|slot| !slot.claimed) {
            Some(index) => index,
            None => {
                self.alarms.push(AlarmSlot {
                    name: String::new(),
                    deadline: CLOCK_MAX,
                    claimed: false,
                });
                self.alarms.len() - 1
            }
        };
        let slot = &mut self.alarms[index];
        slot.name = name.to_string();
        slot.claimed = true;
        slot.deadline = CLOCK_MAX;
        trace!("Alarm: registered '{name}' as #{index}");
        AlarmId(index)
    }

    /// Register an interrupt source line.
    pub fn int_line_new(&mut self, name: &str) -> IntLine {
        self.pending_int.push(IK_NONE);
        self.int_names.push(name.to_string());
        IntLine(self.pending_int.len() - 1)
    }

    pub fn alarm_name(&self, alarm: AlarmId) -> &str {
        &self.alarms[alarm.0].name
    }

    pub fn int_line_name(&self, line: IntLine) -> &str {
        &self.int_names[line.0]
    }

    /// Schedule `alarm` to expire at `deadline`.
    pub fn set_alarm(&mut self, alarm: AlarmId, deadline: Clock) {
        self.alarms[alarm.0].deadline = deadline;
        if deadline < self.next_alarm_clk {
            self.next_alarm_clk = deadline;
            self.next_alarm = Some(alarm);
        } else if self.next_alarm == Some(alarm) {
            self.find_next_alarm();
        }
    }

    pub fn unset_alarm(&mut self, alarm: AlarmId) {
        self.alarms[alarm.0].deadline = CLOCK_MAX;
        if self.next_alarm == Some(alarm) {
            self.find_next_alarm();
        }
    }

    pub fn unset_all_alarms(&mut self) {
        for slot in &mut self.alarms {
            slot.deadline = CLOCK_MAX;
        }
        self.next_alarm_clk = CLOCK_MAX;
        self.next_alarm = None;
    }

    /// Deadline of `alarm`, `CLOCK_MAX` when unset.
    pub fn alarm_clk(&self, alarm: AlarmId) -> Clock {
        self.alarms[alarm.0].deadline
    }

    pub fn is_alarm_set(&self, alarm: AlarmId) -> bool {
        self.alarm_clk(alarm) != CLOCK_MAX
    }

    /// Earliest pending deadline, `CLOCK_MAX` when no alarm is set.
    pub fn next_alarm_clk(&self) -> Clock {
        self.next_alarm_clk
    }

    pub fn next_alarm(&self) -> Option<AlarmId> {
        self.next_alarm
    }

    fn find_next_alarm(&mut self) {
        self.next_alarm_clk = CLOCK_MAX;
        self.next_alarm = None;
        for (index, slot) in self.alarms.iter().enumerate() {
            if slot.deadline < self.next_alarm_clk {
                self.next_alarm_clk = slot.deadline;
                self.next_alarm = Some(AlarmId(index));
            }
        }
    }

    /// Rebase `clock` and every pending timestamp by the same amount once
    /// `clock` passes the high-water mark. Returns the amount subtracted.
    ///
    /// # Panics
    ///
    /// Panics if `base_unit` is 0 and a rebase is due.
    pub fn prevent_overflow(&mut self, clock: &mut Clock, base_unit: Clock) -> Clock {
        let sub = overflow_subtrahend(*clock, base_unit);
        if sub == 0 {
            return 0;
        }

        *clock -= sub;
        for slot in &mut self.alarms {
            if slot.deadline != CLOCK_MAX {
                slot.deadline = slot.deadline.saturating_sub(sub);
            }
        }
        if self.next_alarm_clk != CLOCK_MAX {
            self.next_alarm_clk = self.next_alarm_clk.saturating_sub(sub);
        }
        self.irq_clk = self.irq_clk.saturating_sub(sub);
        self.nmi_clk = self.nmi_clk.saturating_sub(sub);
        self.last_stolen_cycles_clk = self.last_stolen_cycles_clk.saturating_sub(sub);

        debug!("Alarm: clock rebased by {sub} cycles, now {}", *clock);
        sub
    }

    /// Advance `clock` by `num` stolen cycles plus `extra_settle` cycles the
    /// CPU needs before it owns the bus again.
    ///
    /// Back-to-back thefts (a steal starting where the previous one ended)
    /// accumulate into one count. Pending IRQ/NMI clocks move forward with
    /// the clock so their relative delay is unchanged.
    pub fn steal_cycles(
        &mut self,
        start_clk: Clock,
        clock: &mut Clock,
        num: Clock,
        extra_settle: Clock,
    ) {
        if num == 0 {
            return;
        }

        if start_clk == self.last_stolen_cycles_clk {
            self.num_last_stolen_cycles += num;
        } else {
            self.num_last_stolen_cycles = num;
        }

        let total = num + extra_settle;
        *clock = clock.saturating_add(total);
        self.last_stolen_cycles_clk = start_clk.saturating_add(total);
        self.irq_clk = self.irq_clk.saturating_add(total - 1);
        self.nmi_clk = self.nmi_clk.saturating_add(total - 1);
    }

    pub fn num_last_stolen_cycles(&self) -> Clock {
        self.num_last_stolen_cycles
    }

    pub fn last_stolen_cycles_clk(&self) -> Clock {
        self.last_stolen_cycles_clk
    }

    /// An interrupt asserted inside a cycle theft counts as asserted on the
    /// last stolen cycle.
    fn assertion_clock(&self, clock: Clock) -> Clock {
        if self.last_stolen_cycles_clk <= clock {
            clock
        } else {
            self.last_stolen_cycles_clk - 1
        }
    }

    /// Drive the IRQ output of `line`. IRQ is level-triggered: it stays
    /// pending while any line holds it.
    pub fn set_irq(&mut self, line: IntLine, active: bool, clock: Clock) {
        let mask = &mut self.pending_int[line.0];
        if active {
            if *mask & IK_IRQ == 0 {
                *mask |= IK_IRQ;
                self.nirq += 1;
                self.global_pending |= IK_IRQ;
                self.irq_clk = self.assertion_clock(clock);
            }
        } else if *mask & IK_IRQ != 0 {
            *mask &= !IK_IRQ;
            self.nirq -= 1;
            if self.nirq == 0 {
                self.global_pending &= !IK_IRQ;
            }
        }
    }

    /// Drive the NMI output of `line`. NMI is edge-triggered: only the first
    /// line to assert it raises a new NMI, which stays pending until
    /// [`CpuIntStatus::ack_nmi`].
    pub fn set_nmi(&mut self, line: IntLine, active: bool, clock: Clock) {
        let mask = &mut self.pending_int[line.0];
        if active {
            if *mask & IK_NMI == 0 {
                *mask |= IK_NMI;
                if self.nnmi == 0 && self.global_pending & IK_NMI == 0 {
                    self.global_pending |= IK_NMI;
                    self.nmi_clk = self.assertion_clock(clock);
                }
                self.nnmi += 1;
            }
        } else if *mask & IK_NMI != 0 {
            *mask &= !IK_NMI;
            self.nnmi -= 1;
        }
    }

    pub fn ack_nmi(&mut self) {
        self.global_pending &= !IK_NMI;
    }

    pub fn pending_mask(&self, line: IntLine) -> u8 {
        self.pending_int[line.0]
    }

    pub fn global_pending(&self) -> u8 {
        self.global_pending
    }

    pub fn irq_clk(&self) -> Clock {
        self.irq_clk
    }

    pub fn nmi_clk(&self) -> Clock {
        self.nmi_clk
    }

    /// True when an IRQ is pending and has been for at least
    /// [`INTERRUPT_DELAY`] cycles.
    pub fn check_irq_delay(&self, clock: Clock) -> bool {
        self.global_pending & IK_IRQ != 0
            && clock >= self.irq_clk.saturating_add(INTERRUPT_DELAY)
    }

    pub fn check_nmi_delay(&self, clock: Clock) -> bool {
        self.global_pending & IK_NMI != 0
            && clock >= self.nmi_clk.saturating_add(INTERRUPT_DELAY)
    }

    pub fn trigger_reset(&mut self) {
        self.global_pending |= IK_RESET;
    }

    pub fn ack_reset(&mut self) {
        self.global_pending &= !IK_RESET;
    }

    pub fn trigger_trap(&mut self) {
        self.global_pending |= IK_TRAP;
    }

    /// Acknowledge a pending trap, returning whether one was pending.
    pub fn take_trap(&mut self) -> bool {
        let pending = self.global_pending & IK_TRAP != 0;
        self.global_pending &= !IK_TRAP;
        pending
    }

    pub fn monitor_trap_on(&mut self) {
        self.global_pending |= IK_MONITOR;
    }

    pub fn monitor_trap_off(&mut self) {
        self.global_pending &= !IK_MONITOR;
    }

    /// CPU reset: drop every pending interrupt and alarm. A monitor trap
    /// survives the reset.
    pub fn reset(&mut self) {
        let monitor = self.global_pending & IK_MONITOR;
        for mask in &mut self.pending_int {
            *mask = IK_NONE;
        }
        self.nirq = 0;
        self.nnmi = 0;
        self.global_pending = monitor;
        self.irq_clk = 0;
        self.nmi_clk = 0;
        self.num_last_stolen_cycles = 0;
        self.last_stolen_cycles_clk = 0;
        self.unset_all_alarms();
    }
}

impl Default for CpuIntStatus {
    fn default() -> Self {
        Self::new(0, 0)
    }
}
