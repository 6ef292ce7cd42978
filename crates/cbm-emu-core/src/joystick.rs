use log::trace;

use crate::clock::Clock;
use crate::cpu::CpuContext;
use crate::interrupt::AlarmId;

/// Number of joystick ports.
pub const JOYSTICK_NUM: usize = 2;

pub const JOY_UP: u8 = 0x01;
pub const JOY_DOWN: u8 = 0x02;
pub const JOY_LEFT: u8 = 0x04;
pub const JOY_RIGHT: u8 = 0x08;
pub const JOY_FIRE: u8 = 0x10;

/// Joystick port values indexed by port number. Index 0 is unused so ports
/// keep their 1-based numbers; all three bytes go into the event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct JoystickValues(pub [u8; JOYSTICK_NUM + 1]);

impl JoystickValues {
    pub const PAYLOAD_LEN: usize = JOYSTICK_NUM + 1;

    /// Value of `port` (1 or 2), 0 for anything else.
    pub fn port(&self, port: usize) -> u8 {
        if (1..=JOYSTICK_NUM).contains(&port) {
            self.0[port]
        } else {
            0
        }
    }

    pub fn set_port(&mut self, port: usize, value: u8) {
        if (1..=JOYSTICK_NUM).contains(&port) {
            self.0[port] = value;
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        <[u8; JOYSTICK_NUM + 1]>::try_from(bytes).ok().map(Self)
    }
}

/// Alarm-delayed joystick latch, the same arrangement as
/// [`crate::keyboard::KeyboardLatch`].
#[derive(Debug, Clone)]
pub struct JoystickLatch {
    alarm: AlarmId,
    delay: Clock,
    latch: JoystickValues,
    current: JoystickValues,
}

impl JoystickLatch {
    pub fn new(cpu: &mut CpuContext, delay: Clock) -> Self {
        Self {
            alarm: cpu.int_status.alarm_new("JoystickLatch"),
            delay,
            latch: JoystickValues::default(),
            current: JoystickValues::default(),
        }
    }

    pub fn alarm(&self) -> AlarmId {
        self.alarm
    }

    pub fn set_value_absolute(&mut self, port: usize, value: u8) {
        self.latch.set_port(port, value);
    }

    pub fn set_value_or(&mut self, port: usize, bits: u8) {
        let value = self.latch.port(port) | bits;
        self.latch.set_port(port, value);
    }

    pub fn set_value_and(&mut self, port: usize, mask: u8) {
        let value = self.latch.port(port) & mask;
        self.latch.set_port(port, value);
    }

    pub fn latch(&self) -> &JoystickValues {
        &self.latch
    }

    pub fn current(&self) -> &JoystickValues {
        &self.current
    }

    pub fn schedule(&mut self, cpu: &mut CpuContext) {
        if cpu.int_status.is_alarm_set(self.alarm) {
            return;
        }
        cpu.int_status
            .set_alarm(self.alarm, cpu.clock.saturating_add(self.delay));
    }

    pub fn rearm(&mut self, cpu: &mut CpuContext) {
        if self.latch != self.current {
            self.schedule(cpu);
        }
    }

    pub fn fire(&mut self, cpu: &mut CpuContext) -> JoystickValues {
        cpu.int_status.unset_alarm(self.alarm);
        self.current = self.latch;
        trace!("Joystick: latch fired at {}", cpu.clock);
        self.current
    }

    pub fn playback(&mut self, values: JoystickValues) {
        self.latch = values;
        self.current = values;
    }

    pub fn delayed_playback(&mut self, values: JoystickValues, cpu: &mut CpuContext) {
        self.latch = values;
        self.schedule(cpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_are_one_based() {
        let mut values = JoystickValues::default();
        values.set_port(2, JOY_FIRE);
        values.set_port(0, 0xFF);
        values.set_port(3, 0xFF);
        assert_eq!(values.0, [0, 0, JOY_FIRE]);
        assert_eq!(values.port(2), JOY_FIRE);
        assert_eq!(values.port(7), 0);
    }

    #[test]
    fn or_and_updates_touch_one_port() {
        let mut cpu = CpuContext::new(0, 1);
        let mut latch = JoystickLatch::new(&mut cpu, 1);
        latch.set_value_or(1, JOY_UP | JOY_FIRE);
        latch.set_value_and(1, !JOY_UP);
        assert_eq!(latch.latch().0, [0, JOY_FIRE, 0]);
    }

    #[test]
    fn latch_publishes_on_fire() {
        let mut cpu = CpuContext::new(0, 1);
        cpu.clock = 50;
        let mut latch = JoystickLatch::new(&mut cpu, 3);
        latch.set_value_absolute(2, JOY_LEFT);
        latch.schedule(&mut cpu);
        assert_eq!(cpu.int_status.next_alarm_clk(), 53);
        assert_eq!(latch.current().port(2), 0);
        assert_eq!(latch.fire(&mut cpu).port(2), JOY_LEFT);
    }

    #[test]
    fn payload_must_be_three_bytes() {
        assert_eq!(
            JoystickValues::from_bytes(&[0, 0x10, 0]),
            Some(JoystickValues([0, 0x10, 0]))
        );
        assert_eq!(JoystickValues::from_bytes(&[0, 0x10]), None);
    }
}
