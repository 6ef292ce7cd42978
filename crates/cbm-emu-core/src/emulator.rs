//! Drives a [`Machine`] together with the event recorder and the input
//! latches.
//!
//! Frontends never touch the recorder or the latches directly: user input
//! goes through [`Emulator::set_key`] and friends, which route it to the
//! latch, the recorder or the network capture depending on the session
//! that is running. [`Emulator::run_until`] executes the machine up to the
//! next alarm deadline, dispatches due alarms and carries out pending
//! resets.

use std::fs;
use std::path::Path;

use log::{debug, info, warn};

use crate::clock::Clock;
use crate::cpu::ResetMode;
use crate::datasette::DatasetteCommand;
use crate::event::{Event, EventConfig, EventError, EventKind, EventRecorder, ImageAttach};
use crate::joystick::{JoystickLatch, JoystickValues};
use crate::keyboard::{DEFAULT_LATCH_DELAY, KeyboardLatch, KeyboardMatrix};
use crate::machine::{CpuRegisters, Machine};
use crate::resources::{ResourceValue, Resources};
use crate::snapshot::{SNAPSHOT_MAJOR, SNAPSHOT_MINOR, Snapshot, SnapshotError, SnapshotWriter};
use crate::ui::{LogUi, UiHooks};

pub struct Emulator<M: Machine, U: UiHooks = LogUi> {
    machine: M,
    ui: U,
    resources: Resources,
    events: EventRecorder,
    keyboard: KeyboardLatch,
    joystick: JoystickLatch,
    /// Inputs collected for the next network frame. While set, user input
    /// is captured here instead of being applied; it reaches the machine
    /// when the frame is replayed.
    network_capture: Option<NetworkCapture>,
}

/// User input gathered for the next network frame. The local view of the
/// keyboard and joysticks lives here so that the latches only change
/// through replayed frames, identically on both peers.
#[derive(Debug, Clone, Default)]
struct NetworkCapture {
    events: Vec<Event>,
    keyboard: KeyboardMatrix,
    joystick: JoystickValues,
}

impl<M: Machine> Emulator<M> {
    pub fn new(machine: M, resources: Resources) -> Self {
        Self::with_ui(machine, resources, LogUi)
    }
}

impl<M: Machine, U: UiHooks> Emulator<M, U> {
    pub fn with_ui(mut machine: M, resources: Resources, ui: U) -> Self {
        let cpu = machine.cpu_mut();
        let events = EventRecorder::new(cpu, EventConfig::from_resources(&resources));
        let keyboard = KeyboardLatch::new(cpu, DEFAULT_LATCH_DELAY);
        let joystick = JoystickLatch::new(cpu, DEFAULT_LATCH_DELAY);
        Self {
            machine,
            ui,
            resources,
            events,
            keyboard,
            joystick,
            network_capture: None,
        }
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Replace the resource set. Snapshot locations take effect for the
    /// next session.
    pub fn set_resources(&mut self, resources: Resources) {
        self.events
            .set_config(EventConfig::from_resources(&resources));
        self.resources = resources;
    }

    pub fn events(&self) -> &EventRecorder {
        &self.events
    }

    pub fn keyboard(&self) -> &KeyboardLatch {
        &self.keyboard
    }

    pub fn joystick(&self) -> &JoystickLatch {
        &self.joystick
    }

    pub fn clock(&self) -> Clock {
        self.machine.cpu().clock
    }

    pub fn registers(&self) -> CpuRegisters {
        self.machine.registers()
    }

    /// Run until the clock reaches `target`. A reset carried out on the way
    /// keeps the number of cycles still to run, not the absolute target.
    pub fn run_until(&mut self, target: Clock) {
        let mut target = target;
        loop {
            self.dispatch_alarms();

            if let Some(mode) = self.machine.cpu_mut().take_pending_reset() {
                let remaining = target.saturating_sub(self.clock());
                self.reset_now(mode);
                target = self.clock().saturating_add(remaining);
                continue;
            }

            let clock = self.clock();
            if clock >= target {
                break;
            }
            let next_alarm = self.machine.cpu().int_status.next_alarm_clk();
            self.machine.execute(target.min(next_alarm));
        }
    }

    /// Run one video frame and guard the clock against overflow.
    pub fn run_frame(&mut self) {
        let target = self
            .clock()
            .saturating_add(self.machine.cycles_per_frame());
        self.run_until(target);
        self.prevent_clock_overflow();
    }

    /// Rebase the clock if needed, carrying the recorder's deadlines along.
    /// Returns the amount subtracted.
    pub fn prevent_clock_overflow(&mut self) -> Clock {
        let base_unit = self.machine.cycles_per_frame();
        let sub = self.machine.cpu_mut().prevent_overflow(base_unit);
        if sub > 0 {
            debug!("Alarm: clock rebased by {sub}");
            self.events.rebase(sub);
        }
        sub
    }

    fn dispatch_alarms(&mut self) {
        loop {
            let cpu = self.machine.cpu();
            let Some(alarm) = cpu.int_status.next_alarm() else {
                return;
            };
            let deadline = cpu.int_status.next_alarm_clk();
            let clock = cpu.clock;
            if deadline > clock {
                return;
            }

            if alarm == self.events.alarm() {
                self.events.on_alarm(&mut self.machine, &mut self.ui);
            } else if alarm == self.keyboard.alarm() {
                let matrix = self.keyboard.fire(self.machine.cpu_mut());
                self.machine.set_keyboard_matrix(&matrix);
                self.events.record(clock, EventKind::KeyboardMatrix(matrix));
            } else if alarm == self.joystick.alarm() {
                let values = self.joystick.fire(self.machine.cpu_mut());
                self.machine.set_joystick(&values);
                self.events.record(clock, EventKind::JoystickValue(values));
            } else if !self.machine.handle_alarm(alarm, clock - deadline) {
                let cpu = self.machine.cpu_mut();
                warn!(
                    "Alarm: '{}' fired with no handler",
                    cpu.int_status.alarm_name(alarm)
                );
                cpu.int_status.unset_alarm(alarm);
            }
        }
    }

    fn reset_now(&mut self, mode: ResetMode) {
        self.machine.reset(mode);
        let cpu = self.machine.cpu_mut();
        self.events.reset_ack(cpu);
        self.keyboard.rearm(cpu);
        self.joystick.rearm(cpu);
    }

    fn rearm_alarms(&mut self) {
        let cpu = self.machine.cpu_mut();
        self.events.rearm(cpu);
        self.keyboard.rearm(cpu);
        self.joystick.rearm(cpu);
    }

    fn capture(&mut self, kind: EventKind) -> bool {
        let clock = self.clock();
        match &mut self.network_capture {
            Some(capture) => {
                capture.events.push(Event::new(clock, kind));
                true
            }
            None => false,
        }
    }

    fn record(&mut self, kind: EventKind) {
        let clock = self.clock();
        self.events.record(clock, kind);
    }

    pub fn set_key(&mut self, row: u8, column: u8, pressed: bool) {
        if self.events.is_playing() {
            return;
        }
        if let Some(capture) = &mut self.network_capture {
            capture.keyboard.set_key(row, column, pressed);
            let matrix = capture.keyboard;
            self.capture(EventKind::KeyboardMatrix(matrix));
            return;
        }
        self.keyboard.set_key(row, column, pressed);
        self.keyboard.schedule(self.machine.cpu_mut());
    }

    pub fn set_restore(&mut self, pressed: bool) {
        if self.events.is_playing() || self.capture(EventKind::KeyboardRestore(pressed)) {
            return;
        }
        self.machine.set_restore_key(pressed);
        self.record(EventKind::KeyboardRestore(pressed));
    }

    /// Set the full value of joystick `port` (1 or 2).
    pub fn set_joystick(&mut self, port: usize, value: u8) {
        if self.events.is_playing() {
            return;
        }
        if let Some(capture) = &mut self.network_capture {
            capture.joystick.set_port(port, value);
            let values = capture.joystick;
            self.capture(EventKind::JoystickValue(values));
            return;
        }
        self.joystick.set_value_absolute(port, value);
        self.joystick.schedule(self.machine.cpu_mut());
    }

    pub fn datasette_control(&mut self, command: DatasetteCommand) {
        if self.events.is_playing() || self.capture(EventKind::Datasette(command)) {
            return;
        }
        self.machine.datasette_control(command);
        self.record(EventKind::Datasette(command));
    }

    /// Attach an image to `unit`; unit 1 is the datasette, 8 and up are
    /// disk drives.
    pub fn attach_image(&mut self, unit: u8, path: &Path, read_only: bool) -> Result<(), EventError> {
        let io_failed = |source| EventError::ImageIo {
            path: path.to_path_buf(),
            source,
        };

        if self.network_capture.is_some() {
            let image = fs::read(path).map_err(io_failed)?;
            self.capture(EventKind::AttachImage(ImageAttach {
                unit,
                read_only,
                filename: path.to_string_lossy().into_owned(),
                image: Some(image),
            }));
            return Ok(());
        }

        if unit == 1 {
            self.machine.attach_tape(path).map_err(io_failed)?;
        } else {
            self.machine
                .attach_disk(unit, path, read_only)
                .map_err(io_failed)?;
        }
        let clock = self.clock();
        self.events
            .record_attach_image(clock, unit, path, read_only)
    }

    /// Request a CPU reset. Ignored while a recording plays back.
    pub fn trigger_reset(&mut self, mode: ResetMode) {
        if self.events.is_playing() {
            debug!("Event: reset request ignored during playback");
            return;
        }
        if self.capture(EventKind::ResetCpu(mode)) {
            return;
        }
        self.record(EventKind::ResetCpu(mode));
        self.machine.cpu_mut().trigger_reset(mode);
    }

    /// Change a machine setting. Returns false when the machine does not
    /// know `name`.
    pub fn set_machine_resource(&mut self, name: &str, value: ResourceValue) -> bool {
        let kind = EventKind::Resource {
            name: name.to_string(),
            value: value.clone(),
        };
        if self.capture(kind.clone()) {
            return true;
        }
        if !self.machine.set_resource(name, &value) {
            return false;
        }
        self.record(kind);
        true
    }

    fn finish_session_call(&mut self, result: Result<(), EventError>) -> Result<(), EventError> {
        if let Err(err) = &result {
            self.ui.error(&err.to_string());
        }
        self.rearm_alarms();
        result
    }

    pub fn record_start(&mut self) -> Result<(), EventError> {
        let result = self.events.record_start(&mut self.machine, &mut self.ui);
        self.finish_session_call(result)
    }

    pub fn record_stop(&mut self) -> Result<(), EventError> {
        let result = self.events.record_stop(&mut self.machine, &mut self.ui);
        self.finish_session_call(result)
    }

    pub fn playback_start(&mut self) -> Result<(), EventError> {
        let result = self.events.playback_start(&mut self.machine, &mut self.ui);
        self.finish_session_call(result)
    }

    pub fn playback_stop(&mut self) -> Result<(), EventError> {
        let result = self.events.playback_stop(&mut self.machine, &mut self.ui);
        self.finish_session_call(result)
    }

    pub fn set_milestone(&mut self) -> Result<(), EventError> {
        let result = self.events.set_milestone(&mut self.machine);
        self.finish_session_call(result)
    }

    pub fn reset_milestone(&mut self) -> Result<(), EventError> {
        let result = self.events.reset_milestone(&mut self.machine, &mut self.ui);
        self.finish_session_call(result)
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<(), SnapshotError> {
        let mut writer = SnapshotWriter::new(SNAPSHOT_MAJOR, SNAPSHOT_MINOR, self.machine.name());
        self.machine.write_snapshot_modules(&mut writer)?;
        writer.save(path)?;
        info!("Snapshot: saved {}", path.display());
        Ok(())
    }

    pub fn load_snapshot(&mut self, path: &Path) -> Result<(), SnapshotError> {
        let snapshot = Snapshot::open(path)?;
        self.load_from(&snapshot)?;
        info!("Snapshot: loaded {}", path.display());
        Ok(())
    }

    fn load_from(&mut self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        snapshot.check_machine(self.machine.name())?;
        self.machine.read_snapshot_modules(snapshot)?;
        self.rearm_alarms();
        Ok(())
    }

    /// Machine state as snapshot bytes, for a network peer.
    pub fn write_snapshot_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        let mut writer = SnapshotWriter::new(SNAPSHOT_MAJOR, SNAPSHOT_MINOR, self.machine.name());
        self.machine.write_snapshot_modules(&mut writer)?;
        Ok(writer.into_bytes())
    }

    pub fn read_snapshot_bytes(&mut self, bytes: Vec<u8>) -> Result<(), SnapshotError> {
        let snapshot = Snapshot::from_bytes(bytes)?;
        self.load_from(&snapshot)
    }

    /// Settings a peer must share for both machines to run identically.
    pub fn event_safe_settings(&self) -> Vec<(String, ResourceValue)> {
        self.machine.event_safe_resources()
    }

    pub fn apply_settings(&mut self, settings: &[(String, ResourceValue)]) {
        for (name, value) in settings {
            if !self.machine.set_resource(name, value) {
                warn!("Net: peer setting '{name}' not known to this machine");
            }
        }
    }

    /// Start or stop capturing user input for network frames.
    pub fn set_network_capture(&mut self, enabled: bool) {
        self.network_capture = enabled.then(|| NetworkCapture {
            events: Vec::new(),
            keyboard: *self.keyboard.latch(),
            joystick: *self.joystick.latch(),
        });
    }

    pub fn is_network_capture(&self) -> bool {
        self.network_capture.is_some()
    }

    /// Take the inputs captured since the last call.
    pub fn take_network_events(&mut self) -> Vec<Event> {
        self.network_capture
            .as_mut()
            .map(|capture| std::mem::take(&mut capture.events))
            .unwrap_or_default()
    }

    /// Append an event to the current network frame at the current clock.
    /// Does nothing when not capturing.
    pub fn push_network_event(&mut self, kind: EventKind) {
        self.capture(kind);
    }

    /// Apply one peer's frame. Keyboard and joystick values go through the
    /// latches like local input; everything else takes effect immediately.
    pub fn replay_network_events(&mut self, events: &[Event]) {
        for event in events {
            match &event.kind {
                EventKind::KeyboardMatrix(matrix) => {
                    self.keyboard
                        .delayed_playback(*matrix, self.machine.cpu_mut());
                }
                EventKind::JoystickValue(values) => {
                    self.joystick
                        .delayed_playback(*values, self.machine.cpu_mut());
                }
                EventKind::ListEnd | EventKind::SyncTest(_) => {}
                other => self.events.play_event(other, &mut self.machine, &mut self.ui),
            }
        }
    }

    /// Report a problem through the UI hooks.
    pub fn report_error(&mut self, message: &str) {
        self.ui.error(message);
    }

    pub fn report_status(&mut self, text: &str) {
        self.ui.display_status(text);
    }
}
