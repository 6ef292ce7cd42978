use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
#[cfg(feature = "event-trace")]
use log::trace;

use super::{EventError, EventKind, EventList, ImageAttach, ImageRegistry, InitialMode, StartMode};
use crate::clock::{CLKGUARD_SUB_MIN, Clock};
use crate::cpu::{CpuContext, ResetMode};
use crate::interrupt::AlarmId;
use crate::machine::Machine;
use crate::resources::Resources;
use crate::snapshot::{SNAPSHOT_MAJOR, SNAPSHOT_MINOR, Snapshot, SnapshotWriter};
use crate::ui::UiHooks;

/// Whether a session is running. Recording and playback exclude each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Recording,
    Playing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Playing => "playback",
        })
    }
}

/// Where session snapshots live and how a recording starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventConfig {
    pub snapshot_dir: PathBuf,
    pub start_snapshot: String,
    pub end_snapshot: String,
    pub start_mode: StartMode,
}

impl EventConfig {
    pub fn from_resources(resources: &Resources) -> Self {
        Self {
            snapshot_dir: resources.event_snapshot_dir(),
            start_snapshot: resources.event_start_snapshot.clone(),
            end_snapshot: resources.event_end_snapshot.clone(),
            start_mode: resources.event_start_mode,
        }
    }

    pub fn snapshot_path(&self, file: &str) -> PathBuf {
        self.snapshot_dir.join(file)
    }

    pub fn start_path(&self) -> PathBuf {
        self.snapshot_path(&self.start_snapshot)
    }

    /// The end snapshot doubles as the milestone file.
    pub fn end_path(&self) -> PathBuf {
        self.snapshot_path(&self.end_snapshot)
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self::from_resources(&Resources::default())
    }
}

/// Records nondeterministic inputs against the machine clock and replays
/// them from an end snapshot.
///
/// One alarm drives both directions: while recording it fires once per
/// emulated second to append a TIMESTAMP; while playing it fires at the
/// clock of the next event in the list.
pub struct EventRecorder {
    config: EventConfig,
    state: SessionState,
    list: EventList,
    cursor: usize,
    alarm: AlarmId,
    next_timestamp_clk: Clock,
    milestone_timestamp_clk: Clock,
    current_timestamp: u32,
    milestone_timestamp: u32,
    playback_time: u32,
    playback_reset_ack: bool,
    images: ImageRegistry,
}

impl EventRecorder {
    pub fn new(cpu: &mut CpuContext, config: EventConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            list: EventList::new(),
            cursor: 0,
            alarm: cpu.int_status.alarm_new("Event"),
            next_timestamp_clk: 0,
            milestone_timestamp_clk: 0,
            current_timestamp: 0,
            milestone_timestamp: 0,
            playback_time: 0,
            playback_reset_ack: false,
            images: ImageRegistry::new(),
        }
    }

    pub fn config(&self) -> &EventConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EventConfig) {
        self.config = config;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == SessionState::Recording
    }

    pub fn is_playing(&self) -> bool {
        self.state == SessionState::Playing
    }

    pub fn list(&self) -> &EventList {
        &self.list
    }

    pub fn alarm(&self) -> AlarmId {
        self.alarm
    }

    pub fn images(&self) -> &ImageRegistry {
        &self.images
    }

    pub fn current_timestamp(&self) -> u32 {
        self.current_timestamp
    }

    /// Length of the loaded session in seconds.
    pub fn playback_time(&self) -> u32 {
        self.playback_time
    }

    pub fn next_timestamp_clk(&self) -> Clock {
        self.next_timestamp_clk
    }

    fn write_snapshot(
        &self,
        machine: &dyn Machine,
        path: &Path,
        with_events: bool,
    ) -> Result<(), EventError> {
        let mut writer = SnapshotWriter::new(SNAPSHOT_MAJOR, SNAPSHOT_MINOR, machine.name());
        machine
            .write_snapshot_modules(&mut writer)
            .and_then(|()| {
                if with_events {
                    self.list.write_module(&mut writer)
                } else {
                    Ok(())
                }
            })
            .and_then(|()| writer.save(path))
            .map_err(|source| EventError::SnapshotWriteFailed {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Load a snapshot into the machine. With `with_events` the EVENT module
    /// replaces the in-memory list; it is parsed before the machine is
    /// touched so a bad list leaves the machine as it was.
    fn read_snapshot(
        &mut self,
        machine: &mut dyn Machine,
        path: &Path,
        with_events: bool,
    ) -> Result<(), EventError> {
        let read_failed = |source| EventError::SnapshotReadFailed {
            path: path.to_path_buf(),
            source,
        };
        let snapshot = Snapshot::open(path).map_err(read_failed)?;
        snapshot.check_machine(machine.name()).map_err(read_failed)?;
        let list = if with_events {
            Some(EventList::read_module(&snapshot)?)
        } else {
            None
        };
        machine
            .read_snapshot_modules(&snapshot)
            .map_err(read_failed)?;
        if let Some(list) = list {
            self.playback_time = list.timestamp_count();
            self.list = list;
        }
        debug!("Event: loaded {}", path.display());
        Ok(())
    }

    fn arm(&self, cpu: &mut CpuContext, deadline: Clock) {
        cpu.int_status.set_alarm(self.alarm, deadline);
    }

    /// Start recording according to the configured start mode.
    pub fn record_start(
        &mut self,
        machine: &mut dyn Machine,
        ui: &mut dyn UiHooks,
    ) -> Result<(), EventError> {
        if self.state != SessionState::Idle {
            return Err(EventError::AlreadyActive(self.state));
        }
        let cps = machine.cycles_per_second();

        match self.config.start_mode {
            StartMode::SaveSnapshot => {
                self.write_snapshot(machine, &self.config.start_path(), false)?;
                self.list.clear();
                self.images.clear();
                self.state = SessionState::Recording;
                let clock = machine.cpu().clock;
                self.record(
                    clock,
                    EventKind::Initial(InitialMode::SaveSnapshot(
                        self.config.start_snapshot.clone(),
                    )),
                );
                self.next_timestamp_clk = clock.saturating_add(cps);
                self.current_timestamp = 0;
            }
            StartMode::LoadEndSnapshot => {
                self.read_snapshot(machine, &self.config.end_path(), true)?;
                self.list.warp_end();
                self.images.clear();
                self.state = SessionState::Recording;
                self.next_timestamp_clk = machine.cpu().clock.saturating_add(cps);
                self.current_timestamp = self.playback_time;
            }
            StartMode::HardReset => {
                machine.cpu_mut().trigger_reset(ResetMode::Hard);
                self.list.clear();
                self.images.clear();
                self.state = SessionState::Recording;
                // Stored at clock 0: it describes the state the reset produces.
                self.record(0, EventKind::Initial(InitialMode::HardReset));
                self.next_timestamp_clk = cps;
                self.current_timestamp = 0;
            }
        }

        self.milestone_timestamp_clk = 0;
        self.arm(machine.cpu_mut(), self.next_timestamp_clk);
        info!(
            "Event: recording started ({:?})",
            self.config.start_mode
        );
        ui.display_recording(true);
        Ok(())
    }

    /// Append one event at `clock`. Does nothing unless recording.
    pub fn record(&mut self, clock: Clock, kind: EventKind) {
        if self.state != SessionState::Recording {
            return;
        }
        if matches!(kind, EventKind::ResetCpu(_)) {
            // Timestamps keep their cadence across the reset that is coming.
            self.next_timestamp_clk = self.next_timestamp_clk.saturating_sub(clock);
        }
        #[cfg(feature = "event-trace")]
        trace!("Event: record {} at {clock}", kind.name());
        self.list.record(clock, kind);
    }

    /// Record an image attach. The image bytes are embedded the first time
    /// a file name is seen in this session.
    pub fn record_attach_image(
        &mut self,
        clock: Clock,
        unit: u8,
        path: &Path,
        read_only: bool,
    ) -> Result<(), EventError> {
        if self.state != SessionState::Recording {
            return Ok(());
        }
        let filename = path.to_string_lossy().into_owned();
        let image = if self.images.lookup(&filename).is_none() {
            let bytes = fs::read(path).map_err(|source| EventError::ImageIo {
                path: path.to_path_buf(),
                source,
            })?;
            self.images.append(&filename, path);
            Some(bytes)
        } else {
            None
        };
        self.record(
            clock,
            EventKind::AttachImage(ImageAttach {
                unit,
                read_only,
                filename,
                image,
            }),
        );
        Ok(())
    }

    /// Close the list and write the end snapshot. The session ends even if
    /// the write fails.
    pub fn record_stop(
        &mut self,
        machine: &mut dyn Machine,
        ui: &mut dyn UiHooks,
    ) -> Result<(), EventError> {
        if self.state != SessionState::Recording {
            return Err(EventError::NotActive(self.state));
        }
        let clock = machine.cpu().clock;
        self.record(clock, EventKind::ListEnd);
        let result = self.write_snapshot(machine, &self.config.end_path(), true);

        self.state = SessionState::Idle;
        machine.cpu_mut().int_status.unset_alarm(self.alarm);
        info!("Event: recording stopped, {} events", self.list.len());
        ui.display_recording(false);
        result
    }

    fn load_start_snapshot(
        &mut self,
        machine: &mut dyn Machine,
        name: &str,
    ) -> Result<(), EventError> {
        let primary = self.config.snapshot_path(name);
        match self.read_snapshot(machine, &primary, false) {
            Ok(()) => Ok(()),
            Err(err) => {
                let fallback = self.config.start_path();
                if fallback == primary {
                    return Err(err);
                }
                warn!("Event: {err}; trying {}", fallback.display());
                self.read_snapshot(machine, &fallback, false)
            }
        }
    }

    /// Load the end snapshot's event list and the start state it refers to,
    /// then replay.
    pub fn playback_start(
        &mut self,
        machine: &mut dyn Machine,
        ui: &mut dyn UiHooks,
    ) -> Result<(), EventError> {
        if self.state != SessionState::Idle {
            return Err(EventError::AlreadyActive(self.state));
        }

        let end_path = self.config.end_path();
        let read_failed = |source| EventError::SnapshotReadFailed {
            path: end_path.clone(),
            source,
        };
        let snapshot = Snapshot::open(&end_path).map_err(read_failed)?;
        snapshot.check_machine(machine.name()).map_err(read_failed)?;
        let list = EventList::read_module(&snapshot)?;

        self.playback_time = list.timestamp_count();
        self.list = list;
        self.images.clear();
        self.cursor = 0;
        self.playback_reset_ack = false;

        let initial = match self.list.get(0).map(|e| &e.kind) {
            Some(EventKind::Initial(mode)) => Some(mode.clone()),
            _ => None,
        };
        match initial {
            Some(InitialMode::SaveSnapshot(name)) => {
                self.load_start_snapshot(machine, &name)?;
                self.cursor = 1;
                self.next_alarm_set(machine.cpu_mut());
            }
            Some(InitialMode::HardReset) => {
                machine.cpu_mut().trigger_reset(ResetMode::Hard);
                self.cursor = 1;
                // Armed by reset_ack once the reset has happened.
                self.playback_reset_ack = true;
            }
            _ => {
                let start = self.config.start_path();
                self.read_snapshot(machine, &start, false)?;
                self.next_alarm_set(machine.cpu_mut());
            }
        }

        self.state = SessionState::Playing;
        self.current_timestamp = 0;
        info!(
            "Event: playback started, {} events, {}s",
            self.list.len(),
            self.playback_time
        );
        ui.display_playback(true);
        Ok(())
    }

    pub fn playback_stop(
        &mut self,
        machine: &mut dyn Machine,
        ui: &mut dyn UiHooks,
    ) -> Result<(), EventError> {
        if self.state != SessionState::Playing {
            return Err(EventError::NotActive(self.state));
        }
        self.state = SessionState::Idle;
        self.playback_reset_ack = false;
        machine.cpu_mut().int_status.unset_alarm(self.alarm);
        info!("Event: playback stopped");
        ui.display_playback(false);
        Ok(())
    }

    /// Arm the alarm at the clock of the event under the cursor, corrected
    /// for a clock rebase that happened after the event was recorded.
    fn next_alarm_set(&self, cpu: &mut CpuContext) {
        let Some(event) = self.list.get(self.cursor) else {
            cpu.int_status.unset_alarm(self.alarm);
            return;
        };
        let mut deadline = event.clock;
        if cpu.clock > CLKGUARD_SUB_MIN && deadline < cpu.clock - CLKGUARD_SUB_MIN {
            deadline = deadline.saturating_add(cpu.clock_guard.clock_sub());
        }
        cpu.int_status.set_alarm(self.alarm, deadline);
    }

    /// The event alarm fired.
    pub fn on_alarm(&mut self, machine: &mut dyn Machine, ui: &mut dyn UiHooks) {
        machine.cpu_mut().int_status.unset_alarm(self.alarm);

        match self.state {
            SessionState::Idle => {}
            SessionState::Recording => {
                let clock = machine.cpu().clock;
                self.record(clock, EventKind::Timestamp);
                ui.display_event_time(self.current_timestamp, 0);
                self.current_timestamp += 1;
                self.next_timestamp_clk = self
                    .next_timestamp_clk
                    .saturating_add(machine.cycles_per_second());
                self.arm(machine.cpu_mut(), self.next_timestamp_clk);
            }
            SessionState::Playing => {
                let Some(kind) = self.list.get(self.cursor).map(|e| e.kind.clone()) else {
                    warn!("Event: list ended without LIST_END");
                    let _ = self.playback_stop(machine, ui);
                    return;
                };
                match kind {
                    EventKind::ListEnd => {
                        let _ = self.playback_stop(machine, ui);
                        return;
                    }
                    EventKind::ResetCpu(mode) => {
                        // The cursor moves on in reset_ack.
                        machine.cpu_mut().trigger_reset(mode);
                        return;
                    }
                    EventKind::Timestamp => {
                        ui.display_event_time(self.current_timestamp, self.playback_time);
                        self.current_timestamp += 1;
                    }
                    other => self.play_event(&other, machine, ui),
                }
                self.cursor += 1;
                self.next_alarm_set(machine.cpu_mut());
            }
        }
    }

    /// Apply the effect of one event to the machine. Failures are reported
    /// through `ui` and only skip this event.
    pub fn play_event(&mut self, kind: &EventKind, machine: &mut dyn Machine, ui: &mut dyn UiHooks) {
        #[cfg(feature = "event-trace")]
        trace!("Event: play {} at {}", kind.name(), machine.cpu().clock);
        match kind {
            EventKind::KeyboardMatrix(matrix) => machine.set_keyboard_matrix(matrix),
            EventKind::KeyboardRestore(pressed) => machine.set_restore_key(*pressed),
            EventKind::JoystickValue(values) => machine.set_joystick(values),
            EventKind::Datasette(command) => machine.datasette_control(*command),
            EventKind::AttachDisk { unit, filename } => {
                if let Err(err) = machine.attach_disk(*unit, Path::new(filename), false) {
                    ui.error(&format!("Could not attach {filename}: {err}"));
                }
            }
            EventKind::AttachTape { filename } => {
                if let Err(err) = machine.attach_tape(Path::new(filename)) {
                    ui.error(&format!("Could not attach {filename}: {err}"));
                }
            }
            EventKind::AttachImage(attach) => self.play_attach_image(attach, machine, ui),
            EventKind::ResetCpu(mode) => machine.cpu_mut().trigger_reset(*mode),
            EventKind::Resource { name, value } => {
                if !machine.set_resource(name, value) {
                    warn!("Event: resource '{name}' not known to this machine");
                }
            }
            EventKind::Unknown { code, .. } => {
                warn!("Event: skipping unknown event type {code}");
            }
            EventKind::ListEnd
            | EventKind::Timestamp
            | EventKind::Initial(_)
            | EventKind::SyncTest(_) => {}
        }
    }

    fn play_attach_image(
        &mut self,
        attach: &ImageAttach,
        machine: &mut dyn Machine,
        ui: &mut dyn UiHooks,
    ) {
        let path = match &attach.image {
            Some(bytes) => self.images.materialize(
                &self.config.snapshot_dir,
                attach.unit,
                &attach.filename,
                bytes,
            ),
            None => self
                .images
                .lookup(&attach.filename)
                .map(Path::to_path_buf)
                .ok_or_else(|| EventError::ImageNotMapped(attach.filename.clone())),
        };
        let path = match path {
            Ok(path) => path,
            Err(err) => {
                ui.error(&format!("Cannot attach event image: {err}"));
                return;
            }
        };
        let result = if attach.unit == 1 {
            machine.attach_tape(&path)
        } else {
            machine.attach_disk(attach.unit, &path, attach.read_only)
        };
        if let Err(err) = result {
            ui.error(&format!("Could not attach {}: {err}", path.display()));
        }
    }

    /// Called after every CPU reset.
    pub fn reset_ack(&mut self, cpu: &mut CpuContext) {
        if self.playback_reset_ack {
            self.playback_reset_ack = false;
            self.next_alarm_set(cpu);
        } else if self.state == SessionState::Playing
            && matches!(
                self.list.get(self.cursor).map(|e| &e.kind),
                Some(EventKind::ResetCpu(_))
            )
        {
            self.cursor += 1;
            self.next_alarm_set(cpu);
        }

        if self.state == SessionState::Recording {
            self.arm(cpu, self.next_timestamp_clk);
        }
    }

    /// Re-arm after the alarm table was cleared by something other than a
    /// reset (a snapshot load outside this recorder).
    pub fn rearm(&mut self, cpu: &mut CpuContext) {
        match self.state {
            SessionState::Idle => {}
            SessionState::Recording => self.arm(cpu, self.next_timestamp_clk),
            SessionState::Playing if !self.playback_reset_ack => self.next_alarm_set(cpu),
            SessionState::Playing => {}
        }
    }

    /// Save a checkpoint of the running recording.
    pub fn set_milestone(&mut self, machine: &mut dyn Machine) -> Result<(), EventError> {
        if self.state != SessionState::Recording {
            return Err(EventError::NotActive(self.state));
        }
        self.write_snapshot(machine, &self.config.end_path(), true)?;
        self.milestone_timestamp_clk = self.next_timestamp_clk;
        self.milestone_timestamp = self.current_timestamp;
        info!("Event: milestone set at clock {}", machine.cpu().clock);
        Ok(())
    }

    /// Rewind the running recording to the last checkpoint. If the
    /// checkpoint cannot be read, recording stays disabled.
    pub fn reset_milestone(
        &mut self,
        machine: &mut dyn Machine,
        ui: &mut dyn UiHooks,
    ) -> Result<(), EventError> {
        if self.state != SessionState::Recording {
            return Err(EventError::NotActive(self.state));
        }

        // Nothing may be recorded while the snapshot is being read.
        self.state = SessionState::Idle;
        if let Err(err) = self.read_snapshot(machine, &self.config.end_path(), true) {
            warn!("Event: milestone reload failed, recording disabled: {err}");
            machine.cpu_mut().int_status.unset_alarm(self.alarm);
            ui.display_recording(false);
            return Err(err);
        }
        self.list.warp_end();
        self.state = SessionState::Recording;

        if self.milestone_timestamp_clk > 0 {
            self.next_timestamp_clk = self.milestone_timestamp_clk;
            self.current_timestamp = self.milestone_timestamp;
        } else {
            self.next_timestamp_clk = machine
                .cpu()
                .clock
                .saturating_add(machine.cycles_per_second());
        }
        self.arm(machine.cpu_mut(), self.next_timestamp_clk);
        info!("Event: rewound to milestone at clock {}", machine.cpu().clock);
        Ok(())
    }

    /// Follow a clock rebase of `sub` cycles.
    pub fn rebase(&mut self, sub: Clock) {
        if sub == 0 {
            return;
        }
        self.next_timestamp_clk = self.next_timestamp_clk.saturating_sub(sub);
        if self.milestone_timestamp_clk > 0 {
            self.milestone_timestamp_clk = self.milestone_timestamp_clk.saturating_sub(sub);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joystick::JoystickValues;
    use crate::machine::HeadlessMachine;
    use crate::ui::CollectingUi;

    fn setup(dir: &Path, mode: StartMode) -> (HeadlessMachine, EventRecorder) {
        let mut machine = HeadlessMachine::new();
        let config = EventConfig {
            snapshot_dir: dir.to_path_buf(),
            start_snapshot: "start.vsf".into(),
            end_snapshot: "end.vsf".into(),
            start_mode: mode,
        };
        let recorder = EventRecorder::new(machine.cpu_mut(), config);
        (machine, recorder)
    }

    #[test]
    fn record_is_noop_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut rec) = setup(dir.path(), StartMode::SaveSnapshot);
        rec.record(10, EventKind::KeyboardRestore(true));
        assert!(rec.list().is_empty());
    }

    #[test]
    fn save_snapshot_start_writes_initial_and_arms_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, mut rec) = setup(dir.path(), StartMode::SaveSnapshot);
        let mut ui = CollectingUi::default();
        m.execute(500);

        rec.record_start(&mut m, &mut ui).unwrap();
        assert!(dir.path().join("start.vsf").exists());
        assert_eq!(
            rec.list().get(0).map(|e| (&e.kind, e.clock)),
            Some((
                &EventKind::Initial(InitialMode::SaveSnapshot("start.vsf".into())),
                500
            ))
        );
        assert_eq!(
            m.cpu().int_status.alarm_clk(rec.alarm()),
            500 + m.cycles_per_second()
        );
        assert_eq!(ui.recording, Some(true));
    }

    #[test]
    fn timestamp_alarm_appends_and_rearms() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, mut rec) = setup(dir.path(), StartMode::SaveSnapshot);
        let mut ui = CollectingUi::default();
        rec.record_start(&mut m, &mut ui).unwrap();

        let cps = m.cycles_per_second();
        m.execute(cps);
        rec.on_alarm(&mut m, &mut ui);
        assert_eq!(rec.list().timestamp_count(), 1);
        assert_eq!(ui.event_time, Some((0, 0)));
        assert_eq!(m.cpu().int_status.alarm_clk(rec.alarm()), 2 * cps);
    }

    #[test]
    fn reset_event_rewinds_timestamp_base() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, mut rec) = setup(dir.path(), StartMode::SaveSnapshot);
        let mut ui = CollectingUi::default();
        rec.record_start(&mut m, &mut ui).unwrap();
        let cps = m.cycles_per_second();

        m.execute(1000);
        rec.record(1000, EventKind::ResetCpu(ResetMode::Soft));
        assert_eq!(rec.next_timestamp_clk(), cps - 1000);

        m.reset(ResetMode::Soft);
        rec.reset_ack(m.cpu_mut());
        assert_eq!(m.cpu().int_status.alarm_clk(rec.alarm()), cps - 1000);
    }

    #[test]
    fn stop_without_session_is_not_active() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, mut rec) = setup(dir.path(), StartMode::SaveSnapshot);
        let mut ui = CollectingUi::default();
        assert!(matches!(
            rec.record_stop(&mut m, &mut ui),
            Err(EventError::NotActive(SessionState::Idle))
        ));
        assert!(matches!(
            rec.playback_stop(&mut m, &mut ui),
            Err(EventError::NotActive(SessionState::Idle))
        ));
        assert!(rec.set_milestone(&mut m).is_err());
    }

    #[test]
    fn record_stop_goes_idle_even_when_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, mut rec) = setup(dir.path(), StartMode::HardReset);
        let mut ui = CollectingUi::default();
        rec.record_start(&mut m, &mut ui).unwrap();

        let mut config = rec.config().clone();
        config.snapshot_dir = dir.path().join("missing");
        rec.set_config(config);
        assert!(matches!(
            rec.record_stop(&mut m, &mut ui),
            Err(EventError::SnapshotWriteFailed { .. })
        ));
        assert_eq!(rec.state(), SessionState::Idle);
        assert!(!m.cpu().int_status.is_alarm_set(rec.alarm()));
    }

    #[test]
    fn playback_without_end_snapshot_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, mut rec) = setup(dir.path(), StartMode::SaveSnapshot);
        let mut ui = CollectingUi::default();
        assert!(matches!(
            rec.playback_start(&mut m, &mut ui),
            Err(EventError::SnapshotReadFailed { .. })
        ));
        assert_eq!(rec.state(), SessionState::Idle);
    }

    #[test]
    fn attach_image_embeds_bytes_once() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("game.d64");
        fs::write(&image, [7u8; 32]).unwrap();
        let (mut m, mut rec) = setup(dir.path(), StartMode::HardReset);
        let mut ui = CollectingUi::default();
        rec.record_start(&mut m, &mut ui).unwrap();

        rec.record_attach_image(100, 8, &image, false).unwrap();
        rec.record_attach_image(200, 8, &image, true).unwrap();

        let attaches: Vec<_> = rec
            .list()
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::AttachImage(a) => Some(a.image.as_ref().map(Vec::len)),
                _ => None,
            })
            .collect();
        assert_eq!(attaches, vec![Some(32), None]);

        let missing = dir.path().join("nope.d64");
        assert!(matches!(
            rec.record_attach_image(300, 8, &missing, false),
            Err(EventError::ImageIo { .. })
        ));
    }

    #[test]
    fn replayed_unmapped_image_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, mut rec) = setup(dir.path(), StartMode::SaveSnapshot);
        let mut ui = CollectingUi::default();
        rec.play_event(
            &EventKind::AttachImage(ImageAttach {
                unit: 8,
                read_only: false,
                filename: "gone.d64".into(),
                image: None,
            }),
            &mut m,
            &mut ui,
        );
        assert_eq!(ui.errors.len(), 1);
        assert!(m.disk(8).is_none());
    }

    #[test]
    fn replayed_embedded_image_is_materialized_and_attached() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, mut rec) = setup(dir.path(), StartMode::SaveSnapshot);
        let mut ui = CollectingUi::default();
        rec.play_event(
            &EventKind::AttachImage(ImageAttach {
                unit: 1,
                read_only: false,
                filename: "/elsewhere/demo.tap".into(),
                image: Some(vec![1, 2, 3]),
            }),
            &mut m,
            &mut ui,
        );
        assert!(ui.errors.is_empty());
        assert_eq!(m.tape(), Some(dir.path().join("event-image-1-0.tap").as_path()));
    }

    #[test]
    fn joystick_replay_reaches_machine() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, mut rec) = setup(dir.path(), StartMode::SaveSnapshot);
        let mut ui = CollectingUi::default();
        rec.play_event(
            &EventKind::JoystickValue(JoystickValues([0, 0x10, 0])),
            &mut m,
            &mut ui,
        );
        assert_eq!(m.joystick().port(1), 0x10);
    }

    #[test]
    fn rebase_moves_timestamp_deadlines() {
        let dir = tempfile::tempdir().unwrap();
        let (mut m, mut rec) = setup(dir.path(), StartMode::HardReset);
        let mut ui = CollectingUi::default();
        rec.record_start(&mut m, &mut ui).unwrap();
        let before = rec.next_timestamp_clk();
        rec.rebase(100);
        assert_eq!(rec.next_timestamp_clk(), before - 100);
        rec.rebase(0);
        assert_eq!(rec.next_timestamp_clk(), before - 100);
    }
}
