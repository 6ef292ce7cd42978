//! Recording a session and playing it back through the `Emulator` facade.

use std::fs;
use std::path::Path;

use cbm_emu_core::clock::Clock;
use cbm_emu_core::cpu::ResetMode;
use cbm_emu_core::datasette::DatasetteCommand;
use cbm_emu_core::emulator::Emulator;
use cbm_emu_core::event::{EventError, EventKind, EventList, SessionState, StartMode};
use cbm_emu_core::joystick::{JOY_FIRE, JOY_UP};
use cbm_emu_core::keyboard::DEFAULT_LATCH_DELAY;
use cbm_emu_core::machine::HeadlessMachine;
use cbm_emu_core::resources::Resources;
use cbm_emu_core::snapshot::Snapshot;
use cbm_emu_core::ui::CollectingUi;

type TestEmulator = Emulator<HeadlessMachine, CollectingUi>;

fn emulator(dir: &Path, mode: StartMode) -> TestEmulator {
    let resources = Resources {
        event_snapshot_dir: dir.to_string_lossy().into_owned(),
        event_start_mode: mode,
        ..Resources::default()
    };
    Emulator::with_ui(HeadlessMachine::new(), resources, CollectingUi::default())
}

/// Raw `(type, clock, data)` tuples of the EVENT module in `path`.
fn event_tuples(path: &Path) -> Vec<(u32, u32, Vec<u8>)> {
    let snapshot = Snapshot::open(path).unwrap();
    let mut module = snapshot.module("EVENT").unwrap();
    let len = module.remaining();
    let bytes = module.read_bytes(len).unwrap();

    let word = |at: usize| u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
    let mut tuples = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let (code, clock, size) = (word(pos), word(pos + 4), word(pos + 8) as usize);
        pos += 12;
        tuples.push((code, clock, bytes[pos..pos + size].to_vec()));
        pos += size;
    }
    tuples
}

const FRAMES: u32 = 120;

fn scripted_input(emu: &mut TestEmulator, frame: u32, disk: &Path) {
    match frame {
        3 => emu.set_key(1, 4, true),
        5 => emu.set_key(1, 4, false),
        10 => emu.set_joystick(2, JOY_FIRE | JOY_UP),
        14 => emu.set_joystick(2, 0),
        20 => emu.set_restore(true),
        21 => emu.set_restore(false),
        30 => emu.datasette_control(DatasetteCommand::Start),
        40 => emu.attach_image(8, disk, true).unwrap(),
        60 => emu.trigger_reset(ResetMode::Soft),
        70 => emu.set_key(7, 7, true),
        80 => emu.attach_image(8, disk, false).unwrap(),
        95 => emu.set_joystick(1, JOY_FIRE),
        _ => {}
    }
}

#[test]
fn playback_reproduces_recorded_machine_state() {
    let dir = tempfile::tempdir().unwrap();
    let disk = dir.path().join("game.d64");
    fs::write(&disk, b"not really a disk image").unwrap();

    let mut rec = emulator(dir.path(), StartMode::SaveSnapshot);
    rec.run_until(12_345);
    rec.set_restore(true);
    rec.run_until(20_000);
    rec.record_start().unwrap();
    for frame in 0..FRAMES {
        scripted_input(&mut rec, frame, &disk);
        rec.run_frame();
    }
    rec.record_stop().unwrap();
    let end_clock = rec.clock();
    let end_regs = rec.registers();

    // The original disk must not be needed on replay.
    fs::remove_file(&disk).unwrap();

    let mut play = emulator(dir.path(), StartMode::SaveSnapshot);
    play.playback_start().unwrap();
    assert_eq!(play.clock(), 20_000);
    for _ in 0..FRAMES {
        assert!(play.events().is_playing());
        play.run_frame();
    }

    assert_eq!(play.events().state(), SessionState::Idle);
    assert_eq!(play.clock(), end_clock);
    assert_eq!(play.registers(), end_regs);
    assert_eq!(play.machine().resets(), 1);
    assert!(play.machine().keyboard().is_pressed(7, 7));
    assert_eq!(play.machine().datasette(), DatasetteCommand::Start);
    assert_eq!(play.machine().joystick().port(1), JOY_FIRE);
    assert!(play.ui().errors.is_empty());
    assert_eq!(play.ui().playback, Some(false));
    // Two TIMESTAMPs fit in 120 frames.
    assert_eq!(play.events().playback_time(), 2);
}

#[test]
fn playback_with_different_input_diverges() {
    let dir = tempfile::tempdir().unwrap();

    let mut rec = emulator(dir.path(), StartMode::SaveSnapshot);
    rec.record_start().unwrap();
    rec.run_frame();
    rec.set_key(0, 1, true);
    rec.run_frame();
    rec.record_stop().unwrap();

    let mut other = emulator(dir.path(), StartMode::SaveSnapshot);
    other.run_frame();
    other.set_key(0, 2, true);
    other.run_frame();

    assert_eq!(other.clock(), rec.clock());
    assert_ne!(other.registers(), rec.registers());
}

#[test]
fn hard_reset_session_writes_three_tuples() {
    let dir = tempfile::tempdir().unwrap();
    let mut emu = emulator(dir.path(), StartMode::HardReset);

    emu.record_start().unwrap();
    // Carry out the reset the session starts with.
    emu.run_until(0);
    assert_eq!(emu.machine().resets(), 1);

    emu.run_until(1000 - DEFAULT_LATCH_DELAY);
    emu.set_joystick(1, 0x10);
    emu.run_until(1000);
    emu.record_stop().unwrap();

    let tuples = event_tuples(&dir.path().join("end.vsf"));
    assert_eq!(
        tuples,
        vec![
            (9, 0, vec![2]),
            (3, 1000, vec![0, 0x10, 0]),
            (0, 1000, vec![]),
        ]
    );
}

#[test]
fn hard_reset_session_plays_back() {
    let dir = tempfile::tempdir().unwrap();
    let mut rec = emulator(dir.path(), StartMode::HardReset);
    rec.run_until(50_000);
    rec.record_start().unwrap();
    for frame in 0..10 {
        if frame == 4 {
            rec.set_key(3, 3, true);
        }
        rec.run_frame();
    }
    rec.record_stop().unwrap();

    let mut play = emulator(dir.path(), StartMode::HardReset);
    play.run_until(777);
    play.playback_start().unwrap();
    for _ in 0..10 {
        play.run_frame();
    }
    assert_eq!(play.events().state(), SessionState::Idle);
    assert_eq!(play.clock(), rec.clock());
    assert_eq!(play.registers(), rec.registers());
}

#[test]
fn recorded_clocks_never_decrease() {
    let dir = tempfile::tempdir().unwrap();
    let mut emu = emulator(dir.path(), StartMode::SaveSnapshot);
    emu.record_start().unwrap();
    for frame in 0..200u32 {
        if frame % 7 == 0 {
            emu.set_key((frame % 8) as u8, 2, frame % 14 == 0);
        }
        if frame % 11 == 0 {
            emu.set_joystick(1, (frame % 32) as u8);
            emu.set_joystick(2, 0x10);
        }
        if frame % 50 == 0 {
            emu.set_restore(frame % 100 == 0);
        }
        emu.run_frame();
    }
    emu.record_stop().unwrap();

    let snapshot = Snapshot::open(&dir.path().join("end.vsf")).unwrap();
    let list = EventList::read_module(&snapshot).unwrap();
    assert!(list.len() > 40);
    let clocks: Vec<Clock> = list.iter().map(|e| e.clock).collect();
    assert!(clocks.windows(2).all(|w| w[0] <= w[1]), "{clocks:?}");
    assert_eq!(list.last().map(|e| &e.kind), Some(&EventKind::ListEnd));
}

#[test]
fn sessions_exclude_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let mut emu = emulator(dir.path(), StartMode::SaveSnapshot);
    emu.record_start().unwrap();
    emu.run_frame();
    emu.record_stop().unwrap();

    emu.record_start().unwrap();
    let before = emu.events().list().clone();
    assert!(matches!(
        emu.playback_start(),
        Err(EventError::AlreadyActive(SessionState::Recording))
    ));
    assert!(matches!(
        emu.record_start(),
        Err(EventError::AlreadyActive(SessionState::Recording))
    ));
    assert_eq!(emu.events().list(), &before);
    assert!(emu.events().is_recording());
    emu.record_stop().unwrap();

    emu.playback_start().unwrap();
    let before = emu.events().list().clone();
    assert!(matches!(
        emu.record_start(),
        Err(EventError::AlreadyActive(SessionState::Playing))
    ));
    assert_eq!(emu.events().list(), &before);
    assert!(emu.events().is_playing());
}

#[test]
fn milestone_reset_restores_log_and_clock() {
    let dir = tempfile::tempdir().unwrap();
    let mut emu = emulator(dir.path(), StartMode::SaveSnapshot);
    emu.record_start().unwrap();
    for frame in 0..30 {
        if frame % 5 == 0 {
            emu.set_joystick(1, frame as u8);
        }
        emu.run_frame();
    }

    emu.set_milestone().unwrap();
    let list = emu.events().list().clone();
    let clock = emu.clock();
    let regs = emu.registers();

    emu.reset_milestone().unwrap();
    assert_eq!(emu.events().list(), &list);
    assert_eq!(emu.clock(), clock);
    assert_eq!(emu.registers(), regs);
    assert!(emu.events().is_recording());

    // Work done after the milestone is discarded by the rewind.
    for _ in 0..10 {
        emu.set_key(2, 2, true);
        emu.run_frame();
    }
    emu.reset_milestone().unwrap();
    assert_eq!(emu.events().list(), &list);
    assert_eq!(emu.clock(), clock);
    assert!(!emu.machine().keyboard().is_pressed(2, 2));
}

#[test]
fn missing_end_snapshot_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut emu = emulator(dir.path(), StartMode::SaveSnapshot);
    let err = emu.playback_start().unwrap_err();
    assert!(matches!(err, EventError::SnapshotReadFailed { .. }));
    assert_eq!(emu.ui().errors.len(), 1);
    assert_eq!(emu.events().state(), SessionState::Idle);
}
