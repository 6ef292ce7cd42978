//! Two emulators in lock-step over a loopback connection: handshake, input
//! from both sides, suspend notices, hang-ups and sync loss.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use cbm_emu_core::clock::Clock;
use cbm_emu_core::datasette::DatasetteCommand;
use cbm_emu_core::emulator::Emulator;
use cbm_emu_core::joystick::{JOY_FIRE, JOY_LEFT, JOY_UP};
use cbm_emu_core::machine::{CpuRegisters, HeadlessMachine, Machine};
use cbm_emu_core::resources::Resources;
use cbm_emu_core::ui::CollectingUi;
use cbm_emu_net::netplay::{Netplay, NetplayConfig};
use cbm_emu_net::{NetworkError, NetworkMode};

type TestEmulator = Emulator<HeadlessMachine, CollectingUi>;

const FRAMES: u64 = 30;
const MAX_TICKS: u64 = 500;

fn emulator() -> TestEmulator {
    Emulator::with_ui(
        HeadlessMachine::new(),
        Resources::default(),
        CollectingUi::default(),
    )
}

fn config(port: u16) -> NetplayConfig {
    NetplayConfig {
        server_name: "127.0.0.1".to_string(),
        bind_address: "127.0.0.1".to_string(),
        port,
        frame_timeout: Duration::from_secs(5),
        ..NetplayConfig::default()
    }
}

#[derive(Debug, PartialEq)]
struct EndState {
    clock: Clock,
    registers: CpuRegisters,
    joystick: [u8; 3],
    restore: bool,
    datasette: DatasetteCommand,
    server_key: bool,
    client_key: bool,
}

fn end_state(emu: &TestEmulator) -> EndState {
    let machine = emu.machine();
    EndState {
        clock: emu.clock(),
        registers: emu.registers(),
        joystick: machine.joystick().0,
        restore: machine.restore_pressed(),
        datasette: machine.datasette(),
        server_key: machine.keyboard().is_pressed(1, 1),
        client_key: machine.keyboard().is_pressed(2, 2),
    }
}

/// Listen on an ephemeral port and wait for one client. `port_tx` gets the
/// port once the server is listening.
fn serve(emu: &mut TestEmulator, port_tx: mpsc::Sender<u16>) -> Netplay {
    let mut net = Netplay::new(config(0));
    net.start_server(emu).unwrap();
    assert_eq!(net.mode(), NetworkMode::Server);
    port_tx.send(net.local_addr().unwrap().port()).unwrap();

    let mut ticks = 0;
    while !net.is_connected() {
        emu.run_frame();
        net.hook(emu).unwrap();
        thread::sleep(Duration::from_millis(1));
        ticks += 1;
        assert!(ticks < 10_000, "no client showed up");
    }
    net
}

fn join(port_rx: mpsc::Receiver<u16>) -> (TestEmulator, Netplay) {
    let port = port_rx.recv().unwrap();
    let mut emu = emulator();
    let mut net = Netplay::new(config(port));
    net.connect(&mut emu).unwrap();
    assert_eq!(net.mode(), NetworkMode::Client);
    (emu, net)
}

/// Run frames until `FRAMES` of both peers have been replayed. `input` is
/// called before every frame with the number of frames run so far.
fn play(
    emu: &mut TestEmulator,
    net: &mut Netplay,
    mut input: impl FnMut(&mut TestEmulator, &mut Netplay, u64),
) {
    let mut tick = 0;
    while net.frames_played() < FRAMES {
        input(emu, net, tick);
        emu.run_frame();
        net.hook(emu).unwrap();
        tick += 1;
        assert!(tick < MAX_TICKS);
    }
}

#[test]
fn peers_stay_in_lock_step() {
    let (port_tx, port_rx) = mpsc::channel();

    let server = thread::spawn(move || {
        let mut emu = emulator();
        // State the client can only get from the snapshot.
        emu.run_until(50_000);
        emu.set_restore(true);
        emu.set_restore(false);

        let mut net = serve(&mut emu, port_tx);
        play(&mut emu, &mut net, |emu, _, tick| match tick {
            3 => emu.set_joystick(2, JOY_FIRE),
            6 => emu.set_key(1, 1, true),
            // Port 1 belongs to the client.
            8 => emu.set_joystick(1, JOY_LEFT),
            _ => {}
        });
        (emu, net)
    });

    let client = thread::spawn(move || {
        let (mut emu, mut net) = join(port_rx);
        play(&mut emu, &mut net, |emu, net, tick| match tick {
            2 => emu.set_joystick(1, JOY_UP),
            5 => emu.set_key(2, 2, true),
            // The client controls no devices.
            7 => emu.datasette_control(DatasetteCommand::Start),
            9 => emu.set_restore(true),
            12 => {
                net.suspend().unwrap();
                assert!(net.is_suspended());
                thread::sleep(Duration::from_millis(200));
            }
            _ => {}
        });
        assert!(!net.is_suspended());
        (emu, net)
    });

    let (mut server_emu, mut server_net) = server.join().unwrap();
    let (mut client_emu, mut client_net) = client.join().unwrap();

    assert_eq!(server_net.frame_delta(), client_net.frame_delta());
    assert!(server_net.peer_addr().is_some());

    // Both stopped at the hook that replayed the same frame.
    let server_state = end_state(&server_emu);
    let client_state = end_state(&client_emu);
    assert_eq!(server_state.joystick, [0, JOY_UP, JOY_FIRE]);
    assert_eq!(client_state.joystick, [0, JOY_UP, JOY_FIRE]);
    assert!(server_state.restore && client_state.restore);
    assert_eq!(server_state.datasette, DatasetteCommand::Stop);
    assert_eq!(client_state.datasette, DatasetteCommand::Stop);
    // Keyboard events carry the sender's whole matrix, and the server's
    // came a frame later.
    assert!(server_state.server_key && !server_state.client_key);
    assert_eq!(server_state.clock, client_state.clock);
    assert_eq!(server_state.registers, client_state.registers);

    assert!(
        server_emu
            .ui()
            .statuses
            .iter()
            .any(|s| s == "Remote host suspending...")
    );
    assert!(!server_net.is_remote_suspended());

    // The client leaves; the server plays out what is buffered and goes
    // back to listening.
    client_net.disconnect(&mut client_emu);
    assert_eq!(client_net.mode(), NetworkMode::Idle);
    assert!(!client_emu.is_network_capture());

    let mut result = Ok(());
    for _ in 0..MAX_TICKS {
        server_emu.run_frame();
        result = server_net.hook(&mut server_emu);
        if result.is_err() {
            break;
        }
    }
    assert!(matches!(result, Err(NetworkError::Disconnected)));
    assert_eq!(server_net.mode(), NetworkMode::Server);
    assert!(server_net.local_addr().is_some());
    assert!(
        server_emu
            .ui()
            .statuses
            .iter()
            .any(|s| s == "Remote host disconnected.")
    );

    server_net.shutdown(&mut server_emu);
    assert_eq!(server_net.mode(), NetworkMode::Idle);
    assert!(server_net.local_addr().is_none());
}

/// Run until the session ends, calling `poke` before every frame.
fn run_until_error(
    emu: &mut TestEmulator,
    net: &mut Netplay,
    mut poke: impl FnMut(&mut TestEmulator, u64),
) -> NetworkError {
    for tick in 0..MAX_TICKS {
        poke(emu, tick);
        emu.run_frame();
        if let Err(e) = net.hook(emu) {
            return e;
        }
    }
    panic!("session did not end");
}

#[test]
fn diverging_machines_are_detected() {
    let (port_tx, port_rx) = mpsc::channel();

    let server = thread::spawn(move || {
        let mut emu = emulator();
        let mut net = serve(&mut emu, port_tx);
        let err = run_until_error(&mut emu, &mut net, |_, _| {});
        (err, emu, net)
    });

    let client = thread::spawn(move || {
        let (mut emu, mut net) = join(port_rx);
        // Bypasses the network frames, so only this side sees it.
        let err = run_until_error(&mut emu, &mut net, |emu, tick| {
            if tick == 4 {
                emu.machine_mut().set_restore_key(true);
            }
        });
        (err, emu, net)
    });

    let (server_err, server_emu, server_net) = server.join().unwrap();
    let (client_err, client_emu, client_net) = client.join().unwrap();

    for err in [&server_err, &client_err] {
        assert!(
            matches!(err, NetworkError::OutOfSync | NetworkError::Disconnected),
            "unexpected {err}"
        );
    }
    let out_of_sync = "Network out of sync - disconnecting.".to_string();
    let mut detected = false;
    for (err, emu) in [(&server_err, &server_emu), (&client_err, &client_emu)] {
        if matches!(err, NetworkError::OutOfSync) {
            detected = true;
            assert!(emu.ui().errors.contains(&out_of_sync));
        }
    }
    assert!(detected);
    assert_eq!(server_net.mode(), NetworkMode::Server);
    assert_eq!(client_net.mode(), NetworkMode::Idle);
}

#[test]
fn second_server_on_a_taken_port_fails() {
    let mut emu = emulator();
    let mut first = Netplay::new(config(0));
    first.start_server(&mut emu).unwrap();
    let port = first.local_addr().unwrap().port();

    let mut second = Netplay::new(config(port));
    let err = second.start_server(&mut emu).unwrap_err();
    assert!(matches!(err, NetworkError::Bind { .. }), "unexpected {err}");
    assert_eq!(second.mode(), NetworkMode::Idle);
    assert!(
        emu.ui()
            .errors
            .iter()
            .any(|e| e.starts_with("Cannot start netplay server"))
    );

    assert!(matches!(
        first.start_server(&mut emu),
        Err(NetworkError::WrongMode(NetworkMode::Server))
    ));
}
