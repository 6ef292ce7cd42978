//! IEEE-488 handshake driven from the controller side.

use cbm_emu_core::parallel::{
    BusLine, BusState, PARALLEL_CPU, PARALLEL_EMU, ParallelBus, ParallelDevice, STATUS_EOI,
};

const LISTEN_8: u8 = 0x28;
const TALK_8: u8 = 0x48;

/// A drive that listens to everything and talks from a fixed buffer.
#[derive(Default)]
struct Drive {
    commands: Vec<u8>,
    data: Vec<u8>,
    talk: Vec<u8>,
    pos: usize,
}

impl ParallelDevice for Drive {
    fn attention(&mut self, byte: u8) -> u16 {
        self.commands.push(byte);
        match byte & 0xF0 {
            0x40 => 0x4000,
            _ => 0x2000,
        }
    }

    fn send_byte(&mut self, byte: u8) -> u16 {
        self.data.push(byte);
        0x2000
    }

    fn receive_byte(&mut self, fake: bool) -> (u8, u16) {
        let Some(&byte) = self.talk.get(self.pos) else {
            return (0xFF, 0x42);
        };
        let status = if self.pos + 1 == self.talk.len() { STATUS_EOI } else { 0 };
        if !fake {
            self.pos += 1;
        }
        (byte, status)
    }
}

fn bus_with_talk(talk: &[u8]) -> ParallelBus<Drive> {
    ParallelBus::new(Drive {
        talk: talk.to_vec(),
        ..Drive::default()
    })
}

fn cpu(bus: &mut ParallelBus<Drive>, line: BusLine, asserted: bool) {
    bus.set_line(line, PARALLEL_CPU, asserted);
}

fn send(bus: &mut ParallelBus<Drive>, byte: u8) {
    bus.set_bus(PARALLEL_CPU, byte ^ 0xFF);
    cpu(bus, BusLine::Dav, true);
    cpu(bus, BusLine::Dav, false);
    bus.set_bus(PARALLEL_CPU, 0xFF);
}

fn listening(bus: &mut ParallelBus<Drive>) {
    cpu(bus, BusLine::Atn, true);
    send(bus, LISTEN_8);
    cpu(bus, BusLine::Atn, false);
}

/// Address the drive as talker. With `hold_ndac` the controller already
/// holds NDAC and NRFD when it releases ATN.
fn talking(bus: &mut ParallelBus<Drive>, hold_ndac: bool) {
    cpu(bus, BusLine::Atn, true);
    send(bus, TALK_8);
    if hold_ndac {
        cpu(bus, BusLine::Ndac, true);
        cpu(bus, BusLine::Nrfd, true);
    }
    cpu(bus, BusLine::Atn, false);
}

fn reach(state: BusState) -> ParallelBus<Drive> {
    let mut bus = bus_with_talk(b"XY");
    match state {
        BusState::WaitAtn => {}
        BusState::In1 => listening(&mut bus),
        BusState::In2 => {
            listening(&mut bus);
            bus.set_bus(PARALLEL_CPU, !b'Q');
            cpu(&mut bus, BusLine::Dav, true);
        }
        BusState::OldPet => talking(&mut bus, false),
        BusState::Out1 => talking(&mut bus, true),
        BusState::Out1a => {
            talking(&mut bus, true);
            cpu(&mut bus, BusLine::Nrfd, false);
        }
        BusState::Out2 => {
            talking(&mut bus, true);
            cpu(&mut bus, BusLine::Nrfd, false);
            cpu(&mut bus, BusLine::Nrfd, true);
        }
    }
    assert_eq!(bus.state(), state);
    bus
}

#[test]
fn atn_low_from_every_state_starts_a_command_phase() {
    for state in BusState::ALL {
        let mut bus = reach(state);
        bus.set_debug(true);
        cpu(&mut bus, BusLine::Atn, true);

        assert_eq!(bus.state(), BusState::In1, "from {}", state.name());
        assert_ne!(bus.line(BusLine::Ndac) & PARALLEL_EMU, 0, "from {}", state.name());
        assert_eq!(bus.line(BusLine::Dav) & PARALLEL_EMU, 0, "from {}", state.name());
        assert_eq!(bus.line(BusLine::Eoi) & PARALLEL_EMU, 0, "from {}", state.name());
        assert_eq!(bus.line(BusLine::Nrfd) & PARALLEL_EMU, 0, "from {}", state.name());
        assert_eq!(bus.source_bus(PARALLEL_EMU), 0xFF, "from {}", state.name());
    }
}

#[test]
fn listener_gets_command_and_data_bytes() {
    let mut bus = bus_with_talk(&[]);
    listening(&mut bus);
    for &b in b"HELLO" {
        send(&mut bus, b);
    }
    assert_eq!(bus.device().commands, vec![LISTEN_8]);
    assert_eq!(bus.device().data, b"HELLO");
    assert_eq!(bus.state(), BusState::In1);

    cpu(&mut bus, BusLine::Atn, true);
    send(&mut bus, 0x3F);
    cpu(&mut bus, BusLine::Atn, false);
    assert_eq!(bus.device().commands, vec![LISTEN_8, 0x3F]);
}

#[test]
fn controller_reads_talker_until_eoi() {
    let mut bus = bus_with_talk(b"HI");
    talking(&mut bus, true);
    assert_eq!(bus.state(), BusState::Out1);

    let mut received = Vec::new();
    let mut eoi = false;
    while !eoi {
        // Ready for data.
        cpu(&mut bus, BusLine::Nrfd, false);
        assert_eq!(bus.state(), BusState::Out1a);
        assert!(bus.is_asserted(BusLine::Dav));
        received.push(bus.bus() ^ 0xFF);
        eoi = bus.is_asserted(BusLine::Eoi);

        // Busy, then data accepted.
        cpu(&mut bus, BusLine::Nrfd, true);
        assert_eq!(bus.state(), BusState::Out2);
        cpu(&mut bus, BusLine::Ndac, false);
        if !eoi {
            assert_eq!(bus.state(), BusState::Out1);
            cpu(&mut bus, BusLine::Ndac, true);
        }
    }

    assert_eq!(received, b"HI");
    assert_eq!(bus.state(), BusState::WaitAtn);
    assert!(!bus.is_asserted(BusLine::Dav));
    assert_eq!(bus.source_bus(PARALLEL_EMU), 0xFF);
}

#[test]
fn old_pet_talker_starts_on_late_ndac() {
    let mut bus = bus_with_talk(b"Z");
    talking(&mut bus, false);
    assert_eq!(bus.state(), BusState::OldPet);

    cpu(&mut bus, BusLine::Ndac, true);
    assert_eq!(bus.state(), BusState::Out1a);
    assert_eq!(bus.bus() ^ 0xFF, b'Z');
}
