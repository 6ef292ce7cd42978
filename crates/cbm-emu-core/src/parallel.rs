//! IEEE-488 parallel bus handshake.
//!
//! The five control lines and the data bus are wired-AND: each of four
//! sources (the emulated device layer, the main CPU and two drive CPUs)
//! drives its own copy and the bus sees the combination. Line values here
//! are source masks, so a line is asserted (electrically low) while any
//! source holds it.
//!
//! Edges on ATN, DAV, NRFD and NDAC drive a state machine that hands bytes
//! to and from a [`ParallelDevice`]. Handlers change the device layer's own
//! lines, and those changes feed back into the state machine, exactly as on
//! real hardware.

use log::{debug, warn};

pub const PARALLEL_EMU: u8 = 0x01;
pub const PARALLEL_CPU: u8 = 0x02;
pub const PARALLEL_DRV0: u8 = 0x04;
pub const PARALLEL_DRV1: u8 = 0x08;

/// Status bit set by a talker on the last byte.
pub const STATUS_EOI: u16 = 0x40;
/// Status returned when no device answers.
pub const STATUS_DEVICE_NOT_PRESENT: u16 = 0x80;

const STATUS_MODE_MASK: u16 = 0xF000;
const STATUS_LISTENING: u16 = 0x2000;
const STATUS_TALKING: u16 = 0x4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusLine {
    Eoi,
    Atn,
    Dav,
    Nrfd,
    Ndac,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BusState {
    #[default]
    WaitAtn,
    In1,
    In2,
    OldPet,
    Out1,
    Out1a,
    Out2,
}

impl BusState {
    pub const ALL: [Self; 7] = [
        Self::WaitAtn,
        Self::In1,
        Self::In2,
        Self::OldPet,
        Self::Out1,
        Self::Out1a,
        Self::Out2,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::WaitAtn => "WaitATN",
            Self::In1 => "In1",
            Self::In2 => "In2",
            Self::OldPet => "OldPet",
            Self::Out1 => "Out1",
            Self::Out1a => "Out1a",
            Self::Out2 => "Out2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    AtnLo,
    AtnHi,
    DavLo,
    DavHi,
    NdacLo,
    NdacHi,
    NrfdLo,
    NrfdHi,
}

impl Transition {
    pub fn name(self) -> &'static str {
        match self {
            Self::AtnLo => "ATN low",
            Self::AtnHi => "ATN high",
            Self::DavLo => "DAV low",
            Self::DavHi => "DAV high",
            Self::NdacLo => "NDAC low",
            Self::NdacHi => "NDAC high",
            Self::NrfdLo => "NRFD low",
            Self::NrfdHi => "NRFD high",
        }
    }

    fn for_line(line: BusLine, asserted: bool) -> Option<Self> {
        Some(match (line, asserted) {
            (BusLine::Atn, true) => Self::AtnLo,
            (BusLine::Atn, false) => Self::AtnHi,
            (BusLine::Dav, true) => Self::DavLo,
            (BusLine::Dav, false) => Self::DavHi,
            (BusLine::Ndac, true) => Self::NdacLo,
            (BusLine::Ndac, false) => Self::NdacHi,
            (BusLine::Nrfd, true) => Self::NrfdLo,
            (BusLine::Nrfd, false) => Self::NrfdHi,
            (BusLine::Eoi, _) => return None,
        })
    }
}

/// The devices on the far side of the bus.
pub trait ParallelDevice {
    /// A command byte arrived under ATN. Returns the status word.
    fn attention(&mut self, byte: u8) -> u16;

    /// A data byte arrived for the current listener.
    fn send_byte(&mut self, byte: u8) -> u16;

    /// Fetch the talker's next byte. `fake` is true for the look-ahead read
    /// that only presents the byte.
    fn receive_byte(&mut self, fake: bool) -> (u8, u16);

    /// ATN changed and drive `drive` is enabled.
    fn drive_atn(&mut self, _drive: usize, _asserted: bool) {}

    /// Let drive CPUs catch up before the main CPU changes a line.
    fn drive_execute(&mut self) {}
}

/// No device attached: every command times out.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullParallelDevice;

impl ParallelDevice for NullParallelDevice {
    fn attention(&mut self, _byte: u8) -> u16 {
        STATUS_DEVICE_NOT_PRESENT
    }

    fn send_byte(&mut self, _byte: u8) -> u16 {
        STATUS_DEVICE_NOT_PRESENT
    }

    fn receive_byte(&mut self, _fake: bool) -> (u8, u16) {
        (0xFF, STATUS_DEVICE_NOT_PRESENT)
    }
}

#[derive(Debug, Clone)]
pub struct ParallelBus<D: ParallelDevice> {
    device: D,
    state: BusState,

    eoi: u8,
    atn: u8,
    dav: u8,
    nrfd: u8,
    ndac: u8,

    bus: u8,
    emu_bus: u8,
    cpu_bus: u8,
    drv0_bus: u8,
    drv1_bus: u8,

    /// Low byte is the status of the last transfer, the high nibble says
    /// whether the device is listening or talking.
    par_status: u16,
    emu_enabled: bool,
    drive_enabled: [bool; 2],
    debug: bool,
}

impl<D: ParallelDevice> ParallelBus<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            state: BusState::WaitAtn,
            eoi: 0,
            atn: 0,
            dav: 0,
            nrfd: 0,
            ndac: 0,
            bus: 0xFF,
            emu_bus: 0xFF,
            cpu_bus: 0xFF,
            drv0_bus: 0xFF,
            drv1_bus: 0xFF,
            par_status: 0,
            emu_enabled: true,
            drive_enabled: [false; 2],
            debug: false,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    /// Enable the device layer. While disabled, line changes update the
    /// bus but do not drive the state machine.
    pub fn enable_emulation(&mut self, enable: bool) {
        self.emu_enabled = enable;
    }

    pub fn enable_drive(&mut self, drive: usize, enable: bool) {
        if let Some(slot) = self.drive_enabled.get_mut(drive) {
            *slot = enable;
        }
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Combined source mask of `line`; nonzero means asserted.
    pub fn line(&self, line: BusLine) -> u8 {
        match line {
            BusLine::Eoi => self.eoi,
            BusLine::Atn => self.atn,
            BusLine::Dav => self.dav,
            BusLine::Nrfd => self.nrfd,
            BusLine::Ndac => self.ndac,
        }
    }

    pub fn is_asserted(&self, line: BusLine) -> bool {
        self.line(line) != 0
    }

    fn line_mut(&mut self, line: BusLine) -> &mut u8 {
        match line {
            BusLine::Eoi => &mut self.eoi,
            BusLine::Atn => &mut self.atn,
            BusLine::Dav => &mut self.dav,
            BusLine::Nrfd => &mut self.nrfd,
            BusLine::Ndac => &mut self.ndac,
        }
    }

    /// Data lines as seen on the bus.
    pub fn bus(&self) -> u8 {
        self.bus
    }

    /// Data lines as driven by `source`.
    pub fn source_bus(&self, source: u8) -> u8 {
        match source {
            PARALLEL_EMU => self.emu_bus,
            PARALLEL_CPU => self.cpu_bus,
            PARALLEL_DRV0 => self.drv0_bus,
            PARALLEL_DRV1 => self.drv1_bus,
            _ => 0xFF,
        }
    }

    pub fn par_status(&self) -> u16 {
        self.par_status
    }

    /// Assert or release `line` on behalf of `source`, firing the edge
    /// transition when the combined line changes.
    pub fn set_line(&mut self, line: BusLine, source: u8, asserted: bool) {
        if source & PARALLEL_CPU != 0 {
            self.device.drive_execute();
        }
        let old = self.line(line);
        let new = if asserted { old | source } else { old & !source };
        *self.line_mut(line) = new;

        let edge = if asserted { old == 0 } else { old != 0 && new == 0 };
        if self.debug && old != new {
            debug!("Parallel: {line:?} {old:02x} -> {new:02x}");
        }
        if !edge {
            return;
        }

        let Some(transition) = Transition::for_line(line, asserted) else {
            return;
        };
        if self.emu_enabled {
            self.do_trans(transition);
        }
        if line == BusLine::Atn {
            for drive in 0..self.drive_enabled.len() {
                if self.drive_enabled[drive] {
                    self.device.drive_atn(drive, asserted);
                }
            }
        }
    }

    /// Change a line while restoring a snapshot: no transition fires and no
    /// drive is notified.
    pub fn restore_line(&mut self, line: BusLine, source: u8, asserted: bool) {
        let old = self.line(line);
        let new = if asserted { old | source } else { old & !source };
        *self.line_mut(line) = new;
        if self.debug && old != new {
            debug!("Parallel: restore {line:?} {old:02x} -> {new:02x}");
        }
    }

    pub fn set_bus(&mut self, source: u8, value: u8) {
        match source {
            PARALLEL_EMU => self.emu_bus = value,
            PARALLEL_CPU => self.cpu_bus = value,
            PARALLEL_DRV0 => self.drv0_bus = value,
            PARALLEL_DRV1 => self.drv1_bus = value,
            _ => return,
        }
        self.bus = self.emu_bus & self.cpu_bus & self.drv0_bus & self.drv1_bus;
        if self.debug {
            debug!("Parallel: bus {source:02x} set {value:02x} -> {:02x}", self.bus);
        }
    }

    fn emu_set(&mut self, line: BusLine, asserted: bool) {
        self.set_line(line, PARALLEL_EMU, asserted);
    }

    fn is_listening(&self) -> bool {
        self.par_status & STATUS_MODE_MASK == STATUS_LISTENING
    }

    fn is_talking(&self) -> bool {
        self.par_status & STATUS_MODE_MASK == STATUS_TALKING
    }

    fn unexpected(&self, transition: Transition) {
        if self.debug {
            warn!(
                "Parallel: unexpected line transition in state {}: {}",
                self.state.name(),
                transition.name()
            );
        }
    }

    fn reset_bus(&mut self) {
        self.emu_set(BusLine::Dav, false);
        self.emu_set(BusLine::Eoi, false);
        self.emu_set(BusLine::Nrfd, false);
        self.emu_set(BusLine::Ndac, false);
        self.set_bus(PARALLEL_EMU, 0xFF);
        self.par_status = 0;
    }

    fn do_trans(&mut self, transition: Transition) {
        use BusState as S;
        use Transition as T;

        match (self.state, transition) {
            (_, T::AtnLo) => self.atn_lo(),

            (S::In1, T::AtnHi) => self.in1_atn_hi(transition),
            (S::In1, T::DavLo) => self.in1_dav_lo(),
            (S::In1, T::NdacLo | T::NrfdHi) if self.atn == 0 => self.unexpected(transition),
            (S::In1, T::DavHi) => self.unexpected(transition),

            (S::In2, T::AtnHi) => {
                self.reset_bus();
                self.state = S::WaitAtn;
            }
            (S::In2, T::DavHi) => {
                self.emu_set(BusLine::Ndac, true);
                self.emu_set(BusLine::Nrfd, false);
                self.state = S::In1;
            }
            (S::In2, T::NdacHi) if self.atn == 0 => self.unexpected(transition),
            (S::In2, T::DavLo | T::NrfdLo) => self.unexpected(transition),

            (S::OldPet, T::NdacLo) => self.old_pet_ndac_lo(),
            (S::OldPet, T::NrfdLo) => {
                if self.debug {
                    warn!("Parallel: OldPet NRFD low");
                }
                self.out1_nrfd_hi();
            }
            (S::OldPet, T::AtnHi | T::DavLo | T::DavHi | T::NdacHi | T::NrfdHi) => {
                self.unexpected(transition);
            }

            (S::Out1, T::NrfdHi) => self.out1_nrfd_hi(),
            (S::Out1, T::AtnHi | T::DavHi | T::NdacHi | T::NrfdLo) => {
                self.unexpected(transition);
            }

            (S::Out1a, T::NrfdLo) => self.state = S::Out2,
            (S::Out1a, T::NdacHi) => {
                self.reset_bus();
                self.state = S::WaitAtn;
            }
            (S::Out1a, T::AtnHi | T::DavLo | T::DavHi | T::NdacLo | T::NrfdHi) => {
                self.unexpected(transition);
            }

            (S::Out2, T::NdacHi) => self.out2_ndac_hi(),
            (S::Out2, T::AtnHi | T::DavLo | T::NdacLo | T::NrfdLo | T::NrfdHi) => {
                self.unexpected(transition);
            }

            // Everything else is the bus owner's own edge, or idle chatter.
            _ => {}
        }
    }

    /// ATN asserted: a new command phase pre-empts whatever was going on.
    fn atn_lo(&mut self) {
        self.emu_set(BusLine::Ndac, true);
        self.emu_set(BusLine::Dav, false);
        self.emu_set(BusLine::Eoi, false);
        self.set_bus(PARALLEL_EMU, 0xFF);
        self.emu_set(BusLine::Nrfd, false);
        self.state = BusState::In1;
    }

    fn in1_atn_hi(&mut self, transition: Transition) {
        if self.par_status & 0xFF != 0 {
            self.reset_bus();
            self.state = BusState::WaitAtn;
        } else if self.is_listening() {
            self.state = BusState::In1;
        } else if self.is_talking() {
            self.reset_bus();
            if self.ndac == 0 {
                // Old PET ROMs release ATN before pulling NDAC.
                self.state = BusState::OldPet;
            } else {
                self.old_pet_ndac_lo();
            }
        } else {
            if self.debug {
                warn!(
                    "Parallel: Ouch, something weird happened: {} got {}",
                    BusState::In1.name(),
                    transition.name()
                );
            }
            self.reset_bus();
            self.state = BusState::WaitAtn;
        }
    }

    fn in1_dav_lo(&mut self) {
        self.emu_set(BusLine::Nrfd, true);
        let byte = self.bus ^ 0xFF;
        self.emu_set(BusLine::Ndac, false);

        self.par_status = if self.atn != 0 {
            self.device.attention(byte)
        } else {
            self.device.send_byte(byte)
        };
        if self.debug {
            debug!("Parallel: sendbyte returns {:04x}", self.par_status);
        }
        self.state = BusState::In2;
    }

    fn old_pet_ndac_lo(&mut self) {
        if self.nrfd == 0 {
            self.out1_nrfd_hi();
        } else {
            self.state = BusState::Out1;
        }
    }

    fn out1_nrfd_hi(&mut self) {
        let (byte, status) = self.device.receive_byte(true);
        self.par_status = status;
        self.set_bus(PARALLEL_EMU, byte ^ 0xFF);
        self.emu_set(BusLine::Eoi, status & STATUS_EOI != 0);
        self.emu_set(BusLine::Dav, true);
        self.state = BusState::Out1a;
    }

    fn out2_ndac_hi(&mut self) {
        self.emu_set(BusLine::Dav, false);
        self.emu_set(BusLine::Eoi, false);
        self.set_bus(PARALLEL_EMU, 0xFF);

        let (_, status) = self.device.receive_byte(false);
        self.par_status = status;
        if status & 0xFF != 0 {
            self.reset_bus();
            self.state = BusState::WaitAtn;
        } else {
            self.state = BusState::Out1;
        }
    }
}

impl Default for ParallelBus<NullParallelDevice> {
    fn default() -> Self {
        Self::new(NullParallelDevice)
    }
}
