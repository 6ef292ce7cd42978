//! The emulated machine as seen by the kernel.
//!
//! The kernel never decodes instructions or touches chip state itself. It
//! asks a [`Machine`] to run up to a clock value, to apply the effect of an
//! input event, and to write or read its snapshot modules.
//! [`HeadlessMachine`] is a reference implementation without a CPU core,
//! used by the command line driver and the tests.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::clock::Clock;
use crate::cpu::{CpuContext, ResetMode};
use crate::datasette::DatasetteCommand;
use crate::interrupt::AlarmId;
use crate::joystick::JoystickValues;
use crate::keyboard::KeyboardMatrix;
use crate::resources::ResourceValue;
use crate::snapshot::{Snapshot, SnapshotError, SnapshotWriter};

/// The five CPU registers exchanged as a SYNC_TEST payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CpuRegisters {
    pub pc: u16,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
}

impl CpuRegisters {
    pub const PAYLOAD_LEN: usize = 20;

    /// PC, A, X, Y, SP widened to 32 bits each.
    pub fn to_words(self) -> [u32; 5] {
        [
            u32::from(self.pc),
            u32::from(self.a),
            u32::from(self.x),
            u32::from(self.y),
            u32::from(self.sp),
        ]
    }

    /// Inverse of [`CpuRegisters::to_words`]; high bits are dropped.
    pub fn from_words(words: [u32; 5]) -> Self {
        Self {
            pc: words[0] as u16,
            a: words[1] as u8,
            x: words[2] as u8,
            y: words[3] as u8,
            sp: words[4] as u8,
        }
    }
}

/// What the kernel needs from an emulated machine.
pub trait Machine {
    /// Machine name written into snapshot headers.
    fn name(&self) -> &str;

    fn cpu(&self) -> &CpuContext;
    fn cpu_mut(&mut self) -> &mut CpuContext;

    fn cycles_per_second(&self) -> u32;
    fn cycles_per_frame(&self) -> u32;

    fn refresh_rate(&self) -> f64 {
        f64::from(self.cycles_per_second()) / f64::from(self.cycles_per_frame().max(1))
    }

    /// Run the CPU until its clock reaches at least `until`.
    fn execute(&mut self, until: Clock);

    fn registers(&self) -> CpuRegisters;

    /// Reset the machine. The CPU context reset is part of this.
    fn reset(&mut self, mode: ResetMode);

    fn write_snapshot_modules(&self, writer: &mut SnapshotWriter) -> Result<(), SnapshotError>;
    fn read_snapshot_modules(&mut self, snapshot: &Snapshot) -> Result<(), SnapshotError>;

    fn set_keyboard_matrix(&mut self, matrix: &KeyboardMatrix);
    fn set_restore_key(&mut self, pressed: bool);
    fn set_joystick(&mut self, values: &JoystickValues);
    fn datasette_control(&mut self, command: DatasetteCommand);
    fn attach_disk(&mut self, unit: u8, path: &Path, read_only: bool) -> io::Result<()>;
    fn attach_tape(&mut self, path: &Path) -> io::Result<()>;

    /// Apply a resource received from a peer or an event. Returns false for
    /// names the machine does not know.
    fn set_resource(&mut self, name: &str, value: &ResourceValue) -> bool;

    /// Settings that must match between network peers.
    fn event_safe_resources(&self) -> Vec<(String, ResourceValue)> {
        Vec::new()
    }

    /// An alarm the kernel does not own fired. Returns true if the machine
    /// handled it.
    fn handle_alarm(&mut self, _alarm: AlarmId, _offset: Clock) -> bool {
        false
    }
}

pub const HEADLESS_CYCLES_PER_SECOND: u32 = 985_248;
pub const HEADLESS_CYCLES_PER_FRAME: u32 = 19_656;

const POWER_ON_PC: u16 = 0xFCE2;
const POWER_ON_SP: u8 = 0xFF;

/// A machine without a CPU core. Running it advances the clock and the PC;
/// every applied input is folded into the registers together with the clock
/// it arrived at, so two runs only end with equal registers if they saw the
/// same inputs at the same cycles.
#[derive(Debug, Clone)]
pub struct HeadlessMachine {
    cpu: CpuContext,
    regs: CpuRegisters,
    keyboard: KeyboardMatrix,
    restore: bool,
    joystick: JoystickValues,
    datasette: DatasetteCommand,
    resets: u32,
    disks: BTreeMap<u8, (PathBuf, bool)>,
    tape: Option<PathBuf>,
    settings: BTreeMap<String, ResourceValue>,
}

impl HeadlessMachine {
    pub fn new() -> Self {
        let mut settings = BTreeMap::new();
        settings.insert("MachineVideoStandard".to_string(), ResourceValue::Int(1));
        settings.insert("DriveTrueEmulation".to_string(), ResourceValue::Int(1));
        Self {
            cpu: CpuContext::new(4, 8),
            regs: CpuRegisters {
                pc: POWER_ON_PC,
                sp: POWER_ON_SP,
                ..CpuRegisters::default()
            },
            keyboard: KeyboardMatrix::default(),
            restore: false,
            joystick: JoystickValues::default(),
            datasette: DatasetteCommand::Stop,
            resets: 0,
            disks: BTreeMap::new(),
            tape: None,
            settings,
        }
    }

    fn fold(&mut self, tag: u8, bytes: &[u8]) {
        let clock = self.cpu.clock.to_le_bytes();
        for &b in [tag].iter().chain(&clock).chain(bytes) {
            self.regs.a = self.regs.a.rotate_left(3) ^ b;
            self.regs.x = self.regs.x.wrapping_add(self.regs.a);
            self.regs.y = self.regs.y.wrapping_mul(31).wrapping_add(b ^ self.regs.x);
        }
    }

    pub fn keyboard(&self) -> &KeyboardMatrix {
        &self.keyboard
    }

    pub fn restore_pressed(&self) -> bool {
        self.restore
    }

    pub fn joystick(&self) -> &JoystickValues {
        &self.joystick
    }

    pub fn datasette(&self) -> DatasetteCommand {
        self.datasette
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    pub fn disk(&self, unit: u8) -> Option<&(PathBuf, bool)> {
        self.disks.get(&unit)
    }

    pub fn tape(&self) -> Option<&Path> {
        self.tape.as_deref()
    }

    pub fn setting(&self, name: &str) -> Option<&ResourceValue> {
        self.settings.get(name)
    }
}

impl Default for HeadlessMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine for HeadlessMachine {
    fn name(&self) -> &str {
        "C64"
    }

    fn cpu(&self) -> &CpuContext {
        &self.cpu
    }

    fn cpu_mut(&mut self) -> &mut CpuContext {
        &mut self.cpu
    }

    fn cycles_per_second(&self) -> u32 {
        HEADLESS_CYCLES_PER_SECOND
    }

    fn cycles_per_frame(&self) -> u32 {
        HEADLESS_CYCLES_PER_FRAME
    }

    fn execute(&mut self, until: Clock) {
        if until <= self.cpu.clock {
            return;
        }
        let elapsed = until - self.cpu.clock;
        self.regs.pc = self.regs.pc.wrapping_add(elapsed as u16);
        self.cpu.clock = until;
    }

    fn registers(&self) -> CpuRegisters {
        self.regs
    }

    fn reset(&mut self, mode: ResetMode) {
        self.cpu.reset();
        self.resets = self.resets.wrapping_add(1);
        if mode == ResetMode::Hard {
            self.keyboard = KeyboardMatrix::default();
            self.restore = false;
            self.joystick = JoystickValues::default();
            self.regs = CpuRegisters::default();
        }
        self.regs.pc = POWER_ON_PC;
        self.regs.sp = POWER_ON_SP;
        self.fold(0xFE, &[mode.code()]);
    }

    fn write_snapshot_modules(&self, writer: &mut SnapshotWriter) -> Result<(), SnapshotError> {
        let mut m = writer.create_module("MAINCPU", 1, 1);
        m.write_u32(self.cpu.clock);
        m.write_u8(self.regs.a);
        m.write_u8(self.regs.x);
        m.write_u8(self.regs.y);
        m.write_u8(self.regs.sp);
        m.write_u16(self.regs.pc);
        m.close()?;

        let mut m = writer.create_module("HEADLESS", 0, 0);
        m.write_bytes(&self.keyboard.to_bytes());
        m.write_bool(self.restore);
        m.write_bytes(&self.joystick.0);
        m.write_u8(self.datasette.code());
        m.write_u32(self.resets);
        m.write_u8(self.disks.len() as u8);
        for (unit, (path, read_only)) in &self.disks {
            m.write_u8(*unit);
            m.write_bool(*read_only);
            m.write_str(&path.to_string_lossy());
        }
        match &self.tape {
            Some(path) => {
                m.write_bool(true);
                m.write_str(&path.to_string_lossy());
            }
            None => m.write_bool(false),
        }
        m.write_u8(self.settings.len() as u8);
        for (name, value) in &self.settings {
            m.write_str(name);
            match value {
                ResourceValue::Int(v) => {
                    m.write_u8(0);
                    m.write_i32(*v);
                }
                ResourceValue::Str(s) => {
                    m.write_u8(1);
                    m.write_str(s);
                }
            }
        }
        m.close()
    }

    fn read_snapshot_modules(&mut self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let mut m = snapshot.module("MAINCPU")?;
        m.require_version(1, 1)?;
        let clock = m.read_u32()?;
        let regs = CpuRegisters {
            a: m.read_u8()?,
            x: m.read_u8()?,
            y: m.read_u8()?,
            sp: m.read_u8()?,
            pc: m.read_u16()?,
        };

        let mut m = snapshot.module("HEADLESS")?;
        m.require_version(0, 0)?;
        let keyboard = KeyboardMatrix::from_bytes(m.read_bytes(KeyboardMatrix::PAYLOAD_LEN)?)
            .ok_or_else(|| m.corrupt("keyboard matrix"))?;
        let restore = m.read_bool()?;
        let joystick = JoystickValues::from_bytes(m.read_bytes(JoystickValues::PAYLOAD_LEN)?)
            .ok_or_else(|| m.corrupt("joystick values"))?;
        let datasette = DatasetteCommand::from_code(m.read_u8()?)
            .ok_or_else(|| m.corrupt("datasette command"))?;
        let resets = m.read_u32()?;
        let mut disks = BTreeMap::new();
        for _ in 0..m.read_u8()? {
            let unit = m.read_u8()?;
            let read_only = m.read_bool()?;
            disks.insert(unit, (PathBuf::from(m.read_str()?), read_only));
        }
        let tape = if m.read_bool()? {
            Some(PathBuf::from(m.read_str()?))
        } else {
            None
        };
        let mut settings = BTreeMap::new();
        for _ in 0..m.read_u8()? {
            let name = m.read_str()?;
            let value = match m.read_u8()? {
                0 => ResourceValue::Int(m.read_i32()?),
                1 => ResourceValue::Str(m.read_str()?),
                tag => return Err(m.corrupt(format!("setting tag {tag}"))),
            };
            settings.insert(name, value);
        }

        self.cpu.restore_clock(clock);
        self.regs = regs;
        self.keyboard = keyboard;
        self.restore = restore;
        self.joystick = joystick;
        self.datasette = datasette;
        self.resets = resets;
        self.disks = disks;
        self.tape = tape;
        self.settings = settings;
        debug!("Headless: state restored at clock {clock}");
        Ok(())
    }

    fn set_keyboard_matrix(&mut self, matrix: &KeyboardMatrix) {
        self.keyboard = *matrix;
        self.fold(1, &matrix.to_bytes());
    }

    fn set_restore_key(&mut self, pressed: bool) {
        self.restore = pressed;
        self.fold(2, &[u8::from(pressed)]);
    }

    fn set_joystick(&mut self, values: &JoystickValues) {
        self.joystick = *values;
        self.fold(3, &values.0);
    }

    fn datasette_control(&mut self, command: DatasetteCommand) {
        self.datasette = command;
        self.fold(4, &[command.code()]);
    }

    fn attach_disk(&mut self, unit: u8, path: &Path, read_only: bool) -> io::Result<()> {
        let image = fs::read(path)?;
        info!("Headless: attached {} to unit {unit}", path.display());
        self.disks.insert(unit, (path.to_path_buf(), read_only));
        self.fold(5, &[unit, u8::from(read_only)]);
        self.fold(5, &image);
        Ok(())
    }

    fn attach_tape(&mut self, path: &Path) -> io::Result<()> {
        let image = fs::read(path)?;
        info!("Headless: attached tape {}", path.display());
        self.tape = Some(path.to_path_buf());
        self.fold(6, &image);
        Ok(())
    }

    fn set_resource(&mut self, name: &str, value: &ResourceValue) -> bool {
        if !self.settings.contains_key(name) {
            return false;
        }
        self.settings.insert(name.to_string(), value.clone());
        self.fold(14, name.as_bytes());
        true
    }

    fn event_safe_resources(&self) -> Vec<(String, ResourceValue)> {
        self.settings
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}
