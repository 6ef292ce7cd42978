//! Event log types and the EVENT snapshot module codec.
//!
//! An event is one nondeterministic input stamped with the clock it was
//! applied at. The serialized form is a sequence of
//! `(type: u32, clock: u32, size: u32, data)` little-endian tuples closed by
//! a LIST_END tuple; the same bytes are used inside the EVENT snapshot
//! module and in network frame buffers.

mod image;
mod recorder;

pub use image::ImageRegistry;
pub use recorder::{EventConfig, EventRecorder, SessionState};

use std::fmt;
use std::path::PathBuf;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::cpu::ResetMode;
use crate::datasette::DatasetteCommand;
use crate::joystick::JoystickValues;
use crate::keyboard::KeyboardMatrix;
use crate::machine::CpuRegisters;
use crate::resources::ResourceValue;
use crate::snapshot::{Snapshot, SnapshotError, SnapshotWriter};

pub const EVENT_MODULE_NAME: &str = "EVENT";
pub const EVENT_MODULE_MAJOR: u8 = 0;
pub const EVENT_MODULE_MINOR: u8 = 0;

/// Size of the `(type, clock, size)` tuple header.
pub const EVENT_HEADER_SIZE: usize = 12;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("cannot start: {0} is already active")]
    AlreadyActive(SessionState),
    #[error("not possible while {0}")]
    NotActive(SessionState),
    #[error("could not write snapshot {path}: {source}")]
    SnapshotWriteFailed {
        path: PathBuf,
        #[source]
        source: SnapshotError,
    },
    #[error("could not read snapshot {path}: {source}")]
    SnapshotReadFailed {
        path: PathBuf,
        #[source]
        source: SnapshotError,
    },
    #[error("snapshot has no event section")]
    EventSectionMissing,
    #[error("malformed {kind} event: {reason}")]
    Malformed { kind: &'static str, reason: String },
    #[error("event image I/O on {path}: {source}")]
    ImageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no local image for '{0}'")]
    ImageNotMapped(String),
}

fn malformed(kind: &'static str, reason: impl Into<String>) -> EventError {
    EventError::Malformed {
        kind,
        reason: reason.into(),
    }
}

/// Numeric event type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ListEnd,
    KeyboardMatrix,
    KeyboardRestore,
    JoystickValue,
    Datasette,
    AttachDisk,
    AttachTape,
    ResetCpu,
    Timestamp,
    Initial,
    SyncTest,
    AttachImage,
    Resource,
}

impl EventType {
    pub fn code(self) -> u32 {
        match self {
            Self::ListEnd => 0,
            Self::KeyboardMatrix => 1,
            Self::KeyboardRestore => 2,
            Self::JoystickValue => 3,
            Self::Datasette => 4,
            Self::AttachDisk => 5,
            Self::AttachTape => 6,
            Self::ResetCpu => 7,
            Self::Timestamp => 8,
            Self::Initial => 9,
            Self::SyncTest => 10,
            Self::AttachImage => 13,
            Self::Resource => 14,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::ListEnd,
            1 => Self::KeyboardMatrix,
            2 => Self::KeyboardRestore,
            3 => Self::JoystickValue,
            4 => Self::Datasette,
            5 => Self::AttachDisk,
            6 => Self::AttachTape,
            7 => Self::ResetCpu,
            8 => Self::Timestamp,
            9 => Self::Initial,
            10 => Self::SyncTest,
            13 => Self::AttachImage,
            14 => Self::Resource,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ListEnd => "LIST_END",
            Self::KeyboardMatrix => "KEYBOARD_MATRIX",
            Self::KeyboardRestore => "KEYBOARD_RESTORE",
            Self::JoystickValue => "JOYSTICK_VALUE",
            Self::Datasette => "DATASETTE",
            Self::AttachDisk => "ATTACHDISK",
            Self::AttachTape => "ATTACHTAPE",
            Self::ResetCpu => "RESETCPU",
            Self::Timestamp => "TIMESTAMP",
            Self::Initial => "INITIAL",
            Self::SyncTest => "SYNC_TEST",
            Self::AttachImage => "ATTACHIMAGE",
            Self::Resource => "RESOURCE",
        }
    }
}

/// How a recording session is bootstrapped (`EventStartMode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum StartMode {
    /// Save a fresh start snapshot.
    #[default]
    SaveSnapshot,
    /// Continue from the end snapshot of an earlier session.
    LoadEndSnapshot,
    /// Hard-reset the machine.
    HardReset,
}

impl TryFrom<i32> for StartMode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::SaveSnapshot),
            1 => Ok(Self::LoadEndSnapshot),
            2 => Ok(Self::HardReset),
            other => Err(format!("invalid event start mode {other}")),
        }
    }
}

impl From<StartMode> for i32 {
    fn from(mode: StartMode) -> Self {
        match mode {
            StartMode::SaveSnapshot => 0,
            StartMode::LoadEndSnapshot => 1,
            StartMode::HardReset => 2,
        }
    }
}

/// Payload of an INITIAL event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialMode {
    /// The session started from this snapshot file name.
    SaveSnapshot(String),
    LoadEndSnapshot,
    HardReset,
}

impl InitialMode {
    pub fn start_mode(&self) -> StartMode {
        match self {
            Self::SaveSnapshot(_) => StartMode::SaveSnapshot,
            Self::LoadEndSnapshot => StartMode::LoadEndSnapshot,
            Self::HardReset => StartMode::HardReset,
        }
    }
}

/// Image attach carrying the image bytes the first time a file is seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttach {
    pub unit: u8,
    pub read_only: bool,
    pub filename: String,
    pub image: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    ListEnd,
    KeyboardMatrix(KeyboardMatrix),
    KeyboardRestore(bool),
    JoystickValue(JoystickValues),
    Datasette(DatasetteCommand),
    /// Legacy disk attach by path.
    AttachDisk { unit: u8, filename: String },
    /// Legacy tape attach by path.
    AttachTape { filename: String },
    AttachImage(ImageAttach),
    ResetCpu(ResetMode),
    Timestamp,
    Initial(InitialMode),
    SyncTest(CpuRegisters),
    Resource { name: String, value: ResourceValue },
    /// A type code this build does not know. Kept byte-for-byte.
    Unknown { code: u32, data: Vec<u8> },
}

fn push_cstr(out: &mut Vec<u8>, text: &str) {
    out.extend_from_slice(text.as_bytes());
    out.push(0);
}

/// Split a NUL-terminated string off the front of `data`. A missing NUL
/// takes the whole slice.
fn split_cstr(data: &[u8]) -> (String, &[u8]) {
    match data.iter().position(|&b| b == 0) {
        Some(end) => (
            String::from_utf8_lossy(&data[..end]).into_owned(),
            &data[end + 1..],
        ),
        None => (String::from_utf8_lossy(data).into_owned(), &[]),
    }
}

fn expect_len(kind: &'static str, data: &[u8], len: usize) -> Result<(), EventError> {
    if data.len() != len {
        return Err(malformed(
            kind,
            format!("payload is {} bytes, expected {len}", data.len()),
        ));
    }
    Ok(())
}

impl EventKind {
    pub fn code(&self) -> u32 {
        match self.event_type() {
            Some(t) => t.code(),
            None => match self {
                Self::Unknown { code, .. } => *code,
                _ => 0,
            },
        }
    }

    /// `None` for [`EventKind::Unknown`].
    pub fn event_type(&self) -> Option<EventType> {
        Some(match self {
            Self::ListEnd => EventType::ListEnd,
            Self::KeyboardMatrix(_) => EventType::KeyboardMatrix,
            Self::KeyboardRestore(_) => EventType::KeyboardRestore,
            Self::JoystickValue(_) => EventType::JoystickValue,
            Self::Datasette(_) => EventType::Datasette,
            Self::AttachDisk { .. } => EventType::AttachDisk,
            Self::AttachTape { .. } => EventType::AttachTape,
            Self::AttachImage(_) => EventType::AttachImage,
            Self::ResetCpu(_) => EventType::ResetCpu,
            Self::Timestamp => EventType::Timestamp,
            Self::Initial(_) => EventType::Initial,
            Self::SyncTest(_) => EventType::SyncTest,
            Self::Resource { .. } => EventType::Resource,
            Self::Unknown { .. } => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        self.event_type().map_or("UNKNOWN", EventType::name)
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::ListEnd | Self::Timestamp => {}
            Self::KeyboardMatrix(matrix) => out.extend_from_slice(&matrix.to_bytes()),
            Self::KeyboardRestore(pressed) => out.push(u8::from(*pressed)),
            Self::JoystickValue(values) => out.extend_from_slice(&values.0),
            Self::Datasette(command) => out.push(command.code()),
            Self::AttachDisk { unit, filename } => {
                out.push(*unit);
                push_cstr(&mut out, filename);
            }
            Self::AttachTape { filename } => push_cstr(&mut out, filename),
            Self::AttachImage(attach) => {
                out.push(attach.unit);
                out.push(u8::from(attach.read_only));
                push_cstr(&mut out, &attach.filename);
                if let Some(image) = &attach.image {
                    out.extend_from_slice(image);
                }
            }
            Self::ResetCpu(mode) => out.push(mode.code()),
            Self::Initial(mode) => {
                out.push(i32::from(mode.start_mode()) as u8);
                if let InitialMode::SaveSnapshot(name) = mode {
                    push_cstr(&mut out, name);
                }
            }
            Self::SyncTest(regs) => {
                for word in regs.to_words() {
                    out.extend_from_slice(&word.to_le_bytes());
                }
            }
            Self::Resource { name, value } => {
                push_cstr(&mut out, name);
                match value {
                    ResourceValue::Int(v) => {
                        out.push(0);
                        out.extend_from_slice(&v.to_le_bytes());
                    }
                    ResourceValue::Str(s) => {
                        out.push(1);
                        push_cstr(&mut out, s);
                    }
                }
            }
            Self::Unknown { data, .. } => out.extend_from_slice(data),
        }
        out
    }

    pub fn decode(code: u32, data: &[u8]) -> Result<Self, EventError> {
        let Some(event_type) = EventType::from_code(code) else {
            return Ok(Self::Unknown {
                code,
                data: data.to_vec(),
            });
        };
        let kind = event_type.name();
        Ok(match event_type {
            EventType::ListEnd => Self::ListEnd,
            EventType::Timestamp => Self::Timestamp,
            EventType::KeyboardMatrix => Self::KeyboardMatrix(
                KeyboardMatrix::from_bytes(data)
                    .ok_or_else(|| malformed(kind, format!("payload is {} bytes", data.len())))?,
            ),
            EventType::KeyboardRestore => {
                expect_len(kind, data, 1)?;
                Self::KeyboardRestore(data[0] != 0)
            }
            EventType::JoystickValue => Self::JoystickValue(
                JoystickValues::from_bytes(data)
                    .ok_or_else(|| malformed(kind, format!("payload is {} bytes", data.len())))?,
            ),
            EventType::Datasette => {
                expect_len(kind, data, 1)?;
                Self::Datasette(
                    DatasetteCommand::from_code(data[0])
                        .ok_or_else(|| malformed(kind, format!("command {}", data[0])))?,
                )
            }
            EventType::AttachDisk => {
                let (&unit, rest) = data
                    .split_first()
                    .ok_or_else(|| malformed(kind, "empty payload"))?;
                let (filename, _) = split_cstr(rest);
                Self::AttachDisk { unit, filename }
            }
            EventType::AttachTape => Self::AttachTape {
                filename: split_cstr(data).0,
            },
            EventType::AttachImage => {
                if data.len() < 2 {
                    return Err(malformed(kind, "payload too short"));
                }
                let (filename, rest) = split_cstr(&data[2..]);
                Self::AttachImage(ImageAttach {
                    unit: data[0],
                    read_only: data[1] != 0,
                    filename,
                    image: (!rest.is_empty()).then(|| rest.to_vec()),
                })
            }
            EventType::ResetCpu => {
                expect_len(kind, data, 1)?;
                Self::ResetCpu(
                    ResetMode::from_code(data[0])
                        .ok_or_else(|| malformed(kind, format!("mode {}", data[0])))?,
                )
            }
            EventType::Initial => {
                let (&mode, rest) = data
                    .split_first()
                    .ok_or_else(|| malformed(kind, "empty payload"))?;
                Self::Initial(match StartMode::try_from(i32::from(mode)) {
                    Ok(StartMode::SaveSnapshot) => InitialMode::SaveSnapshot(split_cstr(rest).0),
                    Ok(StartMode::LoadEndSnapshot) => InitialMode::LoadEndSnapshot,
                    Ok(StartMode::HardReset) => InitialMode::HardReset,
                    Err(reason) => return Err(malformed(kind, reason)),
                })
            }
            EventType::SyncTest => {
                expect_len(kind, data, CpuRegisters::PAYLOAD_LEN)?;
                let mut words = [0u32; 5];
                for (word, chunk) in words.iter_mut().zip(data.chunks_exact(4)) {
                    *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                }
                Self::SyncTest(CpuRegisters::from_words(words))
            }
            EventType::Resource => {
                let (name, rest) = split_cstr(data);
                let value = match rest.split_first() {
                    Some((&0, v)) if v.len() == 4 => {
                        ResourceValue::Int(i32::from_le_bytes([v[0], v[1], v[2], v[3]]))
                    }
                    Some((&1, v)) => ResourceValue::Str(split_cstr(v).0),
                    _ => return Err(malformed(kind, format!("bad value for '{name}'"))),
                };
                Self::Resource { name, value }
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub clock: Clock,
    pub kind: EventKind,
}

impl Event {
    pub fn new(clock: Clock, kind: EventKind) -> Self {
        Self { clock, kind }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        let payload = self.kind.encode_payload();
        out.extend_from_slice(&self.kind.code().to_le_bytes());
        out.extend_from_slice(&self.clock.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>10} {:<16}", self.clock, self.kind.name())?;
        match &self.kind {
            EventKind::ListEnd | EventKind::Timestamp => Ok(()),
            EventKind::KeyboardMatrix(m) => write!(f, " rows={:02x?}", m.rows()),
            EventKind::KeyboardRestore(p) => write!(f, " pressed={p}"),
            EventKind::JoystickValue(v) => write!(f, " port1={:02x} port2={:02x}", v.0[1], v.0[2]),
            EventKind::Datasette(c) => write!(f, " {}", c.name()),
            EventKind::AttachDisk { unit, filename } => write!(f, " unit={unit} {filename}"),
            EventKind::AttachTape { filename } => write!(f, " {filename}"),
            EventKind::AttachImage(a) => write!(
                f,
                " unit={} ro={} {} ({} bytes embedded)",
                a.unit,
                a.read_only,
                a.filename,
                a.image.as_ref().map_or(0, Vec::len)
            ),
            EventKind::ResetCpu(mode) => write!(f, " {mode:?}"),
            EventKind::Initial(mode) => write!(f, " {mode:?}"),
            EventKind::SyncTest(r) => write!(
                f,
                " pc={:04x} a={:02x} x={:02x} y={:02x} sp={:02x}",
                r.pc, r.a, r.x, r.y, r.sp
            ),
            EventKind::Resource { name, value } => write!(f, " {name}={value}"),
            EventKind::Unknown { code, data } => write!(f, " type={code} {} bytes", data.len()),
        }
    }
}

/// Ordered, append-only event log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventList {
    events: Vec<Event>,
}

impl EventList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn record(&mut self, clock: Clock, kind: EventKind) {
        self.events.push(Event::new(clock, kind));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Drop the LIST_END marker and anything after it so recording can
    /// continue from the tail of a loaded list.
    pub fn warp_end(&mut self) {
        if let Some(end) = self
            .events
            .iter()
            .position(|e| e.kind == EventKind::ListEnd)
        {
            self.events.truncate(end);
        }
    }

    pub fn ends_with_list_end(&self) -> bool {
        matches!(self.last(), Some(e) if e.kind == EventKind::ListEnd)
    }

    /// Number of TIMESTAMP events, which is the session length in seconds.
    pub fn timestamp_count(&self) -> u32 {
        self.events
            .iter()
            .filter(|e| e.kind == EventKind::Timestamp)
            .count() as u32
    }

    /// Serialize to tuples. A LIST_END tuple is appended (at the clock of
    /// the last event) if the list does not already end with one.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for event in &self.events {
            event.encode_into(&mut out);
        }
        if !self.ends_with_list_end() {
            let clock = self.last().map_or(0, |e| e.clock);
            Event::new(clock, EventKind::ListEnd).encode_into(&mut out);
        }
        out
    }

    /// Parse tuples up to and including the first LIST_END.
    pub fn decode(bytes: &[u8]) -> Result<Self, EventError> {
        let mut events = Vec::new();
        let mut pos = 0;
        loop {
            if bytes.len() - pos < EVENT_HEADER_SIZE {
                return Err(malformed("EVENT", "list is not terminated by LIST_END"));
            }
            let word = |at: usize| {
                u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
            };
            let code = word(pos);
            let clock = word(pos + 4);
            let size = word(pos + 8) as usize;
            pos += EVENT_HEADER_SIZE;
            if bytes.len() - pos < size {
                return Err(malformed("EVENT", format!("tuple at clock {clock} is truncated")));
            }
            let kind = EventKind::decode(code, &bytes[pos..pos + size])?;
            pos += size;
            let done = kind == EventKind::ListEnd;
            events.push(Event::new(clock, kind));
            if done {
                break;
            }
        }
        if pos != bytes.len() {
            debug!("Event: {} bytes after LIST_END ignored", bytes.len() - pos);
        }
        Ok(Self { events })
    }

    /// Append the EVENT module to a snapshot.
    pub fn write_module(&self, writer: &mut SnapshotWriter) -> Result<(), SnapshotError> {
        let mut m = writer.create_module(EVENT_MODULE_NAME, EVENT_MODULE_MAJOR, EVENT_MODULE_MINOR);
        m.write_bytes(&self.encode());
        m.close()
    }

    /// Read the EVENT module of a snapshot.
    pub fn read_module(snapshot: &Snapshot) -> Result<Self, EventError> {
        let mut module = snapshot
            .find_module(EVENT_MODULE_NAME)
            .map_err(|e| malformed("EVENT", e.to_string()))?
            .ok_or(EventError::EventSectionMissing)?;
        if module.major() != EVENT_MODULE_MAJOR {
            return Err(malformed(
                "EVENT",
                format!("module version {}.{}", module.major(), module.minor()),
            ));
        }
        let len = module.remaining();
        let bytes = module
            .read_bytes(len)
            .map_err(|e| malformed("EVENT", e.to_string()))?;
        Self::decode(bytes)
    }
}

impl<'a> IntoIterator for &'a EventList {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl FromIterator<Event> for EventList {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self {
            events: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuples(bytes: &[u8]) -> Vec<(u32, u32, u32)> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let w = |at: usize| u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
            let t = (w(pos), w(pos + 4), w(pos + 8));
            pos += EVENT_HEADER_SIZE + t.2 as usize;
            out.push(t);
        }
        out
    }

    #[test]
    fn encode_closes_list_with_list_end() {
        let mut list = EventList::new();
        list.record(0, EventKind::Initial(InitialMode::HardReset));
        list.record(1000, EventKind::JoystickValue(JoystickValues([0, 0x10, 0])));
        let bytes = list.encode();
        assert_eq!(tuples(&bytes), vec![(9, 0, 1), (3, 1000, 3), (0, 1000, 0)]);

        let decoded = EventList::decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 3);
        assert!(decoded.ends_with_list_end());
        assert_eq!(EventList::decode(&decoded.encode()).unwrap(), decoded);
    }

    #[test]
    fn payload_layouts_are_little_endian() {
        assert_eq!(
            EventKind::Initial(InitialMode::SaveSnapshot("start.vsf".into())).encode_payload(),
            b"\x00start.vsf\x00".to_vec()
        );
        assert_eq!(
            EventKind::Initial(InitialMode::HardReset).encode_payload(),
            vec![2]
        );
        let regs = CpuRegisters {
            pc: 0x1234,
            a: 1,
            x: 2,
            y: 3,
            sp: 4,
        };
        let sync = EventKind::SyncTest(regs).encode_payload();
        assert_eq!(&sync[..4], &[0x34, 0x12, 0, 0]);
        assert_eq!(sync.len(), 20);
        assert_eq!(
            EventKind::Resource {
                name: "A".into(),
                value: ResourceValue::Int(-2)
            }
            .encode_payload(),
            vec![b'A', 0, 0, 0xFE, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn attach_image_without_bytes_decodes_to_none() {
        let attach = EventKind::AttachImage(ImageAttach {
            unit: 8,
            read_only: true,
            filename: "game.d64".into(),
            image: None,
        });
        let payload = attach.encode_payload();
        assert_eq!(EventKind::decode(13, &payload).unwrap(), attach);

        let with_bytes = EventKind::AttachImage(ImageAttach {
            unit: 8,
            read_only: false,
            filename: "game.d64".into(),
            image: Some(vec![1, 2, 3]),
        });
        let payload = with_bytes.encode_payload();
        assert_eq!(EventKind::decode(13, &payload).unwrap(), with_bytes);
    }

    #[test]
    fn unknown_types_round_trip() {
        let bytes = {
            let mut list = EventList::new();
            list.record(5, EventKind::Unknown {
                code: 11,
                data: vec![9, 9],
            });
            list.encode()
        };
        let list = EventList::decode(&bytes).unwrap();
        assert_eq!(
            list.get(0).map(|e| &e.kind),
            Some(&EventKind::Unknown {
                code: 11,
                data: vec![9, 9]
            })
        );
        assert_eq!(list.encode(), bytes);
    }

    #[test]
    fn missing_list_end_is_malformed() {
        let mut bytes = EventList::new().encode();
        assert_eq!(bytes.len(), EVENT_HEADER_SIZE);
        bytes.truncate(8);
        assert!(matches!(
            EventList::decode(&bytes),
            Err(EventError::Malformed { .. })
        ));
    }

    #[test]
    fn bad_payload_sizes_are_malformed() {
        assert!(EventKind::decode(3, &[0, 1]).is_err());
        assert!(EventKind::decode(2, &[]).is_err());
        assert!(EventKind::decode(7, &[9]).is_err());
        assert!(EventKind::decode(9, &[7]).is_err());
        assert!(EventKind::decode(10, &[0; 19]).is_err());
    }

    #[test]
    fn warp_end_removes_tail() {
        let mut list = EventList::new();
        list.record(1, EventKind::Timestamp);
        list.record(2, EventKind::ListEnd);
        list.record(3, EventKind::Timestamp);
        list.warp_end();
        assert_eq!(list.len(), 1);
        assert_eq!(list.timestamp_count(), 1);
    }

    #[test]
    fn start_mode_codes() {
        for code in 0..3 {
            let mode = StartMode::try_from(code).unwrap();
            assert_eq!(i32::from(mode), code);
        }
        assert!(StartMode::try_from(3).is_err());
    }
}
