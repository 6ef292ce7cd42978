//! Everything on the wire is a little-endian `u32` length followed by that
//! many bytes. Frames carry an encoded event list; a zero length means the
//! peer has suspended emulation. The snapshot and the settings list of the
//! connection handshake use the same framing.

use std::io::{self, ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use cbm_emu_core::clock::Clock;
use cbm_emu_core::event::{Event, EventKind, EventList};
use cbm_emu_core::resources::ResourceValue;
use log::{debug, trace};

pub const LENGTH_PREFIX: usize = 4;

/// Anything bigger is treated as a corrupt stream.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

pub const DELAY_TEST_PACKETS: usize = 50;
pub const DELAY_TEST_PACKET_LEN: usize = 0x68;

/// Frame delay used when the delay test fails.
pub const DEFAULT_DELAY_FRAMES: u8 = 5;

pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LENGTH_PREFIX + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("frame of {} bytes is too large", payload.len()),
        ));
    }
    w.write_all(&encode_frame(payload))?;
    w.flush()
}

/// Fill `buf` completely, retrying short reads.
pub fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                ));
            }
            Ok(n) => {
                filled += n;
                if filled < buf.len() {
                    trace!("Net: fragmented, {filled} of {} bytes", buf.len());
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn frame_len(prefix: [u8; LENGTH_PREFIX]) -> io::Result<usize> {
    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("peer announced a frame of {len} bytes"),
        ));
    }
    Ok(len)
}

/// Read one frame. An empty payload is a suspend notice.
pub fn read_frame<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; LENGTH_PREFIX];
    read_full(r, &mut prefix)?;
    let mut payload = vec![0u8; frame_len(prefix)?];
    read_full(r, &mut payload)?;
    Ok(payload)
}

/// Reassembles frames from a byte stream that arrives in arbitrary pieces.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    rx_buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.rx_buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.rx_buf.len()
    }

    /// The next complete frame, if one has arrived.
    pub fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Some(prefix) = self.rx_buf.first_chunk::<LENGTH_PREFIX>() else {
            return Ok(None);
        };
        let len = frame_len(*prefix)?;
        let total = LENGTH_PREFIX + len;
        if self.rx_buf.len() < total {
            trace!("Net: fragmented, {} of {total} bytes", self.rx_buf.len());
            return Ok(None);
        }
        let frame = self.rx_buf[LENGTH_PREFIX..total].to_vec();
        self.rx_buf.drain(..total);
        Ok(Some(frame))
    }
}

/// The settings a server hands to a new client, as RESOURCE events.
pub fn settings_list(settings: &[(String, ResourceValue)], clock: Clock) -> EventList {
    let mut list: EventList = settings
        .iter()
        .map(|(name, value)| {
            Event::new(
                clock,
                EventKind::Resource {
                    name: name.clone(),
                    value: value.clone(),
                },
            )
        })
        .collect();
    list.record(clock, EventKind::ListEnd);
    list
}

/// Inverse of [`settings_list`]. Events other than RESOURCE are skipped.
pub fn settings_from_list(list: &EventList) -> Vec<(String, ResourceValue)> {
    list.iter()
        .filter_map(|e| match &e.kind {
            EventKind::Resource { name, value } => Some((name.clone(), value.clone())),
            _ => None,
        })
        .collect()
}

/// `5 + refresh * delay`, taking the round trip that 90% of the samples
/// beat.
pub fn frame_delta_for(round_trips: &mut [Duration], refresh_hz: f64) -> u8 {
    if round_trips.is_empty() {
        return DEFAULT_DELAY_FRAMES;
    }
    round_trips.sort_unstable_by(|a, b| b.cmp(a));
    let slow = round_trips[round_trips.len() / 10];
    let extra = (refresh_hz * slow.as_secs_f64()).clamp(0.0, 250.0);
    DEFAULT_DELAY_FRAMES + extra as u8
}

/// Server side of the delay test: time [`DELAY_TEST_PACKETS`] echoes, pick
/// the frame delay and tell the client.
pub fn delay_test_server<S: Read + Write>(stream: &mut S, refresh_hz: f64) -> io::Result<u8> {
    let start = Instant::now();
    let mut packet = [0u8; DELAY_TEST_PACKET_LEN];
    let mut round_trips = Vec::with_capacity(DELAY_TEST_PACKETS);

    for i in 0..DELAY_TEST_PACKETS {
        let sent_at = Instant::now();
        let stamp = sent_at.duration_since(start).as_nanos() as u64;
        packet[..8].copy_from_slice(&stamp.to_le_bytes());
        packet[8] = i as u8;
        stream.write_all(&packet)?;
        stream.flush()?;
        read_full(stream, &mut packet)?;
        round_trips.push(sent_at.elapsed());
    }

    let delta = frame_delta_for(&mut round_trips, refresh_hz);
    debug!("Net: slowest round trips {:?}", &round_trips[..5]);
    stream.write_all(&[delta])?;
    stream.flush()?;
    Ok(delta)
}

/// Client side of the delay test: echo every packet and read the verdict.
pub fn delay_test_client<S: Read + Write>(stream: &mut S) -> io::Result<u8> {
    let mut packet = [0u8; DELAY_TEST_PACKET_LEN];
    for _ in 0..DELAY_TEST_PACKETS {
        read_full(stream, &mut packet)?;
        stream.write_all(&packet)?;
        stream.flush()?;
    }
    let mut delta = [0u8; 1];
    read_full(stream, &mut delta)?;
    Ok(delta[0])
}
