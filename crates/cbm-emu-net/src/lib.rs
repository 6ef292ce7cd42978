//! Lock-step netplay between two emulator instances.
//!
//! One side listens ([`netplay::Netplay::start_server`]), the other connects
//! ([`netplay::Netplay::connect`]). After the server has handed over a
//! snapshot and its event-safe settings, both sides call
//! [`netplay::Netplay::hook`] once per emulated frame: the inputs of the
//! frame are sent to the peer and, once the frame ring is full, the peer's
//! frame from `frame_delta` frames ago is replayed together with the local
//! one, server first.

use std::fmt;
use std::io;

use cbm_emu_core::event::EventError;
use cbm_emu_core::snapshot::SnapshotError;
use thiserror::Error;

/// Which side of the link controls which inputs.
pub mod control;

/// Ring of per-frame event lists.
pub mod frames;

/// Socket I/O thread.
pub mod link;

/// The per-frame driver and the connection handshakes.
pub mod netplay;

/// Length-prefixed framing and the delay test.
pub mod wire;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("network out of sync")]
    OutOfSync,
    #[error("remote host disconnected")]
    Disconnected,
    #[error("not connected")]
    NotConnected,
    #[error("operation not allowed in {0} mode")]
    WrongMode(NetworkMode),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Event(#[from] EventError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkMode {
    #[default]
    Idle,
    /// Listening for a client.
    Server,
    ServerConnected,
    Client,
}

impl NetworkMode {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::ServerConnected | Self::Client)
    }

    pub fn is_server(self) -> bool {
        matches!(self, Self::Server | Self::ServerConnected)
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Server => "server",
            Self::ServerConnected => "server (connected)",
            Self::Client => "client",
        };
        f.write_str(name)
    }
}
