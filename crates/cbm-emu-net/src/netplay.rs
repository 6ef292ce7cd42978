use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use cbm_emu_core::emulator::Emulator;
use cbm_emu_core::event::{Event, EventKind, EventList};
use cbm_emu_core::joystick::JoystickValues;
use cbm_emu_core::machine::{CpuRegisters, Machine};
use cbm_emu_core::resources::{ResourceValue, Resources};
use cbm_emu_core::ui::UiHooks;
use log::{debug, error, info, warn};

use crate::control::NetworkControl;
use crate::frames::FrameRing;
use crate::link::{self, Link, LinkEvent};
use crate::wire;
use crate::{NetworkError, NetworkMode};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings-list entry carrying the server's control mask.
const CONTROL_SETTING: &str = "NetworkControl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetplayConfig {
    pub server_name: String,
    /// Empty means any address.
    pub bind_address: String,
    pub port: u16,
    /// Used until the delay test picks one, and when it fails.
    pub frame_delta: u32,
    pub control: NetworkControl,
    /// How long to wait for the peer's frame before giving up on it.
    pub frame_timeout: Duration,
}

impl NetplayConfig {
    pub fn from_resources(resources: &Resources) -> Self {
        Self {
            server_name: resources.network_server_name.clone(),
            bind_address: resources.network_server_bind_address.clone(),
            port: resources.network_server_port,
            frame_delta: resources.network_frame_delta.max(1),
            control: NetworkControl::new(resources.network_control),
            frame_timeout: FRAME_TIMEOUT,
        }
    }
}

impl Default for NetplayConfig {
    fn default() -> Self {
        Self::from_resources(&Resources::default())
    }
}

/// One end of a netplay session.
pub struct Netplay {
    config: NetplayConfig,
    mode: NetworkMode,
    listener: Option<TcpListener>,
    link: Option<Link>,
    frames: FrameRing,
    /// Joystick state as replayed so far; every replayed joystick value is
    /// merged into it.
    joystick: JoystickValues,
    suspended: bool,
    remote_suspended: bool,
    frames_played: u64,
}

impl Netplay {
    pub fn new(config: NetplayConfig) -> Self {
        let frames = FrameRing::new(config.frame_delta);
        Self {
            config,
            mode: NetworkMode::Idle,
            listener: None,
            link: None,
            frames,
            joystick: JoystickValues::default(),
            suspended: false,
            remote_suspended: false,
            frames_played: 0,
        }
    }

    pub fn from_resources(resources: &Resources) -> Self {
        Self::new(NetplayConfig::from_resources(resources))
    }

    pub fn mode(&self) -> NetworkMode {
        self.mode
    }

    pub fn is_connected(&self) -> bool {
        self.mode.is_connected()
    }

    pub fn config(&self) -> &NetplayConfig {
        &self.config
    }

    pub fn control(&self) -> NetworkControl {
        self.config.control
    }

    pub fn frame_delta(&self) -> usize {
        self.frames.frame_delta()
    }

    /// Frames of both peers replayed since the connection was made.
    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.link.as_ref().and_then(Link::peer)
    }

    /// Listen for a client. The connection itself is made by [`Self::hook`].
    pub fn start_server<M: Machine, U: UiHooks>(
        &mut self,
        emu: &mut Emulator<M, U>,
    ) -> Result<(), NetworkError> {
        if self.mode != NetworkMode::Idle {
            return Err(NetworkError::WrongMode(self.mode));
        }
        let listener = match link::listen(&self.config.bind_address, self.config.port) {
            Ok(listener) => listener,
            Err(e) => {
                emu.report_error(&format!("Cannot start netplay server: {e}"));
                return Err(e);
            }
        };
        self.listener = Some(listener);
        self.mode = NetworkMode::Server;
        emu.report_status("Server is waiting for a client...");
        Ok(())
    }

    /// Connect to the configured server and take over its machine state.
    /// Blocks until the handshake is done.
    pub fn connect<M: Machine, U: UiHooks>(
        &mut self,
        emu: &mut Emulator<M, U>,
    ) -> Result<(), NetworkError> {
        if self.mode != NetworkMode::Idle {
            return Err(NetworkError::WrongMode(self.mode));
        }
        let result = self.client_handshake(emu);
        if let Err(e) = &result {
            emu.report_error(&format!(
                "Cannot connect to {}:{}: {e}",
                self.config.server_name, self.config.port
            ));
        }
        result
    }

    fn client_handshake<M: Machine, U: UiHooks>(
        &mut self,
        emu: &mut Emulator<M, U>,
    ) -> Result<(), NetworkError> {
        let mut stream = link::connect(&self.config.server_name, self.config.port, CONNECT_TIMEOUT)?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;

        emu.report_status("Receiving snapshot from server...");
        let snapshot = wire::read_frame(&mut stream)?;
        let settings = EventList::decode(&wire::read_frame(&mut stream)?)?;

        let mut machine_settings = Vec::new();
        for (name, value) in wire::settings_from_list(&settings) {
            match (name.as_str(), &value) {
                (CONTROL_SETTING, ResourceValue::Int(bits)) => {
                    self.config.control = NetworkControl::new(*bits as u32);
                    debug!("Net: server control mask {}", self.config.control);
                }
                _ => machine_settings.push((name, value)),
            }
        }
        emu.apply_settings(&machine_settings);
        emu.read_snapshot_bytes(snapshot)?;

        let delta = match wire::delay_test_client(&mut stream) {
            Ok(delta) => u32::from(delta),
            Err(e) => {
                error!("Net: delay test failed: {e}");
                self.config.frame_delta
            }
        };
        stream.set_read_timeout(None)?;
        self.start_session(emu, stream, delta, NetworkMode::Client)
    }

    fn accept_client<M: Machine, U: UiHooks>(
        &mut self,
        emu: &mut Emulator<M, U>,
        mut stream: TcpStream,
    ) -> Result<(), NetworkError> {
        stream.set_nonblocking(false)?;
        let _ = stream.set_nodelay(true);
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;

        emu.report_status("Sending snapshot to client...");
        let snapshot = emu.write_snapshot_bytes()?;
        if let Err(e) = wire::write_frame(&mut stream, &snapshot) {
            emu.report_error("Cannot send snapshot to client");
            return Err(e.into());
        }

        let mut settings = emu.event_safe_settings();
        settings.push((
            CONTROL_SETTING.to_string(),
            ResourceValue::Int(self.config.control.bits() as i32),
        ));
        wire::write_frame(&mut stream, &wire::settings_list(&settings, emu.clock()).encode())?;

        let delta = match wire::delay_test_server(&mut stream, emu.machine().refresh_rate()) {
            Ok(delta) => u32::from(delta),
            Err(e) => {
                error!("Net: delay test failed: {e}");
                self.config.frame_delta
            }
        };
        stream.set_read_timeout(None)?;
        self.start_session(emu, stream, delta, NetworkMode::ServerConnected)
    }

    fn start_session<M: Machine, U: UiHooks>(
        &mut self,
        emu: &mut Emulator<M, U>,
        stream: TcpStream,
        frame_delta: u32,
        mode: NetworkMode,
    ) -> Result<(), NetworkError> {
        self.link = Some(Link::spawn(stream)?);
        self.frames = FrameRing::new(frame_delta);
        self.joystick = JoystickValues::default();
        self.suspended = false;
        self.remote_suspended = false;
        self.frames_played = 0;
        self.mode = mode;

        emu.set_network_capture(true);
        self.record_sync_test(emu);
        info!("Net: connected as {mode} with {} frames delta", self.frames.frame_delta());
        emu.report_status(&format!("Using {} frames delay.", self.frames.frame_delta()));
        Ok(())
    }

    fn record_sync_test<M: Machine, U: UiHooks>(&mut self, emu: &Emulator<M, U>) {
        let clock = emu.clock();
        self.frames
            .current_mut()
            .record(clock, EventKind::SyncTest(emu.registers()));
    }

    /// Call once per emulated frame. A listening server picks up a waiting
    /// client here; a connected side sends its frame and, once the ring is
    /// full, replays the oldest frame of both peers.
    ///
    /// Errors mean the session has ended; the mode already reflects that.
    pub fn hook<M: Machine, U: UiHooks>(
        &mut self,
        emu: &mut Emulator<M, U>,
    ) -> Result<(), NetworkError> {
        match self.mode {
            NetworkMode::Idle => Ok(()),
            NetworkMode::Server => {
                self.poll_accept(emu);
                Ok(())
            }
            NetworkMode::ServerConnected | NetworkMode::Client => {
                self.send_frame(emu)?;
                self.receive_frame(emu)
            }
        }
    }

    fn poll_accept<M: Machine, U: UiHooks>(&mut self, emu: &mut Emulator<M, U>) {
        let Some(listener) = &self.listener else {
            return;
        };
        match listener.accept() {
            Ok((stream, addr)) => {
                info!("Net: client connected from {addr}");
                match self.accept_client(emu, stream) {
                    Ok(()) => emu.report_status("Client connected..."),
                    Err(e) => warn!("Net: handshake with {addr} failed: {e}"),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => warn!("Net: accept failed: {e}"),
        }
    }

    fn send_frame<M: Machine, U: UiHooks>(
        &mut self,
        emu: &mut Emulator<M, U>,
    ) -> Result<(), NetworkError> {
        let is_server = self.mode.is_server();
        for event in emu.take_network_events() {
            if self.config.control.allows(is_server, &event.kind) {
                self.frames.current_mut().push(event);
            } else {
                debug!("Net: {} not controlled by this side", event.kind.name());
            }
        }
        let clock = emu.clock();
        self.frames.current_mut().record(clock, EventKind::ListEnd);

        let bytes = self.frames.current().encode();
        let sent = match &self.link {
            Some(link) => link.send_frame(bytes),
            None => Err(NetworkError::NotConnected),
        };
        if let Err(e) = sent {
            emu.report_status("Remote host disconnected.");
            self.disconnect(emu);
            return Err(e);
        }
        self.suspended = false;
        Ok(())
    }

    fn receive_frame<M: Machine, U: UiHooks>(
        &mut self,
        emu: &mut Emulator<M, U>,
    ) -> Result<(), NetworkError> {
        if self.frames.is_full() {
            let remote = match self.wait_for_frame(emu) {
                Ok(bytes) => EventList::decode(&bytes).map_err(NetworkError::from),
                Err(e) => Err(e),
            };
            let remote = match remote {
                Ok(list) => list,
                Err(e) => {
                    emu.report_status("Remote host disconnected.");
                    self.disconnect(emu);
                    return Err(e);
                }
            };

            let local = self.frames.to_play();
            let (server, client) = if self.mode == NetworkMode::ServerConnected {
                (local, &remote)
            } else {
                (&remote, local)
            };

            if sync_mismatch(server, client) {
                emu.report_error("Network out of sync - disconnecting.");
                self.disconnect(emu);
                return Err(NetworkError::OutOfSync);
            }

            self.joystick = replay_frame(emu, self.config.control, self.joystick, server, client);
            self.frames_played += 1;
        }

        self.frames.advance();
        self.record_sync_test(emu);
        Ok(())
    }

    /// Block until the peer's next frame arrives. A suspended peer is
    /// waited for indefinitely; otherwise the wait is bounded by the frame
    /// timeout.
    fn wait_for_frame<M: Machine, U: UiHooks>(
        &mut self,
        emu: &mut Emulator<M, U>,
    ) -> Result<Vec<u8>, NetworkError> {
        let link = self.link.as_ref().ok_or(NetworkError::NotConnected)?;
        loop {
            match link.recv_timeout(self.config.frame_timeout)? {
                Some(LinkEvent::Frame(bytes)) => {
                    if self.remote_suspended {
                        self.remote_suspended = false;
                        emu.report_status("");
                    }
                    return Ok(bytes);
                }
                Some(LinkEvent::Suspended) => {
                    if !self.remote_suspended {
                        self.remote_suspended = true;
                        emu.report_status("Remote host suspending...");
                    }
                }
                Some(LinkEvent::Error(message)) => warn!("Net: {message}"),
                Some(LinkEvent::Disconnected) => return Err(NetworkError::Disconnected),
                None if self.remote_suspended => {}
                None => {
                    warn!(
                        "Net: no frame from peer within {:?}",
                        self.config.frame_timeout
                    );
                    return Err(NetworkError::Disconnected);
                }
            }
        }
    }

    /// Tell the peer that emulation is paused. Cleared by the next frame
    /// sent.
    pub fn suspend(&mut self) -> Result<(), NetworkError> {
        if !self.mode.is_connected() || self.suspended {
            return Ok(());
        }
        let link = self.link.as_ref().ok_or(NetworkError::NotConnected)?;
        link.suspend()?;
        self.suspended = true;
        Ok(())
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn is_remote_suspended(&self) -> bool {
        self.remote_suspended
    }

    /// Drop the connection. A connected server goes back to listening;
    /// everything else goes idle.
    pub fn disconnect<M: Machine, U: UiHooks>(&mut self, emu: &mut Emulator<M, U>) {
        self.link = None;
        emu.set_network_capture(false);
        self.frames = FrameRing::new(self.config.frame_delta);
        self.suspended = false;
        self.remote_suspended = false;

        let previous = self.mode;
        self.mode = if previous == NetworkMode::ServerConnected {
            NetworkMode::Server
        } else {
            self.listener = None;
            NetworkMode::Idle
        };
        info!("Net: disconnected ({previous} -> {})", self.mode);
        emu.report_status("Netplay disconnected...");
    }

    /// End any session and stop listening.
    pub fn shutdown<M: Machine, U: UiHooks>(&mut self, emu: &mut Emulator<M, U>) {
        if self.mode.is_connected() {
            self.disconnect(emu);
        }
        self.listener = None;
        self.mode = NetworkMode::Idle;
    }
}

fn first_sync_test(list: &EventList) -> Option<CpuRegisters> {
    match list.get(0).map(|e| &e.kind) {
        Some(EventKind::SyncTest(regs)) => Some(*regs),
        _ => None,
    }
}

/// True when both frames open with a SYNC_TEST and the registers differ.
pub fn sync_mismatch(server: &EventList, client: &EventList) -> bool {
    match (first_sync_test(server), first_sync_test(client)) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    }
}

/// Replay one frame of both peers, the server's events first. Each side's
/// events pass its control mask, and joystick values only change the ports
/// their sender controls. Returns the joystick state after the frame.
pub fn replay_frame<M: Machine, U: UiHooks>(
    emu: &mut Emulator<M, U>,
    control: NetworkControl,
    joystick: JoystickValues,
    server: &EventList,
    client: &EventList,
) -> JoystickValues {
    let mut joystick = joystick;
    for (list, from_server) in [(server, true), (client, false)] {
        let events: Vec<Event> = list
            .iter()
            .filter(|e| control.allows(from_server, &e.kind))
            .map(|e| match &e.kind {
                EventKind::JoystickValue(sent) => {
                    joystick = control.merge_joystick(from_server, joystick, sent);
                    Event::new(e.clock, EventKind::JoystickValue(joystick))
                }
                _ => e.clone(),
            })
            .collect();
        emu.replay_network_events(&events);
    }
    joystick
}
