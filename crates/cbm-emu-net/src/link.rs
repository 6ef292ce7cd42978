//! Socket I/O off the emulation thread.
//!
//! Once a connection has finished its handshake the stream is handed to a
//! [`Link`], which owns a thread that writes queued frames and reassembles
//! incoming ones. The emulation thread talks to it through channels and
//! only ever blocks in [`Link::recv_timeout`], when it needs the peer's
//! frame to continue.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel as cb;
use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};

use crate::NetworkError;
use crate::wire::{self, FrameDecoder};

const POLL_INTERVAL: Duration = Duration::from_micros(100);
const RX_CHUNK: usize = 4096;
const SHUTDOWN_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

pub enum LinkCommand {
    SendFrame(Vec<u8>),
    /// Send a zero-length frame.
    Suspend,
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Frame(Vec<u8>),
    Suspended,
    Disconnected,
    Error(String),
}

/// Handle to the I/O thread of one connection. Dropping it closes the
/// connection after flushing what was already queued.
pub struct Link {
    cmd_tx: mpsc::Sender<LinkCommand>,
    event_rx: cb::Receiver<LinkEvent>,
    peer: Option<SocketAddr>,
    thread: Option<JoinHandle<()>>,
}

impl Link {
    pub fn spawn(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr().ok();
        stream.set_nonblocking(true)?;
        let _ = stream.set_nodelay(true);

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = cb::unbounded();
        let thread = thread::Builder::new()
            .name("netplay-link".to_string())
            .spawn(move || link_thread_main(stream, cmd_rx, event_tx))?;

        Ok(Self {
            cmd_tx,
            event_rx,
            peer,
            thread: Some(thread),
        })
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn send_frame(&self, payload: Vec<u8>) -> Result<(), NetworkError> {
        self.cmd_tx
            .send(LinkCommand::SendFrame(payload))
            .map_err(|_| NetworkError::Disconnected)
    }

    pub fn suspend(&self) -> Result<(), NetworkError> {
        self.cmd_tx
            .send(LinkCommand::Suspend)
            .map_err(|_| NetworkError::Disconnected)
    }

    /// Wait for the next thing the peer did. `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<LinkEvent>, NetworkError> {
        match self.event_rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(cb::RecvTimeoutError::Timeout) => Ok(None),
            Err(cb::RecvTimeoutError::Disconnected) => Err(NetworkError::Disconnected),
        }
    }

    pub fn try_recv(&self) -> Option<LinkEvent> {
        self.event_rx.try_recv().ok()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(LinkCommand::Shutdown);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("Net: link thread panicked");
        }
    }
}

enum ReadState {
    Alive,
    Disconnected,
}

fn poll_stream_read(stream: &mut TcpStream, decoder: &mut FrameDecoder) -> io::Result<ReadState> {
    let mut temp = [0u8; RX_CHUNK];
    loop {
        match stream.read(&mut temp) {
            Ok(0) => return Ok(ReadState::Disconnected),
            Ok(n) => {
                decoder.extend(&temp[..n]);
                if n < temp.len() {
                    return Ok(ReadState::Alive);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(ReadState::Alive),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn flush_send_queue(stream: &mut TcpStream, tx_queue: &mut VecDeque<u8>) -> io::Result<()> {
    while !tx_queue.is_empty() {
        let (front, _) = tx_queue.as_slices();
        match stream.write(front) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "socket closed while writing",
                ));
            }
            Ok(written) => {
                tx_queue.drain(..written);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Write out whatever is still queued before the socket closes.
fn drain_on_shutdown(stream: &mut TcpStream, tx_queue: &mut VecDeque<u8>) {
    if tx_queue.is_empty() {
        return;
    }
    if stream.set_nonblocking(false).is_ok()
        && stream.set_write_timeout(Some(SHUTDOWN_WRITE_TIMEOUT)).is_ok()
    {
        let (a, b) = tx_queue.as_slices();
        if stream.write_all(a).and_then(|_| stream.write_all(b)).is_err() {
            debug!("Net: {} queued bytes lost on shutdown", tx_queue.len());
        }
    }
    tx_queue.clear();
}

fn link_thread_main(
    mut stream: TcpStream,
    cmd_rx: mpsc::Receiver<LinkCommand>,
    event_tx: cb::Sender<LinkEvent>,
) {
    let mut tx_queue: VecDeque<u8> = VecDeque::new();
    let mut decoder = FrameDecoder::new();

    loop {
        loop {
            match cmd_rx.try_recv() {
                Ok(LinkCommand::SendFrame(payload)) => {
                    tx_queue.extend(wire::encode_frame(&payload));
                }
                Ok(LinkCommand::Suspend) => {
                    tx_queue.extend(wire::encode_frame(&[]));
                }
                Ok(LinkCommand::Shutdown) | Err(mpsc::TryRecvError::Disconnected) => {
                    drain_on_shutdown(&mut stream, &mut tx_queue);
                    let _ = stream.shutdown(Shutdown::Both);
                    debug!("Net: link thread stopped");
                    return;
                }
                Err(mpsc::TryRecvError::Empty) => break,
            }
        }

        if let Err(e) = flush_send_queue(&mut stream, &mut tx_queue) {
            warn!("Net: send failed: {e}");
            let _ = event_tx.send(LinkEvent::Error(e.to_string()));
            let _ = event_tx.send(LinkEvent::Disconnected);
            return;
        }

        match poll_stream_read(&mut stream, &mut decoder) {
            Ok(ReadState::Alive) => {}
            Ok(ReadState::Disconnected) => {
                info!("Net: remote host closed the connection");
                forward_frames(&mut decoder, &event_tx);
                let _ = event_tx.send(LinkEvent::Disconnected);
                return;
            }
            Err(e) => {
                warn!("Net: receive failed: {e}");
                let _ = event_tx.send(LinkEvent::Error(e.to_string()));
                let _ = event_tx.send(LinkEvent::Disconnected);
                return;
            }
        }

        if !forward_frames(&mut decoder, &event_tx) {
            let _ = event_tx.send(LinkEvent::Disconnected);
            return;
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Hand every complete frame to the emulation thread. False when the stream
/// is corrupt.
fn forward_frames(decoder: &mut FrameDecoder, event_tx: &cb::Sender<LinkEvent>) -> bool {
    loop {
        match decoder.next_frame() {
            Ok(Some(frame)) if frame.is_empty() => {
                let _ = event_tx.send(LinkEvent::Suspended);
            }
            Ok(Some(frame)) => {
                let _ = event_tx.send(LinkEvent::Frame(frame));
            }
            Ok(None) => return true,
            Err(e) => {
                warn!("Net: {e}");
                let _ = event_tx.send(LinkEvent::Error(e.to_string()));
                return false;
            }
        }
    }
}

pub fn resolve_socket_addr(host: &str, port: u16) -> io::Result<SocketAddr> {
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let endpoint = format!("{host}:{port}");
    let mut addrs = endpoint.to_socket_addrs()?;
    addrs.next().ok_or_else(|| {
        io::Error::new(
            ErrorKind::AddrNotAvailable,
            format!("No address resolved for {endpoint}"),
        )
    })
}

/// A non-blocking listener that accepts a single pending connection.
pub fn listen(bind_address: &str, port: u16) -> Result<TcpListener, NetworkError> {
    let addr_text = format!("{bind_address}:{port}");
    let bind_failed = |source| NetworkError::Bind {
        addr: addr_text.clone(),
        source,
    };

    let addr = resolve_socket_addr(bind_address, port).map_err(bind_failed)?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_failed)?;
    socket.set_reuse_address(true).map_err(bind_failed)?;
    socket.bind(&addr.into()).map_err(bind_failed)?;
    socket.listen(1).map_err(bind_failed)?;
    socket.set_nonblocking(true).map_err(bind_failed)?;

    let listener: TcpListener = socket.into();
    info!("Net: listening on {}", listener.local_addr().unwrap_or(addr));
    Ok(listener)
}

pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, NetworkError> {
    let connect_failed = |source| NetworkError::Connect {
        addr: format!("{host}:{port}"),
        source,
    };
    let addr = resolve_socket_addr(host, port).map_err(connect_failed)?;
    let stream = TcpStream::connect_timeout(&addr, timeout).map_err(connect_failed)?;
    let _ = stream.set_nodelay(true);
    info!("Net: connected to {addr}");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = listen("127.0.0.1", 0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = connect("127.0.0.1", port, Duration::from_secs(5)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match listener.accept() {
                Ok((server, _)) => return (server, client),
                Err(e) if e.kind() == ErrorKind::WouldBlock && Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => panic!("accept failed: {e}"),
            }
        }
    }

    fn next(link: &Link) -> LinkEvent {
        link.recv_timeout(Duration::from_secs(5))
            .unwrap()
            .expect("no event from link")
    }

    #[test]
    fn frames_and_suspend_cross_the_link() {
        let (a, b) = pair();
        let a = Link::spawn(a).unwrap();
        let b = Link::spawn(b).unwrap();

        a.send_frame(b"first".to_vec()).unwrap();
        a.suspend().unwrap();
        a.send_frame(vec![7; 100_000]).unwrap();

        assert_eq!(next(&b), LinkEvent::Frame(b"first".to_vec()));
        assert_eq!(next(&b), LinkEvent::Suspended);
        assert_eq!(next(&b), LinkEvent::Frame(vec![7; 100_000]));
    }

    #[test]
    fn peer_hang_up_is_reported() {
        let (a, b) = pair();
        let a = Link::spawn(a).unwrap();
        let b = Link::spawn(b).unwrap();
        a.send_frame(b"bye".to_vec()).unwrap();
        drop(a);

        assert_eq!(next(&b), LinkEvent::Frame(b"bye".to_vec()));
        assert_eq!(next(&b), LinkEvent::Disconnected);
    }

    #[test]
    fn nothing_to_receive_times_out() {
        let (a, b) = pair();
        let _a = Link::spawn(a).unwrap();
        let b = Link::spawn(b).unwrap();
        assert_eq!(b.recv_timeout(Duration::from_millis(20)).unwrap(), None);
    }

    #[test]
    fn empty_bind_address_means_any() {
        let addr = resolve_socket_addr("", 6502).unwrap();
        assert!(addr.ip().is_unspecified());
        assert_eq!(addr.port(), 6502);
    }
}
