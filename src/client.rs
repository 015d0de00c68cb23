/*!
 * Blocking TCP Client
 *
 * This module implements the single-shot request/response client: one IPv4
 * stream socket, created lazily on first use, reused for every later call
 * and closed when the owner is dropped. Every operation blocks the calling
 * thread until the OS completes it or fails.
 */

use crate::error::{ClientError, Result};
use crate::resolve::{destination, Resolve, SystemResolver};
use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, MutexGuard};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};

/// An established connection to a server
///
/// Owning a `Connection` means the socket is connected. Dropping it closes
/// the descriptor.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    /// Create a socket, resolve `host` and connect to `host:port`
    ///
    /// The socket is created before resolution. If resolution or connect
    /// fails, the socket is dropped (and closed) before returning.
    pub fn open<R: Resolve + ?Sized>(resolver: &R, host: &str, port: u16) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(|e| {
            log::error!("Could not create socket: {}", e);
            ClientError::Socket(e)
        })?;

        let addr = destination(resolver, host, port)?;

        if let Err(source) = socket.connect(&addr.into()) {
            log::error!("Connect to {} failed: {}", addr, source);
            return Err(ClientError::Connect { addr, source });
        }

        log::info!("Connected to {}", addr);
        Ok(Self {
            stream: socket.into(),
            peer: addr,
        })
    }

    /// Address this connection was established to
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Issue exactly one send of `data`
    ///
    /// Returns the number of bytes the OS accepted, which may be fewer than
    /// `data.len()`. Short writes are not retried.
    pub fn transmit(&mut self, data: &[u8]) -> Result<usize> {
        match self.stream.write(data) {
            Ok(n) => {
                log::debug!("Data sent: {} of {} bytes", n, data.len());
                Ok(n)
            }
            Err(e) => {
                log::error!("Send failed: {}", e);
                Err(ClientError::Send(e))
            }
        }
    }

    /// Send all of `data`, looping over short writes
    pub fn transmit_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).map_err(|e| {
            log::error!("Send failed: {}", e);
            ClientError::Send(e)
        })?;
        log::debug!("Data sent: {} bytes", data.len());
        Ok(())
    }

    /// Perform one blocking read into `buf`
    ///
    /// `Ok(0)` means the peer closed the connection in an orderly way.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.stream.read(buf) {
            Ok(n) => {
                log::debug!("Received data: {} bytes", n);
                Ok(n)
            }
            Err(e) => {
                log::error!("recv failed: {}", e);
                Err(ClientError::Recv(e))
            }
        }
    }

    /// Perform one blocking read of up to `capacity` bytes
    pub fn receive_bytes(&mut self, capacity: usize) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(capacity);
        let n = self.receive(&mut buf)?;
        buf.truncate(n);
        Ok(buf.freeze())
    }
}

/// Lazily connecting client bound to one `host:port`
///
/// Construction performs no I/O. The first operation resolves the host and
/// connects; once connected, the same socket is used for the lifetime of the
/// client. There is no reconnect: a failure on a dead socket is returned to
/// the caller.
#[derive(Debug)]
pub struct TcpClient<R = SystemResolver> {
    host: String,
    port: u16,
    resolver: R,
    conn: Option<Connection>,
}

impl TcpClient {
    /// Create a client that resolves hostnames through the platform resolver
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_resolver(host, port, SystemResolver)
    }
}

impl<R: Resolve> TcpClient<R> {
    /// Create a client with a custom resolver
    pub fn with_resolver(host: impl Into<String>, port: u16, resolver: R) -> Self {
        Self {
            host: host.into(),
            port,
            resolver,
            conn: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Peer address of the stored connection, if connected
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.conn.as_ref().map(Connection::peer_addr)
    }

    /// Establish a fresh connection without touching the stored one
    pub fn open(&self) -> Result<Connection> {
        Connection::open(&self.resolver, &self.host, self.port)
    }

    /// Connect if not already connected
    ///
    /// A stored connection is reused without any liveness check. On failure
    /// nothing is stored, so the next call starts over from resolution.
    pub fn connect(&mut self) -> Result<()> {
        self.connection().map(|_| ())
    }

    /// Connect if needed, then issue one send of `data`
    pub fn transmit(&mut self, data: &[u8]) -> Result<usize> {
        self.connection()?.transmit(data)
    }

    /// Connect if needed, then send all of `data`
    pub fn transmit_all(&mut self, data: &[u8]) -> Result<()> {
        self.connection()?.transmit_all(data)
    }

    /// Connect if needed, then perform one read into `buf`
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.connection()?.receive(buf)
    }

    /// Connect if needed, then perform one read of up to `capacity` bytes
    pub fn receive_bytes(&mut self, capacity: usize) -> Result<Bytes> {
        self.connection()?.receive_bytes(capacity)
    }

    /// Give up the stored connection, if any
    pub fn into_connection(self) -> Option<Connection> {
        self.conn
    }

    fn connection(&mut self) -> Result<&mut Connection> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.open()?,
        };
        Ok(self.conn.insert(conn))
    }
}

/// A [`TcpClient`] that can be shared between threads
///
/// The connect-once transition and each operation run under one mutex, so
/// concurrent callers never race to create the socket.
#[derive(Debug)]
pub struct SharedClient<R = SystemResolver> {
    inner: Mutex<TcpClient<R>>,
}

impl<R: Resolve> SharedClient<R> {
    pub fn new(client: TcpClient<R>) -> Self {
        Self {
            inner: Mutex::new(client),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().is_connected()
    }

    /// Hold the client for a multi-step exchange
    pub fn lock(&self) -> MutexGuard<'_, TcpClient<R>> {
        self.inner.lock()
    }

    pub fn connect(&self) -> Result<()> {
        self.inner.lock().connect()
    }

    pub fn transmit(&self, data: &[u8]) -> Result<usize> {
        self.inner.lock().transmit(data)
    }

    pub fn receive(&self, buf: &mut [u8]) -> Result<usize> {
        self.inner.lock().receive(buf)
    }

    /// Send `data` then read one reply of up to `capacity` bytes
    ///
    /// Both steps happen under a single lock acquisition, so replies cannot
    /// interleave between callers.
    pub fn request(&self, data: &[u8], capacity: usize) -> Result<Bytes> {
        let mut client = self.inner.lock();
        client.transmit(data)?;
        client.receive_bytes(capacity)
    }

    pub fn into_inner(self) -> TcpClient<R> {
        self.inner.into_inner()
    }
}

impl<R: Resolve> From<TcpClient<R>> for SharedClient<R> {
    fn from(client: TcpClient<R>) -> Self {
        Self::new(client)
    }
}
