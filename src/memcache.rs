/*!
 * Memcache Text Protocol Helper
 *
 * Request encoders, incremental reply decoders and a small client for
 * exercising a memcache-compatible server over a [`TcpClient`]. The
 * decoders follow the same contract as the RESP parser: `Ok(None)` means
 * more bytes are needed, `Ok(Some((consumed, value)))` means a complete
 * reply was decoded.
 */

use crate::client::TcpClient;
use crate::error::ClientError;
use crate::resolve::{Resolve, SystemResolver};
use crate::RECV_BUF;
use bytes::{Buf, Bytes, BytesMut};
use smol_str::SmolStr;
use thiserror::Error;

/// Longest key a memcache server accepts
pub const MAX_KEY_LEN: usize = 250;

/// Largest value accepted in a `VALUE` block (memcache's default item size)
pub const MAX_VALUE_LEN: usize = 1024 * 1024;

const END: &[u8] = b"END";

#[derive(Debug, Error)]
pub enum MemcacheError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("invalid key {0:?}")]
    InvalidKey(String),
    #[error("the item with key {0:?} was not found")]
    ItemNotFound(String),
    #[error("could not set key {key:?}: {reply}")]
    SetFailed { key: String, reply: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection closed before reply was complete")]
    ConnectionClosed,
}

pub type Result<T, E = MemcacheError> = std::result::Result<T, E>;

/// A stored item returned by `get`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: SmolStr,
    pub flags: u32,
    pub value: Bytes,
}

//
// Request encoders
//

/// `stats\r\n`
pub fn stats() -> Vec<u8> {
    b"stats\r\n".to_vec()
}

/// `get <k1> <k2> ...\r\n`
pub fn get_multi<K: AsRef<str>>(keys: &[K]) -> Vec<u8> {
    let mut v = b"get".to_vec();
    for k in keys {
        v.push(b' ');
        v.extend_from_slice(k.as_ref().as_bytes());
    }
    v.extend_from_slice(b"\r\n");
    v
}

/// `set <key> <flags> <exptime> <bytes> [noreply]\r\n<data>\r\n`
pub fn set(key: &str, value: &[u8], flags: u32, exptime: u32, noreply: bool) -> Vec<u8> {
    let header = format!(
        "set {} {} {} {}{}\r\n",
        key,
        flags,
        exptime,
        value.len(),
        if noreply { " noreply" } else { "" }
    );
    let mut v = Vec::with_capacity(header.len() + value.len() + 2);
    v.extend_from_slice(header.as_bytes());
    v.extend_from_slice(value);
    v.extend_from_slice(b"\r\n");
    v
}

/// Keys must be 1..=250 bytes with no whitespace or control characters
pub fn validate_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key.bytes().all(|b| b.is_ascii_graphic() || b >= 0x80);
    if ok {
        Ok(())
    } else {
        Err(MemcacheError::InvalidKey(key.to_string()))
    }
}

//
// Reply decoders
//

/// Split off one CRLF-terminated line
///
/// Returns `(bytes_consumed, line_without_crlf)` or `None` if no full line
/// is buffered yet.
fn read_line(data: &[u8]) -> Option<(usize, &[u8])> {
    data.windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| (i + 2, &data[..i]))
}

fn protocol_error(line: &[u8]) -> MemcacheError {
    MemcacheError::Protocol(String::from_utf8_lossy(line).into_owned())
}

/// Decode a `stats` reply: `STAT <name> <value>\r\n`... `END\r\n`
///
/// Stats keep the order the server sent them in.
pub fn parse_stats(data: &[u8]) -> Result<Option<(usize, Vec<(SmolStr, String)>)>> {
    let mut cursor = 0;
    let mut out = Vec::new();

    loop {
        let (n, line) = match read_line(&data[cursor..]) {
            Some(x) => x,
            None => return Ok(None),
        };
        cursor += n;

        if line == END {
            return Ok(Some((cursor, out)));
        }

        let text = std::str::from_utf8(line).map_err(|_| protocol_error(line))?;
        let mut parts = text.splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("STAT"), Some(name), Some(value)) => {
                out.push((SmolStr::new(name), value.trim().to_string()));
            }
            _ => return Err(protocol_error(line)),
        }
    }
}

/// Decode a `get` reply: zero or more `VALUE` blocks followed by `END\r\n`
pub fn parse_values(data: &[u8]) -> Result<Option<(usize, Vec<Item>)>> {
    let mut cursor = 0;
    let mut out = Vec::new();

    loop {
        let (n, line) = match read_line(&data[cursor..]) {
            Some(x) => x,
            None => return Ok(None),
        };

        if line == END {
            return Ok(Some((cursor + n, out)));
        }

        let (key, flags, len) = parse_value_header(line)?;
        cursor += n;

        // Payload plus trailing CRLF
        let need = len.checked_add(2).ok_or_else(|| protocol_error(line))?;
        if data.len() - cursor < need {
            return Ok(None);
        }
        if &data[cursor + len..cursor + need] != b"\r\n" {
            return Err(MemcacheError::Protocol(format!("value for {} not CRLF terminated", key)));
        }

        out.push(Item {
            key,
            flags,
            value: Bytes::copy_from_slice(&data[cursor..cursor + len]),
        });
        cursor += need;
    }
}

/// `VALUE <key> <flags> <bytes>`
fn parse_value_header(line: &[u8]) -> Result<(SmolStr, u32, usize)> {
    let text = std::str::from_utf8(line).map_err(|_| protocol_error(line))?;
    let mut parts = text.split(' ');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("VALUE"), Some(key), Some(flags), Some(len)) => {
            let flags = flags.parse().map_err(|_| protocol_error(line))?;
            let len: usize = len.parse().map_err(|_| protocol_error(line))?;
            if len > MAX_VALUE_LEN {
                return Err(MemcacheError::Protocol(format!("value for {} is {} bytes", key, len)));
            }
            Ok((SmolStr::new(key), flags, len))
        }
        _ => Err(protocol_error(line)),
    }
}

/// Decode a single status line such as `STORED\r\n`
pub fn parse_line(data: &[u8]) -> Result<Option<(usize, Bytes)>> {
    Ok(read_line(data).map(|(n, line)| (n, Bytes::copy_from_slice(line))))
}

//
// Client
//

/// Memcache client over a lazily connecting [`TcpClient`]
///
/// Replies are accumulated in an internal buffer until a decoder reports a
/// complete reply; leftover bytes stay buffered for the next call.
#[derive(Debug)]
pub struct MemcacheClient<R = SystemResolver> {
    client: TcpClient<R>,
    rbuf: BytesMut,
}

impl MemcacheClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::from_client(TcpClient::new(host, port))
    }
}

impl<R: Resolve> MemcacheClient<R> {
    pub fn from_client(client: TcpClient<R>) -> Self {
        Self {
            client,
            rbuf: BytesMut::with_capacity(RECV_BUF),
        }
    }

    pub fn client(&self) -> &TcpClient<R> {
        &self.client
    }

    /// Run `stats` and return every statistic in server order
    pub fn get_stats(&mut self) -> Result<Vec<(SmolStr, String)>> {
        self.client.transmit_all(&stats())?;
        self.read_reply(parse_stats)
    }

    /// Fetch several keys at once; missing keys are simply absent
    pub fn get_multi<K: AsRef<str>>(&mut self, keys: &[K]) -> Result<Vec<Item>> {
        for k in keys {
            validate_key(k.as_ref())?;
        }
        self.client.transmit_all(&get_multi(keys))?;
        self.read_reply(parse_values)
    }

    /// Fetch one key
    pub fn get(&mut self, key: &str) -> Result<Item> {
        self.get_multi(&[key])?
            .into_iter()
            .find(|item| item.key == key)
            .ok_or_else(|| MemcacheError::ItemNotFound(key.to_string()))
    }

    /// Store `value` under `key`
    ///
    /// Unless `noreply` is set the server must answer `STORED`.
    pub fn set(&mut self, key: &str, value: &[u8], flags: u32, exptime: u32, noreply: bool) -> Result<()> {
        validate_key(key)?;
        self.client.transmit_all(&set(key, value, flags, exptime, noreply))?;
        if noreply {
            return Ok(());
        }

        let reply = self.read_reply(parse_line)?;
        if &reply[..] == b"STORED" {
            Ok(())
        } else {
            log::error!("set {} failed: {}", key, String::from_utf8_lossy(&reply));
            Err(MemcacheError::SetFailed {
                key: key.to_string(),
                reply: String::from_utf8_lossy(&reply).into_owned(),
            })
        }
    }

    /// Send a truncated `set`, which makes servers drop the connection
    ///
    /// Returns whatever the server sent back in one read, with surrounding
    /// whitespace trimmed.
    pub fn send_malformed_cmd(&mut self) -> Result<Bytes> {
        self.client.transmit_all(b"set 0 1\r\n")?;
        let buf = if self.rbuf.is_empty() {
            self.client.receive_bytes(RECV_BUF)?
        } else {
            self.rbuf.split().freeze()
        };
        Ok(buf.slice_ref(buf.trim_ascii()))
    }

    fn read_reply<T>(&mut self, parse: impl Fn(&[u8]) -> Result<Option<(usize, T)>>) -> Result<T> {
        let mut tmp = [0u8; RECV_BUF];
        loop {
            if let Some((consumed, reply)) = parse(&self.rbuf)? {
                self.rbuf.advance(consumed);
                return Ok(reply);
            }

            let n = self.client.receive(&mut tmp)?;
            if n == 0 {
                return Err(MemcacheError::ConnectionClosed);
            }
            self.rbuf.extend_from_slice(&tmp[..n]);
        }
    }
}
