/*!
 * Redis RESP Request Encoding and Reply Decoding
 *
 * Client-side half of the Redis Serialization Protocol: commands go out as
 * arrays of bulk strings, replies come back as any RESP type. Used to
 * talk to Redis-compatible servers with the same single-shot client.
 */

use anyhow::*;
use bytes::Bytes;

/// Largest bulk string accepted (Redis `proto-max-bulk-len` default)
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Largest array element count accepted
pub const MAX_ARRAY_LEN: i64 = 1024 * 1024;

/// Deepest array nesting accepted
pub const MAX_DEPTH: usize = 64;

/// A decoded server reply
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// +OK, +PONG
    Simple(String),
    /// -ERR ...
    Error(String),
    /// :<number>
    Integer(i64),
    /// $<len> payload; `None` for the null bulk ($-1) and null array (*-1)
    Bulk(Option<Bytes>),
    /// *<count> nested replies
    Array(Vec<Reply>),
}

/// Encode a command as a RESP array of bulk strings
///
/// `encode_command(&[b"GET", b"hello"])` gives
/// `*2\r\n$3\r\nGET\r\n$5\r\nhello\r\n`.
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let len_str = args.len().to_string();
    let body: usize = args.iter().map(|a| a.len() + 16).sum();
    let mut out = Vec::with_capacity(1 + len_str.len() + 2 + body);
    out.push(b'*');
    out.extend_from_slice(len_str.as_bytes());
    out.extend_from_slice(b"\r\n");
    for a in args {
        out.push(b'$');
        out.extend_from_slice(a.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(a);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Parse a single RESP reply
///
/// # Returns
/// * `Ok(Some((consumed_bytes, reply)))` - Complete reply decoded
/// * `Ok(None)` - Incomplete data, need more bytes
/// * `Err(...)` - Protocol error
pub fn parse_reply(data: &[u8]) -> Result<Option<(usize, Reply)>> {
    parse_reply_at(data, 0)
}

fn parse_reply_at(data: &[u8], depth: usize) -> Result<Option<(usize, Reply)>> {
    if data.is_empty() {
        return Ok(None);
    }

    let body = &data[1..];
    match data[0] {
        b'+' | b'-' => {
            let Some(end) = find_crlf(body) else {
                return Ok(None);
            };
            let text = String::from_utf8_lossy(&body[..end]).into_owned();
            let reply = if data[0] == b'+' { Reply::Simple(text) } else { Reply::Error(text) };
            Ok(Some((1 + end + 2, reply)))
        }
        b':' => {
            let (i, n) = read_decimal_line(body)?;
            if i == 0 {
                return Ok(None);
            }
            Ok(Some((1 + i, Reply::Integer(n))))
        }
        b'$' => {
            let (i, len) = read_decimal_line(body)?;
            if i == 0 {
                return Ok(None);
            }
            let cursor = 1 + i;
            if len == -1 {
                return Ok(Some((cursor, Reply::Bulk(None))));
            }
            if !(0..=MAX_BULK_LEN).contains(&len) {
                bail!("invalid bulk length {}", len);
            }

            // Payload plus trailing \r\n
            let len = len as usize;
            let need = len + 2;
            if cursor + need > data.len() {
                return Ok(None);
            }
            if &data[cursor + len..cursor + need] != b"\r\n" {
                bail!("bulk string not CRLF terminated");
            }
            let payload = Bytes::copy_from_slice(&data[cursor..cursor + len]);
            Ok(Some((cursor + need, Reply::Bulk(Some(payload)))))
        }
        b'*' => {
            let (i, n) = read_decimal_line(body)?;
            if i == 0 {
                return Ok(None);
            }
            let mut cursor = 1 + i;
            if n == -1 {
                return Ok(Some((cursor, Reply::Bulk(None))));
            }
            if !(0..=MAX_ARRAY_LEN).contains(&n) {
                bail!("invalid array length {}", n);
            }
            if depth >= MAX_DEPTH {
                bail!("arrays nested deeper than {}", MAX_DEPTH);
            }

            let mut items = Vec::with_capacity((n as usize).min(1024));
            for _ in 0..n {
                match parse_reply_at(&data[cursor..], depth + 1)? {
                    Some((used, item)) => {
                        cursor += used;
                        items.push(item);
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((cursor, Reply::Array(items))))
        }
        other => bail!("protocol error: unexpected reply type byte {:?}", other as char),
    }
}

#[inline]
fn find_crlf(s: &[u8]) -> Option<usize> {
    s.windows(2).position(|w| w == b"\r\n")
}

/// Read a signed decimal number followed by \r\n
///
/// # Returns
/// * `(bytes_consumed, parsed_number)`, with `bytes_consumed == 0` when the
///   line is not complete yet
fn read_decimal_line(s: &[u8]) -> Result<(usize, i64)> {
    let mut i = 0;
    let mut negative = false;

    if i < s.len() && s[i] == b'-' {
        negative = true;
        i += 1;
    }

    // i64::MIN has one more unit of magnitude than i64::MAX
    let limit = if negative { i64::MAX as u64 + 1 } else { i64::MAX as u64 };

    let start = i;
    let mut mag: u64 = 0;
    while i < s.len() && s[i].is_ascii_digit() {
        mag = mag
            .checked_mul(10)
            .and_then(|m| m.checked_add((s[i] - b'0') as u64))
            .filter(|&m| m <= limit)
            .ok_or_else(|| anyhow!("number out of range"))?;
        i += 1;
    }

    if i + 1 >= s.len() {
        // Incomplete
        return Ok((0, 0));
    }
    if i == start {
        bail!("expected digits");
    }
    if s[i] != b'\r' || s[i + 1] != b'\n' {
        bail!("expected CRLF");
    }

    let num = if negative { (mag as i64).wrapping_neg() } else { mag as i64 };
    Ok((i + 2, num))
}
