// RESP2 protocol codec
//
// Minimal framing for the handful of commands the counter protocol needs
// (GET, SET, DEL, WATCH, MULTI, EXEC, SELECT, PING, INFO). Commands are
// always encoded as arrays of bulk strings; replies can be any RESP2 value.

use bytes::{Buf, Bytes, BytesMut};
use std::io::{self, Cursor};
use tokio_util::codec::{Decoder, Encoder};

/// A single RESP2 value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Simple string reply, e.g. +OK
    Simple(String),
    /// Error reply, e.g. -ERR unknown command
    Error(String),
    /// Integer reply, e.g. :1
    Integer(i64),
    /// Bulk string reply; `None` is the nil bulk ($-1)
    Bulk(Option<Bytes>),
    /// Array reply; `None` is the nil array (*-1), which EXEC uses to
    /// signal an aborted transaction
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// True for the +OK simple-string reply
    pub fn is_ok(&self) -> bool {
        matches!(self, RespValue::Simple(s) if s == "OK")
    }
}

/// Frame codec for a RESP2 connection
pub struct RespCodec;

impl Encoder<Vec<Bytes>> for RespCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Vec<Bytes>, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.extend_from_slice(b"*");
        dst.extend_from_slice(item.len().to_string().as_bytes());
        dst.extend_from_slice(b"\r\n");
        for arg in item {
            dst.extend_from_slice(b"$");
            dst.extend_from_slice(arg.len().to_string().as_bytes());
            dst.extend_from_slice(b"\r\n");
            dst.extend_from_slice(&arg);
            dst.extend_from_slice(b"\r\n");
        }
        Ok(())
    }
}

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RespValue>, io::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&src[..]);
        match parse_value(&mut cursor)? {
            Some(value) => {
                let consumed = cursor.position() as usize;
                src.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

/// Read one CRLF-terminated line; `None` if the terminator is not buffered yet
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Option<&'a [u8]> {
    let buf: &'a [u8] = *cursor.get_ref();
    let start = cursor.position() as usize;

    let mut i = start;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            cursor.set_position((i + 2) as u64);
            return Some(&buf[start..i]);
        }
        i += 1;
    }
    None
}

fn parse_int(line: &[u8]) -> Result<i64, io::Error> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid RESP integer: {:?}", String::from_utf8_lossy(line)),
            )
        })
}

/// Parse one value from the buffer; `Ok(None)` means more bytes are needed
fn parse_value(cursor: &mut Cursor<&[u8]>) -> Result<Option<RespValue>, io::Error> {
    let buf = *cursor.get_ref();
    let pos = cursor.position() as usize;
    if pos >= buf.len() {
        return Ok(None);
    }

    let prefix = buf[pos];
    cursor.set_position((pos + 1) as u64);

    match prefix {
        b'+' => Ok(read_line(cursor)
            .map(|line| RespValue::Simple(String::from_utf8_lossy(line).into_owned()))),
        b'-' => Ok(read_line(cursor)
            .map(|line| RespValue::Error(String::from_utf8_lossy(line).into_owned()))),
        b':' => match read_line(cursor) {
            Some(line) => Ok(Some(RespValue::Integer(parse_int(line)?))),
            None => Ok(None),
        },
        b'$' => {
            let len = match read_line(cursor) {
                Some(line) => parse_int(line)?,
                None => return Ok(None),
            };
            if len < 0 {
                return Ok(Some(RespValue::Bulk(None)));
            }

            let len = len as usize;
            let start = cursor.position() as usize;
            if buf.len() < start + len + 2 {
                return Ok(None);
            }
            let data = Bytes::copy_from_slice(&buf[start..start + len]);
            cursor.set_position((start + len + 2) as u64);
            Ok(Some(RespValue::Bulk(Some(data))))
        }
        b'*' => {
            let len = match read_line(cursor) {
                Some(line) => parse_int(line)?,
                None => return Ok(None),
            };
            if len < 0 {
                return Ok(Some(RespValue::Array(None)));
            }

            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                match parse_value(cursor)? {
                    Some(item) => items.push(item),
                    None => return Ok(None),
                }
            }
            Ok(Some(RespValue::Array(Some(items))))
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected RESP prefix byte: 0x{other:02x}"),
        )),
    }
}
