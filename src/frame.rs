// https://redis.io/docs/reference/protocol-spec

use std::fmt;
use std::io::Cursor;
use std::str;

use bytes::Buf;
use bytes::Bytes;
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("protocol error; invalid frame data type: {:?}", as_char(.0))]
    InvalidDataType(u8),
    #[error("protocol error; line is not terminated by CRLF")]
    InvalidLine,
    #[error("protocol error; invalid length: {0:?}")]
    InvalidLength(String),
    #[error("protocol error; no command elements")]
    NoCommandElements,
    #[error("protocol error; frame size exceeds limit")]
    FrameTooLarge,
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    /// Parses a single client request. Requests are always sent as an array of bulk strings:
    ///
    /// `*<number-of-elements>\r\n$<length>\r\n<data>\r\n...`
    ///
    /// Returns `Error::Incomplete` when the buffer ends before the whole request is available,
    /// in which case the cursor position is meaningless and parsing has to start over once more
    /// data arrives.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        let line = get_line(src)?;
        let (&first_byte, count) = line.split_first().ok_or(Error::InvalidLine)?;

        match DataType::try_from(first_byte)? {
            DataType::Array => {}
            _ => return Err(Error::InvalidDataType(first_byte)),
        }

        let count = parse_decimal(count)?;
        if count < 1 {
            return Err(Error::NoCommandElements);
        }

        // The element count comes straight from the peer, so it is not trusted for allocation.
        let mut frames = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            frames.push(parse_bulk(src)?);
        }

        Ok(Frame::Array(frames))
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Frame::Simple(s) => {
                let mut bytes = Vec::with_capacity(1 + s.len() + CRLF.len());
                bytes.push(u8::from(DataType::SimpleString));
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Error(s) => {
                let mut bytes = Vec::with_capacity(1 + s.len() + CRLF.len());
                bytes.push(u8::from(DataType::SimpleError));
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Bulk(bytes) => {
                let length_str = bytes.len().to_string();
                let mut result = Vec::with_capacity(
                    1 + length_str.len() + CRLF.len() + bytes.len() + CRLF.len(),
                );
                result.push(u8::from(DataType::BulkString));
                result.extend_from_slice(length_str.as_bytes());
                result.extend_from_slice(CRLF);
                result.extend_from_slice(bytes);
                result.extend_from_slice(CRLF);
                result
            }
            // RESP2 null bulk string, understood by every client.
            Frame::Null => {
                let mut bytes = Vec::with_capacity(5);
                bytes.push(u8::from(DataType::BulkString));
                bytes.extend_from_slice(b"-1");
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Array(arr) => {
                let length_str = arr.len().to_string();
                let mut bytes = Vec::with_capacity(1 + length_str.len() + CRLF.len());
                bytes.push(u8::from(DataType::Array));
                bytes.extend_from_slice(length_str.as_bytes());
                bytes.extend_from_slice(CRLF);
                for frame in arr {
                    bytes.extend(frame.serialize());
                }
                bytes
            }
        }
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "$-1"),
            Frame::Array(arr) => {
                write!(f, "*{}", arr.len())?;
                for frame in arr {
                    write!(f, " {}", frame)?;
                }
                Ok(())
            }
        }
    }
}

// $<length>\r\n<data>\r\n
fn parse_bulk(src: &mut Cursor<&[u8]>) -> Result<Frame, Error> {
    let line = get_line(src)?;
    let (&first_byte, length) = line.split_first().ok_or(Error::InvalidLine)?;

    match DataType::try_from(first_byte)? {
        DataType::BulkString => {}
        _ => return Err(Error::InvalidDataType(first_byte)),
    }

    let length = parse_decimal(length)?;
    let length = usize::try_from(length).map_err(|_| Error::InvalidLength(length.to_string()))?;
    let total = length
        .checked_add(CRLF.len())
        .ok_or_else(|| Error::InvalidLength(length.to_string()))?;

    // The two bytes trailing the payload are skipped without checking they are CRLF.
    let data = get_bytes(src, total)?;

    Ok(Frame::Bulk(Bytes::copy_from_slice(&data[..length])))
}

/// Returns the next line without its trailing CRLF. A line has to end in `\r\n` and hold at
/// least one byte of content.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();

    let newline = buf[start..]
        .iter()
        .position(|&byte| byte == b'\n')
        .map(|index| start + index)
        .ok_or(Error::Incomplete)?;

    let line = &buf[start..=newline];
    if line.len() <= CRLF.len() || !line.ends_with(CRLF) {
        return Err(Error::InvalidLine);
    }

    src.set_position((newline + 1) as u64);

    Ok(&line[..line.len() - CRLF.len()])
}

fn get_bytes<'a>(src: &mut Cursor<&'a [u8]>, len: usize) -> Result<&'a [u8], Error> {
    if src.remaining() < len {
        return Err(Error::Incomplete);
    }

    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();
    src.advance(len);

    Ok(&buf[start..start + len])
}

fn as_char(byte: &u8) -> char {
    char::from(*byte)
}

fn parse_decimal(bytes: &[u8]) -> Result<i64, Error> {
    str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::InvalidLength(String::from_utf8_lossy(bytes).into_owned()))
}

#[derive(Debug)]
enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    BulkString,   // '$'
    Array,        // '*'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
        }
    }
}
