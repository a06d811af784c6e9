//! Exchange frames
//!
//! Every message on a link is one frame: a fixed 17-byte big-endian header
//! followed by `length` payload bytes.
//!
//! ```text
//! ┌─────────┬──────┬─────────┬────────┬────────┬──────────────┐
//! │ version │ type │ session │ length │ status │ data         │
//! │ 4       │ 2    │ 2       │ 8      │ 1      │ length bytes │
//! └─────────┴──────┴─────────┴────────┴────────┴──────────────┘
//! ```

use std::fmt;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::codec::{Codec, CodecError, DecodeContext, EncodeContext};

/// Size of the fixed header in bytes
pub const HEADER_LEN: usize = 4 + 2 + 2 + 8 + 1;

/// Largest payload a peer will accept (16 MiB)
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Only frames with this major version are decoded
pub const SUPPORTED_MAJOR: u8 = b'1';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(Version),
    #[error("unknown exchange type {0:#06x}")]
    UnknownType(i16),
    #[error("unknown status {0:#04x}")]
    UnknownStatus(u8),
    #[error("invalid payload length {0}")]
    InvalidLength(i64),
    #[error("payload too large: {0} bytes")]
    Oversized(usize),
    #[error("frame truncated: header declares {declared} bytes, {available} present")]
    Truncated { declared: usize, available: usize },
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Failure while reading a frame from a stream
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Four-byte version: ASCII major digit followed by minor, patch, build
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version(pub [u8; 4]);

impl Version {
    pub const CURRENT: Version = Version::new(SUPPORTED_MAJOR, 0, 1, 0);

    pub const fn new(major: u8, minor: u8, patch: u8, build: u8) -> Self {
        Self([major, minor, patch, build])
    }

    pub fn major(&self) -> u8 {
        self.0[0]
    }

    pub fn is_supported(&self) -> bool {
        self.major() == SUPPORTED_MAJOR
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch, build] = self.0;
        if major.is_ascii_graphic() {
            write!(f, "{}.{}.{}.{}", major as char, minor, patch, build)
        } else {
            write!(f, "0x{:02x}.{}.{}.{}", major, minor, patch, build)
        }
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeType {
    Request,
    Response,
}

impl ExchangeType {
    pub fn code(self) -> i16 {
        match self {
            ExchangeType::Request => 0x01,
            ExchangeType::Response => 0x02,
        }
    }
}

impl TryFrom<i16> for ExchangeType {
    type Error = ProtocolError;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0x01 => Ok(ExchangeType::Request),
            0x02 => Ok(ExchangeType::Response),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    #[default]
    Ok,
    Failed,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::Ok => 0x00,
            Status::Failed => 0x01,
        }
    }
}

impl TryFrom<u8> for Status {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x00 => Ok(Status::Ok),
            0x01 => Ok(Status::Failed),
            other => Err(ProtocolError::UnknownStatus(other)),
        }
    }
}

/// Decoded header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: Version,
    pub kind: ExchangeType,
    /// Carried as a two-byte int16 field; read unsigned so ids wrap at 65535
    pub session: u16,
    pub length: usize,
    pub status: Status,
}

impl Header {
    fn encode(&self, ctx: &mut EncodeContext) -> Result<usize, CodecError> {
        let mut written = self.version.0.encode(ctx)?;
        written += self.kind.code().encode(ctx)?;
        written += self.session.encode(ctx)?;
        written += (self.length as i64).encode(ctx)?;
        written += self.status.code().encode(ctx)?;
        Ok(written)
    }

    /// Parse and validate a header. The version is checked before any other
    /// field so that frames from a newer major are rejected outright.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut ctx = DecodeContext::new(buf);

        let version = Version(<[u8; 4]>::decode(&mut ctx)?);
        if !version.is_supported() {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let kind = ExchangeType::try_from(i16::decode(&mut ctx)?)?;
        let session = u16::decode(&mut ctx)?;

        let raw_len = i64::decode(&mut ctx)?;
        if raw_len < 0 {
            return Err(ProtocolError::InvalidLength(raw_len));
        }
        let length = usize::try_from(raw_len).map_err(|_| ProtocolError::InvalidLength(raw_len))?;
        if length > MAX_PAYLOAD {
            return Err(ProtocolError::Oversized(length));
        }

        let status = Status::try_from(u8::decode(&mut ctx)?)?;

        Ok(Self {
            version,
            kind,
            session,
            length,
            status,
        })
    }
}

/// One framed protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub version: Version,
    pub kind: ExchangeType,
    /// Same bits as the signed int16 header field
    pub session: u16,
    pub status: Status,
    pub data: Vec<u8>,
}

impl Exchange {
    /// A request; the session is assigned when the frame is queued for sending
    pub fn request(data: Vec<u8>) -> Self {
        Self {
            version: Version::CURRENT,
            kind: ExchangeType::Request,
            session: 0,
            status: Status::Ok,
            data,
        }
    }

    pub fn response(session: u16, status: Status, data: Vec<u8>) -> Self {
        Self {
            version: Version::CURRENT,
            kind: ExchangeType::Response,
            session,
            status,
            data,
        }
    }

    /// Payload length as carried in the header
    pub fn length(&self) -> usize {
        self.data.len()
    }

    pub fn is_request(&self) -> bool {
        self.kind == ExchangeType::Request
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    fn header(&self) -> Header {
        Header {
            version: self.version,
            kind: self.kind,
            session: self.session,
            length: self.data.len(),
            status: self.status,
        }
    }

    /// Serialize header and payload into one buffer
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.data.len() > MAX_PAYLOAD {
            return Err(ProtocolError::Oversized(self.data.len()));
        }

        let mut buf = vec![0u8; HEADER_LEN + self.data.len()];
        let mut ctx = EncodeContext::new(&mut buf);
        self.header().encode(&mut ctx)?;
        ctx.write_bytes(&self.data)?;
        Ok(buf)
    }

    /// Parse exactly one frame from `buf`
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let header = Header::decode(buf)?;
        let available = buf.len().saturating_sub(HEADER_LEN);

        if available < header.length {
            return Err(ProtocolError::Truncated {
                declared: header.length,
                available,
            });
        }
        if available > header.length {
            return Err(ProtocolError::TrailingBytes(available - header.length));
        }

        Ok(Self::from_parts(header, buf[HEADER_LEN..].to_vec()))
    }

    fn from_parts(header: Header, data: Vec<u8>) -> Self {
        Self {
            version: header.version,
            kind: header.kind,
            session: header.session,
            status: header.status,
            data,
        }
    }

    /// Read one frame from a stream. The header is validated before any
    /// payload byte is read.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; HEADER_LEN];
        reader.read_exact(&mut head).await?;
        let header = Header::decode(&head)?;

        let mut data = vec![0u8; header.length];
        reader.read_exact(&mut data).await?;

        Ok(Self::from_parts(header, data))
    }

    /// Write one frame to a stream and flush it
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), FrameError>
    where
        W: AsyncWrite + Unpin,
    {
        let buf = self.encode()?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut ex = Exchange::response(0x0203, Status::Failed, b"xy".to_vec());
        ex.version = Version::new(b'1', 4, 5, 6);
        let buf = ex.encode().unwrap();

        assert_eq!(buf.len(), HEADER_LEN + 2);
        assert_eq!(&buf[0..4], &[b'1', 4, 5, 6]);
        assert_eq!(&buf[4..6], &[0x00, 0x02]);
        assert_eq!(&buf[6..8], &[0x02, 0x03]);
        assert_eq!(&buf[8..16], &[0, 0, 0, 0, 0, 0, 0, 2]);
        assert_eq!(buf[16], 0x01);
        assert_eq!(&buf[17..], b"xy");
    }

    #[test]
    fn test_session_shares_bits_with_int16() {
        let ex = Exchange::response(0xFFFF, Status::Ok, Vec::new());
        let buf = ex.encode().unwrap();
        assert_eq!(&buf[6..8], &(-1i16).to_be_bytes());
        assert_eq!(Exchange::decode(&buf).unwrap().session, 65535);
    }

    #[test]
    fn test_roundtrip_preserves_fields() {
        for (kind, status, len) in [
            (ExchangeType::Request, Status::Ok, 0usize),
            (ExchangeType::Response, Status::Ok, 1),
            (ExchangeType::Response, Status::Failed, 4096),
        ] {
            let ex = Exchange {
                version: Version::new(b'1', 2, 3, 4),
                kind,
                session: 0xBEEF,
                status,
                data: (0..len).map(|i| i as u8).collect(),
            };
            let decoded = Exchange::decode(&ex.encode().unwrap()).unwrap();
            assert_eq!(decoded, ex);
            assert_eq!(decoded.length(), len);
        }
    }

    #[test]
    fn test_rejects_unknown_major() {
        let mut buf = Exchange::request(b"ping".to_vec()).encode().unwrap();
        buf[0] = b'2';
        assert_eq!(
            Exchange::decode(&buf),
            Err(ProtocolError::UnsupportedVersion(Version::new(b'2', 0, 1, 0)))
        );
    }

    #[test]
    fn test_rejects_unknown_type_and_status() {
        let mut buf = Exchange::request(vec![]).encode().unwrap();
        buf[5] = 0x07;
        assert_eq!(Exchange::decode(&buf), Err(ProtocolError::UnknownType(7)));

        let mut buf = Exchange::request(vec![]).encode().unwrap();
        buf[16] = 0x09;
        assert_eq!(Exchange::decode(&buf), Err(ProtocolError::UnknownStatus(9)));
    }

    #[test]
    fn test_rejects_negative_and_oversized_length() {
        let mut buf = Exchange::request(vec![]).encode().unwrap();
        buf[8..16].copy_from_slice(&(-1i64).to_be_bytes());
        assert_eq!(Exchange::decode(&buf), Err(ProtocolError::InvalidLength(-1)));

        let mut buf = Exchange::request(vec![]).encode().unwrap();
        buf[8..16].copy_from_slice(&((MAX_PAYLOAD as i64) + 1).to_be_bytes());
        assert_eq!(
            Exchange::decode(&buf),
            Err(ProtocolError::Oversized(MAX_PAYLOAD + 1))
        );
    }

    #[test]
    fn test_truncated_and_trailing() {
        let buf = Exchange::request(b"abcd".to_vec()).encode().unwrap();
        assert_eq!(
            Exchange::decode(&buf[..buf.len() - 1]),
            Err(ProtocolError::Truncated {
                declared: 4,
                available: 3
            })
        );

        let mut long = buf.clone();
        long.push(0);
        assert_eq!(Exchange::decode(&long), Err(ProtocolError::TrailingBytes(1)));

        assert!(matches!(
            Exchange::decode(&buf[..10]),
            Err(ProtocolError::Codec(CodecError::BufferUnderflow { .. }))
        ));
    }

    #[tokio::test]
    async fn test_stream_framing_back_to_back() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let first = Exchange::request(b"one".to_vec());
        let second = Exchange::response(9, Status::Ok, Vec::new());

        first.write_to(&mut a).await.unwrap();
        second.write_to(&mut a).await.unwrap();

        assert_eq!(Exchange::read_from(&mut b).await.unwrap(), first);
        assert_eq!(Exchange::read_from(&mut b).await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_stream_rejects_bad_header_before_payload() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let mut buf = Exchange::request(b"payload".to_vec()).encode().unwrap();
        buf[0] = b'9';
        a.write_all(&buf).await.unwrap();

        let err = Exchange::read_from(&mut b).await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::Protocol(ProtocolError::UnsupportedVersion(_))
        ));
    }
}
