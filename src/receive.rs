//! Receive engine (C4): read a complete frame under initial/inter-byte
//! timeouts, either to a known length (master side) or by discovering
//! the length progressively from the function code (server side).
//!
//! Grounded on `voltage-protocols/src/modbus/connection.rs`'s
//! `receive`/`receive_rtu` pair, which already separates the "wait for
//! first byte" timeout from the "wait for the rest" timeout; this
//! module additionally pulls the progressive-length state machine out
//! into its own type (`ReceiveState`) so it can be driven and tested
//! without an I/O source, per `spec.md` §9's suspected-defect note.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::frame::MAX_PACKET_SIZE;
use crate::pdu::{FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS};

/// Initial wait for a master expecting a reply.
pub const RECEIVE_T_BEGIN: Duration = Duration::from_millis(500);
/// Inter-byte gap once a reply has started arriving.
pub const RECEIVE_T_END: Duration = Duration::from_millis(100);
/// Initial wait for a server, which is otherwise idle between requests.
pub const SERVER_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Progressive-length discovery state, driven one segment at a time.
/// Kept separate from the I/O loop so the state transitions can be
/// exercised directly in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    /// Waiting for `header_length + 2` bytes (unit + function code).
    Function,
    /// Header read; waiting for the function-specific extension
    /// (fixed 4/5 bytes, or a multi-write's `byte_count` payload).
    Byte,
    /// Target length is fully known; only the checksum trailer (if
    /// any) remains.
    Complete,
}

impl ReceiveState {
    /// How many additional bytes, beyond what the header told us, a
    /// multi-write request needs read before its `byte_count` field is
    /// available — i.e. the fixed part of its header (address +
    /// quantity + byte_count itself).
    pub const MULTI_WRITE_FIXED_EXTENSION: usize = 5;
    /// Additional bytes for every other function code with data past
    /// the function code (address + value/quantity).
    pub const SINGLE_EXTENSION: usize = 4;

    /// Extension length to request once the function code is known.
    /// `None` means no further progressive extension applies (e.g.
    /// Read Exception Status, whose header already carries everything
    /// but the checksum).
    pub fn header_extension(function_code: u8) -> Option<usize> {
        match function_code {
            fc if fc <= 0x06 => Some(Self::SINGLE_EXTENSION),
            FC_WRITE_MULTIPLE_COILS | FC_WRITE_MULTIPLE_REGISTERS => {
                Some(Self::MULTI_WRITE_FIXED_EXTENSION)
            }
            _ => None,
        }
    }

    /// Whether `function_code`'s extension ends in a `byte_count`
    /// field that further extends the target length (the `BYTE`
    /// state).
    pub fn is_multi_write(function_code: u8) -> bool {
        matches!(
            function_code,
            FC_WRITE_MULTIPLE_COILS | FC_WRITE_MULTIPLE_REGISTERS
        )
    }
}

/// Read exactly `len` bytes with an initial wait of `RECEIVE_T_BEGIN`
/// for the first byte and `RECEIVE_T_END` between subsequent reads.
///
/// Used on the master side, where C3 already knows the exact response
/// size. On timeout, whatever was captured before the timeout is
/// returned inside `Error::Timeout` so the caller can still check for
/// a short exception frame (`spec.md` §4.5, §9).
pub async fn read_known_length<R>(reader: &mut R, len: usize) -> Result<Vec<u8>>
where
    R: AsyncReadExt + Unpin,
{
    if len > MAX_PACKET_SIZE {
        return Err(Error::OverSize);
    }

    let mut buf = vec![0u8; len];
    let mut filled = 0usize;

    while filled < len {
        let wait = if filled == 0 {
            RECEIVE_T_BEGIN
        } else {
            RECEIVE_T_END
        };

        match timeout(wait, reader.read(&mut buf[filled..])).await {
            Ok(Ok(0)) => return Err(Error::ConnectionClosed),
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(Error::Io(e)),
            Err(_) => {
                buf.truncate(filled);
                return Err(Error::Timeout { received: buf });
            }
        }
    }

    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::debug!(bytes = %hex::encode(&buf), "rx");
    }
    Ok(buf)
}

/// Read a frame of progressively-discovered length, for a server that
/// doesn't yet know how long the incoming request is.
///
/// `header_len` and `checksum_len` come from the transport's
/// `FrameCodec` (0/2 for RTU, 6/0 for TCP). Runs the `Function` ->
/// `Byte` -> `Complete` state machine from `spec.md` §4.4.
pub async fn read_progressive<R>(
    reader: &mut R,
    header_len: usize,
    checksum_len: usize,
) -> Result<Vec<u8>>
where
    R: AsyncReadExt + Unpin,
{
    let mut buf = Vec::with_capacity(32);
    let mut state = ReceiveState::Function;
    let mut target = header_len + 2;

    loop {
        if target > MAX_PACKET_SIZE {
            return Err(Error::OverSize);
        }

        while buf.len() < target {
            let wait = if buf.is_empty() {
                SERVER_IDLE_TIMEOUT
            } else {
                RECEIVE_T_END
            };

            let mut chunk = vec![0u8; target - buf.len()];
            match timeout(wait, reader.read(&mut chunk)).await {
                Ok(Ok(0)) => return Err(Error::ConnectionClosed),
                Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_) => {
                    return Err(Error::Timeout { received: buf });
                }
            }
        }

        match state {
            ReceiveState::Function => {
                let function_code = buf[header_len + 1];
                match ReceiveState::header_extension(function_code) {
                    Some(extension) => {
                        target += extension;
                        state = ReceiveState::Byte;
                    }
                    None => {
                        target += checksum_len;
                        state = ReceiveState::Complete;
                    }
                }
            }
            ReceiveState::Byte => {
                let function_code = buf[header_len + 1];
                if ReceiveState::is_multi_write(function_code) {
                    let byte_count = buf[target - 1] as usize;
                    target += byte_count + checksum_len;
                } else {
                    target += checksum_len;
                }
                state = ReceiveState::Complete;
            }
            ReceiveState::Complete => {
                if tracing::enabled!(tracing::Level::TRACE) {
                    tracing::debug!(bytes = %hex::encode(&buf), "rx");
                }
                return Ok(buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn known_length_reads_exact_count() {
        let mut src = Cursor::new(vec![0x11, 0x01, 0x02, 0xCD, 0x6B, 0x00, 0x00]);
        let out = read_known_length(&mut src, 5).await.unwrap();
        assert_eq!(out, vec![0x11, 0x01, 0x02, 0xCD, 0x6B]);
    }

    #[tokio::test]
    async fn known_length_times_out_on_short_stream() {
        let mut src = Cursor::new(vec![0x11, 0x01]);
        let err = read_known_length(&mut src, 5).await.unwrap_err();
        match err {
            Error::Timeout { received } => assert_eq!(received, vec![0x11, 0x01]),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn progressive_read_discovers_single_write_request_rtu() {
        // unit 0x11, FC 0x05 (write single coil), addr, value, crc.
        let mut frame = vec![0x11u8, 0x05, 0x00, 0xAC, 0xFF, 0x00];
        crate::crc::append(&mut frame);
        let mut src = Cursor::new(frame.clone());
        let out = read_progressive(&mut src, 0, 2).await.unwrap();
        assert_eq!(out, frame);
    }

    #[tokio::test]
    async fn progressive_read_discovers_multi_write_request_rtu() {
        // unit 0x11, FC 0x0F, addr, qty=0x000A, byte_count=2, payload, crc.
        let mut frame = vec![
            0x11u8, 0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01,
        ];
        crate::crc::append(&mut frame);
        let mut src = Cursor::new(frame.clone());
        let out = read_progressive(&mut src, 0, 2).await.unwrap();
        assert_eq!(out, frame);
    }

    #[tokio::test]
    async fn progressive_read_discovers_read_request_tcp() {
        // MBAP header (6) + unit + FC 0x03 + addr + qty, no trailer.
        let mut frame = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06];
        frame.extend_from_slice(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]);
        let mut src = Cursor::new(frame.clone());
        let out = read_progressive(&mut src, 6, 0).await.unwrap();
        assert_eq!(out, frame);
    }
}
