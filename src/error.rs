//! Error taxonomy for the Modbus master/slave library.
//!
//! Framing, transport, timeout and protocol-exception failures are kept
//! as distinct variants instead of being multiplexed into a single
//! negative-integer channel, so callers can match on the failure
//! category instead of comparing against magic constants.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// RTU trailer did not match the recomputed CRC-16.
    #[error("CRC check failed")]
    InvalidCrc,

    /// Neither the initial wait nor an inter-byte wait produced the
    /// expected number of bytes in time. `received` carries whatever
    /// bytes the receive engine had actually captured, so callers can
    /// still check for a short exception frame.
    #[error("communication timed out")]
    Timeout { received: Vec<u8> },

    /// OS-level I/O failure on the underlying descriptor.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection (zero-byte read).
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A read would have exceeded `MAX_PACKET_SIZE`.
    #[error("frame exceeds maximum packet size")]
    OverSize,

    /// MBAP response transaction id did not echo the request's.
    #[error("transaction id mismatch: expected {expected}, got {actual}")]
    TransactionMismatch { expected: u16, actual: u16 },

    /// Peer replied with a well-formed Modbus exception PDU.
    #[error("modbus exception 0x{0:02X}")]
    Exception(u8),

    /// Peer's exception byte fell outside the known exception-code
    /// range.
    #[error("invalid exception code 0x{0:02X}")]
    InvalidExceptionCode(u8),

    /// Requested address range falls outside the register map.
    #[error("address {address} + quantity {quantity} exceeds map length {len}")]
    IllegalDataAddress {
        address: u16,
        quantity: u16,
        len: usize,
    },

    /// A write targeted an address/value combination the protocol
    /// forbids (e.g. a coil value other than 0xFF00/0x0000).
    #[error("illegal data value: {0}")]
    IllegalDataValue(String),

    /// An operation was attempted before `connect` succeeded.
    #[error("not connected")]
    NotConnected,

    /// RTU serial port parameters could not be applied.
    #[error("serial port configuration error: {0}")]
    SerialConfig(String),

    /// Function code is not one this library implements.
    #[error("unsupported function code 0x{0:02X}")]
    UnsupportedFunction(u8),
}

impl Error {
    /// The function-code-local exception codes defined by the Modbus
    /// specification, used by both `Error::Exception` construction and
    /// server dispatch.
    pub const ILLEGAL_FUNCTION: u8 = 0x01;
    pub const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
    pub const ILLEGAL_DATA_VALUE: u8 = 0x03;
    pub const SLAVE_DEVICE_FAILURE: u8 = 0x04;
    pub const ACKNOWLEDGE: u8 = 0x05;
    pub const SLAVE_DEVICE_BUSY: u8 = 0x06;
    pub const NEGATIVE_ACKNOWLEDGE: u8 = 0x07;
    pub const MEMORY_PARITY_ERROR: u8 = 0x08;
    pub const GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;
    pub const GATEWAY_TARGET_FAILED_TO_RESPOND: u8 = 0x0B;

    /// Human-readable description for a Modbus exception code, mirroring
    /// the table in `spec.md` §4.5.
    pub fn exception_description(code: u8) -> &'static str {
        match code {
            Self::ILLEGAL_FUNCTION => "illegal function",
            Self::ILLEGAL_DATA_ADDRESS => "illegal data address",
            Self::ILLEGAL_DATA_VALUE => "illegal data value",
            Self::SLAVE_DEVICE_FAILURE => "slave device failure",
            Self::ACKNOWLEDGE => "acknowledge",
            Self::SLAVE_DEVICE_BUSY => "slave device busy",
            Self::NEGATIVE_ACKNOWLEDGE => "negative acknowledge",
            Self::MEMORY_PARITY_ERROR => "memory parity error",
            Self::GATEWAY_PATH_UNAVAILABLE => "gateway path unavailable",
            Self::GATEWAY_TARGET_FAILED_TO_RESPOND => "gateway target failed to respond",
            _ => "not defined in modbus specification",
        }
    }

    /// Whether `code` is one of the exception codes the spec table
    /// recognizes (used to distinguish `Exception` from
    /// `InvalidExceptionCode`).
    pub fn is_known_exception_code(code: u8) -> bool {
        matches!(
            code,
            Self::ILLEGAL_FUNCTION
                ..=Self::NEGATIVE_ACKNOWLEDGE
        ) || matches!(
            code,
            Self::MEMORY_PARITY_ERROR
                | Self::GATEWAY_PATH_UNAVAILABLE
                | Self::GATEWAY_TARGET_FAILED_TO_RESPOND
        )
    }
}
