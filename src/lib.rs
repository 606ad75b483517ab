//! Modbus RTU/TCP master and slave protocol library.
//!
//! Envelope-agnostic PDUs ([`pdu`]) are framed by a transport-specific
//! [`frame::FrameCodec`] (RTU's CRC-trailer frame or TCP's MBAP
//! header), read off the wire by the [`receive`] engine, and carried
//! over a [`transport::Transport`]. [`master`] builds the eight public
//! client operations on top of that stack; [`server`] dispatches
//! incoming requests against a [`RegisterMap`].

pub mod config;
pub mod crc;
pub mod data;
pub mod error;
pub mod frame;
pub mod master;
pub mod pdu;
pub mod receive;
pub mod server;
pub mod transport;

pub use data::{RegisterKind, RegisterMap};
pub use error::{Error, Result};
pub use frame::{
    FrameCodec, RtuCodec, TcpCodec, CHECKSUM_SIZE_RTU, CHECKSUM_SIZE_TCP, HEADER_LENGTH_RTU,
    HEADER_LENGTH_TCP, MAX_PACKET_SIZE,
};
pub use transport::{ErrorPolicy, RtuParams, Transport};
