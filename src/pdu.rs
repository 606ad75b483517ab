//! Modbus function codes and a small PDU builder.
//!
//! The protocol-agnostic PDU (`spec.md` §3) is just unit address,
//! function code, and function-specific data; the teacher's
//! `voltage-protocols/src/modbus/pdu.rs` wraps this in a fixed
//! stack-allocated buffer for its hot path. That allocation cost is
//! immaterial here (`MAX_PDU_SIZE` is well under 256 bytes), so
//! `PduBuilder` wraps a `Vec<u8>` instead and keeps the same
//! push/extend ergonomics.

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_READ_EXCEPTION_STATUS: u8 = 0x07;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
pub const FC_REPORT_SLAVE_ID: u8 = 0x11;

/// Exception bit OR'd into a request's function code to mark a
/// response as a Modbus exception.
pub const EXCEPTION_BIT: u8 = 0x80;

/// `true` if `fc` carries the exception bit.
pub fn is_exception_fc(fc: u8) -> bool {
    fc & EXCEPTION_BIT != 0
}

/// Minimal append-only PDU builder: unit id then function code then
/// function-specific payload.
#[derive(Debug, Default)]
pub struct PduBuilder {
    data: Vec<u8>,
}

impl PduBuilder {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            data: Vec::with_capacity(cap),
        }
    }

    pub fn push(&mut self, byte: u8) -> &mut Self {
        self.data.push(byte);
        self
    }

    pub fn push_u16(&mut self, value: u16) -> &mut Self {
        self.data.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn extend(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

/// Build the request PDU (unit address not included) for a read
/// function: `[fc, addr_hi, addr_lo, qty_hi, qty_lo]`.
pub fn build_read_request(fc: u8, address: u16, quantity: u16) -> Vec<u8> {
    let mut b = PduBuilder::with_capacity(5);
    b.push(fc).push_u16(address).push_u16(quantity);
    b.into_vec()
}

/// Build the request PDU for `Write Single Coil`/`Write Single
/// Register`: `[fc, addr_hi, addr_lo, value_hi, value_lo]`.
pub fn build_write_single_request(fc: u8, address: u16, value: u16) -> Vec<u8> {
    let mut b = PduBuilder::with_capacity(5);
    b.push(fc).push_u16(address).push_u16(value);
    b.into_vec()
}

/// Build the request PDU for `Write Multiple Coils`/`Write Multiple
/// Registers`: `[fc, addr_hi, addr_lo, qty_hi, qty_lo, byte_count,
/// ...payload]`.
pub fn build_write_multiple_request(fc: u8, address: u16, quantity: u16, payload: &[u8]) -> Vec<u8> {
    let mut b = PduBuilder::with_capacity(6 + payload.len());
    b.push(fc)
        .push_u16(address)
        .push_u16(quantity)
        .push(payload.len() as u8)
        .extend(payload);
    b.into_vec()
}
