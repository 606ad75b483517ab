//! Server dispatch (C6): turn a validated request frame into a
//! response frame against a `RegisterMap`.
//!
//! Grounded on `plugins/protocols/modbus/transport.rs`'s response
//! builders (`build_read_coils_response` and friends), generalized to
//! read from/write through the shared `RegisterMap` instead of a
//! plugin-local buffer, and to share `FrameCodec` with the master
//! side instead of duplicating MBAP/RTU framing.

use crate::data::{pack_bools_from_bits, unpack_bools_from_byte, RegisterKind};
use crate::error::Error;
use crate::frame::FrameCodec;
use crate::pdu::{
    EXCEPTION_BIT, FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS,
    FC_READ_INPUT_REGISTERS, FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER,
};
use crate::RegisterMap;

/// Dispatch a single validated request PDU (unit id already split off
/// by the codec) against `map`, returning the response PDU to wrap
/// and send back.
///
/// Every error path returns `Ok` with an exception PDU rather than
/// `Err`: per `spec.md` §4.6, address-range and illegal-value faults
/// are protocol-level replies, not transport failures.
pub fn dispatch(map: &mut RegisterMap, request_pdu: &[u8]) -> Vec<u8> {
    let function_code = request_pdu[0];
    match function_code {
        FC_READ_COILS => read_bits_response(map, RegisterKind::Coil, function_code, request_pdu),
        FC_READ_DISCRETE_INPUTS => read_bits_response(
            map,
            RegisterKind::DiscreteInput,
            function_code,
            request_pdu,
        ),
        FC_READ_HOLDING_REGISTERS => read_words_response(
            map,
            RegisterKind::HoldingRegister,
            function_code,
            request_pdu,
        ),
        FC_READ_INPUT_REGISTERS => read_words_response(
            map,
            RegisterKind::InputRegister,
            function_code,
            request_pdu,
        ),
        FC_WRITE_SINGLE_COIL => write_single_coil_response(map, request_pdu),
        FC_WRITE_SINGLE_REGISTER => write_single_register_response(map, request_pdu),
        FC_WRITE_MULTIPLE_COILS => write_multiple_coils_response(map, request_pdu),
        FC_WRITE_MULTIPLE_REGISTERS => write_multiple_registers_response(map, request_pdu),
        _ => exception_pdu(function_code, Error::ILLEGAL_FUNCTION),
    }
}

fn exception_pdu(function_code: u8, exception_code: u8) -> Vec<u8> {
    vec![function_code | EXCEPTION_BIT, exception_code]
}

fn read_bits_response(
    map: &RegisterMap,
    kind: RegisterKind,
    function_code: u8,
    request: &[u8],
) -> Vec<u8> {
    let address = u16::from_be_bytes([request[1], request[2]]);
    let quantity = u16::from_be_bytes([request[3], request[4]]);

    if map.check_range(kind, address, quantity).is_err() {
        return exception_pdu(function_code, Error::ILLEGAL_DATA_ADDRESS);
    }

    let source = match kind {
        RegisterKind::Coil => map.coils(),
        RegisterKind::DiscreteInput => map.discrete_inputs(),
        _ => unreachable!("read_bits_response only called for bit tables"),
    };
    let start = address as usize;
    let end = start + quantity as usize;
    let packed = pack_bools_from_bits(&source[start..end]);

    let mut response = Vec::with_capacity(2 + packed.len());
    response.push(function_code);
    response.push(packed.len() as u8);
    response.extend_from_slice(&packed);
    response
}

fn read_words_response(
    map: &RegisterMap,
    kind: RegisterKind,
    function_code: u8,
    request: &[u8],
) -> Vec<u8> {
    let address = u16::from_be_bytes([request[1], request[2]]);
    let quantity = u16::from_be_bytes([request[3], request[4]]);

    if map.check_range(kind, address, quantity).is_err() {
        return exception_pdu(function_code, Error::ILLEGAL_DATA_ADDRESS);
    }

    let source = match kind {
        RegisterKind::HoldingRegister => map.holding_registers(),
        RegisterKind::InputRegister => map.input_registers(),
        _ => unreachable!("read_words_response only called for word tables"),
    };
    let start = address as usize;
    let end = start + quantity as usize;

    let mut response = Vec::with_capacity(2 + 2 * quantity as usize);
    response.push(function_code);
    response.push((2 * quantity) as u8);
    for &word in &source[start..end] {
        response.extend_from_slice(&word.to_be_bytes());
    }
    response
}

fn write_single_coil_response(map: &mut RegisterMap, request: &[u8]) -> Vec<u8> {
    let address = u16::from_be_bytes([request[1], request[2]]);
    let value = u16::from_be_bytes([request[3], request[4]]);

    if map.check_range(RegisterKind::Coil, address, 1).is_err() {
        return exception_pdu(FC_WRITE_SINGLE_COIL, Error::ILLEGAL_DATA_ADDRESS);
    }

    let on = match value {
        0xFF00 => true,
        0x0000 => false,
        _ => return exception_pdu(FC_WRITE_SINGLE_COIL, Error::ILLEGAL_DATA_VALUE),
    };

    map.coils_mut()[address as usize] = on;
    request.to_vec()
}

fn write_single_register_response(map: &mut RegisterMap, request: &[u8]) -> Vec<u8> {
    let address = u16::from_be_bytes([request[1], request[2]]);
    let value = u16::from_be_bytes([request[3], request[4]]);

    if map
        .check_range(RegisterKind::HoldingRegister, address, 1)
        .is_err()
    {
        return exception_pdu(FC_WRITE_SINGLE_REGISTER, Error::ILLEGAL_DATA_ADDRESS);
    }

    map.holding_registers_mut()[address as usize] = value;
    request.to_vec()
}

fn write_multiple_coils_response(map: &mut RegisterMap, request: &[u8]) -> Vec<u8> {
    let address = u16::from_be_bytes([request[1], request[2]]);
    let quantity = u16::from_be_bytes([request[3], request[4]]);
    let byte_count = request[5] as usize;
    let payload = &request[6..6 + byte_count];

    if map
        .check_range(RegisterKind::Coil, address, quantity)
        .is_err()
    {
        return exception_pdu(FC_WRITE_MULTIPLE_COILS, Error::ILLEGAL_DATA_ADDRESS);
    }

    let start = address as usize;
    let dest = &mut map.coils_mut()[start..start + quantity as usize];
    let mut written = 0usize;
    'outer: for &byte in payload {
        for bit in unpack_bools_from_byte(byte, 8) {
            if written >= dest.len() {
                break 'outer;
            }
            dest[written] = bit;
            written += 1;
        }
    }

    vec![
        FC_WRITE_MULTIPLE_COILS,
        request[1],
        request[2],
        request[3],
        request[4],
    ]
}

fn write_multiple_registers_response(map: &mut RegisterMap, request: &[u8]) -> Vec<u8> {
    let address = u16::from_be_bytes([request[1], request[2]]);
    let quantity = u16::from_be_bytes([request[3], request[4]]);
    let byte_count = request[5] as usize;
    let payload = &request[6..6 + byte_count];

    if map
        .check_range(RegisterKind::HoldingRegister, address, quantity)
        .is_err()
    {
        return exception_pdu(FC_WRITE_MULTIPLE_REGISTERS, Error::ILLEGAL_DATA_ADDRESS);
    }

    let start = address as usize;
    let dest = &mut map.holding_registers_mut()[start..start + quantity as usize];
    for (slot, word) in dest.iter_mut().zip(payload.chunks_exact(2)) {
        *slot = u16::from_be_bytes([word[0], word[1]]);
    }

    vec![
        FC_WRITE_MULTIPLE_REGISTERS,
        request[1],
        request[2],
        request[3],
        request[4],
    ]
}

/// Wrap a response PDU in its transport envelope and checksum,
/// echoing `request_transaction_id` (TCP only; ignored by RTU, which
/// has none) instead of allocating a fresh one, per §3's "a response
/// MUST echo the request's transaction identifier".
pub fn build_response_frame(
    codec: &mut dyn FrameCodec,
    unit_id: u8,
    response_pdu: &[u8],
    request_transaction_id: Option<u16>,
) -> Vec<u8> {
    codec.build_response(unit_id, response_pdu, request_transaction_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegisterMap;

    #[test]
    fn read_coils_in_range_returns_packed_response() {
        let mut map = RegisterMap::new(16, 0, 0, 0);
        map.coils_mut()[0] = true;
        map.coils_mut()[2] = true;

        let request = [FC_READ_COILS, 0x00, 0x00, 0x00, 0x03];
        let response = dispatch(&mut map, &request);
        assert_eq!(response, vec![FC_READ_COILS, 0x01, 0b0000_0101]);
    }

    #[test]
    fn read_coils_out_of_range_returns_exception_02() {
        let mut map = RegisterMap::new(4, 0, 0, 0);
        let request = [FC_READ_COILS, 0x00, 0x00, 0x00, 0x0A];
        let response = dispatch(&mut map, &request);
        assert_eq!(response, vec![FC_READ_COILS | EXCEPTION_BIT, Error::ILLEGAL_DATA_ADDRESS]);
    }

    #[test]
    fn write_single_coil_on_sets_bit_and_echoes_request() {
        let mut map = RegisterMap::new(4, 0, 0, 0);
        let request = [FC_WRITE_SINGLE_COIL, 0x00, 0x01, 0xFF, 0x00];
        let response = dispatch(&mut map, &request);
        assert_eq!(response, request.to_vec());
        assert!(map.coils()[1]);
    }

    #[test]
    fn write_single_coil_illegal_value_returns_exception_03() {
        let mut map = RegisterMap::new(4, 0, 0, 0);
        let request = [FC_WRITE_SINGLE_COIL, 0x00, 0x01, 0x12, 0x34];
        let response = dispatch(&mut map, &request);
        assert_eq!(
            response,
            vec![FC_WRITE_SINGLE_COIL | EXCEPTION_BIT, Error::ILLEGAL_DATA_VALUE]
        );
    }

    #[test]
    fn write_multiple_registers_sets_values_and_echoes_address_quantity() {
        let mut map = RegisterMap::new(0, 0, 8, 0);
        let request = [
            FC_WRITE_MULTIPLE_REGISTERS,
            0x00,
            0x02,
            0x00,
            0x02,
            0x04,
            0x00,
            0x0A,
            0x00,
            0x0B,
        ];
        let response = dispatch(&mut map, &request);
        assert_eq!(
            response,
            vec![FC_WRITE_MULTIPLE_REGISTERS, 0x00, 0x02, 0x00, 0x02]
        );
        assert_eq!(map.holding_registers()[2], 0x000A);
        assert_eq!(map.holding_registers()[3], 0x000B);
    }

    #[test]
    fn unsupported_function_code_returns_exception_01() {
        let mut map = RegisterMap::new(4, 0, 0, 0);
        let request = [0x7F, 0x00, 0x00];
        let response = dispatch(&mut map, &request);
        assert_eq!(response, vec![0x7F | EXCEPTION_BIT, Error::ILLEGAL_FUNCTION]);
    }
}
