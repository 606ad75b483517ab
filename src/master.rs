//! Master operations (C5): the public read/write surface against a
//! remote slave.
//!
//! Each operation follows the same four-step shape the teacher's
//! `voltage-protocols/src/modbus/codec.rs` encode/decode pair and
//! `connection.rs`'s send/receive pair already establish: build a
//! request PDU (C2/`pdu.rs`), send it, compute the expected reply size
//! (C3/`frame.rs`) and read exactly that many bytes (C4/`receive.rs`),
//! then decode or reclassify what came back.

use crate::data::unpack_bits_from_bytes;
use crate::error::{Error, Result};
use crate::frame::{expected_response_len, FrameCodec};
use crate::pdu::{
    build_read_request, build_write_multiple_request, build_write_single_request, is_exception_fc,
    FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
    FC_REPORT_SLAVE_ID, FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL,
    FC_WRITE_SINGLE_REGISTER,
};
use crate::receive::read_known_length;
use crate::transport::Transport;

/// Per-function-code request-quantity ceilings, aligned with the
/// Modbus specification (`spec.md` §4.5 "Clamping").
pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_WRITE_REGISTERS: u16 = 123;
pub const MAX_WRITE_COILS: u16 = 1968;
/// Bit-read ceiling. Not in `spec.md`'s clamping table, but needed for
/// the same reason as the others: a bit read's `byte_count` field is a
/// single byte, so quantities past 2040 would overflow it. 2000 is the
/// conventional Modbus limit, well clear of that boundary.
pub const MAX_READ_BITS: u16 = 2000;

const EXCEPTION_PDU_LEN: usize = 2;

/// Send `request` and read back exactly `expected_len` bytes, via
/// `codec`/`transport`. Shared by every master operation below.
async fn roundtrip(
    transport: &mut Transport,
    codec: &mut dyn FrameCodec,
    unit_id: u8,
    pdu: &[u8],
    expected_len: usize,
) -> Result<Vec<u8>> {
    let frame = codec.build_request(unit_id, pdu);
    transport.send(&frame).await?;

    let sent_transaction_id = codec.last_transaction_id();

    match read_known_length(transport.as_async_read(), expected_len).await {
        Ok(frame) => {
            verify_integrity(transport, codec, &frame)?;
            let header = codec.parse_header(&frame)?;
            if let (Some(expected), Some(actual)) = (sent_transaction_id, header.transaction_id) {
                if expected != actual {
                    return Err(Error::TransactionMismatch { expected, actual });
                }
            }
            Ok(frame[header.pdu_start..frame.len() - codec.checksum_len()].to_vec())
        }
        // C3 predicted a longer reply than an exception frame actually
        // is; reclassify before giving up, per `spec.md` §4.5 and §9.
        Err(Error::Timeout { received }) => reclassify_as_exception(transport, codec, &received),
    }
}

/// Verify `frame`'s checksum via `codec`, flushing `transport` first if
/// it fails. `spec.md` §7/§8 S5 requires the flush to happen before
/// the caller is notified, so that the next request starts from a
/// clean transport — mirroring `modbus.c`'s `error_treat`, which calls
/// `tcflush` on every CRC mismatch.
fn verify_integrity(transport: &mut Transport, codec: &dyn FrameCodec, frame: &[u8]) -> Result<()> {
    match codec.verify_integrity(frame) {
        Ok(()) => Ok(()),
        Err(e) => {
            if matches!(e, Error::InvalidCrc) {
                if let Err(flush_err) = transport.flush() {
                    tracing::warn!(error = %flush_err, "flush after CRC failure also failed");
                }
            }
            Err(e)
        }
    }
}

/// Check whether a short, timed-out read is actually a well-formed
/// exception frame, and if so decode it into `Error::Exception`/
/// `Error::InvalidExceptionCode`.
fn reclassify_as_exception(
    transport: &mut Transport,
    codec: &dyn FrameCodec,
    received: &[u8],
) -> Result<Vec<u8>> {
    let header_len = codec.header_len();
    let checksum_len = codec.checksum_len();
    let needed = header_len + 1 + EXCEPTION_PDU_LEN + checksum_len;

    if received.len() != needed {
        return Err(Error::Timeout {
            received: received.to_vec(),
        });
    }

    let fc = received[header_len + 1];
    if !is_exception_fc(fc) {
        return Err(Error::Timeout {
            received: received.to_vec(),
        });
    }

    if checksum_len > 0 {
        verify_integrity(transport, codec, received)?;
    }

    let exception_code = received[header_len + 2];
    if Error::is_known_exception_code(exception_code) {
        Err(Error::Exception(exception_code))
    } else {
        Err(Error::InvalidExceptionCode(exception_code))
    }
}

/// Reduce `quantity` down to `max` if it exceeds it, logging a
/// warning, and let the caller proceed with the reduced value — the
/// request is still sent, just capped. Mirrors `modbus.c`'s per-function
/// warn-then-clamp behavior (e.g. `read_holding_registers`'s
/// `count > MAX_READ_HOLD_REGS` check, which still issues the request
/// at the reduced count), per `spec.md` §3's "Requests exceeding the
/// limit are silently clamped with a warning."
fn clamp_quantity(quantity: u16, max: u16) -> u16 {
    if quantity > max {
        tracing::warn!(requested = quantity, max, "clamping request quantity to protocol limit");
        max
    } else {
        quantity
    }
}

async fn read_bits(
    transport: &mut Transport,
    codec: &mut dyn FrameCodec,
    unit_id: u8,
    function_code: u8,
    address: u16,
    quantity: u16,
) -> Result<Vec<bool>> {
    let quantity = clamp_quantity(quantity, MAX_READ_BITS);
    let pdu = build_read_request(function_code, address, quantity);
    let expected = expected_response_len(
        function_code,
        quantity,
        codec.header_len(),
        codec.checksum_len(),
    );
    let reply = roundtrip(transport, codec, unit_id, &pdu, expected).await?;

    let byte_count = reply[1] as usize;
    Ok(unpack_bits_from_bytes(
        &reply[2..2 + byte_count],
        quantity as usize,
    ))
}

async fn read_words(
    transport: &mut Transport,
    codec: &mut dyn FrameCodec,
    unit_id: u8,
    function_code: u8,
    address: u16,
    quantity: u16,
) -> Result<Vec<u16>> {
    let quantity = clamp_quantity(quantity, MAX_READ_REGISTERS);
    let pdu = build_read_request(function_code, address, quantity);
    let expected = expected_response_len(
        function_code,
        quantity,
        codec.header_len(),
        codec.checksum_len(),
    );
    let reply = roundtrip(transport, codec, unit_id, &pdu, expected).await?;

    let byte_count = reply[1] as usize;
    Ok(reply[2..2 + byte_count]
        .chunks_exact(2)
        .map(|w| u16::from_be_bytes([w[0], w[1]]))
        .collect())
}

/// Read `quantity` coils starting at `address` (FC 0x01).
pub async fn read_coils(
    transport: &mut Transport,
    codec: &mut dyn FrameCodec,
    unit_id: u8,
    address: u16,
    quantity: u16,
) -> Result<Vec<bool>> {
    read_bits(transport, codec, unit_id, FC_READ_COILS, address, quantity).await
}

/// Read `quantity` discrete inputs starting at `address` (FC 0x02).
pub async fn read_discrete_inputs(
    transport: &mut Transport,
    codec: &mut dyn FrameCodec,
    unit_id: u8,
    address: u16,
    quantity: u16,
) -> Result<Vec<bool>> {
    read_bits(
        transport,
        codec,
        unit_id,
        FC_READ_DISCRETE_INPUTS,
        address,
        quantity,
    )
    .await
}

/// Read `quantity` holding registers starting at `address` (FC 0x03).
pub async fn read_holding_registers(
    transport: &mut Transport,
    codec: &mut dyn FrameCodec,
    unit_id: u8,
    address: u16,
    quantity: u16,
) -> Result<Vec<u16>> {
    read_words(
        transport,
        codec,
        unit_id,
        FC_READ_HOLDING_REGISTERS,
        address,
        quantity,
    )
    .await
}

/// Read `quantity` input registers starting at `address` (FC 0x04).
pub async fn read_input_registers(
    transport: &mut Transport,
    codec: &mut dyn FrameCodec,
    unit_id: u8,
    address: u16,
    quantity: u16,
) -> Result<Vec<u16>> {
    read_words(
        transport,
        codec,
        unit_id,
        FC_READ_INPUT_REGISTERS,
        address,
        quantity,
    )
    .await
}

/// Set a single coil ON (`value = true`) or OFF, encoded on the wire
/// as 0xFF00/0x0000 (FC 0x05). Returns once the echo is verified.
pub async fn write_single_coil(
    transport: &mut Transport,
    codec: &mut dyn FrameCodec,
    unit_id: u8,
    address: u16,
    value: bool,
) -> Result<()> {
    let wire_value = if value { 0xFF00 } else { 0x0000 };
    let pdu = build_write_single_request(FC_WRITE_SINGLE_COIL, address, wire_value);
    let expected =
        expected_response_len(FC_WRITE_SINGLE_COIL, 0, codec.header_len(), codec.checksum_len());
    let reply = roundtrip(transport, codec, unit_id, &pdu, expected).await?;

    let echoed_address = u16::from_be_bytes([reply[1], reply[2]]);
    let echoed_value = u16::from_be_bytes([reply[3], reply[4]]);
    if echoed_address != address || echoed_value != wire_value {
        return Err(Error::IllegalDataValue(
            "write single coil echo mismatch".to_string(),
        ));
    }
    Ok(())
}

/// Write a single holding register (FC 0x06).
pub async fn write_single_register(
    transport: &mut Transport,
    codec: &mut dyn FrameCodec,
    unit_id: u8,
    address: u16,
    value: u16,
) -> Result<()> {
    let pdu = build_write_single_request(FC_WRITE_SINGLE_REGISTER, address, value);
    let expected = expected_response_len(
        FC_WRITE_SINGLE_REGISTER,
        0,
        codec.header_len(),
        codec.checksum_len(),
    );
    let reply = roundtrip(transport, codec, unit_id, &pdu, expected).await?;

    let echoed_address = u16::from_be_bytes([reply[1], reply[2]]);
    let echoed_value = u16::from_be_bytes([reply[3], reply[4]]);
    if echoed_address != address || echoed_value != value {
        return Err(Error::IllegalDataValue(
            "write single register echo mismatch".to_string(),
        ));
    }
    Ok(())
}

/// Write `values` starting at `address` (FC 0x0F). Returns the number
/// of coils the slave reports as written.
pub async fn write_multiple_coils(
    transport: &mut Transport,
    codec: &mut dyn FrameCodec,
    unit_id: u8,
    address: u16,
    values: &[bool],
) -> Result<u16> {
    let quantity = clamp_quantity(values.len() as u16, MAX_WRITE_COILS);
    let values = &values[..quantity as usize];
    let payload = crate::data::pack_bools_from_bits(values);
    let pdu = build_write_multiple_request(FC_WRITE_MULTIPLE_COILS, address, quantity, &payload);
    let expected = expected_response_len(
        FC_WRITE_MULTIPLE_COILS,
        0,
        codec.header_len(),
        codec.checksum_len(),
    );
    let reply = roundtrip(transport, codec, unit_id, &pdu, expected).await?;

    let echoed_address = u16::from_be_bytes([reply[1], reply[2]]);
    let echoed_quantity = u16::from_be_bytes([reply[3], reply[4]]);
    if echoed_address != address {
        return Err(Error::IllegalDataValue(
            "write multiple coils echo mismatch".to_string(),
        ));
    }
    Ok(echoed_quantity)
}

/// Write `values` starting at `address` (FC 0x10). Returns the number
/// of registers the slave reports as written.
pub async fn write_multiple_registers(
    transport: &mut Transport,
    codec: &mut dyn FrameCodec,
    unit_id: u8,
    address: u16,
    values: &[u16],
) -> Result<u16> {
    let quantity = clamp_quantity(values.len() as u16, MAX_WRITE_REGISTERS);
    let values = &values[..quantity as usize];
    let mut payload = Vec::with_capacity(values.len() * 2);
    for v in values {
        payload.extend_from_slice(&v.to_be_bytes());
    }
    let pdu =
        build_write_multiple_request(FC_WRITE_MULTIPLE_REGISTERS, address, quantity, &payload);
    let expected = expected_response_len(
        FC_WRITE_MULTIPLE_REGISTERS,
        0,
        codec.header_len(),
        codec.checksum_len(),
    );
    let reply = roundtrip(transport, codec, unit_id, &pdu, expected).await?;

    let echoed_address = u16::from_be_bytes([reply[1], reply[2]]);
    let echoed_quantity = u16::from_be_bytes([reply[3], reply[4]]);
    if echoed_address != address {
        return Err(Error::IllegalDataValue(
            "write multiple registers echo mismatch".to_string(),
        ));
    }
    Ok(echoed_quantity)
}

/// Read the slave's identification string (FC 0x11). Unlike every
/// other operation, C3's oracle has no fixed-size entry for this
/// function code: the reply's length isn't known until its
/// `byte_count` field arrives on the wire, so this reads in explicit
/// stages instead of a single `roundtrip` call, per `spec.md` §6's
/// listing of `report_slave_id` among the public master operations.
pub async fn report_slave_id(
    transport: &mut Transport,
    codec: &mut dyn FrameCodec,
    unit_id: u8,
) -> Result<Vec<u8>> {
    let pdu = vec![FC_REPORT_SLAVE_ID];
    let request_frame = codec.build_request(unit_id, &pdu);
    transport.send(&request_frame).await?;
    let sent_transaction_id = codec.last_transaction_id();

    let header_len = codec.header_len();
    let checksum_len = codec.checksum_len();

    // Envelope header (if any) + unit id + function code.
    let mut frame = read_known_length(transport.as_async_read(), header_len + 2).await?;
    let function_code = frame[header_len + 1];

    if is_exception_fc(function_code) {
        let tail = read_known_length(transport.as_async_read(), 1 + checksum_len).await?;
        frame.extend_from_slice(&tail);
        verify_integrity(transport, codec, &frame)?;
        let exception_code = frame[header_len + 2];
        return if Error::is_known_exception_code(exception_code) {
            Err(Error::Exception(exception_code))
        } else {
            Err(Error::InvalidExceptionCode(exception_code))
        };
    }

    let byte_count_buf = read_known_length(transport.as_async_read(), 1).await?;
    let byte_count = byte_count_buf[0] as usize;
    frame.extend_from_slice(&byte_count_buf);
    let rest = read_known_length(transport.as_async_read(), byte_count + checksum_len).await?;
    frame.extend_from_slice(&rest);

    verify_integrity(transport, codec, &frame)?;
    let header = codec.parse_header(&frame)?;
    if let (Some(expected), Some(actual)) = (sent_transaction_id, header.transaction_id) {
        if expected != actual {
            return Err(Error::TransactionMismatch { expected, actual });
        }
    }

    let data_start = header.pdu_start + 2;
    Ok(frame[data_start..data_start + byte_count].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_quantity_reduces_to_ceiling_instead_of_rejecting() {
        assert_eq!(clamp_quantity(125, MAX_READ_REGISTERS), 125);
        assert_eq!(clamp_quantity(200, MAX_READ_REGISTERS), 125);
        assert_eq!(clamp_quantity(u16::MAX, MAX_WRITE_COILS), MAX_WRITE_COILS);
    }

    #[tokio::test]
    async fn read_holding_registers_over_limit_sends_one_request_clamped_to_125() {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;
        use crate::frame::{FrameCodec, TcpCodec};
        use crate::transport::ErrorPolicy;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = crate::receive::read_progressive(&mut socket, 6, 0)
                .await
                .unwrap();
            // Quantity field sits at the end of the read-request PDU:
            // header(6) + unit(1) + fc(1) + addr(2) + qty(2).
            let on_wire_quantity = u16::from_be_bytes([request[10], request[11]]);

            let mut reply = vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
            let mut data = vec![0x11u8, 0x03, (on_wire_quantity * 2) as u8];
            data.extend(std::iter::repeat(0u8).take(on_wire_quantity as usize * 2));
            let length = (data.len()) as u16;
            reply[4..6].copy_from_slice(&length.to_be_bytes());
            reply.extend_from_slice(&data);
            socket.write_all(&reply).await.unwrap();
            on_wire_quantity
        });

        let mut transport =
            Transport::connect_tcp(addr, std::time::Duration::from_secs(1), ErrorPolicy::NopOnError)
                .await
                .unwrap();
        let mut codec = TcpCodec::new();

        let values = read_holding_registers(&mut transport, &mut codec, 0x11, 0x0000, 200)
            .await
            .unwrap();

        let on_wire_quantity = server.await.unwrap();
        assert_eq!(on_wire_quantity, MAX_READ_REGISTERS);
        assert_eq!(values.len(), MAX_READ_REGISTERS as usize);
    }

    #[tokio::test]
    async fn reclassify_as_exception_accepts_rtu_exception_frame() {
        let codec = crate::frame::RtuCodec;
        let mut frame = vec![0x11u8, 0x81, 0x02];
        crate::crc::append(&mut frame);
        let mut transport = Transport::test_tcp_pair().await;
        let result = reclassify_as_exception(&mut transport, &codec, &frame);
        assert!(matches!(result, Err(Error::Exception(0x02))));
    }

    #[tokio::test]
    async fn reclassify_as_exception_rejects_non_exception_short_frame() {
        let codec = crate::frame::RtuCodec;
        let mut frame = vec![0x11u8, 0x01, 0x02];
        crate::crc::append(&mut frame);
        let mut transport = Transport::test_tcp_pair().await;
        let result = reclassify_as_exception(&mut transport, &codec, &frame);
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn reclassify_as_exception_flushes_on_crc_mismatch() {
        let codec = crate::frame::RtuCodec;
        // Well-formed exception shape, but a trailer that doesn't match.
        let frame = vec![0x11u8, 0x81, 0x02, 0x00, 0x00];
        let mut transport = Transport::test_tcp_pair().await;
        let result = reclassify_as_exception(&mut transport, &codec, &frame);
        assert!(matches!(result, Err(Error::InvalidCrc)));
    }
}
