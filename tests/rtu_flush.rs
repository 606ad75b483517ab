//! Exercises the CRC-failure -> flush path (`spec.md` §7/§8 S5) against
//! a real RTU transport. Unlike the TCP loopback tests, this needs an
//! actual serial-style device: a PTY pair, opened the same way
//! `VirtualPort::create_pty` does in the termicon example, since
//! `flush` is an RTU-only operation and a no-op for TCP.

use std::ffi::CStr;
use std::io::Write;
use std::os::unix::io::FromRawFd;

use voltage_modbus::frame::RtuCodec;
use voltage_modbus::transport::RtuParams;
use voltage_modbus::{master, Transport};

/// Open a PTY pair, returning our end (the "device" side we script
/// replies from) and the slave's path, which the library opens as its
/// serial port.
fn open_pty_pair() -> (std::fs::File, String) {
    unsafe {
        let mut master_fd: libc::c_int = 0;
        let mut slave_fd: libc::c_int = 0;
        let mut name_buf = [0i8; 256];
        let result = libc::openpty(
            &mut master_fd,
            &mut slave_fd,
            name_buf.as_mut_ptr(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        );
        assert_eq!(result, 0, "openpty failed");
        libc::close(slave_fd);
        let slave_name = CStr::from_ptr(name_buf.as_ptr())
            .to_string_lossy()
            .into_owned();
        (std::fs::File::from_raw_fd(master_fd), slave_name)
    }
}

#[tokio::test]
async fn crc_failure_flushes_stray_bytes_before_the_next_request() {
    let (mut device, slave_name) = open_pty_pair();

    let params = RtuParams {
        device: slave_name,
        baud_rate: 9600,
        parity: tokio_serial::Parity::None,
        data_bits: tokio_serial::DataBits::Eight,
        stop_bits: tokio_serial::StopBits::One,
    };
    let mut transport = Transport::open_rtu(params).unwrap();
    let mut codec = RtuCodec;

    // A read-holding-registers(qty=1) reply is 7 bytes (unit, fc,
    // byte_count, 2 data bytes, 2 CRC bytes). Send that shape with a
    // wrong CRC trailer, followed by stray bytes that would desync the
    // next read if the transport's input queue isn't flushed.
    let mut bad = vec![0x11, 0x03, 0x02, 0x00, 0x01, 0xDE, 0xAD];
    bad.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
    device.write_all(&bad).unwrap();

    let err = master::read_holding_registers(&mut transport, &mut codec, 0x11, 0x0000, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, voltage_modbus::Error::InvalidCrc));

    // A well-formed reply. If the stray bytes above weren't flushed,
    // this read would desync against them and either fail again or
    // decode the wrong value.
    let mut good = vec![0x11u8, 0x03, 0x02, 0x00, 0x2A];
    voltage_modbus::crc::append(&mut good);
    device.write_all(&good).unwrap();

    let values = master::read_holding_registers(&mut transport, &mut codec, 0x11, 0x0000, 1)
        .await
        .unwrap();
    assert_eq!(values, vec![0x2A]);
}
