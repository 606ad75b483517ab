//! Register map (C8): the owning container for a slave's coils,
//! discrete inputs, holding registers and input registers, plus the
//! bit pack/unpack helpers server dispatch and master decoding share.
//!
//! Grounded on the bit-position helpers in
//! `core/protocols/modbus/bit_operations.rs`, generalized from
//! single-bit extraction to whole-range packing per `spec.md` §4.8.

use crate::error::{Error, Result};

/// Which of the four data tables a function code addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

/// Dense, zero-based arrays for the four Modbus object types a slave
/// exposes.
///
/// Allocation is conceptually all-or-nothing (§3's "Lifecycle"):
/// since Rust's `Vec` allocation either fully succeeds or the
/// constructor never returns a half-built value, there is no partial
/// state to roll back.
#[derive(Debug, Clone)]
pub struct RegisterMap {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

impl RegisterMap {
    /// Allocate a register map with the given table lengths, all
    /// tables zero-initialized.
    pub fn new(
        num_coils: usize,
        num_discrete_inputs: usize,
        num_holding_registers: usize,
        num_input_registers: usize,
    ) -> Self {
        Self {
            coils: vec![false; num_coils],
            discrete_inputs: vec![false; num_discrete_inputs],
            holding_registers: vec![0; num_holding_registers],
            input_registers: vec![0; num_input_registers],
        }
    }

    pub fn coils(&self) -> &[bool] {
        &self.coils
    }

    pub fn coils_mut(&mut self) -> &mut [bool] {
        &mut self.coils
    }

    pub fn discrete_inputs(&self) -> &[bool] {
        &self.discrete_inputs
    }

    pub fn discrete_inputs_mut(&mut self) -> &mut [bool] {
        &mut self.discrete_inputs
    }

    pub fn holding_registers(&self) -> &[u16] {
        &self.holding_registers
    }

    pub fn holding_registers_mut(&mut self) -> &mut [u16] {
        &mut self.holding_registers
    }

    pub fn input_registers(&self) -> &[u16] {
        &self.input_registers
    }

    pub fn input_registers_mut(&mut self) -> &mut [u16] {
        &mut self.input_registers
    }

    /// Validate that `[address, address + quantity)` fits within the
    /// named table, returning `Error::IllegalDataAddress` (mapping to
    /// Modbus exception 0x02) otherwise. Callers must check this
    /// before performing any partial write, per §4.6.
    pub fn check_range(&self, kind: RegisterKind, address: u16, quantity: u16) -> Result<()> {
        let len = match kind {
            RegisterKind::Coil => self.coils.len(),
            RegisterKind::DiscreteInput => self.discrete_inputs.len(),
            RegisterKind::HoldingRegister => self.holding_registers.len(),
            RegisterKind::InputRegister => self.input_registers.len(),
        };
        let end = address as usize + quantity as usize;
        if end > len {
            return Err(Error::IllegalDataAddress {
                address,
                quantity,
                len,
            });
        }
        Ok(())
    }
}

/// Pack `nb_bits` booleans (LSB-first within each byte) from `bits`
/// into a freshly allocated `ceil(nb_bits / 8)`-byte buffer.
pub fn pack_bools_from_bits(bits: &[bool]) -> Vec<u8> {
    let nb_bits = bits.len();
    let mut out = vec![0u8; nb_bits.div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    out
}

/// Expand `quantity` LSB-first bits out of `bytes` into booleans.
/// Mirrors the master's FC01/FC02 decode rule in §4.5.
pub fn unpack_bits_from_bytes(bytes: &[u8], quantity: usize) -> Vec<bool> {
    let mut out = Vec::with_capacity(quantity);
    for i in 0..quantity {
        let byte = bytes[i / 8];
        out.push((byte >> (i % 8)) & 1 != 0);
    }
    out
}

/// Read `nb_bits <= 8` booleans (LSB-first) out of a single byte.
pub fn unpack_bools_from_byte(byte: u8, nb_bits: usize) -> Vec<bool> {
    debug_assert!(nb_bits <= 8);
    (0..nb_bits).map(|i| (byte >> i) & 1 != 0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trip_for_all_sizes_up_to_2000_bits() {
        for n in 0..=2000 {
            let bits: Vec<bool> = (0..n).map(|i| i % 3 == 0).collect();
            let packed = pack_bools_from_bits(&bits);
            let unpacked = unpack_bits_from_bytes(&packed, n);
            assert_eq!(bits, unpacked, "mismatch at n={n}");
        }
    }

    #[test]
    fn unpack_bools_from_byte_is_lsb_first() {
        // 0b1010_1101 -> bit0=1,bit1=0,bit2=1,bit3=1,bit4=0,bit5=1,bit6=0,bit7=1
        let bits = unpack_bools_from_byte(0b1010_1101, 8);
        assert_eq!(
            bits,
            vec![true, false, true, true, false, true, false, true]
        );
    }

    #[test]
    fn register_map_rejects_out_of_range_write() {
        let map = RegisterMap::new(10, 0, 0, 0);
        assert!(map.check_range(RegisterKind::Coil, 5, 5).is_ok());
        assert!(matches!(
            map.check_range(RegisterKind::Coil, 5, 6),
            Err(Error::IllegalDataAddress { .. })
        ));
    }

    #[test]
    fn register_map_is_zero_initialized() {
        let map = RegisterMap::new(4, 4, 4, 4);
        assert!(map.coils().iter().all(|&b| !b));
        assert!(map.holding_registers().iter().all(|&w| w == 0));
    }
}
