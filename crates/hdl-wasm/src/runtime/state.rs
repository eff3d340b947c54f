//! Host-visible proxy over the simulation state.
//!
//! Reads and writes go straight to linear memory through the layout record;
//! there is no staging layer, so a write through one name is immediately
//! visible to any alias over the same bytes. The same accessors serve the
//! live state (base 0) and the trace ring (base = record offset).

use num_bigint::BigUint;
use num_traits::One;

use super::Sim;
use crate::ir::{DataType, NativeType};
use crate::translate::VarSlot;
use crate::{Error, Result};

/// A value read from or written to a signal, shaped by its storage class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalValue {
    /// Storage of 1, 2, 4 or 8 bytes.
    Scalar(u64),
    /// Logic wider than 64 bits, masked to the declared width.
    Wide(BigUint),
    /// Array storage, raw little-endian bytes.
    Bytes(Vec<u8>),
}

impl From<u64> for SignalValue {
    fn from(v: u64) -> Self {
        SignalValue::Scalar(v)
    }
}

impl From<BigUint> for SignalValue {
    fn from(v: BigUint) -> Self {
        SignalValue::Wide(v)
    }
}

impl std::fmt::Display for SignalValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalValue::Scalar(v) => write!(f, "0x{v:x}"),
            SignalValue::Wide(v) => write!(f, "0x{v:x}"),
            SignalValue::Bytes(b) => write!(f, "[{} bytes]", b.len()),
        }
    }
}

fn width_mask_scalar(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

fn width_mask_big(width: u32) -> BigUint {
    (BigUint::one() << width) - BigUint::one()
}

impl Sim {
    // ── Live state ──

    pub fn peek(&self, name: &str) -> Result<SignalValue> {
        let slot = self.layout().get(name)?.clone();
        self.peek_slot(&slot, 0)
    }

    pub fn poke(&mut self, name: &str, value: &SignalValue) -> Result<()> {
        match value {
            SignalValue::Scalar(v) => self.poke_scalar(name, *v),
            SignalValue::Wide(v) => self.poke_big(name, v),
            SignalValue::Bytes(bytes) => {
                let slot = self.layout().get(name)?.clone();
                if bytes.len() != slot.size as usize {
                    return Err(Error::StateSizeMismatch {
                        expected: slot.size as usize,
                        got: bytes.len(),
                    });
                }
                let start = slot.offset as usize;
                self.memory_mut()[start..start + bytes.len()].copy_from_slice(bytes);
                Ok(())
            }
        }
    }

    /// Scalar read; fails for arrays and wide logic.
    pub fn peek_scalar(&self, name: &str) -> Result<u64> {
        match self.peek(name)? {
            SignalValue::Scalar(v) => Ok(v),
            _ => Err(Error::UnsupportedDataType(format!(
                "{name} is not scalar; use peek_big or read_bytes"
            ))),
        }
    }

    /// Scalar write, masked to the declared width.
    pub fn poke_scalar(&mut self, name: &str, value: u64) -> Result<()> {
        let slot = self.layout().get(name)?.clone();
        if slot.native == NativeType::Ref {
            if slot.dtype.is_wide() {
                return self.poke_big(name, &BigUint::from(value));
            }
            return Err(Error::UnsupportedDataType(format!(
                "{name} is an array; use bytes_mut"
            )));
        }
        let masked = value & width_mask_scalar(slot.dtype.width());
        let start = slot.offset as usize;
        let size = slot.size as usize;
        let bytes = masked.to_le_bytes();
        self.memory_mut()[start..start + size].copy_from_slice(&bytes[..size]);
        Ok(())
    }

    /// Wide read as an unsigned big integer.
    pub fn peek_big(&self, name: &str) -> Result<BigUint> {
        match self.peek(name)? {
            SignalValue::Scalar(v) => Ok(BigUint::from(v)),
            SignalValue::Wide(v) => Ok(v),
            SignalValue::Bytes(_) => Err(Error::UnsupportedDataType(format!(
                "{name} is an array; use read_bytes"
            ))),
        }
    }

    /// Wide write: masked to the declared width, stored as LE chunks.
    pub fn poke_big(&mut self, name: &str, value: &BigUint) -> Result<()> {
        let slot = self.layout().get(name)?.clone();
        if !slot.dtype.is_wide() {
            let low = value.to_u64_digits().first().copied().unwrap_or(0);
            return self.poke_scalar(name, low);
        }
        let masked = value & width_mask_big(slot.dtype.width());
        let mut digits = masked.to_u32_digits();
        digits.resize(slot.dtype.chunks() as usize, 0);
        let start = slot.offset as usize;
        let data = self.memory_mut();
        for (i, d) in digits.iter().enumerate() {
            data[start + i * 4..start + i * 4 + 4].copy_from_slice(&d.to_le_bytes());
        }
        Ok(())
    }

    /// Raw view over an array's storage.
    pub fn read_bytes(&self, name: &str) -> Result<&[u8]> {
        let slot = self.layout().get(name)?;
        let (start, size) = (slot.offset as usize, slot.size as usize);
        Ok(&self.memory_data()[start..start + size])
    }

    /// In-place mutation of an array's storage.
    pub fn bytes_mut(&mut self, name: &str) -> Result<&mut [u8]> {
        let slot = self.layout().get(name)?;
        let (start, size) = (slot.offset as usize, slot.size as usize);
        Ok(&mut self.memory_mut()[start..start + size])
    }

    // ── Trace ring ──

    /// Size of one trace record in bytes.
    #[must_use]
    pub fn trace_record_size(&self) -> u32 {
        self.layout().output_bytes
    }

    /// Read an output signal from the trace record under the host cursor.
    pub fn trace_peek(&self, name: &str) -> Result<SignalValue> {
        let slot = self.layout().get(name)?.clone();
        if slot.offset + slot.size > self.layout().output_bytes {
            return Err(Error::UnknownVariable(format!(
                "{name} is not an output; the trace ring only holds outputs"
            )));
        }
        let base = self.trace_base();
        self.peek_slot(&slot, base)
    }

    /// Advance the host trace cursor one record, wrapping with the ring.
    pub fn next_trace(&mut self) {
        self.trace_cursor = (self.trace_cursor + 1) % self.layout().trace_depth.max(1);
    }

    pub fn reset_trace(&mut self) {
        self.trace_cursor = 0;
    }

    fn trace_base(&self) -> u32 {
        self.layout().trace_offset + self.trace_cursor * self.layout().output_bytes
    }

    // ── Shared readers ──

    fn peek_slot(&self, slot: &VarSlot, base: u32) -> Result<SignalValue> {
        let start = (base + slot.offset) as usize;
        let size = slot.size as usize;
        let data = self.memory_data();
        match slot.native {
            NativeType::I32 | NativeType::I64 => {
                let mut bytes = [0u8; 8];
                bytes[..size].copy_from_slice(&data[start..start + size]);
                Ok(SignalValue::Scalar(u64::from_le_bytes(bytes)))
            }
            NativeType::Ref => {
                if let DataType::Logic { .. } = slot.dtype {
                    let digits: Vec<u32> = data[start..start + size]
                        .chunks_exact(4)
                        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect();
                    Ok(SignalValue::Wide(BigUint::new(digits)))
                } else {
                    Ok(SignalValue::Bytes(data[start..start + size].to_vec()))
                }
            }
        }
    }

    pub(crate) fn memory_data(&self) -> &[u8] {
        self.memory.data(&self.store)
    }

    pub(crate) fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut self.store)
    }
}
