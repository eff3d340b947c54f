//! Data type and size model for IR signals.
//!
//! Every signal is either a packed logic vector (`width = left - right + 1`
//! bits, `right` is always 0 in elaborated output) or a contiguous array of
//! a subtype. Widths above 64 bits do not fit a WASM value type; they are
//! stored as little-endian arrays of 32-bit chunks and handled by the wide
//! codegen path.

use serde::{Deserialize, Serialize};

/// Storage class of a signal once placed in linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeType {
    /// Fits a WASM `i32` (storage size 1, 2 or 4 bytes).
    I32,
    /// Fits a WASM `i64` (storage size 8 bytes).
    I64,
    /// Wider than 64 bits or an array; only its address is manipulated.
    Ref,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DataType {
    Logic {
        left: u32,
        #[serde(default)]
        right: u32,
        #[serde(default)]
        signed: bool,
    },
    Array {
        subtype: Box<DataType>,
        low: i32,
        high: i32,
    },
}

impl DataType {
    #[must_use]
    pub fn logic(width: u32) -> Self {
        debug_assert!(width > 0, "zero-width logic type");
        DataType::Logic {
            left: width - 1,
            right: 0,
            signed: false,
        }
    }

    #[must_use]
    pub fn logic_signed(width: u32) -> Self {
        DataType::Logic {
            left: width - 1,
            right: 0,
            signed: true,
        }
    }

    #[must_use]
    pub fn array(subtype: DataType, low: i32, high: i32) -> Self {
        DataType::Array {
            subtype: Box::new(subtype),
            low,
            high,
        }
    }

    /// Bit width of a logic type; arrays report their element width.
    #[must_use]
    pub fn width(&self) -> u32 {
        match self {
            DataType::Logic { left, right, .. } => left - right + 1,
            DataType::Array { subtype, .. } => subtype.width(),
        }
    }

    #[must_use]
    pub fn is_signed(&self) -> bool {
        match self {
            DataType::Logic { signed, .. } => *signed,
            DataType::Array { subtype, .. } => subtype.is_signed(),
        }
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, DataType::Array { .. })
    }

    /// Number of array elements; 1 for plain logic.
    #[must_use]
    pub fn element_count(&self) -> u32 {
        match self {
            DataType::Logic { .. } => 1,
            DataType::Array { low, high, .. } => (high - low).unsigned_abs() + 1,
        }
    }

    /// Storage bytes: 1/2/4/8 for native widths, chunked multiple of 4 above.
    #[must_use]
    pub fn size_bytes(&self) -> u32 {
        match self {
            DataType::Logic { .. } => {
                let w = self.width();
                match w {
                    0..=8 => 1,
                    9..=16 => 2,
                    17..=32 => 4,
                    33..=64 => 8,
                    _ => w.div_ceil(32) * 4,
                }
            }
            DataType::Array { subtype, .. } => subtype.size_bytes() * self.element_count(),
        }
    }

    /// Alignment is the next power of two of the size, capped at 8.
    #[must_use]
    pub fn align(&self) -> u32 {
        match self {
            DataType::Logic { .. } => self.size_bytes().next_power_of_two().min(8),
            DataType::Array { subtype, .. } => subtype.align(),
        }
    }

    #[must_use]
    pub fn native(&self) -> NativeType {
        match self {
            DataType::Logic { .. } => match self.size_bytes() {
                1 | 2 | 4 => NativeType::I32,
                8 => NativeType::I64,
                _ => NativeType::Ref,
            },
            DataType::Array { .. } => NativeType::Ref,
        }
    }

    /// True for logic wider than 64 bits.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        !self.is_array() && self.width() > 64
    }

    /// Number of 32-bit chunks a wide value occupies.
    #[must_use]
    pub fn chunks(&self) -> u32 {
        self.width().div_ceil(32)
    }

    /// Mask for the valid bits of the last (most significant) chunk.
    #[must_use]
    pub fn last_chunk_mask(&self) -> u32 {
        let rem = self.width() % 32;
        if rem == 0 { u32::MAX } else { (1 << rem) - 1 }
    }
}
