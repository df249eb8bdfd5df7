//! Bitmask ("logical") immediates for AND/ORR/EOR/ANDS.
//!
//! A logical immediate is a run of `s + 1` ones inside an element of 2, 4, 8,
//! 16, 32 or 64 bits, rotated right by `r` within the element and replicated
//! to fill the register. 0 and all-ones are never encodable.

/// The `N:immr:imms` triple of a logical immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogicalImm {
    /// 1 only for a 64-bit element.
    pub n: u32,
    /// Right rotation within the element.
    pub imm_r: u32,
    /// Element size marker and run length minus one.
    pub imm_s: u32,
}

#[inline]
fn element_mask(size: u32) -> u64 {
    if size == 64 {
        u64::MAX
    } else {
        (1u64 << size) - 1
    }
}

#[inline]
fn rotate_right(elem: u64, r: u32, size: u32) -> u64 {
    if r == 0 {
        elem
    } else {
        ((elem >> r) | (elem << (size - r))) & element_mask(size)
    }
}

fn replicate(elem: u64, size: u32) -> u64 {
    let mut value = elem;
    let mut filled = size;
    while filled < 64 {
        value |= value << filled;
        filled <<= 1;
    }
    value
}

impl LogicalImm {
    /// Decompose `value` for a `width`-bit (32 or 64) operation.
    ///
    /// For 32-bit operations `value` must fit in the low word.
    pub fn encode(value: u64, width: u32) -> Option<LogicalImm> {
        debug_assert!(width == 32 || width == 64);
        let value = if width == 32 {
            if value >> 32 != 0 {
                return None;
            }
            value | (value << 32)
        } else {
            value
        };
        if value == 0 || value == u64::MAX {
            return None;
        }

        // Smallest repeating element.
        let mut size = 64u32;
        while size > 2 {
            let half = size / 2;
            let mask = element_mask(half);
            if value & mask != (value >> half) & mask {
                break;
            }
            size = half;
        }
        let elem = value & element_mask(size);

        let ones = elem.count_ones();
        let run = element_mask(ones);
        let r = (0..size).find(|&r| rotate_right(elem, r, size) == run)?;

        Some(LogicalImm {
            n: u32::from(size == 64),
            imm_r: (size - r) % size,
            imm_s: (!(size * 2 - 1) & 0x3F) | (ones - 1),
        })
    }

    /// Expand back to the `width`-bit value.
    pub fn decode(self, width: u32) -> u64 {
        let combined = (self.n << 6) | (!self.imm_s & 0x3F);
        let len = 31 - combined.leading_zeros();
        let size = 1u32 << len;
        let s = self.imm_s & (size - 1);
        let r = self.imm_r & (size - 1);
        let elem = rotate_right(element_mask(s + 1), r, size);
        let value = replicate(elem, size);
        if width == 32 {
            value & 0xFFFF_FFFF
        } else {
            value
        }
    }

    /// `N:immr:imms` placed at bits 22, 21:16 and 15:10.
    #[inline]
    pub(crate) fn bits(self) -> u32 {
        (self.n << 22) | (self.imm_r << 16) | (self.imm_s << 10)
    }
}
