//! Displacement field codec.
//!
//! A branch displacement lives in a bit field of an instruction. On x86-64 the
//! field is a whole byte or dword that follows the opcode; on AArch64 it is a
//! slice of the 32-bit instruction word holding the byte offset divided by
//! four. [`BranchField`] describes each layout once so that emission, chain
//! links and bind all use the same encode/decode pair.

use crate::error::AsmError;

/// A branch displacement field layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BranchField {
    /// x86-64 8-bit relative displacement (one byte).
    Rel8,
    /// x86-64 32-bit relative displacement (one dword).
    Rel32,
    /// AArch64 `B`/`BL` offset, bits 25:0, word granular.
    Imm26,
    /// AArch64 `B.cond`, `CBZ`/`CBNZ` and `LDR` literal offset, bits 23:5.
    Imm19,
    /// AArch64 `TBZ`/`TBNZ` offset, bits 18:5.
    Imm14,
}

impl BranchField {
    /// Width of the stored field in bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        match self {
            BranchField::Rel8 => 8,
            BranchField::Rel32 => 32,
            BranchField::Imm26 => 26,
            BranchField::Imm19 => 19,
            BranchField::Imm14 => 14,
        }
    }

    /// Bit position of the field's least significant bit.
    #[inline]
    pub const fn shift(self) -> u32 {
        match self {
            BranchField::Rel8 | BranchField::Rel32 | BranchField::Imm26 => 0,
            BranchField::Imm19 | BranchField::Imm14 => 5,
        }
    }

    /// log2 of the displacement granularity.
    #[inline]
    pub const fn scale(self) -> u32 {
        match self {
            BranchField::Rel8 | BranchField::Rel32 => 0,
            BranchField::Imm26 | BranchField::Imm19 | BranchField::Imm14 => 2,
        }
    }

    /// Field mask within the containing word.
    #[inline]
    pub const fn mask(self) -> u32 {
        if self.bits() == 32 {
            u32::MAX
        } else {
            ((1u32 << self.bits()) - 1) << self.shift()
        }
    }

    /// Smallest encodable displacement in bytes.
    #[inline]
    pub const fn min(self) -> i64 {
        -(1i64 << (self.bits() + self.scale() - 1))
    }

    /// Largest encodable displacement in bytes.
    #[inline]
    pub const fn max(self) -> i64 {
        (1i64 << (self.bits() + self.scale() - 1)) - (1i64 << self.scale())
    }

    /// Whether `disp` is in range and correctly aligned.
    #[inline]
    pub const fn can_encode(self, disp: i64) -> bool {
        disp & ((1i64 << self.scale()) - 1) == 0 && disp >= self.min() && disp <= self.max()
    }

    /// Place `disp` into `word`, preserving every bit outside the field.
    pub fn encode(self, disp: i64, word: u32) -> Result<u32, AsmError> {
        let align = 1i64 << self.scale();
        if disp & (align - 1) != 0 {
            return Err(AsmError::MisalignedOffset {
                value: disp,
                align: align as u32,
            });
        }
        if disp < self.min() || disp > self.max() {
            return Err(AsmError::overflow(disp, self.min(), self.max()));
        }
        Ok(self.encode_unchecked(disp, word))
    }

    /// [`encode`](Self::encode) for a displacement already known to fit.
    #[inline]
    pub(crate) fn encode_unchecked(self, disp: i64, word: u32) -> u32 {
        debug_assert!(self.can_encode(disp), "{:?} cannot hold {}", self, disp);
        let field = (((disp >> self.scale()) as u32) << self.shift()) & self.mask();
        (word & !self.mask()) | field
    }

    /// Extract the sign-extended byte displacement from `word`.
    #[inline]
    pub const fn decode(self, word: u32) -> i64 {
        let raw = ((word & self.mask()) >> self.shift()) as i64;
        let unused = 64 - self.bits();
        ((raw << unused) >> unused) << self.scale()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges() {
        assert_eq!(BranchField::Rel8.min(), -128);
        assert_eq!(BranchField::Rel8.max(), 127);
        assert_eq!(BranchField::Rel32.min(), i32::MIN as i64);
        assert_eq!(BranchField::Rel32.max(), i32::MAX as i64);
        assert_eq!(BranchField::Imm26.min(), -(128 << 20));
        assert_eq!(BranchField::Imm26.max(), (128 << 20) - 4);
        assert_eq!(BranchField::Imm19.min(), -(1 << 20));
        assert_eq!(BranchField::Imm19.max(), (1 << 20) - 4);
        assert_eq!(BranchField::Imm14.min(), -(32 << 10));
        assert_eq!(BranchField::Imm14.max(), (32 << 10) - 4);
    }

    #[test]
    fn masks() {
        assert_eq!(BranchField::Rel8.mask(), 0xFF);
        assert_eq!(BranchField::Rel32.mask(), 0xFFFF_FFFF);
        assert_eq!(BranchField::Imm26.mask(), 0x03FF_FFFF);
        assert_eq!(BranchField::Imm19.mask(), 0x00FF_FFE0);
        assert_eq!(BranchField::Imm14.mask(), 0x0007_FFE0);
    }

    #[test]
    fn encode_b_forward() {
        // b #8 = 0x14000002
        assert_eq!(BranchField::Imm26.encode(8, 0x1400_0000).unwrap(), 0x1400_0002);
        // b #-4 = 0x17FFFFFF
        assert_eq!(BranchField::Imm26.encode(-4, 0x1400_0000).unwrap(), 0x17FF_FFFF);
    }

    #[test]
    fn encode_bcond_preserves_condition() {
        // b.ne #8 = 0x54000041
        let word = BranchField::Imm19.encode(8, 0x5400_0001).unwrap();
        assert_eq!(word, 0x5400_0041);
        assert_eq!(BranchField::Imm19.decode(word), 8);
        assert_eq!(word & 0xF, 0x1);
    }

    #[test]
    fn encode_tbz_preserves_bit_number() {
        // tbz x3, #40, #-8: b5=1, b40=8, rt=3
        let base = 0xB600_0003 | (8 << 19);
        let word = BranchField::Imm14.encode(-8, base).unwrap();
        assert_eq!(BranchField::Imm14.decode(word), -8);
        assert_eq!(word & !BranchField::Imm14.mask(), base);
    }

    #[test]
    fn rel8_negative() {
        let byte = BranchField::Rel8.encode(-2, 0).unwrap();
        assert_eq!(byte, 0xFE);
        assert_eq!(BranchField::Rel8.decode(byte), -2);
    }

    #[test]
    fn rel32_extremes() {
        for disp in [i32::MIN as i64, -1, 0, 1, i32::MAX as i64] {
            let word = BranchField::Rel32.encode(disp, 0).unwrap();
            assert_eq!(BranchField::Rel32.decode(word), disp);
        }
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(matches!(
            BranchField::Rel8.encode(128, 0),
            Err(AsmError::ImmediateOverflow { .. })
        ));
        assert!(matches!(
            BranchField::Imm19.encode(1 << 20, 0),
            Err(AsmError::ImmediateOverflow { .. })
        ));
        assert!(!BranchField::Imm14.can_encode(32 << 10));
        assert!(BranchField::Imm14.can_encode(-(32 << 10)));
    }

    #[test]
    fn rejects_misaligned() {
        assert_eq!(
            BranchField::Imm26.encode(6, 0),
            Err(AsmError::MisalignedOffset { value: 6, align: 4 })
        );
        assert!(!BranchField::Imm19.can_encode(2));
    }
}
