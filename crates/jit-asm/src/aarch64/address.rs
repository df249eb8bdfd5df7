//! AArch64 memory operands.
//!
//! An [`Address`] is validated and pre-encoded at construction; load/store
//! encoders only OR in the opcode, size and transfer register.

use super::operand::Extend;
use super::registers::{OperandSize, Register, R31};
use crate::codec::BranchField;
use crate::error::AsmError;

/// Addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AddressMode {
    /// `[rn, #imm]`: scaled unsigned imm12, or unscaled signed imm9.
    Offset,
    /// `[rn, #imm]!`: signed imm9, base written back before access.
    PreIndex,
    /// `[rn], #imm`: signed imm9, base written back after access.
    PostIndex,
    /// `[rn, #imm]` for pairs: signed imm7 scaled by the element size.
    PairOffset,
    /// `[rn, #imm]!` for pairs.
    PairPreIndex,
    /// `[rn], #imm` for pairs.
    PairPostIndex,
    /// `[rn, rm, <extend> {#s}]`.
    Reg,
    /// PC-relative literal, ±1 MiB, word aligned.
    PcOffset,
}

/// A validated memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Address {
    mode: AddressMode,
    encoding: u32,
}

const B10: u32 = 1 << 10;
const B11: u32 = 1 << 11;
const B12: u32 = 1 << 12;
const B21: u32 = 1 << 21;
const B23: u32 = 1 << 23;
const B24: u32 = 1 << 24;

#[inline]
const fn is_int(bits: u32, value: i64) -> bool {
    let limit = 1i64 << (bits - 1);
    -limit <= value && value < limit
}

#[inline]
const fn is_uint(bits: u32, value: i64) -> bool {
    0 <= value && value < (1i64 << bits)
}

#[inline]
const fn is_aligned(value: i64, log2: u32) -> bool {
    value & ((1i64 << log2) - 1) == 0
}

fn base_bits(rn: Register) -> Result<u32, AsmError> {
    rn.encode(R31::StackPointer)
        .map(|r| r << 5)
        .ok_or_else(|| AsmError::invalid("base register cannot be xzr"))
}

impl Address {
    /// Whether `offset` can be expressed in `mode` for an access of `size`.
    pub fn can_hold_offset(offset: i64, mode: AddressMode, size: OperandSize) -> bool {
        let scale = size.log2();
        match mode {
            AddressMode::Offset => {
                (is_uint(12 + scale, offset) && is_aligned(offset, scale)) || is_int(9, offset)
            }
            AddressMode::PreIndex | AddressMode::PostIndex => is_int(9, offset),
            AddressMode::PairOffset | AddressMode::PairPreIndex | AddressMode::PairPostIndex => {
                is_int(7 + scale, offset) && is_aligned(offset, scale)
            }
            AddressMode::PcOffset => BranchField::Imm19.can_encode(offset),
            AddressMode::Reg => false,
        }
    }

    /// `[rn, #offset]` in `mode` for an access of `size`.
    ///
    /// `mode` must be an immediate-offset mode; use [`Address::reg`] and
    /// [`Address::pc`] for the others.
    pub fn new(
        rn: Register,
        offset: i64,
        mode: AddressMode,
        size: OperandSize,
    ) -> Result<Address, AsmError> {
        if matches!(mode, AddressMode::Reg | AddressMode::PcOffset) {
            return Err(AsmError::invalid("mode needs a dedicated constructor"));
        }
        let base = base_bits(rn)?;
        let scale = size.log2();
        if !Self::can_hold_offset(offset, mode, size) {
            return Err(match mode {
                AddressMode::Offset => AsmError::overflow(offset, -256, 4095 << scale),
                AddressMode::PreIndex | AddressMode::PostIndex => {
                    AsmError::overflow(offset, -256, 255)
                }
                AddressMode::PairOffset | AddressMode::PairPreIndex | AddressMode::PairPostIndex
                    if !is_aligned(offset, scale) =>
                {
                    AsmError::MisalignedOffset {
                        value: offset,
                        align: 1 << scale,
                    }
                }
                _ => AsmError::overflow(offset, -64 << scale, 63 << scale),
            });
        }
        let imm9 = ((offset as u32) & 0x1FF) << 12;
        let encoding = match mode {
            AddressMode::Offset if is_uint(12 + scale, offset) && is_aligned(offset, scale) => {
                B24 | (((offset >> scale) as u32) << 10) | base
            }
            AddressMode::Offset => imm9 | base,
            AddressMode::PreIndex => B11 | B10 | imm9 | base,
            AddressMode::PostIndex => B10 | imm9 | base,
            _ => {
                let idx = match mode {
                    AddressMode::PairOffset => B24,
                    AddressMode::PairPreIndex => B24 | B23,
                    _ => B23,
                };
                idx | ((((offset >> scale) as u32) << 15) & (0x7F << 15)) | base
            }
        };
        Ok(Address { mode, encoding })
    }

    /// `[rn]`.
    pub fn base(rn: Register) -> Result<Address, AsmError> {
        Address::new(rn, 0, AddressMode::Offset, OperandSize::DoubleWord)
    }

    /// `[rn, rm, <extend> {#scale}]`.
    ///
    /// Only UXTW, UXTX, SXTW and SXTX are valid; scaling by the access size
    /// is only supported with UXTX.
    pub fn reg(rn: Register, rm: Register, extend: Extend, scaled: bool) -> Result<Address, AsmError> {
        let base = base_bits(rn)?;
        let index = rm
            .encode(R31::Zero)
            .ok_or_else(|| AsmError::invalid("index register cannot be sp"))?;
        if !matches!(extend, Extend::Uxtw | Extend::Uxtx | Extend::Sxtw | Extend::Sxtx) {
            return Err(AsmError::invalid("index extend must be uxtw, uxtx, sxtw or sxtx"));
        }
        if scaled && extend != Extend::Uxtx {
            return Err(AsmError::invalid("scaled index requires uxtx"));
        }
        let s = if scaled { B12 } else { 0 };
        Ok(Address {
            mode: AddressMode::Reg,
            encoding: B21 | B11 | s | base | (index << 16) | ((extend as u32) << 13),
        })
    }

    /// PC-relative literal at `offset` bytes from the instruction.
    pub fn pc(offset: i64) -> Result<Address, AsmError> {
        let encoding = BranchField::Imm19.encode(offset, 0)?;
        Ok(Address {
            mode: AddressMode::PcOffset,
            encoding,
        })
    }

    /// Addressing mode.
    #[inline]
    pub fn mode(&self) -> AddressMode {
        self.mode
    }

    /// Whether this is one of the three pair modes.
    #[inline]
    pub fn is_pair(&self) -> bool {
        matches!(
            self.mode,
            AddressMode::PairOffset | AddressMode::PairPreIndex | AddressMode::PairPostIndex
        )
    }

    /// Pre-encoded addressing bits.
    #[inline]
    pub(crate) fn encoding(&self) -> u32 {
        self.encoding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_unsigned_offset() {
        let a = Address::new(Register::R1, 16, AddressMode::Offset, OperandSize::DoubleWord)
            .unwrap();
        // ldr x0, [x1, #16] = 0xF9400820; minus opcode/size/rt gives these bits.
        assert_eq!(a.encoding(), B24 | (2 << 10) | (1 << 5));
    }

    #[test]
    fn unscaled_negative_offset() {
        let a = Address::new(Register::R2, -8, AddressMode::Offset, OperandSize::DoubleWord)
            .unwrap();
        assert_eq!(a.encoding(), (0x1F8 << 12) | (2 << 5));
    }

    #[test]
    fn misaligned_offset_falls_back_to_unscaled() {
        let a = Address::new(Register::R0, 3, AddressMode::Offset, OperandSize::DoubleWord)
            .unwrap();
        assert_eq!(a.encoding() & B24, 0);
    }

    #[test]
    fn offset_limits() {
        assert!(Address::can_hold_offset(
            4095 * 8,
            AddressMode::Offset,
            OperandSize::DoubleWord
        ));
        assert!(!Address::can_hold_offset(
            4096 * 8,
            AddressMode::Offset,
            OperandSize::DoubleWord
        ));
        assert!(Address::can_hold_offset(-256, AddressMode::PreIndex, OperandSize::Word));
        assert!(!Address::can_hold_offset(256, AddressMode::PostIndex, OperandSize::Word));
        assert!(Address::can_hold_offset(-512, AddressMode::PairOffset, OperandSize::DoubleWord));
        assert!(!Address::can_hold_offset(512, AddressMode::PairOffset, OperandSize::DoubleWord));
        assert!(!Address::can_hold_offset(4, AddressMode::PairOffset, OperandSize::DoubleWord));
    }

    #[test]
    fn pre_and_post_index() {
        let pre = Address::new(Register::Csp, -16, AddressMode::PreIndex, OperandSize::DoubleWord)
            .unwrap();
        assert_eq!(pre.encoding(), B11 | B10 | (0x1F0 << 12) | (31 << 5));
        let post = Address::new(Register::Csp, 16, AddressMode::PostIndex, OperandSize::DoubleWord)
            .unwrap();
        assert_eq!(post.encoding(), B10 | (16 << 12) | (31 << 5));
    }

    #[test]
    fn pair_modes() {
        let a = Address::new(
            Register::Csp,
            -16,
            AddressMode::PairPreIndex,
            OperandSize::DoubleWord,
        )
        .unwrap();
        assert!(a.is_pair());
        assert_eq!(a.encoding(), B24 | B23 | (0x7E << 15) | (31 << 5));
        assert!(matches!(
            Address::new(Register::R0, 12, AddressMode::PairOffset, OperandSize::DoubleWord),
            Err(AsmError::MisalignedOffset { value: 12, align: 8 })
        ));
        assert!(matches!(
            Address::new(Register::R0, 1024, AddressMode::PairOffset, OperandSize::DoubleWord),
            Err(AsmError::ImmediateOverflow { .. })
        ));
    }

    #[test]
    fn dedicated_modes_rejected() {
        assert!(Address::new(Register::R0, 0, AddressMode::PcOffset, OperandSize::Word).is_err());
        assert!(Address::new(Register::R0, 0, AddressMode::Reg, OperandSize::Word).is_err());
    }

    #[test]
    fn zr_is_not_a_base() {
        assert!(matches!(
            Address::base(Register::Zr),
            Err(AsmError::InvalidOperands { .. })
        ));
        assert!(Address::base(Register::Csp).is_ok());
    }

    #[test]
    fn register_offset() {
        let a = Address::reg(Register::R1, Register::R2, Extend::Uxtx, true).unwrap();
        assert_eq!(
            a.encoding(),
            B21 | B11 | B12 | (1 << 5) | (2 << 16) | (3 << 13)
        );
        assert!(Address::reg(Register::R1, Register::Csp, Extend::Uxtx, false).is_err());
        assert!(Address::reg(Register::R1, Register::Zr, Extend::Uxtx, false).is_ok());
        assert!(Address::reg(Register::R1, Register::R2, Extend::Sxtw, true).is_err());
        assert!(Address::reg(Register::R1, Register::R2, Extend::Uxtb, false).is_err());
    }

    #[test]
    fn pc_relative() {
        let a = Address::pc(-8).unwrap();
        assert_eq!(a.mode(), AddressMode::PcOffset);
        assert_eq!(BranchField::Imm19.decode(a.encoding()), -8);
        assert!(Address::pc(2).is_err());
        assert!(Address::pc(1 << 20).is_err());
    }
}
