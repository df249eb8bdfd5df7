//! Flexible second operand of AArch64 data-processing instructions.

use super::logical_imm::LogicalImm;
use super::registers::Register;
use crate::error::AsmError;

/// Shift applied to a register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum Shift {
    Lsl = 0,
    Lsr = 1,
    Asr = 2,
    Ror = 3,
}

/// Extension applied to a register operand or index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum Extend {
    Uxtb = 0,
    Uxth = 1,
    Uxtw = 2,
    Uxtx = 3,
    Sxtb = 4,
    Sxth = 5,
    Sxtw = 6,
    Sxtx = 7,
}

/// Second source operand.
///
/// Which variants an instruction accepts is decided by the instruction:
/// add/sub take `Shifted`, `Extended` and `Immediate`; the logical group
/// takes `Shifted` and `Logical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operand {
    /// `rm, <shift> #amount` with amount below the register width.
    Shifted {
        /// Source register; never the stack pointer.
        rm: Register,
        /// Shift kind.
        shift: Shift,
        /// Shift amount, 0..=63.
        amount: u8,
    },
    /// `rm, <extend> #amount` with amount 0..=4.
    Extended {
        /// Source register.
        rm: Register,
        /// Extension kind.
        extend: Extend,
        /// Left shift after extension.
        amount: u8,
    },
    /// Unsigned 12-bit immediate, optionally shifted left by 12.
    Immediate {
        /// The 12-bit payload.
        imm12: u16,
        /// Whether the payload is shifted by 12.
        shifted: bool,
    },
    /// Bitmask immediate for the logical group.
    Logical(LogicalImm),
}

impl Operand {
    /// Plain register operand.
    #[inline]
    pub const fn reg(rm: Register) -> Operand {
        Operand::Shifted {
            rm,
            shift: Shift::Lsl,
            amount: 0,
        }
    }

    /// Shifted register operand.
    pub fn shifted(rm: Register, shift: Shift, amount: u32) -> Result<Operand, AsmError> {
        if amount > 63 {
            return Err(AsmError::overflow(amount as i64, 0, 63));
        }
        if rm == Register::Csp {
            return Err(AsmError::invalid("shifted operand cannot be sp"));
        }
        Ok(Operand::Shifted {
            rm,
            shift,
            amount: amount as u8,
        })
    }

    /// Extended register operand.
    pub fn extended(rm: Register, extend: Extend, amount: u32) -> Result<Operand, AsmError> {
        if amount > 4 {
            return Err(AsmError::overflow(amount as i64, 0, 4));
        }
        Ok(Operand::Extended {
            rm,
            extend,
            amount: amount as u8,
        })
    }

    /// Add/sub immediate, if `imm` has one.
    pub fn imm(imm: i64) -> Option<Operand> {
        if (0..0x1000).contains(&imm) {
            Some(Operand::Immediate {
                imm12: imm as u16,
                shifted: false,
            })
        } else if imm & 0xFFF == 0 && (0..0x1000).contains(&(imm >> 12)) {
            Some(Operand::Immediate {
                imm12: (imm >> 12) as u16,
                shifted: true,
            })
        } else {
            None
        }
    }

    /// The cheapest single-operand form holding `imm` for a `width`-bit
    /// instruction: add/sub immediate first, then bitmask immediate.
    ///
    /// For 32-bit operations the value must be a zero- or sign-extended
    /// 32-bit quantity; a sign-extended value is reduced to its low word
    /// before the bitmask test.
    pub fn can_hold(imm: i64, width: u32) -> Option<Operand> {
        let imm = if width == 32 {
            match imm >> 32 {
                0 => imm,
                -1 => imm & 0xFFFF_FFFF,
                _ => return None,
            }
        } else {
            imm
        };
        Operand::imm(imm).or_else(|| LogicalImm::encode(imm as u64, width).map(Operand::Logical))
    }

    /// Value of a `Shifted`/`Extended` register, if any.
    pub fn register(&self) -> Option<Register> {
        match *self {
            Operand::Shifted { rm, .. } | Operand::Extended { rm, .. } => Some(rm),
            Operand::Immediate { .. } | Operand::Logical(_) => None,
        }
    }
}
