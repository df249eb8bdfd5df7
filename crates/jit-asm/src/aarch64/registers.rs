//! AArch64 registers, operand sizes and condition codes.

/// General-purpose register.
///
/// Encoding slot 31 means either the zero register or the stack pointer
/// depending on the instruction. The two meanings are kept as separate
/// constants, [`Register::Zr`] and [`Register::Csp`], and resolved by
/// [`Register::encode`] against the slot's [`R31`] interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Register {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    R16,
    R17,
    R18,
    R19,
    R20,
    R21,
    R22,
    R23,
    R24,
    R25,
    R26,
    R27,
    R28,
    R29,
    R30,
    /// Zero register (reads as 0, writes discarded).
    Zr,
    /// Stack pointer.
    Csp,
}

/// How an instruction interprets register slot 31.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum R31 {
    /// Slot 31 is the zero register.
    Zero,
    /// Slot 31 is the stack pointer.
    StackPointer,
}

impl Register {
    /// Link register.
    pub const LR: Register = Register::R30;
    /// Frame pointer.
    pub const FP: Register = Register::R29;
    /// First intra-procedure scratch register.
    pub const IP0: Register = Register::R16;
    /// Second intra-procedure scratch register.
    pub const IP1: Register = Register::R17;
    /// Scratch register used by multi-instruction sequences.
    pub const TMP: Register = Register::R16;
    /// Second scratch register.
    pub const TMP2: Register = Register::R17;
    /// Object pool base.
    pub const PP: Register = Register::R27;

    const NUMBERED: [Register; 31] = {
        use Register::*;
        [
            R0, R1, R2, R3, R4, R5, R6, R7, R8, R9, R10, R11, R12, R13, R14, R15, R16, R17, R18,
            R19, R20, R21, R22, R23, R24, R25, R26, R27, R28, R29, R30,
        ]
    };

    /// `R0`–`R30` by number.
    pub fn from_index(n: u8) -> Option<Register> {
        Self::NUMBERED.get(n as usize).copied()
    }

    /// Map to the 5-bit encoding slot.
    ///
    /// Returns `None` when the register is the slot-31 meaning the context
    /// does not allow: `Csp` where slot 31 is the zero register, or `Zr`
    /// where it is the stack pointer.
    #[inline]
    pub fn encode(self, r31: R31) -> Option<u32> {
        match (self, r31) {
            (Register::Zr, R31::Zero) | (Register::Csp, R31::StackPointer) => Some(31),
            (Register::Zr, R31::StackPointer) | (Register::Csp, R31::Zero) => None,
            (r, _) => Some(r as u32),
        }
    }

    /// Assembly name.
    pub fn name(self) -> &'static str {
        const NAMES: [&str; 33] = [
            "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12",
            "x13", "x14", "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24",
            "x25", "x26", "x27", "x28", "x29", "x30", "xzr", "sp",
        ];
        NAMES[self as usize]
    }
}

/// Width and signedness of a memory or data-processing operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperandSize {
    /// Signed 8-bit.
    Byte,
    /// Unsigned 8-bit.
    UnsignedByte,
    /// Signed 16-bit.
    Halfword,
    /// Unsigned 16-bit.
    UnsignedHalfword,
    /// Signed 32-bit.
    Word,
    /// Unsigned 32-bit.
    UnsignedWord,
    /// 64-bit.
    DoubleWord,
}

impl OperandSize {
    /// log2 of the size in bytes.
    #[inline]
    pub const fn log2(self) -> u32 {
        match self {
            OperandSize::Byte | OperandSize::UnsignedByte => 0,
            OperandSize::Halfword | OperandSize::UnsignedHalfword => 1,
            OperandSize::Word | OperandSize::UnsignedWord => 2,
            OperandSize::DoubleWord => 3,
        }
    }

    /// Size in bytes.
    #[inline]
    pub const fn bytes(self) -> u32 {
        1 << self.log2()
    }

    /// Whether loads of this size sign-extend.
    #[inline]
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            OperandSize::Byte | OperandSize::Halfword | OperandSize::Word
        )
    }

    /// Register width in bits for data-processing forms (32 or 64).
    #[inline]
    pub const fn width(self) -> u32 {
        match self {
            OperandSize::DoubleWord => 64,
            _ => 32,
        }
    }

    /// The `sf` bit for data-processing forms.
    #[inline]
    pub(crate) const fn sf(self) -> u32 {
        match self {
            OperandSize::DoubleWord => 1 << 31,
            _ => 0,
        }
    }
}

/// Condition code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Condition {
    /// Equal.
    Eq = 0,
    /// Not equal.
    Ne = 1,
    /// Carry set / unsigned higher or same.
    Cs = 2,
    /// Carry clear / unsigned lower.
    Cc = 3,
    /// Minus / negative.
    Mi = 4,
    /// Plus / positive or zero.
    Pl = 5,
    /// Overflow.
    Vs = 6,
    /// No overflow.
    Vc = 7,
    /// Unsigned higher.
    Hi = 8,
    /// Unsigned lower or same.
    Ls = 9,
    /// Signed greater or equal.
    Ge = 10,
    /// Signed less than.
    Lt = 11,
    /// Signed greater than.
    Gt = 12,
    /// Signed less or equal.
    Le = 13,
    /// Always.
    Al = 14,
    /// Always (architecturally); only a placeholder here.
    Nv = 15,
}

impl Condition {
    /// Unsigned higher or same.
    pub const HS: Condition = Condition::Cs;
    /// Unsigned lower.
    pub const LO: Condition = Condition::Cc;

    /// Decode a 4-bit condition field.
    pub const fn from_bits(bits: u32) -> Condition {
        use Condition::*;
        match bits & 0xF {
            0 => Eq,
            1 => Ne,
            2 => Cs,
            3 => Cc,
            4 => Mi,
            5 => Pl,
            6 => Vs,
            7 => Vc,
            8 => Hi,
            9 => Ls,
            10 => Ge,
            11 => Lt,
            12 => Gt,
            13 => Le,
            14 => Al,
            _ => Nv,
        }
    }

    /// The condition that holds exactly when `self` does not.
    #[inline]
    pub const fn invert(self) -> Condition {
        Condition::from_bits(self as u32 ^ 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r31_mapping() {
        assert_eq!(Register::Zr.encode(R31::Zero), Some(31));
        assert_eq!(Register::Csp.encode(R31::StackPointer), Some(31));
        assert_eq!(Register::Zr.encode(R31::StackPointer), None);
        assert_eq!(Register::Csp.encode(R31::Zero), None);
        assert_eq!(Register::R30.encode(R31::Zero), Some(30));
        assert_eq!(Register::R0.encode(R31::StackPointer), Some(0));
    }

    #[test]
    fn aliases() {
        assert_eq!(Register::LR, Register::R30);
        assert_eq!(Register::FP.encode(R31::Zero), Some(29));
        assert_eq!(Register::PP.name(), "x27");
        assert_eq!(Register::Csp.name(), "sp");
    }

    #[test]
    fn from_index() {
        assert_eq!(Register::from_index(0), Some(Register::R0));
        assert_eq!(Register::from_index(30), Some(Register::R30));
        assert_eq!(Register::from_index(31), None);
    }

    #[test]
    fn condition_inversion_pairs() {
        assert_eq!(Condition::Eq.invert(), Condition::Ne);
        assert_eq!(Condition::Ne.invert(), Condition::Eq);
        assert_eq!(Condition::Ge.invert(), Condition::Lt);
        assert_eq!(Condition::Hi.invert(), Condition::Ls);
        assert_eq!(Condition::Al.invert(), Condition::Nv);
        for bits in 0..16 {
            let c = Condition::from_bits(bits);
            assert_eq!(c as u32, bits);
            assert_eq!(c.invert().invert(), c);
        }
    }

    #[test]
    fn operand_sizes() {
        assert_eq!(OperandSize::UnsignedByte.bytes(), 1);
        assert_eq!(OperandSize::Halfword.log2(), 1);
        assert_eq!(OperandSize::Word.width(), 32);
        assert_eq!(OperandSize::DoubleWord.width(), 64);
        assert!(OperandSize::Word.is_signed());
        assert!(!OperandSize::UnsignedWord.is_signed());
    }
}
