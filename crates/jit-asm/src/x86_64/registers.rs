//! x86-64 general-purpose registers and condition codes.

/// 64-bit general-purpose register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Register {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Register {
    /// Scratch register clobbered by multi-instruction sequences
    /// (external calls, wide immediates).
    pub const TMP: Register = Register::R11;

    /// Register by 4-bit hardware number.
    pub fn from_index(n: u8) -> Option<Register> {
        use Register::*;
        const ALL: [Register; 16] = [
            Rax, Rcx, Rdx, Rbx, Rsp, Rbp, Rsi, Rdi, R8, R9, R10, R11, R12, R13, R14, R15,
        ];
        ALL.get(n as usize).copied()
    }

    /// Low 3 bits of the register number, as placed in ModR/M, SIB or the
    /// opcode byte.
    #[inline]
    pub const fn base_code(self) -> u8 {
        self as u8 & 7
    }

    /// Whether the register needs a REX extension bit (R8–R15).
    #[inline]
    pub const fn is_extended(self) -> bool {
        self as u8 >= 8
    }

    /// The low byte of this register.
    #[inline]
    pub const fn low_byte(self) -> ByteRegister {
        ByteRegister(self)
    }

    /// Assembly name.
    pub fn name(self) -> &'static str {
        const NAMES: [&str; 16] = [
            "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11",
            "r12", "r13", "r14", "r15",
        ];
        NAMES[self as usize]
    }
}

/// The low 8 bits of a general-purpose register, as written by `setcc`.
///
/// The legacy high-byte registers (`ah`..`bh`) are not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ByteRegister(Register);

impl ByteRegister {
    /// The full register this byte belongs to.
    #[inline]
    pub const fn full(self) -> Register {
        self.0
    }

    /// Whether an (empty) REX prefix is needed to select this byte.
    ///
    /// Without REX, codes 4–7 name `ah`/`ch`/`dh`/`bh` rather than
    /// `spl`/`bpl`/`sil`/`dil`.
    #[inline]
    pub const fn needs_rex(self) -> bool {
        self.0 as u8 >= 4
    }
}

impl From<Register> for ByteRegister {
    fn from(r: Register) -> Self {
        ByteRegister(r)
    }
}

/// Index scaling in a SIB byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum ScaleFactor {
    Times1 = 0,
    Times2 = 1,
    Times4 = 2,
    Times8 = 3,
}

/// Condition code, as encoded in the low nibble of `Jcc`/`SETcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Condition {
    Overflow = 0,
    NoOverflow = 1,
    Below = 2,
    AboveEqual = 3,
    Equal = 4,
    NotEqual = 5,
    BelowEqual = 6,
    Above = 7,
    Sign = 8,
    NotSign = 9,
    ParityEven = 10,
    ParityOdd = 11,
    Less = 12,
    GreaterEqual = 13,
    LessEqual = 14,
    Greater = 15,
}

impl Condition {
    #[allow(missing_docs)]
    pub const ZERO: Condition = Condition::Equal;
    #[allow(missing_docs)]
    pub const NOT_ZERO: Condition = Condition::NotEqual;
    #[allow(missing_docs)]
    pub const CARRY: Condition = Condition::Below;
    #[allow(missing_docs)]
    pub const NOT_CARRY: Condition = Condition::AboveEqual;

    /// Decode a 4-bit condition field.
    pub const fn from_bits(bits: u8) -> Condition {
        use Condition::*;
        match bits & 0xF {
            0 => Overflow,
            1 => NoOverflow,
            2 => Below,
            3 => AboveEqual,
            4 => Equal,
            5 => NotEqual,
            6 => BelowEqual,
            7 => Above,
            8 => Sign,
            9 => NotSign,
            10 => ParityEven,
            11 => ParityOdd,
            12 => Less,
            13 => GreaterEqual,
            14 => LessEqual,
            _ => Greater,
        }
    }

    /// The negated condition; conditions come in pairs differing in bit 0.
    #[inline]
    pub const fn invert(self) -> Condition {
        Condition::from_bits(self as u8 ^ 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_extension() {
        assert_eq!(Register::Rax.base_code(), 0);
        assert_eq!(Register::R12.base_code(), 4);
        assert!(Register::R8.is_extended());
        assert!(!Register::Rdi.is_extended());
        assert_eq!(Register::TMP.name(), "r11");
    }

    #[test]
    fn from_index_covers_all() {
        for n in 0..16u8 {
            assert_eq!(Register::from_index(n).map(|r| r as u8), Some(n));
        }
        assert_eq!(Register::from_index(16), None);
    }

    #[test]
    fn byte_registers() {
        assert!(!Register::Rbx.low_byte().needs_rex());
        assert!(Register::Rsi.low_byte().needs_rex());
        assert!(ByteRegister::from(Register::R9).needs_rex());
        assert_eq!(Register::Rdx.low_byte().full(), Register::Rdx);
    }

    #[test]
    fn condition_pairs() {
        assert_eq!(Condition::Equal.invert(), Condition::NotEqual);
        assert_eq!(Condition::Less.invert(), Condition::GreaterEqual);
        assert_eq!(Condition::Above.invert(), Condition::BelowEqual);
        assert_eq!(Condition::ZERO, Condition::Equal);
        for bits in 0..16u8 {
            assert_eq!(Condition::from_bits(bits) as u8, bits);
            assert_eq!(Condition::from_bits(bits).invert().invert() as u8, bits);
        }
    }
}
