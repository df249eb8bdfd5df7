//! x86-64 immediates and ModR/M operands.

use super::registers::{Register, ScaleFactor};
use crate::error::AsmError;

/// A signed immediate with the range queries the encoders select forms by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Immediate(pub i64);

impl Immediate {
    /// The raw value.
    #[inline]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Fits a sign-extended byte.
    #[inline]
    pub const fn is_int8(self) -> bool {
        self.0 >= i8::MIN as i64 && self.0 <= i8::MAX as i64
    }

    /// Fits a sign-extended dword.
    #[inline]
    pub const fn is_int32(self) -> bool {
        self.0 >= i32::MIN as i64 && self.0 <= i32::MAX as i64
    }

    /// Fits a zero-extended dword.
    #[inline]
    pub const fn is_uint32(self) -> bool {
        self.0 >= 0 && self.0 <= u32::MAX as i64
    }
}

impl From<i64> for Immediate {
    fn from(v: i64) -> Self {
        Immediate(v)
    }
}

impl From<i32> for Immediate {
    fn from(v: i32) -> Self {
        Immediate(v as i64)
    }
}

const REX_B: u8 = 0x01;
const REX_X: u8 = 0x02;

/// A pre-encoded r/m operand: ModR/M (reg field left zero), optional SIB,
/// optional disp8/disp32, plus the REX.X/REX.B bits it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    bytes: [u8; 6],
    len: u8,
    rex: u8,
}

impl Operand {
    /// Register-direct operand (`mod = 11`).
    pub const fn reg(r: Register) -> Operand {
        Operand {
            bytes: [0xC0 | r.base_code(), 0, 0, 0, 0, 0],
            len: 1,
            rex: if r.is_extended() { REX_B } else { 0 },
        }
    }

    /// The register of a register-direct operand.
    pub fn register(&self) -> Option<Register> {
        if self.bytes[0] >> 6 != 0b11 {
            return None;
        }
        let n = (self.bytes[0] & 7) | if self.rex & REX_B != 0 { 8 } else { 0 };
        Register::from_index(n)
    }

    /// Whether `r` is named anywhere in the operand: as the direct register,
    /// the base, or the index.
    pub fn uses(&self, r: Register) -> bool {
        let modrm = self.bytes[0];
        let (mod_, rm) = (modrm >> 6, modrm & 7);
        let ext = |bit: u8| if self.rex & bit != 0 { 8 } else { 0 };
        if mod_ == 0b11 {
            return self.register() == Some(r);
        }
        if rm != 0b100 {
            // `mod = 00, rm = 101` is RIP-relative and names no register.
            return !(mod_ == 0b00 && rm == 0b101) && (rm | ext(REX_B)) == r as u8;
        }
        let sib = self.bytes[1];
        let base = (sib & 7) | ext(REX_B);
        let index = ((sib >> 3) & 7) | ext(REX_X);
        // Index 100 without REX.X means "no index".
        base == r as u8 || (index != 0b100 && index == r as u8)
    }

    /// REX.X and REX.B bits.
    #[inline]
    pub(crate) fn rex(&self) -> u8 {
        self.rex
    }

    /// Encoded bytes with `reg_field` folded into the ModR/M byte.
    pub(crate) fn encode(&self, reg_field: u8) -> ([u8; 6], usize) {
        let mut out = self.bytes;
        out[0] |= (reg_field & 7) << 3;
        (out, self.len as usize)
    }

    fn with_modrm(mod_: u8, rm: u8) -> Operand {
        Operand {
            bytes: [(mod_ << 6) | rm, 0, 0, 0, 0, 0],
            len: 1,
            rex: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        self.bytes[self.len as usize] = byte;
        self.len += 1;
    }

    fn push_disp32(&mut self, disp: i32) {
        for b in disp.to_le_bytes() {
            self.push(b);
        }
    }

    /// Choose `mod` for `disp` relative to `base`: RBP/R13 have no
    /// displacement-free form.
    fn disp_mod(base: Register, disp: i32) -> u8 {
        if disp == 0 && base.base_code() != 5 {
            0b00
        } else if Immediate(disp as i64).is_int8() {
            0b01
        } else {
            0b10
        }
    }

    fn push_disp(&mut self, mod_: u8, disp: i32) {
        match mod_ {
            0b01 => self.push(disp as i8 as u8),
            0b10 => self.push_disp32(disp),
            _ => {}
        }
    }
}

impl From<Register> for Operand {
    fn from(r: Register) -> Self {
        Operand::reg(r)
    }
}

/// A memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(Operand);

impl Address {
    /// `[base + disp]`.
    pub fn new(base: Register, disp: i32) -> Address {
        let mod_ = Operand::disp_mod(base, disp);
        let mut op = Operand::with_modrm(mod_, base.base_code());
        if base.base_code() == 4 {
            // RSP/R12 in r/m means "SIB follows"; encode base with no index.
            op.push(0x24);
        }
        op.push_disp(mod_, disp);
        if base.is_extended() {
            op.rex |= REX_B;
        }
        Address(op)
    }

    /// `[base + index * scale + disp]`. RSP cannot be an index.
    pub fn indexed(
        base: Register,
        index: Register,
        scale: ScaleFactor,
        disp: i32,
    ) -> Result<Address, AsmError> {
        if index == Register::Rsp {
            return Err(AsmError::invalid("rsp cannot be an index register"));
        }
        let mod_ = Operand::disp_mod(base, disp);
        let mut op = Operand::with_modrm(mod_, 0b100);
        op.push(((scale as u8) << 6) | (index.base_code() << 3) | base.base_code());
        op.push_disp(mod_, disp);
        if base.is_extended() {
            op.rex |= REX_B;
        }
        if index.is_extended() {
            op.rex |= REX_X;
        }
        Ok(Address(op))
    }

    /// `[rip + disp]`, relative to the end of the instruction.
    pub fn rip(disp: i32) -> Address {
        let mut op = Operand::with_modrm(0b00, 0b101);
        op.push_disp32(disp);
        Address(op)
    }

    /// The operand form of this address.
    #[inline]
    pub fn operand(&self) -> Operand {
        self.0
    }
}

impl From<Address> for Operand {
    fn from(a: Address) -> Self {
        a.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(a: Address) -> ([u8; 6], usize, u8) {
        let op = a.operand();
        let (b, n) = op.encode(0);
        (b, n, op.rex())
    }

    #[test]
    fn immediate_ranges() {
        assert!(Immediate(127).is_int8());
        assert!(!Immediate(128).is_int8());
        assert!(Immediate(-1).is_int32());
        assert!(!Immediate(-1).is_uint32());
        assert!(Immediate(0xFFFF_FFFF).is_uint32());
        assert!(!Immediate(0xFFFF_FFFF).is_int32());
        assert!(!Immediate(1 << 32).is_uint32());
    }

    #[test]
    fn register_direct() {
        let op = Operand::reg(Register::R9);
        assert_eq!(op.encode(2).0[0], 0xD1);
        assert_eq!(op.rex(), REX_B);
        assert_eq!(op.register(), Some(Register::R9));
        assert_eq!(Address::new(Register::Rax, 0).operand().register(), None);
    }

    #[test]
    fn base_only_forms() {
        // [rax]
        let (b, n, rex) = bytes(Address::new(Register::Rax, 0));
        assert_eq!((&b[..n], rex), (&[0x00][..], 0));
        // [rsp + 8] needs a SIB byte.
        let (b, n, _) = bytes(Address::new(Register::Rsp, 8));
        assert_eq!(&b[..n], &[0x44, 0x24, 0x08]);
        // [rbp] needs an explicit disp8.
        let (b, n, _) = bytes(Address::new(Register::Rbp, 0));
        assert_eq!(&b[..n], &[0x45, 0x00]);
        // [r13] likewise, with REX.B.
        let (b, n, rex) = bytes(Address::new(Register::R13, 0));
        assert_eq!((&b[..n], rex), (&[0x45, 0x00][..], REX_B));
        // [r12] takes the SIB form.
        let (b, n, _) = bytes(Address::new(Register::R12, 0));
        assert_eq!(&b[..n], &[0x04, 0x24]);
        // [rdi + 0x1000] takes disp32.
        let (b, n, _) = bytes(Address::new(Register::Rdi, 0x1000));
        assert_eq!(&b[..n], &[0x87, 0x00, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn indexed_forms() {
        // [rax + rcx*8 + 16]
        let a = Address::indexed(Register::Rax, Register::Rcx, ScaleFactor::Times8, 16).unwrap();
        let (b, n, rex) = bytes(a);
        assert_eq!((&b[..n], rex), (&[0x44, 0xC8, 0x10][..], 0));
        // [r8 + r9*1]
        let a = Address::indexed(Register::R8, Register::R9, ScaleFactor::Times1, 0).unwrap();
        let (b, n, rex) = bytes(a);
        assert_eq!((&b[..n], rex), (&[0x04, 0x08][..], REX_B | REX_X));
        assert!(matches!(
            Address::indexed(Register::Rax, Register::Rsp, ScaleFactor::Times1, 0),
            Err(AsmError::InvalidOperands { .. })
        ));
    }

    #[test]
    fn uses_sees_base_and_index() {
        assert!(Operand::reg(Register::R11).uses(Register::R11));
        assert!(!Operand::reg(Register::R11).uses(Register::Rbx));
        assert!(Address::new(Register::R11, 8).operand().uses(Register::R11));
        assert!(!Address::new(Register::Rbx, 8).operand().uses(Register::R11));
        assert!(Address::new(Register::R12, 0).operand().uses(Register::R12));
        // The SIB of a plain [rsp] base encodes "no index" in the rsp slot.
        assert!(!Address::new(Register::Rsp, 0).operand().uses(Register::R12));
        let a = Address::indexed(Register::Rax, Register::R11, ScaleFactor::Times4, 0).unwrap();
        assert!(a.operand().uses(Register::R11));
        assert!(a.operand().uses(Register::Rax));
        assert!(!a.operand().uses(Register::Rbx));
        assert!(!Address::rip(0).operand().uses(Register::Rbp));
    }

    #[test]
    fn rip_relative() {
        let (b, n, _) = bytes(Address::rip(-4));
        assert_eq!(&b[..n], &[0x05, 0xFC, 0xFF, 0xFF, 0xFF]);
    }
}
