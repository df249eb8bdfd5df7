//! AArch64 instruction encoder.
//!
//! Every instruction is one 32-bit word, so all displacement fields have a
//! fixed position and width. Conditional branches can reach ±1 MiB (±32 KiB
//! for test-and-branch); beyond that, when far branches are enabled, they are
//! emitted as an inverted guard that skips an unconditional `b`.

use alloc::format;

use super::address::{Address, AddressMode};
use super::branch::{self, BranchKind, B, BL, B_COND, CBZ, NOP, TBZ};
use super::logical_imm::LogicalImm;
use super::operand::{Extend, Operand};
use super::registers::{Condition, OperandSize, Register, R31};
use crate::buffer::CodeBuffer;
use crate::codec::BranchField;
use crate::error::AsmError;
use crate::label::{link_distance, link_target, Chain, Label};
use crate::options::EmitOptions;

/// `brk #0`, the trap fill pattern.
pub const TRAP: [u8; 4] = 0xD420_0000u32.to_le_bytes();

// ── Opcode groups ────────────────────────────────────────────────────────

const ADD_IMM: u32 = 0x1100_0000;
const ADD_SHIFTED: u32 = 0x0B00_0000;
const ADD_EXTENDED: u32 = 0x0B20_0000;
const SUB_BIT: u32 = 1 << 30;
const SET_FLAGS_BIT: u32 = 1 << 29;

const LOGICAL_IMM: u32 = 0x1200_0000;
const LOGICAL_SHIFTED: u32 = 0x0A00_0000;
const LOGICAL_NEGATE_BIT: u32 = 1 << 21;

const MOVN: u32 = 0x1280_0000;
const MOVZ: u32 = 0x5280_0000;
const MOVK: u32 = 0x7280_0000;

const SBFM: u32 = 0x1300_0000;
const UBFM: u32 = 0x5300_0000;

const CSEL: u32 = 0x1A80_0000;
const CSINC: u32 = 0x1A80_0400;
const CSINV: u32 = 0x5A80_0000;
const CSNEG: u32 = 0x5A80_0400;

const MADD: u32 = 0x1B00_0000;
const MSUB: u32 = 0x1B00_8000;
const UDIV: u32 = 0x1AC0_0800;
const SDIV: u32 = 0x1AC0_0C00;

const ADR: u32 = 0x1000_0000;

const BR: u32 = 0xD61F_0000;
const BLR: u32 = 0xD63F_0000;
const RET: u32 = 0xD65F_0000;
const BRK: u32 = 0xD420_0000;
const HLT: u32 = 0xD440_0000;
const SVC: u32 = 0xD400_0001;

const LOAD_STORE: u32 = 0x3800_0000;
const LOAD_STORE_PAIR: u32 = 0x2800_0000;
const LDR_LITERAL_W: u32 = 0x1800_0000;
const LDR_LITERAL_X: u32 = 0x5800_0000;
const LDRSW_LITERAL: u32 = 0x9800_0000;

/// Operation of the logical group; the value is the `opc` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogicalOp {
    And = 0,
    Orr = 1,
    Eor = 2,
    Ands = 3,
}

/// Emitted form of one chain site at bind time.
#[derive(Debug, Clone, Copy)]
enum Patch {
    Single(u32),
    Pair { guard: u32, second: u32 },
}

/// The chain that links sites whose link lives in `field`.
fn chain_for(field: BranchField) -> Chain {
    match field {
        BranchField::Imm14 => Chain::Short,
        BranchField::Imm19 => Chain::Near,
        _ => Chain::Wide,
    }
}

/// AArch64 assembler over a [`CodeBuffer`].
///
/// # Examples
///
/// ```rust
/// use jit_asm::aarch64::{Assembler, Condition, Operand, Register};
/// use jit_asm::{EmitOptions, Label};
///
/// let mut asm = Assembler::new(EmitOptions::default()).unwrap();
/// let mut done = Label::new();
/// asm.cmp(Register::R0, Operand::imm(0).unwrap()).unwrap();
/// asm.b_cond(Condition::Eq, &mut done).unwrap();
/// asm.sub(Register::R0, Register::R0, Operand::imm(1).unwrap()).unwrap();
/// asm.bind(&mut done).unwrap();
/// asm.ret().unwrap();
/// let code = asm.into_bytes().unwrap();
/// assert_eq!(code.len(), 16);
/// ```
#[derive(Debug)]
pub struct Assembler {
    buffer: CodeBuffer,
    use_far_branches: bool,
}

impl Assembler {
    /// Create an assembler with an empty buffer.
    pub fn new(options: EmitOptions) -> Result<Self, AsmError> {
        Ok(Self {
            buffer: CodeBuffer::new(&options, TRAP)?,
            use_far_branches: options.use_far_branches,
        })
    }

    /// Whether out-of-range conditional branches are promoted.
    #[inline]
    pub fn use_far_branches(&self) -> bool {
        self.use_far_branches
    }

    /// The underlying buffer.
    #[inline]
    pub fn buffer(&self) -> &CodeBuffer {
        &self.buffer
    }

    /// Bytes emitted so far.
    #[inline]
    pub fn code_size(&self) -> usize {
        self.buffer.size()
    }

    /// Copy the finished code to `dest`. See [`CodeBuffer::finalize_into`].
    pub fn finalize_into(&self, dest: &mut [u8]) -> Result<usize, AsmError> {
        self.buffer.finalize_into(dest)
    }

    /// Consume the assembler, returning the finished code.
    pub fn into_bytes(self) -> Result<alloc::vec::Vec<u8>, AsmError> {
        self.buffer.into_bytes()
    }

    /// Emit a raw instruction word.
    pub fn emit(&mut self, word: u32) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        buf.emit_u32(word);
        Ok(())
    }

    /// Pad with `nop` until the code size is a multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) -> Result<(), AsmError> {
        if alignment < 4 || !alignment.is_power_of_two() {
            return Err(AsmError::invalid_at(
                format!("alignment {} must be a power of two >= 4", alignment),
                self.buffer.size(),
            ));
        }
        while self.buffer.size() % alignment != 0 {
            self.nop()?;
        }
        Ok(())
    }

    // ── Register and immediate checks ────────────────────────────────────

    fn reg(&self, r: Register, r31: R31) -> Result<u32, AsmError> {
        r.encode(r31).ok_or_else(|| {
            let slot = match r31 {
                R31::Zero => "zero register",
                R31::StackPointer => "stack pointer",
            };
            AsmError::invalid_at(
                format!("{} cannot be used where slot 31 is the {}", r.name(), slot),
                self.buffer.size(),
            )
        })
    }

    fn uimm(&self, value: u32, bits: u32) -> Result<u32, AsmError> {
        if value >> bits != 0 {
            return Err(AsmError::overflow(value as i64, 0, (1i64 << bits) - 1));
        }
        Ok(value)
    }

    fn out_of_range(&self, disp: i64, field: BranchField) -> AsmError {
        AsmError::BranchOutOfRange {
            disp,
            max: field.max(),
            offset: self.buffer.size(),
        }
    }

    // ── Add / subtract ───────────────────────────────────────────────────

    fn add_sub(
        &mut self,
        rd: Register,
        rn: Register,
        op: Operand,
        size: OperandSize,
        subtract: bool,
        set_flags: bool,
    ) -> Result<(), AsmError> {
        let mut base = size.sf();
        if subtract {
            base |= SUB_BIT;
        }
        if set_flags {
            base |= SET_FLAGS_BIT;
        }
        // Flag-setting forms write the zero register in slot 31.
        let rd_slot = if set_flags { R31::Zero } else { R31::StackPointer };
        let word = match op {
            Operand::Immediate { imm12, shifted } => {
                let sh = if shifted { 1 << 22 } else { 0 };
                ADD_IMM
                    | base
                    | sh
                    | ((imm12 as u32) << 10)
                    | (self.reg(rn, R31::StackPointer)? << 5)
                    | self.reg(rd, rd_slot)?
            }
            Operand::Shifted { rm, shift, amount } => {
                if shift == super::operand::Shift::Ror {
                    return Err(AsmError::invalid_at(
                        "ror is not a valid add/sub shift",
                        self.buffer.size(),
                    ));
                }
                if u32::from(amount) >= size.width() {
                    return Err(AsmError::overflow(amount as i64, 0, size.width() as i64 - 1));
                }
                ADD_SHIFTED
                    | base
                    | ((shift as u32) << 22)
                    | (self.reg(rm, R31::Zero)? << 16)
                    | ((amount as u32) << 10)
                    | (self.reg(rn, R31::Zero)? << 5)
                    | self.reg(rd, R31::Zero)?
            }
            Operand::Extended { rm, extend, amount } => {
                ADD_EXTENDED
                    | base
                    | (self.reg(rm, R31::Zero)? << 16)
                    | ((extend as u32) << 13)
                    | ((amount as u32) << 10)
                    | (self.reg(rn, R31::StackPointer)? << 5)
                    | self.reg(rd, rd_slot)?
            }
            Operand::Logical(_) => {
                return Err(AsmError::invalid_at(
                    "bitmask immediate is not an add/sub operand",
                    self.buffer.size(),
                ))
            }
        };
        self.emit(word)
    }

    /// `add rd, rn, op` (64-bit).
    pub fn add(&mut self, rd: Register, rn: Register, op: Operand) -> Result<(), AsmError> {
        self.add_sub(rd, rn, op, OperandSize::DoubleWord, false, false)
    }

    /// `add wd, wn, op`.
    pub fn addw(&mut self, rd: Register, rn: Register, op: Operand) -> Result<(), AsmError> {
        self.add_sub(rd, rn, op, OperandSize::Word, false, false)
    }

    /// `adds rd, rn, op`.
    pub fn adds(&mut self, rd: Register, rn: Register, op: Operand) -> Result<(), AsmError> {
        self.add_sub(rd, rn, op, OperandSize::DoubleWord, false, true)
    }

    /// `sub rd, rn, op` (64-bit).
    pub fn sub(&mut self, rd: Register, rn: Register, op: Operand) -> Result<(), AsmError> {
        self.add_sub(rd, rn, op, OperandSize::DoubleWord, true, false)
    }

    /// `sub wd, wn, op`.
    pub fn subw(&mut self, rd: Register, rn: Register, op: Operand) -> Result<(), AsmError> {
        self.add_sub(rd, rn, op, OperandSize::Word, true, false)
    }

    /// `subs rd, rn, op`.
    pub fn subs(&mut self, rd: Register, rn: Register, op: Operand) -> Result<(), AsmError> {
        self.add_sub(rd, rn, op, OperandSize::DoubleWord, true, true)
    }

    /// `cmp rn, op`.
    pub fn cmp(&mut self, rn: Register, op: Operand) -> Result<(), AsmError> {
        self.subs(Register::Zr, rn, op)
    }

    /// `cmn rn, op`.
    pub fn cmn(&mut self, rn: Register, op: Operand) -> Result<(), AsmError> {
        self.adds(Register::Zr, rn, op)
    }

    /// `neg rd, rm`.
    pub fn neg(&mut self, rd: Register, rm: Register) -> Result<(), AsmError> {
        self.sub(rd, Register::Zr, Operand::reg(rm))
    }

    // ── Logical ──────────────────────────────────────────────────────────

    fn logical_imm(
        &mut self,
        op: LogicalOp,
        rd: Register,
        rn: Register,
        imm: u64,
        size: OperandSize,
    ) -> Result<(), AsmError> {
        let width = size.width();
        let encoded = LogicalImm::encode(imm, width).ok_or(AsmError::NotEncodable {
            value: imm,
            width,
        })?;
        let rd_slot = if op == LogicalOp::Ands {
            R31::Zero
        } else {
            R31::StackPointer
        };
        let word = LOGICAL_IMM
            | size.sf()
            | ((op as u32) << 29)
            | encoded.bits()
            | (self.reg(rn, R31::Zero)? << 5)
            | self.reg(rd, rd_slot)?;
        self.emit(word)
    }

    fn logical_shifted(
        &mut self,
        op: LogicalOp,
        negate: bool,
        rd: Register,
        rn: Register,
        operand: Operand,
        size: OperandSize,
    ) -> Result<(), AsmError> {
        let Operand::Shifted { rm, shift, amount } = operand else {
            return Err(AsmError::invalid_at(
                "logical register form needs a shifted operand",
                self.buffer.size(),
            ));
        };
        if u32::from(amount) >= size.width() {
            return Err(AsmError::overflow(amount as i64, 0, size.width() as i64 - 1));
        }
        let n = if negate { LOGICAL_NEGATE_BIT } else { 0 };
        let word = LOGICAL_SHIFTED
            | size.sf()
            | ((op as u32) << 29)
            | ((shift as u32) << 22)
            | n
            | (self.reg(rm, R31::Zero)? << 16)
            | ((amount as u32) << 10)
            | (self.reg(rn, R31::Zero)? << 5)
            | self.reg(rd, R31::Zero)?;
        self.emit(word)
    }

    /// `and rd, rn, #imm`; fails with `NotEncodable` for non-bitmask values.
    pub fn andi(&mut self, rd: Register, rn: Register, imm: u64) -> Result<(), AsmError> {
        self.logical_imm(LogicalOp::And, rd, rn, imm, OperandSize::DoubleWord)
    }

    /// `orr rd, rn, #imm`.
    pub fn orri(&mut self, rd: Register, rn: Register, imm: u64) -> Result<(), AsmError> {
        self.logical_imm(LogicalOp::Orr, rd, rn, imm, OperandSize::DoubleWord)
    }

    /// `eor rd, rn, #imm`.
    pub fn eori(&mut self, rd: Register, rn: Register, imm: u64) -> Result<(), AsmError> {
        self.logical_imm(LogicalOp::Eor, rd, rn, imm, OperandSize::DoubleWord)
    }

    /// `ands rd, rn, #imm`.
    pub fn andis(&mut self, rd: Register, rn: Register, imm: u64) -> Result<(), AsmError> {
        self.logical_imm(LogicalOp::Ands, rd, rn, imm, OperandSize::DoubleWord)
    }

    /// `and wd, wn, #imm`.
    pub fn andiw(&mut self, rd: Register, rn: Register, imm: u32) -> Result<(), AsmError> {
        self.logical_imm(LogicalOp::And, rd, rn, imm as u64, OperandSize::Word)
    }

    /// `tst rn, #imm`.
    pub fn tsti(&mut self, rn: Register, imm: u64) -> Result<(), AsmError> {
        self.andis(Register::Zr, rn, imm)
    }

    /// `and rd, rn, op`.
    pub fn and_(&mut self, rd: Register, rn: Register, op: Operand) -> Result<(), AsmError> {
        self.logical_shifted(LogicalOp::And, false, rd, rn, op, OperandSize::DoubleWord)
    }

    /// `bic rd, rn, op`.
    pub fn bic(&mut self, rd: Register, rn: Register, op: Operand) -> Result<(), AsmError> {
        self.logical_shifted(LogicalOp::And, true, rd, rn, op, OperandSize::DoubleWord)
    }

    /// `orr rd, rn, op`.
    pub fn orr(&mut self, rd: Register, rn: Register, op: Operand) -> Result<(), AsmError> {
        self.logical_shifted(LogicalOp::Orr, false, rd, rn, op, OperandSize::DoubleWord)
    }

    /// `orn rd, rn, op`.
    pub fn orn(&mut self, rd: Register, rn: Register, op: Operand) -> Result<(), AsmError> {
        self.logical_shifted(LogicalOp::Orr, true, rd, rn, op, OperandSize::DoubleWord)
    }

    /// `eor rd, rn, op`.
    pub fn eor(&mut self, rd: Register, rn: Register, op: Operand) -> Result<(), AsmError> {
        self.logical_shifted(LogicalOp::Eor, false, rd, rn, op, OperandSize::DoubleWord)
    }

    /// `ands rd, rn, op`.
    pub fn ands(&mut self, rd: Register, rn: Register, op: Operand) -> Result<(), AsmError> {
        self.logical_shifted(LogicalOp::Ands, false, rd, rn, op, OperandSize::DoubleWord)
    }

    /// `tst rn, op`.
    pub fn tst(&mut self, rn: Register, op: Operand) -> Result<(), AsmError> {
        self.ands(Register::Zr, rn, op)
    }

    /// `mov rd, rm`, through `add #0` when either side is the stack pointer.
    pub fn mov(&mut self, rd: Register, rm: Register) -> Result<(), AsmError> {
        if rd == Register::Csp || rm == Register::Csp {
            self.add(rd, rm, Operand::Immediate {
                imm12: 0,
                shifted: false,
            })
        } else {
            self.orr(rd, Register::Zr, Operand::reg(rm))
        }
    }

    /// `mvn rd, rm`.
    pub fn mvn(&mut self, rd: Register, rm: Register) -> Result<(), AsmError> {
        self.orn(rd, Register::Zr, Operand::reg(rm))
    }

    // ── Move wide ────────────────────────────────────────────────────────

    fn move_wide(&mut self, opcode: u32, rd: Register, imm: u16, hw: u32) -> Result<(), AsmError> {
        let hw = self.uimm(hw, 2)?;
        let word = opcode
            | OperandSize::DoubleWord.sf()
            | (hw << 21)
            | ((imm as u32) << 5)
            | self.reg(rd, R31::Zero)?;
        self.emit(word)
    }

    /// `movz rd, #imm, lsl #(16 * hw)`.
    pub fn movz(&mut self, rd: Register, imm: u16, hw: u32) -> Result<(), AsmError> {
        self.move_wide(MOVZ, rd, imm, hw)
    }

    /// `movn rd, #imm, lsl #(16 * hw)`.
    pub fn movn(&mut self, rd: Register, imm: u16, hw: u32) -> Result<(), AsmError> {
        self.move_wide(MOVN, rd, imm, hw)
    }

    /// `movk rd, #imm, lsl #(16 * hw)`.
    pub fn movk(&mut self, rd: Register, imm: u16, hw: u32) -> Result<(), AsmError> {
        self.move_wide(MOVK, rd, imm, hw)
    }

    /// Materialise an arbitrary 64-bit constant in `rd`.
    ///
    /// Uses one `orr` when the value is a bitmask immediate, otherwise the
    /// shortest `movz`/`movn` + `movk` sequence for the value's halfwords.
    pub fn load_immediate(&mut self, rd: Register, imm: i64) -> Result<(), AsmError> {
        self.reg(rd, R31::Zero)?;
        if imm == 0 {
            return self.movz(rd, 0, 0);
        }
        if let Some(Operand::Logical(_)) = Operand::can_hold(imm, 64) {
            return self.orri(rd, Register::Zr, imm as u64);
        }

        let bits = imm as u64;
        let h = [
            bits as u16,
            (bits >> 16) as u16,
            (bits >> 32) as u16,
            (bits >> 48) as u16,
        ];
        if bits >> 32 == 0xFFFF_FFFF {
            if h[1] == 0xFFFF {
                return self.movn(rd, !h[0], 0);
            }
            self.movn(rd, !h[1], 1)?;
            return self.movk(rd, h[0], 0);
        }
        if h[3] == 0xFFFF {
            self.movn(rd, !h[2], 2)?;
            for hw in (0..2).rev() {
                if h[hw] != 0xFFFF {
                    self.movk(rd, h[hw], hw as u32)?;
                }
            }
            return Ok(());
        }

        let mut initialized = false;
        for (hw, &half) in h.iter().enumerate() {
            if half == 0 {
                continue;
            }
            if initialized {
                self.movk(rd, half, hw as u32)?;
            } else {
                self.movz(rd, half, hw as u32)?;
                initialized = true;
            }
        }
        Ok(())
    }

    // ── Bitfield and shifts ──────────────────────────────────────────────

    fn bitfield(
        &mut self,
        opcode: u32,
        rd: Register,
        rn: Register,
        imm_r: u32,
        imm_s: u32,
        size: OperandSize,
    ) -> Result<(), AsmError> {
        let bits = if size.width() == 64 { 6 } else { 5 };
        let imm_r = self.uimm(imm_r, bits)?;
        let imm_s = self.uimm(imm_s, bits)?;
        let n = if size.width() == 64 { 1 << 22 } else { 0 };
        let word = opcode
            | size.sf()
            | n
            | (imm_r << 16)
            | (imm_s << 10)
            | (self.reg(rn, R31::Zero)? << 5)
            | self.reg(rd, R31::Zero)?;
        self.emit(word)
    }

    /// `ubfm rd, rn, #imm_r, #imm_s` (64-bit).
    pub fn ubfm(&mut self, rd: Register, rn: Register, imm_r: u32, imm_s: u32) -> Result<(), AsmError> {
        self.bitfield(UBFM, rd, rn, imm_r, imm_s, OperandSize::DoubleWord)
    }

    /// `sbfm rd, rn, #imm_r, #imm_s` (64-bit).
    pub fn sbfm(&mut self, rd: Register, rn: Register, imm_r: u32, imm_s: u32) -> Result<(), AsmError> {
        self.bitfield(SBFM, rd, rn, imm_r, imm_s, OperandSize::DoubleWord)
    }

    /// `lsl rd, rn, #shift`.
    pub fn lsl(&mut self, rd: Register, rn: Register, shift: u32) -> Result<(), AsmError> {
        let shift = self.uimm(shift, 6)?;
        self.ubfm(rd, rn, (64 - shift) & 63, 63 - shift)
    }

    /// `lsr rd, rn, #shift`.
    pub fn lsr(&mut self, rd: Register, rn: Register, shift: u32) -> Result<(), AsmError> {
        self.ubfm(rd, rn, shift, 63)
    }

    /// `asr rd, rn, #shift`.
    pub fn asr(&mut self, rd: Register, rn: Register, shift: u32) -> Result<(), AsmError> {
        self.sbfm(rd, rn, shift, 63)
    }

    // ── Conditional select ───────────────────────────────────────────────

    fn cond_select(
        &mut self,
        opcode: u32,
        rd: Register,
        rn: Register,
        rm: Register,
        cond: Condition,
    ) -> Result<(), AsmError> {
        let word = opcode
            | OperandSize::DoubleWord.sf()
            | (self.reg(rm, R31::Zero)? << 16)
            | ((cond as u32) << 12)
            | (self.reg(rn, R31::Zero)? << 5)
            | self.reg(rd, R31::Zero)?;
        self.emit(word)
    }

    /// `csel rd, rn, rm, cond`.
    pub fn csel(&mut self, rd: Register, rn: Register, rm: Register, cond: Condition) -> Result<(), AsmError> {
        self.cond_select(CSEL, rd, rn, rm, cond)
    }

    /// `csinc rd, rn, rm, cond`.
    pub fn csinc(&mut self, rd: Register, rn: Register, rm: Register, cond: Condition) -> Result<(), AsmError> {
        self.cond_select(CSINC, rd, rn, rm, cond)
    }

    /// `csinv rd, rn, rm, cond`.
    pub fn csinv(&mut self, rd: Register, rn: Register, rm: Register, cond: Condition) -> Result<(), AsmError> {
        self.cond_select(CSINV, rd, rn, rm, cond)
    }

    /// `csneg rd, rn, rm, cond`.
    pub fn csneg(&mut self, rd: Register, rn: Register, rm: Register, cond: Condition) -> Result<(), AsmError> {
        self.cond_select(CSNEG, rd, rn, rm, cond)
    }

    /// `cset rd, cond`: 1 if `cond` holds, else 0.
    pub fn cset(&mut self, rd: Register, cond: Condition) -> Result<(), AsmError> {
        self.csinc(rd, Register::Zr, Register::Zr, cond.invert())
    }

    /// `csetm rd, cond`: all ones if `cond` holds, else 0.
    pub fn csetm(&mut self, rd: Register, cond: Condition) -> Result<(), AsmError> {
        self.csinv(rd, Register::Zr, Register::Zr, cond.invert())
    }

    // ── Multiply / divide ────────────────────────────────────────────────

    fn three_source(
        &mut self,
        opcode: u32,
        rd: Register,
        rn: Register,
        rm: Register,
        ra: Register,
    ) -> Result<(), AsmError> {
        let word = opcode
            | OperandSize::DoubleWord.sf()
            | (self.reg(rm, R31::Zero)? << 16)
            | (self.reg(ra, R31::Zero)? << 10)
            | (self.reg(rn, R31::Zero)? << 5)
            | self.reg(rd, R31::Zero)?;
        self.emit(word)
    }

    /// `madd rd, rn, rm, ra`.
    pub fn madd(&mut self, rd: Register, rn: Register, rm: Register, ra: Register) -> Result<(), AsmError> {
        self.three_source(MADD, rd, rn, rm, ra)
    }

    /// `msub rd, rn, rm, ra`.
    pub fn msub(&mut self, rd: Register, rn: Register, rm: Register, ra: Register) -> Result<(), AsmError> {
        self.three_source(MSUB, rd, rn, rm, ra)
    }

    /// `mul rd, rn, rm`.
    pub fn mul(&mut self, rd: Register, rn: Register, rm: Register) -> Result<(), AsmError> {
        self.madd(rd, rn, rm, Register::Zr)
    }

    /// `udiv rd, rn, rm`.
    pub fn udiv(&mut self, rd: Register, rn: Register, rm: Register) -> Result<(), AsmError> {
        self.three_source(UDIV, rd, rn, rm, Register::R0)
    }

    /// `sdiv rd, rn, rm`.
    pub fn sdiv(&mut self, rd: Register, rn: Register, rm: Register) -> Result<(), AsmError> {
        self.three_source(SDIV, rd, rn, rm, Register::R0)
    }

    /// `adr rd, #disp` (±1 MiB, byte granular).
    pub fn adr(&mut self, rd: Register, disp: i64) -> Result<(), AsmError> {
        if !(-(1 << 20)..(1 << 20)).contains(&disp) {
            return Err(AsmError::overflow(disp, -(1 << 20), (1 << 20) - 1));
        }
        let imm = disp as u32;
        let word = ADR | ((imm & 3) << 29) | (((imm >> 2) & 0x7FFFF) << 5) | self.reg(rd, R31::Zero)?;
        self.emit(word)
    }

    // ── Loads and stores ─────────────────────────────────────────────────

    /// `ldr rt, address` of `size`; signed sizes sign-extend to 64 bits.
    pub fn ldr(&mut self, rt: Register, address: Address, size: OperandSize) -> Result<(), AsmError> {
        let rt_bits = self.reg(rt, R31::Zero)?;
        let word = if address.mode() == AddressMode::PcOffset {
            let opcode = match size {
                OperandSize::Word => LDRSW_LITERAL,
                OperandSize::UnsignedWord => LDR_LITERAL_W,
                OperandSize::DoubleWord => LDR_LITERAL_X,
                _ => {
                    return Err(AsmError::invalid_at(
                        "literal loads are 32 or 64 bits",
                        self.buffer.size(),
                    ))
                }
            };
            opcode | address.encoding() | rt_bits
        } else {
            let opc = if size.is_signed() { 0b10 } else { 0b01 };
            self.load_store_bits(address, size, opc)? | rt_bits
        };
        self.emit(word)
    }

    /// `str rt, address` of `size`.
    pub fn str(&mut self, rt: Register, address: Address, size: OperandSize) -> Result<(), AsmError> {
        let rt_bits = self.reg(rt, R31::Zero)?;
        if address.mode() == AddressMode::PcOffset {
            return Err(AsmError::invalid_at(
                "cannot store to a literal",
                self.buffer.size(),
            ));
        }
        let word = self.load_store_bits(address, size, 0b00)? | rt_bits;
        self.emit(word)
    }

    fn load_store_bits(&self, address: Address, size: OperandSize, opc: u32) -> Result<u32, AsmError> {
        if address.is_pair() {
            return Err(AsmError::invalid_at(
                "pair address used with single load/store",
                self.buffer.size(),
            ));
        }
        Ok((size.log2() << 30) | LOAD_STORE | (opc << 22) | address.encoding())
    }

    fn load_store_pair(
        &mut self,
        load: bool,
        rt: Register,
        rt2: Register,
        address: Address,
        size: OperandSize,
    ) -> Result<(), AsmError> {
        if !address.is_pair() {
            return Err(AsmError::invalid_at(
                "load/store pair needs a pair address",
                self.buffer.size(),
            ));
        }
        let opc = match size {
            OperandSize::UnsignedWord => 0b00,
            OperandSize::Word if load => 0b01,
            OperandSize::DoubleWord => 0b10,
            _ => {
                return Err(AsmError::invalid_at(
                    "pairs are 32 or 64 bits",
                    self.buffer.size(),
                ))
            }
        };
        let l = if load { 1 << 22 } else { 0 };
        let word = (opc << 30)
            | LOAD_STORE_PAIR
            | l
            | address.encoding()
            | (self.reg(rt2, R31::Zero)? << 10)
            | self.reg(rt, R31::Zero)?;
        self.emit(word)
    }

    /// `ldp rt, rt2, address`.
    pub fn ldp(&mut self, rt: Register, rt2: Register, address: Address, size: OperandSize) -> Result<(), AsmError> {
        self.load_store_pair(true, rt, rt2, address, size)
    }

    /// `stp rt, rt2, address`.
    pub fn stp(&mut self, rt: Register, rt2: Register, address: Address, size: OperandSize) -> Result<(), AsmError> {
        self.load_store_pair(false, rt, rt2, address, size)
    }

    /// Push one register: `str reg, [sp, #-8]!`.
    pub fn push(&mut self, reg: Register) -> Result<(), AsmError> {
        let a = Address::new(Register::Csp, -8, AddressMode::PreIndex, OperandSize::DoubleWord)?;
        self.str(reg, a, OperandSize::DoubleWord)
    }

    /// Pop one register: `ldr reg, [sp], #8`.
    pub fn pop(&mut self, reg: Register) -> Result<(), AsmError> {
        let a = Address::new(Register::Csp, 8, AddressMode::PostIndex, OperandSize::DoubleWord)?;
        self.ldr(reg, a, OperandSize::DoubleWord)
    }

    /// `stp low, high, [sp, #-16]!`.
    pub fn push_pair(&mut self, low: Register, high: Register) -> Result<(), AsmError> {
        let a = Address::new(Register::Csp, -16, AddressMode::PairPreIndex, OperandSize::DoubleWord)?;
        self.stp(low, high, a, OperandSize::DoubleWord)
    }

    /// `ldp low, high, [sp], #16`.
    pub fn pop_pair(&mut self, low: Register, high: Register) -> Result<(), AsmError> {
        let a = Address::new(Register::Csp, 16, AddressMode::PairPostIndex, OperandSize::DoubleWord)?;
        self.ldp(low, high, a, OperandSize::DoubleWord)
    }

    /// Load the word at byte `offset` from the object pool based at `pp`.
    ///
    /// Offsets that do not fit a scaled immediate are split into an
    /// `add dst, pp, #hi, lsl #12` and a load with the low 12 bits, or
    /// materialised in `dst` and used as a register index.
    pub fn load_word_from_pool_offset(&mut self, dst: Register, pp: Register, offset: u32) -> Result<(), AsmError> {
        if dst == pp {
            return Err(AsmError::invalid_at(
                "pool load destination must differ from pool base",
                self.buffer.size(),
            ));
        }
        let offset = offset as i64;
        if Address::can_hold_offset(offset, AddressMode::Offset, OperandSize::DoubleWord) {
            let a = Address::new(pp, offset, AddressMode::Offset, OperandSize::DoubleWord)?;
            return self.ldr(dst, a, OperandSize::DoubleWord);
        }
        let upper = offset & !0xFFF;
        let lower = offset & 0xFFF;
        if let Some(op @ Operand::Immediate { .. }) = Operand::imm(upper) {
            self.add(dst, pp, op)?;
            let a = Address::new(dst, lower, AddressMode::Offset, OperandSize::DoubleWord)?;
            return self.ldr(dst, a, OperandSize::DoubleWord);
        }
        self.movz(dst, offset as u16, 0)?;
        let high = (offset >> 16) as u16;
        if high != 0 {
            self.movk(dst, high, 1)?;
        }
        let a = Address::reg(pp, dst, Extend::Uxtx, false)?;
        self.ldr(dst, a, OperandSize::DoubleWord)
    }

    // ── Branches ─────────────────────────────────────────────────────────

    fn branch_imm26(&mut self, label: &mut Label, opcode: u32) -> Result<(), AsmError> {
        label.claim(&self.buffer)?;
        let site = self.buffer.size();
        let field = BranchField::Imm26;
        match label.position() {
            Some(dest) => {
                let disp = dest as i64 - site as i64;
                if !field.can_encode(disp) {
                    return Err(self.out_of_range(disp, field));
                }
                self.emit(field.encode_unchecked(disp, opcode))
            }
            None => {
                let link = link_distance(site, label.head(Chain::Wide));
                if !field.can_encode(link) {
                    return Err(self.out_of_range(link, field));
                }
                self.emit(field.encode_unchecked(link, opcode))?;
                label.push(Chain::Wide, site, &mut self.buffer);
                log::trace!("link b/bl at {:#x}", site);
                Ok(())
            }
        }
    }

    /// Emit a conditional branch family member to `label`.
    ///
    /// `word` carries everything but the displacement.
    fn conditional_branch(&mut self, label: &mut Label, word: u32) -> Result<(), AsmError> {
        label.claim(&self.buffer)?;
        let field = BranchKind::classify(word)
            .map(BranchKind::field)
            .unwrap_or(BranchField::Imm19);
        let site = self.buffer.size();
        let far_field = BranchField::Imm26;

        if let Some(dest) = label.position() {
            let disp = dest as i64 - site as i64;
            if field.can_encode(disp) {
                return self.emit(field.encode_unchecked(disp, word));
            }
            if !self.use_far_branches {
                return Err(self.out_of_range(disp, field));
            }
            let far = disp - 4;
            if !far_field.can_encode(far) {
                return Err(self.out_of_range(disp, far_field));
            }
            let mut buf = self.buffer.ensure_capacity()?;
            buf.emit_u32(field.encode_unchecked(8, branch::invert(word)));
            buf.emit_u32(far_field.encode_unchecked(far, B));
            log::trace!("far branch at {:#x} to bound {:#x}", site, dest);
            return Ok(());
        }

        // A far pair keeps its link in the `b`, so it chains with imm26 sites.
        let chain = if self.use_far_branches {
            Chain::Wide
        } else {
            chain_for(field)
        };
        let link = link_distance(site, label.head(chain));
        if self.use_far_branches {
            if !far_field.can_encode(link) {
                return Err(self.out_of_range(link, far_field));
            }
            let mut buf = self.buffer.ensure_capacity()?;
            buf.emit_u32(field.encode_unchecked(8, branch::invert(word)));
            buf.emit_u32(far_field.encode_unchecked(link, B));
        } else {
            if !field.can_encode(link) {
                return Err(self.out_of_range(link, field));
            }
            self.emit(field.encode_unchecked(link, word))?;
        }
        label.push(chain, site, &mut self.buffer);
        log::trace!("link conditional branch at {:#x}", site);
        Ok(())
    }

    /// `b label`.
    pub fn b(&mut self, label: &mut Label) -> Result<(), AsmError> {
        self.branch_imm26(label, B)
    }

    /// `bl label`.
    pub fn bl(&mut self, label: &mut Label) -> Result<(), AsmError> {
        self.branch_imm26(label, BL)
    }

    fn branch_offset(&mut self, disp: i64, opcode: u32) -> Result<(), AsmError> {
        let field = BranchField::Imm26;
        if disp < field.min() || disp > field.max() {
            return Err(self.out_of_range(disp, field));
        }
        let word = field.encode(disp, opcode)?;
        self.emit(word)
    }

    /// `b #disp` relative to this instruction.
    pub fn b_offset(&mut self, disp: i64) -> Result<(), AsmError> {
        self.branch_offset(disp, B)
    }

    /// `bl #disp` relative to this instruction.
    pub fn bl_offset(&mut self, disp: i64) -> Result<(), AsmError> {
        self.branch_offset(disp, BL)
    }

    /// `b.cond label`. `Al` is emitted as a plain `b`.
    pub fn b_cond(&mut self, cond: Condition, label: &mut Label) -> Result<(), AsmError> {
        match cond {
            Condition::Al => self.b(label),
            Condition::Nv => Err(AsmError::invalid_at(
                "nv is not a branch condition",
                self.buffer.size(),
            )),
            _ => self.conditional_branch(label, B_COND | cond as u32),
        }
    }

    fn compare_branch(&mut self, label: &mut Label, rt: Register, size: OperandSize, nonzero: bool) -> Result<(), AsmError> {
        let op = if nonzero { 1 << 24 } else { 0 };
        let word = CBZ | size.sf() | op | self.reg(rt, R31::Zero)?;
        self.conditional_branch(label, word)
    }

    /// `cbz rt, label`.
    pub fn cbz(&mut self, label: &mut Label, rt: Register, size: OperandSize) -> Result<(), AsmError> {
        self.compare_branch(label, rt, size, false)
    }

    /// `cbnz rt, label`.
    pub fn cbnz(&mut self, label: &mut Label, rt: Register, size: OperandSize) -> Result<(), AsmError> {
        self.compare_branch(label, rt, size, true)
    }

    fn test_branch(&mut self, label: &mut Label, rt: Register, bit: u32, set: bool) -> Result<(), AsmError> {
        let bit = self.uimm(bit, 6)?;
        let op = if set { 1 << 24 } else { 0 };
        let word = TBZ
            | ((bit >> 5) << 31)
            | op
            | ((bit & 0x1F) << 19)
            | self.reg(rt, R31::Zero)?;
        self.conditional_branch(label, word)
    }

    /// `tbz rt, #bit, label`.
    pub fn tbz(&mut self, label: &mut Label, rt: Register, bit: u32) -> Result<(), AsmError> {
        self.test_branch(label, rt, bit, false)
    }

    /// `tbnz rt, #bit, label`.
    pub fn tbnz(&mut self, label: &mut Label, rt: Register, bit: u32) -> Result<(), AsmError> {
        self.test_branch(label, rt, bit, true)
    }

    /// `br rn`.
    pub fn br(&mut self, rn: Register) -> Result<(), AsmError> {
        let word = BR | (self.reg(rn, R31::Zero)? << 5);
        self.emit(word)
    }

    /// `blr rn`.
    pub fn blr(&mut self, rn: Register) -> Result<(), AsmError> {
        let word = BLR | (self.reg(rn, R31::Zero)? << 5);
        self.emit(word)
    }

    /// `ret` through the link register.
    pub fn ret(&mut self) -> Result<(), AsmError> {
        self.ret_to(Register::LR)
    }

    /// `ret rn`.
    pub fn ret_to(&mut self, rn: Register) -> Result<(), AsmError> {
        let word = RET | (self.reg(rn, R31::Zero)? << 5);
        self.emit(word)
    }

    // ── Misc ─────────────────────────────────────────────────────────────

    /// `nop`.
    pub fn nop(&mut self) -> Result<(), AsmError> {
        self.emit(NOP)
    }

    /// `brk #imm`.
    pub fn brk(&mut self, imm: u16) -> Result<(), AsmError> {
        self.emit(BRK | ((imm as u32) << 5))
    }

    /// `hlt #imm`.
    pub fn hlt(&mut self, imm: u16) -> Result<(), AsmError> {
        self.emit(HLT | ((imm as u32) << 5))
    }

    /// `svc #imm`.
    pub fn svc(&mut self, imm: u16) -> Result<(), AsmError> {
        self.emit(SVC | ((imm as u32) << 5))
    }

    // ── Bind ─────────────────────────────────────────────────────────────

    /// Work out the final form of the chain site at `site` for a label bound
    /// at `bound`, and the next site in the chain. Reads only.
    fn resolve(&self, site: usize, bound: usize) -> Result<(Patch, Option<usize>), AsmError> {
        let word = self.buffer.load_u32(site);
        let kind = BranchKind::classify(word)
            .ok_or_else(|| AsmError::invalid_at("label chain entry is not a branch", site))?;
        let disp = bound as i64 - site as i64;
        let out_of_range = |disp, field: BranchField| AsmError::BranchOutOfRange {
            disp,
            max: field.max(),
            offset: site,
        };
        let far_field = BranchField::Imm26;

        if kind != BranchKind::Unconditional && self.use_far_branches {
            let far = self.buffer.load_u32(site + 4);
            let next = link_target(site, far_field.decode(far));
            let field = kind.field();
            let patch = if field.can_encode(disp) {
                Patch::Pair {
                    guard: field.encode_unchecked(disp, branch::invert(word)),
                    second: NOP,
                }
            } else if far_field.can_encode(disp - 4) {
                Patch::Pair {
                    guard: word,
                    second: far_field.encode_unchecked(disp - 4, far),
                }
            } else {
                return Err(out_of_range(disp, far_field));
            };
            return Ok((patch, next));
        }

        let field = kind.field();
        let next = link_target(site, field.decode(word));
        if !field.can_encode(disp) {
            return Err(out_of_range(disp, field));
        }
        Ok((Patch::Single(field.encode_unchecked(disp, word)), next))
    }

    /// Bind `label` to the current position and patch every pending site.
    ///
    /// Either all sites are patched or, on error, none is.
    pub fn bind(&mut self, label: &mut Label) -> Result<(), AsmError> {
        label.check_unbound()?;
        label.claim(&self.buffer)?;
        let bound = self.buffer.size();

        for chain in Chain::ALL {
            let mut cursor = label.head(chain);
            while let Some(site) = cursor {
                cursor = self.resolve(site, bound)?.1;
            }
        }

        let mut patched = 0usize;
        for chain in Chain::ALL {
            let mut cursor = label.head(chain);
            while let Some(site) = cursor {
                let (patch, next) = self.resolve(site, bound)?;
                match patch {
                    Patch::Single(word) => self.buffer.store_u32(site, word),
                    Patch::Pair { guard, second } => {
                        self.buffer.store_u32(site, guard);
                        self.buffer.store_u32(site + 4, second);
                        log::trace!(
                            "far site {:#x}: {}",
                            site,
                            if second == NOP { "shrunk to near" } else { "kept far" }
                        );
                    }
                }
                patched += 1;
                cursor = next;
            }
        }

        label.mark_bound(bound, &mut self.buffer);
        log::trace!("bind at {:#x}: patched {} site(s)", bound, patched);
        Ok(())
    }
}
