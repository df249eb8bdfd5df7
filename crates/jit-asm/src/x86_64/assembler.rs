//! x86-64 instruction encoder.
//!
//! Branch displacements are the trailing rel8 or rel32 of the instruction, so
//! chain sites are the offset of that field. Wide (rel32) and narrow (rel8)
//! references to one label are threaded on separate chains because each
//! field stores its link at its own width.

use alloc::format;
use alloc::vec::Vec;

use super::operand::{Address, Immediate, Operand};
use super::registers::{ByteRegister, Condition, Register};
use crate::buffer::CodeBuffer;
use crate::codec::BranchField;
use crate::error::AsmError;
use crate::label::{link_distance, link_target, Chain, ExternalLabel, Label};
use crate::options::EmitOptions;

/// `int3` repeated, the trap fill pattern.
pub const TRAP: [u8; 4] = [0xCC; 4];

const REX_W: u8 = 0x08;
const REX_R: u8 = 0x04;

/// Displacement width to use for a branch to an unbound label.
///
/// Branches to bound labels always take the shortest form that reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JumpDistance {
    /// rel32: reaches anywhere in a 2 GiB buffer.
    #[default]
    Far,
    /// rel8: the caller promises the label is bound within 127 bytes.
    Near,
}

/// Operation of the classic two-operand ALU group; the value is the `/digit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum AluOp {
    Add = 0,
    Or = 1,
    Adc = 2,
    Sbb = 3,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

/// Shift/rotate group; the value is the `/digit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum ShiftOp {
    Rol = 0,
    Ror = 1,
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

// ── Byte-level helpers ───────────────────────────────────────────────────
//
// These run under an `EnsureCapacity` guard held by the caller.

fn emit_rex(buf: &mut CodeBuffer, bits: u8) {
    if bits != 0 {
        buf.emit_u8(0x40 | bits);
    }
}

/// REX (if needed), opcode bytes, ModR/M + SIB + displacement.
fn emit_op_rm(buf: &mut CodeBuffer, w: bool, opcode: &[u8], reg_field: u8, rm: &Operand) {
    let mut rex = rm.rex();
    if w {
        rex |= REX_W;
    }
    if reg_field & 8 != 0 {
        rex |= REX_R;
    }
    emit_rex(buf, rex);
    for &b in opcode {
        buf.emit_u8(b);
    }
    let (bytes, len) = rm.encode(reg_field);
    for &b in &bytes[..len] {
        buf.emit_u8(b);
    }
}

/// `opcode + r` short form with REX.B for extended registers.
fn emit_op_reg(buf: &mut CodeBuffer, w: bool, opcode: u8, r: Register) {
    let mut rex = if r.is_extended() { 0x01 } else { 0 };
    if w {
        rex |= REX_W;
    }
    emit_rex(buf, rex);
    buf.emit_u8(opcode + r.base_code());
}

fn emit_movq_imm(buf: &mut CodeBuffer, r: Register, imm: Immediate) {
    if imm.is_uint32() {
        // mov r32, imm32 zero-extends into the full register.
        emit_op_reg(buf, false, 0xB8, r);
        buf.emit_u32(imm.value() as u32);
    } else if imm.is_int32() {
        emit_op_rm(buf, true, &[0xC7], 0, &Operand::reg(r));
        buf.emit_i32(imm.value() as i32);
    } else {
        emit_movq_imm64(buf, r, imm.value() as u64);
    }
}

/// The fixed 10-byte `movabs r, imm64`.
fn emit_movq_imm64(buf: &mut CodeBuffer, r: Register, imm: u64) {
    emit_op_reg(buf, true, 0xB8, r);
    buf.emit_u64(imm);
}

fn emit_alu_rm(buf: &mut CodeBuffer, op: AluOp, dst: &Operand, src: Register) {
    emit_op_rm(buf, true, &[(op as u8) * 8 + 1], src as u8, dst);
}

/// Intel's recommended multi-byte nops.
fn emit_nop(buf: &mut CodeBuffer, size: usize) {
    const NOPS: [&[u8]; 8] = [
        &[0x90],
        &[0x66, 0x90],
        &[0x0F, 0x1F, 0x00],
        &[0x0F, 0x1F, 0x40, 0x00],
        &[0x0F, 0x1F, 0x44, 0x00, 0x00],
        &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
        &[0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00],
        &[0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    ];
    for &b in NOPS[size - 1] {
        buf.emit_u8(b);
    }
}

/// x86-64 assembler over a [`CodeBuffer`].
///
/// # Examples
///
/// ```rust
/// use jit_asm::x86_64::{Assembler, Condition, Immediate, JumpDistance, Register};
/// use jit_asm::{EmitOptions, Label};
///
/// let mut asm = Assembler::new(EmitOptions::default()).unwrap();
/// let mut done = Label::new();
/// asm.cmpq_imm(Register::Rdi, Immediate(0)).unwrap();
/// asm.j(Condition::Equal, &mut done, JumpDistance::Near).unwrap();
/// asm.movq(Register::Rax, Immediate(1)).unwrap();
/// asm.bind(&mut done).unwrap();
/// asm.ret().unwrap();
/// let code = asm.into_bytes().unwrap();
/// assert_eq!(code[4..6], [0x74, 0x05]);
/// ```
#[derive(Debug)]
pub struct Assembler {
    buffer: CodeBuffer,
}

impl Assembler {
    /// Create an assembler with an empty buffer.
    pub fn new(options: EmitOptions) -> Result<Self, AsmError> {
        Ok(Self {
            buffer: CodeBuffer::new(&options, TRAP)?,
        })
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
    pub fn into_bytes(self) -> Result<Vec<u8>, AsmError> {
        self.buffer.into_bytes()
    }

    /// Append raw bytes.
    pub fn emit_bytes(&mut self, bytes: &[u8]) -> Result<(), AsmError> {
        self.buffer.emit_bytes(bytes)
    }

    // ── Control flow ─────────────────────────────────────────────────────

    /// Emit a jump with a short (`short`, rel8) and a long (`long`, rel32)
    /// opcode form.
    fn branch(
        &mut self,
        label: &mut Label,
        short: &[u8],
        long: &[u8],
        distance: JumpDistance,
    ) -> Result<(), AsmError> {
        label.claim(&self.buffer)?;
        let start = self.buffer.size();
        let mut buf = self.buffer.ensure_capacity()?;

        if let Some(dest) = label.position() {
            let offset = dest as i64 - start as i64;
            let short_disp = offset - (short.len() as i64 + 1);
            if BranchField::Rel8.can_encode(short_disp) {
                for &b in short {
                    buf.emit_u8(b);
                }
                buf.emit_u8(short_disp as i8 as u8);
            } else {
                let long_disp = offset - (long.len() as i64 + 4);
                if !BranchField::Rel32.can_encode(long_disp) {
                    return Err(AsmError::BranchOutOfRange {
                        disp: long_disp,
                        max: BranchField::Rel32.max(),
                        offset: start,
                    });
                }
                for &b in long {
                    buf.emit_u8(b);
                }
                buf.emit_i32(long_disp as i32);
            }
            return Ok(());
        }

        match distance {
            JumpDistance::Near => {
                let site = start + short.len();
                let link = link_distance(site, label.head(Chain::Near));
                if !BranchField::Rel8.can_encode(link) {
                    return Err(AsmError::BranchOutOfRange {
                        disp: link,
                        max: BranchField::Rel8.max(),
                        offset: start,
                    });
                }
                for &b in short {
                    buf.emit_u8(b);
                }
                buf.emit_u8(link as i8 as u8);
                drop(buf);
                label.push(Chain::Near, site, &mut self.buffer);
                log::trace!("link rel8 at {:#x}", site);
            }
            JumpDistance::Far => {
                let site = start + long.len();
                let link = link_distance(site, label.head(Chain::Wide));
                if !BranchField::Rel32.can_encode(link) {
                    return Err(AsmError::BranchOutOfRange {
                        disp: link,
                        max: BranchField::Rel32.max(),
                        offset: start,
                    });
                }
                for &b in long {
                    buf.emit_u8(b);
                }
                buf.emit_i32(link as i32);
                drop(buf);
                label.push(Chain::Wide, site, &mut self.buffer);
                log::trace!("link rel32 at {:#x}", site);
            }
        }
        Ok(())
    }

    /// `jmp label`.
    pub fn jmp(&mut self, label: &mut Label, distance: JumpDistance) -> Result<(), AsmError> {
        self.branch(label, &[0xEB], &[0xE9], distance)
    }

    /// `j<cond> label`.
    pub fn j(
        &mut self,
        cond: Condition,
        label: &mut Label,
        distance: JumpDistance,
    ) -> Result<(), AsmError> {
        let cc = cond as u8;
        self.branch(label, &[0x70 | cc], &[0x0F, 0x80 | cc], distance)
    }

    /// `call label` (always rel32).
    pub fn call(&mut self, label: &mut Label) -> Result<(), AsmError> {
        label.claim(&self.buffer)?;
        let start = self.buffer.size();
        let site = start + 1;
        let field = BranchField::Rel32;
        let disp = match label.position() {
            Some(dest) => dest as i64 - (site as i64 + 4),
            None => link_distance(site, label.head(Chain::Wide)),
        };
        if !field.can_encode(disp) {
            return Err(AsmError::BranchOutOfRange {
                disp,
                max: field.max(),
                offset: start,
            });
        }
        {
            let mut buf = self.buffer.ensure_capacity()?;
            buf.emit_u8(0xE8);
            buf.emit_i32(disp as i32);
        }
        if !label.is_bound() {
            label.push(Chain::Wide, site, &mut self.buffer);
            log::trace!("link call at {:#x}", site);
        }
        Ok(())
    }

    /// `call reg`.
    pub fn call_reg(&mut self, reg: Register) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        emit_op_rm(&mut buf, false, &[0xFF], 2, &Operand::reg(reg));
        Ok(())
    }

    /// `jmp reg`.
    pub fn jmp_reg(&mut self, reg: Register) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        emit_op_rm(&mut buf, false, &[0xFF], 4, &Operand::reg(reg));
        Ok(())
    }

    /// Call an absolute address through [`Register::TMP`].
    ///
    /// The address is loaded with the full 10-byte `movabs` so the sequence
    /// length does not depend on the address and the immediate can be
    /// repatched.
    pub fn call_external(&mut self, target: &ExternalLabel) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        emit_movq_imm64(&mut buf, Register::TMP, target.address);
        emit_op_rm(&mut buf, false, &[0xFF], 2, &Operand::reg(Register::TMP));
        Ok(())
    }

    /// Jump to an absolute address through [`Register::TMP`].
    pub fn jmp_external(&mut self, target: &ExternalLabel) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        emit_movq_imm64(&mut buf, Register::TMP, target.address);
        emit_op_rm(&mut buf, false, &[0xFF], 4, &Operand::reg(Register::TMP));
        Ok(())
    }

    /// `ret`.
    pub fn ret(&mut self) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        buf.emit_u8(0xC3);
        Ok(())
    }

    /// `int3`.
    pub fn int3(&mut self) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        buf.emit_u8(0xCC);
        Ok(())
    }

    /// A single nop instruction of `size` bytes, 1 to 8.
    pub fn nop(&mut self, size: usize) -> Result<(), AsmError> {
        if !(1..=8).contains(&size) {
            return Err(AsmError::overflow(size as i64, 1, 8));
        }
        let mut buf = self.buffer.ensure_capacity()?;
        emit_nop(&mut buf, size);
        Ok(())
    }

    /// Pad with nops until `code_size() + offset` is a multiple of
    /// `alignment`.
    pub fn align(&mut self, alignment: usize, offset: usize) -> Result<(), AsmError> {
        if !alignment.is_power_of_two() {
            return Err(AsmError::invalid_at(
                format!("alignment {} is not a power of two", alignment),
                self.buffer.size(),
            ));
        }
        let pos = self.buffer.size() + offset;
        let mut remaining = (alignment - pos % alignment) % alignment;
        while remaining > 0 {
            let n = remaining.min(8);
            self.nop(n)?;
            remaining -= n;
        }
        Ok(())
    }

    // ── Stack ────────────────────────────────────────────────────────────

    /// `push reg`.
    pub fn pushq(&mut self, reg: Register) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        emit_op_reg(&mut buf, false, 0x50, reg);
        Ok(())
    }

    /// Push a sign-extended immediate; values beyond int32 go through
    /// [`Register::TMP`].
    pub fn pushq_imm(&mut self, imm: Immediate) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        if imm.is_int8() {
            buf.emit_u8(0x6A);
            buf.emit_u8(imm.value() as i8 as u8);
        } else if imm.is_int32() {
            buf.emit_u8(0x68);
            buf.emit_i32(imm.value() as i32);
        } else {
            emit_movq_imm64(&mut buf, Register::TMP, imm.value() as u64);
            emit_op_reg(&mut buf, false, 0x50, Register::TMP);
        }
        Ok(())
    }

    /// `pop reg`.
    pub fn popq(&mut self, reg: Register) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        emit_op_reg(&mut buf, false, 0x58, reg);
        Ok(())
    }

    /// Discard `count` stack slots: pops into [`Register::TMP`] for up to
    /// four, otherwise one `add rsp`.
    pub fn drop(&mut self, count: u32) -> Result<(), AsmError> {
        if count <= 4 {
            let mut buf = self.buffer.ensure_capacity()?;
            for _ in 0..count {
                emit_op_reg(&mut buf, false, 0x58, Register::TMP);
            }
            Ok(())
        } else {
            self.alu_imm(AluOp::Add, Register::Rsp, Immediate(count as i64 * 8))
        }
    }

    // ── Moves ────────────────────────────────────────────────────────────

    /// Load an immediate into `reg` using the shortest of `mov r32, imm32`,
    /// `mov r/m64, simm32` and `movabs`.
    pub fn movq(&mut self, reg: Register, imm: Immediate) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        emit_movq_imm(&mut buf, reg, imm);
        Ok(())
    }

    /// `mov r32, imm32`.
    pub fn movl_imm(&mut self, reg: Register, imm: u32) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        emit_op_reg(&mut buf, false, 0xB8, reg);
        buf.emit_u32(imm);
        Ok(())
    }

    /// `mov dst, src`.
    pub fn movq_rr(&mut self, dst: Register, src: Register) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        emit_op_rm(&mut buf, true, &[0x89], src as u8, &Operand::reg(dst));
        Ok(())
    }

    /// `mov dst, qword [address]`.
    pub fn movq_load(&mut self, dst: Register, address: Address) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        emit_op_rm(&mut buf, true, &[0x8B], dst as u8, &address.operand());
        Ok(())
    }

    /// `mov qword [address], src`.
    pub fn movq_store(&mut self, address: Address, src: Register) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        emit_op_rm(&mut buf, true, &[0x89], src as u8, &address.operand());
        Ok(())
    }

    /// `lea dst, [address]`.
    pub fn leaq(&mut self, dst: Register, address: Address) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        emit_op_rm(&mut buf, true, &[0x8D], dst as u8, &address.operand());
        Ok(())
    }

    // ── Arithmetic ───────────────────────────────────────────────────────

    /// `<op> dst, src` on 64-bit operands; `dst` may be a register or memory.
    pub fn alu(&mut self, op: AluOp, dst: impl Into<Operand>, src: Register) -> Result<(), AsmError> {
        let dst = dst.into();
        let mut buf = self.buffer.ensure_capacity()?;
        emit_alu_rm(&mut buf, op, &dst, src);
        Ok(())
    }

    /// `<op> dst, imm` on 64-bit operands.
    ///
    /// Picks `83 /op ib` for byte immediates, the accumulator short form for
    /// `rax`, and `81 /op id` otherwise. Immediates beyond int32 are first
    /// loaded into [`Register::TMP`], which then may not appear in `dst`.
    pub fn alu_imm(&mut self, op: AluOp, dst: impl Into<Operand>, imm: Immediate) -> Result<(), AsmError> {
        let dst = dst.into();
        let at = self.buffer.size();
        let mut buf = self.buffer.ensure_capacity()?;
        if imm.is_int8() {
            emit_op_rm(&mut buf, true, &[0x83], op as u8, &dst);
            buf.emit_u8(imm.value() as i8 as u8);
        } else if imm.is_int32() {
            if dst.register() == Some(Register::Rax) {
                buf.emit_u8(0x40 | REX_W);
                buf.emit_u8((op as u8) * 8 + 5);
            } else {
                emit_op_rm(&mut buf, true, &[0x81], op as u8, &dst);
            }
            buf.emit_i32(imm.value() as i32);
        } else {
            if dst.uses(Register::TMP) {
                return Err(AsmError::invalid_at(
                    "wide immediate operand needs the scratch register",
                    at,
                ));
            }
            emit_movq_imm(&mut buf, Register::TMP, imm);
            emit_alu_rm(&mut buf, op, &dst, Register::TMP);
        }
        Ok(())
    }

    /// `add dst, src`.
    pub fn addq(&mut self, dst: Register, src: Register) -> Result<(), AsmError> {
        self.alu(AluOp::Add, dst, src)
    }

    /// `add dst, imm`.
    pub fn addq_imm(&mut self, dst: Register, imm: Immediate) -> Result<(), AsmError> {
        self.alu_imm(AluOp::Add, dst, imm)
    }

    /// `sub dst, src`.
    pub fn subq(&mut self, dst: Register, src: Register) -> Result<(), AsmError> {
        self.alu(AluOp::Sub, dst, src)
    }

    /// `sub dst, imm`.
    pub fn subq_imm(&mut self, dst: Register, imm: Immediate) -> Result<(), AsmError> {
        self.alu_imm(AluOp::Sub, dst, imm)
    }

    /// `and dst, src`.
    pub fn andq(&mut self, dst: Register, src: Register) -> Result<(), AsmError> {
        self.alu(AluOp::And, dst, src)
    }

    /// `and dst, imm`.
    pub fn andq_imm(&mut self, dst: Register, imm: Immediate) -> Result<(), AsmError> {
        self.alu_imm(AluOp::And, dst, imm)
    }

    /// `or dst, src`.
    pub fn orq(&mut self, dst: Register, src: Register) -> Result<(), AsmError> {
        self.alu(AluOp::Or, dst, src)
    }

    /// `or dst, imm`.
    pub fn orq_imm(&mut self, dst: Register, imm: Immediate) -> Result<(), AsmError> {
        self.alu_imm(AluOp::Or, dst, imm)
    }

    /// `xor dst, src`.
    pub fn xorq(&mut self, dst: Register, src: Register) -> Result<(), AsmError> {
        self.alu(AluOp::Xor, dst, src)
    }

    /// `xor dst, imm`.
    pub fn xorq_imm(&mut self, dst: Register, imm: Immediate) -> Result<(), AsmError> {
        self.alu_imm(AluOp::Xor, dst, imm)
    }

    /// `cmp a, b`.
    pub fn cmpq(&mut self, a: Register, b: Register) -> Result<(), AsmError> {
        self.alu(AluOp::Cmp, a, b)
    }

    /// `cmp a, imm`.
    pub fn cmpq_imm(&mut self, a: Register, imm: Immediate) -> Result<(), AsmError> {
        self.alu_imm(AluOp::Cmp, a, imm)
    }

    /// `test a, b`.
    pub fn testq(&mut self, a: Register, b: Register) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        emit_op_rm(&mut buf, true, &[0x85], b as u8, &Operand::reg(a));
        Ok(())
    }

    /// `imul dst, src`.
    pub fn imulq(&mut self, dst: Register, src: Register) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        emit_op_rm(&mut buf, true, &[0x0F, 0xAF], dst as u8, &Operand::reg(src));
        Ok(())
    }

    /// `<op> reg, imm`; a count of 1 uses the short `D1` form.
    pub fn shift_imm(&mut self, op: ShiftOp, reg: Register, count: u8) -> Result<(), AsmError> {
        if count > 63 {
            return Err(AsmError::overflow(count as i64, 0, 63));
        }
        let mut buf = self.buffer.ensure_capacity()?;
        if count == 1 {
            emit_op_rm(&mut buf, true, &[0xD1], op as u8, &Operand::reg(reg));
        } else {
            emit_op_rm(&mut buf, true, &[0xC1], op as u8, &Operand::reg(reg));
            buf.emit_u8(count);
        }
        Ok(())
    }

    /// `<op> reg, cl`.
    pub fn shift_cl(&mut self, op: ShiftOp, reg: Register) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        emit_op_rm(&mut buf, true, &[0xD3], op as u8, &Operand::reg(reg));
        Ok(())
    }

    /// `shl reg, count`.
    pub fn shlq(&mut self, reg: Register, count: u8) -> Result<(), AsmError> {
        self.shift_imm(ShiftOp::Shl, reg, count)
    }

    /// `shr reg, count`.
    pub fn shrq(&mut self, reg: Register, count: u8) -> Result<(), AsmError> {
        self.shift_imm(ShiftOp::Shr, reg, count)
    }

    /// `sar reg, count`.
    pub fn sarq(&mut self, reg: Register, count: u8) -> Result<(), AsmError> {
        self.shift_imm(ShiftOp::Sar, reg, count)
    }

    /// `set<cond> reg8`.
    pub fn setcc(&mut self, cond: Condition, dst: ByteRegister) -> Result<(), AsmError> {
        let mut buf = self.buffer.ensure_capacity()?;
        let r = dst.full();
        let rex = if r.is_extended() { 0x01 } else { 0 };
        if rex != 0 || dst.needs_rex() {
            buf.emit_u8(0x40 | rex);
        }
        buf.emit_u8(0x0F);
        buf.emit_u8(0x90 | cond as u8);
        buf.emit_u8(0xC0 | r.base_code());
        Ok(())
    }

    // ── Bind ─────────────────────────────────────────────────────────────

    /// Bind `label` to the current position and patch every pending site.
    ///
    /// Either all sites are patched or, on error, none is.
    pub fn bind(&mut self, label: &mut Label) -> Result<(), AsmError> {
        label.check_unbound()?;
        label.claim(&self.buffer)?;
        let bound = self.buffer.size();

        // Validate the narrow chain first; the wide chain always reaches.
        let mut cursor = label.head(Chain::Near);
        while let Some(site) = cursor {
            let disp = bound as i64 - (site as i64 + 1);
            if !BranchField::Rel8.can_encode(disp) {
                return Err(AsmError::BranchOutOfRange {
                    disp,
                    max: BranchField::Rel8.max(),
                    offset: site,
                });
            }
            cursor = link_target(site, self.buffer.load_u8(site) as i8 as i64);
        }
        let mut cursor = label.head(Chain::Wide);
        while let Some(site) = cursor {
            let disp = bound as i64 - (site as i64 + 4);
            if !BranchField::Rel32.can_encode(disp) {
                return Err(AsmError::BranchOutOfRange {
                    disp,
                    max: BranchField::Rel32.max(),
                    offset: site,
                });
            }
            cursor = link_target(site, self.buffer.load_i32(site) as i64);
        }

        let mut patched = 0usize;
        let mut cursor = label.head(Chain::Wide);
        while let Some(site) = cursor {
            let next = link_target(site, self.buffer.load_i32(site) as i64);
            self.buffer
                .store_i32(site, (bound as i64 - (site as i64 + 4)) as i32);
            patched += 1;
            cursor = next;
        }
        let mut cursor = label.head(Chain::Near);
        while let Some(site) = cursor {
            let next = link_target(site, self.buffer.load_u8(site) as i8 as i64);
            self.buffer
                .store_u8(site, (bound as i64 - (site as i64 + 1)) as i8 as u8);
            patched += 1;
            cursor = next;
        }

        label.mark_bound(bound, &mut self.buffer);
        log::trace!("bind at {:#x}: patched {} site(s)", bound, patched);
        Ok(())
    }
}
