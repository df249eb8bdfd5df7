#![no_main]
use libfuzzer_sys::fuzz_target;

use jit_asm::x86_64::{AluOp, Assembler, Condition, Immediate, JumpDistance, Register, ShiftOp};
use jit_asm::{EmitOptions, Label};

const LABELS: usize = 8;

fuzz_target!(|data: &[u8]| {
    // Drive the emitter with a byte-coded op stream: it must never panic,
    // only return Ok/Err, and any successful finalize must have every
    // label bound.
    let options = EmitOptions::default().with_initial_capacity(64);
    let Ok(mut asm) = Assembler::new(options) else {
        return;
    };
    let mut labels: Vec<Label> = (0..LABELS).map(|_| Label::new()).collect();

    let reg = |b: u8| Register::from_index(b & 0xF).unwrap_or(Register::Rax);
    for op in data.chunks_exact(3) {
        let (kind, a, b) = (op[0], op[1], op[2]);
        let label = &mut labels[a as usize % LABELS];
        let distance = if b & 1 == 0 {
            JumpDistance::Far
        } else {
            JumpDistance::Near
        };
        let _ = match kind % 12 {
            0 => asm.jmp(label, distance),
            1 => asm.j(Condition::from_bits(b >> 1), label, distance),
            2 => asm.call(label),
            3 => asm.bind(label),
            4 => asm.nop(1 + (b as usize % 10)),
            5 => asm.movq(reg(a), Immediate(i64::from(b as i8) << (a % 57))),
            6 => asm.alu_imm(AluOp::Cmp, reg(a), Immediate(i64::from(b) << (a % 40))),
            7 => asm.alu(AluOp::Add, reg(a), reg(b)),
            8 => asm.shift_imm(ShiftOp::Shl, reg(a), b),
            9 => asm.pushq(reg(a)),
            10 => asm.align(1 << (b % 5), a as usize),
            _ => asm.setcc(Condition::from_bits(b), reg(a).low_byte()),
        };
    }

    let unbound = labels
        .iter()
        .filter(|l| !l.is_bound() && !l.is_unused())
        .count();
    let size = asm.code_size();
    match asm.into_bytes() {
        Ok(code) => {
            assert_eq!(unbound, 0);
            assert_eq!(code.len(), size);
        }
        Err(_) => assert!(unbound > 0),
    }
});
