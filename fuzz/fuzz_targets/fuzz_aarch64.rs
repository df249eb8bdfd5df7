#![no_main]
use libfuzzer_sys::fuzz_target;

use jit_asm::aarch64::{Assembler, Condition, LogicalImm, Operand, OperandSize, Register};
use jit_asm::{BranchField, EmitOptions, Label};

const LABELS: usize = 8;

fuzz_target!(|data: &[u8]| {
    let Some((&mode, rest)) = data.split_first() else {
        return;
    };

    // Round-trip every logical immediate the input happens to contain.
    for chunk in rest.chunks_exact(8) {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        let value = u64::from_le_bytes(raw);
        if let Some(imm) = LogicalImm::encode(value, 64) {
            assert_eq!(imm.decode(64), value);
        }
        let disp = (value as i64) >> 36 << 2;
        if let Ok(word) = BranchField::Imm19.encode(disp, 0x5400_0000) {
            assert_eq!(BranchField::Imm19.decode(word), disp);
        }
    }

    let options = EmitOptions::default()
        .with_initial_capacity(64)
        .with_far_branches(mode & 1 != 0);
    let Ok(mut asm) = Assembler::new(options) else {
        return;
    };
    let mut labels: Vec<Label> = (0..LABELS).map(|_| Label::new()).collect();
    let reg = |b: u8| Register::from_index(b % 31).unwrap_or(Register::R0);

    for op in rest.chunks_exact(3) {
        let (kind, a, b) = (op[0], op[1], op[2]);
        let label = &mut labels[a as usize % LABELS];
        let _ = match kind % 12 {
            0 => asm.b(label),
            1 => asm.b_cond(Condition::from_bits(u32::from(b)), label),
            2 => asm.cbz(label, reg(b), OperandSize::DoubleWord),
            3 => asm.tbnz(label, reg(b), u32::from(b % 70)),
            4 => asm.bind(label),
            5 => asm.nop(),
            6 => asm.load_immediate(reg(a), i64::from(b as i8) << (a % 57)),
            7 => match Operand::can_hold(i64::from(b) << (a % 60), 64) {
                Some(op @ Operand::Immediate { .. }) => asm.add(reg(a), reg(b), op),
                Some(_) => asm.orri(reg(a), reg(b), u64::from(b) << (a % 60)),
                None => Ok(()),
            },
            8 => asm.load_word_from_pool_offset(reg(a), Register::PP, u32::from(b) << (a % 24)),
            9 => asm.bl(label),
            10 => asm.align(4 << (b % 4)),
            _ => asm.ret(),
        };
    }

    let unbound = labels
        .iter()
        .filter(|l| !l.is_bound() && !l.is_unused())
        .count();
    match asm.into_bytes() {
        Ok(code) => {
            assert_eq!(unbound, 0);
            assert_eq!(code.len() % 4, 0);
        }
        Err(_) => assert!(unbound > 0),
    }
});
