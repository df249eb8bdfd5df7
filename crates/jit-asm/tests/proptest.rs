#![cfg(not(target_arch = "wasm32"))]
//! Property-based tests using proptest.
//!
//! These check the emission invariants over randomly generated inputs:
//! displacement codecs, logical immediates, label chains and buffer growth.

use jit_asm::{BranchField, EmitOptions, Label};
use proptest::prelude::*;

// ── Strategies ──────────────────────────────────────────────────────────

fn arb_field() -> impl Strategy<Value = BranchField> {
    prop::sample::select(vec![
        BranchField::Rel8,
        BranchField::Rel32,
        BranchField::Imm26,
        BranchField::Imm19,
        BranchField::Imm14,
    ])
}

/// A field together with a displacement it can hold.
fn arb_encodable() -> impl Strategy<Value = (BranchField, i64)> {
    arb_field().prop_flat_map(|field| {
        let granule = 1i64 << field.scale();
        (field.min() / granule..=field.max() / granule).prop_map(move |n| (field, n * granule))
    })
}

/// A bitmask immediate built from (element size, run length, rotation).
fn arb_bitmask(width: u32) -> impl Strategy<Value = u64> {
    let max_log = if width == 32 { 5u32 } else { 6 };
    (1u32..=max_log)
        .prop_flat_map(|log| {
            let size = 1u32 << log;
            (Just(size), 1..size, 0..size)
        })
        .prop_map(move |(size, ones, rot)| {
            let mask = if size == 64 { u64::MAX } else { (1u64 << size) - 1 };
            let run = (1u64 << ones) - 1;
            let elem = if rot == 0 {
                run
            } else {
                ((run >> rot) | (run << (size - rot))) & mask
            };
            let mut value = elem;
            let mut filled = size;
            while filled < 64 {
                value |= value << filled;
                filled *= 2;
            }
            if width == 32 {
                value & 0xFFFF_FFFF
            } else {
                value
            }
        })
}

fn opts() -> EmitOptions {
    EmitOptions::default().with_trap_fill(false)
}

// ── Codec ───────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// decode(encode(d)) == d for every legal displacement, and the bits
    /// outside the field survive.
    #[test]
    fn codec_round_trip((field, disp) in arb_encodable(), word in any::<u32>()) {
        prop_assert!(field.can_encode(disp));
        let encoded = field.encode(disp, word).unwrap();
        prop_assert_eq!(field.decode(encoded), disp);
        prop_assert_eq!(encoded & !field.mask(), word & !field.mask());
    }

    /// Anything outside the range or off the granule is refused.
    #[test]
    fn codec_rejects_illegal(field in arb_field(), disp in any::<i64>()) {
        let granule = 1i64 << field.scale();
        let legal = disp % granule == 0 && disp >= field.min() && disp <= field.max();
        prop_assert_eq!(field.can_encode(disp), legal);
        prop_assert_eq!(field.encode(disp, 0).is_ok(), legal);
    }
}

// ── Logical immediates ──────────────────────────────────────────────────

#[cfg(feature = "aarch64")]
mod logical {
    use super::*;
    use jit_asm::aarch64::{LogicalImm, Operand};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]

        #[test]
        fn generated_bitmasks_are_accepted(value in arb_bitmask(64)) {
            let imm = LogicalImm::encode(value, 64);
            prop_assert!(imm.is_some(), "rejected {:#x}", value);
            prop_assert_eq!(imm.unwrap().decode(64), value);
        }

        #[test]
        fn generated_32bit_bitmasks_are_accepted(value in arb_bitmask(32)) {
            let imm = LogicalImm::encode(value, 32);
            prop_assert!(imm.is_some(), "rejected {:#x}", value);
            prop_assert_eq!(imm.unwrap().decode(32), value);
        }

        /// Whatever is accepted decodes back to the same value.
        #[test]
        fn accepted_values_round_trip(value in any::<u64>()) {
            if let Some(imm) = LogicalImm::encode(value, 64) {
                prop_assert_eq!(imm.decode(64), value);
            }
        }

        /// `can_hold` never returns a form that changes the value.
        #[test]
        fn can_hold_is_faithful(value in any::<i64>()) {
            match Operand::can_hold(value, 64) {
                Some(Operand::Immediate { imm12, shifted }) => {
                    let v = if shifted { (imm12 as i64) << 12 } else { imm12 as i64 };
                    prop_assert_eq!(v, value);
                }
                Some(Operand::Logical(imm)) => {
                    prop_assert_eq!(imm.decode(64), value as u64);
                }
                Some(other) => prop_assert!(false, "unexpected {:?}", other),
                None => {}
            }
        }
    }
}

// ── Labels ──────────────────────────────────────────────────────────────

#[cfg(feature = "aarch64")]
mod aarch64_labels {
    use super::*;
    use jit_asm::aarch64::{Assembler, BranchKind, Condition, Register};

    /// Emit `refs` forward branches separated by `gaps` nops, optionally with
    /// far branches, and return the code with the bind offset.
    fn build(options: EmitOptions, gaps: &[u8]) -> (Vec<u8>, usize, Vec<usize>) {
        let mut asm = Assembler::new(options).unwrap();
        let mut l = Label::new();
        let mut sites = Vec::new();
        for (i, &gap) in gaps.iter().enumerate() {
            sites.push(asm.code_size());
            match i % 3 {
                0 => asm.b(&mut l).unwrap(),
                1 => asm.b_cond(Condition::Lt, &mut l).unwrap(),
                _ => asm.tbnz(&mut l, Register::R9, 1).unwrap(),
            }
            for _ in 0..gap {
                asm.nop().unwrap();
            }
        }
        let bound = asm.code_size();
        asm.bind(&mut l).unwrap();
        (asm.into_bytes().unwrap(), bound, sites)
    }

    fn word(code: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]])
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Every one of N forward references resolves to the bind point.
        #[test]
        fn forward_references_resolve(gaps in prop::collection::vec(0u8..16, 0..48)) {
            let (code, bound, sites) = build(opts(), &gaps);
            for site in sites {
                let w = word(&code, site);
                let kind = BranchKind::classify(w).unwrap();
                prop_assert_eq!(site as i64 + kind.field().decode(w), bound as i64);
            }
        }

        /// With far branches on, every near target shrinks back to a single
        /// branch followed by a nop.
        #[test]
        fn far_sites_shrink_when_near(gaps in prop::collection::vec(0u8..16, 1..32)) {
            let (code, bound, sites) = build(opts().with_far_branches(true), &gaps);
            for (i, site) in sites.into_iter().enumerate() {
                let w = word(&code, site);
                let kind = BranchKind::classify(w).unwrap();
                prop_assert_eq!(site as i64 + kind.field().decode(w), bound as i64);
                if i % 3 != 0 {
                    prop_assert_eq!(word(&code, site + 4), 0xD503_201F);
                }
            }
        }

        /// Output does not depend on where the buffer happened to grow.
        #[test]
        fn growth_is_transparent(
            gaps in prop::collection::vec(0u8..64, 0..64),
            capacity in prop::sample::select(vec![64usize, 4096, 5000]),
        ) {
            let (small, ..) = build(opts().with_initial_capacity(capacity), &gaps);
            let (large, ..) = build(opts().with_initial_capacity(1 << 20), &gaps);
            prop_assert_eq!(small, large);
        }
    }
}

#[cfg(feature = "x86_64")]
mod x86_64_labels {
    use super::*;
    use jit_asm::x86_64::{Assembler, Condition, JumpDistance};

    fn build(options: EmitOptions, gaps: &[u8]) -> (Vec<u8>, usize, Vec<usize>) {
        let mut asm = Assembler::new(options).unwrap();
        let mut l = Label::new();
        let mut ends = Vec::new();
        for (i, &gap) in gaps.iter().enumerate() {
            if i % 2 == 0 {
                asm.jmp(&mut l, JumpDistance::Far).unwrap();
            } else {
                asm.j(Condition::from_bits(i as u8), &mut l, JumpDistance::Far)
                    .unwrap();
            }
            ends.push(asm.code_size());
            for _ in 0..gap {
                asm.nop(1).unwrap();
            }
        }
        let bound = asm.code_size();
        asm.bind(&mut l).unwrap();
        (asm.into_bytes().unwrap(), bound, ends)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn forward_references_resolve(gaps in prop::collection::vec(0u8..200, 0..48)) {
            let (code, bound, ends) = build(opts(), &gaps);
            for end in ends {
                let rel = i32::from_le_bytes([code[end - 4], code[end - 3], code[end - 2], code[end - 1]]);
                prop_assert_eq!(end as i64 + rel as i64, bound as i64);
            }
        }

        #[test]
        fn growth_is_transparent(
            gaps in prop::collection::vec(0u8..200, 0..64),
            capacity in prop::sample::select(vec![64usize, 4096, 5000]),
        ) {
            let (small, ..) = build(opts().with_initial_capacity(capacity), &gaps);
            let (large, ..) = build(opts().with_initial_capacity(1 << 20), &gaps);
            prop_assert_eq!(small, large);
        }

        /// A backward branch picks rel8 exactly when it reaches.
        #[test]
        fn backward_picks_shortest(pad in 0usize..300) {
            let mut asm = Assembler::new(opts()).unwrap();
            let mut top = Label::new();
            asm.bind(&mut top).unwrap();
            for _ in 0..pad {
                asm.nop(1).unwrap();
            }
            asm.jmp(&mut top, JumpDistance::Far).unwrap();
            let len = asm.code_size() - pad;
            let short = -(pad as i64 + 2) >= -128;
            prop_assert_eq!(len, if short { 2 } else { 5 });
        }
    }
}
