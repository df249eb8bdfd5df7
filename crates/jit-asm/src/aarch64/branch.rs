//! Classification and rewriting of already-emitted AArch64 branch words.
//!
//! Bind has to patch words it did not keep any side record of, so it
//! recognises each site from the instruction bits alone.

use super::registers::Condition;
use crate::codec::BranchField;

/// `b #0`.
pub(crate) const B: u32 = 0x1400_0000;
/// `bl #0`.
pub(crate) const BL: u32 = 0x9400_0000;
/// `b.<cond> #0`, condition in bits 3:0.
pub(crate) const B_COND: u32 = 0x5400_0000;
/// `cbz <rt>, #0`; bit 24 set gives `cbnz`.
pub(crate) const CBZ: u32 = 0x3400_0000;
/// `tbz <rt>, #bit, #0`; bit 24 set gives `tbnz`.
pub(crate) const TBZ: u32 = 0x3600_0000;
/// `nop`.
pub(crate) const NOP: u32 = 0xD503_201F;

const OP_BIT: u32 = 1 << 24;

/// The four PC-relative branch families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    /// `B`/`BL`, imm26.
    Unconditional,
    /// `B.cond`, imm19.
    Conditional,
    /// `CBZ`/`CBNZ`, imm19.
    CompareAndBranch,
    /// `TBZ`/`TBNZ`, imm14.
    TestAndBranch,
}

impl BranchKind {
    /// Recognise the family of an emitted word.
    pub fn classify(word: u32) -> Option<BranchKind> {
        if word & 0x7C00_0000 == B {
            Some(BranchKind::Unconditional)
        } else if word & 0xFF00_0010 == B_COND {
            Some(BranchKind::Conditional)
        } else if word & 0x7E00_0000 == CBZ {
            Some(BranchKind::CompareAndBranch)
        } else if word & 0x7E00_0000 == TBZ {
            Some(BranchKind::TestAndBranch)
        } else {
            None
        }
    }

    /// Displacement field used by the family.
    pub const fn field(self) -> BranchField {
        match self {
            BranchKind::Unconditional => BranchField::Imm26,
            BranchKind::Conditional | BranchKind::CompareAndBranch => BranchField::Imm19,
            BranchKind::TestAndBranch => BranchField::Imm14,
        }
    }
}

/// Condition of a `B.cond` word.
#[inline]
pub(crate) fn condition(word: u32) -> Condition {
    Condition::from_bits(word & 0xF)
}

/// Replace the condition of a `B.cond` word.
#[inline]
pub(crate) fn with_condition(word: u32, cond: Condition) -> u32 {
    (word & !0xF) | cond as u32
}

/// Flip the sense of a conditional branch: the condition of `B.cond`, or
/// zero/non-zero and clear/set for the compare and test families.
///
/// Returns `word` unchanged for anything else.
pub(crate) fn invert(word: u32) -> u32 {
    match BranchKind::classify(word) {
        Some(BranchKind::Conditional) => with_condition(word, condition(word).invert()),
        Some(BranchKind::CompareAndBranch | BranchKind::TestAndBranch) => word ^ OP_BIT,
        Some(BranchKind::Unconditional) | None => word,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_families() {
        assert_eq!(BranchKind::classify(B), Some(BranchKind::Unconditional));
        assert_eq!(BranchKind::classify(BL | 5), Some(BranchKind::Unconditional));
        assert_eq!(
            BranchKind::classify(B_COND | Condition::Ne as u32),
            Some(BranchKind::Conditional)
        );
        // cbnz x0 (sf=1)
        assert_eq!(
            BranchKind::classify(0xB500_0000),
            Some(BranchKind::CompareAndBranch)
        );
        // tbnz w3, #2
        assert_eq!(
            BranchKind::classify(0x3710_0003),
            Some(BranchKind::TestAndBranch)
        );
        assert_eq!(BranchKind::classify(NOP), None);
        // ret
        assert_eq!(BranchKind::classify(0xD65F_03C0), None);
    }

    #[test]
    fn fields() {
        assert_eq!(BranchKind::Unconditional.field(), BranchField::Imm26);
        assert_eq!(BranchKind::Conditional.field(), BranchField::Imm19);
        assert_eq!(BranchKind::CompareAndBranch.field(), BranchField::Imm19);
        assert_eq!(BranchKind::TestAndBranch.field(), BranchField::Imm14);
    }

    #[test]
    fn invert_each_family() {
        let beq = B_COND | Condition::Eq as u32;
        assert_eq!(condition(invert(beq)), Condition::Ne);
        assert_eq!(invert(invert(beq)), beq);
        assert_eq!(invert(CBZ | 7), CBZ | OP_BIT | 7);
        assert_eq!(invert(TBZ | OP_BIT), TBZ);
        assert_eq!(invert(B), B);
    }

    #[test]
    fn invert_preserves_displacement() {
        let word = BranchField::Imm19
            .encode(-64, B_COND | Condition::Gt as u32)
            .unwrap();
        let inverted = invert(word);
        assert_eq!(condition(inverted), Condition::Le);
        assert_eq!(BranchField::Imm19.decode(inverted), -64);
    }
}
