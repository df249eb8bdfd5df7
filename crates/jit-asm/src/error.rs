//! Error types for code emission.

use alloc::string::String;
use core::fmt;

/// The architecture an encoder targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArchName {
    /// 64-bit x86.
    X86_64,
    /// ARMv8-A 64-bit.
    Aarch64,
}

impl fmt::Display for ArchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchName::X86_64 => write!(f, "x86_64"),
            ArchName::Aarch64 => write!(f, "AArch64"),
        }
    }
}

/// Coarse classification of an [`AsmError`].
///
/// A `Contract` error means the caller asked for something no correct code
/// generator would ask for (binding a label twice, an illegal register in a
/// given slot). A `Range` error can happen to a correct caller: a branch that
/// turned out to be too far, or memory exhaustion. Either way the build unit
/// that produced it has to be abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Misuse of the emission API.
    Contract,
    /// A limit was hit by otherwise valid input.
    Range,
}

/// Emission error.
///
/// `offset` fields are byte offsets into the code buffer at which the failing
/// instruction was being emitted or patched.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AsmError {
    /// Invalid register/operand combination for the instruction.
    InvalidOperands {
        /// Description of why the operands are invalid.
        detail: String,
        /// Buffer offset of the instruction, when known.
        offset: Option<usize>,
    },

    /// Immediate value exceeds the allowed range.
    ImmediateOverflow {
        /// The immediate value that overflowed.
        value: i128,
        /// Minimum allowed value.
        min: i128,
        /// Maximum allowed value.
        max: i128,
    },

    /// Offset or displacement does not have the required alignment.
    MisalignedOffset {
        /// The offending value.
        value: i64,
        /// Required alignment in bytes.
        align: u32,
    },

    /// Value has no logical-immediate (bitmask) encoding.
    NotEncodable {
        /// The value that was asked for.
        value: u64,
        /// Operand width in bits (32 or 64).
        width: u32,
    },

    /// Branch displacement does not fit the instruction's field.
    BranchOutOfRange {
        /// The actual displacement to the target.
        disp: i64,
        /// Maximum allowed displacement magnitude.
        max: i64,
        /// Buffer offset of the branch site.
        offset: usize,
    },

    /// A label was bound a second time.
    LabelAlreadyBound {
        /// The position the label was first bound to.
        position: usize,
    },

    /// A label was used with a second code buffer.
    ForeignLabel,

    /// Finalize was attempted while labels still have pending references.
    UnresolvedLabels {
        /// Number of labels with non-empty chains.
        count: usize,
    },

    /// The allocator refused to grow the buffer.
    OutOfMemory {
        /// Requested capacity in bytes.
        requested: usize,
    },

    /// Computed growth did not increase capacity.
    CapacityOverflow {
        /// Capacity at the time of the failed growth.
        capacity: usize,
    },

    /// Destination region handed to finalize is too small.
    DestinationTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes supplied.
        available: usize,
    },
}

impl AsmError {
    /// Shorthand for [`AsmError::InvalidOperands`] outside any instruction.
    pub(crate) fn invalid(detail: impl Into<String>) -> Self {
        AsmError::InvalidOperands {
            detail: detail.into(),
            offset: None,
        }
    }

    /// Shorthand for [`AsmError::InvalidOperands`] at a buffer offset.
    pub(crate) fn invalid_at(detail: impl Into<String>, offset: usize) -> Self {
        AsmError::InvalidOperands {
            detail: detail.into(),
            offset: Some(offset),
        }
    }

    /// Shorthand for a signed range failure.
    pub(crate) fn overflow(value: i64, min: i64, max: i64) -> Self {
        AsmError::ImmediateOverflow {
            value: value as i128,
            min: min as i128,
            max: max as i128,
        }
    }

    /// Whether this error is a caller bug or a reachable limit.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AsmError::InvalidOperands { .. }
            | AsmError::MisalignedOffset { .. }
            | AsmError::NotEncodable { .. }
            | AsmError::LabelAlreadyBound { .. }
            | AsmError::ForeignLabel
            | AsmError::UnresolvedLabels { .. }
            | AsmError::DestinationTooSmall { .. }
            | AsmError::ImmediateOverflow { .. } => ErrorKind::Contract,
            AsmError::BranchOutOfRange { .. }
            | AsmError::OutOfMemory { .. }
            | AsmError::CapacityOverflow { .. } => ErrorKind::Range,
        }
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmError::InvalidOperands {
                detail,
                offset: Some(offset),
            } => {
                write!(f, "{:#x}: invalid operand combination: {}", offset, detail)
            }
            AsmError::InvalidOperands {
                detail,
                offset: None,
            } => {
                write!(f, "invalid operand combination: {}", detail)
            }
            AsmError::ImmediateOverflow { value, min, max } => {
                write!(f, "immediate value {} out of range [{}..{}]", value, min, max)
            }
            AsmError::MisalignedOffset { value, align } => {
                write!(f, "offset {} is not a multiple of {}", value, align)
            }
            AsmError::NotEncodable { value, width } => {
                write!(
                    f,
                    "{:#x} is not encodable as a {}-bit logical immediate",
                    value, width
                )
            }
            AsmError::BranchOutOfRange { disp, max, offset } => {
                write!(
                    f,
                    "{:#x}: branch target out of range (displacement={}, max=±{})",
                    offset, disp, max
                )
            }
            AsmError::LabelAlreadyBound { position } => {
                write!(f, "label already bound at {:#x}", position)
            }
            AsmError::ForeignLabel => {
                write!(f, "label belongs to a different code buffer")
            }
            AsmError::UnresolvedLabels { count } => {
                write!(f, "{} label(s) referenced but never bound", count)
            }
            AsmError::OutOfMemory { requested } => {
                write!(f, "out of memory growing code buffer to {} bytes", requested)
            }
            AsmError::CapacityOverflow { capacity } => {
                write!(f, "code buffer capacity overflow at {} bytes", capacity)
            }
            AsmError::DestinationTooSmall { needed, available } => {
                write!(
                    f,
                    "destination too small: need {} bytes, have {}",
                    needed, available
                )
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AsmError {}
