//! # jit-asm: machine-code emission for JIT compilers
//!
//! `jit-asm` is the lowest layer of a code generator: it appends encoded
//! instructions to a growable buffer, resolves forward branches to labels
//! through chains threaded in the code itself, and hands the finished bytes
//! to the caller for mapping into executable memory.
//!
//! ## Quick Start
//!
//! ```rust
//! use jit_asm::aarch64::{Assembler, Operand, Register};
//! use jit_asm::{EmitOptions, Label};
//!
//! let mut asm = Assembler::new(EmitOptions::default()).unwrap();
//! let mut skip = Label::new();
//! asm.cbz(&mut skip, Register::R0, jit_asm::aarch64::OperandSize::DoubleWord).unwrap();
//! asm.add(Register::R0, Register::R0, Operand::imm(1).unwrap()).unwrap();
//! asm.bind(&mut skip).unwrap();
//! asm.ret().unwrap();
//!
//! let code = asm.into_bytes().unwrap();
//! assert_eq!(code.len(), 12);
//! ```
//!
//! ## Features
//!
//! - **Two regimes**: x86-64 (`x86_64`) with variable-length instructions
//!   and rel8/rel32 displacements, AArch64 (`aarch64`) with fixed 32-bit
//!   words and imm14/imm19/imm26 fields.
//! - **Offsets, not addresses**: positions survive buffer reallocation.
//! - **Far branches**: AArch64 conditional branches beyond ±1 MiB are
//!   promoted to an inverted guard around an unconditional `b`.
//! - **`no_std` + `alloc`**.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
// ── Pedantic lint policy ─────────────────────────────────────────────────
// Encoders narrow and reinterpret integers between field widths constantly
// (i64→u32, u32→u8) and use dense hex literals for opcodes. The lints
// below are expected in this context.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless,
    clippy::cast_possible_wrap,
    clippy::unreadable_literal,
    clippy::match_same_arms,
    clippy::bool_to_int_with_if,
    clippy::enum_glob_use,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args,
    clippy::doc_markdown,
    clippy::similar_names,
    clippy::too_many_lines,
    clippy::unused_self,
    clippy::many_single_char_names,
    clippy::return_self_not_must_use,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::should_implement_trait
)]

extern crate alloc;

/// Growable code buffer with a trailing write guard.
pub mod buffer;
/// Branch displacement field layouts.
pub mod codec;
/// Error types.
pub mod error;
/// Labels and forward-reference chains.
pub mod label;
/// Per-session emission options.
pub mod options;

/// AArch64 encoder: registers, operands, addresses, assembler.
#[cfg(feature = "aarch64")]
pub mod aarch64;
/// x86-64 encoder: registers, ModR/M operands, assembler.
#[cfg(feature = "x86_64")]
pub mod x86_64;

// Re-exports
pub use buffer::{BufferId, CodeBuffer, EnsureCapacity, GROWTH_CAP, INITIAL_CAPACITY, MINIMUM_GAP};
pub use codec::BranchField;
pub use error::{ArchName, AsmError, ErrorKind};
pub use label::{ExternalLabel, Label};
pub use options::EmitOptions;
