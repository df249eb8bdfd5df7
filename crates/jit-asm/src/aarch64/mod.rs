//! AArch64 (ARMv8-A, A64) encoder.

mod address;
mod assembler;
mod branch;
mod logical_imm;
mod operand;
mod registers;

pub use address::{Address, AddressMode};
pub use assembler::{Assembler, TRAP};
pub use branch::BranchKind;
pub use logical_imm::LogicalImm;
pub use operand::{Extend, Operand, Shift};
pub use registers::{Condition, OperandSize, Register, R31};
