//! x86-64 encoder.

mod assembler;
mod operand;
mod registers;

pub use assembler::{AluOp, Assembler, JumpDistance, ShiftOp, TRAP};
pub use operand::{Address, Immediate, Operand};
pub use registers::{ByteRegister, Condition, Register, ScaleFactor};
