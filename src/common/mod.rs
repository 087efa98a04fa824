//! Data shared between the compiler and the VM: values, opcodes, and the
//! compiled bytecode representation.

pub mod byte_block;
pub mod opcode;
pub mod value;

pub use byte_block::ByteBlock;
pub use opcode::Opcode;
pub use value::{FunctionObj, Object, Value};
