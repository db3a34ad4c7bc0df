//! 3.11 bytecode: opcodes, the raw encoder and the packed code unit.

pub mod code_unit;
pub mod encoder;
pub mod exception_table;
pub mod opcode;

pub use code_unit::{CodeFlags, CodeUnit, ConstKey, Constant};
pub use encoder::{CodeHeader, Encoder, EncoderState, Pool, extended_arg_count};
pub use exception_table::{ExceptionEntry, decode_table, decode_varint, encode_table, encode_varint};
pub use opcode::{BinaryOpArg, CompareOpArg, Opcode, make_function};
