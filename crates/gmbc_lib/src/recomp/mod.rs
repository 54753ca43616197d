//! Text to bytecode: tokenizer, parser and the two-pass assembler.

pub mod assembler;
pub mod parser;
pub mod tokenizer;
