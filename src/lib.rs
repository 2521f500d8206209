//! Tarn: a small dynamically-typed scripting language.
//!
//! The pipeline: [`preprocess`] resolves `include` directives and builds
//! a line map back to the original files, [`token`] lexes, [`parser`]
//! builds the AST, and then either [`eval`] interprets the program
//! directly or [`emit`] lowers it to a register-style textual IR for an
//! external assembler.

pub mod span;

pub mod error;

#[macro_use]
pub mod token;

pub mod ast;
pub mod parser;
pub mod preprocess;

pub mod env;
pub mod rt;

pub mod emit;
pub mod eval;

use preprocess::Source;

/// Lex and parse a preprocessed source into a program.
pub fn parse(source: &Source) -> error::Result<ast::Program> {
    let tokens = token::tokenize(source.text());
    parser::parse(&tokens, source)
}
