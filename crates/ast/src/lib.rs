//! Parse-tree adapter for the Quarry compiler.
//!
//! Architecture role:
//! - uniform access to token kind, children, text, and source location on
//!   parse-tree nodes produced by the (external) parser
//! - canonical structural text used for expression deduplication
//! - constructors for every tree shape the compiler consumes
//!
//! Key modules:
//! - [`token`]
//! - [`node`]
//! - [`build`]

pub mod build;
pub mod node;
pub mod token;

pub use node::AstNode;
pub use token::TokenKind;
