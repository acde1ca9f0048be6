//! Core types for mnemosyne.

mod filter;
mod schema;

pub use filter::*;
pub use schema::*;
