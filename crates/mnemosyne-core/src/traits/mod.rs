//! Core traits for mnemosyne backends.

mod vector_database;

pub use vector_database::*;
