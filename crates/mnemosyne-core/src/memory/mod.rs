//! Conventions of the memory collection: field names, schema, records and
//! persona/session scoping.

mod record;
mod scope;

pub use record::*;
pub use scope::*;
