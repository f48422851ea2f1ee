//! Token models: the immutable record, its redacted secrets, and normalized scopes.

pub mod scope;
pub mod token;

pub use scope::*;
pub use token::{record::*, secret::*};
