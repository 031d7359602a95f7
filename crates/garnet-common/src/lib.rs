//! Shared vocabulary for the Garnet runtime core.
//!
//! - [`symbol`]: interned method/constant names and the [`SymbolTable`]
//! - [`error`]: the [`HierarchyError`] taxonomy raised by hierarchy mutations

pub mod error;
pub mod symbol;

pub use error::{CyclicOperation, HierarchyError};
pub use symbol::{Symbol, SymbolTable};
