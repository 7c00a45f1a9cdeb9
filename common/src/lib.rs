// Tonlite common library - main library exports

pub mod crypto;
pub mod hash;
pub mod types;
pub mod validation;

// Flattened re-exports
pub use self::crypto::*;
pub use self::hash::*;
pub use self::types::*;
pub use self::validation::*;
