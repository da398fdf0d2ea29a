//! Core traits for authentication and template resolution.

mod identity;
mod variables;

pub use identity::IdentityProvider;
pub use variables::VariableSource;
