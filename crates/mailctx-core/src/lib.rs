//! Shared vocabulary for the context engine and response generator:
//! identifiers, records, closed enumerations, error taxonomy and the traits
//! implemented by inference collaborators.

pub mod context;
pub mod errors;
pub mod ids;
pub mod provider;
pub mod response;
pub mod signal;
pub mod template;
pub mod text;
pub mod wire;
