//! Condo Core - shared tenant model, errors and secret storage.
//!
//! Every other crate in the workspace depends on this one for the
//! [`Building`] tenant type, the root [`Error`] and the [`secrets::SecretStore`]
//! seam used to read the API access token.

pub mod buildings;
pub mod errors;
pub mod secrets;

pub use buildings::Building;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
