//! Data transfer objects shared by the client engine and the reference server.

pub mod health;
pub mod requests;
pub mod snapshot;
pub mod validation;
