//! Transport: scheme dispatch, HTTP downloads and repository metadata fetches.

pub mod client;
pub mod metadata;
