//! Asynchronous eKYC job pipeline.
//!
//! Clients submit face-match and OCR jobs over previously uploaded images.
//! Submissions are deduplicated by fingerprint, persisted in PostgreSQL and
//! queued on Redis; workers run the operation and record a terminal status
//! that clients poll for.

pub mod app_state;
pub mod auth;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;
