//! Newsboard - A single-page RSS reader
//!
//! This crate keeps a user-editable list of feed sources in a local key-value
//! store and shows each feed's latest items side by side. Feeds are fetched
//! through third-party relay services, falling back from a JSON-converting
//! proxy to a raw pass-through proxy.

pub mod config;
pub mod fetcher;
pub mod routes;
pub mod slots;
pub mod sources;
pub mod storage;
