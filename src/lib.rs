//! Browse and join a game's private servers.
//!
//! The listing API is paginated by opaque cursors and rate limited. Two scans
//! run against it: a full walk that aggregates occupancy totals, and a browse
//! scan that shows one page at a time. Both replay their exact request after
//! an HTTP 429.

pub mod backoff;
pub mod cache;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod handlers;
pub mod join;
pub mod models;
pub mod occupancy;
pub mod pager;
pub mod state;
pub mod store;
pub mod totals;

#[cfg(test)]
mod testing;
