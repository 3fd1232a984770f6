//! Layered warehouse for time-stamped football match records.
//!
//! Records land append-only in a raw buffer, merge idempotently into a
//! cleaned `matches` table behind a monotonic per-(source, entity)
//! watermark, and feed a fully recomputed trailing-form gold table. Every
//! load attempt is audited. Extraction, scheduling and presentation live
//! outside this crate.

pub mod audit;
pub mod clean;
pub mod config;
pub mod error;
pub mod feed;
pub mod form;
pub mod http_feed;
pub mod load;
pub mod warehouse;
pub mod watermark;
