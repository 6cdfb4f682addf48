#![forbid(unsafe_code)]

//! Building blocks for the `tiktok_dl` archiver: metadata lookups against the
//! RapidAPI TikTok service, the per-author download ledger, and the
//! download -> repackage -> tag pipeline that turns one post into one archived
//! file.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod interrupt;
pub mod ledger;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod resolver;
pub mod service;
#[cfg(test)]
mod test_support;
pub mod tools;
pub mod walker;
