//! Core types and trait definitions for the feedsync subscription store.
//!
//! This crate is deliberately free of database dependencies. Backends
//! implement [`store::FeedStore`]; callers depend on that abstraction.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod content;
pub mod error;
pub mod feed;
pub mod store;
pub mod subscription;
pub mod sync;

pub use error::{Error, Result};
