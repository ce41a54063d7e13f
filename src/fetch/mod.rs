// src/fetch/mod.rs

//! Paginated retrieval of the remote OData dataset.

pub mod odata;
pub mod retry;
pub mod strategy;

pub use odata::{dataset_url, Fetcher, RawRecord};
pub use retry::{Backoff, RetryPolicy};
pub use strategy::{FetchStrategy, HttpTransport, Transport};
