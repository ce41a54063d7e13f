// src/error.rs

//! Error taxonomy for the fetch → normalize → build → verify pipeline.
//!
//! Fetch and schema failures abort a run. Parse failures only exclude the
//! offending row. Verification mismatches are not errors at all; they travel
//! as data in the report.

use std::fmt;

use thiserror::Error;

use crate::fetch::FetchStrategy;

/// Outcome of a single HTTP attempt that did not yield a body.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Other { url: String, message: String },
}

impl TransportError {
    /// Classify a reqwest failure for `url`.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let url = url.to_string();
        if err.is_timeout() {
            Self::Timeout { url }
        } else if err.is_connect() {
            Self::Connect {
                url,
                message: error_chain(&err),
            }
        } else if let Some(status) = err.status() {
            Self::Status {
                url,
                status: status.as_u16(),
            }
        } else {
            Self::Other {
                url,
                message: error_chain(&err),
            }
        }
    }

    /// Timeouts, connection failures, 5xx, 408 and 429 are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connect { .. } | Self::Other { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
        }
    }
}

/// Flatten a source chain so TLS resets and similar low-level causes show up.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(src) = cur {
        out.push_str(": ");
        out.push_str(&src.to_string());
        cur = src.source();
    }
    out
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("building {strategy} HTTP client")]
    Client {
        strategy: FetchStrategy,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid URL {url:?}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("{url} still failing after {attempts} attempts")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("{url} rejected the request")]
    Rejected {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("malformed page from {url} after {attempts} attempts; body starts {snippet:?}")]
    MalformedPage {
        url: String,
        attempts: u32,
        snippet: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("pagination loop: continuation {url} was already fetched")]
    PaginationLoop { url: String },

    #[error("primary fetch failed ({primary}); fallback fetch failed too")]
    AllStrategiesFailed {
        primary: Box<FetchError>,
        #[source]
        fallback: Box<FetchError>,
    },
}

/// A relevant row that cannot be turned into a `NormalizedRow`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("field {field} is missing")]
    MissingField { field: String },

    #[error("field {field} is not text: {value}")]
    NotText { field: String, value: String },

    #[error("period {period:?} is not an annual period (expected YYYYJJ00)")]
    Period { period: String },

    #[error("field {field} holds non-numeric value {value}")]
    Number { field: String, value: String },
}

/// The fetched payload does not carry the columns the resolver is pinned to.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("fetched payload is empty; nothing to resolve")]
    EmptyPayload,

    #[error("column {column} absent from fetched payload (first seen missing in record {index})")]
    MissingColumn { column: String, index: usize },
}

/// Pipeline stage, used to tell the operator where a run died.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Resolve,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Fetch => "fetch",
            Stage::Resolve => "resolve",
            Stage::Export => "export",
        })
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch stage failed")]
    Fetch(#[from] FetchError),

    #[error("resolve stage failed")]
    Schema(#[from] SchemaError),

    #[error("export stage failed")]
    Export(#[source] anyhow::Error),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Fetch(_) => Stage::Fetch,
            Self::Schema(_) => Stage::Resolve,
            Self::Export(_) => Stage::Export,
        }
    }
}
