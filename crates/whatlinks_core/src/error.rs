//! Error types for backlink queries.
//!
//! The engine reports failures through [`BacklinkError`]; the application
//! layers (config, runtime, indexer) keep using `anyhow`.

use thiserror::Error;

use crate::model::LinkEdge;

pub type BoxedSourceError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum BacklinkError {
    /// Cursor token could not be parsed. Callers treat this as "first page".
    #[error("invalid cursor token: {0:?}")]
    InvalidCursor(String),

    /// Page size outside the accepted range, rejected before planning.
    #[error("limit {limit} is out of range (expected 1..={max})")]
    LimitOutOfRange { limit: usize, max: usize },

    /// A scan against the backing store failed; the whole request is aborted.
    #[error("data source unavailable while scanning {edge}")]
    DataSourceUnavailable {
        edge: LinkEdge,
        #[source]
        source: BoxedSourceError,
    },

    /// A page lookup against the backing store failed.
    #[error("data source unavailable while looking up page {page_id}")]
    PageLookupFailed {
        page_id: i64,
        #[source]
        source: BoxedSourceError,
    },

    #[error("data source unavailable while listing page namespaces")]
    NamespaceLookupFailed {
        #[source]
        source: BoxedSourceError,
    },

    #[error("backlink query cancelled")]
    Cancelled,
}

impl BacklinkError {
    pub fn data_source<E>(edge: LinkEdge, error: E) -> Self
    where
        E: Into<BoxedSourceError>,
    {
        Self::DataSourceUnavailable {
            edge,
            source: error.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
