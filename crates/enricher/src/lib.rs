mod holder_count;
mod http_utils;
mod rate_limit;
mod rpc;

use std::fmt;
use walletscan_core_types::{EnrichmentMetrics, WalletKey};

pub use holder_count::HolderCountEnricher;
pub use http_utils::redacted_endpoint_label;
pub use rate_limit::TokenBucketLimiter;
pub use rpc::{parse_hex_quantity, wei_to_eth, RpcActivityEnricher, TRANSFER_CATEGORIES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichErrorKind {
    Transport,
    Timeout,
    HttpStatus,
    Rpc,
    Decode,
    NotFound,
}

impl EnrichErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::HttpStatus => "http_status",
            Self::Rpc => "rpc",
            Self::Decode => "decode",
            Self::NotFound => "not_found",
        }
    }
}

/// Failure to enrich a single key. Never fatal for a run: the driver records
/// it as an `error` result and moves on.
#[derive(Debug, Clone)]
pub struct EnrichError {
    pub kind: EnrichErrorKind,
    pub detail: String,
}

impl EnrichError {
    pub fn new(kind: EnrichErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn decode(detail: impl Into<String>) -> Self {
        Self::new(EnrichErrorKind::Decode, detail)
    }
}

impl fmt::Display for EnrichError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.detail)
    }
}

impl std::error::Error for EnrichError {}

/// Looks up the metrics of one key. Implementations may block; the driver
/// calls them from a blocking thread one key at a time.
pub trait Enricher {
    fn fetch(&self, key: &WalletKey) -> std::result::Result<EnrichmentMetrics, EnrichError>;
}

impl<T: Enricher + ?Sized> Enricher for &T {
    fn fetch(&self, key: &WalletKey) -> std::result::Result<EnrichmentMetrics, EnrichError> {
        (**self).fetch(key)
    }
}

impl<T: Enricher + ?Sized> Enricher for Box<T> {
    fn fetch(&self, key: &WalletKey) -> std::result::Result<EnrichmentMetrics, EnrichError> {
        (**self).fetch(key)
    }
}
