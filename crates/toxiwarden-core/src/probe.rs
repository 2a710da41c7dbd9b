use crate::error::WardenError;
use crate::model::ProxyRegistry;
use async_trait::async_trait;

/// A single, bounded liveness query against the managed server.
///
/// Implementations fail soft: any network or protocol error means "not
/// alive" and is never surfaced as an error. They must not retry; the
/// supervisor owns the retry policy.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Source of the managed server's authoritative proxy list
#[async_trait]
pub trait ProxySource: Send + Sync {
    async fn fetch_proxies(&self) -> Result<ProxyRegistry, WardenError>;
}
