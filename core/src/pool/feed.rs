//! Yield/market value feed.
//!
//! The vault only consumes `pool_value`; the APY is passed through for
//! display. Reads degrade to the last known quote for a bounded time, writes
//! (the authority's `UpdatePoolValue`) never use a cached quote.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::clock::SharedClock;
use crate::error::IntegrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YieldQuote {
    pub apy_bps: u64,
    pub pool_value: u64,
}

#[async_trait]
pub trait YieldFeed: Send + Sync {
    async fn quote(&self) -> Result<YieldQuote, IntegrationError>;

    async fn current_apy_bps(&self) -> Result<u64, IntegrationError> {
        Ok(self.quote().await?.apy_bps)
    }

    async fn pool_value(&self) -> Result<u64, IntegrationError> {
        Ok(self.quote().await?.pool_value)
    }
}

/// Fixed quote, adjustable at runtime. Used in dev mode and tests.
#[derive(Debug, Default)]
pub struct StaticYieldFeed {
    apy_bps: AtomicU64,
    pool_value: AtomicU64,
}

impl StaticYieldFeed {
    pub fn new(quote: YieldQuote) -> Self {
        Self {
            apy_bps: AtomicU64::new(quote.apy_bps),
            pool_value: AtomicU64::new(quote.pool_value),
        }
    }

    pub fn set(&self, quote: YieldQuote) {
        self.apy_bps.store(quote.apy_bps, Ordering::SeqCst);
        self.pool_value.store(quote.pool_value, Ordering::SeqCst);
    }
}

#[async_trait]
impl YieldFeed for StaticYieldFeed {
    async fn quote(&self) -> Result<YieldQuote, IntegrationError> {
        Ok(YieldQuote {
            apy_bps: self.apy_bps.load(Ordering::SeqCst),
            pool_value: self.pool_value.load(Ordering::SeqCst),
        })
    }
}

/// `GET <url>` returning `{ "apy_bps": .., "pool_value": .. }`.
pub struct HttpYieldFeed {
    url: String,
    client: reqwest::Client,
}

impl HttpYieldFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, IntegrationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntegrationError::FeedUnavailable(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl YieldFeed for HttpYieldFeed {
    async fn quote(&self) -> Result<YieldQuote, IntegrationError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| IntegrationError::FeedUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IntegrationError::FeedUnavailable(format!(
                "feed returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| IntegrationError::FeedUnavailable(format!("bad feed response: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedReading {
    pub quote: YieldQuote,
    pub observed_at: i64,
    /// Served from the last good quote because the feed is down.
    pub stale: bool,
}

/// Remembers the last good quote for read paths.
pub struct CachedFeed<F> {
    inner: F,
    clock: SharedClock,
    max_staleness_secs: i64,
    last: Mutex<Option<(YieldQuote, i64)>>,
}

impl<F: YieldFeed> CachedFeed<F> {
    pub fn new(inner: F, clock: SharedClock, max_staleness_secs: u64) -> Self {
        Self {
            inner,
            clock,
            max_staleness_secs: i64::try_from(max_staleness_secs).unwrap_or(i64::MAX),
            last: Mutex::new(None),
        }
    }

    /// Fresh quote, for write paths. Never falls back.
    pub async fn fresh(&self) -> Result<YieldQuote, IntegrationError> {
        let quote = self.inner.quote().await?;
        *self.last.lock().await = Some((quote, self.clock.now()));
        Ok(quote)
    }

    pub async fn read(&self) -> Result<FeedReading, IntegrationError> {
        let now = self.clock.now();
        match self.inner.quote().await {
            Ok(quote) => {
                *self.last.lock().await = Some((quote, now));
                Ok(FeedReading {
                    quote,
                    observed_at: now,
                    stale: false,
                })
            }
            Err(e) => {
                let Some((quote, at)) = *self.last.lock().await else {
                    return Err(e);
                };
                let age_secs = now.saturating_sub(at);
                if age_secs > self.max_staleness_secs {
                    return Err(IntegrationError::StaleFeed { age_secs });
                }
                warn!(error = %e, age_secs, "yield feed down, serving last quote");
                Ok(FeedReading {
                    quote,
                    observed_at: at,
                    stale: true,
                })
            }
        }
    }
}

/// Writes through a cached feed always take a fresh quote.
#[async_trait]
impl<F: YieldFeed> YieldFeed for CachedFeed<F> {
    async fn quote(&self) -> Result<YieldQuote, IntegrationError> {
        self.fresh().await
    }
}
