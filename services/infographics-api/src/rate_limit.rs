use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::RateLimitSettings;
use crate::error::ApiError;

/// Sweep idle clients once the table grows past this many entries, at most
/// once per window.
const SWEEP_THRESHOLD: usize = 4096;

/// Per-client sliding window limiter.
///
/// Each client may make `requests` calls within any `window`. State lives in
/// memory only and is lost on restart.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    table: Mutex<Table>,
    limit: usize,
    window: Duration,
}

struct Table {
    clients: HashMap<IpAddr, VecDeque<Instant>>,
    last_sweep: Instant,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(Table {
                    clients: HashMap::new(),
                    last_sweep: Instant::now(),
                }),
                limit: settings.requests.max(1) as usize,
                window: Duration::from_secs(settings.window_secs.max(1)),
            }),
        }
    }

    pub async fn check(&self, client: IpAddr) -> Result<(), ApiError> {
        self.check_at(client, Instant::now()).await
    }

    async fn check_at(&self, client: IpAddr, now: Instant) -> Result<(), ApiError> {
        let window = self.inner.window;
        let mut table = self.inner.table.lock().await;

        if table.clients.len() > SWEEP_THRESHOLD
            && now.saturating_duration_since(table.last_sweep) >= window
        {
            table.clients.retain(|_, hits| {
                prune(hits, now, window);
                !hits.is_empty()
            });
            table.last_sweep = now;
        }

        let hits = table.clients.entry(client).or_default();
        prune(hits, now, window);

        if hits.len() >= self.inner.limit {
            let oldest = hits.front().copied().unwrap_or(now);
            let retry_after = (oldest + window).saturating_duration_since(now);
            tracing::warn!(client = %client, "rate limit exceeded");
            return Err(ApiError::RateLimited { retry_after });
        }

        hits.push_back(now);
        Ok(())
    }

    #[cfg(test)]
    async fn tracked_clients(&self) -> usize {
        self.inner.table.lock().await.clients.len()
    }

    #[cfg(test)]
    async fn last_sweep(&self) -> Instant {
        self.inner.table.lock().await.last_sweep
    }
}

fn prune(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = hits.front() {
        if now.saturating_duration_since(*oldest) >= window {
            hits.pop_front();
        } else {
            break;
        }
    }
}
