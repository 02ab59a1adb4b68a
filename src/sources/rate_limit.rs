//! Request spacing for the reasoning endpoint.
//!
//! Hosted chat endpoints meter requests per minute, and a batch run can have
//! several checks waiting on reasoning at once. Waiters queue on a fair lock
//! and the holder sleeps until `min_interval` after the previous send. Only
//! a request that actually leaves the queue records a send time, so a waiter
//! dropped by its deadline or cancellation leaves nothing behind. Other hosts
//! pass through untouched.

use std::borrow::Cow;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use http::Extensions;
use reqwest::Url;
use reqwest_middleware::{Middleware, Next};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::config::{REASONING_BASE_ENV, reasoning_min_interval};
use crate::sources::reasoning::DEFAULT_REASONING_BASE;

#[derive(Debug)]
pub(crate) struct RequestSpacer {
    prefix: Cow<'static, str>,
    min_interval: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl RequestSpacer {
    pub(crate) fn from_env() -> Self {
        Self::new(
            crate::sources::env_base(DEFAULT_REASONING_BASE, REASONING_BASE_ENV),
            reasoning_min_interval(),
        )
    }

    pub(crate) fn new(prefix: Cow<'static, str>, min_interval: Duration) -> Self {
        Self {
            prefix,
            min_interval,
            last_sent: Mutex::new(None),
        }
    }

    fn applies_to(&self, url: &Url) -> bool {
        url.as_str()
            .starts_with(self.prefix.as_ref().trim_end_matches('/'))
    }

    pub(crate) async fn wait_for_url(&self, url: &Url) {
        if !self.applies_to(url) {
            return;
        }
        let mut last_sent = self.last_sent.lock().await;
        if let Some(previous) = *last_sent {
            let ready = previous + self.min_interval;
            let now = Instant::now();
            if ready > now {
                debug!(
                    wait_ms = (ready - now).as_millis() as u64,
                    "Spacing reasoning request"
                );
                sleep_until(ready).await;
            }
        }
        *last_sent = Some(Instant::now());
    }
}

static GLOBAL_SPACER: OnceLock<Arc<RequestSpacer>> = OnceLock::new();

#[derive(Clone, Debug)]
pub(crate) struct RateLimitMiddleware {
    spacer: Arc<RequestSpacer>,
}

impl RateLimitMiddleware {
    pub(crate) fn new() -> Self {
        Self {
            spacer: GLOBAL_SPACER
                .get_or_init(|| Arc::new(RequestSpacer::from_env()))
                .clone(),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        self.spacer.wait_for_url(req.url()).await;
        next.run(req, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAT_URL: &str = "https://llm.example.org/openai/v1/chat/completions";

    fn spacer(prefix: &str, ms: u64) -> RequestSpacer {
        RequestSpacer::new(Cow::Owned(prefix.to_string()), Duration::from_millis(ms))
    }

    async fn wave(spacer: &Arc<RequestSpacer>, waiters: usize, deadline: Duration) -> usize {
        let url = Url::parse(CHAT_URL).unwrap();
        let handles = (0..waiters)
            .map(|_| {
                let spacer = spacer.clone();
                let url = url.clone();
                tokio::spawn(async move {
                    tokio::time::timeout(deadline, spacer.wait_for_url(&url))
                        .await
                        .is_ok()
                })
            })
            .collect::<Vec<_>>();
        let mut reached = 0;
        for handle in handles {
            if handle.await.unwrap() {
                reached += 1;
            }
        }
        reached
    }

    #[test]
    fn only_the_reasoning_prefix_is_spaced() {
        let spacer = spacer("https://llm.example.org/openai/v1/", 500);
        let chat = Url::parse(CHAT_URL).unwrap();
        let other = Url::parse("https://llm.example.org/status").unwrap();

        assert!(spacer.applies_to(&chat));
        assert!(!spacer.applies_to(&other));
    }

    #[tokio::test]
    async fn second_request_waits_for_the_interval() {
        let spacer = spacer("https://llm.example.org/openai/v1", 120);
        let url = Url::parse(CHAT_URL).unwrap();

        let start = Instant::now();
        spacer.wait_for_url(&url).await;
        spacer.wait_for_url(&url).await;

        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn unrelated_hosts_are_not_delayed() {
        let spacer = spacer("https://llm.example.org/openai/v1", 1000);
        let url = Url::parse("http://127.0.0.1:8080/v1/models").unwrap();

        let start = Instant::now();
        for _ in 0..3 {
            spacer.wait_for_url(&url).await;
        }

        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn waiter_dropped_at_its_deadline_does_not_push_back_the_next() {
        let spacer = spacer("https://llm.example.org/openai/v1", 200);
        let url = Url::parse(CHAT_URL).unwrap();

        let start = Instant::now();
        spacer.wait_for_url(&url).await;
        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), spacer.wait_for_url(&url)).await;
        assert!(abandoned.is_err());

        spacer.wait_for_url(&url).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(180));
        assert!(elapsed < Duration::from_millis(350));
    }

    #[tokio::test]
    async fn later_waves_still_get_through_after_timeouts() {
        let spacer = Arc::new(spacer("https://llm.example.org/openai/v1", 25));
        let deadline = Duration::from_millis(250);

        let first = wave(&spacer, 32, deadline).await;
        assert!(first >= 5, "first wave: {first}/32 reached the endpoint");
        assert!(first < 32);

        for round in 0..2 {
            let reached = wave(&spacer, 32, deadline).await;
            assert!(
                reached >= 5,
                "wave {round}: {reached}/32 reached the endpoint after earlier timeouts"
            );
        }
    }
}
