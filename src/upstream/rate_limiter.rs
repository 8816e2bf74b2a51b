//! Rate limiting for Upstream Protocol Client requests, keyed per request type so that
//! a burst of FIND calls never starves the rarer, higher-stakes BOOK calls.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::config::RateLimitingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Login,
    Find,
    Detail,
    Book,
}

pub struct UpstreamRateLimiter {
    login_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    find_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    detail_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    book_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl UpstreamRateLimiter {
    pub fn new(config: RateLimitingConfig) -> Self {
        let quota = |rpm: u32| {
            Quota::with_period(Duration::from_secs(60) / rpm)
                .unwrap()
                .allow_burst(NonZeroU32::new(config.burst_allowance.max(1)).unwrap())
        };

        Self {
            login_limiter: RateLimiter::direct(quota(config.session_rpm)),
            find_limiter: RateLimiter::direct(quota(config.search_rpm)),
            detail_limiter: RateLimiter::direct(quota(config.metadata_rpm)),
            book_limiter: RateLimiter::direct(quota(config.book_rpm)),
        }
    }

    pub async fn wait_for_permission(&self, request_type: RequestType) {
        let limiter = match request_type {
            RequestType::Login => &self.login_limiter,
            RequestType::Find => &self.find_limiter,
            RequestType::Detail => &self.detail_limiter,
            RequestType::Book => &self.book_limiter,
        };
        limiter.until_ready().await;
    }
}

impl Default for UpstreamRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitingConfig::default())
    }
}
