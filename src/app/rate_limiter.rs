use anyhow::Result;
use uuid::Uuid;

use crate::config::rate_limits::{current_window, RateAction, RateLimits, RateWindow};
use crate::domain::role::Role;
use crate::infra::cache::RedisCache;

pub struct RateLimitInfo {
    pub limited: bool,
    pub limit: u32,
    pub remaining: u32,
}

#[derive(Clone)]
pub struct RateLimiter {
    cache: RedisCache,
}

fn user_key(user_id: Uuid, action: RateAction, window: RateWindow) -> String {
    format!(
        "ratelimit:{}:{}:{}",
        user_id,
        action.as_str(),
        current_window(window.seconds())
    )
}

fn ip_key(ip: &str, action: &str, window: RateWindow) -> String {
    format!("ratelimit:ip:{}:{}:{}", ip, action, current_window(window.seconds()))
}

impl RateLimiter {
    pub fn new(cache: RedisCache) -> Self {
        Self { cache }
    }

    /// Checks every window that applies to `action` and reports the tightest one.
    pub async fn check(&self, user_id: Uuid, role: Role, action: RateAction) -> Result<RateLimitInfo> {
        let limits = RateLimits::for_role(role);

        let mut min_remaining = u32::MAX;
        let mut effective_limit: u32 = 0;

        for (limit, window) in limits.windows_for(action) {
            // Zero means the role may not perform the action at all; the
            // permission check refuses it with a proper reason.
            if limit == 0 {
                continue;
            }
            let count = self.cache.counter(&user_key(user_id, action, window)).await?;
            let remaining = limit.saturating_sub(count);

            if remaining < min_remaining {
                min_remaining = remaining;
                effective_limit = limit;
            }

            if count >= limit {
                tracing::debug!(
                    user_id = %user_id,
                    action = action.as_str(),
                    window = ?window,
                    count = count,
                    limit = limit,
                    "rate limit exceeded"
                );
                return Ok(RateLimitInfo { limited: true, limit, remaining: 0 });
            }
        }

        Ok(RateLimitInfo {
            limited: false,
            limit: effective_limit,
            remaining: min_remaining,
        })
    }

    pub async fn increment(&self, user_id: Uuid, role: Role, action: RateAction) -> Result<()> {
        for (limit, window) in RateLimits::for_role(role).windows_for(action) {
            if limit == 0 {
                continue;
            }
            self.cache
                .bump_counter(&user_key(user_id, action, window), window.seconds())
                .await?;
        }
        Ok(())
    }

    /// True when `ip` has used up `limit` attempts at `action` in this window.
    pub async fn check_ip(&self, ip: &str, action: &str, limit: u32, window: RateWindow) -> Result<bool> {
        let count = self.cache.counter(&ip_key(ip, action, window)).await?;
        if count >= limit {
            tracing::debug!(ip = ip, action = action, count = count, limit = limit, "IP rate limit exceeded");
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn increment_ip(&self, ip: &str, action: &str, window: RateWindow) -> Result<()> {
        self.cache
            .bump_counter(&ip_key(ip, action, window), window.seconds())
            .await?;
        Ok(())
    }
}
