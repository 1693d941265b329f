use crate::domain::role::Role;

/// Write actions that are throttled per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateAction {
    Thread,
    Comment,
    Like,
    Moderation,
}

impl RateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateAction::Thread => "thread",
            RateAction::Comment => "comment",
            RateAction::Like => "like",
            RateAction::Moderation => "moderation",
        }
    }
}

/// Per-role limits for user actions
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    // Content
    pub threads_per_hour: u32,
    pub threads_per_day: u32,
    pub comments_per_hour: u32,

    // Engagement
    pub likes_per_hour: u32,

    // Moderation
    pub moderation_actions_per_hour: u32,
}

impl RateLimits {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::User => RateLimits {
                threads_per_hour: 5,
                threads_per_day: 20,
                comments_per_hour: 60,
                likes_per_hour: 300,
                moderation_actions_per_hour: 0,
            },
            Role::AdminLevel1 => RateLimits {
                threads_per_hour: 20,
                threads_per_day: 100,
                comments_per_hour: 200,
                likes_per_hour: 1000,
                moderation_actions_per_hour: 300,
            },
            Role::AdminLevel2 => RateLimits {
                threads_per_hour: 50,
                threads_per_day: 200,
                comments_per_hour: 500,
                likes_per_hour: 1000,
                moderation_actions_per_hour: 1000,
            },
        }
    }

    /// Every window that applies to `action`, with its limit.
    pub fn windows_for(&self, action: RateAction) -> Vec<(u32, RateWindow)> {
        match action {
            RateAction::Thread => vec![
                (self.threads_per_hour, RateWindow::Hour),
                (self.threads_per_day, RateWindow::Day),
            ],
            RateAction::Comment => vec![(self.comments_per_hour, RateWindow::Hour)],
            RateAction::Like => vec![(self.likes_per_hour, RateWindow::Hour)],
            RateAction::Moderation => vec![(self.moderation_actions_per_hour, RateWindow::Hour)],
        }
    }
}

/// Time window for rate limiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateWindow {
    Hour,
    Day,
}

impl RateWindow {
    pub fn seconds(&self) -> u64 {
        match self {
            RateWindow::Hour => 3600,
            RateWindow::Day => 86400,
        }
    }
}

/// Index of the fixed window containing the current instant.
pub fn current_window(window_seconds: u64) -> u64 {
    let now = time::OffsetDateTime::now_utc().unix_timestamp().max(0) as u64;
    now / window_seconds
}

/// Per-IP limits for unauthenticated endpoints: (action, limit, window).
pub const IP_LIMIT_LOGIN: (&str, u32, RateWindow) = ("login", 20, RateWindow::Hour);
pub const IP_LIMIT_REGISTER: (&str, u32, RateWindow) = ("register", 10, RateWindow::Hour);
