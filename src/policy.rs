//! Allow/block policy evaluation.
//!
//! Given the parent-authored [`PolicyConfig`] and the running
//! [`UsageTimer`], the engine decides whether the current foreground app
//! may run. Rule order is fixed and short-circuiting: blocklist, then time
//! windows, then daily limits; only an allowed app accrues usage credit.

use crate::collector::types::AppId;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// A daily time restriction, in minutes since local midnight.
///
/// `start_minute > end_minute` denotes an overnight window that wraps past
/// midnight (e.g. 1320–360 for 22:00–06:00).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_minute: u32,
    pub end_minute: u32,
    /// Days this window applies to, 0 = Monday .. 6 = Sunday.
    /// `None` means every day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<BTreeSet<u8>>,
}

impl TimeWindow {
    /// Whether the window restricts the given minute on the given weekday.
    pub fn matches(&self, minute_of_day: u32, weekday: u8) -> bool {
        if let Some(ref days) = self.days {
            if !days.contains(&weekday) {
                return false;
            }
        }
        if self.start_minute <= self.end_minute {
            minute_of_day >= self.start_minute && minute_of_day <= self.end_minute
        } else {
            // Overnight wrap.
            minute_of_day >= self.start_minute || minute_of_day <= self.end_minute
        }
    }

    fn is_well_formed(&self) -> bool {
        self.start_minute < 24 * 60 && self.end_minute < 24 * 60
    }
}

/// Parent-authored rules, replaced wholesale on each successful pull.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub blocked_apps: BTreeSet<AppId>,
    #[serde(default)]
    pub time_windows: Vec<TimeWindow>,
    /// Per-app daily limit in minutes.
    #[serde(default)]
    pub daily_limits: BTreeMap<AppId, u32>,
}

/// Per-day, per-app accumulated foreground time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageTimer {
    pub date: NaiveDate,
    /// Accumulated foreground milliseconds per app for `date`.
    #[serde(default)]
    pub per_app: BTreeMap<AppId, u64>,
    /// Last instant each app was seen in the foreground.
    #[serde(default)]
    pub last_seen: BTreeMap<AppId, DateTime<Utc>>,
}

impl UsageTimer {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            per_app: BTreeMap::new(),
            last_seen: BTreeMap::new(),
        }
    }

    /// Reset to empty whenever the stored date is not `today`.
    pub fn roll_date(&mut self, today: NaiveDate) -> bool {
        if self.date != today {
            *self = UsageTimer::new(today);
            true
        } else {
            false
        }
    }

    pub fn accumulated_ms(&self, app: &str) -> u64 {
        self.per_app.get(app).copied().unwrap_or(0)
    }
}

/// Why an app was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Blocklist,
    TimeRestricted,
    LimitExceeded,
    /// Evaluation failed and the engine is configured to fail closed.
    PolicyError,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::Blocklist => "blocklist",
            BlockReason::TimeRestricted => "time_restricted",
            BlockReason::LimitExceeded => "limit_exceeded",
            BlockReason::PolicyError => "policy_error",
        }
    }
}

/// Outcome of one evaluation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block(BlockReason),
}

/// Policy evaluation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// A time window refers to a minute outside 0..1440.
    MalformedWindow { start_minute: u32, end_minute: u32 },
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::MalformedWindow {
                start_minute,
                end_minute,
            } => write!(f, "malformed time window {start_minute}-{end_minute}"),
        }
    }
}

impl std::error::Error for PolicyError {}

/// Instant-in-time inputs for one evaluation.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub now: DateTime<Utc>,
    /// Local calendar date, drives the daily reset.
    pub today: NaiveDate,
    /// Minutes since local midnight.
    pub minute_of_day: u32,
    /// 0 = Monday .. 6 = Sunday.
    pub weekday: u8,
    /// Current foreground app, when the platform can report it.
    pub foreground: Option<AppId>,
}

/// The decision engine. Pure with respect to everything but the passed-in
/// usage timer, which it mutates on Allow.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    /// On evaluation error: allow (true, the documented-but-risky default)
    /// or block (false).
    pub fail_open: bool,
    /// Maximum gap between sightings that still counts as continuous
    /// foreground use.
    pub gap_threshold: Duration,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self {
            fail_open: true,
            gap_threshold: Duration::seconds(10),
        }
    }
}

impl PolicyEngine {
    /// Evaluate one tick, applying the fail-open/fail-closed setting on
    /// evaluation error.
    pub fn decide(
        &self,
        config: &PolicyConfig,
        timer: &mut UsageTimer,
        ctx: &EvalContext,
    ) -> Decision {
        match self.evaluate(config, timer, ctx) {
            Ok(decision) => decision,
            Err(e) if self.fail_open => {
                warn!(error = %e, "policy evaluation failed, failing open to Allow");
                Decision::Allow
            }
            Err(e) => {
                warn!(error = %e, "policy evaluation failed, failing closed to Block");
                Decision::Block(BlockReason::PolicyError)
            }
        }
    }

    fn evaluate(
        &self,
        config: &PolicyConfig,
        timer: &mut UsageTimer,
        ctx: &EvalContext,
    ) -> Result<Decision, PolicyError> {
        // Daily reset comes first so stale accumulation never influences
        // today's decision.
        timer.roll_date(ctx.today);

        // 1. Blocklist dominates everything.
        if let Some(ref app) = ctx.foreground {
            if config.blocked_apps.contains(app) {
                return Ok(Decision::Block(BlockReason::Blocklist));
            }
        }

        // 2. Time windows restrict the device regardless of app.
        for window in &config.time_windows {
            if !window.is_well_formed() {
                return Err(PolicyError::MalformedWindow {
                    start_minute: window.start_minute,
                    end_minute: window.end_minute,
                });
            }
            if window.matches(ctx.minute_of_day, ctx.weekday) {
                return Ok(Decision::Block(BlockReason::TimeRestricted));
            }
        }

        let app = match ctx.foreground {
            Some(ref app) => app,
            None => return Ok(Decision::Allow),
        };

        // 3. Daily limit.
        if let Some(limit_minutes) = config.daily_limits.get(app) {
            let limit_ms = u64::from(*limit_minutes) * 60_000;
            if timer.accumulated_ms(app) >= limit_ms {
                return Ok(Decision::Block(BlockReason::LimitExceeded));
            }
        }

        // 4. Allow; accrue usage. A gap over the threshold means the app
        // was backgrounded, so that interval earns no credit.
        if let Some(last_seen) = timer.last_seen.get(app).copied() {
            let gap = ctx.now - last_seen;
            if gap <= self.gap_threshold && gap > Duration::zero() {
                let ms = gap.num_milliseconds().max(0) as u64;
                *timer.per_app.entry(app.clone()).or_insert(0) += ms;
            }
        }
        timer.last_seen.insert(app.clone(), ctx.now);

        Ok(Decision::Allow)
    }
}
