//! Usage ledger: persisted usage counters across rolling time scopes.
//!
//! [`UsageLedger`] is plain data. Shared access goes through
//! [`LedgerHandle`], which owns the ledger, the quota policy and the pricing
//! table inside a single task.

mod actor;
mod book;
mod clock;
mod estimate;
mod scope;
mod stats;

pub use actor::{LEDGER_KEY, LedgerHandle, LedgerOptions, POLICY_KEY, RecordedUsage};
pub use book::{ResetScope, UsageLedger};
pub use clock::{Clock, ManualClock, PeriodKeys, SystemClock};
pub use estimate::{HeuristicEstimator, TokenEstimator, approximate_token_count};
pub use scope::{
    DailyScope, LifetimeScope, MINUTE_WINDOW, MinuteWindow, ModelUsage, MonthlyScope, ScopeUsage,
    TokenCounts,
};
pub use stats::{Period, PeriodStats, UsagePercentages, UsageStats};
