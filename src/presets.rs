//! The reference tier set.
//!
//! Three tiers, broadest first:
//!
//! - `global_limit`: every caller combined, per day
//! - `minute_limit`: every caller combined, per minute
//! - `user_limit`: one caller, per day
//!
//! ```rust
//! use quotagate::presets;
//!
//! let tiers = presets::reference_tiers(1_000, 30, 50).unwrap();
//! let ids: Vec<_> = tiers.iter().map(|t| t.id().as_str()).collect();
//! assert_eq!(ids, ["global_limit", "minute_limit", "user_limit"]);
//! ```

use crate::tier::{RateLimitTier, TierError};
use std::time::Duration;

pub const GLOBAL_DAILY: &str = "global_limit";
pub const GLOBAL_MINUTE: &str = "minute_limit";
pub const PER_CALLER_DAILY: &str = "user_limit";

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);
pub const MINUTE: Duration = Duration::from_secs(60);

/// Global daily, global per-minute, then per-caller daily.
pub fn reference_tiers(
    global_daily: u64,
    per_minute: u64,
    per_caller_daily: u64,
) -> Result<Vec<RateLimitTier>, TierError> {
    Ok(vec![
        RateLimitTier::global(GLOBAL_DAILY, global_daily, DAY)?
            .with_message("The service has reached its daily request limit. Please try again tomorrow."),
        RateLimitTier::global(GLOBAL_MINUTE, per_minute, MINUTE)?
            .with_message("The service is receiving too many requests. Please wait a minute and try again."),
        RateLimitTier::per_caller(PER_CALLER_DAILY, per_caller_daily, DAY)?
            .with_message("You have reached your daily request limit. Please try again tomorrow."),
    ])
}
