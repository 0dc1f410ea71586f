use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::lead::Channel;
use crate::errors::StepError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Daily send allowance for one sending account on one channel. The cap is
/// applied at reservation time, so the counter can never exceed it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBudget {
    pub account: AccountId,
    pub channel: Channel,
    pub sent_today: u32,
    pub daily_cap: u32,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub window_day: NaiveDate,
}

impl ChannelBudget {
    pub fn new(account: AccountId, channel: Channel, daily_cap: u32, today: NaiveDate) -> Self {
        Self { account, channel, sent_today: 0, daily_cap, last_sent_at: None, window_day: today }
    }

    /// Reset the counter when the window day has passed.
    pub fn roll_window(&mut self, today: NaiveDate) {
        if today != self.window_day {
            self.window_day = today;
            self.sent_today = 0;
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.sent_today < self.daily_cap
    }

    /// Reserve one send slot. Rolls the window first, then checks the cap.
    pub fn reserve(&mut self, now: DateTime<Utc>) -> Result<(), StepError> {
        self.roll_window(now.date_naive());
        if !self.has_capacity() {
            return Err(StepError::BudgetExceeded {
                account: self.account.0.clone(),
                cap: self.daily_cap,
            });
        }
        self.sent_today += 1;
        self.last_sent_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{AccountId, ChannelBudget};
    use crate::domain::lead::Channel;
    use crate::errors::StepError;

    fn budget(cap: u32) -> ChannelBudget {
        ChannelBudget::new(
            AccountId("outbox-1".to_string()),
            Channel::Email,
            cap,
            Utc::now().date_naive(),
        )
    }

    #[test]
    fn reservations_stop_at_the_cap() {
        let mut budget = budget(2);
        let now = Utc::now();

        budget.reserve(now).expect("first slot");
        budget.reserve(now).expect("second slot");
        let error = budget.reserve(now).expect_err("third must be rejected");

        assert!(matches!(error, StepError::BudgetExceeded { cap: 2, .. }));
        assert_eq!(budget.sent_today, 2);
    }

    #[test]
    fn day_rollover_resets_the_counter() {
        let mut budget = budget(1);
        let yesterday = Utc::now() - Duration::days(1);
        budget.window_day = yesterday.date_naive();
        budget.sent_today = 1;

        budget.reserve(Utc::now()).expect("fresh window has capacity");
        assert_eq!(budget.sent_today, 1);
        assert_eq!(budget.window_day, Utc::now().date_naive());
    }
}
