//! Rate-limited channel dispatch. Every outbound send passes through here:
//! blacklist re-check, daily budget reservation and anti-automation jitter
//! run under a per-account lock so sends from one account are serialized
//! while distinct accounts proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use leadflow_core::domain::budget::{AccountId, ChannelBudget};
use leadflow_core::domain::lead::{Channel, LeadId};
use leadflow_core::errors::StepError;
use leadflow_db::repositories::{BudgetRepository, LeadRepository, RepositoryError};

use crate::capability::Capability;

pub struct ChannelDispatcher {
    leads: Arc<dyn LeadRepository>,
    budgets: Arc<dyn BudgetRepository>,
    daily_cap: u32,
    jitter_min: Duration,
    jitter_max: Duration,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChannelDispatcher {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        budgets: Arc<dyn BudgetRepository>,
        daily_cap: u32,
        jitter_min: Duration,
        jitter_max: Duration,
    ) -> Self {
        Self { leads, budgets, daily_cap, jitter_min, jitter_max, locks: Mutex::new(HashMap::new()) }
    }

    async fn account_lock(&self, account: &AccountId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(account.0.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn jitter_delay(&self) -> Duration {
        if self.jitter_max.is_zero() {
            return Duration::ZERO;
        }
        let min_ms = self.jitter_min.as_millis() as u64;
        let max_ms = self.jitter_max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }

    /// Deliver one message through `capability`. The budget counter moves
    /// only after the send succeeded, so a failed provider call never burns
    /// a slot; the cap check happens before the send, so the counter can
    /// never exceed the cap.
    pub async fn dispatch(
        &self,
        account: &AccountId,
        channel: Channel,
        lead_id: &LeadId,
        capability: Arc<dyn Capability>,
        payload: Value,
    ) -> Result<Value, StepError> {
        let lock = self.account_lock(account).await;
        let _guard = lock.lock().await;

        let mut lead = self
            .leads
            .find_by_id(lead_id)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| StepError::Fatal(format!("unknown lead `{lead_id}`")))?;
        if lead.blacklisted {
            return Err(StepError::LeadBlacklisted(lead.id.clone()));
        }

        let now = Utc::now();
        let mut budget = self
            .budgets
            .find(account, channel)
            .await
            .map_err(repository_error)?
            .unwrap_or_else(|| {
                ChannelBudget::new(account.clone(), channel, self.daily_cap, now.date_naive())
            });

        budget.roll_window(now.date_naive());
        if !budget.has_capacity() {
            return Err(StepError::BudgetExceeded {
                account: account.0.clone(),
                cap: budget.daily_cap,
            });
        }

        // Space sends out relative to this account's previous one.
        if let Some(last_sent_at) = budget.last_sent_at {
            let delay = self.jitter_delay();
            let elapsed = (now - last_sent_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed < delay {
                let wait = delay - elapsed;
                debug!(account = %account, wait_ms = wait.as_millis() as u64, "jitter delay");
                tokio::time::sleep(wait).await;
            }
        }

        let output = capability.invoke(payload).await.map_err(StepError::from)?;

        budget.reserve(Utc::now())?;
        self.budgets.save(budget.clone()).await.map_err(repository_error)?;

        lead.record_send(channel);
        self.leads.save(lead).await.map_err(repository_error)?;

        info!(
            account = %account,
            channel = channel.as_str(),
            lead = %lead_id,
            sent_today = budget.sent_today,
            cap = budget.daily_cap,
            "message dispatched"
        );

        Ok(output)
    }
}

fn repository_error(error: RepositoryError) -> StepError {
    StepError::Transient(error.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};

    use leadflow_core::domain::budget::AccountId;
    use leadflow_core::domain::lead::{Channel, Contact, Lead, LeadId};
    use leadflow_core::errors::StepError;
    use leadflow_db::repositories::{
        BudgetRepository, InMemoryBudgetRepository, InMemoryLeadRepository, LeadRepository,
    };

    use super::ChannelDispatcher;
    use crate::capability::{Capability, CapabilityError, CapabilityKind};

    struct CountingSender {
        sends: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Capability for CountingSender {
        fn name(&self) -> &str {
            "send_email"
        }

        fn kind(&self) -> CapabilityKind {
            CapabilityKind::Send
        }

        async fn invoke(&self, _input: Value) -> Result<Value, CapabilityError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"delivered": true}))
        }
    }

    async fn dispatcher_with_jitter(
        cap: u32,
        jitter_min: Duration,
        jitter_max: Duration,
    ) -> (Arc<ChannelDispatcher>, Arc<InMemoryLeadRepository>, Arc<InMemoryBudgetRepository>) {
        let leads = Arc::new(InMemoryLeadRepository::default());
        let budgets = Arc::new(InMemoryBudgetRepository::default());
        let dispatcher = Arc::new(ChannelDispatcher::new(
            leads.clone(),
            budgets.clone(),
            cap,
            jitter_min,
            jitter_max,
        ));
        (dispatcher, leads, budgets)
    }

    async fn dispatcher_with_cap(
        cap: u32,
    ) -> (Arc<ChannelDispatcher>, Arc<InMemoryLeadRepository>, Arc<InMemoryBudgetRepository>) {
        dispatcher_with_jitter(cap, Duration::from_secs(1), Duration::from_secs(2)).await
    }

    async fn seed_lead(leads: &InMemoryLeadRepository, id: &str) -> LeadId {
        let lead = Lead::new(LeadId(id.to_string()), "Acme Pumps", Contact::default());
        let lead_id = lead.id.clone();
        leads.save(lead).await.expect("save lead");
        lead_id
    }

    #[tokio::test(start_paused = true)]
    async fn cap_rejects_the_next_send_and_counter_never_exceeds_it() {
        let (dispatcher, leads, budgets) = dispatcher_with_cap(1).await;
        let lead_id = seed_lead(&leads, "L-1").await;
        let account = AccountId("outbox-1".to_string());
        let sender = Arc::new(CountingSender { sends: AtomicU32::new(0) });

        dispatcher
            .dispatch(&account, Channel::Email, &lead_id, sender.clone(), json!({}))
            .await
            .expect("first send fits the cap");

        let error = dispatcher
            .dispatch(&account, Channel::Email, &lead_id, sender.clone(), json!({}))
            .await
            .expect_err("second send must be rejected");

        assert!(matches!(error, StepError::BudgetExceeded { cap: 1, .. }));
        assert_eq!(sender.sends.load(Ordering::SeqCst), 1);

        let budget =
            budgets.find(&account, Channel::Email).await.expect("find").expect("present");
        assert_eq!(budget.sent_today, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn a_second_send_on_the_same_account_waits_out_the_jitter_window() {
        let (dispatcher, leads, _budgets) =
            dispatcher_with_jitter(5, Duration::from_secs(30), Duration::from_secs(60)).await;
        let first = seed_lead(&leads, "L-1").await;
        let second = seed_lead(&leads, "L-2").await;
        let account = AccountId("outbox-1".to_string());
        let sender = Arc::new(CountingSender { sends: AtomicU32::new(0) });

        dispatcher
            .dispatch(&account, Channel::Email, &first, sender.clone(), json!({}))
            .await
            .expect("first send goes out immediately");

        let before = tokio::time::Instant::now();
        dispatcher
            .dispatch(&account, Channel::Email, &second, sender.clone(), json!({}))
            .await
            .expect("second send");
        let waited = before.elapsed();

        // The sampled delay is shortened by the wall-clock time since the
        // first send, which under the paused clock is only scheduling
        // overhead; hence the one second margin on the lower bound.
        assert!(
            waited >= Duration::from_secs(29),
            "second send must wait out the jitter window, waited {waited:?}"
        );
        assert!(
            waited <= Duration::from_secs(61),
            "jitter never exceeds the configured maximum, waited {waited:?}"
        );
        assert_eq!(sender.sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn blacklisted_leads_never_reach_the_provider() {
        let (dispatcher, leads, _budgets) = dispatcher_with_cap(10).await;
        let lead_id = seed_lead(&leads, "L-1").await;
        let mut lead = leads.find_by_id(&lead_id).await.expect("find").expect("present");
        lead.blacklist();
        leads.save(lead).await.expect("save");

        let sender = Arc::new(CountingSender { sends: AtomicU32::new(0) });
        let error = dispatcher
            .dispatch(
                &AccountId("outbox-1".to_string()),
                Channel::Email,
                &lead_id,
                sender.clone(),
                json!({}),
            )
            .await
            .expect_err("blacklisted");

        assert!(matches!(error, StepError::LeadBlacklisted(_)));
        assert_eq!(sender.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_sends_on_one_account_share_a_single_slot() {
        let (dispatcher, leads, budgets) = dispatcher_with_cap(1).await;
        let first = seed_lead(&leads, "L-1").await;
        let second = seed_lead(&leads, "L-2").await;
        let account = AccountId("outbox-1".to_string());
        let sender = Arc::new(CountingSender { sends: AtomicU32::new(0) });

        let (a, b) = tokio::join!(
            dispatcher.dispatch(&account, Channel::Email, &first, sender.clone(), json!({})),
            dispatcher.dispatch(&account, Channel::Email, &second, sender.clone(), json!({})),
        );

        assert_eq!(a.is_ok() as u32 + b.is_ok() as u32, 1, "exactly one send wins the slot");
        assert_eq!(sender.sends.load(Ordering::SeqCst), 1);

        let budget =
            budgets.find(&account, Channel::Email).await.expect("find").expect("present");
        assert_eq!(budget.sent_today, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_counters_land_on_the_lead() {
        let (dispatcher, leads, _budgets) = dispatcher_with_cap(5).await;
        let lead_id = seed_lead(&leads, "L-1").await;
        let account = AccountId("outbox-1".to_string());
        let sender = Arc::new(CountingSender { sends: AtomicU32::new(0) });

        dispatcher
            .dispatch(&account, Channel::Email, &lead_id, sender.clone(), json!({}))
            .await
            .expect("email");
        dispatcher
            .dispatch(&account, Channel::WhatsApp, &lead_id, sender, json!({}))
            .await
            .expect("whatsapp");

        let lead = leads.find_by_id(&lead_id).await.expect("find").expect("present");
        assert_eq!(lead.emails_sent, 1);
        assert_eq!(lead.whatsapps_sent, 1);
    }
}
