//! Reply-intent routing. Consumes each inbound reply exactly once, classifies
//! it, and applies the matching lead mutation and side effects.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use leadflow_core::domain::lead::LeadId;
use leadflow_core::errors::StepError;
use leadflow_core::intent::{apply_intent, Intent, IntentAction, KeywordClassifier};
use leadflow_db::repositories::{LeadRepository, ReplyRepository, RepositoryError};

use crate::capability::Capability;

#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    async fn notify(&self, subject: &str, message: &str);
}

/// Default notifier: a structured log line. A webhook-backed implementation
/// plugs in behind the same trait.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl OperatorNotifier for TracingNotifier {
    async fn notify(&self, subject: &str, message: &str) {
        info!(subject, "{message}");
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutedReply {
    pub event_id: String,
    pub intent: Intent,
    pub action: IntentAction,
}

pub struct IntentRouter {
    leads: Arc<dyn LeadRepository>,
    replies: Arc<dyn ReplyRepository>,
    keyword: KeywordClassifier,
    classifier: Option<Arc<dyn Capability>>,
    scheduler: Option<Arc<dyn Capability>>,
    notifier: Arc<dyn OperatorNotifier>,
}

impl IntentRouter {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        replies: Arc<dyn ReplyRepository>,
        classifier: Option<Arc<dyn Capability>>,
        scheduler: Option<Arc<dyn Capability>>,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Self {
        Self { leads, replies, keyword: KeywordClassifier, classifier, scheduler, notifier }
    }

    /// Route the oldest unconsumed reply for `lead_id`, if any. The event is
    /// marked consumed only after every side effect has been applied, so a
    /// failed routing pass leaves it eligible for the next one.
    pub async fn route_next(
        &self,
        lead_id: &LeadId,
    ) -> Result<Option<RoutedReply>, StepError> {
        let mut event = match self.replies.next_unconsumed(lead_id).await.map_err(repo_error)? {
            Some(event) => event,
            None => return Ok(None),
        };

        let mut lead = self
            .leads
            .find_by_id(lead_id)
            .await
            .map_err(repo_error)?
            .ok_or_else(|| StepError::Fatal(format!("unknown lead `{lead_id}`")))?;

        let intent = match self.keyword.classify(&event.raw_text) {
            Some(intent) => intent,
            None => self.classify_ambiguous(&event.raw_text, lead_id).await,
        };

        let action =
            apply_intent(&mut lead, intent).map_err(|error| StepError::Fatal(error.to_string()))?;

        if action == IntentAction::BookMeeting {
            if let Some(scheduler) = &self.scheduler {
                scheduler
                    .invoke(json!({
                        "lead_id": lead_id.0,
                        "channel": event.channel.as_str(),
                    }))
                    .await
                    .map_err(StepError::from)?;
            }
            self.notifier
                .notify(
                    "meeting requested",
                    &format!("lead {lead_id} replied with buying intent; scheduling link sent"),
                )
                .await;
        }

        self.leads.save(lead).await.map_err(repo_error)?;
        event.consumed = true;
        let event_id = event.id.clone();
        self.replies.save(event).await.map_err(repo_error)?;

        info!(lead = %lead_id, intent = intent.as_str(), "reply routed");
        Ok(Some(RoutedReply { event_id, intent, action }))
    }

    /// Keyword matching was inconclusive. Defer to the pluggable classifier
    /// when one is registered; without one, or when its verdict is unusable,
    /// the lead lands in nurture.
    async fn classify_ambiguous(&self, text: &str, lead_id: &LeadId) -> Intent {
        let Some(classifier) = &self.classifier else {
            return Intent::Nurture;
        };

        match classifier.invoke(json!({"lead_id": lead_id.0, "text": text})).await {
            Ok(output) => output
                .get("intent")
                .and_then(|value| value.as_str())
                .and_then(|value| value.parse::<Intent>().ok())
                .unwrap_or(Intent::Nurture),
            Err(error) => {
                warn!(lead = %lead_id, "classifier failed, defaulting to nurture: {error}");
                Intent::Nurture
            }
        }
    }
}

fn repo_error(error: RepositoryError) -> StepError {
    StepError::Transient(error.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::{json, Value};
    use tokio::sync::Mutex;

    use leadflow_core::domain::lead::{Channel, Contact, Lead, LeadId, LeadStatus};
    use leadflow_core::domain::reply::ReplyEvent;
    use leadflow_core::intent::{Intent, IntentAction};
    use leadflow_db::repositories::{
        InMemoryLeadRepository, InMemoryReplyRepository, LeadRepository, ReplyRepository,
    };

    use super::{IntentRouter, OperatorNotifier};
    use crate::capability::{Capability, CapabilityError, CapabilityKind};

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl OperatorNotifier for RecordingNotifier {
        async fn notify(&self, _subject: &str, message: &str) {
            self.messages.lock().await.push(message.to_string());
        }
    }

    struct Scheduler {
        invocations: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Capability for Scheduler {
        fn name(&self) -> &str {
            "send_scheduling_link"
        }

        fn kind(&self) -> CapabilityKind {
            CapabilityKind::Send
        }

        async fn invoke(&self, _input: Value) -> Result<Value, CapabilityError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"link": "https://cal.example/intro"}))
        }
    }

    struct FixedClassifier {
        verdict: &'static str,
    }

    #[async_trait::async_trait]
    impl Capability for FixedClassifier {
        fn name(&self) -> &str {
            "classify_reply"
        }

        fn kind(&self) -> CapabilityKind {
            CapabilityKind::Classify
        }

        async fn invoke(&self, _input: Value) -> Result<Value, CapabilityError> {
            Ok(json!({"intent": self.verdict}))
        }
    }

    struct Fixture {
        leads: Arc<InMemoryLeadRepository>,
        replies: Arc<InMemoryReplyRepository>,
        notifier: Arc<RecordingNotifier>,
        scheduler: Arc<Scheduler>,
    }

    async fn fixture(classifier: Option<Arc<dyn Capability>>) -> (IntentRouter, Fixture) {
        let leads = Arc::new(InMemoryLeadRepository::default());
        let replies = Arc::new(InMemoryReplyRepository::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = Arc::new(Scheduler { invocations: AtomicU32::new(0) });
        let router = IntentRouter::new(
            leads.clone(),
            replies.clone(),
            classifier,
            Some(scheduler.clone()),
            notifier.clone(),
        );
        (router, Fixture { leads, replies, notifier, scheduler })
    }

    async fn seed(fixture: &Fixture, status: LeadStatus, reply: &str) -> LeadId {
        let mut lead = Lead::new(LeadId("L-1".to_string()), "Acme Pumps", Contact::default());
        lead.status = status;
        let lead_id = lead.id.clone();
        fixture.leads.save(lead).await.expect("save lead");
        fixture
            .replies
            .save(ReplyEvent::new(lead_id.clone(), Channel::Email, reply, Utc::now()))
            .await
            .expect("save reply");
        lead_id
    }

    #[tokio::test]
    async fn buying_intent_books_a_meeting_and_notifies() {
        let (router, fixture) = fixture(None).await;
        let lead_id = seed(&fixture, LeadStatus::Emailed, "yes, send me a quote please").await;

        let routed = router.route_next(&lead_id).await.expect("route").expect("one event");

        assert_eq!(routed.intent, Intent::HighIntent);
        assert_eq!(routed.action, IntentAction::BookMeeting);
        assert_eq!(fixture.scheduler.invocations.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.notifier.messages.lock().await.len(), 1);

        let lead = fixture.leads.find_by_id(&lead_id).await.expect("find").expect("present");
        assert_eq!(lead.status, LeadStatus::MeetingBooked);
    }

    #[tokio::test]
    async fn rejection_blacklists_the_lead() {
        let (router, fixture) = fixture(None).await;
        let lead_id = seed(&fixture, LeadStatus::Emailed, "not interested, remove me").await;

        let routed = router.route_next(&lead_id).await.expect("route").expect("one event");

        assert_eq!(routed.intent, Intent::Reject);
        let lead = fixture.leads.find_by_id(&lead_id).await.expect("find").expect("present");
        assert!(lead.blacklisted);
        assert_eq!(lead.status, LeadStatus::Rejected);
    }

    #[tokio::test]
    async fn ambiguous_text_defaults_to_nurture_without_a_classifier() {
        let (router, fixture) = fixture(None).await;
        let lead_id = seed(&fixture, LeadStatus::Emailed, "thanks for reaching out").await;

        let routed = router.route_next(&lead_id).await.expect("route").expect("one event");

        assert_eq!(routed.intent, Intent::Nurture);
        let lead = fixture.leads.find_by_id(&lead_id).await.expect("find").expect("present");
        assert_eq!(lead.status, LeadStatus::Nurture);
    }

    #[tokio::test]
    async fn registered_classifier_decides_ambiguous_text() {
        let (router, fixture) =
            fixture(Some(Arc::new(FixedClassifier { verdict: "high_intent" }))).await;
        let lead_id = seed(&fixture, LeadStatus::Emailed, "thanks for reaching out").await;

        let routed = router.route_next(&lead_id).await.expect("route").expect("one event");

        assert_eq!(routed.intent, Intent::HighIntent);
    }

    #[tokio::test]
    async fn events_are_consumed_exactly_once() {
        let (router, fixture) = fixture(None).await;
        let lead_id = seed(&fixture, LeadStatus::Emailed, "maybe later, busy right now").await;

        let first = router.route_next(&lead_id).await.expect("route");
        assert!(first.is_some());

        let second = router.route_next(&lead_id).await.expect("route");
        assert!(second.is_none());
    }
}
