//! Reply-intent classification and the lead mutations each intent implies.

use serde::{Deserialize, Serialize};

use crate::domain::lead::{Lead, LeadStatus};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    HighIntent,
    Nurture,
    Reject,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighIntent => "high_intent",
            Self::Nurture => "nurture",
            Self::Reject => "reject",
        }
    }
}

impl std::str::FromStr for Intent {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high_intent" | "high" => Ok(Self::HighIntent),
            "nurture" => Ok(Self::Nurture),
            "reject" => Ok(Self::Reject),
            other => Err(DomainError::InvariantViolation(format!("unknown intent `{other}`"))),
        }
    }
}

const HIGH_INTENT_KEYWORDS: &[&str] =
    &["quote", "price", "meeting", "sample", "interested", "call", "demo", "order"];

const NURTURE_KEYWORDS: &[&str] =
    &["later", "expensive", "not now", "busy", "next month", "follow up"];

const REJECT_KEYWORDS: &[&str] =
    &["unsubscribe", "not interested", "remove", "stop", "spam", "no thanks"];

/// Case-insensitive substring matcher. Reject keywords take precedence so
/// "not interested" never reads as high intent; `None` means the text is
/// ambiguous and a pluggable classifier gets a say.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn classify(&self, text: &str) -> Option<Intent> {
        let lowered = text.to_lowercase();
        let matches = |keywords: &[&str]| keywords.iter().any(|keyword| lowered.contains(keyword));

        if matches(REJECT_KEYWORDS) {
            Some(Intent::Reject)
        } else if matches(HIGH_INTENT_KEYWORDS) {
            Some(Intent::HighIntent)
        } else if matches(NURTURE_KEYWORDS) {
            Some(Intent::Nurture)
        } else {
            None
        }
    }
}

/// Side effect the router owes beyond the lead mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntentAction {
    /// Send a scheduling link and notify operators.
    BookMeeting,
    /// Tag the lead for later re-engagement.
    TagForNurture,
    /// Suppress all future outreach to this lead.
    Blacklist,
}

/// Apply a classified intent to the lead.
pub fn apply_intent(lead: &mut Lead, intent: Intent) -> Result<IntentAction, DomainError> {
    match intent {
        Intent::HighIntent => {
            lead.transition_to(LeadStatus::MeetingBooked)?;
            Ok(IntentAction::BookMeeting)
        }
        Intent::Nurture => {
            lead.transition_to(LeadStatus::Nurture)?;
            Ok(IntentAction::TagForNurture)
        }
        Intent::Reject => {
            lead.blacklist();
            Ok(IntentAction::Blacklist)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_intent, Intent, IntentAction, KeywordClassifier};
    use crate::domain::lead::{Contact, Lead, LeadId, LeadStatus};

    fn classify(text: &str) -> Option<Intent> {
        KeywordClassifier.classify(text)
    }

    #[test]
    fn high_intent_keywords_are_detected() {
        assert_eq!(classify("Can you send a quote?"), Some(Intent::HighIntent));
        assert_eq!(classify("let's book a MEETING next week"), Some(Intent::HighIntent));
        assert_eq!(classify("what's the price per unit"), Some(Intent::HighIntent));
    }

    #[test]
    fn reject_wins_over_high_intent() {
        assert_eq!(classify("not interested, thanks"), Some(Intent::Reject));
        assert_eq!(classify("please unsubscribe me from this"), Some(Intent::Reject));
    }

    #[test]
    fn nurture_keywords_are_detected() {
        assert_eq!(classify("maybe later, we are busy this quarter"), Some(Intent::Nurture));
        assert_eq!(classify("follow up next month please"), Some(Intent::Nurture));
    }

    #[test]
    fn ambiguous_text_yields_none() {
        assert_eq!(classify("thanks for reaching out"), None);
        assert_eq!(classify(""), None);
    }

    #[test]
    fn intents_map_to_lead_mutations() {
        let mut booked = Lead::new(LeadId("L-1".to_string()), "Acme", Contact::default());
        booked.status = LeadStatus::Emailed;
        assert_eq!(
            apply_intent(&mut booked, Intent::HighIntent).expect("book"),
            IntentAction::BookMeeting
        );
        assert_eq!(booked.status, LeadStatus::MeetingBooked);

        let mut nurture = Lead::new(LeadId("L-2".to_string()), "Acme", Contact::default());
        nurture.status = LeadStatus::WhatsApped;
        assert_eq!(
            apply_intent(&mut nurture, Intent::Nurture).expect("nurture"),
            IntentAction::TagForNurture
        );
        assert_eq!(nurture.status, LeadStatus::Nurture);

        let mut rejected = Lead::new(LeadId("L-3".to_string()), "Acme", Contact::default());
        rejected.status = LeadStatus::Emailed;
        assert_eq!(
            apply_intent(&mut rejected, Intent::Reject).expect("reject"),
            IntentAction::Blacklist
        );
        assert!(rejected.blacklisted);
        assert_eq!(rejected.status, LeadStatus::Rejected);
    }
}
