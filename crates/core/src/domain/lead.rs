use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(pub String);

impl std::fmt::Display for LeadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    WhatsApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::WhatsApp => "whatsapp",
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "whatsapp" => Ok(Self::WhatsApp),
            other => Err(DomainError::InvariantViolation(format!("unknown channel `{other}`"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Scouted,
    Mined,
    Drafted,
    AwaitingApproval,
    Approved,
    Emailed,
    WhatsApped,
    MeetingBooked,
    Nurture,
    Rejected,
    Converted,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scouted => "scouted",
            Self::Mined => "mined",
            Self::Drafted => "drafted",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Approved => "approved",
            Self::Emailed => "emailed",
            Self::WhatsApped => "whatsapped",
            Self::MeetingBooked => "meeting_booked",
            Self::Nurture => "nurture",
            Self::Rejected => "rejected",
            Self::Converted => "converted",
        }
    }
}

impl std::str::FromStr for LeadStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scouted" => Ok(Self::Scouted),
            "mined" => Ok(Self::Mined),
            "drafted" => Ok(Self::Drafted),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            "approved" => Ok(Self::Approved),
            "emailed" => Ok(Self::Emailed),
            "whatsapped" => Ok(Self::WhatsApped),
            "meeting_booked" => Ok(Self::MeetingBooked),
            "nurture" => Ok(Self::Nurture),
            "rejected" => Ok(Self::Rejected),
            "converted" => Ok(Self::Converted),
            other => {
                Err(DomainError::InvariantViolation(format!("unknown lead status `{other}`")))
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: Option<String>,
    pub email: Option<String>,
    pub whatsapp: Option<String>,
}

/// Outbound draft split into its channel-specific sections.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftMessage {
    pub subject: String,
    pub email_body: String,
    pub whatsapp_text: String,
}

impl DraftMessage {
    /// Parse the stored draft text format:
    /// a `SUBJECT:` line followed by `EMAIL:` and `WHATSAPP:` sections.
    pub fn parse(text: &str) -> Self {
        let mut subject = String::new();
        let mut email_body = String::new();
        let mut whatsapp_text = String::new();
        let mut section: Option<Channel> = None;

        for line in text.lines() {
            let stripped = line.trim();
            if let Some(rest) = stripped.strip_prefix("SUBJECT:") {
                subject = rest.trim().to_string();
            } else if stripped == "EMAIL:" {
                section = Some(Channel::Email);
            } else if stripped == "WHATSAPP:" {
                section = Some(Channel::WhatsApp);
            } else {
                match section {
                    Some(Channel::Email) => {
                        email_body.push_str(line);
                        email_body.push('\n');
                    }
                    Some(Channel::WhatsApp) => {
                        whatsapp_text.push_str(line);
                        whatsapp_text.push('\n');
                    }
                    None => {}
                }
            }
        }

        Self {
            subject,
            email_body: email_body.trim().to_string(),
            whatsapp_text: whatsapp_text.trim().to_string(),
        }
    }

    pub fn body_for(&self, channel: Channel) -> &str {
        match channel {
            Channel::Email => &self.email_body,
            Channel::WhatsApp => &self.whatsapp_text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub company: String,
    pub contact: Contact,
    pub context_summary: Option<String>,
    pub draft_text: Option<String>,
    pub status: LeadStatus,
    pub approved: bool,
    pub blacklisted: bool,
    pub emails_sent: u32,
    pub whatsapps_sent: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(id: LeadId, company: impl Into<String>, contact: Contact) -> Self {
        let now = Utc::now();
        Self {
            id,
            company: company.into(),
            contact,
            context_summary: None,
            draft_text: None,
            status: LeadStatus::Scouted,
            approved: false,
            blacklisted: false,
            emails_sent: 0,
            whatsapps_sent: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_transition_to(&self, next: LeadStatus) -> bool {
        use LeadStatus::{
            Approved, AwaitingApproval, Converted, Drafted, Emailed, MeetingBooked, Mined,
            Nurture, Rejected, Scouted, WhatsApped,
        };

        if self.blacklisted && next != Rejected {
            return false;
        }

        matches!(
            (&self.status, next),
            (Scouted, Mined)
                | (Mined, Drafted)
                | (Drafted, AwaitingApproval)
                | (AwaitingApproval, Approved)
                | (Approved, Emailed)
                | (Approved, WhatsApped)
                | (Emailed, WhatsApped)
                | (Emailed, MeetingBooked)
                | (Emailed, Nurture)
                | (WhatsApped, MeetingBooked)
                | (WhatsApped, Nurture)
                | (MeetingBooked, Converted)
                | (Nurture, Drafted)
                | (Scouted, Rejected)
                | (Mined, Rejected)
                | (Drafted, Rejected)
                | (AwaitingApproval, Rejected)
                | (Approved, Rejected)
                | (Emailed, Rejected)
                | (WhatsApped, Rejected)
                | (Nurture, Rejected)
        )
    }

    pub fn transition_to(&mut self, next: LeadStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            self.updated_at = Utc::now();
            return Ok(());
        }

        Err(DomainError::InvalidLeadTransition { from: self.status, to: next })
    }

    /// `approved` only flips through an explicit decision event.
    pub fn mark_approved(&mut self) {
        self.approved = true;
        self.updated_at = Utc::now();
    }

    /// Blacklisting is absorbing: the status lands on `Rejected` and every
    /// later dispatch attempt must fail the blacklist check.
    pub fn blacklist(&mut self) {
        self.blacklisted = true;
        self.status = LeadStatus::Rejected;
        self.updated_at = Utc::now();
    }

    pub fn record_send(&mut self, channel: Channel) {
        match channel {
            Channel::Email => self.emails_sent += 1,
            Channel::WhatsApp => self.whatsapps_sent += 1,
        }
        self.updated_at = Utc::now();
    }

    pub fn parsed_draft(&self) -> Option<DraftMessage> {
        self.draft_text.as_deref().map(DraftMessage::parse)
    }
}
