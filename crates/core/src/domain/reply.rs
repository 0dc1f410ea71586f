use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::lead::{Channel, LeadId};
use crate::domain::run::{ResumptionToken, RunId};

/// Inbound reply from a lead. The router consumes each event exactly once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyEvent {
    pub id: String,
    pub lead_id: LeadId,
    pub channel: Channel,
    pub raw_text: String,
    pub received_at: DateTime<Utc>,
    pub consumed: bool,
}

impl ReplyEvent {
    pub fn new(
        lead_id: LeadId,
        channel: Channel,
        raw_text: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            lead_id,
            channel,
            raw_text: raw_text.into(),
            received_at,
            consumed: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

/// Operator decision on a parked run, carrying the gate's resumption token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSignal {
    pub lead_id: LeadId,
    pub run_id: RunId,
    pub token: ResumptionToken,
    pub decision: Decision,
}
