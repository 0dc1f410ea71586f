use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use leadflow_core::domain::lead::{Contact, Lead, LeadId, LeadStatus};

use super::{LeadRepository, RepositoryError};
use crate::DbPool;

pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const LEAD_COLUMNS: &str = "id,
    company,
    contact_name,
    contact_email,
    contact_whatsapp,
    context_summary,
    draft_text,
    status,
    approved,
    blacklisted,
    emails_sent,
    whatsapps_sent,
    created_at,
    updated_at";

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM lead WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(lead_from_row).transpose()
    }

    async fn list(
        &self,
        status: Option<LeadStatus>,
        approved: Option<bool>,
    ) -> Result<Vec<Lead>, RepositoryError> {
        let mut sql = format!("SELECT {LEAD_COLUMNS} FROM lead WHERE 1 = 1");
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if approved.is_some() {
            sql.push_str(" AND approved = ?");
        }
        sql.push_str(" ORDER BY created_at ASC");

        let mut query = sqlx::query(&sql);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        if let Some(approved) = approved {
            query = query.bind(approved);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(lead_from_row).collect()
    }

    async fn save(&self, lead: Lead) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO lead (
                id,
                company,
                contact_name,
                contact_email,
                contact_whatsapp,
                context_summary,
                draft_text,
                status,
                approved,
                blacklisted,
                emails_sent,
                whatsapps_sent,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                company = excluded.company,
                contact_name = excluded.contact_name,
                contact_email = excluded.contact_email,
                contact_whatsapp = excluded.contact_whatsapp,
                context_summary = excluded.context_summary,
                draft_text = excluded.draft_text,
                status = excluded.status,
                approved = excluded.approved,
                blacklisted = excluded.blacklisted,
                emails_sent = excluded.emails_sent,
                whatsapps_sent = excluded.whatsapps_sent,
                updated_at = excluded.updated_at",
        )
        .bind(&lead.id.0)
        .bind(&lead.company)
        .bind(lead.contact.name.as_deref())
        .bind(lead.contact.email.as_deref())
        .bind(lead.contact.whatsapp.as_deref())
        .bind(lead.context_summary.as_deref())
        .bind(lead.draft_text.as_deref())
        .bind(lead.status.as_str())
        .bind(lead.approved)
        .bind(lead.blacklisted)
        .bind(i64::from(lead.emails_sent))
        .bind(i64::from(lead.whatsapps_sent))
        .bind(lead.created_at.to_rfc3339())
        .bind(lead.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn lead_from_row(row: SqliteRow) -> Result<Lead, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = status_raw
        .parse::<LeadStatus>()
        .map_err(|_| RepositoryError::Decode(format!("unknown lead status `{status_raw}`")))?;

    Ok(Lead {
        id: LeadId(row.try_get("id")?),
        company: row.try_get("company")?,
        contact: Contact {
            name: row.try_get("contact_name")?,
            email: row.try_get("contact_email")?,
            whatsapp: row.try_get("contact_whatsapp")?,
        },
        context_summary: row.try_get("context_summary")?,
        draft_text: row.try_get("draft_text")?,
        status,
        approved: row.try_get("approved")?,
        blacklisted: row.try_get("blacklisted")?,
        emails_sent: parse_u32("emails_sent", row.try_get("emails_sent")?)?,
        whatsapps_sent: parse_u32("whatsapps_sent", row.try_get("whatsapps_sent")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

pub(crate) fn parse_u32(field: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("negative counter in `{field}`")))
}

pub(crate) fn parse_timestamp(field: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Decode(format!("invalid timestamp in `{field}`: `{value}`")))
}

pub(crate) fn parse_optional_timestamp(
    field: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|value| parse_timestamp(field, value)).transpose()
}
