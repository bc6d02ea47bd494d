use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailEventKind {
    Open,
    Click,
    Unsubscribe,
    Bounce,
}

impl EmailEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailEventKind::Open => "open",
            EmailEventKind::Click => "click",
            EmailEventKind::Unsubscribe => "unsubscribe",
            EmailEventKind::Bounce => "bounce",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EmailPreferences {
    pub unsubscribed: bool,
    pub suppressed: bool,
}

impl EmailPreferences {
    pub fn can_receive(&self) -> bool {
        !self.unsubscribed && !self.suppressed
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailPreferencesResponse {
    #[serde(flatten)]
    pub preferences: EmailPreferences,
    pub can_receive: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BounceNotification {
    pub uid: String,
    pub eid: Option<String>,
    pub bounce_type: String,
}

pub async fn record_event(
    db: &SqlitePool,
    user_id: &str,
    email_id: Option<&str>,
    kind: EmailEventKind,
    target: Option<&str>,
    at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO email_events (user_id, email_id, kind, target, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(email_id)
    .bind(kind.as_str())
    .bind(target)
    .bind(at)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn preferences(db: &SqlitePool, user_id: &str) -> Result<EmailPreferences, sqlx::Error> {
    let prefs = sqlx::query_as::<_, EmailPreferences>(
        "SELECT unsubscribed, suppressed FROM email_preferences WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    Ok(prefs.unwrap_or_default())
}

pub async fn mark_unsubscribed(
    db: &SqlitePool,
    user_id: &str,
    at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO email_preferences (user_id, unsubscribed, updated_at) VALUES (?, 1, ?) \
         ON CONFLICT(user_id) DO UPDATE SET unsubscribed = 1, updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(at)
    .execute(db)
    .await?;

    Ok(())
}

pub async fn mark_suppressed(
    db: &SqlitePool,
    user_id: &str,
    at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO email_preferences (user_id, suppressed, updated_at) VALUES (?, 1, ?) \
         ON CONFLICT(user_id) DO UPDATE SET suppressed = 1, updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(at)
    .execute(db)
    .await?;

    Ok(())
}
