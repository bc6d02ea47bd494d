//! Storage backends for rate-limit windows.
//!
//! Layout is one document per user holding a map of action name to window record, so all
//! of a user's counters live together.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::Mutex;

use super::{Action, RateLimitDecision, Transition, WindowRecord};

/// Computes the next window state from the stored one.
pub type WindowStep<'a> = dyn Fn(Option<WindowRecord>) -> Transition + Send + Sync + 'a;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt rate-limit document: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Read the window for (user, action), apply `step`, and persist its write, as one
    /// atomic unit with respect to other calls for the same user.
    async fn transact(
        &self,
        user_id: &str,
        action: Action,
        step: &WindowStep<'_>,
    ) -> Result<RateLimitDecision, StoreError>;
}

type ActionWindows = BTreeMap<String, WindowRecord>;

pub struct SqliteRateLimitStore {
    pool: SqlitePool,
}

impl SqliteRateLimitStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitStore for SqliteRateLimitStore {
    async fn transact(
        &self,
        user_id: &str,
        action: Action,
        step: &WindowStep<'_>,
    ) -> Result<RateLimitDecision, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Writing first takes SQLite's write lock before the read below, so concurrent
        // checks queue on the busy timeout instead of reading the same count.
        sqlx::query(
            "INSERT INTO rate_limits (user_id, actions) VALUES (?, '{}') \
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let raw: String = sqlx::query_scalar("SELECT actions FROM rate_limits WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
        let mut windows: ActionWindows = serde_json::from_str(&raw)?;

        let transition = step(windows.get(action.as_str()).copied());

        if let Some(record) = transition.write {
            windows.insert(action.as_str().to_string(), record);
            sqlx::query("UPDATE rate_limits SET actions = ? WHERE user_id = ?")
                .bind(serde_json::to_string(&windows)?)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(transition.decision)
    }
}

/// Process-local store for single-instance deployments and development.
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    users: Mutex<HashMap<String, BTreeMap<Action, WindowRecord>>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn transact(
        &self,
        user_id: &str,
        action: Action,
        step: &WindowStep<'_>,
    ) -> Result<RateLimitDecision, StoreError> {
        let mut users = self.users.lock().await;
        let windows = users.entry(user_id.to_string()).or_default();

        let transition = step(windows.get(&action).copied());
        if let Some(record) = transition.write {
            windows.insert(action, record);
        }

        Ok(transition.decision)
    }
}
