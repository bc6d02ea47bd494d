use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    auth::AuthUser,
    error::AppError,
    models::{
        email::{self, EmailPreferences},
        entry::{Entry, ReflectionMessage},
    },
    ratelimit::Action,
    AppState,
};

use super::enforce;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountExport {
    pub user_id: String,
    pub exported_at: DateTime<Utc>,
    pub entries: Vec<Entry>,
    pub reflections: Vec<ReflectionMessage>,
    pub email_preferences: EmailPreferences,
}

pub async fn export(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<AccountExport>, AppError> {
    enforce(&state, &user.uid, Action::DataExport).await?;

    let entries = sqlx::query_as::<_, Entry>(
        "SELECT * FROM entries WHERE user_id = ? ORDER BY created_at, id",
    )
    .bind(&user.uid)
    .fetch_all(&state.db)
    .await?;

    let reflections = sqlx::query_as::<_, ReflectionMessage>(
        "SELECT * FROM reflection_messages WHERE user_id = ? ORDER BY id",
    )
    .bind(&user.uid)
    .fetch_all(&state.db)
    .await?;

    let email_preferences = email::preferences(&state.db, &user.uid).await?;

    tracing::info!(uid = %user.uid, entries = entries.len(), "Account exported");
    Ok(Json(AccountExport {
        user_id: user.uid,
        exported_at: state.clock.now(),
        entries,
        reflections,
        email_preferences,
    }))
}

/// Remove everything the user wrote. Rate-limit counters stay so deletion cannot be
/// used to reset them.
pub async fn delete(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<StatusCode, AppError> {
    enforce(&state, &user.uid, Action::AccountDeletion).await?;

    let mut tx = state.db.begin().await?;
    for statement in [
        "DELETE FROM reflection_messages WHERE user_id = ?",
        "DELETE FROM entries WHERE user_id = ?",
        "DELETE FROM email_events WHERE user_id = ?",
        "DELETE FROM email_preferences WHERE user_id = ?",
    ] {
        sqlx::query(statement)
            .bind(&user.uid)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    tracing::info!(uid = %user.uid, "Account data deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::{header, StatusCode};
    use serde_json::json;

    use crate::testing::TestApp;

    #[tokio::test]
    async fn export_includes_entries_and_is_limited_to_three_per_day() {
        let app = TestApp::new().await;
        let (_, entry) = app
            .send_json("POST", "/api/entries", Some("alice"), json!({"content": "one"}))
            .await;
        app.send_json(
            "POST",
            &format!("/api/entries/{}/reflections", entry["id"]),
            Some("alice"),
            json!({"message": "thoughts?"}),
        )
        .await;

        for _ in 0..3 {
            let (status, body) = app.send("POST", "/api/account/export", Some("alice")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["userId"], "alice");
            assert_eq!(body["entries"][0]["content"], "one");
            assert_eq!(body["reflections"][0]["content"], "thoughts?");
            assert_eq!(body["emailPreferences"]["unsubscribed"], false);
        }

        let response = app
            .request("POST", "/api/account/export", Some("alice"), None)
            .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "86400");
    }

    #[tokio::test]
    async fn delete_account_removes_data_once_per_day() {
        let app = TestApp::new().await;
        app.send_json("POST", "/api/entries", Some("alice"), json!({"content": "bye"}))
            .await;
        app.send_json("POST", "/api/entries", Some("bob"), json!({"content": "stay"}))
            .await;

        let (status, _) = app.send("DELETE", "/api/account", Some("alice")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, alice) = app.send("GET", "/api/entries", Some("alice")).await;
        assert!(alice.as_array().unwrap().is_empty());
        let (_, bob) = app.send("GET", "/api/entries", Some("bob")).await;
        assert_eq!(bob.as_array().unwrap().len(), 1);

        let (status, _) = app.send("DELETE", "/api/account", Some("alice")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }
}
