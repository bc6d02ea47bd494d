use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use sqlx::SqlitePool;

use crate::{
    auth::AuthUser,
    error::AppError,
    models::entry::{Entry, EntryPayload, ReflectionAccepted, ReflectionMessage, ReflectionPayload},
    ratelimit::Action,
    AppState,
};

use super::enforce;

pub(crate) async fn owned_entry(db: &SqlitePool, uid: &str, id: i64) -> Result<Entry, AppError> {
    sqlx::query_as::<_, Entry>("SELECT * FROM entries WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(uid)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)
}

fn required(content: Option<&str>, field: &str) -> Result<String, AppError> {
    content
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest(format!("{field} must not be empty")))
}

pub async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<EntryPayload>,
) -> Result<(StatusCode, Json<Entry>), AppError> {
    let content = required(payload.content(), "content")?;
    let now = state.clock.now();

    let entry = sqlx::query_as::<_, Entry>(
        "INSERT INTO entries (user_id, content, created_at, updated_at) VALUES (?, ?, ?, ?) RETURNING *",
    )
    .bind(&user.uid)
    .bind(&content)
    .bind(now)
    .bind(now)
    .fetch_one(&state.db)
    .await?;

    tracing::debug!(uid = %user.uid, entry_id = entry.id, "Entry created");
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn list(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Entry>>, AppError> {
    let entries = sqlx::query_as::<_, Entry>(
        "SELECT * FROM entries WHERE user_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(&user.uid)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(entries))
}

pub async fn show(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Entry>, AppError> {
    Ok(Json(owned_entry(&state.db, &user.uid, id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<EntryPayload>,
) -> Result<Json<Entry>, AppError> {
    let content = required(payload.content(), "content")?;

    let entry = sqlx::query_as::<_, Entry>(
        "UPDATE entries SET content = ?, updated_at = ? WHERE id = ? AND user_id = ? RETURNING *",
    )
    .bind(&content)
    .bind(state.clock.now())
    .bind(id)
    .bind(&user.uid)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound)?;

    Ok(Json(entry))
}

pub async fn remove(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let result = sqlx::query("DELETE FROM entries WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(&user.uid)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Queue a message for the reflection generator. Rate limited per user.
pub async fn reflect(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<ReflectionPayload>,
) -> Result<(StatusCode, Json<ReflectionAccepted>), AppError> {
    let trimmed = payload.message.trim();
    let message = required((!trimmed.is_empty()).then_some(trimmed), "message")?;
    let entry = owned_entry(&state.db, &user.uid, id).await?;

    let decision = enforce(&state, &user.uid, Action::ReflectionMessage).await?;

    let message = sqlx::query_as::<_, ReflectionMessage>(
        "INSERT INTO reflection_messages (entry_id, user_id, content, created_at) VALUES (?, ?, ?, ?) RETURNING *",
    )
    .bind(entry.id)
    .bind(&user.uid)
    .bind(&message)
    .bind(state.clock.now())
    .fetch_one(&state.db)
    .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ReflectionAccepted {
            message,
            remaining: decision.remaining,
            reset_at: decision.reset_at,
        }),
    ))
}

pub async fn reflections(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<ReflectionMessage>>, AppError> {
    let entry = owned_entry(&state.db, &user.uid, id).await?;

    let messages = sqlx::query_as::<_, ReflectionMessage>(
        "SELECT * FROM reflection_messages WHERE entry_id = ? ORDER BY id",
    )
    .bind(entry.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(messages))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::testing::TestApp;

    #[tokio::test]
    async fn entries_are_scoped_to_their_author() {
        let app = TestApp::new().await;

        let (status, created) = app
            .send_json("POST", "/api/entries", Some("alice"), json!({"content": "  first day  "}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["content"], "first day");
        let id = created["id"].as_i64().unwrap();

        let (status, listed) = app.send("GET", "/api/entries", Some("alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, _) = app.send("GET", &format!("/api/entries/{id}"), Some("bob")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, listed) = app.send("GET", "/api/entries", Some("bob")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(listed.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_and_delete_entry() {
        let app = TestApp::new().await;
        let (_, created) = app
            .send_json("POST", "/api/entries", Some("alice"), json!({"content": "draft"}))
            .await;
        let uri = format!("/api/entries/{}", created["id"]);

        let (status, updated) = app
            .send_json("PUT", &uri, Some("alice"), json!({"content": "final"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["content"], "final");

        let (status, _) = app.send("DELETE", &uri, Some("bob")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.send("DELETE", &uri, Some("alice")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.send("GET", &uri, Some("alice")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blank_entry_is_rejected() {
        let app = TestApp::new().await;
        let (status, body) = app
            .send_json("POST", "/api/entries", Some("alice"), json!({"content": "   "}))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "content must not be empty");
    }

    #[tokio::test]
    async fn requests_without_session_are_unauthorized() {
        let app = TestApp::new().await;
        let (status, body) = app.send("GET", "/api/entries", None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");
    }

    #[tokio::test]
    async fn reflections_are_limited_to_ten_per_hour() {
        let app = TestApp::new().await;
        let (_, created) = app
            .send_json("POST", "/api/entries", Some("alice"), json!({"content": "today"}))
            .await;
        let uri = format!("/api/entries/{}/reflections", created["id"]);

        for expected in (0..10).rev() {
            let (status, body) = app
                .send_json("POST", &uri, Some("alice"), json!({"message": "why?"}))
                .await;
            assert_eq!(status, StatusCode::ACCEPTED);
            assert_eq!(body["remaining"], expected);
        }

        let (status, body) = app
            .send_json("POST", &uri, Some("alice"), json!({"message": "why?"}))
            .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["remaining"], 0);

        let (_, listed) = app.send("GET", &uri, Some("alice")).await;
        assert_eq!(listed.as_array().unwrap().len(), 10);

        app.clock.advance(chrono::Duration::hours(1));
        let (status, body) = app
            .send_json("POST", &uri, Some("alice"), json!({"message": "again"}))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["remaining"], 9);
    }

    #[tokio::test]
    async fn reflection_on_foreign_entry_does_not_consume_allowance() {
        let app = TestApp::new().await;
        let (_, created) = app
            .send_json("POST", "/api/entries", Some("alice"), json!({"content": "mine"}))
            .await;
        let uri = format!("/api/entries/{}/reflections", created["id"]);

        let (status, _) = app
            .send_json("POST", &uri, Some("bob"), json!({"message": "hi"}))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, other) = app
            .send_json("POST", "/api/entries", Some("bob"), json!({"content": "bob's"}))
            .await;
        let (_, body) = app
            .send_json(
                "POST",
                &format!("/api/entries/{}/reflections", other["id"]),
                Some("bob"),
                json!({"message": "hi"}),
            )
            .await;
        assert_eq!(body["remaining"], 9);
    }
}
