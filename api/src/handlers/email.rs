//! Callbacks produced by onboarding e-mails, plus the mailer-facing endpoints.
//!
//! Every tracked link carries a signed token. The token proves its own claims only, so each
//! handler also checks that the claimed `kind`, user and message match the request.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use url::Url;

use crate::{
    auth::AuthUser,
    config::ConfigError,
    error::AppError,
    links::TrackingLinks,
    models::email::{self, BounceNotification, EmailEventKind, EmailPreferencesResponse},
    token::{LinkClaims, LinkKind},
    AppState,
};

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// 1x1 transparent GIF.
static PIXEL: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

const UNSUBSCRIBED_PAGE: &str = "<!doctype html><html><head><title>Aurum</title></head>\
<body><p>You have been unsubscribed from Aurum onboarding emails.</p></body></html>";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LinkQuery {
    pub t: String,
    pub uid: String,
    pub eid: String,
    pub url: String,
}

fn verified(
    state: &AppState,
    query: &LinkQuery,
    kind: LinkKind,
    check_eid: bool,
) -> Result<Option<LinkClaims>, AppError> {
    let Some(claims) = state.signer.verify(&query.t)? else {
        return Ok(None);
    };

    let matches = claims.kind() == Some(kind)
        && claims.uid() == Some(query.uid.as_str())
        && (!check_eid || claims.eid() == Some(query.eid.as_str()));

    Ok(matches.then_some(claims))
}

fn pixel() -> Response {
    (
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store, max-age=0"),
        ],
        &PIXEL[..],
    )
        .into_response()
}

/// Open-tracking pixel. Always answers with the image.
pub async fn open(
    State(state): State<AppState>,
    Query(query): Query<LinkQuery>,
) -> Result<Response, AppError> {
    if verified(&state, &query, LinkKind::Open, true)?.is_none() {
        tracing::debug!(uid = %query.uid, eid = %query.eid, "Ignoring invalid open link");
        return Ok(pixel());
    }

    if let Err(e) = email::record_event(
        &state.db,
        &query.uid,
        Some(&query.eid),
        EmailEventKind::Open,
        None,
        state.clock.now(),
    )
    .await
    {
        tracing::warn!(uid = %query.uid, eid = %query.eid, "Failed to record open: {}", e);
    }

    Ok(pixel())
}

pub async fn click(
    State(state): State<AppState>,
    Query(query): Query<LinkQuery>,
) -> Result<Redirect, AppError> {
    let target_matches = verified(&state, &query, LinkKind::Click, true)?
        .is_some_and(|claims| claims.target() == Some(query.url.as_str()));
    if !target_matches {
        tracing::debug!(uid = %query.uid, eid = %query.eid, "Rejected click link");
        return Err(AppError::InvalidLink);
    }

    if let Err(e) = email::record_event(
        &state.db,
        &query.uid,
        Some(&query.eid),
        EmailEventKind::Click,
        Some(&query.url),
        state.clock.now(),
    )
    .await
    {
        tracing::warn!(uid = %query.uid, eid = %query.eid, "Failed to record click: {}", e);
    }

    Ok(Redirect::to(&query.url))
}

async fn unsubscribe(state: &AppState, query: &LinkQuery) -> Result<(), AppError> {
    let claims = verified(state, query, LinkKind::Unsubscribe, false)?.ok_or_else(|| {
        tracing::debug!(uid = %query.uid, "Rejected unsubscribe link");
        AppError::InvalidLink
    })?;

    let now = state.clock.now();
    email::mark_unsubscribed(&state.db, &query.uid, now).await?;
    email::record_event(
        &state.db,
        &query.uid,
        claims.eid(),
        EmailEventKind::Unsubscribe,
        None,
        now,
    )
    .await?;

    tracing::info!(uid = %query.uid, "User unsubscribed from onboarding emails");
    Ok(())
}

pub async fn unsubscribe_page(
    State(state): State<AppState>,
    Query(query): Query<LinkQuery>,
) -> Result<Html<&'static str>, AppError> {
    unsubscribe(&state, &query).await?;
    Ok(Html(UNSUBSCRIBED_PAGE))
}

/// RFC 8058 one-click unsubscribe, posted by mail clients.
pub async fn unsubscribe_one_click(
    State(state): State<AppState>,
    Query(query): Query<LinkQuery>,
) -> Result<StatusCode, AppError> {
    unsubscribe(&state, &query).await?;
    Ok(StatusCode::OK)
}

fn check_webhook_secret(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let expected = state
        .config
        .email_webhook_secret
        .as_deref()
        .ok_or(ConfigError::Missing("EMAIL_WEBHOOK_SECRET"))?;
    let provided = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

/// Delivery-provider bounce webhook. Only hard bounces suppress further mail.
pub async fn bounce(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(notification): Json<BounceNotification>,
) -> Result<StatusCode, AppError> {
    check_webhook_secret(&state, &headers)?;

    if !notification.bounce_type.trim().eq_ignore_ascii_case("hard") {
        tracing::info!(
            uid = %notification.uid,
            bounce_type = %notification.bounce_type,
            "Ignoring non-hard bounce"
        );
        return Ok(StatusCode::NO_CONTENT);
    }

    let now = state.clock.now();
    email::mark_suppressed(&state.db, &notification.uid, now).await?;
    email::record_event(
        &state.db,
        &notification.uid,
        notification.eid.as_deref(),
        EmailEventKind::Bounce,
        None,
        now,
    )
    .await?;

    tracing::info!(uid = %notification.uid, "Suppressed onboarding email after hard bounce");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinksRequest {
    pub uid: String,
    pub eid: String,
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ClickLink {
    pub target: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinksResponse {
    pub open_pixel: String,
    pub unsubscribe: String,
    pub clicks: Vec<ClickLink>,
    pub can_receive: bool,
}

/// Signed links for one outgoing message, requested by the mailer before sending.
pub async fn links(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LinksRequest>,
) -> Result<Json<LinksResponse>, AppError> {
    check_webhook_secret(&state, &headers)?;

    if request.uid.is_empty() || request.eid.is_empty() {
        return Err(AppError::BadRequest("uid and eid are required".to_string()));
    }
    for target in &request.targets {
        let scheme_ok = Url::parse(target)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !scheme_ok {
            return Err(AppError::BadRequest(format!(
                "target `{target}` is not an http(s) url"
            )));
        }
    }

    let links = TrackingLinks::new(
        &state.signer,
        &state.config.public_base_url,
        &request.uid,
        &request.eid,
        state.config.link_ttl_secs,
    );
    let clicks = request
        .targets
        .iter()
        .map(|target| {
            Ok(ClickLink {
                target: target.clone(),
                url: links.click(target)?,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    let preferences = email::preferences(&state.db, &request.uid).await?;

    Ok(Json(LinksResponse {
        open_pixel: links.open_pixel()?,
        unsubscribe: links.unsubscribe()?,
        clicks,
        can_receive: preferences.can_receive(),
    }))
}

pub async fn preferences(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<EmailPreferencesResponse>, AppError> {
    let preferences = email::preferences(&state.db, &user.uid).await?;
    Ok(Json(EmailPreferencesResponse {
        can_receive: preferences.can_receive(),
        preferences,
    }))
}
