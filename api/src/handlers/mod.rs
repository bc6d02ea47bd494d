pub mod account;
pub mod email;
pub mod entries;

use crate::{
    error::AppError,
    ratelimit::{Action, RateLimitDecision},
    AppState,
};

/// Count one attempt of `action`, turning a denial into a 429.
pub async fn enforce(
    state: &AppState,
    uid: &str,
    action: Action,
) -> Result<RateLimitDecision, AppError> {
    let decision = state.limiter.check(uid, action).await?;
    if decision.allowed {
        return Ok(decision);
    }

    tracing::info!(uid, %action, reset_at = %decision.reset_at, "Rate limit exceeded");
    Err(AppError::RateLimited {
        reset_at: decision.reset_at,
        retry_after_secs: (decision.reset_at - state.clock.now()).num_seconds(),
    })
}
