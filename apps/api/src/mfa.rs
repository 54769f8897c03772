use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use stepauth_core::SubjectKey;
use stepauth_domain::{MfaLifecycle, SecondFactor, UserId};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetupRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SetupVerifyRequest {
    pub user_id: Uuid,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub user_id: Uuid,
    pub code: String,
    /// Pre-session lockout key supplied by the session issuer. Defaults to
    /// a per-account key when absent.
    pub subject_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DisableRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct TotpEnrollmentResponse {
    pub secret_base32: String,
    pub otpauth_uri: String,
}

#[derive(Debug, Serialize)]
pub struct BackupCodesResponse {
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifiedResponse {
    pub user_id: Uuid,
    pub second_factor: SecondFactor,
}

#[derive(Debug, Serialize)]
pub struct MfaStatusResponse {
    pub state: MfaLifecycle,
    pub backup_codes_remaining: i64,
}

fn login_subject_key(user_id: UserId, supplied: Option<String>) -> ApiResult<SubjectKey> {
    let key = match supplied {
        Some(value) => SubjectKey::new(value)?,
        None => SubjectKey::new(format!("login:{user_id}"))?,
    };

    Ok(key)
}

/// POST /auth/mfa/setup - Provision a pending TOTP secret.
pub async fn setup_handler(
    State(state): State<AppState>,
    Json(payload): Json<SetupRequest>,
) -> ApiResult<Json<TotpEnrollmentResponse>> {
    let enrollment = state
        .mfa_service
        .initiate_setup(UserId::from_uuid(payload.user_id))
        .await?;

    Ok(Json(TotpEnrollmentResponse {
        secret_base32: enrollment.secret_base32,
        otpauth_uri: enrollment.otpauth_uri,
    }))
}

/// POST /auth/mfa/setup/verify - Confirm enrollment with a live code.
///
/// The returned plaintext backup codes are shown exactly once.
pub async fn setup_verify_handler(
    State(state): State<AppState>,
    Json(payload): Json<SetupVerifyRequest>,
) -> ApiResult<Json<BackupCodesResponse>> {
    let backup_codes = state
        .mfa_service
        .verify_setup(UserId::from_uuid(payload.user_id), &payload.code)
        .await?;

    Ok(Json(BackupCodesResponse { backup_codes }))
}

/// POST /auth/mfa/verify - Verify a TOTP code during login.
pub async fn verify_handler(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> ApiResult<Json<VerifiedResponse>> {
    let user_id = UserId::from_uuid(payload.user_id);
    let subject_key = login_subject_key(user_id, payload.subject_key)?;

    let signal = state
        .mfa_service
        .verify_login(user_id, &subject_key, &payload.code)
        .await?;

    Ok(Json(VerifiedResponse {
        user_id: signal.user_id.as_uuid(),
        second_factor: signal.second_factor,
    }))
}

/// POST /auth/mfa/recover - Verify a single-use backup code during login.
pub async fn recover_handler(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> ApiResult<Json<VerifiedResponse>> {
    let user_id = UserId::from_uuid(payload.user_id);
    let subject_key = login_subject_key(user_id, payload.subject_key)?;

    let signal = state
        .mfa_service
        .recover(user_id, &subject_key, &payload.code)
        .await?;

    Ok(Json(VerifiedResponse {
        user_id: signal.user_id.as_uuid(),
        second_factor: signal.second_factor,
    }))
}

/// POST /auth/mfa/backup-codes/regenerate - Issue a fresh backup code batch.
pub async fn regenerate_backup_codes_handler(
    State(state): State<AppState>,
    Json(payload): Json<RegenerateRequest>,
) -> ApiResult<Json<BackupCodesResponse>> {
    let backup_codes = state
        .mfa_service
        .regenerate_backup_codes(UserId::from_uuid(payload.user_id))
        .await?;

    Ok(Json(BackupCodesResponse { backup_codes }))
}

/// DELETE /auth/mfa - Disable MFA for an account. Idempotent.
pub async fn disable_handler(
    State(state): State<AppState>,
    Json(payload): Json<DisableRequest>,
) -> ApiResult<StatusCode> {
    state
        .mfa_service
        .disable(UserId::from_uuid(payload.user_id))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /auth/mfa/status/{user_id} - Report enrollment state.
pub async fn status_handler(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<MfaStatusResponse>> {
    let status = state.mfa_service.status(UserId::from_uuid(user_id)).await?;

    Ok(Json(MfaStatusResponse {
        state: status.lifecycle,
        backup_codes_remaining: status.backup_codes_remaining,
    }))
}
