use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use habitquest_shared::auth::Role;
use habitquest_shared::jwt::{self, JwtClaims};
use tracing::{error, warn};

use super::{AppError, AppState};

/// How many days of inactivity before a session is considered expired.
const SESSION_IDLE_DAYS: i64 = 14;
/// How many days before mandatory re-login.
const TOKEN_TTL_DAYS: i64 = 30;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub claims: JwtClaims,
}

pub async fn require_bearer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let unauthorized = || Err(AppError::unauthorized());
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return unauthorized(),
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let Some(token) = header_str.strip_prefix("Bearer ") else {
        return unauthorized();
    };

    let claims = match jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            warn!(error=%e, "auth: jwt decode failed");
            return unauthorized();
        }
    };

    validate_claims(&claims).map_err(|e| {
        warn!(error=?e, profile_id=%claims.sub, "auth: validate_claims failed");
        AppError::unauthorized()
    })?;

    let jti = claims.jti.clone();
    let cutoff = Utc::now() - Duration::days(SESSION_IDLE_DAYS);
    match state
        .store
        .touch_session_with_cutoff(&jti, cutoff.naive_utc())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                jti = %jti,
                profile_id = %claims.sub,
                cutoff = %cutoff,
                "auth: session missing or expired (last_used_at < cutoff)"
            );
            return unauthorized();
        }
        Err(e) => {
            error!(jti = %jti, error=%e, "auth: touch_session_with_cutoff failed");
            return Err(AppError::internal(e));
        }
    }
    let auth = AuthCtx { claims };
    req.extensions_mut().insert(auth);
    Ok(next.run(req).await)
}

/// Issues a token for `profile_id`. A child-mode token must name the child it acts as.
pub async fn issue_jwt(
    state: &AppState,
    profile_id: &str,
    role: Role,
    child_id: Option<String>,
) -> Result<String, AppError> {
    let jti = uuid::Uuid::new_v4().to_string();
    let exp = (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp();
    let claims = JwtClaims {
        sub: profile_id.to_string(),
        jti: jti.clone(),
        exp,
        role,
        child_id,
    };

    validate_claims(&claims)?;

    state
        .store
        .create_session(&jti, profile_id)
        .await
        .map_err(|e| {
            error!(profile_id, error=%e, "issue_jwt: create_session failed");
            AppError::internal(e)
        })?;
    let token = jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        error!(profile_id, error=%e, "issue_jwt: jwt encode failed");
        AppError::internal(e)
    })?;
    Ok(token)
}

fn validate_claims(claims: &JwtClaims) -> Result<(), AppError> {
    if claims.sub.trim().is_empty() {
        warn!("claims: empty subject");
        return Err(AppError::forbidden());
    }
    match claims.role {
        Role::Parent => {
            if claims.child_id.is_some() {
                warn!(
                    profile_id = %claims.sub,
                    "claims: parent token must not include a child"
                );
                return Err(AppError::forbidden());
            }
        }
        Role::Child => match claims.child_id.as_deref() {
            Some(cid) if !cid.trim().is_empty() => {}
            _ => {
                warn!(profile_id = %claims.sub, "claims: child token missing child_id");
                return Err(AppError::forbidden());
            }
        },
    }
    Ok(())
}
