use super::{AppError, AppState, auth::AuthCtx};
use axum::response::Response;
use axum::{
    extract::{OriginalUri, State},
    http::{Method, Request},
    middleware::Next,
};
use habitquest_shared::auth::Role;
use habitquest_shared::jwt::JwtClaims;
use percent_encoding::percent_decode_str;

pub async fn enforce_acl(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|orig| orig.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();
    // Owned copy: the request must not be borrowed across the ownership lookup
    let Some(claims) = req.extensions().get::<AuthCtx>().map(|a| a.claims.clone()) else {
        return Err(AppError::unauthorized());
    };
    let claims = &claims;

    let segs = segmented(&path);
    let prefix = ["api", "v1"];
    if !segs.as_slice().starts_with(&prefix) {
        tracing::warn!(?segs, "ACL: path outside api scope");
        return Err(AppError::forbidden());
    }
    let rest = &segs[prefix.len()..];

    let decision = match claims.role {
        Role::Parent => match allow_parent(&method, rest) {
            Ok(Some(child_seg)) => ensure_owned(&state, claims, child_seg).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        },
        Role::Child => allow_child(&method, rest, claims),
    };

    if let Err(err) = decision {
        tracing::warn!(
            method = %method,
            path = %path,
            profile_id = %claims.sub,
            role = ?claims.role,
            token_child = ?claims.child_id,
            "ACL: no rule matched; denying"
        );
        return Err(err);
    }

    Ok(next.run(req).await)
}

/// Returns the child segment the parent must own, if the route is child-scoped.
fn allow_parent<'a>(method: &Method, rest: &[&'a str]) -> Result<Option<&'a str>, AppError> {
    let get = *method == Method::GET;
    let post = *method == Method::POST;
    let put = *method == Method::PUT;
    let delete = *method == Method::DELETE;
    match rest {
        ["auth", "logout"] if post => Ok(None),
        ["profile"] if get => Ok(None),
        ["profile", "pin" | "timezone"] if put => Ok(None),
        ["children"] if get || post => Ok(None),
        ["children", child] if get || put || delete => Ok(Some(*child)),
        ["children", child, "balance"] if put => Ok(Some(*child)),
        ["children", child, "session"] if post => Ok(Some(*child)),
        ["children", child, "events"] if get => Ok(Some(*child)),
        ["children", child, "habits"] if get || post => Ok(Some(*child)),
        ["children", child, "habits", _] if put || delete => Ok(Some(*child)),
        ["children", child, "rewards"] if get || post => Ok(Some(*child)),
        ["children", child, "rewards", _] if put || delete => Ok(Some(*child)),
        ["children", child, "redemptions"] if get => Ok(Some(*child)),
        ["children", child, "redemptions", _, "approve" | "deny"] if post => Ok(Some(*child)),
        _ => Err(AppError::forbidden()),
    }
}

fn allow_child(method: &Method, rest: &[&str], claims: &JwtClaims) -> Result<(), AppError> {
    let get = *method == Method::GET;
    let post = *method == Method::POST;
    match rest {
        ["auth", "parent-mode" | "logout"] if post => Ok(()),
        ["children", child] if get => ensure_child(claims, child),
        ["children", child, "events"] if get => ensure_child(claims, child),
        ["children", child, "habits"] if get => ensure_child(claims, child),
        ["children", child, "habits", _, "complete"] if post => ensure_child(claims, child),
        ["children", child, "habits", _, "steps", _, "complete" | "uncomplete"] if post => {
            ensure_child(claims, child)
        }
        ["children", child, "rewards"] if get => ensure_child(claims, child),
        ["children", child, "rewards", _, "redeem"] if post => ensure_child(claims, child),
        ["children", child, "redemptions"] if get => ensure_child(claims, child),
        _ => Err(AppError::forbidden()),
    }
}

fn segmented(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn decode(seg: &str) -> String {
    percent_decode_str(seg).decode_utf8_lossy().to_string()
}

fn ensure_child(claims: &JwtClaims, seg: &str) -> Result<(), AppError> {
    let expected = claims.child_id.as_ref().ok_or_else(AppError::forbidden)?;
    let provided = decode(seg);
    if expected == &provided {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}

async fn ensure_owned(state: &AppState, claims: &JwtClaims, seg: &str) -> Result<(), AppError> {
    let child = decode(seg);
    if state.store.child_belongs_to(&child, &claims.sub).await? {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child_claims(cid: &str) -> JwtClaims {
        JwtClaims {
            sub: "p1".into(),
            jti: "j".into(),
            exp: 0,
            role: Role::Child,
            child_id: Some(cid.into()),
        }
    }

    #[test]
    fn child_may_complete_own_habits_only() {
        let claims = child_claims("kid");
        let own = segmented("/api/v1/children/kid/habits/h1/complete");
        let other = segmented("/api/v1/children/other/habits/h1/complete");
        assert!(allow_child(&Method::POST, &own[2..], &claims).is_ok());
        assert!(allow_child(&Method::POST, &other[2..], &claims).is_err());
    }

    #[test]
    fn child_cannot_manage_catalog() {
        let claims = child_claims("kid");
        let segs = segmented("/api/v1/children/kid/habits");
        assert!(allow_child(&Method::POST, &segs[2..], &claims).is_err());
        let segs = segmented("/api/v1/children/kid/redemptions/r1/approve");
        assert!(allow_child(&Method::POST, &segs[2..], &claims).is_err());
    }

    #[test]
    fn child_segment_is_percent_decoded() {
        let claims = child_claims("kid one");
        let segs = segmented("/api/v1/children/kid%20one/rewards");
        assert!(allow_child(&Method::GET, &segs[2..], &claims).is_ok());
    }

    #[test]
    fn parent_routes_report_child_to_check() {
        let segs = segmented("/api/v1/children/c9/redemptions/r1/deny");
        assert_eq!(allow_parent(&Method::POST, &segs[2..]).unwrap(), Some("c9"));
        let segs = segmented("/api/v1/children");
        assert_eq!(allow_parent(&Method::GET, &segs[2..]).unwrap(), None);
        let segs = segmented("/api/v1/children/c9/habits/h1/complete");
        assert!(allow_parent(&Method::POST, &segs[2..]).is_err());
    }
}
