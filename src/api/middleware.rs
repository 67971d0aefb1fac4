//! Request-scoped caller context and access control.

use actix_web::dev::Payload;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, FromRequest, HttpRequest};
use anyhow::anyhow;
use futures::future::LocalBoxFuture;
use tracing::debug;

use super::AppState;
use crate::access;
use crate::error::{AppError, AppResult};
use crate::models::{Campaign, Capability, User};

/// The authenticated caller and the campaign their token was issued for.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user: User,
    pub campaign: Campaign,
}

impl RequestContext {
    /// Fail with `Forbidden` unless one of the caller's roles grants `capability`.
    pub fn require(&self, capability: Capability) -> AppResult<()> {
        if self.user.can(capability) {
            Ok(())
        } else {
            debug!(user_id = self.user.id, ?capability, "capability denied");
            Err(AppError::Forbidden(format!("{:?} is not permitted", capability)))
        }
    }
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

async fn resolve(state: web::Data<AppState>, token: String) -> AppResult<RequestContext> {
    let claims = access::decode_token(&state.auth.jwt_secret, &token)?;

    let user = match state.db.get_user(claims.sub).await {
        Ok(user) => user,
        Err(AppError::NotFound(_)) => return Err(AppError::Unauthorized),
        Err(e) => return Err(e),
    };
    if !user.active {
        return Err(AppError::Forbidden("account is inactive".into()));
    }

    let campaign = match state.db.get_campaign(claims.campaign).await {
        Ok(campaign) => campaign,
        Err(AppError::NotFound(_)) => return Err(AppError::Unauthorized),
        Err(e) => return Err(e),
    };
    if !campaign.active {
        return Err(AppError::Forbidden(format!("campaign '{}' is inactive", campaign.name)));
    }
    if !state.db.user_in_campaign(user.id, campaign.id).await? {
        return Err(AppError::Forbidden(format!(
            "not a member of campaign '{}'",
            campaign.name
        )));
    }

    Ok(RequestContext { user, campaign })
}

impl FromRequest for RequestContext {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();
        let token = bearer_token(req);
        Box::pin(async move {
            let state = state.ok_or_else(|| AppError::Internal(anyhow!("application state is not registered")))?;
            let token = token.ok_or(AppError::Unauthorized)?;
            resolve(state, token).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use crate::models::Role;

    #[test]
    fn reads_bearer_tokens_only() {
        let req = TestRequest::default()
            .insert_header((AUTHORIZATION, "Bearer abc.def"))
            .to_http_request();
        assert_eq!(bearer_token(&req).as_deref(), Some("abc.def"));

        let basic = TestRequest::default()
            .insert_header((AUTHORIZATION, "Basic dXNlcg=="))
            .to_http_request();
        assert_eq!(bearer_token(&basic), None);
        assert_eq!(bearer_token(&TestRequest::default().to_http_request()), None);
    }

    #[test]
    fn require_checks_capabilities() {
        let context = RequestContext {
            user: User {
                id: 1,
                username: "clinician".into(),
                email: None,
                active: true,
                roles: vec![Role::Clinician],
            },
            campaign: Campaign {
                id: 1,
                name: "Leon 2024".into(),
                active: true,
                units: crate::models::Units::Metric,
                telehealth: false,
                encounter_close_days: 7,
                country: "Nicaragua".into(),
                timezone: "UTC".into(),
                instance_id: 1,
            },
        };
        assert!(context.require(Capability::EditPatients).is_ok());
        assert!(matches!(
            context.require(Capability::ExportPatients),
            Err(AppError::Forbidden(_))
        ));
    }
}
