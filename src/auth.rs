use crate::{entity::Entity, error::AppError, models::User, role::Capability};
use actix_web::{dev::Payload, http::header, web::Data, FromRequest, HttpRequest};
use std::{future::Future, pin::Pin};

/// The signed-in user behind a request, resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user: User,
    pub token: String,
}

impl Actor {
    pub fn require(&self, capability: Capability) -> Result<(), AppError> {
        if self.user.role.can(capability) {
            Ok(())
        } else {
            Err(AppError::Forbidden(capability.action()))
        }
    }
}

pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

impl FromRequest for Actor {
    type Error = AppError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let token = bearer_token(req);
        let entity = req.app_data::<Data<Entity>>().cloned();

        Box::pin(async move {
            let token = token.ok_or(AppError::Unauthorized)?;
            let entity =
                entity.ok_or_else(|| AppError::Internal("entity is not registered".into()))?;
            let user = entity.user_get(&token).await?.ok_or(AppError::Unauthorized)?;
            Ok(Actor { user, token })
        })
    }
}
