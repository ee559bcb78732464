/// Session Authentication Middleware
///
/// Resolves the access token (Bearer header or `access_token` cookie)
/// against the session store and injects `AccessDetails` into request
/// extensions for route handlers.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::auth::{access_token_from, SessionManager, ACCESS_TOKEN_COOKIE};
use crate::error::{AppError, AuthError};

/// Guard for routes that need a live session.
pub struct SessionRequired {
    sessions: Arc<SessionManager>,
}

impl SessionRequired {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

impl<S, B> Transform<S, ServiceRequest> for SessionRequired
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = SessionRequiredService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(SessionRequiredService {
            service: Rc::new(service),
            sessions: self.sessions.clone(),
        }))
    }
}

pub struct SessionRequiredService<S> {
    service: Rc<S>,
    sessions: Arc<SessionManager>,
}

impl<S, B> Service<ServiceRequest> for SessionRequiredService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = access_token_from(req.headers(), req.cookie(ACCESS_TOKEN_COOKIE));
        let sessions = self.sessions.clone();
        let service = self.service.clone();

        Box::pin(async move {
            let token = match token {
                Some(token) => token,
                None => {
                    tracing::debug!(path = %req.path(), "No access token presented");
                    return Err(AppError::Auth(AuthError::MissingToken).into());
                }
            };

            let details = sessions.extract(&token).await.map_err(AppError::Auth)?;

            tracing::debug!(
                user_id = details.user_id,
                access_uuid = %details.access_uuid,
                "Session validated"
            );
            req.extensions_mut().insert(details);

            service.call(req).await
        })
    }
}
