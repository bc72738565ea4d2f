//! Authenticated-identity accessor.
//!
//! The messaging core never issues or refreshes tokens; it only needs to
//! know who the caller is. Handlers take an [`AuthedUser`] argument and the
//! extractor validates the bearer token against the configured HS256 secret.

use crate::error::AppError;
use crate::state::AppState;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{dev::Payload, web, Error, FromRequest, HttpRequest};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// Validate an HS256 bearer token and extract the caller's user id.
pub fn verify_token(secret: &str, token: &str) -> Result<Uuid, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AppError::Unauthorized)?;
    Uuid::parse_str(&data.claims.sub).map_err(|_| AppError::Unauthorized)
}

#[derive(Debug, Clone, Copy)]
pub struct AuthedUser {
    pub id: Uuid,
}

impl FromRequest for AuthedUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract(req).map_err(Error::from))
    }
}

fn extract(req: &HttpRequest) -> Result<AuthedUser, AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or(AppError::Internal)?;
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    let token = header.strip_prefix("Bearer ").ok_or(AppError::Unauthorized)?;
    let id = verify_token(&state.config.jwt_secret, token)?;
    Ok(AuthedUser { id })
}
