use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::board::models::UserId;
use crate::error::AppError;

pub const VIEWER_HEADER: &str = "x-huddle-user";

/// The identity a request acts as. Authentication happens upstream; this
/// only reads the resulting user id from the `X-Huddle-User` header or, for
/// websocket clients that cannot set headers, a `user` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for Viewer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(VIEWER_HEADER)
            .and_then(|v| v.to_str().ok())
            .or_else(|| query_user(parts.uri.query()))
            .ok_or(AppError::Unauthorized)?;

        raw.trim()
            .parse()
            .map(Viewer)
            .map_err(|_| AppError::BadRequest("Invalid user id".into()))
    }
}

fn query_user(query: Option<&str>) -> Option<&str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find_map(|(key, value)| (key == "user").then_some(value))
}
