use crate::app::AppState;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde::Serialize;
use subtle::ConstantTimeEq;

#[derive(Serialize)]
pub struct AuthError {
    pub error: String,
    pub message: String,
}

fn reject(error: &str, message: &str) -> (StatusCode, Json<AuthError>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(AuthError {
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
}

/// Requires `Authorization: Bearer <API_TOKEN>` when a token is configured.
pub async fn require_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<AuthError>)> {
    let Some(expected) = state.config.api_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    if !headers.contains_key(AUTHORIZATION) {
        return Err(reject(
            "missing_authorization",
            "Authorization header is required",
        ));
    }

    let Some(TypedHeader(auth)) = auth else {
        return Err(reject(
            "invalid_authorization",
            "Authorization header must start with 'Bearer '",
        ));
    };

    if !tokens_match(auth.token(), expected) {
        log::warn!("Rejected request to {} with invalid token", request.uri().path());
        return Err(reject("invalid_token", "Token is invalid"));
    }

    Ok(next.run(request).await)
}

fn tokens_match(given: &str, expected: &str) -> bool {
    given.as_bytes().ct_eq(expected.as_bytes()).into()
}
