use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use skyport_types::ids::AccountId;
use uuid::Uuid;

use crate::error::ApiError;

/// Resolves the authenticated operator making a management-surface request.
///
/// Access-key issuance and end-user authentication are out of scope (spec
/// §1): an upstream gateway is expected to resolve a caller's access key to
/// an account and forward it as a bearer token carrying that account's id.
/// This layer only parses that token and stashes the resulting [`AccountId`]
/// in the request's extensions; handlers pull it back out with
/// `Extension<AccountId>`.
pub async fn require_account(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError(skyport_types::StoreError::Unauthorized))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(ApiError(skyport_types::StoreError::Unauthorized))?;

    let id = Uuid::parse_str(token.trim()).map_err(|_| ApiError(skyport_types::StoreError::Unauthorized))?;
    request.extensions_mut().insert(AccountId(id));

    Ok(next.run(request).await)
}
