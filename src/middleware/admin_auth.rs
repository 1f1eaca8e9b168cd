use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::db::AppState;
use crate::error::AppError;
use crate::jwt::AdminClaims;
use crate::util::extract_bearer_token;

/// Authenticated admin identity, inserted into request extensions for
/// handlers that want to know who acted.
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub claims: AdminClaims,
}

/// Require a bearer JWT with `role == "admin"` on every `/admin` route.
/// Missing, malformed, and wrong-role tokens all get the same 401.
pub async fn admin_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers()).ok_or(AppError::Unauthorized)?;
    let claims = state.admin_key.verify_admin(token)?;

    request.extensions_mut().insert(AdminContext { claims });
    Ok(next.run(request).await)
}
