//! Tenant context extraction.
//!
//! `X-Tenant-ID` and `X-User-ID` are required on every business route;
//! `X-Company-ID` is optional and narrows which recon configs are visible.

use crate::services::Caller;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const TENANT_ID_HEADER: &str = "X-Tenant-ID";
pub const USER_ID_HEADER: &str = "X-User-ID";
pub const COMPANY_ID_HEADER: &str = "X-Company-ID";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_uuid(name: &str, raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw)
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("{} must be a UUID", name)))
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant_raw = header(parts, TENANT_ID_HEADER).ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing {} header", TENANT_ID_HEADER))
        })?;
        let tenant_id = parse_uuid(TENANT_ID_HEADER, tenant_raw)?;

        let user_id = header(parts, USER_ID_HEADER).ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing {} header", USER_ID_HEADER))
        })?;

        let company_id = header(parts, COMPANY_ID_HEADER)
            .map(|raw| parse_uuid(COMPANY_ID_HEADER, raw))
            .transpose()?;

        tracing::Span::current().record("tenant_id", tracing::field::display(tenant_id));

        Ok(Caller {
            tenant_id,
            user_id: user_id.to_string(),
            company_id,
        })
    }
}
