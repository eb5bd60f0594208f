//! Tenant identity
//!
//! Credentials are issued and verified by the platform's auth collaborator.
//! By the time a request reaches this service the tenant is already
//! resolved and arrives as:
//! - `X-Tenant-ID`: the tenant UUID
//! - `Authorization: Bearer pk_...`: the opaque credential it was resolved from
//!
//! Both header names come from [`AuthConfig`], which the gateway places in
//! the request extensions. Without it the defaults above apply.

use crate::config::AuthConfig;
use crate::errors::{AppError, Result};
use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::request::Parts,
};
use uuid::Uuid;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const API_KEY_HEADER: &str = "authorization";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Credential prefix handed out by the auth collaborator
const API_KEY_PREFIX: &str = "pk_";

/// Resolved caller identity available to handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: Uuid,

    /// Request ID for tracing
    pub request_id: String,
}

/// Extract API key from Authorization header
pub fn extract_api_key(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ").map(str::trim)
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Header names in effect for this request
struct HeaderNames<'a> {
    tenant: &'a str,
    api_key: &'a str,
}

impl<'a> HeaderNames<'a> {
    fn of(parts: &'a Parts) -> Self {
        match parts.extensions.get::<AuthConfig>() {
            Some(auth) => Self {
                tenant: &auth.tenant_header,
                api_key: &auth.api_key_header,
            },
            None => Self {
                tenant: TENANT_HEADER,
                api_key: API_KEY_HEADER,
            },
        }
    }
}

fn resolve(parts: &Parts, names: &HeaderNames, raw_tenant: &str) -> Result<TenantContext> {
    let tenant_id = Uuid::parse_str(raw_tenant.trim()).map_err(|_| AppError::Unauthorized {
        message: format!("Invalid {} header", names.tenant),
    })?;

    let auth_header = header(parts, names.api_key).ok_or_else(|| AppError::Unauthorized {
        message: format!("Missing {} header", names.api_key),
    })?;

    match extract_api_key(auth_header) {
        Some(key) if key.starts_with(API_KEY_PREFIX) && key.len() > API_KEY_PREFIX.len() => {}
        _ => {
            return Err(AppError::Unauthorized {
                message: "Invalid API key".to_string(),
            })
        }
    }

    let request_id = header(parts, REQUEST_ID_HEADER)
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Ok(TenantContext {
        tenant_id,
        request_id,
    })
}

/// Required identity: rejects the request when the tenant is missing
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let names = HeaderNames::of(parts);
        let raw = header(parts, names.tenant).ok_or_else(|| AppError::Unauthorized {
            message: format!("Missing {} header", names.tenant),
        })?;
        resolve(parts, &names, raw)
    }
}

/// Optional identity: no tenant header means an anonymous caller, but a
/// tenant header that fails to resolve is still rejected.
impl<S> OptionalFromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Option<Self>> {
        let names = HeaderNames::of(parts);
        match header(parts, names.tenant) {
            None => Ok(None),
            Some(raw) => resolve(parts, &names, raw).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/v1/papers");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_extract_api_key() {
        assert_eq!(extract_api_key("Bearer pk_123"), Some("pk_123"));
        assert_eq!(extract_api_key("pk_123"), None);
        assert_eq!(extract_api_key("Basic abc"), None);
    }

    #[tokio::test]
    async fn test_required_context() {
        let tenant = Uuid::new_v4();
        let mut p = parts(&[
            ("x-tenant-id", &tenant.to_string()),
            ("authorization", "Bearer pk_live"),
            ("x-request-id", "req-1"),
        ]);
        let ctx = <TenantContext as FromRequestParts<()>>::from_request_parts(&mut p, &())
            .await
            .unwrap();
        assert_eq!(ctx.tenant_id, tenant);
        assert_eq!(ctx.request_id, "req-1");
    }

    #[tokio::test]
    async fn test_required_context_rejections() {
        let tenant = Uuid::new_v4().to_string();
        for headers in [
            vec![("authorization", "Bearer pk_live")],
            vec![("x-tenant-id", "not-a-uuid"), ("authorization", "Bearer pk_live")],
            vec![("x-tenant-id", tenant.as_str())],
            vec![("x-tenant-id", tenant.as_str()), ("authorization", "Bearer sk_live")],
        ] {
            let mut p = parts(&headers);
            let err = <TenantContext as FromRequestParts<()>>::from_request_parts(&mut p, &())
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Unauthorized { .. }));
        }
    }

    #[tokio::test]
    async fn test_optional_context() {
        let mut anonymous = parts(&[]);
        let ctx = <TenantContext as OptionalFromRequestParts<()>>::from_request_parts(&mut anonymous, &())
            .await
            .unwrap();
        assert!(ctx.is_none());

        let mut malformed = parts(&[("x-tenant-id", "nope"), ("authorization", "Bearer pk_x")]);
        assert!(
            <TenantContext as OptionalFromRequestParts<()>>::from_request_parts(&mut malformed, &())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_configured_header_names() {
        let tenant = Uuid::new_v4();
        let mut p = parts(&[
            ("x-account", &tenant.to_string()),
            ("x-api-key", "Bearer pk_live"),
        ]);
        p.extensions.insert(AuthConfig {
            tenant_header: "X-Account".to_string(),
            api_key_header: "X-Api-Key".to_string(),
        });
        let ctx = <TenantContext as FromRequestParts<()>>::from_request_parts(&mut p, &())
            .await
            .unwrap();
        assert_eq!(ctx.tenant_id, tenant);

        // The default names no longer count once others are configured
        let mut p = parts(&[
            ("x-tenant-id", &tenant.to_string()),
            ("authorization", "Bearer pk_live"),
        ]);
        p.extensions.insert(AuthConfig {
            tenant_header: "X-Account".to_string(),
            api_key_header: "X-Api-Key".to_string(),
        });
        let ctx = <TenantContext as OptionalFromRequestParts<()>>::from_request_parts(&mut p, &())
            .await
            .unwrap();
        assert!(ctx.is_none());
    }
}
