use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{request::Parts, HeaderMap};
use common_audit::{AuditActor, RequestMeta};
use common_http_errors::ApiError;
use serde::{Deserialize, Serialize};
use tracing::Span;
use uuid::Uuid;

/// Pre-authorized caller identity and request metadata, threaded explicitly
/// into every mutating operation for audit attribution. Authentication and
/// permission checks happen upstream; this crate only carries the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerContext {
    pub actor: AuditActor,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub trace_id: Option<Uuid>,
}

impl CallerContext {
    pub fn request_meta(&self) -> RequestMeta {
        RequestMeta {
            ip: self.ip.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

pub struct CallerCtxExtractor(pub CallerContext);

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn actor_from_headers(headers: &HeaderMap) -> Option<AuditActor> {
    let id = header_str(headers, "X-User-ID").and_then(|s| Uuid::parse_str(&s).ok())?;
    Some(AuditActor {
        id: Some(id),
        name: header_str(headers, "X-User-Name"),
        role: header_str(headers, "X-User-Role"),
    })
}

fn ip_from_headers(headers: &HeaderMap) -> Option<String> {
    // First hop of X-Forwarded-For is the original client.
    header_str(headers, "X-Forwarded-For")
        .map(|v| v.split(',').next().unwrap_or("").trim().to_string())
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerCtxExtractor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        let actor = actor_from_headers(headers).ok_or_else(|| {
            ApiError::validation_msg(
                "missing_actor",
                None,
                "Missing or invalid X-User-ID header",
            )
        })?;
        let trace_id = header_str(headers, "X-Trace-ID")
            .and_then(|s| Uuid::parse_str(&s).ok())
            .or_else(|| Some(Uuid::new_v4()));

        if let Some(tid) = trace_id.as_ref() {
            Span::current().record("trace_id", tracing::field::display(tid));
        }

        Ok(CallerCtxExtractor(CallerContext {
            actor,
            ip: ip_from_headers(headers),
            user_agent: header_str(headers, "User-Agent"),
            trace_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn actor_requires_valid_user_id() {
        assert!(actor_from_headers(&headers(&[])).is_none());
        assert!(actor_from_headers(&headers(&[("X-User-ID", "not-a-uuid")])).is_none());

        let id = Uuid::new_v4();
        let map = headers(&[
            ("X-User-ID", &id.to_string()),
            ("X-User-Name", "Dana Ops"),
            ("X-User-Role", "manager"),
        ]);
        let actor = actor_from_headers(&map).unwrap();
        assert_eq!(actor.id, Some(id));
        assert_eq!(actor.name.as_deref(), Some("Dana Ops"));
        assert_eq!(actor.role.as_deref(), Some("manager"));
    }

    #[test]
    fn ip_takes_first_forwarded_hop() {
        let map = headers(&[("X-Forwarded-For", "10.1.2.3, 172.16.0.9")]);
        assert_eq!(ip_from_headers(&map).as_deref(), Some("10.1.2.3"));
    }
}
