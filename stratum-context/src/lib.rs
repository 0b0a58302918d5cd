//! Per-request `MethodContext`.
//!
//! Built once per request from `{source, username, auth, headers, query}`.
//! Resolution of the user id and the access record is lazy and driven by
//! resolver traits supplied by the caller (`stratum-pipeline`, backed by
//! `stratum-mall`/`stratum-security`) — this crate has no dependency on
//! storage or the Mall, keeping it a pure per-request value type.

use std::collections::HashMap;
use std::future::Future;

use serde::{Deserialize, Serialize};
use stratum_core::http::HeaderMap;
use stratum_core::AppError;
use stratum_security::{Access, AccessKind, SecurityError};

/// Where the request came from, stamped into audit records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub ip: String,
}

/// The `auth` string split into its token and optional caller id:
/// `"<token>"` or `"<token> <callerId>"`.
#[derive(Debug, Clone)]
pub struct ParsedAuth {
    pub token: String,
    pub caller_id: Option<String>,
}

impl ParsedAuth {
    pub fn parse(auth: &str) -> Self {
        match auth.split_once(' ') {
            Some((token, caller)) if !caller.is_empty() => ParsedAuth {
                token: token.to_string(),
                caller_id: Some(caller.to_string()),
            },
            _ => ParsedAuth {
                token: auth.to_string(),
                caller_id: None,
            },
        }
    }
}

/// Resolves a username to a `userId`.
pub trait UserResolver: Send + Sync {
    fn user_id_for_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Resolves a raw token to an `Access`, and touches the personal session
/// entry (if any) on consumption.
pub trait AccessResolver: Send + Sync {
    fn access_by_token(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Access, SecurityError>> + Send;

    /// Renews the session tied to a personal token; `Err` means the
    /// session has expired, which must be reported as `invalid-access-token`
    /// even if the access record itself looks valid (session touch races
    /// with expiry are expected and always resolve in expiry's favor).
    fn touch_session(&self, token: &str) -> impl Future<Output = Result<(), ()>> + Send;
}

/// Runs after the access is resolved but before it is trusted — lets a
/// deployment plug in an additional authentication check (e.g. an IP
/// allowlist). Default is a no-op.
pub trait CustomAuthHook: Send + Sync {
    fn check(&self, ctx: &MethodContext) -> impl Future<Output = Result<(), SecurityError>> + Send;
}

pub struct NoCustomAuthHook;

impl CustomAuthHook for NoCustomAuthHook {
    fn check(&self, _ctx: &MethodContext) -> impl Future<Output = Result<(), SecurityError>> + Send {
        async { Ok(()) }
    }
}

/// Per-request state built once and threaded through every step of a
/// method's chain.
pub struct MethodContext {
    pub source: Source,
    pub username: String,
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
    /// Correlation id for tracing spans and audit records.
    pub trace_id: String,
    auth: Option<ParsedAuth>,
    user_id: Option<String>,
    access: Option<Access>,
}

impl MethodContext {
    pub fn new(
        source: Source,
        username: String,
        auth: Option<&str>,
        headers: HeaderMap,
        query: HashMap<String, String>,
        trace_id: String,
    ) -> Self {
        MethodContext {
            source,
            username,
            headers,
            query,
            trace_id,
            auth: auth.map(ParsedAuth::parse),
            user_id: None,
            access: None,
        }
    }

    pub fn auth(&self) -> Option<&ParsedAuth> {
        self.auth.as_ref()
    }

    pub async fn user_id<R: UserResolver>(&mut self, resolver: &R) -> Result<&str, AppError> {
        if self.user_id.is_none() {
            let id = resolver.user_id_for_username(&self.username).await?;
            self.user_id = Some(id);
        }
        Ok(self.user_id.as_deref().unwrap())
    }

    /// Resolve (and cache) the access for this request, applying the
    /// failure-mode mapping: missing token → 401 invalid-access-token;
    /// unknown token → 403 invalid-access-token; expired access →
    /// forbidden; expired personal session → 403 invalid-access-token;
    /// custom-auth rejection → 401 invalid-access-token.
    pub async fn access<R: AccessResolver, H: CustomAuthHook>(
        &mut self,
        resolver: &R,
        hook: &H,
        now: i64,
    ) -> Result<&Access, AppError> {
        if self.access.is_none() {
            let auth = self.auth.clone().ok_or(SecurityError::MissingToken)?;
            let access = resolver
                .access_by_token(&auth.token)
                .await
                .map_err(AppError::from)?;

            if access.is_expired(now) {
                return Err(SecurityError::AccessExpired.into());
            }

            if access.kind == AccessKind::Personal
                && resolver.touch_session(&auth.token).await.is_err()
            {
                return Err(SecurityError::SessionExpired.into());
            }

            self.access = Some(access);
            hook.check(self)
                .await
                .map_err(|_| SecurityError::CustomAuthRejected)?;
            tracing::debug!(trace_id = %self.trace_id, username = %self.username, "access resolved");
        }
        Ok(self.access.as_ref().unwrap())
    }

    /// `accessId` or `accessId + " " + callerId`, stamped into
    /// `createdBy`/`modifiedBy` of every mutation. `None` until the access
    /// has been resolved.
    pub fn tracking_author_id(&self) -> Option<String> {
        let access = self.access.as_ref()?;
        match self.auth.as_ref().and_then(|a| a.caller_id.as_ref()) {
            Some(caller_id) => Some(format!("{} {}", access.id, caller_id)),
            None => Some(access.id.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_security::{Level, Permission};

    #[test]
    fn parses_token_only() {
        let parsed = ParsedAuth::parse("tok123");
        assert_eq!(parsed.token, "tok123");
        assert!(parsed.caller_id.is_none());
    }

    #[test]
    fn parses_token_and_caller_id() {
        let parsed = ParsedAuth::parse("tok123 my-app");
        assert_eq!(parsed.token, "tok123");
        assert_eq!(parsed.caller_id.as_deref(), Some("my-app"));
    }

    struct StubResolver;

    impl UserResolver for StubResolver {
        fn user_id_for_username(
            &self,
            _username: &str,
        ) -> impl Future<Output = Result<String, AppError>> + Send {
            async { Ok("user-1".to_string()) }
        }
    }

    impl AccessResolver for StubResolver {
        fn access_by_token(
            &self,
            token: &str,
        ) -> impl Future<Output = Result<Access, SecurityError>> + Send {
            let token = token.to_string();
            async move {
                Ok(Access {
                    id: "access-1".into(),
                    token,
                    kind: AccessKind::App,
                    name: "test".into(),
                    permissions: vec![Permission::Stream {
                        stream_id: "*".into(),
                        level: Level::Read,
                    }],
                    expires: None,
                    created_by: None,
                    deleted: false,
                })
            }
        }

        fn touch_session(&self, _token: &str) -> impl Future<Output = Result<(), ()>> + Send {
            async { Ok(()) }
        }
    }

    fn new_ctx(auth: Option<&str>) -> MethodContext {
        MethodContext::new(
            Source {
                name: "test".into(),
                ip: "127.0.0.1".into(),
            },
            "alice".into(),
            auth,
            HeaderMap::new(),
            HashMap::new(),
            "trace-1".into(),
        )
    }

    #[tokio::test]
    async fn missing_token_fails_closed() {
        let mut ctx = new_ctx(None);
        let err = ctx
            .access(&StubResolver, &NoCustomAuthHook, 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind, stratum_core::ErrorKind::InvalidAccessToken);
    }

    #[tokio::test]
    async fn resolves_access_and_tracking_author_id() {
        let mut ctx = new_ctx(Some("tok123 caller-app"));
        ctx.access(&StubResolver, &NoCustomAuthHook, 0).await.unwrap();
        assert_eq!(
            ctx.tracking_author_id().as_deref(),
            Some("access-1 caller-app")
        );
    }

    #[tokio::test]
    async fn tracking_author_id_without_caller_is_just_access_id() {
        let mut ctx = new_ctx(Some("tok123"));
        ctx.access(&StubResolver, &NoCustomAuthHook, 0).await.unwrap();
        assert_eq!(ctx.tracking_author_id().as_deref(), Some("access-1"));
    }

    #[tokio::test]
    async fn user_id_is_cached_after_first_resolution() {
        let mut ctx = new_ctx(None);
        let id = ctx.user_id(&StubResolver).await.unwrap().to_string();
        assert_eq!(id, "user-1");
    }
}
