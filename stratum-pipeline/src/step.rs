//! The method pipeline's unit of work.
//!
//! Per spec.md §9's design note, prototype-style callback chains are
//! replaced here by a plain `Vec` of steps, each an explicit function
//! returning a typed result rather than invoking a `next` continuation.
//! Steps run in registration order against a shared [`Call`]; the first
//! error aborts the remaining steps. Audit firing is deliberately *not*
//! modeled as a step — see [`crate::registry::run_call`] — because it
//! must still fire when an earlier step aborts the chain.

use async_trait::async_trait;
use serde_json::Value;
use stratum_context::MethodContext;
use stratum_core::AppError;
use stratum_security::{Access, AccessLogic};
use std::sync::Arc;

use crate::state::AppState;

/// Per-call working state threaded through every step of a method's
/// chain: the request's `MethodContext`, the deserialized `params`, and
/// the `result` value steps accumulate into.
pub struct Call<'a> {
    pub app: &'a AppState,
    pub ctx: &'a mut MethodContext,
    pub method: String,
    pub params: Value,
    pub result: Value,
    pub user_id: Option<String>,
    pub access: Option<Access>,
    pub access_logic: Option<Arc<AccessLogic>>,
}

impl<'a> Call<'a> {
    pub fn new(app: &'a AppState, ctx: &'a mut MethodContext, method: impl Into<String>, params: Value) -> Self {
        Call {
            app,
            ctx,
            method: method.into(),
            params,
            result: Value::Null,
            user_id: None,
            access: None,
            access_logic: None,
        }
    }

    /// Resolve (and cache for the rest of the call) the caller's
    /// `userId` and `Access`.
    pub async fn resolve_caller(&mut self) -> Result<(), AppError> {
        if self.user_id.is_some() && self.access.is_some() {
            return Ok(());
        }
        let now = self.app.now();
        let access = self.ctx.access(self.app, self.app, now).await?.clone();
        let user_id = self.ctx.user_id(self.app).await?.to_string();
        self.user_id = Some(user_id);
        self.access = Some(access);
        Ok(())
    }

    pub fn user_id(&self) -> &str {
        self.user_id.as_deref().expect("resolve_caller not run")
    }

    pub fn access(&self) -> &Access {
        self.access.as_ref().expect("resolve_caller not run")
    }

    /// Resolve (and cache) the `AccessLogic` for the already-resolved
    /// access. Must run after [`Call::resolve_caller`].
    pub async fn resolve_access_logic(&mut self) -> Result<(), AppError> {
        if self.access_logic.is_some() {
            return Ok(());
        }
        let logic = self.app.access_logic_for(self.user_id(), self.access()).await?;
        self.access_logic = Some(logic);
        Ok(())
    }

    pub fn access_logic(&self) -> &AccessLogic {
        self.access_logic.as_deref().expect("resolve_access_logic not run")
    }
}

/// A single named stage of a method's chain.
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self, call: &mut Call<'_>) -> Result<(), AppError>;
}

/// `ResolveAccess`: the common "authenticate the caller" step every
/// non-`auth.login` method chain starts with.
pub struct ResolveAccess;

#[async_trait]
impl Step for ResolveAccess {
    async fn run(&self, call: &mut Call<'_>) -> Result<(), AppError> {
        call.resolve_caller().await?;
        call.resolve_access_logic().await
    }
}

/// Rejects the call unless the request's declared source name matches one
/// of `security.trusted_app_patterns` (each compiled as a regex). An empty
/// pattern list trusts every origin — the default posture for a deployment
/// that hasn't configured trusted apps. Used by `auth.login`'s chain per
/// spec.md §4.1's "trusted-app origin check (regex against trustedApps)".
pub struct TrustedOrigin;

#[async_trait]
impl Step for TrustedOrigin {
    async fn run(&self, call: &mut Call<'_>) -> Result<(), AppError> {
        let patterns = &call.app.security.trusted_app_patterns;
        if patterns.is_empty() {
            return Ok(());
        }
        let origin = &call.ctx.source.name;
        let trusted = patterns.iter().any(|pattern| {
            regex::Regex::new(pattern)
                .map(|re| re.is_match(origin))
                .unwrap_or(false)
        });
        if trusted {
            Ok(())
        } else {
            Err(AppError::forbidden(format!("origin {origin} is not a trusted app")))
        }
    }
}

/// A step built from an async closure — lets method bodies register
/// themselves as the chain's last step without a dedicated type.
pub struct FnStep<F>(pub F);

#[async_trait]
impl<F, Fut> Step for FnStep<F>
where
    F: Fn(&mut Call<'_>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), AppError>> + Send,
{
    async fn run(&self, call: &mut Call<'_>) -> Result<(), AppError> {
        (self.0)(call).await
    }
}

/// A registered method: its step chain plus whether it participates in
/// auditing (every method is audited by default; spec.md §4.8 names
/// audited methods, not unaudited ones, so `audited` defaults to `true`
/// and is only set `false` for methods with no durable effect worth
/// logging — none currently registered).
pub struct MethodChain {
    pub steps: Vec<Arc<dyn Step>>,
    pub audited: bool,
}

impl MethodChain {
    pub fn new(steps: Vec<Arc<dyn Step>>) -> Self {
        MethodChain { steps, audited: true }
    }
}
