//! Method registry: dotted method name → [`MethodChain`], and the single
//! call-running entry point every transport (HTTP adapter, `batch`)
//! drives through.

use std::collections::HashMap;

use serde_json::Value;
use stratum_audit::AuditRecord;
use stratum_context::MethodContext;
use stratum_core::AppError;

use crate::methods;
use crate::state::AppState;
use crate::step::{Call, MethodChain};

/// `batch` is handled here directly rather than via the step system: its
/// sub-calls loop back through [`run_call`], and a `Step` has no handle
/// to the registry that is running it.
const BATCH_METHOD: &str = "batch";

pub struct MethodRegistry {
    chains: HashMap<&'static str, MethodChain>,
}

impl MethodRegistry {
    /// The full set of methods this workspace implements: `auth.*`,
    /// `streams.*`, `events.*`, `accesses.*`, `account.*`, `batch`.
    pub fn build() -> Self {
        let mut chains = HashMap::new();
        chains.insert("auth.login", methods::auth::login_chain());
        chains.insert("auth.logout", methods::auth::logout_chain());
        chains.insert("streams.get", methods::streams::get_chain());
        chains.insert("streams.create", methods::streams::create_chain());
        chains.insert("streams.update", methods::streams::update_chain());
        chains.insert("streams.delete", methods::streams::delete_chain());
        chains.insert("events.get", methods::events::get_chain());
        chains.insert("events.create", methods::events::create_chain());
        chains.insert("events.update", methods::events::update_chain());
        chains.insert("events.delete", methods::events::delete_chain());
        chains.insert("accesses.get", methods::accesses::get_chain());
        chains.insert("accesses.create", methods::accesses::create_chain());
        chains.insert("accesses.delete", methods::accesses::delete_chain());
        chains.insert("account.get", methods::account::get_chain());
        chains.insert("account.update", methods::account::update_chain());
        MethodRegistry { chains }
    }

    pub fn get(&self, method: &str) -> Option<&MethodChain> {
        self.chains.get(method)
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::build()
    }
}

/// Run one method call end to end: resolve the chain, execute its steps
/// in order (first error aborts the rest), and always fire the audit
/// record afterward with the error kind if the chain failed — per
/// spec.md §4.1, audit firing must survive an aborted chain, which is
/// why it lives here rather than as a step in the chain itself.
pub async fn run_call(
    registry: &MethodRegistry,
    app: &AppState,
    ctx: &mut MethodContext,
    method: &str,
    params: Value,
) -> Result<Value, AppError> {
    if method == BATCH_METHOD {
        return run_batch_method(registry, app, ctx, params).await;
    }

    let Some(chain) = registry.get(method) else {
        return Err(AppError::unknown_resource(format!("no such method: {method}")));
    };

    let mut call = Call::new(app, ctx, method, params.clone());
    let mut outcome: Result<(), AppError> = Ok(());
    for step in &chain.steps {
        if let Err(e) = step.run(&mut call).await {
            outcome = Err(e);
            break;
        }
    }

    if chain.audited {
        let source = call.ctx.source.clone();
        let access_id = call.access.as_ref().map(|a| a.id.clone());
        let record = match &outcome {
            Ok(_) => AuditRecord::success(method, params, source),
            Err(e) => AuditRecord::error(method, params, source, e.id(), e.message.clone()),
        };
        let record = match access_id {
            Some(id) => record.with_access_id(id),
            None => record,
        };
        let audit_user_id = call.user_id.clone().unwrap_or_else(|| "unknown".to_string());
        app.audit.record(&audit_user_id, record).await;
    }

    outcome.map(|_| call.result)
}

/// A single `batch` sub-call input: `{method, params}`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BatchItem {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// `batch`'s own entry point: resolve the caller once (so the batch call
/// itself can be audited with an `accessId`), run every sub-call in
/// order against the same `ctx`, and wrap up `{results: [...]}`. A
/// sub-call's failure is captured in its own result slot, not propagated
/// — per spec.md §4.1 "individual failures do not abort the batch".
async fn run_batch_method(
    registry: &MethodRegistry,
    app: &AppState,
    ctx: &mut MethodContext,
    params: Value,
) -> Result<Value, AppError> {
    let items: Vec<BatchItem> = serde_json::from_value(
        params.get("calls").cloned().unwrap_or(Value::Null),
    )
    .map_err(|e| AppError::invalid_parameters_format(e.to_string()))?;

    let now = app.now();
    let access = ctx.access(app, app, now).await?.clone();
    let user_id = ctx.user_id(app).await?.to_string();

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        // Boxed to break the `run_call` ⇄ `run_batch_method` recursion
        // cycle, which an async fn cannot size without an indirection.
        let result: Result<Value, AppError> =
            Box::pin(run_call(registry, app, ctx, &item.method, item.params)).await;
        results.push(match result {
            Ok(value) => serde_json::json!({ "result": value }),
            Err(err) => serde_json::json!({
                "error": {
                    "id": err.id(),
                    "message": err.message,
                }
            }),
        });
    }

    let record = AuditRecord::success(BATCH_METHOD, params, ctx.source.clone()).with_access_id(access.id.clone());
    app.audit.record(&user_id, record).await;

    Ok(serde_json::json!({ "results": results }))
}
