//! `auth.login` / `auth.logout` — not named [MODULE]s in spec.md, but
//! implied by scenario S1 and supplemented per SPEC_FULL.md §3: a thin
//! registration over `stratum-security`/`stratum-data-sqlx` rather than
//! a module of its own.

use serde::Deserialize;
use std::sync::Arc;
use stratum_core::AppError;
use stratum_data::domain::Session;
use stratum_data_sqlx::UserAccountStorage;

use crate::state::find_or_create_personal_access;
use crate::step::{Call, FnStep, MethodChain, ResolveAccess, Step, TrustedOrigin};

pub fn login_chain() -> MethodChain {
    MethodChain::new(vec![
        Arc::new(TrustedOrigin) as Arc<dyn Step>,
        Arc::new(FnStep(login_step)) as Arc<dyn Step>,
    ])
}

pub fn logout_chain() -> MethodChain {
    MethodChain::new(vec![
        Arc::new(ResolveAccess) as Arc<dyn Step>,
        Arc::new(FnStep(logout_step)) as Arc<dyn Step>,
    ])
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginParams {
    username: String,
    password: String,
    app_id: String,
}

/// Credential verification is constant-time (`UserAccountStorage::verify_password`)
/// and never distinguishes "no such user" from "wrong password" in the
/// returned error, to avoid username enumeration.
async fn login_step(call: &mut Call<'_>) -> Result<(), AppError> {
    let params: LoginParams = serde_json::from_value(call.params.clone())
        .map_err(|e| AppError::invalid_parameters_format(e.to_string()))?;

    let user = call
        .app
        .local_store
        .find_user_by_username(&params.username)
        .await?
        .ok_or_else(|| AppError::invalid_credentials("invalid username or password"))?;

    let hash = call
        .app
        .user_accounts
        .current_password_hash(&user.user_id)
        .await?
        .ok_or_else(|| AppError::invalid_credentials("invalid username or password"))?;

    if !UserAccountStorage::verify_password(&params.password, &hash) {
        return Err(AppError::invalid_credentials("invalid username or password"));
    }

    let access =
        find_or_create_personal_access(call.app, &user.user_id, &params.app_id, None).await?;

    let now = call.app.now();
    let ttl = call.app.security.session_ttl_seconds;
    if call.app.local_store.get_session(&access.token).await?.is_some() {
        call.app.local_store.touch_session(&access.token, now, ttl).await?;
    } else {
        let session = Session {
            token: access.token.clone(),
            username: user.username.clone(),
            app_id: params.app_id.clone(),
            expires: now + ttl,
        };
        call.app.local_store.create_session(&session).await?;
    }

    call.result = serde_json::json!({
        "token": access.token,
        "apiEndpoint": format!("https://{}.stratum.local/", user.username),
        "preferredLanguage": user.language,
    });
    call.user_id = Some(user.user_id);
    call.access = Some(access);
    Ok(())
}

async fn logout_step(call: &mut Call<'_>) -> Result<(), AppError> {
    call.app.local_store.expire_session(&call.access().token).await?;
    call.result = serde_json::json!({});
    Ok(())
}
