//! `AppState`: the explicit application value every component is built
//! from once at startup and passed by reference into every call — the
//! concrete form of spec.md §9's "global singletons become an explicit
//! application value".

use std::sync::Arc;

use chrono::Utc;
use stratum_audit::AuditRecorder;
use stratum_cache::UserCache;
use stratum_context::{CustomAuthHook, MethodContext, UserResolver};
use stratum_core::{AppError, ConfigError, ConfigProperties, PropertyMeta, StratumConfig};
use stratum_data_sqlx::{LocalStore, UserAccountStorage};
use stratum_mall::{Mall, StreamForestSnapshot};
use stratum_security::{Access, AccessKind, AccessLogic, SecurityError};
use stratum_synchro::Synchro;

/// `security.*` configuration: session lifetime, trusted-app origin
/// patterns, password history depth.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub session_ttl_seconds: i64,
    /// Regex-like glob patterns matched against the request's declared
    /// `appId`/origin; empty means every origin is trusted (the default
    /// posture for a deployment that hasn't configured trusted apps).
    pub trusted_app_patterns: Vec<String>,
    pub password_history_length: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            session_ttl_seconds: 3600,
            trusted_app_patterns: Vec::new(),
            password_history_length: 5,
        }
    }
}

impl ConfigProperties for SecurityConfig {
    fn prefix() -> &'static str {
        "security"
    }

    fn properties_metadata() -> Vec<PropertyMeta> {
        vec![
            PropertyMeta {
                key: "session_ttl_seconds".to_string(),
                full_key: "security.session_ttl_seconds".to_string(),
                type_name: "i64",
                required: false,
                is_section: false,
                default_value: Some("3600".to_string()),
                env_var: None,
                description: Some("personal-session idle lifetime before touch_session fails".to_string()),
            },
            PropertyMeta {
                key: "trusted_app_patterns".to_string(),
                full_key: "security.trusted_app_patterns".to_string(),
                type_name: "Vec<String>",
                required: false,
                is_section: false,
                default_value: Some("[]".to_string()),
                env_var: None,
                description: Some(
                    "regexes matched against auth.login's declared origin; empty trusts every origin"
                        .to_string(),
                ),
            },
            PropertyMeta {
                key: "password_history_length".to_string(),
                full_key: "security.password_history_length".to_string(),
                type_name: "u32",
                required: false,
                is_section: false,
                default_value: Some("5".to_string()),
                env_var: None,
                description: Some("number of prior password hashes rejected on reuse".to_string()),
            },
        ]
    }

    fn from_config(config: &StratumConfig) -> Result<Self, ConfigError> {
        Ok(SecurityConfig {
            session_ttl_seconds: config.get_or("security.session_ttl_seconds", 3600),
            trusted_app_patterns: config.get_or("security.trusted_app_patterns", Vec::new()),
            password_history_length: config.get_or("security.password_history_length", 5i64) as u32,
        })
    }
}

pub struct AppState {
    pub mall: Arc<Mall>,
    pub local_store: Arc<LocalStore>,
    pub user_accounts: Arc<UserAccountStorage>,
    pub user_cache: Arc<UserCache<Arc<StreamForestSnapshot>>>,
    pub audit: Arc<AuditRecorder>,
    pub synchro: Option<Arc<Synchro>>,
    pub security: SecurityConfig,
}

impl AppState {
    pub fn new(
        mall: Arc<Mall>,
        local_store: Arc<LocalStore>,
        user_accounts: Arc<UserAccountStorage>,
        user_cache: Arc<UserCache<Arc<StreamForestSnapshot>>>,
        audit: Arc<AuditRecorder>,
        synchro: Option<Arc<Synchro>>,
        security: SecurityConfig,
    ) -> Self {
        AppState {
            mall,
            local_store,
            user_accounts,
            user_cache,
            audit,
            synchro,
            security,
        }
    }

    /// Resolve the `AccessLogic` for a resolved access, consulting the
    /// cache first and rebuilding it from a freshly-fetched stream forest
    /// on a miss.
    pub async fn access_logic_for(&self, user_id: &str, access: &Access) -> Result<Arc<AccessLogic>, AppError> {
        if let Some(cached) = self.user_cache.access_logic_by_access_id(&access.id) {
            return Ok(cached);
        }
        let forest = self.stream_forest_for(user_id).await?;
        let logic = Arc::new(AccessLogic::build(access, forest.as_ref()));
        self.user_cache
            .set_access_logic(user_id, &access.id, &access.token, logic.clone());
        Ok(logic)
    }

    pub async fn stream_forest_for(&self, user_id: &str) -> Result<Arc<StreamForestSnapshot>, AppError> {
        if let Some(cached) = self.user_cache.stream_forest(user_id) {
            return Ok(cached);
        }
        let snapshot = Arc::new(StreamForestSnapshot::fetch(&self.mall, user_id).await?);
        self.user_cache.set_stream_forest(user_id, snapshot.clone());
        Ok(snapshot)
    }

    /// Apply an invalidation locally and, if a broker is configured,
    /// publish it — locally first, so a caller observing success has
    /// already seen its own write (spec.md §5's read-your-writes rule).
    pub async fn invalidate(&self, invalidation: stratum_cache::Invalidation) {
        self.user_cache.apply(&invalidation);
        if let Some(synchro) = &self.synchro {
            if let Err(e) = synchro.publish(&invalidation).await {
                tracing::warn!(error = %e, "failed to publish cache invalidation");
            }
        }
    }

    pub fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

impl UserResolver for AppState {
    fn user_id_for_username(
        &self,
        username: &str,
    ) -> impl std::future::Future<Output = Result<String, AppError>> + Send {
        async move {
            if let Some(user_id) = self.user_cache.user_id_for_username(username) {
                return Ok(user_id);
            }
            let user = self
                .local_store
                .find_user_by_username(username)
                .await?
                .ok_or_else(|| AppError::unknown_resource(format!("no such user: {username}")))?;
            self.user_cache.set_user_id_for_username(username, &user.user_id);
            Ok(user.user_id)
        }
    }
}

impl stratum_context::AccessResolver for AppState {
    fn access_by_token(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Access, SecurityError>> + Send {
        async move {
            let (_, access) = self
                .local_store
                .find_access_by_token(token)
                .await
                .map_err(|e| SecurityError::Internal(e.to_string()))?
                .ok_or(SecurityError::UnknownToken)?;
            if access.deleted {
                return Err(SecurityError::UnknownToken);
            }
            Ok(access)
        }
    }

    fn touch_session(&self, token: &str) -> impl std::future::Future<Output = Result<(), ()>> + Send {
        async move {
            match self
                .local_store
                .touch_session(token, self.now(), self.security.session_ttl_seconds)
                .await
            {
                Ok(true) => Ok(()),
                _ => Err(()),
            }
        }
    }
}

impl CustomAuthHook for AppState {
    fn check(&self, _ctx: &MethodContext) -> impl std::future::Future<Output = Result<(), SecurityError>> + Send {
        async { Ok(()) }
    }
}

/// Resolve `userId` for the context's username and the raw `Access` for
/// its token in one step — the pair almost every method body needs.
pub async fn resolve_caller(app: &AppState, ctx: &mut MethodContext) -> Result<(String, Access), AppError> {
    let now = app.now();
    let access = ctx.access(app, app, now).await?.clone();
    let user_id = ctx.user_id(app).await?.to_string();
    Ok((user_id, access))
}

/// `canCreateAccess`/`canDeleteAccess` need the *other* access; fetch by id
/// within the same user.
pub async fn find_access_by_id(app: &AppState, user_id: &str, access_id: &str) -> Result<Access, AppError> {
    app.local_store
        .find_access_by_id(user_id, access_id)
        .await?
        .ok_or_else(|| AppError::unknown_resource(format!("no such access: {access_id}")))
}

/// Whether `kind` is allowed to self-issue a personal access of `name`,
/// creating it idempotently if absent — the `auth.login` path.
pub async fn find_or_create_personal_access(
    app: &AppState,
    user_id: &str,
    name: &str,
    created_by: Option<String>,
) -> Result<Access, AppError> {
    let existing = app.local_store.list_accesses(user_id, false).await?;
    if let Some(found) = existing
        .into_iter()
        .find(|a| a.kind == AccessKind::Personal && a.name == name)
    {
        return Ok(found);
    }
    let access = Access {
        id: uuid::Uuid::new_v4().to_string(),
        token: new_token(),
        kind: AccessKind::Personal,
        name: name.to_string(),
        // Stored empty: `AccessLogic::build` grants a personal access an
        // implicit `manage *` regardless of its stored permissions, per
        // spec.md's "a personal access is implicit manage *".
        permissions: Vec::new(),
        expires: None,
        created_by,
        deleted: false,
    };
    app.local_store.create_access(user_id, &access).await?;
    Ok(access)
}

pub fn new_token() -> String {
    format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod config_tests {
    use super::*;
    use stratum_core::ConfigValue;

    #[test]
    fn defaults_apply_when_section_absent() {
        let config = StratumConfig::empty();
        let security = SecurityConfig::from_config(&config).unwrap();
        assert_eq!(security.session_ttl_seconds, 3600);
        assert!(security.trusted_app_patterns.is_empty());
        assert_eq!(security.password_history_length, 5);
    }

    #[test]
    fn trusted_app_patterns_are_read_from_config() {
        let mut config = StratumConfig::empty();
        config.set(
            "security.trusted_app_patterns",
            ConfigValue::List(vec![ConfigValue::String("^https://web\\.example\\.test$".into())]),
        );
        let security = SecurityConfig::from_config(&config).unwrap();
        assert_eq!(security.trusted_app_patterns, vec!["^https://web\\.example\\.test$".to_string()]);
    }
}
