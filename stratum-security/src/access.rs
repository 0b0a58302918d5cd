use crate::permission::Permission;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Personal,
    App,
    Shared,
}

/// An access record: an opaque high-entropy token plus the permissions it
/// carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Access {
    pub id: String,
    pub token: String,
    pub kind: AccessKind,
    pub name: String,
    pub permissions: Vec<Permission>,
    /// Unix seconds; `None` never expires.
    pub expires: Option<i64>,
    pub created_by: Option<String>,
    pub deleted: bool,
}

impl Access {
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires, Some(exp) if exp < now)
    }

    /// `feature:selfRevoke` setting, if present among the access's
    /// permissions.
    pub fn self_revoke_setting(&self) -> Option<&str> {
        self.permissions.iter().find_map(|p| match p {
            Permission::Feature { feature, setting } if feature == "selfRevoke" => {
                Some(setting.as_str())
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::Level;

    fn access(kind: AccessKind) -> Access {
        Access {
            id: "a1".into(),
            token: "tok".into(),
            kind,
            name: "test".into(),
            permissions: vec![Permission::Stream {
                stream_id: "A".into(),
                level: Level::Manage,
            }],
            expires: None,
            created_by: None,
            deleted: false,
        }
    }

    #[test]
    fn never_expires_without_expires_field() {
        assert!(!access(AccessKind::Personal).is_expired(i64::MAX));
    }

    #[test]
    fn expired_when_past_expiry() {
        let mut a = access(AccessKind::App);
        a.expires = Some(100);
        assert!(a.is_expired(200));
        assert!(!a.is_expired(50));
    }

    #[test]
    fn self_revoke_setting_reads_feature_permission() {
        let mut a = access(AccessKind::App);
        a.permissions.push(Permission::Feature {
            feature: "selfRevoke".into(),
            setting: "forbidden".into(),
        });
        assert_eq!(a.self_revoke_setting(), Some("forbidden"));
    }
}
