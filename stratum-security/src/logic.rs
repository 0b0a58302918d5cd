use crate::access::{Access, AccessKind};
use crate::permission::{Level, Permission};
use std::collections::HashMap;

/// The subset of the user's stream forest `AccessLogic` needs to expand
/// permissions down the tree. Kept as a trait — per the design note,
/// `AccessLogic` is a pure function over `(access, streamForest)`, with no
/// back-reference to `Mall` or storage.
pub trait StreamForest {
    /// Every descendant (not just direct children) of `stream_id`, in no
    /// particular order.
    fn descendants_of(&self, stream_id: &str) -> Vec<String>;
}

/// Computed, expanded permission tables for one access. Cheap to clone;
/// this is what `stratum-cache` keys by `accessId` and by `token`.
#[derive(Debug, Clone, Default)]
pub struct AccessLogic {
    stream_permissions: HashMap<String, Level>,
    tag_permissions: HashMap<String, Level>,
    features: HashMap<String, String>,
    root_wildcard: Option<Level>,
}

impl AccessLogic {
    /// Expand `access.permissions` against `forest` into the
    /// `streamPermissionsMap`/`tagPermissionsMap` per the expansion rules.
    pub fn build(access: &Access, forest: &impl StreamForest) -> Self {
        let mut stream_permissions = HashMap::new();
        let mut tag_permissions = HashMap::new();
        let mut features = HashMap::new();
        let mut root_wildcard = None;

        for perm in &access.permissions {
            match perm {
                Permission::Stream { stream_id, level } if stream_id == "*" => {
                    root_wildcard = Some(higher(root_wildcard, *level));
                }
                Permission::Stream { stream_id, level } => {
                    let entry = stream_permissions.entry(stream_id.clone()).or_insert(*level);
                    if level.rank() > entry.rank() {
                        *entry = *level;
                    }
                }
                Permission::Tag { tag, level } => {
                    let entry = tag_permissions.entry(tag.clone()).or_insert(*level);
                    if level.rank() > entry.rank() {
                        *entry = *level;
                    }
                }
                Permission::Feature { feature, setting } => {
                    features.insert(feature.clone(), setting.clone());
                }
            }
        }

        // Rule 2: explicit stream permissions propagate to every
        // descendant unless the descendant already holds a higher-or-equal
        // level (which includes its own explicit grant, already in the map).
        let explicit: Vec<(String, Level)> = stream_permissions
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        for (stream_id, level) in explicit {
            for descendant in forest.descendants_of(&stream_id) {
                let better = match stream_permissions.get(&descendant) {
                    None => true,
                    Some(existing) => existing.rank() < level.rank(),
                };
                if better {
                    stream_permissions.insert(descendant, level);
                }
            }
        }

        // spec.md: "a personal access is implicit manage *" — independent
        // of whatever permissions happen to be stored on the record, so a
        // personal access minted with no explicit permissions (as
        // `auth.login` does) still grants everything rather than nothing.
        // Applied before rule 4 below so it also picks up the symmetric
        // tag="*" read that a root wildcard normally carries.
        if access.kind == AccessKind::Personal {
            root_wildcard = Some(higher(root_wildcard, Level::Manage));
        }

        // Rule 4: a stream-only access also gets an implicit tag="*" read,
        // and symmetrically a tag-only access gets an implicit stream="*"
        // read.
        if tag_permissions.is_empty() && (!stream_permissions.is_empty() || root_wildcard.is_some())
        {
            tag_permissions.insert("*".to_string(), Level::Read);
        }
        if stream_permissions.is_empty() && root_wildcard.is_none() && !tag_permissions.is_empty() {
            root_wildcard = Some(Level::Read);
        }

        AccessLogic {
            stream_permissions,
            tag_permissions,
            features,
            root_wildcard,
        }
    }

    /// Raw level for a stream id, falling back to the `*` wildcard
    /// (rule 3: `*` "short-circuits any explicit id lookup that misses").
    fn level_for_stream(&self, stream_id: &str) -> Option<Level> {
        self.stream_permissions
            .get(stream_id)
            .copied()
            .or(self.root_wildcard)
    }

    pub fn level_for_tag(&self, tag: &str) -> Option<Level> {
        self.tag_permissions
            .get(tag)
            .copied()
            .or_else(|| self.tag_permissions.get("*").copied())
    }

    /// `create-only` never grants read, regardless of rank (mirrors
    /// `can_read_stream`).
    pub fn can_read_tag(&self, tag: &str) -> bool {
        matches!(
            self.level_for_tag(tag),
            Some(l) if l.rank() >= Level::Read.rank() && l != Level::CreateOnly
        )
    }

    pub fn feature_setting(&self, feature: &str) -> Option<&str> {
        self.features.get(feature).map(|s| s.as_str())
    }

    /// Even `create-only` can list a stream in order to create under it —
    /// this is the load-bearing open question (a) from the design notes,
    /// kept as-is rather than guessed.
    pub fn can_list_stream(&self, stream_id: &str) -> bool {
        self.level_for_stream(stream_id).is_some()
    }

    /// `create-only` never grants read, regardless of rank.
    pub fn can_read_stream(&self, stream_id: &str) -> bool {
        matches!(
            self.level_for_stream(stream_id),
            Some(l) if l.rank() >= Level::Read.rank() && l != Level::CreateOnly
        )
    }

    pub fn can_contribute_to_stream(&self, stream_id: &str) -> bool {
        matches!(
            self.level_for_stream(stream_id),
            Some(l) if l.rank() >= Level::Contribute.rank()
        )
    }

    /// Same threshold as `can_contribute_to_stream` but `create-only`
    /// shares that rank without granting the capability to update.
    pub fn can_update_stream(&self, stream_id: &str) -> bool {
        matches!(
            self.level_for_stream(stream_id),
            Some(l) if l.rank() >= Level::Contribute.rank() && l != Level::CreateOnly
        )
    }

    pub fn can_manage_stream(&self, stream_id: &str) -> bool {
        matches!(
            self.level_for_stream(stream_id),
            Some(l) if l.rank() >= Level::Manage.rank() && l != Level::CreateOnly
        )
    }

    /// `canDeleteAccess`: personal accesses may delete any access; app and
    /// shared accesses may only delete themselves (subject to
    /// `selfRevoke`) or, for app accesses, ones they created.
    pub fn can_delete_access(&self, this: &Access, target: &Access) -> bool {
        match this.kind {
            AccessKind::Personal => true,
            AccessKind::App => {
                if target.id == this.id {
                    this.self_revoke_setting() != Some("forbidden")
                } else {
                    target.created_by.as_deref() == Some(this.id.as_str())
                }
            }
            AccessKind::Shared => {
                target.id == this.id && this.self_revoke_setting() != Some("forbidden")
            }
        }
    }

    /// `canCreateAccess`: personal may create anything; app may create
    /// `shared` accesses whose every stream/tag permission is covered by
    /// one of `this`'s own permissions at an equal-or-higher level;
    /// `create-only` in `this` disqualifies it as a delegator.
    pub fn can_create_access(&self, this: &Access, candidate: &Access) -> bool {
        match this.kind {
            AccessKind::Personal => true,
            AccessKind::Shared => false,
            AccessKind::App => {
                if candidate.kind != AccessKind::Shared {
                    return false;
                }
                candidate.permissions.iter().all(|perm| match perm {
                    Permission::Stream { stream_id, level } => {
                        self.covers_stream(stream_id, *level)
                    }
                    Permission::Tag { tag, level } => self.covers_tag(tag, *level),
                    Permission::Feature { .. } => true,
                })
            }
        }
    }

    fn covers_stream(&self, stream_id: &str, candidate_level: Level) -> bool {
        match self.level_for_stream(stream_id) {
            Some(Level::CreateOnly) => false,
            Some(level) => level.rank() >= candidate_level.rank(),
            None => false,
        }
    }

    fn covers_tag(&self, tag: &str, candidate_level: Level) -> bool {
        match self.level_for_tag(tag) {
            Some(Level::CreateOnly) => false,
            Some(level) => level.rank() >= candidate_level.rank(),
            None => false,
        }
    }
}

fn higher(existing: Option<Level>, candidate: Level) -> Level {
    match existing {
        Some(level) if level.rank() >= candidate.rank() => level,
        _ => candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tree(HashMap<&'static str, Vec<&'static str>>);

    impl StreamForest for Tree {
        fn descendants_of(&self, stream_id: &str) -> Vec<String> {
            let mut out = Vec::new();
            let mut stack: Vec<&str> = self
                .0
                .get(stream_id)
                .cloned()
                .unwrap_or_default();
            while let Some(id) = stack.pop() {
                out.push(id.to_string());
                if let Some(children) = self.0.get(id) {
                    stack.extend(children.iter().copied());
                }
            }
            out
        }
    }

    fn access_with(perms: Vec<Permission>) -> Access {
        Access {
            id: "a1".into(),
            token: "tok".into(),
            kind: AccessKind::App,
            name: "x".into(),
            permissions: perms,
            expires: None,
            created_by: None,
            deleted: false,
        }
    }

    #[test]
    fn manage_on_parent_inherits_to_children() {
        let forest = Tree(HashMap::from([("A", vec!["A1", "A2"])]));
        let access = access_with(vec![Permission::Stream {
            stream_id: "A".into(),
            level: Level::Manage,
        }]);
        let logic = AccessLogic::build(&access, &forest);
        assert!(logic.can_manage_stream("A1"));
        assert!(logic.can_manage_stream("A2"));
        assert!(!logic.can_read_stream("T")); // S2 scenario: sibling not reachable
    }

    #[test]
    fn scenario_s2_permission_inheritance_and_move() {
        // Tree: A -> {A1, A2}, B, T (T initially a sibling of A/B)
        let forest_before = Tree(HashMap::from([("A", vec!["A1", "A2"])]));
        let access = access_with(vec![Permission::Stream {
            stream_id: "A".into(),
            level: Level::Manage,
        }]);
        let logic = AccessLogic::build(&access, &forest_before);
        assert!(!logic.can_read_stream("T"));

        // After moving T under A, rebuilding AccessLogic against the new
        // forest makes T reachable (the cache slot is invalidated and the
        // logic rebuilt on next access).
        let forest_after = Tree(HashMap::from([("A", vec!["A1", "A2", "T"])]));
        let logic_after = AccessLogic::build(&access, &forest_after);
        assert!(logic_after.can_read_stream("T"));
    }

    #[test]
    fn higher_level_wins_on_conflicting_inheritance() {
        // A -> T (manage), B -> T (read) should not lower T when both
        // ancestors grant through inheritance; simulate by two explicit
        // entries competing for the same descendant.
        let forest = Tree(HashMap::from([("A", vec!["T"]), ("B", vec!["T"])]));
        let access = access_with(vec![
            Permission::Stream {
                stream_id: "A".into(),
                level: Level::Manage,
            },
            Permission::Stream {
                stream_id: "B".into(),
                level: Level::Read,
            },
        ]);
        let logic = AccessLogic::build(&access, &forest);
        assert!(logic.can_manage_stream("T"));
    }

    #[test]
    fn create_only_never_grants_read_or_update() {
        let forest = Tree(HashMap::new());
        let access = access_with(vec![Permission::Stream {
            stream_id: "S".into(),
            level: Level::CreateOnly,
        }]);
        let logic = AccessLogic::build(&access, &forest);
        assert!(logic.can_list_stream("S"));
        assert!(!logic.can_read_stream("S"));
        assert!(!logic.can_update_stream("S"));
    }

    #[test]
    fn root_wildcard_short_circuits_missing_lookup() {
        let forest = Tree(HashMap::new());
        let access = access_with(vec![Permission::Stream {
            stream_id: "*".into(),
            level: Level::Read,
        }]);
        let logic = AccessLogic::build(&access, &forest);
        assert!(logic.can_read_stream("anything"));
    }

    #[test]
    fn stream_only_access_gets_virtual_tag_wildcard_read() {
        let forest = Tree(HashMap::new());
        let access = access_with(vec![Permission::Stream {
            stream_id: "S".into(),
            level: Level::Manage,
        }]);
        let logic = AccessLogic::build(&access, &forest);
        assert_eq!(logic.level_for_tag("whatever"), Some(Level::Read));
    }

    #[test]
    fn personal_access_with_no_stored_permissions_is_implicit_manage_wildcard() {
        let forest = Tree(HashMap::new());
        let mut personal = access_with(vec![]);
        personal.kind = AccessKind::Personal;
        let logic = AccessLogic::build(&personal, &forest);
        assert!(logic.can_manage_stream("anything"));
        assert!(logic.can_read_stream("anything"));
        assert!(logic.can_read_tag("anything"));
    }

    #[test]
    fn personal_access_can_delete_anything() {
        let forest = Tree(HashMap::new());
        let mut personal = access_with(vec![]);
        personal.kind = AccessKind::Personal;
        let logic = AccessLogic::build(&personal, &forest);
        let target = access_with(vec![]);
        assert!(logic.can_delete_access(&personal, &target));
    }

    #[test]
    fn scenario_s6_self_revoke_forbidden_blocks_self_delete() {
        let forest = Tree(HashMap::new());
        let mut app = access_with(vec![Permission::Feature {
            feature: "selfRevoke".into(),
            setting: "forbidden".into(),
        }]);
        app.kind = AccessKind::App;
        let logic = AccessLogic::build(&app, &forest);
        assert!(!logic.can_delete_access(&app, &app));
    }

    #[test]
    fn scenario_s6_self_revoke_allowed_without_feature() {
        let forest = Tree(HashMap::new());
        let mut app = access_with(vec![]);
        app.kind = AccessKind::App;
        let logic = AccessLogic::build(&app, &forest);
        assert!(logic.can_delete_access(&app, &app));
    }

    #[test]
    fn app_can_delete_access_it_created() {
        let forest = Tree(HashMap::new());
        let mut app = access_with(vec![]);
        app.kind = AccessKind::App;
        app.id = "app1".into();
        let logic = AccessLogic::build(&app, &forest);
        let mut created = access_with(vec![]);
        created.id = "shared1".into();
        created.kind = AccessKind::Shared;
        created.created_by = Some("app1".into());
        assert!(logic.can_delete_access(&app, &created));
    }

    #[test]
    fn app_can_create_shared_access_within_its_own_permissions() {
        let forest = Tree(HashMap::new());
        let mut app = access_with(vec![Permission::Stream {
            stream_id: "A".into(),
            level: Level::Manage,
        }]);
        app.kind = AccessKind::App;
        let logic = AccessLogic::build(&app, &forest);

        let mut candidate = access_with(vec![Permission::Stream {
            stream_id: "A".into(),
            level: Level::Contribute,
        }]);
        candidate.kind = AccessKind::Shared;
        assert!(logic.can_create_access(&app, &candidate));
    }

    #[test]
    fn permission_elevation_is_rejected() {
        let forest = Tree(HashMap::new());
        let mut app = access_with(vec![Permission::Stream {
            stream_id: "A".into(),
            level: Level::Read,
        }]);
        app.kind = AccessKind::App;
        let logic = AccessLogic::build(&app, &forest);

        let mut candidate = access_with(vec![Permission::Stream {
            stream_id: "A".into(),
            level: Level::Manage, // higher than what `app` itself holds
        }]);
        candidate.kind = AccessKind::Shared;
        assert!(!logic.can_create_access(&app, &candidate));
    }

    #[test]
    fn create_only_in_this_disqualifies_delegation() {
        let forest = Tree(HashMap::new());
        let mut app = access_with(vec![Permission::Stream {
            stream_id: "A".into(),
            level: Level::CreateOnly,
        }]);
        app.kind = AccessKind::App;
        let logic = AccessLogic::build(&app, &forest);

        let mut candidate = access_with(vec![Permission::Stream {
            stream_id: "A".into(),
            level: Level::CreateOnly,
        }]);
        candidate.kind = AccessKind::Shared;
        assert!(!logic.can_create_access(&app, &candidate));
    }
}
