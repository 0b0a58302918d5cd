//! Full-id ⇄ (store id, store-local id) translation.
//!
//! Every stream/event id that crosses the Mall boundary is a *full* id:
//! either bare (the implicit `local` store) or prefixed `:<storeId>:`.
//! `:system:`/`:_system:`/`:_audit:` markers are a special case — they
//! name a reserved sub-namespace of the `local` store, not a separate
//! store, so they round-trip unchanged through the Mall. `:_audit:` is
//! the audit subsystem's reserved per-user stream namespace (see
//! `stratum-audit`); it is local rather than a pluggable store because
//! audit records are ordinary events living in the same per-user
//! document store as everything else.

pub const LOCAL_STORE_ID: &str = "local";

/// Where a full id resolves to: the implicit local store, or a named
/// pluggable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRef {
    Local,
    Named(String),
}

impl StoreRef {
    pub fn as_str(&self) -> &str {
        match self {
            StoreRef::Local => LOCAL_STORE_ID,
            StoreRef::Named(id) => id,
        }
    }
}

/// Split a full id into its store reference and the store-local id.
///
/// - `"evt1"` → `(Local, "evt1")`
/// - `":system:email"`, `":_system:active"` → `(Local, "<unchanged>")`
/// - `":dummy:mariana"` → `(Named("dummy"), "mariana")`
/// - `":dummy:"` → `(Named("dummy"), "*")` — the store's root pseudo-stream.
pub fn parse_store_id_and_store_item_id(full: &str) -> (StoreRef, String) {
    if full.starts_with(":system:") || full.starts_with(":_system:") || full.starts_with(":_audit:")
    {
        return (StoreRef::Local, full.to_string());
    }
    if let Some(rest) = full.strip_prefix(':') {
        if let Some((store_id, local)) = rest.split_once(':') {
            let local = if local.is_empty() { "*".to_string() } else { local.to_string() };
            return (StoreRef::Named(store_id.to_string()), local);
        }
    }
    (StoreRef::Local, full.to_string())
}

/// Inverse of [`parse_store_id_and_store_item_id`]: rebuild the full id a
/// client should see. `local == "*"` (a store's root pseudo-stream)
/// becomes the bare `:<storeId>:` marker.
pub fn get_full_item_id(store: &StoreRef, local: &str) -> String {
    match store {
        StoreRef::Local => local.to_string(),
        StoreRef::Named(store_id) => {
            if local == "*" {
                format!(":{store_id}:")
            } else {
                format!(":{store_id}:{local}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_id_is_local() {
        assert_eq!(
            parse_store_id_and_store_item_id("evt1"),
            (StoreRef::Local, "evt1".to_string())
        );
    }

    #[test]
    fn system_stream_ids_stay_local_and_unchanged() {
        assert_eq!(
            parse_store_id_and_store_item_id(":system:email"),
            (StoreRef::Local, ":system:email".to_string())
        );
        assert_eq!(
            parse_store_id_and_store_item_id(":_system:active"),
            (StoreRef::Local, ":_system:active".to_string())
        );
    }

    #[test]
    fn audit_stream_ids_stay_local_and_unchanged() {
        assert_eq!(
            parse_store_id_and_store_item_id(":_audit:action-events.get"),
            (StoreRef::Local, ":_audit:action-events.get".to_string())
        );
    }

    #[test]
    fn named_store_prefix_is_stripped() {
        assert_eq!(
            parse_store_id_and_store_item_id(":dummy:mariana"),
            (StoreRef::Named("dummy".into()), "mariana".to_string())
        );
    }

    #[test]
    fn bare_store_marker_is_root_pseudo_stream() {
        assert_eq!(
            parse_store_id_and_store_item_id(":dummy:"),
            (StoreRef::Named("dummy".into()), "*".to_string())
        );
    }

    #[test]
    fn full_id_round_trips() {
        let full = ":dummy:mariana";
        let (store, local) = parse_store_id_and_store_item_id(full);
        assert_eq!(get_full_item_id(&store, &local), full);
    }

    #[test]
    fn root_pseudo_stream_round_trips() {
        let store = StoreRef::Named("dummy".into());
        assert_eq!(get_full_item_id(&store, "*"), ":dummy:");
    }
}
