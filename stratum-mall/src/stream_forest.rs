//! Concrete [`stratum_security::StreamForest`] built from a flat snapshot
//! of a user's streams across every registered store — the type
//! `stratum-cache::UserCache` caches per user and `AccessLogic::build`
//! expands permissions against.

use std::collections::HashMap;

use stratum_data::domain::Stream;
use stratum_security::StreamForest;

use crate::error::MallError;
use crate::mall::{Mall, MallStreamQuery};

/// An immutable snapshot of every stream a user owns (across all stores,
/// full ids), indexed for fast descendant lookup.
#[derive(Debug, Clone, Default)]
pub struct StreamForestSnapshot {
    children: HashMap<String, Vec<String>>,
}

impl StreamForestSnapshot {
    pub fn build(streams: &[Stream]) -> Self {
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for stream in streams {
            if let Some(parent) = &stream.parent_id {
                children.entry(parent.clone()).or_default().push(stream.id.clone());
            }
        }
        StreamForestSnapshot { children }
    }

    /// Fetch every stream the user has (including trashed ones — callers
    /// filter separately) via `Mall::streams_get` and build a snapshot.
    pub async fn fetch(mall: &Mall, user_id: &str) -> Result<Self, MallError> {
        let query = MallStreamQuery {
            parent_id: Some("*".to_string()),
            expand_children: true,
            include_trashed: true,
            ..Default::default()
        };
        let streams = mall.streams_get(user_id, &query).await?;
        Ok(Self::build(&streams))
    }
}

impl StreamForest for StreamForestSnapshot {
    fn descendants_of(&self, stream_id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack: Vec<String> = self.children.get(stream_id).cloned().unwrap_or_default();
        while let Some(id) = stack.pop() {
            if let Some(kids) = self.children.get(&id) {
                stack.extend(kids.iter().cloned());
            }
            out.push(id);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_data::domain::Stream;

    fn stream(id: &str, parent: Option<&str>) -> Stream {
        Stream {
            id: id.to_string(),
            name: id.to_string(),
            parent_id: parent.map(str::to_string),
            client_data: serde_json::Value::Null,
            trashed: false,
            created: 0,
            created_by: "sys".into(),
            modified: 0,
            modified_by: "sys".into(),
            single_activity: false,
        }
    }

    #[test]
    fn descendants_include_grandchildren() {
        let streams = vec![
            stream("A", None),
            stream("A1", Some("A")),
            stream("A1a", Some("A1")),
            stream("B", None),
        ];
        let forest = StreamForestSnapshot::build(&streams);
        let mut descendants = forest.descendants_of("A");
        descendants.sort();
        assert_eq!(descendants, vec!["A1".to_string(), "A1a".to_string()]);
        assert!(forest.descendants_of("B").is_empty());
    }
}
