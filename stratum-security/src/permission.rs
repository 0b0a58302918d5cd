use serde::{Deserialize, Serialize};

/// A permission level, ordered `read < create-only == contribute < manage`
/// for inheritance purposes. `create-only` and `contribute` share a rank
/// (both `1`) but are evaluated differently by the capability predicates in
/// [`crate::logic::AccessLogic`] — `create-only` never grants read or
/// update access regardless of rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Level {
    Read,
    CreateOnly,
    Contribute,
    Manage,
}

impl Level {
    pub fn rank(self) -> u8 {
        match self {
            Level::Read => 0,
            Level::CreateOnly => 1,
            Level::Contribute => 1,
            Level::Manage => 2,
        }
    }
}

/// One entry of an access's `permissions[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Permission {
    Stream { stream_id: String, level: Level },
    Tag { tag: String, level: Level },
    Feature { feature: String, setting: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_only_and_contribute_share_rank() {
        assert_eq!(Level::CreateOnly.rank(), Level::Contribute.rank());
    }

    #[test]
    fn manage_outranks_everything() {
        assert!(Level::Manage.rank() > Level::Contribute.rank());
        assert!(Level::Manage.rank() > Level::Read.rank());
    }
}
