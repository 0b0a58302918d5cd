//! `{include, exclude}` method-name filtering, with the `"all"` and
//! `"<class>.all"` expansion tokens. The effective set for a method `m` is
//! `(include ∪ expansions) \ (exclude ∪ expansions)`; everything else about
//! membership is an exact string match.

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl AuditFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        AuditFilter { include, exclude }
    }

    pub fn allows(&self, method: &str) -> bool {
        self.include.iter().any(|token| token_matches(token, method))
            && !self.exclude.iter().any(|token| token_matches(token, method))
    }
}

fn token_matches(token: &str, method: &str) -> bool {
    if token == "all" {
        return true;
    }
    if let Some(class) = token.strip_suffix(".all") {
        return method.starts_with(class) && method[class.len()..].starts_with('.');
    }
    token == method
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_token_matches_every_method() {
        let filter = AuditFilter::new(vec!["all".into()], vec![]);
        assert!(filter.allows("events.get"));
        assert!(filter.allows("auth.login"));
    }

    #[test]
    fn class_all_expands_to_every_method_of_that_class() {
        let filter = AuditFilter::new(vec!["events.all".into()], vec![]);
        assert!(filter.allows("events.get"));
        assert!(filter.allows("events.create"));
        assert!(!filter.allows("auth.login"));
        assert!(!filter.allows("eventsx.get"));
    }

    #[test]
    fn scenario_s5_exact_exclude_overrides_class_wildcard_include() {
        let filter = AuditFilter::new(vec!["events.all".into()], vec!["events.get".into()]);
        assert!(!filter.allows("events.get"));
        assert!(filter.allows("events.create"));
        assert!(!filter.allows("auth.login"));
    }

    #[test]
    fn exact_token_only_matches_that_method() {
        let filter = AuditFilter::new(vec!["auth.login".into()], vec![]);
        assert!(filter.allows("auth.login"));
        assert!(!filter.allows("auth.logout"));
    }
}
