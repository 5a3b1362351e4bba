use crate::activity::{Activity, Bucket};

/// Parsed activity search input.
#[derive(Debug, Clone, Default)]
pub struct ActivityQuery {
    pub terms: Vec<String>,
    pub title_terms: Vec<String>,
    pub kinds: Vec<String>,
    pub bucket: Option<Bucket>,
    pub regex_pattern: Option<String>,
}

impl ActivityQuery {
    pub fn has_terms(&self) -> bool {
        !self.terms.is_empty() || !self.title_terms.is_empty()
    }

    pub fn has_filters(&self) -> bool {
        !self.kinds.is_empty() || self.bucket.is_some()
    }

    /// Term and type matching. The date bucket is applied separately since it
    /// needs a clock.
    pub fn matches(&self, activity: &Activity) -> bool {
        if !self.kinds.is_empty() {
            let Some(kind) = activity.kind.as_deref() else {
                return false;
            };
            if !self.kinds.iter().any(|k| k.eq_ignore_ascii_case(kind)) {
                return false;
            }
        }

        let title = activity.title.to_lowercase();
        if !self
            .title_terms
            .iter()
            .all(|term| title.contains(&term.to_lowercase()))
        {
            return false;
        }

        if self.terms.is_empty() {
            return true;
        }
        let haystack = searchable_text(activity);
        self.terms
            .iter()
            .all(|term| haystack.contains(&term.to_lowercase()))
    }
}

/// Lowercased title, description and location joined for matching.
pub fn searchable_text(activity: &Activity) -> String {
    let mut text = activity.title.to_lowercase();
    if let Some(description) = activity.description.as_deref() {
        text.push('\n');
        text.push_str(&description.to_lowercase());
    }
    text.push('\n');
    text.push_str(&activity.location.to_lowercase());
    text
}

pub fn parse_query(input: &str) -> ActivityQuery {
    let mut query = ActivityQuery::default();
    for raw in input.split_whitespace() {
        if let Some(kind) = raw.strip_prefix("type:") {
            if let Some(value) = sanitize_term(kind) {
                query.kinds.push(value.to_lowercase());
            }
            continue;
        }
        if let Some(term) = raw.strip_prefix("title:") {
            if let Some(value) = sanitize_term(term) {
                query.title_terms.push(value);
            }
            continue;
        }
        if let Some(bucket) = raw.strip_prefix("when:") {
            query.bucket = Some(Bucket::from_name(bucket));
            continue;
        }
        if let Some(value) = sanitize_term(raw) {
            query.terms.push(value);
        }
    }
    query
}

pub fn regex_pattern_from_input(input: &str) -> Option<String> {
    let parts: Vec<&str> = input
        .split_whitespace()
        .filter(|raw| {
            !(raw.starts_with("type:") || raw.starts_with("title:") || raw.starts_with("when:"))
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

fn sanitize_term(raw: &str) -> Option<String> {
    let term: String = raw
        .chars()
        .filter(|ch| ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | '\''))
        .collect();
    if term.is_empty() {
        None
    } else {
        Some(term)
    }
}
