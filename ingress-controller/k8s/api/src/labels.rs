use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// An immutable, cheaply cloned set of object labels.
#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

/// A label selector in the string form accepted by `kubectl -l`.
///
/// Supports `k=v`, `k==v`, `k!=v`, `k in (a,b)`, `k notin (a,b)`, `k`, and `!k`,
/// joined by commas. An empty selector matches everything.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Requirement {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid label selector {selector:?}: {reason}")]
pub struct InvalidSelector {
    selector: String,
    reason: &'static str,
}

// === impl Selector ===

impl Selector {
    pub fn from_map(map: &Map) -> Self {
        map.iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.requirements.iter().all(|r| r.matches(labels.as_ref()))
    }
}

impl std::str::FromStr for Selector {
    type Err = InvalidSelector;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| InvalidSelector {
            selector: s.to_string(),
            reason,
        };

        let mut requirements = Vec::new();
        for term in split_terms(s) {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }

            let req = if let Some(key) = term.strip_prefix('!') {
                Requirement::new(key.trim(), Operator::DoesNotExist, None)
            } else if let Some((key, value)) = term.split_once("!=") {
                Requirement::new(key.trim(), Operator::NotIn, Some(value.trim()))
            } else if let Some((key, value)) = term.split_once("==") {
                Requirement::new(key.trim(), Operator::In, Some(value.trim()))
            } else if let Some((key, value)) = term.split_once('=') {
                Requirement::new(key.trim(), Operator::In, Some(value.trim()))
            } else if let Some((key, values)) = split_set(term, " notin ") {
                Requirement::with_values(key, Operator::NotIn, values)
            } else if let Some((key, values)) = split_set(term, " in ") {
                Requirement::with_values(key, Operator::In, values)
            } else if term.contains(['(', ')', ' ']) {
                return Err(invalid("malformed requirement"));
            } else {
                Requirement::new(term, Operator::Exists, None)
            };

            if req.key.is_empty() {
                return Err(invalid("empty key"));
            }
            requirements.push(req);
        }

        Ok(Self { requirements })
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let requirements = iter
            .into_iter()
            .map(|(k, v)| Requirement::new(&k, Operator::In, Some(&v)))
            .collect();
        Self { requirements }
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// Splits on commas that are not inside a parenthesized value set.
fn split_terms(s: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&s[start..]);
    terms
}

fn split_set<'t>(term: &'t str, op: &str) -> Option<(&'t str, Vec<&'t str>)> {
    let (key, rest) = term.split_once(op)?;
    let rest = rest.trim().strip_prefix('(')?.strip_suffix(')')?;
    let values = rest
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    Some((key.trim(), values))
}

// === impl Requirement ===

impl Requirement {
    fn new(key: &str, operator: Operator, value: Option<&str>) -> Self {
        Self::with_values(key, operator, value.into_iter().collect())
    }

    fn with_values(key: &str, operator: Operator, values: Vec<&str>) -> Self {
        Self {
            key: key.to_string(),
            operator,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => labels
                .get(&self.key)
                .map(|v| self.values.contains(v))
                .unwrap_or(false),
            Operator::NotIn => labels
                .get(&self.key)
                .map(|v| !self.values.contains(v))
                .unwrap_or(true),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

// === impl Labels ===

impl Labels {
    /// Returns true if every entry in `subset` is present in these labels.
    pub fn contains_all(&self, subset: &Map) -> bool {
        subset.iter().all(|(k, v)| self.0.get(k) == Some(v))
    }
}

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    #[test]
    fn test_matches() {
        for (selector, labels, matches, msg) in &[
            ("", Labels::default(), true, "empty match"),
            (
                "foo=bar",
                Labels::from_iter(Some(("foo", "bar"))),
                true,
                "exact label match",
            ),
            (
                "foo=bar",
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "sufficient label match",
            ),
            (
                "foo in (bar, qux),bah",
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "set and existence match",
            ),
            (
                "foo notin (bar)",
                Labels::from_iter(Some(("foo", "bar"))),
                false,
                "excluded value",
            ),
            ("foo!=bar", Labels::default(), true, "missing key is not equal"),
            (
                "!foo",
                Labels::from_iter(Some(("foo", "bar"))),
                false,
                "key must be absent",
            ),
        ] {
            let selector = selector.parse::<Selector>().expect("selector must parse");
            assert_eq!(selector.matches(labels), *matches, "{}", msg);
        }
    }

    #[test]
    fn rejects_malformed() {
        assert!("foo in bar".parse::<Selector>().is_err());
        assert!("=bar".parse::<Selector>().is_err());
    }

    #[test]
    fn contains_all() {
        let labels = Labels::from_iter(vec![("app", "web"), ("version", "v1")]);
        let subset = maplit::btreemap! { "version".to_string() => "v1".to_string() };
        assert!(labels.contains_all(&subset));
        let other = maplit::btreemap! { "version".to_string() => "v2".to_string() };
        assert!(!labels.contains_all(&other));
    }
}
