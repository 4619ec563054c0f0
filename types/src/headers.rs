use std::collections::{BTreeMap, HashMap};

/// Multi-value header map.
///
/// Names compare ASCII-case-insensitively: `X-Id` and `x-id` are one header.
/// A key keeps the spelling it was first inserted with; values keep insertion
/// order. Iteration is ordered by key so flattened header lists are
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    fn stored_key(&self, name: &str) -> Option<&String> {
        self.0.keys().find(|key| key.eq_ignore_ascii_case(name))
    }

    /// Adds `value` after any existing values for `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let key = self.stored_key(&name).cloned().unwrap_or(name);
        self.0.entry(key).or_default().push(value.into());
    }

    /// Replaces every value for `name`.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        if let Some(existing) = self.stored_key(&name).cloned() {
            self.0.remove(&existing);
        }
        self.0.insert(name, values);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.stored_key(name)
            .and_then(|key| self.0.get(key))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// One `(name, value)` pair per stored value.
    pub fn flatten(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(name, values)| {
            values
                .iter()
                .map(move |value| (name.as_str(), value.as_str()))
        })
    }

    /// The first value of every key. Additional values are dropped and keys
    /// with no values are skipped.
    pub fn first_values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().filter_map(|(name, values)| {
            values
                .first()
                .map(|value| (name.as_str(), value.as_str()))
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, Vec<String>>> for Headers {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        let mut headers = Self::new();
        headers.extend(map);
        headers
    }
}

impl From<HashMap<String, Vec<String>>> for Headers {
    fn from(map: HashMap<String, Vec<String>>) -> Self {
        let mut headers = Self::new();
        headers.extend(map);
        headers
    }
}

impl Extend<(String, Vec<String>)> for Headers {
    fn extend<I: IntoIterator<Item = (String, Vec<String>)>>(&mut self, iter: I) {
        for (name, values) in iter {
            let key = self.stored_key(&name).cloned().unwrap_or(name);
            self.0.entry(key).or_default().extend(values);
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

impl IntoIterator for Headers {
    type Item = (String, Vec<String>);
    type IntoIter = std::collections::btree_map::IntoIter<String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
