use std::collections::HashMap;
use std::fmt;

/// Ordered multi-map of STOMP headers.
///
/// A header name maps to one or more values. The first value recorded for a
/// name is its *principal* value and is what [`Headers::get`] returns; values
/// added with [`Headers::append`] are kept behind it in arrival order. Names
/// are iterated in the order they were first inserted, which is also the
/// order they are written on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    names: Vec<String>,
    values: HashMap<String, Vec<String>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` as the only value for `name`.
    ///
    /// Any values previously recorded for `name` are discarded. A new name
    /// is placed at the end of the iteration order; an existing name keeps
    /// its position.
    pub fn set(&mut self, name: impl ToString, value: impl ToString) {
        let name = name.to_string();
        let value = value.to_string();
        match self.values.get_mut(&name) {
            Some(vals) => {
                vals.clear();
                vals.push(value);
            }
            None => {
                self.names.push(name.clone());
                self.values.insert(name, vec![value]);
            }
        }
    }

    /// Returns the principal value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(|vals| vals.first())
            .map(String::as_str)
    }

    /// Add another value for `name` without disturbing the principal value.
    pub fn append(&mut self, name: impl ToString, value: impl ToString) {
        let name = name.to_string();
        let value = value.to_string();
        match self.values.get_mut(&name) {
            Some(vals) => vals.push(value),
            None => {
                self.names.push(name.clone());
                self.values.insert(name, vec![value]);
            }
        }
    }

    /// Every value recorded for `name`, principal value first.
    pub fn all_values(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Remove `name` and all of its values, returning the removed values.
    pub fn delete(&mut self, name: &str) -> Option<Vec<String>> {
        let removed = self.values.remove(name)?;
        self.names.retain(|n| n != name);
        Some(removed)
    }

    /// True when `name` is set, whatever its value.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// True when `name` is set and its principal value is non-empty.
    pub fn present(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| !v.is_empty())
    }

    /// Iterate `(name, value)` pairs in name-insertion order. A name with
    /// several values yields one adjacent pair per value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.names.iter().flat_map(move |name| {
            self.all_values(name)
                .iter()
                .map(move |v| (name.as_str(), v.as_str()))
        })
    }

    /// Header names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.names.iter().map(String::as_str)
    }

    /// Overwrite: every pair is applied with [`Headers::set`].
    pub fn merge<K, V, I>(&mut self, other: I)
    where
        K: ToString,
        V: ToString,
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in other {
            self.set(k, v);
        }
    }

    /// Fill-only: a pair is applied only when its name is not already set.
    pub fn reverse_merge<K, V, I>(&mut self, other: I)
    where
        K: ToString,
        V: ToString,
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in other {
            let k = k.to_string();
            if !self.contains(&k) {
                self.set(k, v);
            }
        }
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<K: ToString, V: ToString> FromIterator<(K, V)> for Headers {
    /// Collects pairs with [`Headers::append`], so repeated names keep the
    /// first value as principal.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        headers.extend(iter);
        headers
    }
}

impl<K: ToString, V: ToString> Extend<(K, V)> for Headers {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.append(k, v);
        }
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in self.iter() {
            writeln!(f, "{}: {}", k, v)?;
        }
        Ok(())
    }
}
