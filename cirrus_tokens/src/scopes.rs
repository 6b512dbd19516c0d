//! Sets of OAuth2 scopes

use std::{collections::btree_set, collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

use crate::{Scope, ScopeRef};

/// The generic scope granting access to all cloud platform APIs
pub const CLOUD_PLATFORM: &str = "https://www.googleapis.com/auth/cloud-platform";

/// A set of scopes for defining access permissions
///
/// Scopes are kept in sorted order so that the space-delimited wire form
/// is stable for a given set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "Option<String>", into = "String")]
pub struct Scopes(BTreeSet<Scope>);

impl Scopes {
    /// Produces an empty scope set
    #[inline]
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Produces a scope set with a single scope
    #[inline]
    pub fn single(scope: impl Into<Scope>) -> Self {
        let mut scopes = Self::new();
        scopes.insert(scope.into());
        scopes
    }

    /// Parses a space-delimited scope string, as used on the wire
    pub fn from_delimited(s: &str) -> Self {
        s.split_whitespace().map(Scope::from).collect()
    }

    /// Adds a scope to the scope set
    #[inline]
    pub fn insert(&mut self, scope: Scope) {
        self.0.insert(scope);
    }

    /// Whether the set holds no scopes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of scopes in the set
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set contains the given scope
    #[inline]
    pub fn contains(&self, scope: &ScopeRef) -> bool {
        self.0.contains(scope)
    }

    /// Checks to see whether this set of scopes contains any of the scopes provided
    pub fn contains_any<I, T>(&self, scopes: I) -> bool
    where
        I: IntoIterator<Item = T>,
        T: AsRef<ScopeRef>,
    {
        scopes.into_iter().any(|s| self.0.contains(s.as_ref()))
    }

    /// Produces an iterator of the scopes in this set
    #[inline]
    pub fn iter(&self) -> Iter<'_> {
        self.into_iter()
    }
}

impl fmt::Display for Scopes {
    /// Space-delimited, as expected by the token endpoint
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for scope in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(scope.as_str())?;
            first = false;
        }
        Ok(())
    }
}

impl From<Option<String>> for Scopes {
    fn from(s: Option<String>) -> Self {
        s.as_deref().map(Self::from_delimited).unwrap_or_default()
    }
}

impl From<Scopes> for String {
    fn from(s: Scopes) -> Self {
        s.to_string()
    }
}

impl FromIterator<Scope> for Scopes {
    fn from_iter<I: IntoIterator<Item = Scope>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for Scopes {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(Scope::from).collect()
    }
}

impl Extend<Scope> for Scopes {
    #[inline]
    fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = Scope>,
    {
        self.0.extend(iter)
    }
}

impl IntoIterator for Scopes {
    type Item = Scope;
    type IntoIter = btree_set::IntoIter<Scope>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// An iterator over a set of borrowed scopes
#[derive(Clone, Debug)]
pub struct Iter<'a> {
    iter: btree_set::Iter<'a, Scope>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a ScopeRef;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|x| x.as_ref())
    }
}

impl<'a> IntoIterator for &'a Scopes {
    type Item = &'a ScopeRef;
    type IntoIter = Iter<'a>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        Iter {
            iter: self.0.iter(),
        }
    }
}
