use std::{borrow::Borrow, borrow::Cow, fmt};

/// Name of an observed member: a field, an index or a method.
///
/// Keys label journal entries and make up the key-set of a
/// [`NotifyEvent`](crate::NotifyEvent). Static names are stored without
/// allocation; indices are rendered in decimal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Key(Cow<'static, str>);

impl Key {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Key {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self(Cow::Owned(index.to_string()))
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Key {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Key {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_lookup_by_str() {
        let keys: HashSet<Key> = [Key::from("count"), Key::from(3usize)].into();
        assert!(keys.contains("count"));
        assert!(keys.contains("3"));
        assert!(!keys.contains("length"));
    }

    #[test]
    fn test_owned_and_borrowed_are_equal() {
        assert_eq!(Key::from("name"), Key::from(String::from("name")));
        assert_eq!(Key::from("name"), "name");
    }
}
