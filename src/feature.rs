//! Feature tags describing how a stored value was encoded.

use std::fmt;

/// Annotation attached to a stored value.
///
/// The set is closed: the `feature` column only ever holds one of these names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreFeature {
    /// The value bytes were encrypted by the codec before storage.
    Encrypted,
}

impl StoreFeature {
    /// Every feature the engine understands.
    pub const ALL: &'static [StoreFeature] = &[StoreFeature::Encrypted];

    /// Name persisted in the `feature` column.
    pub fn name(self) -> &'static str {
        match self {
            StoreFeature::Encrypted => "ENCRYPTED",
        }
    }

    /// Look up a feature by its persisted name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// True only if every requested feature is one the engine understands.
    pub fn all_supported(features: &[StoreFeature]) -> bool {
        features.iter().all(|f| Self::ALL.contains(f))
    }
}

impl fmt::Display for StoreFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_lookup() {
        assert_eq!(StoreFeature::from_name("ENCRYPTED"), Some(StoreFeature::Encrypted));
        assert_eq!(StoreFeature::from_name("encrypted"), None);
        assert_eq!(StoreFeature::from_name("COMPRESSED"), None);
    }

    #[test]
    fn test_all_supported() {
        assert!(StoreFeature::all_supported(&[]));
        assert!(StoreFeature::all_supported(&[StoreFeature::Encrypted]));
    }
}
