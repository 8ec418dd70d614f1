use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// One output mode of the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TestType {
    Text,
    Json,
    Html,
    Svg,
}

impl TestType {
    pub const ALL: [TestType; 4] = [TestType::Text, TestType::Json, TestType::Html, TestType::Svg];

    pub fn as_str(self) -> &'static str {
        match self {
            TestType::Text => "text",
            TestType::Json => "json",
            TestType::Html => "html",
            TestType::Svg => "svg",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "text" => Some(TestType::Text),
            "json" => Some(TestType::Json),
            "html" => Some(TestType::Html),
            "svg" => Some(TestType::Svg),
            _ => None,
        }
    }

    /// File extension of the file the subject generates in this mode.
    pub fn output_extension(self) -> &'static str {
        match self {
            TestType::Text => "txt",
            other => other.as_str(),
        }
    }

    fn bit(self) -> u8 {
        match self {
            TestType::Text => 1,
            TestType::Json => 2,
            TestType::Html => 4,
            TestType::Svg => 8,
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of [`TestType`]s.
///
/// The registry stores the set as an integer (`text=1`, `json=2`, `html=4`,
/// `svg=8`); everything else goes through the named variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TestTypeMask(u8);

impl TestTypeMask {
    const VALID_BITS: u8 = 0b1111;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        TestType::ALL.into_iter().collect()
    }

    /// Returns `None` when `bits` carries anything outside the known modes.
    pub fn from_bits(bits: u32) -> Option<Self> {
        let bits = u8::try_from(bits).ok()?;
        if bits & !Self::VALID_BITS != 0 {
            return None;
        }
        Some(Self(bits))
    }

    pub fn bits(self) -> u32 {
        u32::from(self.0)
    }

    pub fn contains(self, typ: TestType) -> bool {
        self.0 & typ.bit() != 0
    }

    pub fn is_superset(self, other: TestTypeMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, typ: TestType) {
        self.0 |= typ.bit();
    }

    pub fn union(self, other: TestTypeMask) -> Self {
        Self(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = TestType> {
        TestType::ALL.into_iter().filter(move |t| self.contains(*t))
    }
}

impl From<TestType> for TestTypeMask {
    fn from(typ: TestType) -> Self {
        Self(typ.bit())
    }
}

impl FromIterator<TestType> for TestTypeMask {
    fn from_iter<I: IntoIterator<Item = TestType>>(iter: I) -> Self {
        let mut mask = Self::empty();
        for typ in iter {
            mask.insert(typ);
        }
        mask
    }
}

impl BitOr for TestType {
    type Output = TestTypeMask;

    fn bitor(self, rhs: TestType) -> TestTypeMask {
        TestTypeMask::from(self).union(rhs.into())
    }
}

impl BitOr<TestType> for TestTypeMask {
    type Output = TestTypeMask;

    fn bitor(self, rhs: TestType) -> TestTypeMask {
        self.union(rhs.into())
    }
}

impl BitOr for TestTypeMask {
    type Output = TestTypeMask;

    fn bitor(self, rhs: TestTypeMask) -> TestTypeMask {
        self.union(rhs)
    }
}

impl BitOrAssign<TestType> for TestTypeMask {
    fn bitor_assign(&mut self, rhs: TestType) {
        self.insert(rhs);
    }
}

impl fmt::Display for TestTypeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.iter().map(TestType::as_str).collect();
        f.write_str(&names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_bits_match_named_modes() {
        let mask = TestTypeMask::from_bits(3).expect("valid bits");
        assert!(mask.contains(TestType::Text));
        assert!(mask.contains(TestType::Json));
        assert!(!mask.contains(TestType::Html));
        assert_eq!(mask, TestType::Text | TestType::Json);
        assert_eq!((TestType::Json | TestType::Svg).bits(), 10);
    }

    #[test]
    fn unknown_bits_are_rejected() {
        assert!(TestTypeMask::from_bits(16).is_none());
        assert!(TestTypeMask::from_bits(300).is_none());
        assert_eq!(TestTypeMask::from_bits(15), Some(TestTypeMask::all()));
    }

    #[test]
    fn display_lists_modes_in_canonical_order() {
        let mask = TestType::Svg | TestType::Text;
        assert_eq!(mask.to_string(), "text|svg");
        assert_eq!(TestTypeMask::empty().to_string(), "none");
        assert_eq!(mask.len(), 2);
        assert!(TestTypeMask::all().is_superset(mask));
        assert!(!mask.is_superset(TestTypeMask::all()));
    }
}
