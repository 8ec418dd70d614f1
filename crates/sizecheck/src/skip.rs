use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};

/// Case names excluded from a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipList {
    names: BTreeSet<String>,
}

impl SkipList {
    /// One name per line; blank lines and `#` comments are ignored.
    pub fn parse(text: &str) -> Self {
        let names = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self { names }
    }

    /// A missing file is an empty list.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no skip list at {}", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(err).with_context(|| format!("read skip list: {}", path.display())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for SkipList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_and_ignores_comments() {
        let skip = SkipList::parse("bin-linux-1.21\n\n  # flaky on arm\n  cockroach-windows-amd64  \r\n");
        assert_eq!(skip.len(), 2);
        assert!(skip.contains("bin-linux-1.21"));
        assert!(skip.contains("cockroach-windows-amd64"));
        assert!(!skip.contains("# flaky on arm"));
    }

    #[test]
    fn match_is_exact() {
        let skip: SkipList = ["bin-linux"].into_iter().collect();
        assert!(!skip.contains("bin-linux-pie"));
        assert!(!skip.contains("BIN-LINUX"));
    }

    #[test]
    fn missing_file_is_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let skip = SkipList::load(&tmp.path().join("skip.csv")).expect("load");
        assert!(skip.is_empty());
    }
}
