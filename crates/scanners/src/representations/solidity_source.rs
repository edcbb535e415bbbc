use crate::analysis::version_parser::{parse_solidity_version, SolidityVersion};

/// One input file: its text, where it came from, and the language version the
/// version-conditional rules are gated on.
#[derive(Debug, Clone)]
pub struct SoliditySource {
    pub content: String,
    pub file_path: Option<String>,
    pub pragma_version: Option<String>,
    pub version: Option<SolidityVersion>,
}

impl SoliditySource {
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        let pragma_version = Self::extract_pragma(&content);
        let version = parse_solidity_version(&content);

        Self {
            content,
            file_path: None,
            pragma_version,
            version,
        }
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn display_path(&self) -> &str {
        self.file_path.as_deref().unwrap_or("<memory>")
    }

    fn extract_pragma(content: &str) -> Option<String> {
        content
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with("pragma solidity"))
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_from_pragma() {
        let source = SoliditySource::new("pragma solidity ^0.4.24;\ncontract A {}\n")
            .with_file_path("a.sol");
        assert_eq!(source.version, Some(SolidityVersion::new(0, 4, 24)));
        assert_eq!(source.pragma_version.as_deref(), Some("pragma solidity ^0.4.24;"));
        assert_eq!(source.display_path(), "a.sol");
    }

    #[test]
    fn test_missing_pragma_leaves_version_unknown() {
        let source = SoliditySource::new("contract A {}");
        assert!(source.version.is_none());
        assert_eq!(source.display_path(), "<memory>");
    }
}
