//! File-name grammar and record classification.
//!
//! The registry publishes every file as a dot-delimited name such as
//! `K3241.K03200Y0.D40511.EMPRECSV` (extracted) or
//! `K3241.K03200Y0.D40511.EMPRECSV.zip` (archive). Names are parsed once into
//! a [`FileName`]; the version resolver, schema registry and classifier all
//! read its positional fields instead of splitting strings themselves.

use std::fmt;
use std::path::Path;

/// A parsed file name.
///
/// Positions count from the end of the name: the last segment is the
/// suffix, the one before it the type token, the one before that the
/// version token. Anything earlier forms the base.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileName {
    name: String,
    base: String,
    version: Option<String>,
    type_token: Option<String>,
    suffix: String,
}

impl FileName {
    /// Parse a basename. Parsing is total; short names leave the leading
    /// positions empty.
    pub fn parse(name: impl Into<String>) -> Self {
        let name = name.into();
        let segments: Vec<&str> = name.split('.').collect();
        let n = segments.len();

        let suffix = segments[n - 1].to_string();
        let type_token = (n >= 2).then(|| segments[n - 2].to_string());
        let version = (n >= 3).then(|| segments[n - 3].to_string());
        let base = if n > 3 {
            segments[..n - 3].join(".")
        } else {
            String::new()
        };

        Self {
            name,
            base,
            version,
            type_token,
            suffix,
        }
    }

    /// Parse the final component of a path, if it has one.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(Self::parse)
    }

    /// The full basename.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Segments preceding the version token, joined with `.`.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Third-to-last segment.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Second-to-last segment.
    pub fn type_token(&self) -> Option<&str> {
        self.type_token.as_deref()
    }

    /// Last segment.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Whether any dot-delimited segment equals `marker`.
    pub fn has_segment(&self, marker: &str) -> bool {
        self.name.split('.').any(|segment| segment == marker)
    }

    /// Whether the full name contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.name.contains(needle)
    }

    /// The name without a trailing `.zip` extension.
    pub fn archive_stem(&self) -> &str {
        self.name.strip_suffix(".zip").unwrap_or(&self.name)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Record category of a published file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordCategory {
    Company,
    Establishment,
    Partner,
    Support,
}

impl RecordCategory {
    /// Every category, in processing order.
    pub const ALL: [RecordCategory; 4] = [
        RecordCategory::Company,
        RecordCategory::Establishment,
        RecordCategory::Partner,
        RecordCategory::Support,
    ];

    /// Categories that are stacked into a single sandbox dataset.
    pub const STACKED: [RecordCategory; 3] = [
        RecordCategory::Company,
        RecordCategory::Establishment,
        RecordCategory::Partner,
    ];

    /// Classify a file by its type token.
    ///
    /// Unrecognised or missing tokens fall into [`RecordCategory::Support`],
    /// which also holds the auxiliary reference tables.
    pub fn classify(name: &FileName) -> Self {
        match name.type_token() {
            Some("EMPRECSV") => RecordCategory::Company,
            Some("ESTABELE") => RecordCategory::Establishment,
            Some("SOCIOCSV") => RecordCategory::Partner,
            _ => RecordCategory::Support,
        }
    }

    /// Directory name used in the raw, curated and sandbox layers.
    pub fn dir_name(&self) -> &'static str {
        match self {
            RecordCategory::Company => "EMPRESA",
            RecordCategory::Establishment => "ESTABELECIMENTOS",
            RecordCategory::Partner => "SOCIOS",
            RecordCategory::Support => "SUPORTE",
        }
    }

    /// Short label used as a metric tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordCategory::Company => "company",
            RecordCategory::Establishment => "establishment",
            RecordCategory::Partner => "partner",
            RecordCategory::Support => "support",
        }
    }
}

impl fmt::Display for RecordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extracted_name() {
        let name = FileName::parse("K3241.K03200Y0.D40511.EMPRECSV");
        assert_eq!(name.base(), "K3241");
        assert_eq!(name.version(), Some("K03200Y0"));
        assert_eq!(name.type_token(), Some("D40511"));
        assert_eq!(name.suffix(), "EMPRECSV");
    }

    #[test]
    fn test_parse_archive_name() {
        let name = FileName::parse("K3241.K03200Y0.D40511.ESTABELE.zip");
        assert_eq!(name.type_token(), Some("ESTABELE"));
        assert_eq!(name.suffix(), "zip");
        assert_eq!(name.archive_stem(), "K3241.K03200Y0.D40511.ESTABELE");
    }

    #[test]
    fn test_parse_short_names() {
        let bare = FileName::parse("README");
        assert_eq!(bare.suffix(), "README");
        assert_eq!(bare.type_token(), None);
        assert_eq!(bare.version(), None);

        let two = FileName::parse("notes.txt");
        assert_eq!(two.type_token(), Some("notes"));
        assert_eq!(two.version(), None);
        assert_eq!(two.base(), "");
    }

    #[test]
    fn test_has_segment_matches_whole_segments() {
        let simples = FileName::parse("F.K03200$W.SIMPLES.CSV.D40511");
        assert!(simples.has_segment("CSV"));

        let company = FileName::parse("K3241.K03200Y0.D40511.EMPRECSV");
        assert!(!company.has_segment("CSV"));
        assert!(company.contains("CSV"));
    }

    #[test]
    fn test_classify_known_tokens() {
        let cases = [
            ("K3241.K03200Y0.D40511.EMPRECSV.zip", RecordCategory::Company),
            ("K3241.K03200Y1.D40511.ESTABELE.zip", RecordCategory::Establishment),
            ("K3241.K03200Y2.D40511.SOCIOCSV.zip", RecordCategory::Partner),
            ("F.K03200$Z.D40511.CNAECSV.zip", RecordCategory::Support),
        ];

        for (name, expected) in cases {
            assert_eq!(
                RecordCategory::classify(&FileName::parse(name)),
                expected,
                "{name}"
            );
        }
    }

    #[test]
    fn test_classify_is_total() {
        for name in ["", "zip", "a.zip", "x.y.UNKNOWN.zip", "...."] {
            assert_eq!(
                RecordCategory::classify(&FileName::parse(name)),
                RecordCategory::Support
            );
        }
    }

    #[test]
    fn test_classify_is_case_sensitive() {
        let name = FileName::parse("a.b.emprecsv.zip");
        assert_eq!(RecordCategory::classify(&name), RecordCategory::Support);
    }

    #[test]
    fn test_dir_names_are_distinct() {
        let mut names: Vec<_> = RecordCategory::ALL.iter().map(|c| c.dir_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 4);
    }
}
