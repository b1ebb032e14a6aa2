use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FormatError, FormatResult};
use crate::format::{DetectedFormat, MatchBasis};

const BUILTIN: &str = include_str!("../signatures/builtin.toml");

/// One magic-byte pattern as written in the database file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagicEntry {
    #[serde(default)]
    pub offset: usize,
    /// Hex-encoded byte pattern.
    pub bytes: String,
}

/// One `[[format]]` entry of the database file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatEntry {
    pub puid: String,
    pub name: String,
    pub mime: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub magic: Vec<MagicEntry>,
}

#[derive(Deserialize)]
struct DatabaseFile {
    #[serde(default, rename = "format")]
    formats: Vec<FormatEntry>,
}

#[derive(Debug)]
struct Pattern {
    format: usize,
    offset: usize,
    bytes: Vec<u8>,
}

impl Pattern {
    fn matches(&self, header: &[u8]) -> bool {
        header
            .get(self.offset..self.offset + self.bytes.len())
            .is_some_and(|window| window == self.bytes.as_slice())
    }
}

/// Compiled signature database.
///
/// Patterns are kept sorted longest first so a more specific signature
/// always beats a shorter one that happens to share a prefix.
#[derive(Debug)]
pub struct SignatureDatabase {
    formats: Vec<FormatEntry>,
    patterns: Vec<Pattern>,
    extensions: HashMap<String, usize>,
    header_len: usize,
}

impl SignatureDatabase {
    /// The embedded database.
    pub fn builtin() -> FormatResult<Self> {
        Self::from_toml_str(BUILTIN)
    }

    /// Load a database file. A missing or malformed file is an
    /// identification error.
    pub fn load(path: &Path) -> FormatResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FormatError::Identification(format!(
                "cannot read signature database {}: {e}",
                path.display()
            ))
        })?;
        let db = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), formats = db.len(), "loaded signature database");
        Ok(db)
    }

    pub fn from_toml_str(text: &str) -> FormatResult<Self> {
        let file: DatabaseFile = toml::from_str(text)
            .map_err(|e| FormatError::Identification(format!("malformed signature database: {e}")))?;
        Self::from_entries(file.formats)
    }

    pub fn from_entries(formats: Vec<FormatEntry>) -> FormatResult<Self> {
        let mut seen = HashSet::new();
        let mut patterns = Vec::new();
        let mut extensions = HashMap::new();

        for (index, entry) in formats.iter().enumerate() {
            if entry.puid.trim().is_empty() {
                return Err(FormatError::Identification(format!(
                    "format {:?} has an empty puid",
                    entry.name
                )));
            }
            if !seen.insert(entry.puid.as_str()) {
                return Err(FormatError::Identification(format!(
                    "duplicate puid {}",
                    entry.puid
                )));
            }
            for magic in &entry.magic {
                let bytes = hex::decode(magic.bytes.trim()).map_err(|e| {
                    FormatError::Identification(format!(
                        "bad magic {:?} for {}: {e}",
                        magic.bytes, entry.puid
                    ))
                })?;
                if bytes.is_empty() {
                    return Err(FormatError::Identification(format!(
                        "empty magic pattern for {}",
                        entry.puid
                    )));
                }
                patterns.push(Pattern {
                    format: index,
                    offset: magic.offset,
                    bytes,
                });
            }
            for ext in &entry.extensions {
                extensions
                    .entry(ext.trim_start_matches('.').to_ascii_lowercase())
                    .or_insert(index);
            }
        }

        // Stable sort keeps file order among equal lengths.
        patterns.sort_by(|a, b| b.bytes.len().cmp(&a.bytes.len()));
        let header_len = patterns
            .iter()
            .map(|p| p.offset + p.bytes.len())
            .max()
            .unwrap_or(0);

        Ok(Self {
            formats,
            patterns,
            extensions,
            header_len,
        })
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn formats(&self) -> &[FormatEntry] {
        &self.formats
    }

    /// Number of leading bytes needed to evaluate every pattern.
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Match a file header and name against the database.
    pub fn identify(&self, header: &[u8], file_name: Option<&str>) -> DetectedFormat {
        if let Some(pattern) = self.patterns.iter().find(|p| p.matches(header)) {
            return self.detected(pattern.format, MatchBasis::Signature);
        }
        let ext = file_name
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match ext.and_then(|ext| self.extensions.get(&ext)) {
            Some(&index) => self.detected(index, MatchBasis::Extension),
            None => DetectedFormat::unknown(),
        }
    }

    fn detected(&self, index: usize, basis: MatchBasis) -> DetectedFormat {
        let entry = &self.formats[index];
        DetectedFormat {
            puid: entry.puid.clone(),
            name: entry.name.clone(),
            mime: entry.mime.clone(),
            basis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_database_loads() {
        let db = SignatureDatabase::builtin().unwrap();
        assert_eq!(db.len(), 8);
        assert!(db.header_len() >= 8);
    }

    #[test]
    fn magic_beats_extension() {
        let db = SignatureDatabase::builtin().unwrap();
        let png = b"\x89PNG\r\n\x1a\n....";
        let found = db.identify(png, Some("photo.jpg"));
        assert_eq!(found.puid, "fmt/11");
        assert_eq!(found.basis, MatchBasis::Signature);
    }

    #[test]
    fn extension_is_case_insensitive_fallback() {
        let db = SignatureDatabase::builtin().unwrap();
        let found = db.identify(b"hello", Some("README.TXT"));
        assert_eq!(found.puid, "x-fmt/111");
        assert_eq!(found.basis, MatchBasis::Extension);
    }

    #[test]
    fn nothing_matches_is_unknown() {
        let db = SignatureDatabase::builtin().unwrap();
        assert!(db.identify(b"\x00\x01", Some("blob.bin")).is_unknown());
        assert!(db.identify(b"", None).is_unknown());
    }

    #[test]
    fn longest_pattern_wins() {
        let db = SignatureDatabase::from_toml_str(
            r#"
            [[format]]
            puid = "short"
            name = "Short"
            mime = "a/b"
            [[format.magic]]
            bytes = "4142"

            [[format]]
            puid = "long"
            name = "Long"
            mime = "a/c"
            [[format.magic]]
            bytes = "41424344"
            "#,
        )
        .unwrap();
        assert_eq!(db.identify(b"ABCD", None).puid, "long");
        assert_eq!(db.identify(b"ABXX", None).puid, "short");
    }

    #[test]
    fn offset_patterns_need_enough_header() {
        let db = SignatureDatabase::from_toml_str(
            r#"
            [[format]]
            puid = "off"
            name = "Offset"
            mime = "a/b"
            [[format.magic]]
            offset = 4
            bytes = "ff"
            "#,
        )
        .unwrap();
        assert_eq!(db.header_len(), 5);
        assert_eq!(db.identify(b"\0\0\0\0\xff", None).puid, "off");
        assert!(db.identify(b"\0\0\0", None).is_unknown());
    }

    #[test]
    fn malformed_databases_are_identification_errors() {
        for text in [
            "not = [valid",
            "[[format]]\npuid = \"\"\nname = \"x\"\nmime = \"y\"",
            "[[format]]\npuid = \"a\"\nname = \"x\"\nmime = \"y\"\n[[format.magic]]\nbytes = \"zz\"",
            "[[format]]\npuid = \"a\"\nname = \"x\"\nmime = \"y\"\n[[format]]\npuid = \"a\"\nname = \"z\"\nmime = \"y\"",
        ] {
            assert!(matches!(
                SignatureDatabase::from_toml_str(text),
                Err(FormatError::Identification(_))
            ));
        }
    }

    #[test]
    fn missing_file_is_identification_error() {
        let err = SignatureDatabase::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, FormatError::Identification(_)));
    }
}
