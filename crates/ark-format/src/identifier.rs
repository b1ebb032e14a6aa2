use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};
use std::sync::Arc;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{FormatError, FormatResult};
use crate::format::DetectedFormat;
use crate::signature::SignatureDatabase;

/// Identifies the format of every file under a path.
#[derive(Clone, Debug)]
pub struct FormatIdentifier {
    database: Arc<SignatureDatabase>,
}

impl FormatIdentifier {
    pub fn new(database: SignatureDatabase) -> Self {
        Self {
            database: Arc::new(database),
        }
    }

    /// Identifier over the embedded database.
    pub fn builtin() -> FormatResult<Self> {
        Ok(Self::new(SignatureDatabase::builtin()?))
    }

    /// Identifier over the database at `path`, or the embedded one when
    /// `path` is `None`.
    pub fn from_config(path: Option<&Path>) -> FormatResult<Self> {
        match path {
            Some(path) => Ok(Self::new(SignatureDatabase::load(path)?)),
            None => Self::builtin(),
        }
    }

    pub fn database(&self) -> &SignatureDatabase {
        &self.database
    }

    /// Identify a single file.
    pub fn identify_file(&self, path: &Path) -> FormatResult<DetectedFormat> {
        let header = self.read_header(path)?;
        let name = path.file_name().and_then(|n| n.to_str());
        Ok(self.database.identify(&header, name))
    }

    /// Map every regular file under `path` to its detected format.
    ///
    /// Keys are `/`-separated paths relative to `path`; a single file is
    /// keyed by its own name.
    pub fn analyze(&self, path: &Path) -> FormatResult<BTreeMap<String, DetectedFormat>> {
        let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FormatError::NotFound(path.to_path_buf()),
            _ => FormatError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let mut formats = BTreeMap::new();
        if meta.is_file() {
            let key = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            formats.insert(key, self.identify_file(path)?);
            return Ok(formats);
        }

        for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                FormatError::Identification(format!("walking {}: {e}", path.display()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(path)
                .map_err(|e| FormatError::Identification(e.to_string()))?;
            formats.insert(relative_key(relative), self.identify_file(entry.path())?);
        }
        debug!(path = %path.display(), files = formats.len(), "identified formats");
        Ok(formats)
    }

    fn read_header(&self, path: &Path) -> FormatResult<Vec<u8>> {
        let io = |source| FormatError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io)?;
        let mut header = Vec::with_capacity(self.database.header_len());
        file.take(self.database.header_len() as u64)
            .read_to_end(&mut header)
            .map_err(io)?;
        Ok(header)
    }
}

/// Relative path with `/` separators regardless of platform.
pub fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
