// --- Catalog ------------------------------------------------------------------

use std::path::{Path, PathBuf};

/// One playable audio file. Identity is its path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CatalogItem {
    path: PathBuf,
}

impl CatalogItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without extension, used when tags carry no title.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// Which directory entries count as playable.
#[derive(Clone, Debug)]
pub struct CatalogFilter {
    extensions: Vec<String>,
}

impl CatalogFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Hidden files and macOS resource forks (`._foo.mp3`) are junk.
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name.starts_with('.') {
            return false;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|a| *a == ext)
    }
}

/// Enumerate playable items directly inside `dir`.
///
/// A missing or unreadable directory yields an empty catalog rather than an
/// error; the caller decides whether that is fatal (startup) or transient
/// (steady state). Order is whatever the filesystem returns.
pub fn load_catalog(dir: &Path, filter: &CatalogFilter) -> Vec<CatalogItem> {
    let rd = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            tracing::warn!("sounds folder unavailable ({}): {e}", dir.display());
            return Vec::new();
        }
    };

    let mut items = Vec::new();
    for ent in rd {
        let ent = match ent {
            Ok(ent) => ent,
            Err(e) => {
                tracing::warn!("failed to read entry in {}: {e}", dir.display());
                continue;
            }
        };
        let p = ent.path();
        if !p.is_file() || !filter.accepts(&p) {
            continue;
        }
        items.push(CatalogItem::new(p));
    }

    tracing::info!("loaded {} tracks from {}", items.len(), dir.display());
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    fn default_filter() -> CatalogFilter {
        CatalogFilter::new(crate::config::DEFAULT_AUDIO_EXTENSIONS)
    }

    #[test]
    fn filters_junk_and_unsupported_extensions() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.mp3", "B.FLAC", "c.wav", "d.m4a", "._a.mp3", ".hidden.mp3", "notes.txt", "noext"] {
            touch(dir.path(), name);
        }
        std::fs::create_dir(dir.path().join("nested.mp3")).unwrap();

        let names: HashSet<String> = load_catalog(dir.path(), &default_filter())
            .iter()
            .map(|i| i.path().file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        let expected: HashSet<String> = ["a.mp3", "B.FLAC", "c.wav", "d.m4a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_catalog(&dir.path().join("Sounds"), &default_filter()).is_empty());
    }

    #[test]
    fn loading_twice_yields_same_membership() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["one.mp3", "two.mp3", "three.flac"] {
            touch(dir.path(), name);
        }
        let first: HashSet<_> = load_catalog(dir.path(), &default_filter()).into_iter().collect();
        let second: HashSet<_> = load_catalog(dir.path(), &default_filter()).into_iter().collect();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn custom_extensions() {
        let filter = CatalogFilter::new([".OGG"]);
        assert!(filter.accepts(Path::new("/x/song.ogg")));
        assert!(!filter.accepts(Path::new("/x/song.mp3")));
    }
}
