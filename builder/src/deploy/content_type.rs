//! Content type inference for uploaded artifacts

use std::collections::HashMap;
use std::path::Path;

/// Extension → MIME resolution used when uploading artifacts.
///
/// Settings overrides win, then the `mime_guess` registry, then the optional
/// fallback for unknown extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentTypes {
    overrides: HashMap<String, String>,
    fallback: Option<String>,
}

impl ContentTypes {
    /// Add or replace mappings. Extensions may be given with or without a leading dot.
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (ext, mime) in overrides {
            self.overrides.insert(normalize(ext.as_ref()), mime.into());
        }
        self
    }

    /// Content type used for files whose extension is not known
    pub fn with_fallback(mut self, fallback: Option<String>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Look up the content type for a path by its extension
    pub fn lookup(&self, path: &Path) -> Option<&str> {
        let ext = path.extension().and_then(|ext| ext.to_str()).map(normalize);

        ext.and_then(|ext| {
            self.overrides
                .get(&ext)
                .map(String::as_str)
                .or_else(|| mime_guess::from_ext(&ext).first_raw())
        })
        .or(self.fallback.as_deref())
    }
}

fn normalize(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}
