use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Persists the per-page result strings of a run as an indented JSON array.
pub struct PageListWriter {
    path: PathBuf,
    pretty: bool,
}

impl PageListWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pretty: true,
        }
    }

    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the output file with `pages`.
    pub fn write(&self, pages: &[String]) -> io::Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(pages)?
        } else {
            serde_json::to_string(pages)?
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = File::create(&self.path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
