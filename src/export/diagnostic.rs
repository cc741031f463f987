use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Write the raw markup of a page that yielded no text, for offline inspection.
pub fn dump_page_source(dir: &Path, page_source: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let file_name = format!(
        "debug_page_source_{}.html",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let path = dir.join(file_name);
    fs::write(&path, page_source)?;
    Ok(path)
}
