use std::io;
use std::path::Path;
use walkdir::WalkDir;
// Served-directory enumeration

/// List the regular files directly inside `root` (non-recursive).
///
/// Order is whatever the platform's directory enumeration yields; callers must
/// not rely on it. Names that cannot travel in a header line (non-UTF-8, or
/// containing a newline) are skipped.
pub fn list_served_files(root: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
    {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.file_name().to_str() {
            Some(name) if !name.contains('\n') && !name.contains('\r') => {
                names.push(name.to_string())
            }
            _ => continue,
        }
    }
    Ok(names)
}
