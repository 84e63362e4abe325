use std::path::{Path, PathBuf};
use walkdir::WalkDir;
// Local directory enumeration for sync units (one level, regular files only)

/// Regular file inside a unit directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Entries that were not turned into [`LocalFile`]s
#[derive(Debug, Default, Clone)]
pub struct SkippedEntries {
    pub directories: Vec<PathBuf>,
    pub other: Vec<PathBuf>,
}

/// Listing of a unit directory, sorted by name (byte order)
#[derive(Debug, Default, Clone)]
pub struct DirectoryListing {
    pub files: Vec<LocalFile>,
    pub skipped: SkippedEntries,
}

impl DirectoryListing {
    pub fn names(&self) -> Vec<String> {
        self.files.iter().map(|f| f.name.clone()).collect()
    }
}

/// Enumerate the regular files directly under `root`.
///
/// Symlinks are followed so a link to a file syncs the file. Sub-directories,
/// special files and non-UTF-8 names are reported in `skipped` instead.
pub fn list_directory(root: &Path) -> std::io::Result<DirectoryListing> {
    let mut listing = DirectoryListing::default();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            // dangling symlink or unreadable entry below the root
            Err(e) if e.depth() > 0 => {
                if let Some(p) = e.path() {
                    listing.skipped.other.push(p.to_path_buf());
                }
                continue;
            }
            Err(e) => {
                let msg = e.to_string();
                return Err(e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, msg)));
            }
        };
        let path = entry.path().to_path_buf();

        if entry.file_type().is_dir() {
            listing.skipped.directories.push(path);
            continue;
        }
        if !entry.file_type().is_file() {
            listing.skipped.other.push(path);
            continue;
        }
        let name = match entry.file_name().to_str() {
            Some(n) => n.to_string(),
            None => {
                listing.skipped.other.push(path);
                continue;
            }
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        listing.files.push(LocalFile { name, path, size });
    }

    listing.files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_sorted_files_only() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("b.txt"), b"bb").unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::write(root.join("B.txt"), b"B").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub").join("deep.txt"), b"x").unwrap();

        let listing = list_directory(root).unwrap();
        assert_eq!(listing.names(), vec!["B.txt", "a.txt", "b.txt"]);
        assert_eq!(listing.files[2].size, 2);
        assert_eq!(listing.skipped.directories, vec![root.join("sub")]);
    }

    #[test]
    fn test_missing_directory_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(list_directory(&tmp.path().join("absent")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_to_file_is_listed() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("real.dat");
        fs::write(&target, b"1234").unwrap();
        let unit = tmp.path().join("unit");
        fs::create_dir(&unit).unwrap();
        std::os::unix::fs::symlink(&target, unit.join("link.dat")).unwrap();

        let listing = list_directory(&unit).unwrap();
        assert_eq!(listing.names(), vec!["link.dat"]);
        assert_eq!(listing.files[0].size, 4);
    }
}
