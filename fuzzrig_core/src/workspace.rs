//! Filesystem helpers shared by both pipelines.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Lists the regular files directly inside a directory.
pub trait FileLister {
    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Non-recursive listing backed by `std::fs::read_dir`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirLister;

impl FileLister for DirLister {
    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}

/// Removes `dir` and everything under it if present, then recreates it empty.
pub fn reset_dir(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::create_dir_all(dir)
}

/// Writes `data` to `dir/name` through a temp file persisted into place, so a
/// reader never observes a partially written seed.
pub fn write_seed(dir: &Path, name: &str, data: &[u8]) -> io::Result<PathBuf> {
    let target = dir.join(name);
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(&target).map_err(|e| e.error)?;
    Ok(target)
}

/// True if `dir` holds at least one non-empty regular file.
pub fn has_nonempty_file(lister: &dyn FileLister, dir: &Path) -> io::Result<bool> {
    for file in lister.list(dir)? {
        if fs::metadata(&file)?.len() > 0 {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_discards_previous_contents() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("fuzz_out");
        fs::create_dir_all(dir.join("queue")).unwrap();
        fs::write(dir.join("queue").join("id:000000"), b"stale").unwrap();
        fs::write(dir.join("fuzzer_stats"), b"stale").unwrap();

        reset_dir(&dir).unwrap();

        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn reset_creates_missing_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("fuzz_in");
        reset_dir(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn seed_is_written_without_leftovers() {
        let root = tempfile::tempdir().unwrap();
        let path = write_seed(root.path(), "seed", b"1+1").unwrap();
        assert_eq!(path, root.path().join("seed"));
        assert_eq!(fs::read(&path).unwrap(), b"1+1");
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn lister_skips_directories() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("main.dot"), b"digraph {}").unwrap();
        fs::create_dir(root.path().join("nested.dot")).unwrap();
        fs::write(root.path().join("nested.dot").join("inner.dot"), b"").unwrap();

        let files = DirLister.list(root.path()).unwrap();
        assert_eq!(files, vec![root.path().join("main.dot")]);
    }

    #[test]
    fn empty_files_do_not_count_as_seeds() {
        let root = tempfile::tempdir().unwrap();
        assert!(!has_nonempty_file(&DirLister, root.path()).unwrap());
        fs::write(root.path().join("empty"), b"").unwrap();
        assert!(!has_nonempty_file(&DirLister, root.path()).unwrap());
        fs::write(root.path().join("seed"), b"x").unwrap();
        assert!(has_nonempty_file(&DirLister, root.path()).unwrap());
    }
}
