use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Suffix carried by every file while it is under construction.
pub const TEMP_SUFFIX: &str = ".tmp";

/// `report.csv` becomes `report.csv.tmp`. The suffix goes after the full
/// file name so the working copy never collides with the final path.
pub fn working_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

pub fn prepare_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Snapshot a file as UTF-8 text; an absent file reads as `None`.
pub fn read_snapshot(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error),
    }
}

pub fn open_working(path: &Path, append: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).write(true);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    options.open(path)
}

/// Promote the working copy to its final path. Atomic within one volume;
/// this rename is the engine's sole atomicity boundary.
pub fn promote(working: &Path, target: &Path) -> io::Result<()> {
    fs::rename(working, target)
}

/// Remove a file, treating "already gone" as success. Returns whether a
/// file actually existed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{read_snapshot, remove_if_exists, working_path};

    fn scratch_path(test_name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("accrete-fsops-{test_name}-{nanos}"))
    }

    #[test]
    fn working_path_appends_suffix_after_extension() {
        assert_eq!(
            working_path(Path::new("/out/report.csv")),
            PathBuf::from("/out/report.csv.tmp")
        );
    }

    #[test]
    fn read_snapshot_of_absent_file_is_none() {
        let path = scratch_path("absent");
        assert_eq!(read_snapshot(&path).unwrap(), None);
    }

    #[test]
    fn remove_if_exists_reports_whether_a_file_was_there() {
        let path = scratch_path("remove");
        assert!(!remove_if_exists(&path).unwrap());

        std::fs::write(&path, b"x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!path.exists());
    }
}
