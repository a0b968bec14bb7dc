use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Delimiter between trusted-list entries in the engine property string.
#[cfg(windows)]
pub const LIST_DELIMITER: &str = ";";
#[cfg(not(windows))]
pub const LIST_DELIMITER: &str = ":";

/// Managed code units keep the `.dll` extension on every platform; only
/// the engine's own native library name is platform specific.
pub const CODE_UNIT_EXT: &str = ".dll";

/// Executable code units, scanned in the application base directory only.
pub const EXE_UNIT_EXT: &str = ".exe";

/// Ordered list of code-unit paths the engine may load without further
/// verification.
///
/// Entries are kept in append order and are never deduplicated; when two
/// directories carry a code unit of the same name, the engine resolves it
/// from whichever path was appended first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrustedList {
    entries: Vec<PathBuf>,
}

impl TrustedList {
    pub fn new() -> TrustedList {
        TrustedList::default()
    }

    /// Append every immediate entry of `dir` whose name ends with `ext`.
    ///
    /// The match is a case-sensitive suffix check including the dot, and a
    /// bare `ext` with nothing in front of it does not match. Entries are
    /// appended as `dir` joined with the entry name, in native enumeration
    /// order. A missing or unreadable directory appends nothing.
    pub fn append_dir(&mut self, dir: &Path, ext: &str) {
        let Ok(iter) = fs::read_dir(dir) else {
            tracing::debug!(dir = %dir.display(), "trusted-list scan skipped unreadable directory");
            return;
        };
        let before = self.entries.len();
        for entry in iter.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.len() > ext.len() && name.ends_with(ext) {
                self.entries.push(dir.join(name));
            }
        }
        tracing::debug!(
            dir = %dir.display(),
            ext,
            appended = self.entries.len() - before,
            "scanned trusted-list directory"
        );
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Join all entries with the platform delimiter, producing the value of
    /// the engine's trusted-assemblies property.
    pub fn join(&self) -> String {
        self.entries
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join(LIST_DELIMITER)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs::File;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn test_appends_matching_files_only() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.dll");
        touch(dir.path(), "b.dll");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "b.dll.bak");

        let mut list = TrustedList::new();
        list.append_dir(dir.path(), CODE_UNIT_EXT);

        let mut names: Vec<_> = list
            .entries()
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["a.dll", "b.dll"]);
        for entry in list.entries() {
            assert!(entry.starts_with(dir.path()));
        }
    }

    #[test]
    fn test_extension_match_is_case_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Upper.DLL");
        touch(dir.path(), "lower.dll");

        let mut list = TrustedList::new();
        list.append_dir(dir.path(), CODE_UNIT_EXT);

        assert_eq!(list.len(), 1);
        assert_eq!(list.entries()[0].file_name().unwrap(), "lower.dll");
    }

    #[test]
    fn test_bare_extension_name_does_not_match() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ".dll");
        touch(dir.path(), "real.dll");

        let mut list = TrustedList::new();
        list.append_dir(dir.path(), CODE_UNIT_EXT);

        assert_eq!(list.len(), 1);
        assert_eq!(list.entries()[0].file_name().unwrap(), "real.dll");
    }

    #[test]
    fn test_missing_directory_appends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut list = TrustedList::new();
        list.append_dir(&dir.path().join("no-such-subdir"), CODE_UNIT_EXT);
        assert!(list.is_empty());
    }

    #[test]
    fn test_no_dedup_and_first_append_wins_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        touch(first.path(), "shared.dll");
        touch(second.path(), "shared.dll");

        let mut list = TrustedList::new();
        list.append_dir(first.path(), CODE_UNIT_EXT);
        list.append_dir(second.path(), CODE_UNIT_EXT);

        assert_eq!(list.len(), 2);
        assert!(list.entries()[0].starts_with(first.path()));
        assert!(list.entries()[1].starts_with(second.path()));
    }

    #[test]
    fn test_join_uses_platform_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.dll");
        touch(dir.path(), "b.dll");

        let mut list = TrustedList::new();
        list.append_dir(dir.path(), CODE_UNIT_EXT);

        let joined = list.join();
        assert_eq!(joined.matches(LIST_DELIMITER).count(), 1);
        assert!(joined.contains(".dll"));
    }
}
