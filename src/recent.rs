//! Recently used configuration files.
//!
//! A plain text file, one absolute path per line, newest first.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigResult;

/// Most entries kept in the list.
pub const MAX_RECENTLY_USED_CFGS: usize = 8;

/// Handle on one recently-used list file.
#[derive(Debug, Clone)]
pub struct RecentConfigs {
    list_file: PathBuf,
}

impl RecentConfigs {
    pub fn new(list_file: impl Into<PathBuf>) -> Self {
        Self {
            list_file: list_file.into(),
        }
    }

    /// The list stored in the application data directory.
    pub fn default_location() -> Self {
        Self::new(crate::paths::recently_used_cfg_file())
    }

    pub fn list_file(&self) -> &Path {
        &self.list_file
    }

    /// Put `cfg_path` first, dropping duplicates and the oldest surplus.
    pub fn add(&self, cfg_path: &Path) -> ConfigResult<()> {
        let cfg_path = absolute(cfg_path);
        let mut entries = vec![cfg_path.display().to_string()];
        for line in self.read_lines() {
            if !entries.contains(&line) {
                entries.push(line);
            }
        }
        entries.truncate(MAX_RECENTLY_USED_CFGS);

        if let Some(dir) = self.list_file.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut text = entries.join("\n");
        text.push('\n');
        fs::write(&self.list_file, text)?;
        log::debug!("Recently used configurations updated: {}", self.list_file.display());
        Ok(())
    }

    /// Up to `number` entries that still exist on disk, newest first.
    pub fn get(&self, number: usize) -> Vec<PathBuf> {
        self.read_lines()
            .into_iter()
            .map(PathBuf::from)
            .filter(|p| p.exists())
            .take(number)
            .collect()
    }

    pub fn most_recent(&self) -> Option<PathBuf> {
        self.get(1).into_iter().next()
    }

    fn read_lines(&self) -> Vec<String> {
        match fs::read_to_string(&self.list_file) {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!(
                        "Unable to read recently used configurations from {}: {}",
                        self.list_file.display(),
                        e
                    );
                }
                Vec::new()
            }
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let p = dir.join(name);
        fs::write(&p, "{}").unwrap();
        p
    }

    #[test]
    fn test_newest_first_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let recent = RecentConfigs::new(dir.path().join("mru.txt"));
        let a = touch(dir.path(), "a.json");
        let b = touch(dir.path(), "b.json");

        recent.add(&a).unwrap();
        recent.add(&b).unwrap();
        recent.add(&a).unwrap();
        assert_eq!(recent.get(10), vec![a.clone(), b]);
        assert_eq!(recent.most_recent(), Some(a));
    }

    #[test]
    fn test_list_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let recent = RecentConfigs::new(dir.path().join("mru.txt"));
        let files: Vec<PathBuf> = (0..12)
            .map(|i| touch(dir.path(), &format!("cfg{}.json", i)))
            .collect();
        for f in &files {
            recent.add(f).unwrap();
        }
        let got = recent.get(100);
        assert_eq!(got.len(), MAX_RECENTLY_USED_CFGS);
        assert_eq!(got[0], files[11]);
        assert_eq!(got[7], files[4]);
    }

    #[test]
    fn test_missing_files_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let recent = RecentConfigs::new(dir.path().join("mru.txt"));
        let keep = touch(dir.path(), "keep.json");
        let gone = touch(dir.path(), "gone.json");
        recent.add(&keep).unwrap();
        recent.add(&gone).unwrap();
        fs::remove_file(&gone).unwrap();
        assert_eq!(recent.most_recent(), Some(keep));
    }

    #[test]
    fn test_no_list_file() {
        let dir = tempfile::tempdir().unwrap();
        let recent = RecentConfigs::new(dir.path().join("nested").join("mru.txt"));
        assert!(recent.get(8).is_empty());
        assert!(recent.most_recent().is_none());
        let cfg = touch(dir.path(), "x.json");
        recent.add(&cfg).unwrap();
        assert_eq!(recent.get(8), vec![cfg]);
    }
}
