// SPDX-License-Identifier: Apache-2.0

//! On-disk state of a run: per-unit scratch directories, failure
//! directories and the append-only result log.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;

pub const RESULT_LOG: &str = "results.jsonl";

/// Creates a fresh scratch directory for one unit.
pub fn unit_scratch(prefix: &str) -> std::io::Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix(&format!("hdlcross-{}-", prefix))
        .tempdir()
}

/// Files making up one failure directory, written all at once.
#[derive(Debug, Default)]
pub struct FailureBundle {
    files: Vec<(String, Vec<u8>)>,
}

impl FailureBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_text(&mut self, name: &str, text: &str) {
        self.files.push((name.to_string(), text.as_bytes().to_vec()));
    }

    pub fn add_bytes(&mut self, name: &str, bytes: Vec<u8>) {
        self.files.push((name.to_string(), bytes));
    }

    pub fn add_json<T: Serialize>(&mut self, name: &str, value: &T) -> serde_json::Result<()> {
        let text = serde_json::to_string_pretty(value)?;
        self.add_text(name, &text);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|(n, _)| n.as_str())
    }
}

/// Root of everything a run persists.
#[derive(Debug)]
pub struct ResultStore {
    root: PathBuf,
    log: Mutex<File>,
}

impl ResultStore {
    pub fn open(root: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(root.join(RESULT_LOG))?;
        Ok(ResultStore {
            root: root.to_path_buf(),
            log: Mutex::new(log),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Appends one JSON line to the result log.
    pub fn append<T: Serialize>(&self, record: &T) -> std::io::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.write_all(line.as_bytes())?;
        log.flush()
    }

    /// Writes `bundle` to `<root>/<label>/<name>/`.
    ///
    /// The files are first written to a hidden directory under the root and
    /// the directory is then renamed into place, so a failure directory is
    /// either absent or complete. An existing directory of the same name is
    /// never overwritten; a numeric suffix is added instead.
    pub fn persist_failure(
        &self,
        label: &str,
        name: &str,
        bundle: &FailureBundle,
    ) -> std::io::Result<PathBuf> {
        let label_dir = self.root.join(label);
        std::fs::create_dir_all(&label_dir)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)?;
        for (file_name, bytes) in &bundle.files {
            std::fs::write(staging.path().join(file_name), bytes)?;
        }

        let mut target = label_dir.join(name);
        let mut suffix = 1;
        while target.exists() {
            target = label_dir.join(format!("{}-{}", name, suffix));
            suffix += 1;
        }
        std::fs::rename(staging.path(), &target)?;
        log::info!("Persisted {}", target.display());
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_failure_dir_is_complete_and_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let mut bundle = FailureBundle::new();
        bundle.add_text("input.v", "module m; endmodule\n");
        bundle.add_json("outcome.json", &vec![1, 2]).unwrap();

        let first = store.persist_failure("compilation", "u0", &bundle).unwrap();
        let second = store.persist_failure("compilation", "u0", &bundle).unwrap();
        assert_eq!(first, dir.path().join("compilation").join("u0"));
        assert_eq!(second, dir.path().join("compilation").join("u0-1"));
        assert_eq!(
            std::fs::read_to_string(first.join("input.v")).unwrap(),
            "module m; endmodule\n"
        );
        // No staging directories are left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(".staging-"))
            .collect();
        assert!(leftovers.is_empty(), "{:?}", leftovers);
    }

    #[test]
    fn test_result_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ResultStore::open(dir.path()).unwrap();
            store.append(&serde_json::json!({"unit": 0})).unwrap();
        }
        let store = ResultStore::open(dir.path()).unwrap();
        store.append(&serde_json::json!({"unit": 1})).unwrap();
        let text = std::fs::read_to_string(dir.path().join(RESULT_LOG)).unwrap();
        assert_eq!(text, "{\"unit\":0}\n{\"unit\":1}\n");
    }
}
