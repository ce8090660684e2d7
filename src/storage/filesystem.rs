use std::{
    fs::File,
    io::{BufReader, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use log::debug;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};

use super::{check_next_number, HistoryStore, RunId, RunInfo};
use crate::{
    error::{ABCErr, ABCResult},
    types::Generation,
};

const RUN_FILE: &str = "run.json";

/// One directory per run under `base_path`:
///
/// ```text
/// run_<uuid>/run.json
/// run_<uuid>/gen_000.json
/// run_<uuid>/gen_001.json
/// ```
///
/// Files are written to a hidden temporary name and renamed into place, so a
/// generation file either exists complete or not at all.
#[derive(Debug)]
pub struct FileSystemStore {
    base_path: PathBuf,
    gen_file_re: Regex,
    run_dir_re: Regex,
    save_lock: Mutex<()>,
}
impl FileSystemStore {
    pub fn new(base_path: impl Into<PathBuf>) -> ABCResult<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            gen_file_re: Regex::new(r#"^gen_(?P<gid>\d+)\.json$"#)?,
            run_dir_re: Regex::new(r#"^run_(?P<rid>[0-9a-fA-F-]+)$"#)?,
            save_lock: Mutex::new(()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn run_dir(&self, run: RunId) -> PathBuf {
        self.base_path.join(format!("run_{}", run))
    }

    fn gen_file(&self, run: RunId, t: u16) -> PathBuf {
        self.run_dir(run).join(format!("gen_{:03}.json", t))
    }

    fn existing_run_dir(&self, run: RunId) -> ABCResult<PathBuf> {
        let dir = self.run_dir(run);
        if dir.join(RUN_FILE).exists() {
            Ok(dir)
        } else {
            Err(ABCErr::StorageError(format!("No run {} under {:?}", run, self.base_path)))
        }
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> ABCResult<T> {
        let file = File::open(path).map_err(|e| ABCErr::StorageError(format!("Failed to open {:?}: {}", path, e)))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> ABCResult<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ABCErr::StorageError(format!("Not a file path: {:?}", path)))?;
        let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

        let serialised = serde_json::to_string_pretty(value)?;
        let written = Self::write_then_rename(&tmp_path, path, serialised.as_bytes());
        if written.is_err() && tmp_path.exists() {
            if let Err(e) = std::fs::remove_file(&tmp_path) {
                debug!("Could not remove {:?}: {}", tmp_path, e);
            }
        }
        written
    }

    fn write_then_rename(tmp_path: &Path, path: &Path, bytes: &[u8]) -> ABCResult<()> {
        {
            let mut file = File::create(tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(tmp_path, path)?;
        Ok(())
    }
}

impl HistoryStore for FileSystemStore {
    fn create_run(&self, info: &RunInfo) -> ABCResult<()> {
        let dir = self.run_dir(info.id);
        if dir.join(RUN_FILE).exists() {
            return Err(ABCErr::StorageError(format!("Run {} already exists", info.id)));
        }
        std::fs::create_dir_all(&dir)?;
        Self::write_json_atomic(&dir.join(RUN_FILE), info)?;
        debug!("Created run directory {:?}", dir);
        Ok(())
    }

    fn load_run(&self, run: RunId) -> ABCResult<RunInfo> {
        Self::read_json(&self.existing_run_dir(run)?.join(RUN_FILE))
    }

    fn update_run(&self, info: &RunInfo) -> ABCResult<()> {
        let _guard = self
            .save_lock
            .lock()
            .map_err(|_| ABCErr::StorageError("Save lock poisoned".into()))?;
        let dir = self.existing_run_dir(info.id)?;
        Self::write_json_atomic(&dir.join(RUN_FILE), info)?;
        debug!("Updated run file in {:?}", dir);
        Ok(())
    }

    fn list_runs(&self) -> ABCResult<Vec<RunId>> {
        let mut runs: Vec<RunId> = std::fs::read_dir(&self.base_path)?
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                if !path.join(RUN_FILE).exists() {
                    return None;
                }
                let name = path.file_name()?.to_string_lossy().into_owned();
                let caps = self.run_dir_re.captures(&name)?;
                RunId::parse_str(&caps["rid"]).ok()
            })
            .collect();
        runs.sort();
        Ok(runs)
    }

    fn max_t(&self, run: RunId) -> ABCResult<Option<u16>> {
        let dir = self.existing_run_dir(run)?;
        let max = std::fs::read_dir(dir)?
            .filter_map(|entry| {
                let name = entry.ok()?.file_name().to_string_lossy().into_owned();
                let caps = self.gen_file_re.captures(&name)?;
                caps["gid"].parse::<u16>().ok()
            })
            .max();
        Ok(max)
    }

    fn save(&self, run: RunId, generation: &Generation) -> ABCResult<()> {
        let _guard = self
            .save_lock
            .lock()
            .map_err(|_| ABCErr::StorageError("Save lock poisoned".into()))?;

        let file_path = self.gen_file(run, generation.number);
        if file_path.exists() {
            return Err(ABCErr::GenAlreadySaved(format!(
                "Gen file already existed at {:?}",
                file_path
            )));
        }
        check_next_number(run, self.max_t(run)?, generation.number)?;

        Self::write_json_atomic(&file_path, generation)?;
        debug!("Saved generation {} to {:?}", generation.number, file_path);
        Ok(())
    }

    fn load_generation(&self, run: RunId, t: u16) -> ABCResult<Generation> {
        self.existing_run_dir(run)?;
        let path = self.gen_file(run, t);
        if !path.exists() {
            return Err(ABCErr::StorageError(format!(
                "Generation {} of run {} not found",
                t, run
            )));
        }
        let generation: Generation = Self::read_json(&path)?;
        if generation.number != t {
            return Err(ABCErr::StorageConsistencyError(format!(
                "File {:?} holds generation {}",
                path, generation.number
            )));
        }
        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::storage::test_helper::{exercise_store, make_dummy_generation, observed};

    fn store_in(dir: &tempfile::TempDir) -> FileSystemStore {
        FileSystemStore::new(dir.path()).unwrap()
    }

    #[test]
    fn behaves_as_history_store() -> ABCResult<()> {
        let dir = tempfile::tempdir()?;
        exercise_store(&store_in(&dir))
    }

    #[test]
    fn generation_file_layout() -> ABCResult<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(&dir);
        let info = RunInfo::new(vec!["only".into()], vec![vec!["x".into()]], observed());
        store.create_run(&info)?;
        store.save(info.id, &make_dummy_generation(0, f64::INFINITY))?;

        let run_dir = dir.path().join(format!("run_{}", info.id));
        assert!(run_dir.join("run.json").exists());
        assert!(run_dir.join("gen_000.json").exists());
        // No temporary files left behind.
        let leftovers = std::fs::read_dir(&run_dir)?
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(0, leftovers);

        let json: Value = serde_json::from_str(&std::fs::read_to_string(run_dir.join("gen_000.json"))?)?;
        assert_eq!(0, json["number"]);
        assert_eq!("inf", json["epsilon"]);
        assert!(store.load_generation(info.id, 0)?.epsilon.is_infinite());
        Ok(())
    }

    #[test]
    fn dont_save_over_existing_gen_file() -> ABCResult<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(&dir);
        let info = RunInfo::new(vec!["only".into()], vec![vec!["x".into()]], observed());
        store.create_run(&info)?;

        let first = make_dummy_generation(0, 0.3);
        store.save(info.id, &first)?;

        // Another worker got there first.
        match store.save(info.id, &make_dummy_generation(0, 0.4)) {
            Err(ABCErr::GenAlreadySaved(_)) => (),
            other => panic!("Expected GenAlreadySaved, got {:?}", other),
        }
        assert_eq!(first, store.load_generation(info.id, 0)?);
        Ok(())
    }

    #[test]
    fn unrelated_files_are_ignored() -> ABCResult<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(&dir);
        let info = RunInfo::new(vec!["only".into()], vec![vec!["x".into()]], observed());
        store.create_run(&info)?;
        let run_dir = dir.path().join(format!("run_{}", info.id));
        std::fs::write(run_dir.join("notes.txt"), "hello")?;
        std::fs::write(run_dir.join(".gen_000.json.tmp"), "{")?;
        std::fs::create_dir(dir.path().join("scratch"))?;

        assert_eq!(None, store.max_t(info.id)?);
        assert_eq!(vec![info.id], store.list_runs()?);
        Ok(())
    }

    #[test]
    fn failed_write_leaves_no_temporary_file() -> ABCResult<()> {
        let dir = tempfile::tempdir()?;
        // A non-empty directory where the file should go makes the rename fail.
        let target = dir.path().join("gen_000.json");
        std::fs::create_dir(&target)?;
        std::fs::write(target.join("occupant"), "x")?;

        let result = FileSystemStore::write_json_atomic(&target, &make_dummy_generation(0, 1.0));
        assert!(result.is_err());
        assert!(!dir.path().join(".gen_000.json.tmp").exists());
        assert!(target.is_dir());
        Ok(())
    }

    #[test]
    fn run_file_without_calibration_count_still_loads() -> ABCResult<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(&dir);
        let info = RunInfo::new(vec!["only".into()], vec![vec!["x".into()]], observed());
        store.create_run(&info)?;

        let run_file = dir.path().join(format!("run_{}", info.id)).join("run.json");
        let mut json: Value = serde_json::from_str(&std::fs::read_to_string(&run_file)?)?;
        json.as_object_mut().unwrap().remove("calibration_simulations");
        std::fs::write(&run_file, serde_json::to_string(&json)?)?;

        assert_eq!(0, store.load_run(info.id)?.calibration_simulations);
        Ok(())
    }

    #[test]
    fn unknown_run_is_storage_error() -> ABCResult<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(&dir);
        let result = store.max_t(RunId::new_v4());
        assert!(matches!(result, Err(ABCErr::StorageError(_))));
        Ok(())
    }

    #[test]
    fn reopened_store_sees_history() -> ABCResult<()> {
        let dir = tempfile::tempdir()?;
        let info = RunInfo::new(vec!["only".into()], vec![vec!["x".into()]], observed());
        {
            let store = store_in(&dir);
            store.create_run(&info)?;
            store.save(info.id, &make_dummy_generation(0, 2.0))?;
        }
        let store = store_in(&dir);
        assert_eq!(Some(0), store.max_t(info.id)?);
        assert_eq!(info, store.load_run(info.id)?);
        Ok(())
    }
}
