use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use super::{check_next_number, HistoryStore, RunId, RunInfo};
use crate::{
    error::{ABCErr, ABCResult},
    types::Generation,
};

#[derive(Debug)]
struct StoredRun {
    info: RunInfo,
    generations: Vec<Generation>,
}

/// Keeps every run in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    runs: RwLock<HashMap<RunId, StoredRun>>,
}
impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> ABCResult<RwLockReadGuard<'_, HashMap<RunId, StoredRun>>> {
        self.runs
            .read()
            .map_err(|_| ABCErr::StorageError("In-memory store lock poisoned".into()))
    }

    fn write(&self) -> ABCResult<RwLockWriteGuard<'_, HashMap<RunId, StoredRun>>> {
        self.runs
            .write()
            .map_err(|_| ABCErr::StorageError("In-memory store lock poisoned".into()))
    }
}

fn unknown(run: RunId) -> ABCErr {
    ABCErr::StorageError(format!("No run {} in memory", run))
}

impl HistoryStore for InMemoryStore {
    fn create_run(&self, info: &RunInfo) -> ABCResult<()> {
        let mut runs = self.write()?;
        if runs.contains_key(&info.id) {
            return Err(ABCErr::StorageError(format!("Run {} already exists", info.id)));
        }
        runs.insert(
            info.id,
            StoredRun {
                info: info.clone(),
                generations: Vec::new(),
            },
        );
        Ok(())
    }

    fn load_run(&self, run: RunId) -> ABCResult<RunInfo> {
        self.read()?.get(&run).map(|r| r.info.clone()).ok_or_else(|| unknown(run))
    }

    fn update_run(&self, info: &RunInfo) -> ABCResult<()> {
        let mut runs = self.write()?;
        let stored = runs.get_mut(&info.id).ok_or_else(|| unknown(info.id))?;
        stored.info = info.clone();
        Ok(())
    }

    fn list_runs(&self) -> ABCResult<Vec<RunId>> {
        let mut runs: Vec<RunId> = self.read()?.keys().copied().collect();
        runs.sort();
        Ok(runs)
    }

    fn max_t(&self, run: RunId) -> ABCResult<Option<u16>> {
        let runs = self.read()?;
        let stored = runs.get(&run).ok_or_else(|| unknown(run))?;
        Ok(stored.generations.last().map(|g| g.number))
    }

    fn save(&self, run: RunId, generation: &Generation) -> ABCResult<()> {
        let mut runs = self.write()?;
        let stored = runs.get_mut(&run).ok_or_else(|| unknown(run))?;
        let max_t = stored.generations.last().map(|g| g.number);
        check_next_number(run, max_t, generation.number)?;
        stored.generations.push(generation.clone());
        Ok(())
    }

    fn load_generation(&self, run: RunId, t: u16) -> ABCResult<Generation> {
        let runs = self.read()?;
        let stored = runs.get(&run).ok_or_else(|| unknown(run))?;
        stored
            .generations
            .get(usize::from(t))
            .cloned()
            .ok_or_else(|| ABCErr::StorageError(format!("Generation {} of run {} not found", t, run)))
    }
}
