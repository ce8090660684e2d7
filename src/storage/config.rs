use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use envmnt::{ExpandOptions, ExpansionType};

use super::{FileSystemStore, HistoryStore, InMemoryStore};
use crate::error::ABCResult;

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum StorageConfig {
    FileSystem { base_path: PathBuf },
    InMemory,
}
impl StorageConfig {
    pub fn build(&self) -> ABCResult<Arc<dyn HistoryStore>> {
        match self {
            StorageConfig::FileSystem { base_path } => {
                Ok(Arc::new(FileSystemStore::new(expand_env(base_path))?))
            }
            StorageConfig::InMemory => Ok(Arc::new(InMemoryStore::new())),
        }
    }
}

// Expand environment variables in the path as appropriate
fn expand_env(path: &Path) -> PathBuf {
    let mut options = ExpandOptions::new();
    options.expansion_type = Some(ExpansionType::Unix);
    PathBuf::from(envmnt::expand(&path.to_string_lossy(), Some(options)))
}
