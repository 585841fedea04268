use std::collections::{BTreeSet, HashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::collab::Blacklist;

/// Newline delimited id file mirrored in memory.
#[derive(Debug, Clone)]
pub struct FileBlacklist {
    path: PathBuf,
    ids: Arc<Mutex<HashSet<String>>>,
    write_lock: Arc<Mutex<()>>,
}

impl FileBlacklist {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let ids = match fs_err::read_to_string(&path) {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };
        log::debug!("Loaded {} blacklisted ids from {}", ids.len(), path.display());
        Ok(Self {
            path,
            ids: Arc::new(Mutex::new(ids)),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids become visible to `contains` only once they are on disk.
    fn append(&self, ids: &[String]) -> anyhow::Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let fresh = {
            let known = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
            ids.iter()
                .map(|id| id.trim())
                .filter(|id| !id.is_empty() && !known.contains(*id))
                .map(String::from)
                .collect::<BTreeSet<_>>()
        };
        if fresh.is_empty() {
            return Ok(());
        }

        let mut file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for id in &fresh {
            writeln!(file, "{id}")?;
        }
        file.flush()?;

        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(fresh);
        Ok(())
    }
}

#[async_trait]
impl Blacklist for FileBlacklist {
    async fn contains(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id))
    }

    async fn add(&self, ids: &[String]) -> anyhow::Result<()> {
        let blacklist = self.clone();
        let ids = ids.to_vec();
        tokio::task::spawn_blocking(move || blacklist.append(&ids)).await?
    }
}
