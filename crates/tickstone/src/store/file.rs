use crate::{BoundRecord, BoundStore, StoreError};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::sync::Mutex;

/// A [`BoundStore`] persisted as a single JSON document.
///
/// Writes go to a sibling temp file which is fsynced and renamed over the
/// original, then the directory is fsynced, so a crash leaves either the old
/// or the new record. Compare-and-set is serialized within the process by a
/// mutex and across processes by an exclusive advisory lock on a sibling
/// `.lock` file (Unix only), so an oracle that lingers during failover cannot
/// overwrite a newer record.
#[derive(Debug)]
pub struct FileBoundStore {
    path: PathBuf,
    cas_lock: Mutex<()>,
}

#[cfg(unix)]
type FileLock = nix::fcntl::Flock<std::fs::File>;

#[cfg(not(unix))]
type FileLock = ();

impl FileBoundStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cas_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    async fn read(&self) -> Result<BoundRecord, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BoundRecord::Missing),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, record: BoundRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&record)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::File::open(&tmp).await?.sync_all().await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        // The rename is only durable once the directory entry is.
        #[cfg(unix)]
        tokio::fs::File::open(self.dir()).await?.sync_all().await?;
        Ok(())
    }

    /// Blocks until this process holds the exclusive lock on the sibling
    /// `.lock` file. Released when the returned value is dropped.
    #[cfg(unix)]
    async fn lock_file(&self) -> Result<FileLock, StoreError> {
        use nix::fcntl::{Flock, FlockArg};

        let path = self.path.with_extension("lock");
        let lock = tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| io::Error::from(errno))
        })
        .await
        .map_err(io::Error::other)??;
        Ok(lock)
    }

    #[cfg(not(unix))]
    async fn lock_file(&self) -> Result<FileLock, StoreError> {
        Ok(())
    }
}

impl BoundStore for FileBoundStore {
    async fn get(&self) -> Result<BoundRecord, StoreError> {
        let _guard = self.cas_lock.lock().await;
        self.read().await
    }

    async fn compare_and_set(
        &self,
        expected: BoundRecord,
        new: BoundRecord,
    ) -> Result<bool, StoreError> {
        let _guard = self.cas_lock.lock().await;
        tokio::fs::create_dir_all(self.dir()).await?;
        let _file_lock = self.lock_file().await?;
        if self.read().await? != expected {
            return Ok(false);
        }
        self.write(new).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_reads_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBoundStore::new(dir.path().join("bound.json"));
        assert_eq!(store.get().await.unwrap(), BoundRecord::Missing);
    }

    #[tokio::test]
    async fn record_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bound.json");
        let next = BoundRecord::Active { upper_limit: 1_000 };

        let store = FileBoundStore::new(&path);
        assert!(
            store
                .compare_and_set(BoundRecord::Missing, next)
                .await
                .unwrap()
        );
        drop(store);

        let reopened = FileBoundStore::new(&path);
        assert_eq!(reopened.get().await.unwrap(), next);
        assert!(
            !reopened
                .compare_and_set(BoundRecord::Missing, BoundRecord::Active { upper_limit: 1 })
                .await
                .unwrap()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn independent_handles_never_lose_an_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bound.json");

        // Each task opens its own handle, as a second process would, so only
        // the lock file serializes them.
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = FileBoundStore::new(&path);
                tokio::spawn(async move {
                    for _ in 0..25 {
                        loop {
                            let current = store.get().await.unwrap();
                            let next = BoundRecord::Active {
                                upper_limit: current.reserved_upto() + 1,
                            };
                            if store.compare_and_set(current, next).await.unwrap() {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();
        futures::future::try_join_all(tasks).await.unwrap();

        assert_eq!(
            FileBoundStore::new(&path).get().await.unwrap(),
            BoundRecord::Active { upper_limit: 200 }
        );
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bound.json");
        std::fs::write(&path, b"not json").unwrap();

        let store = FileBoundStore::new(&path);
        assert!(matches!(store.get().await, Err(StoreError::Corrupt(_))));
    }
}
