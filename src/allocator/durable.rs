/*!
 * Durable Pool
 *
 * Memory source whose regions ("buckets") can outlive the process. Buckets
 * live in memory while in use; `persist` writes a bucket to its own file in
 * the pool directory and records it in a bincode index. Reopening the pool
 * loads every recorded bucket into fresh memory, so recovered regions come
 * back at new addresses and must be attached again before they are globally
 * addressable.
 *
 * ## Layout
 *
 * ```text
 * <root>/<pool_id>/index.bin        bincode PoolIndex
 * <root>/<pool_id>/bucket-<id>.bin  raw bucket bytes
 * ```
 */

use super::source::{region_range, LocalMemorySource};
use crate::core::limits::DURABLE_INDEX_FILE;
use crate::core::types::{LocalHandle, Size};
use crate::core::{GasError, GasResult};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct PoolIndex {
    pool_id: String,
    buckets: Vec<IndexEntry>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct IndexEntry {
    id: u64,
    len: usize,
}

struct Bucket {
    id: u64,
    data: Box<[u8]>,
    persisted: bool,
}

/// File-backed memory source
pub struct DurablePool {
    pool_id: String,
    dir: PathBuf,
    // Bucket address -> bucket
    buckets: AHashMap<u64, Bucket>,
    next_bucket: u64,
    recovered: Vec<LocalHandle>,
}

impl DurablePool {
    /// Open the pool `pool_id` under `root`, creating it if needed and
    /// relocating every bucket persisted by a previous run.
    pub fn open(root: impl AsRef<Path>, pool_id: impl Into<String>) -> GasResult<Self> {
        let pool_id = pool_id.into();
        let dir = root.as_ref().join(&pool_id);
        fs::create_dir_all(&dir)?;

        let mut pool = Self {
            pool_id,
            dir,
            buckets: AHashMap::new(),
            next_bucket: 0,
            recovered: Vec::new(),
        };

        let index = pool.load_index()?;
        for entry in index.buckets {
            let data = fs::read(pool.bucket_path(entry.id))?.into_boxed_slice();
            if data.len() != entry.len {
                return Err(GasError::Storage(format!(
                    "bucket {} holds {} bytes, index records {}",
                    entry.id,
                    data.len(),
                    entry.len
                )));
            }
            let handle = LocalHandle::new(data.as_ptr() as u64, data.len());
            pool.buckets.insert(
                handle.addr,
                Bucket {
                    id: entry.id,
                    data,
                    persisted: true,
                },
            );
            pool.next_bucket = pool.next_bucket.max(entry.id + 1);
            pool.recovered.push(handle);
        }

        info!(
            pool = %pool.pool_id,
            dir = %pool.dir.display(),
            recovered = pool.recovered.len(),
            "Durable pool opened"
        );
        Ok(pool)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("bucket-{}.bin", id))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(DURABLE_INDEX_FILE)
    }

    fn load_index(&self) -> GasResult<PoolIndex> {
        match fs::read(self.index_path()) {
            Ok(bytes) => {
                let index: PoolIndex = bincode::deserialize(&bytes)?;
                if index.pool_id != self.pool_id {
                    return Err(GasError::Storage(format!(
                        "index belongs to pool '{}', not '{}'",
                        index.pool_id, self.pool_id
                    )));
                }
                Ok(index)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(PoolIndex {
                pool_id: self.pool_id.clone(),
                buckets: Vec::new(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn store_index(&self) -> GasResult<()> {
        let mut buckets: Vec<IndexEntry> = self
            .buckets
            .values()
            .filter(|b| b.persisted)
            .map(|b| IndexEntry {
                id: b.id,
                len: b.data.len(),
            })
            .collect();
        buckets.sort_by_key(|entry| entry.id);

        let index = PoolIndex {
            pool_id: self.pool_id.clone(),
            buckets,
        };
        let bytes = bincode::serialize(&index)?;

        // Replace atomically
        let tmp = self.dir.join(format!("{}.tmp", DURABLE_INDEX_FILE));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, self.index_path())?;
        Ok(())
    }

    fn bucket(&self, handle: &LocalHandle) -> GasResult<&Bucket> {
        self.buckets.get(&handle.addr).ok_or(GasError::NotAllocated {
            addr: handle.addr,
            len: handle.len,
        })
    }
}

impl LocalMemorySource for DurablePool {
    fn pool_id(&self) -> &str {
        &self.pool_id
    }

    fn allocate(&mut self, nbytes: Size) -> GasResult<LocalHandle> {
        if nbytes == 0 {
            return Err(GasError::InvalidArgument(
                "cannot allocate an empty bucket".to_string(),
            ));
        }
        let data = vec![0u8; nbytes].into_boxed_slice();
        let handle = LocalHandle::new(data.as_ptr() as u64, nbytes);
        let id = self.next_bucket;
        self.next_bucket += 1;
        self.buckets.insert(
            handle.addr,
            Bucket {
                id,
                data,
                persisted: false,
            },
        );
        debug!(pool = %self.pool_id, bucket = id, nbytes, "Bucket allocated");
        Ok(handle)
    }

    fn release(&mut self, handle: LocalHandle) -> GasResult<()> {
        let bucket = self
            .buckets
            .remove(&handle.addr)
            .ok_or(GasError::NotAllocated {
                addr: handle.addr,
                len: handle.len,
            })?;
        if bucket.persisted {
            match fs::remove_file(self.bucket_path(bucket.id)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(pool = %self.pool_id, bucket = bucket.id, "Bucket file already gone");
                }
                Err(e) => return Err(e.into()),
            }
            self.store_index()?;
        }
        debug!(pool = %self.pool_id, bucket = bucket.id, "Bucket released");
        Ok(())
    }

    fn write(&mut self, handle: LocalHandle, offset: usize, data: &[u8]) -> GasResult<()> {
        let bucket = self
            .buckets
            .get_mut(&handle.addr)
            .ok_or(GasError::NotAllocated {
                addr: handle.addr,
                len: handle.len,
            })?;
        let range = region_range(bucket.data.len(), offset, data.len())?;
        bucket.data[range].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, handle: LocalHandle, offset: usize, len: usize) -> GasResult<Vec<u8>> {
        let bucket = self.bucket(&handle)?;
        let range = region_range(bucket.data.len(), offset, len)?;
        Ok(bucket.data[range].to_vec())
    }

    fn persist(&mut self, handle: LocalHandle) -> GasResult<()> {
        let path = {
            let bucket = self.bucket(&handle)?;
            let path = self.bucket_path(bucket.id);
            fs::write(&path, &bucket.data)?;
            path
        };
        if let Some(bucket) = self.buckets.get_mut(&handle.addr) {
            bucket.persisted = true;
        }
        self.store_index()?;
        debug!(pool = %self.pool_id, path = %path.display(), "Bucket persisted");
        Ok(())
    }

    fn recover(&mut self) -> GasResult<Vec<LocalHandle>> {
        Ok(std::mem::take(&mut self.recovered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_buckets_survive_reopen() {
        let root = TempDir::new().unwrap();
        {
            let mut pool = DurablePool::open(root.path(), "pool.pmem").unwrap();
            let kept = pool.allocate(16).unwrap();
            let volatile = pool.allocate(8).unwrap();
            pool.write(kept, 0, b"durable-contents").unwrap();
            pool.write(volatile, 0, b"volatile").unwrap();
            pool.persist(kept).unwrap();
            assert!(pool.recover().unwrap().is_empty());
        }

        let mut pool = DurablePool::open(root.path(), "pool.pmem").unwrap();
        let recovered = pool.recover().unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(
            pool.read(recovered[0], 0, 16).unwrap(),
            b"durable-contents".to_vec()
        );
        // Handed out once
        assert!(pool.recover().unwrap().is_empty());

        // New buckets never reuse a recovered id
        let fresh = pool.allocate(4).unwrap();
        pool.persist(fresh).unwrap();
        assert!(pool.dir().join("bucket-0.bin").exists());
        assert!(pool.dir().join("bucket-1.bin").exists());
    }

    #[test]
    fn test_release_forgets_persisted_bucket() {
        let root = TempDir::new().unwrap();
        {
            let mut pool = DurablePool::open(root.path(), "pool.pmem").unwrap();
            let bucket = pool.allocate(32).unwrap();
            pool.persist(bucket).unwrap();
            pool.release(bucket).unwrap();
            assert_eq!(pool.bucket_count(), 0);
            assert!(pool.release(bucket).is_err());
        }
        let mut pool = DurablePool::open(root.path(), "pool.pmem").unwrap();
        assert!(pool.recover().unwrap().is_empty());
    }

    #[test]
    fn test_index_of_other_pool_rejected() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("b");
        fs::create_dir_all(&dir).unwrap();
        let index = PoolIndex {
            pool_id: "a".to_string(),
            buckets: Vec::new(),
        };
        fs::write(dir.join(DURABLE_INDEX_FILE), bincode::serialize(&index).unwrap()).unwrap();
        assert!(matches!(
            DurablePool::open(root.path(), "b"),
            Err(GasError::Storage(_))
        ));
    }

    #[test]
    fn test_out_of_bounds_access() {
        let root = TempDir::new().unwrap();
        let mut pool = DurablePool::open(root.path(), "pool.pmem").unwrap();
        let bucket = pool.allocate(4).unwrap();
        assert!(pool.write(bucket, 2, b"abc").is_err());
        assert!(pool.allocate(0).is_err());
    }
}
