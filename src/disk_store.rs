//! Disk Store (spec.md §4.1): a durable mapping from page identifier (or a
//! named artifact) to a byte blob, with atomic single-blob writes.
//!
//! Torn writes are impossible *within* a blob but possible *across* blobs —
//! closing that gap across a checkpoint's batch of dirty pages is the
//! Double-Write Buffer's job (`dwb.rs`), not this module's.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::EngineResult;
use crate::page::PageId;

const INDEX_ARTIFACT: &str = "index";
const REDO_LOG_ARTIFACT: &str = "redo_log";
const DWB_ARTIFACT: &str = "dwb";

/// A directory of files: one per page id, plus the named artifacts.
pub struct FsDiskStore {
    root: PathBuf,
}

impl FsDiskStore {
    pub fn open(root: impl Into<PathBuf>) -> EngineResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn read_page(&self, page_id: PageId) -> EngineResult<Option<Vec<u8>>> {
        self.read_named(&page_file_name(page_id))
    }

    pub fn write_page(&self, page_id: PageId, bytes: &[u8]) -> EngineResult<()> {
        self.write_named(&page_file_name(page_id), bytes)
    }

    pub fn read_index(&self) -> EngineResult<Option<Vec<u8>>> {
        self.read_named(INDEX_ARTIFACT)
    }

    pub fn write_index(&self, bytes: &[u8]) -> EngineResult<()> {
        self.write_named(INDEX_ARTIFACT, bytes)
    }

    pub fn read_redo_log(&self) -> EngineResult<Option<Vec<u8>>> {
        self.read_named(REDO_LOG_ARTIFACT)
    }

    pub fn write_redo_log(&self, bytes: &[u8]) -> EngineResult<()> {
        self.write_named(REDO_LOG_ARTIFACT, bytes)
    }

    pub fn read_dwb(&self) -> EngineResult<Option<Vec<u8>>> {
        self.read_named(DWB_ARTIFACT)
    }

    pub fn write_dwb(&self, bytes: &[u8]) -> EngineResult<()> {
        self.write_named(DWB_ARTIFACT, bytes)
    }

    /// All page ids currently present on disk.
    pub fn enumerate(&self) -> EngineResult<Vec<PageId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix("page_") {
                if let Ok(n) = rest.parse::<u64>() {
                    ids.push(PageId(n));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Durability barrier: on return, all prior writes survive process loss.
    pub fn flush(&self) -> EngineResult<()> {
        // fsync the directory entry so renames (and unlinks) are durable too.
        if let Ok(dir) = File::open(&self.root) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    fn read_named(&self, name: &str) -> EngineResult<Option<Vec<u8>>> {
        let path = self.root.join(name);
        match File::open(&path) {
            Ok(mut f) => {
                let mut buf = Vec::new();
                f.read_to_end(&mut buf)?;
                Ok(Some(buf))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes `bytes` to a sibling temp file and renames it over `name`, so
    /// a reader never observes a partially-written blob — the "atomic per
    /// blob" contract spec.md §4.1 requires of the Disk Store.
    fn write_named(&self, name: &str, bytes: &[u8]) -> EngineResult<()> {
        let final_path = self.root.join(name);
        let tmp_path = self.root.join(format!("{}.tmp", name));

        debug!("disk store: writing {} bytes to {:?}", bytes.len(), final_path);

        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            tmp.write_all(bytes)?;
            tmp.sync_all()?;
        }

        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}

fn page_file_name(page_id: PageId) -> String {
    format!("page_{}", page_id.0)
}

/// Overwrites a page's on-disk blob with garbage, bypassing the atomic
/// rename path. Test-only: used to simulate the torn in-place write a crash
/// mid-checkpoint can leave behind (spec.md §8, "DWB repairs torn page").
#[cfg(any(test, feature = "test-fault-injection"))]
pub fn inject_torn_write(root: &Path, page_id: PageId) -> std::io::Result<()> {
    let path = root.join(page_file_name(page_id));
    let mut f = OpenOptions::new().write(true).open(path)?;
    f.write_all(b"\xff\xff\xff\xff garbage torn write \xff\xff")?;
    f.sync_all()
}
