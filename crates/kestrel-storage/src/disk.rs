//! Disk-backed page files.

use crate::file::PageFile;
use kestrel_common::page::{FileId, PageBuf, PageId, PageNum, PAGE_SIZE};
use kestrel_common::{KestrelError, Result, StorageConfig};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

impl From<&StorageConfig> for DiskManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// A page file stored as a single OS file.
///
/// Page `n` lives at byte offset `n * PAGE_SIZE`. Disposed pages are kept on
/// an in-memory free list and reused, lowest number first.
pub struct DiskFile {
    file_id: FileId,
    path: PathBuf,
    fsync_enabled: bool,
    inner: Mutex<DiskFileInner>,
}

struct DiskFileInner {
    file: File,
    /// Number of pages the OS file spans.
    num_pages: u32,
    /// Disposed page numbers available for reuse.
    free_pages: BTreeSet<PageNum>,
}

impl DiskFile {
    /// Opens or creates a page file at `path`.
    pub fn open(path: impl AsRef<Path>, fsync_enabled: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        let file_id = FileId::allocate();
        debug!(%file_id, path = %path.display(), num_pages, "opened page file");

        Ok(Self {
            file_id,
            path,
            fsync_enabled,
            inner: Mutex::new(DiskFileInner {
                file,
                num_pages,
                free_pages: BTreeSet::new(),
            }),
        })
    }

    /// Returns the path of the underlying OS file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of pages the file spans, including disposed ones.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Flushes pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    fn check_allocated(&self, inner: &DiskFileInner, page_num: PageNum) -> Result<()> {
        if page_num >= inner.num_pages || inner.free_pages.contains(&page_num) {
            return Err(KestrelError::InvalidPage {
                page_id: PageId::new(self.file_id, page_num),
            });
        }
        Ok(())
    }

    fn write_at(&self, inner: &mut DiskFileInner, page_num: PageNum, data: &PageBuf) -> Result<()> {
        let offset = PageId::new(self.file_id, page_num).byte_offset();
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(data)?;

        if self.fsync_enabled {
            inner.file.sync_all()?;
        }
        Ok(())
    }
}

impl PageFile for DiskFile {
    fn file_id(&self) -> FileId {
        self.file_id
    }

    fn read_page(&self, page_num: PageNum, buf: &mut PageBuf) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_allocated(&inner, page_num)?;

        let offset = PageId::new(self.file_id, page_num).byte_offset();
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&self, page_num: PageNum, data: &PageBuf) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_allocated(&inner, page_num)?;
        self.write_at(&mut inner, page_num, data)
    }

    fn allocate_page(&self) -> Result<PageNum> {
        let mut inner = self.inner.lock();

        let (page_num, reused) = match inner.free_pages.first() {
            Some(&page_num) => (page_num, true),
            None => (inner.num_pages, false),
        };

        // Zero the page before handing it out, extending the file if needed.
        self.write_at(&mut inner, page_num, &[0u8; PAGE_SIZE])?;

        if reused {
            inner.free_pages.remove(&page_num);
        } else {
            inner.num_pages = page_num + 1;
        }
        Ok(page_num)
    }

    fn dispose_page(&self, page_num: PageNum) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_allocated(&inner, page_num)?;
        inner.free_pages.insert(page_num);
        Ok(())
    }
}

impl std::fmt::Debug for DiskFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskFile")
            .field("file_id", &self.file_id)
            .field("path", &self.path)
            .finish()
    }
}

/// Opens, closes and destroys named page files under a data directory.
///
/// Open files are shared as `Arc<DiskFile>`. Opening a name that is already
/// open returns the same handle, so the file keeps a single identity.
pub struct DiskManager {
    config: DiskManagerConfig,
    files: Mutex<HashMap<String, Arc<DiskFile>>>,
}

impl DiskManager {
    /// Creates a new disk manager, creating the data directory if needed.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn file_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(KestrelError::InvalidParameter {
                name: "file name".to_string(),
                value: name.to_string(),
            });
        }
        Ok(self.config.data_dir.join(format!("{}.dat", name)))
    }

    /// Opens or creates the named file.
    pub fn open_file(&self, name: &str) -> Result<Arc<DiskFile>> {
        let mut files = self.files.lock();

        if let Some(file) = files.get(name) {
            return Ok(Arc::clone(file));
        }

        let path = self.file_path(name)?;
        let file = Arc::new(DiskFile::open(path, self.config.fsync_enabled)?);
        files.insert(name.to_string(), Arc::clone(&file));
        Ok(file)
    }

    /// Closes the named file.
    ///
    /// Callers holding cached pages of this file should flush them from the
    /// buffer manager first; outstanding `Arc` handles stay usable.
    pub fn close_file(&self, name: &str) -> Result<()> {
        let mut files = self.files.lock();
        if let Some(file) = files.remove(name) {
            file.sync()?;
        }
        Ok(())
    }

    /// Deletes the named file from disk. Fails if it is open.
    pub fn destroy_file(&self, name: &str) -> Result<()> {
        if self.files.lock().contains_key(name) {
            return Err(KestrelError::FileOpen(name.to_string()));
        }
        let path = self.file_path(name)?;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Returns the names of open files, sorted.
    pub fn open_files(&self) -> Vec<String> {
        let mut names: Vec<_> = self.files.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut files = self.files.lock();
        for (_, file) in files.drain() {
            file.sync()?;
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}
