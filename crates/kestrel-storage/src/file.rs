//! Page file trait.

use kestrel_common::page::{FileId, PageBuf, PageNum};
use kestrel_common::Result;

/// A file of fixed-size pages.
///
/// This is the only interface the buffer manager uses to reach persistent
/// storage. Implementations include:
/// - `DiskFile`: one OS file per logical file
/// - `MemoryFile`: in-memory pages with I/O counters, for tests
///
/// Implementations must be thread-safe; the buffer manager may call them from
/// whichever thread holds its lock.
pub trait PageFile: Send + Sync {
    /// Identity of this file, used as part of the buffer manager's page key.
    fn file_id(&self) -> FileId;

    /// Reads a page into `buf`.
    ///
    /// # Errors
    ///
    /// Returns `KestrelError::InvalidPage` if the page is not allocated, or
    /// `KestrelError::Io` on an OS failure.
    fn read_page(&self, page_num: PageNum, buf: &mut PageBuf) -> Result<()>;

    /// Writes `data` to an allocated page.
    fn write_page(&self, page_num: PageNum, data: &PageBuf) -> Result<()>;

    /// Reserves a fresh, zero-filled page and returns its number.
    fn allocate_page(&self) -> Result<PageNum>;

    /// Releases a page. Its number may be handed out again by `allocate_page`.
    fn dispose_page(&self, page_num: PageNum) -> Result<()>;
}
