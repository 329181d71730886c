use alloc::{sync::Arc, vec::Vec};
use core::fmt::Debug;
use novavm_shared::mem::{page_align, pages_spanned, PAGE_FRAME_SIZE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    NotLoaded,
    Loaded,
}

/// The file a segment's initial contents come from, usually an executable.
pub trait BackingFile: Send + Sync + Debug {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads from `offset` into `buf`, returning how many bytes were read.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize;
}

impl BackingFile for Vec<u8> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let Some(available) = self.get(offset..) else {
            return 0;
        };
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        n
    }
}

/// A contiguous region of a user address space.
#[derive(Debug)]
pub struct Segment {
    vaddr: usize,
    memsize: usize,
    npages: usize,
    filesize: usize,
    offset: usize,
    // Where the file data starts, relative to `vaddr`.
    file_start: usize,
    load_state: LoadState,
    permission: Permission,
    file: Option<Arc<dyn BackingFile>>,
}

impl Segment {
    /// A zero-filled segment covering `[vaddr, vaddr + memsize)`. The base is
    /// rounded down to a page boundary.
    pub fn new(vaddr: usize, memsize: usize, permission: Permission) -> Self {
        let base = page_align(vaddr);
        let memsize = memsize + (vaddr - base);
        Self {
            vaddr: base,
            memsize,
            npages: pages_spanned(memsize),
            filesize: 0,
            offset: 0,
            file_start: vaddr - base,
            load_state: LoadState::NotLoaded,
            permission,
            file: None,
        }
    }

    /// A segment whose first `filesize` bytes, starting at `vaddr`, come from
    /// `file` at `offset`. The rest reads as zeroes.
    pub fn with_file(
        vaddr: usize,
        memsize: usize,
        permission: Permission,
        file: Arc<dyn BackingFile>,
        offset: usize,
        filesize: usize,
    ) -> Self {
        assert!(filesize <= memsize, "segment file size exceeds memory size");
        Self {
            filesize,
            offset,
            file: Some(file),
            ..Self::new(vaddr, memsize, permission)
        }
    }

    /// A copy for a forked address space. The file is shared, and the copy
    /// starts out not loaded.
    pub fn copy(&self) -> Self {
        Self {
            vaddr: self.vaddr,
            memsize: self.memsize,
            npages: self.npages,
            filesize: self.filesize,
            offset: self.offset,
            file_start: self.file_start,
            load_state: LoadState::NotLoaded,
            permission: self.permission,
            file: self.file.clone(),
        }
    }

    pub fn vaddr(&self) -> usize {
        self.vaddr
    }

    pub fn memsize(&self) -> usize {
        self.memsize
    }

    pub fn npages(&self) -> usize {
        self.npages
    }

    pub fn filesize(&self) -> usize {
        self.filesize
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    pub fn file(&self) -> Option<&Arc<dyn BackingFile>> {
        self.file.as_ref()
    }

    /// First address past the last page.
    pub fn end(&self) -> usize {
        self.vaddr + self.npages * PAGE_FRAME_SIZE
    }

    pub fn contains(&self, vaddr: usize) -> bool {
        (self.vaddr..self.end()).contains(&vaddr)
    }

    pub fn is_writeable(&self) -> bool {
        self.permission == Permission::ReadWrite
    }

    pub fn is_page_aligned(&self) -> bool {
        page_align(self.vaddr) == self.vaddr
    }

    pub fn mark_loaded(&mut self) {
        self.load_state = LoadState::Loaded;
    }

    /// Fills `buf` with the file contents of the page starting at `page`.
    ///
    /// Returns `false` if no file data falls in that page, in which case `buf`
    /// is left alone. Bytes past the end of the file data are zeroed.
    pub fn load_page(&self, page: usize, buf: &mut [u8]) -> bool {
        assert_eq!(buf.len(), PAGE_FRAME_SIZE);
        let Some(file) = &self.file else {
            return false;
        };
        if !self.contains(page) {
            return false;
        }

        let page_start = page_align(page) - self.vaddr;
        let page_end = page_start + PAGE_FRAME_SIZE;
        let data_start = self.file_start.max(page_start);
        let data_end = (self.file_start + self.filesize).min(page_end);
        if data_start >= data_end {
            return false;
        }

        buf.fill(0);
        let dst = &mut buf[data_start - page_start..data_end - page_start];
        file.read_at(self.offset + (data_start - self.file_start), dst);
        true
    }
}
