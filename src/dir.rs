//! In-memory cache of the current directory.
//!
//! The manager keeps the directory it is "in" as an ordered list of parsed
//! entries together with the media byte offset the list was loaded from.
//! Navigation replaces the whole list; lookups (selecting by index, matching
//! a handle, hunting for a reclaimable slot) run against the copy in RAM.

use crate::block_cache::SectorCache;
use crate::block_device::DeviceErr;
use crate::entry::DirEntry;
use crate::DIRENT_SIZE;

use alloc::vec;
use alloc::vec::Vec;

pub struct CurrentDirectory {
    entries: Vec<DirEntry>,
    /// Byte offset on media this list was loaded from.
    dir_offset: usize,
}

impl CurrentDirectory {
    /// Load `num_entries` consecutive 32-byte entries starting at `offset`.
    pub(crate) fn load(
        cache: &mut SectorCache,
        offset: usize,
        num_entries: usize,
    ) -> Result<Self, DeviceErr> {
        let mut buf = vec![0u8; num_entries * DIRENT_SIZE];
        cache.read(&mut buf, offset)?;
        let entries = buf.chunks(DIRENT_SIZE).map(DirEntry::from_bytes).collect();
        Ok(Self {
            entries,
            dir_offset: offset,
        })
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn offset(&self) -> usize {
        self.dir_offset
    }

    pub(crate) fn get(&self, index: usize) -> Option<&DirEntry> {
        self.entries.get(index)
    }

    /// Index of the entry whose 32 raw bytes equal `raw`. Handles are
    /// matched against the directory by byte equality, nothing fuzzier.
    pub(crate) fn position_of(&self, raw: &[u8; DIRENT_SIZE]) -> Option<usize> {
        self.entries.iter().position(|entry| entry.raw() == raw)
    }

    /// First slot a new entry may claim. Both never-used (0x00) and deleted
    /// (0xE5) slots are reclaimable; 0x00 is deliberately not treated as a
    /// scan terminator even though standard FAT semantics would allow it.
    pub(crate) fn first_reclaimable_slot(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.is_unused() || entry.is_deleted())
    }

    /// Media byte offset of the slot at `index`.
    pub(crate) fn entry_offset(&self, index: usize) -> usize {
        self.dir_offset + index * DIRENT_SIZE
    }

    pub(crate) fn replace(&mut self, index: usize, entry: DirEntry) {
        if index < self.entries.len() {
            self.entries[index] = entry;
        }
    }
}
