#![no_std]
pub mod block_cache;
pub mod block_device;
pub mod bpb;
pub mod dir;
pub mod entry;
pub mod fat;
pub mod file;
pub mod fs;
pub mod partition;

use crate::block_device::DeviceErr;

use core::convert::TryInto;

extern crate alloc;

/// FAT16 FAT entry sentinels. Any entry value at or above
/// [`END_OF_CHAIN_MIN`] terminates a cluster chain; [`END_OF_CHAIN`] is the
/// canonical mark written when a chain is created or extended.
pub const FREE_CLUSTER: u16 = 0x0000;
pub const RESERVED_CLUSTER: u16 = 0x0001;
pub const BAD_CLUSTER: u16 = 0xFFF7;
pub const END_OF_CHAIN_MIN: u16 = 0xFFF8;
pub const END_OF_CHAIN: u16 = 0xFFFF;

/// The first data cluster. Clusters 0 and 1 are reserved: FAT[0] carries the
/// media descriptor in its low byte and FAT[1] holds an end-of-chain mark.
pub const FIRST_DATA_CLUSTER: u16 = 2;

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;

pub const DIRENT_SIZE: usize = 32;

/// For a directory entry Name[0]:
/// - 0x00 means the entry has never been used
/// - 0xE5 means the entry was deleted
/// - 0x2E marks a dot entry (`.`, or `..` when Name[1] is also 0x2E)
/// - 0x05 is stored in place of a real leading 0xE5 (KANJI lead byte)
pub const DIR_ENTRY_FREE: u8 = 0x00;
pub const DIR_ENTRY_DELETED: u8 = 0xE5;
pub const DOT: u8 = 0x2E;
pub const KANJI_LEAD_BYTE: u8 = 0x05;
pub const SPACE: u8 = 0x20;

/// Granularity of the block cache. The BPB sector size is always a
/// power-of-two multiple of this, so every media sector is a whole number of
/// cached blocks.
pub const BLOCK_SIZE: usize = 512;
pub const BLOCK_CACHE_LIMIT: usize = 64;

/// MBR layout: four 16-byte partition entries at 0x1BE. Both the MBR and
/// every boot sector end in the 0xAA55 signature word.
pub const PARTITION_TABLE_OFFSET: usize = 0x1BE;
pub const PARTITION_ENTRY_SIZE: usize = 16;
pub const NUM_PARTITIONS: usize = 4;
pub const SECTOR_SIGNATURE: u16 = 0xAA55;

pub const BOOT_SECTOR_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Boot signature absent or BPB inconsistent.
    InvalidFileSystem,
    /// Entry (or partition) index past the end of the table.
    OutOfBounds,
    /// Entry is a directory, system, hidden, volume label, read only,
    /// already deleted or unused.
    NotDeletable,
    /// Handle does not match any current-directory entry.
    NotFound,
    /// Entry kind excludes reading.
    NotReadable,
    /// FAT has no free, non-reserved cluster.
    NoSpace,
    /// Non-flush write with a partial tail.
    NotSectorAligned,
    /// No unused or deleted slot in the target directory.
    DirectoryFull,
    /// Cluster chain revisits a cluster or runs past the FAT.
    CorruptChain,
    /// Write or finalize on a handle with no transfer in progress.
    NoActiveTransfer,
    Device(DeviceErr),
}

impl From<DeviceErr> for FsError {
    fn from(err: DeviceErr) -> Self {
        FsError::Device(err)
    }
}

pub(crate) fn read_le_u16(input: &[u8]) -> u16 {
    let (int_bytes, _) = input.split_at(core::mem::size_of::<u16>());
    u16::from_le_bytes(int_bytes.try_into().unwrap())
}

pub(crate) fn read_le_u32(input: &[u8]) -> u32 {
    let (int_bytes, _) = input.split_at(core::mem::size_of::<u32>());
    u32::from_le_bytes(int_bytes.try_into().unwrap())
}

pub(crate) fn write_le_u16(out: &mut [u8], value: u16) {
    out[..2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_le_u32(out: &mut [u8], value: u32) {
    out[..4].copy_from_slice(&value.to_le_bytes());
}
