//! File allocation table cache.
//!
//! The whole FAT is pulled into one contiguous RAM buffer at mount; every
//! chain lookup and mutation afterwards targets that buffer. Given any
//! cluster number N, its entry sits at byte offset `N * 2` in the buffer
//! (FAT16 entries never span a sector boundary because the sector size is
//! divisible by 2), as 16-bit little endian:
//!
//! - 0x0000 free
//! - 0x0001 reserved
//! - 0xFFF7 bad
//! - 0xFFF8..=0xFFFF end of chain (0xFFFF written canonically)
//! - anything else: the successor cluster
//!
//! Mutations record which FAT sector they touched; a commit writes exactly
//! those sectors back, each to the primary FAT and to the redundant second
//! copy right behind it. The FAT region holds two identical tables in case
//! the first is damaged; the copies stay byte identical after every commit.

use crate::block_cache::SectorCache;
use crate::block_device::DeviceErr;
use crate::{
    read_le_u16, write_le_u16, FsError, BAD_CLUSTER, END_OF_CHAIN, END_OF_CHAIN_MIN,
    FIRST_DATA_CLUSTER, FREE_CLUSTER, RESERVED_CLUSTER,
};

use alloc::vec;
use alloc::vec::Vec;

pub struct FatCache {
    buf: Vec<u8>,
    sector_size: usize,
    /// FAT-relative indices of sectors touched since the last flush.
    dirty_sectors: Vec<usize>,
}

impl FatCache {
    /// Read all `num_sectors` FAT sectors at `fat_offset` into RAM.
    pub fn load(
        cache: &mut SectorCache,
        fat_offset: usize,
        num_sectors: usize,
        sector_size: usize,
    ) -> Result<Self, DeviceErr> {
        let mut buf = vec![0u8; num_sectors * sector_size];
        cache.read(&mut buf, fat_offset)?;
        Ok(Self {
            buf,
            sector_size,
            dirty_sectors: Vec::new(),
        })
    }

    /// Number of entries the FAT can address, reserved ones included.
    pub fn num_clusters(&self) -> usize {
        self.buf.len() / 2
    }

    /// The successor entry for `cluster`. Out-of-range reads answer
    /// end-of-chain so a corrupt pointer terminates a walk instead of
    /// running off the buffer.
    pub fn entry(&self, cluster: u16) -> u16 {
        let offset = cluster as usize * 2;
        if offset + 2 > self.buf.len() {
            return END_OF_CHAIN;
        }
        read_le_u16(&self.buf[offset..])
    }

    /// Set the entry for `cluster` and remember the FAT sector it lives in.
    pub fn set_entry(&mut self, cluster: u16, value: u16) {
        let offset = cluster as usize * 2;
        if offset + 2 > self.buf.len() {
            return;
        }
        write_le_u16(&mut self.buf[offset..], value);
        let sector = offset / self.sector_size;
        if !self.dirty_sectors.contains(&sector) {
            self.dirty_sectors.push(sector);
        }
    }

    /// First cluster at or above `from` that is free in the FAT and not in
    /// `reserved` (clusters claimed by in-progress writes but not yet
    /// committed). The scan stops two entries short of the FAT's end.
    pub fn find_free(&self, from: u16, reserved: &[u16]) -> Option<u16> {
        let limit = self.num_clusters().saturating_sub(2) as u16;
        let start = from.max(FIRST_DATA_CLUSTER);
        (start..limit).find(|&c| self.entry(c) == FREE_CLUSTER && !reserved.contains(&c))
    }

    /// Free the chain starting at `start`, writing [`FREE_CLUSTER`] into
    /// each slot. The successor is read and the current slot freed in the
    /// same step, so freeing is monotonic even over malformed chains; the
    /// walk stops at end-of-chain, bad and reserved marks. A free successor
    /// means the chain revisited a cluster zeroed earlier in this walk (or
    /// pointed at free space to begin with) and reports [`FsError::CorruptChain`],
    /// as does running more steps than the FAT has entries.
    pub fn free_chain(&mut self, start: u16) -> Result<(), FsError> {
        if start < FIRST_DATA_CLUSTER {
            return Ok(());
        }
        if start as usize >= self.num_clusters() {
            return Err(FsError::CorruptChain);
        }

        let mut cluster = start;
        let mut steps = 0;
        loop {
            steps += 1;
            if steps > self.num_clusters() {
                return Err(FsError::CorruptChain);
            }

            let next = self.entry(cluster);
            self.set_entry(cluster, FREE_CLUSTER);

            if next >= END_OF_CHAIN_MIN || next == BAD_CLUSTER || next == RESERVED_CLUSTER {
                return Ok(());
            }
            if next == FREE_CLUSTER || next as usize >= self.num_clusters() {
                return Err(FsError::CorruptChain);
            }
            cluster = next;
        }
    }

    /// Write every dirty FAT sector back, first to the primary copy at
    /// `fat_offset`, then to the mirror right behind it. Dirty marks are
    /// only dropped once both copies took the sector, so a failed commit
    /// retries in full.
    pub fn flush(&mut self, cache: &mut SectorCache, fat_offset: usize) -> Result<(), DeviceErr> {
        let mirror_offset = fat_offset + self.buf.len();
        for &sector in &self.dirty_sectors {
            let start = sector * self.sector_size;
            let data = &self.buf[start..start + self.sector_size];
            cache.write(data, fat_offset + start)?;
            cache.write(data, mirror_offset + start)?;
        }
        self.dirty_sectors.clear();
        Ok(())
    }

    /// FAT sectors awaiting write-back.
    pub fn dirty_sectors(&self) -> &[usize] {
        &self.dirty_sectors
    }
}
