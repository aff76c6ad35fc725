//! Sector-at-a-time file streaming.
//!
//! A [`DirEntry`] copy returned by `select_entry` doubles as a transfer
//! handle; the state machine driving it lives here.
//!
//! Reading: `read_entry` arms the handle, then each `next_file_sector` call
//! returns one sector and advances, following the cached FAT across cluster
//! boundaries. The stream ends when the chain ends (free, reserved, bad or
//! end-of-chain mark) or the declared file size is consumed; the last sector
//! handed out may overrun the file size by up to one sector and the caller
//! truncates.
//!
//! Writing runs reserve-then-commit:
//!
//! ```text
//! create_entry(h)  ->  write_to_entry(h, data)*  ->  flush_to_entry(h, tail)
//!                                                |   finalize_entry(h)
//! ```
//!
//! `create_entry` claims a free cluster and records the would-be FAT edits
//! only in the handle's pending list; claimed clusters also enter the
//! manager-wide reservation set so a second in-flight write cannot pick
//! them. Data sectors go to the media immediately, but the FAT and the
//! directory slot are untouched until `finalize_entry` commits them, so an
//! abandoned or failed write leaves the volume exactly as it was once its
//! reservations are released. Any transfer-starting call on a handle rolls
//! back whatever transfer that handle had in flight.

use crate::entry::{ClusterMod, DirEntry, StreamState, TransferMode};
use crate::fs::Fat16FileManager;
use crate::{
    FsError, BAD_CLUSTER, DIRENT_SIZE, END_OF_CHAIN, END_OF_CHAIN_MIN, FIRST_DATA_CLUSTER,
    FREE_CLUSTER, RESERVED_CLUSTER,
};

use crate::dir::CurrentDirectory;

use alloc::vec;
use alloc::vec::Vec;

impl Fat16FileManager {
    /// Begin a sector-at-a-time read of `entry`.
    ///
    /// The handle must byte-match an entry of the current directory
    /// ([`FsError::NotFound`]); subdirectories, dot entries, unused,
    /// deleted, hidden, system and volume-label entries are not readable.
    /// A prior transfer on the handle is rolled back.
    pub fn read_entry(&mut self, entry: &mut DirEntry) -> Result<(), FsError> {
        self.end_transfer(entry);

        if self.current_dir.position_of(entry.raw()).is_none() {
            return Err(FsError::NotFound);
        }
        if entry.is_unused()
            || entry.is_deleted()
            || entry.is_dot_entry()
            || entry.is_subdirectory()
            || entry.is_hidden()
            || entry.is_system_file()
            || entry.is_volume_label()
        {
            return Err(FsError::NotReadable);
        }
        // a zero-length entry has no chain to stream
        if entry.starting_cluster() < FIRST_DATA_CLUSTER {
            return Err(FsError::NotReadable);
        }

        entry.stream = StreamState {
            mode: TransferMode::Reading,
            current_sector: 0,
            current_cluster: entry.starting_cluster(),
            current_dir_offset: self.current_dir.offset(),
            current_file_offset: self.cluster_to_offset(entry.starting_cluster()),
            num_bytes_read: 0,
            clusters_to_modify: Vec::new(),
        };
        Ok(())
    }

    /// The next sector of the file being read through `entry`, or an empty
    /// buffer once the stream has ended.
    ///
    /// The sector at the current offset is returned before the chain
    /// advances, so the final sector may carry bytes past the declared file
    /// size; the caller truncates against `file_size_in_bytes()`.
    pub fn next_file_sector(&self, entry: &mut DirEntry) -> Result<Vec<u8>, FsError> {
        if entry.stream.mode != TransferMode::Reading {
            return Ok(Vec::new());
        }

        let sector_size = self.sector_size();
        let mut sector = vec![0u8; sector_size];
        self.cache
            .write()
            .read(&mut sector, entry.stream.current_file_offset)?;

        entry.stream.current_sector += 1;
        entry.stream.num_bytes_read += sector_size;

        if entry.stream.current_sector == self.sectors_per_cluster() {
            entry.stream.current_sector = 0;

            let next = self.fat.entry(entry.stream.current_cluster);
            entry.stream.current_cluster = next;
            if next == FREE_CLUSTER
                || next == RESERVED_CLUSTER
                || next == BAD_CLUSTER
                || next >= END_OF_CHAIN_MIN
                || next as usize >= self.fat.num_clusters()
            {
                entry.stream.mode = TransferMode::Idle;
            }
        }

        if entry.stream.num_bytes_read >= entry.file_size_in_bytes() as usize {
            entry.stream.mode = TransferMode::Idle;
        }

        if entry.stream.mode == TransferMode::Reading {
            entry.stream.current_file_offset = self.cluster_to_offset(entry.stream.current_cluster)
                + entry.stream.current_sector * sector_size;
        }

        Ok(sector)
    }

    /// Begin writing a new file through `entry`.
    ///
    /// Claims the first cluster that is free in the FAT and not reserved by
    /// another in-flight write, records the end-of-chain mark for it in the
    /// handle's pending list and zeroes the handle's file size. Nothing is
    /// committed to the media until [`finalize_entry`](Self::finalize_entry).
    pub fn create_entry(&mut self, entry: &mut DirEntry) -> Result<(), FsError> {
        self.end_transfer(entry);

        let cluster = self
            .fat
            .find_free(FIRST_DATA_CLUSTER, &self.pending_reservations)
            .ok_or(FsError::NoSpace)?;

        entry.set_starting_cluster(cluster);
        entry.set_file_size_in_bytes(0);
        self.pending_reservations.push(cluster);
        entry.stream = StreamState {
            mode: TransferMode::Writing,
            current_sector: 0,
            current_cluster: cluster,
            current_dir_offset: self.current_dir.offset(),
            current_file_offset: self.cluster_to_offset(cluster),
            num_bytes_read: 0,
            clusters_to_modify: vec![ClusterMod {
                cluster,
                new_value: END_OF_CHAIN,
            }],
        };
        Ok(())
    }

    /// Append `data` to the file being written through `entry`.
    ///
    /// `data` must be a whole number of sectors; a partial tail belongs in
    /// [`flush_to_entry`](Self::flush_to_entry). Needs a write in progress.
    pub fn write_to_entry(&mut self, entry: &mut DirEntry, data: &[u8]) -> Result<(), FsError> {
        if entry.stream.mode != TransferMode::Writing {
            return Err(FsError::NoActiveTransfer);
        }
        if data.len() % self.sector_size() != 0 {
            return Err(FsError::NotSectorAligned);
        }
        self.write_chunks(entry, data)
    }

    /// [`write_to_entry`](Self::write_to_entry) with partial-tail
    /// tolerance, immediately followed by
    /// [`finalize_entry`](Self::finalize_entry).
    pub fn flush_to_entry(&mut self, entry: &mut DirEntry, tail: &[u8]) -> Result<(), FsError> {
        if entry.stream.mode != TransferMode::Writing {
            return Err(FsError::NoActiveTransfer);
        }
        self.write_chunks(entry, tail)?;
        self.finalize_entry(entry)
    }

    fn write_chunks(&mut self, entry: &mut DirEntry, data: &[u8]) -> Result<(), FsError> {
        let sector_size = self.sector_size();
        let sectors_per_cluster = self.sectors_per_cluster();

        for chunk in data.chunks(sector_size) {
            // owned sector scratch; a partial tail is zero padded so the
            // device still sees a whole sector
            let mut scratch = vec![0u8; sector_size];
            scratch[..chunk.len()].copy_from_slice(chunk);

            let write = self
                .cache
                .get_mut()
                .write(&scratch, entry.stream.current_file_offset);
            if let Err(err) = write {
                self.end_transfer(entry);
                return Err(err.into());
            }

            entry.stream.current_sector += 1;
            if entry.stream.current_sector == sectors_per_cluster {
                // the cluster is full; eagerly reserve its successor,
                // scanning strictly above the last reserved cluster
                let last_reserved = match entry.stream.clusters_to_modify.last() {
                    Some(modification) => modification.cluster,
                    None => {
                        self.end_transfer(entry);
                        return Err(FsError::NoActiveTransfer);
                    }
                };
                let next = match self
                    .fat
                    .find_free(last_reserved + 1, &self.pending_reservations)
                {
                    Some(cluster) => cluster,
                    None => {
                        self.end_transfer(entry);
                        return Err(FsError::NoSpace);
                    }
                };

                if let Some(previous) = entry.stream.clusters_to_modify.last_mut() {
                    previous.new_value = next;
                }
                entry.stream.clusters_to_modify.push(ClusterMod {
                    cluster: next,
                    new_value: END_OF_CHAIN,
                });
                self.pending_reservations.push(next);
                entry.stream.current_cluster = next;
                entry.stream.current_sector = 0;
            }

            entry.stream.current_file_offset = self
                .cluster_to_offset(entry.stream.current_cluster)
                + entry.stream.current_sector * sector_size;
            entry.set_file_size_in_bytes(entry.file_size_in_bytes() + chunk.len() as u32);
        }
        Ok(())
    }

    /// Commit the file being written through `entry`: claim a directory
    /// slot, write the handle's 32 bytes into it, apply the pending chain
    /// to the FAT cache and flush the touched FAT sectors to both copies.
    ///
    /// The target directory is the one the handle was created in; when the
    /// manager has navigated elsewhere since, one sector of that directory
    /// is re-read from media. With no unused or deleted slot the write
    /// rolls back with [`FsError::DirectoryFull`].
    pub fn finalize_entry(&mut self, entry: &mut DirEntry) -> Result<(), FsError> {
        if entry.stream.mode != TransferMode::Writing {
            return Err(FsError::NoActiveTransfer);
        }

        let fat_offset = self.fat_offset();
        let dir_offset = entry.stream.current_dir_offset;
        let targets_current_dir = dir_offset == self.current_dir.offset();
        let slot = if targets_current_dir {
            self.current_dir.first_reclaimable_slot()
        } else {
            let entries_per_sector = self.sector_size() / DIRENT_SIZE;
            CurrentDirectory::load(self.cache.get_mut(), dir_offset, entries_per_sector)?
                .first_reclaimable_slot()
        };
        let slot = match slot {
            Some(slot) => slot,
            None => {
                self.end_transfer(entry);
                return Err(FsError::DirectoryFull);
            }
        };

        let slot_offset = dir_offset + slot * DIRENT_SIZE;
        let cache = self.cache.get_mut();
        cache.write(&entry.raw()[..], slot_offset)?;

        for modification in &entry.stream.clusters_to_modify {
            self.fat
                .set_entry(modification.cluster, modification.new_value);
        }
        self.fat.flush(cache, fat_offset)?;

        // committed: release this handle's reservations
        for modification in entry.stream.clusters_to_modify.drain(..) {
            self.pending_reservations
                .retain(|&cluster| cluster != modification.cluster);
        }
        entry.stream = StreamState::default();

        if targets_current_dir {
            self.current_dir.replace(slot, DirEntry::from_bytes(entry.raw()));
        }
        Ok(())
    }

    /// Terminate whatever transfer `entry` has in flight. For a write this
    /// is a rollback: the handle's reservations are released and its
    /// pending FAT edits dropped; nothing was committed. Invoked implicitly
    /// by every transfer-starting call.
    pub fn end_transfer(&mut self, entry: &mut DirEntry) {
        if entry.stream.mode == TransferMode::Writing {
            for modification in entry.stream.clusters_to_modify.drain(..) {
                self.pending_reservations
                    .retain(|&cluster| cluster != modification.cluster);
            }
        }
        entry.stream = StreamState::default();
    }
}
