//! The FAT16 file manager.
//!
//! [`Fat16FileManager`] is the tool for navigating a FAT16 file system and
//! retrieving and writing data. Construction discovers the volume: if the
//! media carries an MBR, the four partition entries are parsed and the first
//! serviceable one (not empty, not an extended container) becomes active;
//! otherwise sector 0 itself is the boot sector. The BPB then fixes the
//! volume geometry:
//!
//! ```text
//! fat_offset      = (partition_lba + reserved_sectors) * sector_size
//! root_dir_offset = fat_offset + num_fats * sectors_per_fat * sector_size
//! data_offset     = root_dir_offset + root_entry_count * 32
//! offset(N)       = data_offset + (N - 2) * sectors_per_cluster * sector_size
//! ```
//!
//! The manager exclusively owns the FAT cache, the pending-reservation set,
//! the current-directory list and the active boot sector. Directory entries
//! are handed out by value; callers drive reads and writes through those
//! copies (see the `file` module).
//!
//! The model is single threaded and cooperative: no call suspends, every
//! call runs to completion against the media. Two interleaved write
//! sequences on one manager stay safe only because the reservation set
//! keeps them from claiming the same free cluster.

use crate::block_cache::SectorCache;
use crate::block_device::BlockDevice;
use crate::bpb::BootSector;
use crate::dir::CurrentDirectory;
use crate::entry::DirEntry;
use crate::fat::FatCache;
use crate::partition::PartitionEntry;
use crate::{
    FsError, BOOT_SECTOR_SIZE, DIRENT_SIZE, FIRST_DATA_CLUSTER, NUM_PARTITIONS,
    PARTITION_ENTRY_SIZE, PARTITION_TABLE_OFFSET,
};

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::RwLock;

pub struct Fat16FileManager {
    pub(crate) cache: RwLock<SectorCache>,
    partitions: Vec<PartitionEntry>,
    active_partition: Option<usize>,
    boot_sector: BootSector,
    fat_offset: usize,
    root_dir_offset: usize,
    data_offset: usize,
    pub(crate) fat: FatCache,
    /// Clusters claimed by in-progress writes but not yet committed.
    pub(crate) pending_reservations: Vec<u16>,
    pub(crate) current_dir: CurrentDirectory,
}

/// Geometry constants and freshly-loaded caches for one partition.
struct Volume {
    boot_sector: BootSector,
    fat_offset: usize,
    root_dir_offset: usize,
    data_offset: usize,
    fat: FatCache,
    root_dir: CurrentDirectory,
}

impl Volume {
    /// Read and validate the boot sector at `partition_lba` (in 512-byte
    /// LBA units), derive the region offsets and load the FAT and root
    /// directory.
    fn open(cache: &mut SectorCache, partition_lba: u32) -> Result<Self, FsError> {
        let mut buf = [0u8; BOOT_SECTOR_SIZE];
        cache.read(&mut buf, partition_lba as usize * 512)?;
        let boot_sector = BootSector::parse(&buf)?;

        let sector_size = boot_sector.sector_size_in_bytes() as usize;
        let fat_offset =
            (partition_lba as usize + boot_sector.num_reserved_sectors() as usize) * sector_size;
        let root_dir_offset = fat_offset
            + boot_sector.num_fats() as usize
                * boot_sector.num_sectors_per_fat() as usize
                * sector_size;
        let data_offset =
            root_dir_offset + boot_sector.num_dir_entries_in_root() as usize * DIRENT_SIZE;

        let fat = FatCache::load(
            cache,
            fat_offset,
            boot_sector.num_sectors_per_fat() as usize,
            sector_size,
        )?;
        let root_dir = CurrentDirectory::load(
            cache,
            root_dir_offset,
            boot_sector.num_dir_entries_in_root() as usize,
        )?;

        Ok(Self {
            boot_sector,
            fat_offset,
            root_dir_offset,
            data_offset,
            fat,
            root_dir,
        })
    }
}

impl Fat16FileManager {
    /// Mount the file system on `device`.
    ///
    /// Reads the partition table when the media reports one, selects the
    /// active partition, validates its boot sector, loads the FAT into RAM
    /// and the root directory into the current-directory list.
    pub fn mount(device: Arc<dyn BlockDevice>) -> Result<Self, FsError> {
        let mut cache = SectorCache::new(Arc::clone(&device));

        let (partitions, active_partition, partition_lba) = if device.has_mbr() {
            let mut table = [0u8; PARTITION_ENTRY_SIZE * NUM_PARTITIONS];
            cache.read(&mut table, PARTITION_TABLE_OFFSET)?;
            let partitions: Vec<PartitionEntry> = table
                .chunks(PARTITION_ENTRY_SIZE)
                .map(PartitionEntry::parse)
                .collect();

            let active = partitions
                .iter()
                .position(|p| p.partition_type().is_mountable())
                .ok_or(FsError::InvalidFileSystem)?;
            let lba = partitions[active].offset_lba();
            (partitions, Some(active), lba)
        } else {
            // no partition table, sector 0 is the boot sector
            (Vec::new(), None, 0)
        };

        let volume = Volume::open(&mut cache, partition_lba)?;

        Ok(Self {
            cache: RwLock::new(cache),
            partitions,
            active_partition,
            boot_sector: volume.boot_sector,
            fat_offset: volume.fat_offset,
            root_dir_offset: volume.root_dir_offset,
            data_offset: volume.data_offset,
            fat: volume.fat,
            pending_reservations: Vec::new(),
            current_dir: volume.root_dir,
        })
    }

    /// Place the cursor on the `n`-th entry of the current directory and
    /// return a copy of it.
    ///
    /// Selecting the root self-reference reloads the root directory;
    /// selecting a subdirectory loads one sector's worth of its entries
    /// (subdirectories spanning multiple sectors are a known limitation).
    /// Selecting a regular file changes nothing: the returned copy is the
    /// caller's handle for [`read_entry`](Self::read_entry) and friends.
    pub fn select_entry(&mut self, n: usize) -> Result<DirEntry, FsError> {
        let entry = self.current_dir.get(n).ok_or(FsError::OutOfBounds)?.clone();

        if entry.is_root_directory() {
            self.current_dir = CurrentDirectory::load(
                self.cache.get_mut(),
                self.root_dir_offset,
                self.boot_sector.num_dir_entries_in_root() as usize,
            )?;
        } else if entry.is_dot_entry() || entry.is_subdirectory() {
            if entry.starting_cluster() < FIRST_DATA_CLUSTER {
                return Err(FsError::InvalidFileSystem);
            }
            let offset = self.cluster_to_offset(entry.starting_cluster());
            let entries_per_sector = self.sector_size() / DIRENT_SIZE;
            self.current_dir =
                CurrentDirectory::load(self.cache.get_mut(), offset, entries_per_sector)?;
        }

        Ok(entry)
    }

    /// Switch the active partition to entry `n` of the table, using the
    /// same selection rules as mounting, then reload geometry, FAT and the
    /// root directory. Reservations of in-flight writes die with the old
    /// partition.
    pub fn change_partition(&mut self, n: usize) -> Result<(), FsError> {
        let partition = *self.partitions.get(n).ok_or(FsError::OutOfBounds)?;
        if !partition.partition_type().is_mountable() {
            return Err(FsError::InvalidFileSystem);
        }

        let volume = Volume::open(self.cache.get_mut(), partition.offset_lba())?;

        self.active_partition = Some(n);
        self.boot_sector = volume.boot_sector;
        self.fat_offset = volume.fat_offset;
        self.root_dir_offset = volume.root_dir_offset;
        self.data_offset = volume.data_offset;
        self.fat = volume.fat;
        self.current_dir = volume.root_dir;
        self.pending_reservations.clear();
        Ok(())
    }

    /// Delete the `n`-th entry of the current directory: mark its slot
    /// 0xE5, free its cluster chain in the FAT, write the slot back and
    /// commit the touched FAT sectors to both copies.
    ///
    /// Directories, dot entries, read-only, hidden, system and volume-label
    /// entries are refused, as are slots that hold no file. A malformed
    /// chain surfaces [`FsError::CorruptChain`] after the deletion mark and
    /// the freed prefix have been made durable.
    pub fn delete_entry(&mut self, n: usize) -> Result<(), FsError> {
        let entry = self.current_dir.get(n).ok_or(FsError::OutOfBounds)?;
        if entry.is_dot_entry()
            || entry.is_subdirectory()
            || entry.is_deleted()
            || entry.is_unused()
            || entry.is_read_only()
            || entry.is_hidden()
            || entry.is_system_file()
            || entry.is_volume_label()
        {
            return Err(FsError::NotDeletable);
        }

        let mut entry = entry.clone();
        entry.set_deleted();
        let walk = self.fat.free_chain(entry.starting_cluster());

        let slot_offset = self.current_dir.entry_offset(n);
        let cache = self.cache.get_mut();
        cache.write(&entry.raw()[..], slot_offset)?;
        self.fat.flush(cache, self.fat_offset)?;
        self.current_dir.replace(n, entry);

        walk
    }

    /// Entries of the current directory, in slot order.
    pub fn entries(&self) -> &[DirEntry] {
        self.current_dir.entries()
    }

    /// Media byte offset the current directory was loaded from.
    pub fn current_dir_offset(&self) -> usize {
        self.current_dir.offset()
    }

    pub fn boot_sector(&self) -> &BootSector {
        &self.boot_sector
    }

    pub fn partitions(&self) -> &[PartitionEntry] {
        &self.partitions
    }

    /// Index of the active partition; `None` on unpartitioned media.
    pub fn active_partition(&self) -> Option<usize> {
        self.active_partition
    }

    #[inline(always)]
    pub fn sector_size(&self) -> usize {
        self.boot_sector.sector_size_in_bytes() as usize
    }

    #[inline(always)]
    pub fn sectors_per_cluster(&self) -> usize {
        self.boot_sector.num_sectors_per_cluster() as usize
    }

    #[inline(always)]
    pub fn cluster_size(&self) -> usize {
        self.boot_sector.cluster_size_in_bytes()
    }

    pub fn fat_offset(&self) -> usize {
        self.fat_offset
    }

    pub fn root_dir_offset(&self) -> usize {
        self.root_dir_offset
    }

    pub fn data_offset(&self) -> usize {
        self.data_offset
    }

    /// Media byte offset of the first sector of cluster `cluster`. Only
    /// defined for data clusters (`cluster >= 2`); callers guard.
    #[inline(always)]
    pub fn cluster_to_offset(&self, cluster: u16) -> usize {
        self.data_offset + (cluster as usize - 2) * self.cluster_size()
    }

    pub fn num_clusters_in_fat(&self) -> usize {
        self.fat.num_clusters()
    }

    /// Read the cached FAT entry for `cluster`.
    pub fn fat_entry(&self, cluster: u16) -> u16 {
        self.fat.entry(cluster)
    }

    /// Clusters currently claimed by in-progress writes.
    pub fn pending_reservations(&self) -> &[u16] {
        &self.pending_reservations
    }
}
