//! End-to-end read, write, delete and reservation scenarios.

mod common;

use common::*;
use fat16::entry::DirEntry;
use fat16::fs::Fat16FileManager;
use fat16::FsError;

#[test]
fn read_streams_sector_by_sector_across_the_chain() {
    // SONG01.WAV: 3000 bytes over chain 10 -> 11, cluster 10 sectors
    // marked 0xA0.., cluster 11 sectors marked 0xB0..
    let mut manager = Fat16FileManager::mount(disk(standard_image(), true)).unwrap();
    let mut handle = manager.select_entry(SLOT_SONG).unwrap();
    manager.read_entry(&mut handle).unwrap();

    // four sectors out of cluster 10, then the FAT leads to cluster 11;
    // the declared size (6 * 512 = 3072 >= 3000) ends the stream there
    let expected = [0xA0, 0xA1, 0xA2, 0xA3, 0xB0, 0xB1];
    for &marker in &expected {
        let sector = manager.next_file_sector(&mut handle).unwrap();
        assert_eq!(sector.len(), SECTOR_SIZE);
        assert!(sector.iter().all(|&byte| byte == marker));
    }

    // the stream is over; further calls hand back empty payloads
    assert!(manager.next_file_sector(&mut handle).unwrap().is_empty());
    assert!(manager.next_file_sector(&mut handle).unwrap().is_empty());

    // the caller truncates the final sector: 3000 - 5 * 512 = 440 bytes
    assert_eq!(
        handle.file_size_in_bytes() as usize - 5 * SECTOR_SIZE,
        440
    );
}

#[test]
fn short_file_ends_after_one_sector() {
    let mut manager = Fat16FileManager::mount(disk(standard_image(), true)).unwrap();
    let mut handle = manager.select_entry(SLOT_LOCKED).unwrap();
    // read-only files are readable, just not deletable
    manager.read_entry(&mut handle).unwrap();

    let sector = manager.next_file_sector(&mut handle).unwrap();
    assert!(sector.iter().all(|&byte| byte == 0xC8));
    assert!(manager.next_file_sector(&mut handle).unwrap().is_empty());
}

#[test]
fn read_rejections() {
    let mut manager = Fat16FileManager::mount(disk(standard_image(), true)).unwrap();

    // a handle that matches no current-directory entry
    let mut stranger = DirEntry::new("NOPE", "BIN");
    assert_eq!(
        manager.read_entry(&mut stranger).err(),
        Some(FsError::NotFound)
    );

    let mut label = manager.select_entry(SLOT_VOLUME_LABEL).unwrap();
    assert_eq!(
        manager.read_entry(&mut label).err(),
        Some(FsError::NotReadable)
    );

    let mut hidden = manager.select_entry(SLOT_HIDDEN).unwrap();
    assert_eq!(
        manager.read_entry(&mut hidden).err(),
        Some(FsError::NotReadable)
    );

    let mut subdir = manager.select_entry(SLOT_SUBDIR).unwrap();
    // selecting the subdirectory navigated into it; go back first
    manager.select_entry(1).unwrap();
    assert_eq!(
        manager.read_entry(&mut subdir).err(),
        Some(FsError::NotReadable)
    );
}

#[test]
fn create_write_flush_commits_two_clusters() {
    // create -> write(cluster size) -> flush(100)
    let device = disk(standard_image(), true);
    let mut manager = Fat16FileManager::mount(device.clone()).unwrap();

    let mut handle = DirEntry::new("NEW", "BIN");
    manager.create_entry(&mut handle).unwrap();
    assert_eq!(handle.starting_cluster(), 2);
    assert_eq!(manager.pending_reservations(), &[2]);

    manager
        .write_to_entry(&mut handle, &vec![0xCC; CLUSTER_SIZE])
        .unwrap();
    // filling the cluster eagerly reserved its successor
    assert_eq!(manager.pending_reservations(), &[2, 3]);

    manager.flush_to_entry(&mut handle, &[0xDD; 100]).unwrap();

    // chain committed: first cluster points at the second, second is EOC
    assert_eq!(manager.fat_entry(2), 3);
    assert_eq!(manager.fat_entry(3), 0xFFFF);
    assert_eq!(handle.file_size_in_bytes() as usize, CLUSTER_SIZE + 100);
    assert!(manager.pending_reservations().is_empty());

    // the directory slot after the seeded ones now holds the file
    let committed = &manager.entries()[NUM_SEEDED_SLOTS];
    assert_eq!(committed.display_name(), "NEW.BIN");
    assert_eq!(committed.file_size_in_bytes() as usize, CLUSTER_SIZE + 100);

    // data went to media sector by sector, tail zero padded
    let first = device.snapshot(cluster_offset(PART_LBA, 2), CLUSTER_SIZE);
    assert!(first.iter().all(|&byte| byte == 0xCC));
    let tail = device.snapshot(cluster_offset(PART_LBA, 3), SECTOR_SIZE);
    assert!(tail[..100].iter().all(|&byte| byte == 0xDD));
    assert!(tail[100..].iter().all(|&byte| byte == 0));

    // both FAT copies took the commit and stayed byte identical
    let (primary, mirror) = fat_copies(&device, PART_LBA);
    assert_eq!(primary, mirror);
    assert_eq!(
        fat_entry_on_media(&device, fat_offset(PART_LBA), 2),
        3
    );
    assert_eq!(
        fat_entry_on_media(&device, mirror_fat_offset(PART_LBA), 3),
        0xFFFF
    );

    // a fresh mount of the same media sees the committed file
    let remounted = Fat16FileManager::mount(device).unwrap();
    assert_eq!(
        remounted.entries()[NUM_SEEDED_SLOTS].display_name(),
        "NEW.BIN"
    );
}

#[test]
fn unaligned_write_needs_flush() {
    let mut manager = Fat16FileManager::mount(disk(standard_image(), true)).unwrap();

    let mut handle = DirEntry::new("PART", "IAL");
    manager.create_entry(&mut handle).unwrap();

    // 700 bytes is not a whole number of sectors
    assert_eq!(
        manager.write_to_entry(&mut handle, &[0x77; 700]).err(),
        Some(FsError::NotSectorAligned)
    );

    // the transfer survives the refusal; the same buffer goes through flush
    manager.flush_to_entry(&mut handle, &[0x77; 700]).unwrap();
    assert_eq!(handle.file_size_in_bytes(), 700);
    assert_eq!(manager.fat_entry(handle.starting_cluster()), 0xFFFF);
    assert_eq!(
        manager.entries()[NUM_SEEDED_SLOTS].file_size_in_bytes(),
        700
    );
}

#[test]
fn pending_reservations_keep_writers_apart() {
    let mut manager = Fat16FileManager::mount(disk(standard_image(), true)).unwrap();

    let mut first = DirEntry::new("FIRST", "BIN");
    manager.create_entry(&mut first).unwrap();
    assert_eq!(first.starting_cluster(), 2);

    // cluster 2 is still free in the FAT, but reserved; the second
    // handle must skip to cluster 3
    let mut second = DirEntry::new("SECOND", "BIN");
    manager.create_entry(&mut second).unwrap();
    assert_eq!(second.starting_cluster(), 3);
    assert_eq!(manager.pending_reservations(), &[2, 3]);

    // committing the first handle releases only its own reservation
    manager.flush_to_entry(&mut first, &[0x11; 64]).unwrap();
    assert_eq!(manager.pending_reservations(), &[3]);
    assert_eq!(manager.fat_entry(2), 0xFFFF);

    // a third writer sees 2 committed and 3 reserved
    let mut third = DirEntry::new("THIRD", "BIN");
    manager.create_entry(&mut third).unwrap();
    assert_eq!(third.starting_cluster(), 4);

    // abandoning a transfer returns its clusters to the pool
    manager.end_transfer(&mut second);
    manager.end_transfer(&mut third);
    let mut fourth = DirEntry::new("FOURTH", "BIN");
    manager.create_entry(&mut fourth).unwrap();
    assert_eq!(fourth.starting_cluster(), 3);
}

#[test]
fn delete_frees_the_chain_and_marks_the_slot() {
    // README.TXT holds chain 5 -> 6
    let device = disk(standard_image(), true);
    let mut manager = Fat16FileManager::mount(device.clone()).unwrap();

    manager.delete_entry(SLOT_README).unwrap();

    assert_eq!(manager.fat_entry(5), 0);
    assert_eq!(manager.fat_entry(6), 0);
    assert!(manager.entries()[SLOT_README].is_deleted());

    // slot and both FAT copies updated on media
    let slot = device.snapshot(root_dir_offset(PART_LBA) + SLOT_README * 32, 1);
    assert_eq!(slot[0], 0xE5);
    assert_eq!(fat_entry_on_media(&device, fat_offset(PART_LBA), 5), 0);
    assert_eq!(fat_entry_on_media(&device, fat_offset(PART_LBA), 6), 0);
    let (primary, mirror) = fat_copies(&device, PART_LBA);
    assert_eq!(primary, mirror);

    // deleting again is refused
    assert_eq!(
        manager.delete_entry(SLOT_README).err(),
        Some(FsError::NotDeletable)
    );
}

#[test]
fn delete_rejections() {
    let mut manager = Fat16FileManager::mount(disk(standard_image(), true)).unwrap();

    for slot in [
        SLOT_VOLUME_LABEL,
        SLOT_LOCKED,
        SLOT_HIDDEN,
        SLOT_SUBDIR,
        NUM_SEEDED_SLOTS, // unused slot
    ] {
        assert_eq!(
            manager.delete_entry(slot).err(),
            Some(FsError::NotDeletable),
            "slot {slot}"
        );
    }
    assert_eq!(
        manager.delete_entry(ROOT_ENTRIES + 5).err(),
        Some(FsError::OutOfBounds)
    );
}

#[test]
fn delete_of_cyclic_chain_reports_corruption() {
    let mut data = standard_image();
    write_dir_slot(
        &mut data,
        root_dir_offset(PART_LBA),
        NUM_SEEDED_SLOTS,
        &dir_entry_bytes(b"LOOP", b"BIN", 0x20, 20, 5000),
    );
    // 20 -> 21 -> 20
    set_fat(&mut data, PART_LBA, 20, 21);
    set_fat(&mut data, PART_LBA, 21, 20);

    let device = disk(data, true);
    let mut manager = Fat16FileManager::mount(device.clone()).unwrap();

    assert_eq!(
        manager.delete_entry(NUM_SEEDED_SLOTS).err(),
        Some(FsError::CorruptChain)
    );

    // the deletion mark and the freed prefix are durable regardless
    assert!(manager.entries()[NUM_SEEDED_SLOTS].is_deleted());
    assert_eq!(manager.fat_entry(20), 0);
    assert_eq!(manager.fat_entry(21), 0);
    assert_eq!(fat_entry_on_media(&device, fat_offset(PART_LBA), 20), 0);
    assert_eq!(fat_entry_on_media(&device, mirror_fat_offset(PART_LBA), 21), 0);
}

#[test]
fn directory_full_rolls_the_write_back() {
    let mut data = standard_image();
    // stuff every remaining root slot
    for slot in NUM_SEEDED_SLOTS..ROOT_ENTRIES {
        write_dir_slot(
            &mut data,
            root_dir_offset(PART_LBA),
            slot,
            &dir_entry_bytes(b"FILLER", b"DAT", 0x20, 0, 0),
        );
    }

    let mut manager = Fat16FileManager::mount(disk(data, true)).unwrap();
    let mut handle = DirEntry::new("NOROOM", "BIN");
    manager.create_entry(&mut handle).unwrap();
    manager
        .write_to_entry(&mut handle, &[0x42; 512])
        .unwrap();

    assert_eq!(
        manager.finalize_entry(&mut handle).err(),
        Some(FsError::DirectoryFull)
    );

    // reservations released, FAT untouched
    assert!(manager.pending_reservations().is_empty());
    assert_eq!(manager.fat_entry(2), 0);
}

#[test]
fn no_space_on_create_and_rollback_on_extend() {
    let mut data = standard_image();
    // leave cluster 2 as the only free cluster; the scan stops two short
    // of the FAT's end
    let num_clusters = (SECTORS_PER_FAT * SECTOR_SIZE / 2) as u16;
    for cluster in 3..num_clusters - 2 {
        let offset = fat_offset(PART_LBA) + cluster as usize * 2;
        if data[offset] == 0 && data[offset + 1] == 0 {
            set_fat(&mut data, PART_LBA, cluster, 0xFFFF);
        }
    }

    let mut manager = Fat16FileManager::mount(disk(data, true)).unwrap();

    let mut handle = DirEntry::new("BIG", "BIN");
    manager.create_entry(&mut handle).unwrap();
    assert_eq!(handle.starting_cluster(), 2);

    // one cluster fits; the fifth sector needs a successor and none exists
    assert_eq!(
        manager
            .write_to_entry(&mut handle, &vec![0x55; CLUSTER_SIZE + SECTOR_SIZE])
            .err(),
        Some(FsError::NoSpace)
    );

    // rollback: reservations gone, nothing committed to the FAT
    assert!(manager.pending_reservations().is_empty());
    assert_eq!(manager.fat_entry(2), 0);

    // the rolled-back cluster is claimable again
    let mut retry = DirEntry::new("SMALL", "BIN");
    manager.create_entry(&mut retry).unwrap();
    assert_eq!(retry.starting_cluster(), 2);

    // with the last cluster also taken, creation itself runs dry
    manager.flush_to_entry(&mut retry, &[0x66; 64]).unwrap();
    let mut none_left = DirEntry::new("NONE", "BIN");
    assert_eq!(
        manager.create_entry(&mut none_left).err(),
        Some(FsError::NoSpace)
    );
}

#[test]
fn write_and_finalize_need_an_active_transfer() {
    let mut manager = Fat16FileManager::mount(disk(standard_image(), true)).unwrap();
    let mut handle = DirEntry::new("IDLE", "BIN");

    assert_eq!(
        manager.write_to_entry(&mut handle, &[0u8; 512]).err(),
        Some(FsError::NoActiveTransfer)
    );
    assert_eq!(
        manager.flush_to_entry(&mut handle, &[0u8; 64]).err(),
        Some(FsError::NoActiveTransfer)
    );
    assert_eq!(
        manager.finalize_entry(&mut handle).err(),
        Some(FsError::NoActiveTransfer)
    );
}

#[test]
fn starting_a_read_rolls_back_a_write_in_flight() {
    let mut manager = Fat16FileManager::mount(disk(standard_image(), true)).unwrap();

    let mut handle = DirEntry::new("ROLL", "BIN");
    manager.create_entry(&mut handle).unwrap();
    manager.write_to_entry(&mut handle, &[0x99; 512]).unwrap();
    assert_eq!(manager.pending_reservations(), &[2]);

    // the handle was never finalized, so the read finds no such entry,
    // but the attempt alone terminates the write and frees the claim
    assert_eq!(
        manager.read_entry(&mut handle).err(),
        Some(FsError::NotFound)
    );
    assert!(manager.pending_reservations().is_empty());
    assert_eq!(manager.fat_entry(2), 0);
}

#[test]
fn finalize_targets_the_directory_the_write_started_in() {
    let mut manager = Fat16FileManager::mount(disk(standard_image(), true)).unwrap();

    // start the write inside STUFF
    manager.select_entry(SLOT_SUBDIR).unwrap();
    let mut handle = DirEntry::new("NEW", "LOG");
    manager.create_entry(&mut handle).unwrap();
    manager.write_to_entry(&mut handle, &[0xEE; 512]).unwrap();

    // navigate back to the root before committing
    manager.select_entry(1).unwrap();
    assert_eq!(manager.current_dir_offset(), manager.root_dir_offset());

    // the commit re-reads one sector of STUFF and claims its first free
    // slot, after `.`, `..` and NOTES.TXT
    manager.finalize_entry(&mut handle).unwrap();

    manager.select_entry(SLOT_SUBDIR).unwrap();
    let committed = &manager.entries()[3];
    assert_eq!(committed.display_name(), "NEW.LOG");
    assert_eq!(committed.file_size_in_bytes(), 512);
}
