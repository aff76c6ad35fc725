//! Write-through cache of recently-touched media blocks.
//!
//! Every read and write the file manager issues funnels through here. Reads
//! are served from an LRU of [`BLOCK_SIZE`] blocks; writes patch the cached
//! block and immediately write the whole block back, so the device only ever
//! sees aligned, block-multiple writes and is never behind the cache. That
//! also makes sub-block mutations (a 32-byte directory slot, a 2-byte FAT
//! entry) cost exactly one block write.

use crate::block_device::{BlockDevice, DeviceErr};
use crate::{BLOCK_CACHE_LIMIT, BLOCK_SIZE};

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use lru::LruCache;

pub struct SectorCache {
    device: Arc<dyn BlockDevice>,
    lru: LruCache<usize, Vec<u8>>,
}

impl SectorCache {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self {
            device,
            lru: LruCache::unbounded(),
        }
    }

    /// The cached block with this id, loading it from the device on a miss.
    fn block(&mut self, block_id: usize) -> Result<&mut Vec<u8>, DeviceErr> {
        if !self.lru.contains(&block_id) {
            let mut buf = vec![0u8; BLOCK_SIZE];
            self.device.read_bytes(&mut buf, block_id * BLOCK_SIZE)?;
            if self.lru.len() == BLOCK_CACHE_LIMIT {
                // write-through keeps evicted blocks clean, drop freely
                self.lru.pop_lru();
            }
            self.lru.put(block_id, buf);
        }
        match self.lru.get_mut(&block_id) {
            Some(block) => Ok(block),
            None => Err(DeviceErr::ReadError),
        }
    }

    /// Read `buf.len()` bytes at the absolute byte `offset`, any alignment.
    pub fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<(), DeviceErr> {
        let mut index = 0;
        while index < buf.len() {
            let block_id = (offset + index) / BLOCK_SIZE;
            let offset_in_block = (offset + index) % BLOCK_SIZE;
            let len = (BLOCK_SIZE - offset_in_block).min(buf.len() - index);
            let block = self.block(block_id)?;
            buf[index..index + len]
                .copy_from_slice(&block[offset_in_block..offset_in_block + len]);
            index += len;
        }
        Ok(())
    }

    /// Write `buf` at the absolute byte `offset`, any alignment. Each
    /// covering block is patched in the cache and written through whole.
    pub fn write(&mut self, buf: &[u8], offset: usize) -> Result<(), DeviceErr> {
        let mut index = 0;
        while index < buf.len() {
            let block_id = (offset + index) / BLOCK_SIZE;
            let offset_in_block = (offset + index) % BLOCK_SIZE;
            let len = (BLOCK_SIZE - offset_in_block).min(buf.len() - index);
            let data = {
                let block = self.block(block_id)?;
                block[offset_in_block..offset_in_block + len]
                    .copy_from_slice(&buf[index..index + len]);
                block.clone()
            };
            self.device.write_bytes(&data, block_id * BLOCK_SIZE)?;
            index += len;
        }
        Ok(())
    }
}
