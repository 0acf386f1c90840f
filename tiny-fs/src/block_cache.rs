//! # 块缓存层
//!
//! 所有对设备块的访问都取道这里：块先被整块读进内存，
//! 读改都在缓冲区上进行，脏块在 [`sync_all`] 或被换出时写回。
//! 同一块的缓存全局唯一，重复获取返回同一份。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;

use block_dev::BlockDevice;
use spin::Mutex;

use crate::BLOCK_SIZE;
use crate::DataBlock;

static CACHE_MANAGER: Mutex<CacheManager> = Mutex::new(CacheManager::new());

/// 取得指定块的缓存，必要时从设备读入
pub(crate) fn get(block_id: usize, device: Arc<dyn BlockDevice>) -> Arc<Mutex<BlockCache>> {
    CACHE_MANAGER.lock().get(block_id, device)
}

/// 把所有脏块写回设备
pub fn sync_all() {
    CACHE_MANAGER
        .lock()
        .queue
        .iter()
        .for_each(|(_, cache)| cache.lock().sync());
}

/// 写回并丢弃全部缓存块。缓存按块号全局索引，
/// 换用另一台设备之前必须先清空。
pub fn purge() {
    let mut manager = CACHE_MANAGER.lock();
    for (_, cache) in manager.queue.drain(..) {
        cache.lock().sync();
    }
}

/// 内存中的单个块缓存
#[repr(C, align(8))]
pub(crate) struct BlockCache {
    // 置于首位且按 8 字节对齐，块内记录才能按其自身对齐被引用
    data: DataBlock,
    block_id: usize,
    device: Arc<dyn BlockDevice>,
    modified: bool,
}

impl BlockCache {
    fn new(block_id: usize, device: Arc<dyn BlockDevice>) -> Self {
        let mut data = [0; BLOCK_SIZE];
        device.read_block(block_id, &mut data);

        Self {
            data,
            block_id,
            device,
            modified: false,
        }
    }

    pub fn sync(&mut self) {
        if self.modified {
            self.modified = false;
            self.device.write_block(self.block_id, &self.data);
        }
    }

    /// 以只读方式把块内 `offset` 处的记录交给闭包
    pub fn read<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        assert!(offset + mem::size_of::<T>() <= BLOCK_SIZE);
        let record = unsafe { &*self.data[offset..].as_ptr().cast::<T>() };
        f(record)
    }

    /// 把块内 `offset` 处的记录以可写方式交给闭包，并把块标脏
    pub fn modify<T: Sized, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        assert!(offset + mem::size_of::<T>() <= BLOCK_SIZE);
        self.modified = true;
        let record = unsafe { &mut *self.data[offset..].as_mut_ptr().cast::<T>() };
        f(record)
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        self.sync();
    }
}

/// 全局缓存管理器：定容队列，踢走无人引用的块腾位
struct CacheManager {
    queue: Vec<(usize, Arc<Mutex<BlockCache>>)>,
}

impl CacheManager {
    /// 同时缓存的块数上限
    const CAPACITY: usize = 16;

    const fn new() -> Self {
        Self { queue: Vec::new() }
    }

    fn get(&mut self, block_id: usize, device: Arc<dyn BlockDevice>) -> Arc<Mutex<BlockCache>> {
        if let Some(cache) = self
            .queue
            .iter()
            .find_map(|(id, cache)| (*id == block_id).then_some(cache))
        {
            return Arc::clone(cache);
        }

        if self.queue.len() == Self::CAPACITY {
            // 只有没被外界持有的块才能换出
            let victim = self
                .queue
                .iter()
                .position(|(_, cache)| Arc::strong_count(cache) == 1)
                .expect("run out of block cache");
            self.queue.remove(victim);
        }

        let cache = Arc::new(Mutex::new(BlockCache::new(block_id, device)));
        self.queue.push((block_id, Arc::clone(&cache)));
        cache
    }
}
