//! # 文件头
//!
//! 每个文件一条头记录，把文件内的字节偏移翻译成设备块号。
//! 头记录里先是一张直接表；装不下的部分交给**间接组**：
//! 头上每个间接槽指向一块组记录，组记录里只有又一层直接表。
//! 索引就这两层，组记录不再继续嵌套。
//!
//! ## 偏移编码
//!
//! - 块索引小于直接表容量：直接表内取
//! - 否则减去直接表容量后，除以组容量选组，取余在组内选槽

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;

use block_dev::BlockDevice;

use crate::block_cache;
use crate::error::FsError;
use crate::layout::FreeMap;
use crate::{BLOCK_SIZE, NO_BLOCK};

/// 文件头直接表容量
pub const NUM_DIRECT: usize = 96;
/// 文件头上的间接槽数
pub const NUM_INDIRECT: usize = 30;
/// 单个间接组的块编号容量
pub const GROUP_CAPACITY: usize = 127;
/// 单个文件的最大字节数
pub const MAX_FILE_SIZE: usize = (NUM_DIRECT + NUM_INDIRECT * GROUP_CAPACITY) * BLOCK_SIZE;

/// 文件头的盘上记录
#[repr(C)]
#[derive(Clone)]
struct HeaderBlock {
    num_bytes: u32,
    num_blocks: u32,
    direct: [u32; NUM_DIRECT],
    indirect: [u32; NUM_INDIRECT],
}

/// 间接组的盘上记录
#[repr(C)]
#[derive(Clone)]
struct GroupBlock {
    num_blocks: u32,
    blocks: [u32; GROUP_CAPACITY],
}

// 两种记录都恰好占满一块
const _: () = assert!(mem::size_of::<HeaderBlock>() == BLOCK_SIZE);
const _: () = assert!(mem::size_of::<GroupBlock>() == BLOCK_SIZE);

/// 内存中的文件头，连同已读入的全部间接组。
/// 组记录为本头独占，不与其它文件头共享。
pub struct FileHeader {
    head: HeaderBlock,
    groups: Vec<GroupBlock>,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl FileHeader {
    /// 全空的头：长度为零，所有槽位填哨兵
    pub fn new() -> Self {
        Self {
            head: HeaderBlock {
                num_bytes: 0,
                num_blocks: 0,
                direct: [NO_BLOCK; NUM_DIRECT],
                indirect: [NO_BLOCK; NUM_INDIRECT],
            },
            groups: Vec::new(),
        }
    }

    /// 为 `num_bytes` 字节的新文件在位图上认领块。
    /// 数据块连同组记录块的总需求先行校验，
    /// 校验通过后的认领不会中途失败。
    pub fn allocate(&mut self, free_map: &mut FreeMap, num_bytes: usize) -> Result<(), FsError> {
        if num_bytes > MAX_FILE_SIZE {
            return Err(FsError::CapacityExceeded);
        }

        let data_blocks = num_bytes.div_ceil(BLOCK_SIZE);
        let direct_count = data_blocks.min(NUM_DIRECT);
        let mut rest = data_blocks - direct_count;
        let group_count = rest.div_ceil(GROUP_CAPACITY);

        if free_map.num_clear() < data_blocks + group_count {
            return Err(FsError::CapacityExceeded);
        }

        self.head.num_bytes = num_bytes as u32;
        self.head.num_blocks = data_blocks as u32;
        for slot in &mut self.head.direct[..direct_count] {
            *slot = free_map.find_and_set().unwrap();
        }

        for index in 0..group_count {
            // 组记录自己也要一块
            self.head.indirect[index] = free_map.find_and_set().unwrap();

            let take = rest.min(GROUP_CAPACITY);
            rest -= take;
            let mut group = GroupBlock {
                num_blocks: take as u32,
                blocks: [NO_BLOCK; GROUP_CAPACITY],
            };
            for slot in &mut group.blocks[..take] {
                *slot = free_map.find_and_set().unwrap();
            }
            self.groups.push(group);
        }

        Ok(())
    }

    /// 归还文件占用的全部块。组内遍历以该组自己记下的块数为界，
    /// 不假设各组连续或装满。
    pub fn deallocate(&mut self, free_map: &mut FreeMap) {
        for (group, &record) in self.groups.iter().zip(&self.head.indirect) {
            for &block in &group.blocks[..group.num_blocks as usize] {
                free_map.clear(block);
            }
            free_map.clear(record);
        }
        self.groups.clear();
        self.head.indirect.fill(NO_BLOCK);

        for slot in &mut self.head.direct {
            if *slot != NO_BLOCK {
                free_map.clear(*slot);
                *slot = NO_BLOCK;
            }
        }
        self.head.num_bytes = 0;
        self.head.num_blocks = 0;
    }

    /// 从 `block_id` 读入头记录，并顺着间接槽取回每个组记录
    pub fn fetch_from(block_id: u32, device: &Arc<dyn BlockDevice>) -> Self {
        let head = block_cache::get(block_id as usize, device.clone())
            .lock()
            .read(0, |head: &HeaderBlock| head.clone());

        let groups = head
            .indirect
            .iter()
            .take_while(|&&record| record != NO_BLOCK)
            .map(|&record| {
                block_cache::get(record as usize, device.clone())
                    .lock()
                    .read(0, |group: &GroupBlock| group.clone())
            })
            .collect();

        Self { head, groups }
    }

    /// 把头记录写到 `block_id`，再把每个组记录写回各自的块
    pub fn write_back(&self, block_id: u32, device: &Arc<dyn BlockDevice>) {
        block_cache::get(block_id as usize, device.clone())
            .lock()
            .modify(0, |dest: &mut HeaderBlock| *dest = self.head.clone());

        for (group, &record) in self.groups.iter().zip(&self.head.indirect) {
            block_cache::get(record as usize, device.clone())
                .lock()
                .modify(0, |dest: &mut GroupBlock| *dest = group.clone());
        }
    }

    /// 文件内字节偏移 → 设备块号。
    /// 超出文件映射范围的偏移属调用方错误，这里显式报错。
    pub fn byte_to_block(&self, offset: usize) -> Result<u32, FsError> {
        if offset >= self.head.num_bytes as usize {
            return Err(FsError::OutOfRange);
        }

        let index = offset / BLOCK_SIZE;
        if index < NUM_DIRECT {
            return Ok(self.head.direct[index]);
        }

        let index = index - NUM_DIRECT;
        let group = self
            .groups
            .get(index / GROUP_CAPACITY)
            .ok_or(FsError::OutOfRange)?;
        Ok(group.blocks[index % GROUP_CAPACITY])
    }

    /// 文件长度（字节）
    pub fn len(&self) -> usize {
        self.head.num_bytes as usize
    }

    pub fn is_empty(&self) -> bool {
        self.head.num_bytes == 0
    }

    /// 文件的数据块数，恒等于按块上取整的长度
    pub fn num_blocks(&self) -> usize {
        self.head.num_blocks as usize
    }
}
