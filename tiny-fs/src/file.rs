//! # 打开文件层
//!
//! 在文件头之上提供按字节偏移的随机读写。文件大小创建时固定，
//! 读写都被钳制在文件长度之内，越界部分按到达边界处理。

use alloc::sync::Arc;

use block_dev::BlockDevice;
use enumflags2::bitflags;

use crate::block_cache;
use crate::layout::FileHeader;
use crate::{BLOCK_SIZE, DataBlock};

/// 一个打开的文件：头记录加一枚顺序读写游标
pub struct OpenFile {
    header: FileHeader,
    header_block: u32,
    position: usize,
    device: Arc<dyn BlockDevice>,
}

impl core::fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpenFile")
            .field("header_block", &self.header_block)
            .field("len", &self.len())
            .field("position", &self.position)
            .finish()
    }
}

impl OpenFile {
    /// 读入 `header_block` 上的文件头，打开该文件
    pub fn open(header_block: u32, device: Arc<dyn BlockDevice>) -> Self {
        Self {
            header: FileHeader::fetch_from(header_block, &device),
            header_block,
            position: 0,
            device,
        }
    }

    /// 文件长度（字节）
    pub fn len(&self) -> usize {
        self.header.len()
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty()
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn header_block(&self) -> u32 {
        self.header_block
    }

    /// 从 `offset` 起读入 `buf`，返回实际读到的字节数
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let mut start = offset;
        let end = (start + buf.len()).min(self.len());
        if start >= end {
            return 0;
        }

        let mut read_size = 0;
        loop {
            let block_index = start / BLOCK_SIZE;
            let block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let step = block_end - start;
            let dest = &mut buf[read_size..read_size + step];

            // start < len，必然可译出块号
            let block_id = self.header.byte_to_block(start).unwrap();
            block_cache::get(block_id as usize, self.device.clone())
                .lock()
                .read(0, |data: &DataBlock| {
                    let offset = start % BLOCK_SIZE;
                    dest.copy_from_slice(&data[offset..offset + step]);
                });

            read_size += step;
            if block_end == end {
                break;
            }
            start = block_end;
        }

        read_size
    }

    /// 从 `offset` 起写出 `buf`，返回实际写入的字节数
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        let mut start = offset;
        let end = (start + buf.len()).min(self.len());
        if start >= end {
            return 0;
        }

        let mut written_size = 0;
        loop {
            let block_index = start / BLOCK_SIZE;
            let block_end = ((block_index + 1) * BLOCK_SIZE).min(end);
            let step = block_end - start;
            let src = &buf[written_size..written_size + step];

            let block_id = self.header.byte_to_block(start).unwrap();
            block_cache::get(block_id as usize, self.device.clone())
                .lock()
                .modify(0, |data: &mut DataBlock| {
                    let offset = start % BLOCK_SIZE;
                    data[offset..offset + step].copy_from_slice(src);
                });

            written_size += step;
            if block_end == end {
                break;
            }
            start = block_end;
        }

        written_size
    }

    /// 顺序读，游标随之前移
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let read_size = self.read_at(self.position, buf);
        self.position += read_size;
        read_size
    }

    /// 顺序写，游标随之前移
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let written_size = self.write_at(self.position, buf);
        self.position += written_size;
        written_size
    }

    /// 挪动顺序读写游标
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }
}

/// 文件元信息
#[repr(C)]
#[derive(Debug, Default)]
pub struct Stat {
    pub size: u64,
    pub blocks: u64,
    pub kind: StatKind,
}

#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatKind {
    DIR = 0o040000,
    #[default]
    FILE = 0o100000,
}
