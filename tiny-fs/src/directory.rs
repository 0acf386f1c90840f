//! # 目录层
//!
//! 目录是一张定容量的目录项表；表本身又是一个普通文件的内容，
//! 经由打开文件层读写。容量在创建时定死，表满之后再添加就会失败。
//! 路径解析沿 `/` 分隔符逐级打开子目录文件下潜。

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use block_dev::BlockDevice;

use crate::ROOT_DIR_BLOCK;
use crate::error::FsError;
use crate::file::OpenFile;
use crate::layout::{DirEntry, FileHeader, FreeMap};

/// 一张读入内存的目录表
pub struct Directory {
    table: Vec<DirEntry>,
}

/// [`Directory::list`] 的输出项：带累积前缀的路径与类别
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub path: String,
    pub is_dir: bool,
}

impl Directory {
    /// 新建全空表。刚分配的目录文件内容未定义，
    /// 必须先把空表写回一次才算可用。
    pub fn empty(capacity: usize) -> Self {
        Self {
            table: vec![DirEntry::default(); capacity],
        }
    }

    /// 从目录文件读入整张表；容量由文件长度决定
    pub fn fetch_from(file: &OpenFile) -> Self {
        let capacity = file.len() / DirEntry::SIZE;
        let mut table = vec![DirEntry::default(); capacity];
        for (index, entry) in table.iter_mut().enumerate() {
            assert_eq!(
                file.read_at(index * DirEntry::SIZE, entry.as_bytes_mut()),
                DirEntry::SIZE
            );
        }
        Self { table }
    }

    /// 把整张表写回目录文件
    pub fn write_back(&self, file: &OpenFile) {
        for (index, entry) in self.table.iter().enumerate() {
            assert_eq!(
                file.write_at(index * DirEntry::SIZE, entry.as_bytes()),
                DirEntry::SIZE
            );
        }
    }

    pub fn capacity(&self) -> usize {
        self.table.len()
    }

    /// 线性扫描名字，返回表内下标
    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.table.iter().position(|entry| entry.matches(name))
    }

    /// 名字 → 该项文件头所在的块号
    pub fn find(&self, name: &str) -> Option<u32> {
        self.find_index(name).map(|index| self.table[index].block_id())
    }

    pub fn entry(&self, index: usize) -> &DirEntry {
        &self.table[index]
    }

    /// 占用第一个空槽登记新绑定
    pub fn add(&mut self, name: &str, block_id: u32, is_dir: bool) -> Result<(), FsError> {
        if self.find_index(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let slot = self
            .table
            .iter()
            .position(|entry| !entry.in_use())
            .ok_or(FsError::CapacityExceeded)?;
        self.table[slot] = DirEntry::new(name, block_id, is_dir);
        Ok(())
    }

    /// 释放名字所在的槽位；只清在用标志，不腾挪别的项
    pub fn remove(&mut self, name: &str) -> Result<(), FsError> {
        let index = self.find_index(name).ok_or(FsError::NotFound)?;
        self.table[index].clear();
        Ok(())
    }

    /// 解析以 `/` 分隔的绝对路径，返回目标项头块的块号。
    /// `offset` 指向当前待解析分量之前的那个分隔符。
    /// 每级下潜都临时打开一份子目录表，用完即弃。
    pub fn search_path(
        &self,
        device: &Arc<dyn BlockDevice>,
        path: &str,
        offset: usize,
    ) -> Option<u32> {
        // 裸根引用
        if offset == 0 && path == "/" {
            return Some(ROOT_DIR_BLOCK);
        }

        let rest = path[offset..].strip_prefix('/')?;
        match rest.split_once('/') {
            // 没有更多分隔符：剩下的就是最终分量
            None => self.find(rest),
            Some((component, _)) => {
                let entry = self.entry(self.find_index(component)?);
                if !entry.is_dir() {
                    return None;
                }
                let file = OpenFile::open(entry.block_id(), device.clone());
                let next = Directory::fetch_from(&file);
                next.search_path(device, path, offset + 1 + component.len())
            }
        }
    }

    /// 罗列表内所有在用项；`recursive` 时深入子目录，
    /// 展示路径的前缀逐级累积
    pub fn list(
        &self,
        device: &Arc<dyn BlockDevice>,
        prefix: &str,
        recursive: bool,
    ) -> Vec<ListEntry> {
        let mut entries = Vec::new();
        for entry in self.table.iter().filter(|entry| entry.in_use()) {
            let path = format!("{}/{}", prefix, entry.name());
            let is_dir = entry.is_dir();
            if recursive && is_dir {
                let file = OpenFile::open(entry.block_id(), device.clone());
                let children = Directory::fetch_from(&file).list(device, &path, true);
                entries.push(ListEntry { path, is_dir });
                entries.extend(children);
            } else {
                entries.push(ListEntry { path, is_dir });
            }
        }
        entries
    }

    /// 深度优先摧毁整棵子树：子目录先递归清空，随后逐项归还
    /// 数据块与头块，最后把清空的表写回自己的后备文件。
    /// 子树内每个可达块恰好归还一次；目录自身的头块由调用方负责。
    pub fn destroy(
        &mut self,
        device: &Arc<dyn BlockDevice>,
        free_map: &mut FreeMap,
        backing: &OpenFile,
    ) {
        for index in 0..self.table.len() {
            if !self.table[index].in_use() {
                continue;
            }
            let (block_id, is_dir) = {
                let entry = self.entry(index);
                (entry.block_id(), entry.is_dir())
            };

            if is_dir {
                let file = OpenFile::open(block_id, device.clone());
                let mut sub = Directory::fetch_from(&file);
                sub.destroy(device, free_map, &file);
            }

            let mut header = FileHeader::fetch_from(block_id, device);
            header.deallocate(free_map);
            free_map.clear(block_id);
            self.table[index].clear();
        }
        self.write_back(backing);
    }
}
