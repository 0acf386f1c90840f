//! # 磁盘块管理层
//!
//! 顶层编排：格式化与挂载，按绝对路径创建、打开、删除、罗列，
//! 以及以小整数句柄引用打开文件的系统级句柄表。
//!
//! 每个操作都遵循同一条纪律：改动先在内存副本上全部做完，
//! 整体成功后才把涉及的结构写回盘上；中途失败就丢弃副本，
//! 盘上不会留下半截改动。写回顺序固定为头块 → 目录 → 位图。

use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use log::debug;

use crate::block_cache;
use crate::directory::{Directory, ListEntry};
use crate::error::FsError;
use crate::file::{OpenFile, Stat, StatKind};
use crate::layout::{DirEntry, FileHeader, FreeMap};
use crate::{DataBlock, FREE_MAP_BLOCK, ROOT_DIR_BLOCK};

/// 系统级句柄表的槽位数
pub const MAX_OPEN_FILES: usize = 20;

/// 整个文件系统。位图文件与根目录文件常开，
/// 其余文件头的位置都要靠目录查找发现。
pub struct TinyFileSystem {
    device: Arc<dyn BlockDevice>,
    free_map_file: OpenFile,
    root_dir_file: OpenFile,
    dir_capacity: usize,
    open_files: HandleTable,
}

/// 定长的打开文件表，槽位下标即句柄
struct HandleTable {
    slots: Vec<Option<OpenFile>>,
}

impl TinyFileSystem {
    /// 格式化整个设备。块0、块1 留给空闲位图与根目录的文件头，
    /// 两者的位先行强占，之后才为两份文件内容认领块。
    pub fn format(device: Arc<dyn BlockDevice>, total_blocks: u32, dir_capacity: usize) -> Self {
        debug!("formatting: {total_blocks} blocks, directory capacity {dir_capacity}");

        for block_id in 0..total_blocks {
            block_cache::get(block_id as usize, device.clone())
                .lock()
                .modify(0, |block: &mut DataBlock| block.fill(0));
        }

        let mut free_map = FreeMap::new(total_blocks as usize);
        free_map.mark(FREE_MAP_BLOCK);
        free_map.mark(ROOT_DIR_BLOCK);

        let mut map_header = FileHeader::new();
        map_header
            .allocate(&mut free_map, total_blocks as usize / 8)
            .expect("no room for the free map itself");
        let mut dir_header = FileHeader::new();
        dir_header
            .allocate(&mut free_map, dir_capacity * DirEntry::SIZE)
            .expect("no room for the root directory");

        // 头块先落盘，随后才能按文件打开两者
        map_header.write_back(FREE_MAP_BLOCK, &device);
        dir_header.write_back(ROOT_DIR_BLOCK, &device);

        let free_map_file = OpenFile::open(FREE_MAP_BLOCK, device.clone());
        let root_dir_file = OpenFile::open(ROOT_DIR_BLOCK, device.clone());

        // 根目录写成全空表才算进入可用状态
        Directory::empty(dir_capacity).write_back(&root_dir_file);
        free_map.write_back(&free_map_file);
        block_cache::sync_all();

        Self {
            device,
            free_map_file,
            root_dir_file,
            dir_capacity,
            open_files: HandleTable::new(),
        }
    }

    /// 挂载已格式化的设备；两个众所周知的头块定位其余一切
    pub fn open(device: Arc<dyn BlockDevice>) -> Self {
        let free_map_file = OpenFile::open(FREE_MAP_BLOCK, device.clone());
        let root_dir_file = OpenFile::open(ROOT_DIR_BLOCK, device.clone());
        let dir_capacity = root_dir_file.len() / DirEntry::SIZE;

        Self {
            device,
            free_map_file,
            root_dir_file,
            dir_capacity,
            open_files: HandleTable::new(),
        }
    }

    /// 创建新文件或子目录。目录的大小不由调用方指定，
    /// 一律按格式化时定下的表容量分配，并先写成全空表。
    pub fn create(&mut self, path: &str, num_bytes: usize, is_dir: bool) -> Result<(), FsError> {
        debug!("creating {path:?}, size {num_bytes}, dir: {is_dir}");
        let (base, name) = split_path(path)?;
        let num_bytes = if is_dir {
            self.dir_capacity * DirEntry::SIZE
        } else {
            num_bytes
        };

        let parent_block = self.resolve_dir(base)?;
        let parent_file = OpenFile::open(parent_block, self.device.clone());
        let mut parent = Directory::fetch_from(&parent_file);

        if parent.find(name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let mut free_map = FreeMap::fetch_from(&self.free_map_file);
        let header_block = free_map.find_and_set().ok_or(FsError::CapacityExceeded)?;
        parent.add(name, header_block, is_dir)?;
        let mut header = FileHeader::new();
        // 失败即丢弃内存副本，盘上尚未写入任何东西
        header.allocate(&mut free_map, num_bytes)?;

        header.write_back(header_block, &self.device);
        parent.write_back(&parent_file);
        free_map.write_back(&self.free_map_file);

        if is_dir {
            let file = OpenFile::open(header_block, self.device.clone());
            Directory::empty(self.dir_capacity).write_back(&file);
        }
        block_cache::sync_all();
        Ok(())
    }

    /// 按路径打开文件；目录文件同样可以打开
    pub fn open_file(&self, path: &str) -> Result<OpenFile, FsError> {
        debug!("opening {path:?}");
        if !path.starts_with('/') {
            return Err(FsError::InvalidPath);
        }
        let root = Directory::fetch_from(&self.root_dir_file);
        let block = root
            .search_path(&self.device, path, 0)
            .ok_or(FsError::NotFound)?;
        Ok(OpenFile::open(block, self.device.clone()))
    }

    /// 删除文件或子目录。`recursive` 时先摧毁目录下的整棵子树；
    /// 非递归地删除非空目录只回收目录文件自身。根目录不可删除。
    pub fn remove(&mut self, path: &str, recursive: bool) -> Result<(), FsError> {
        debug!("removing {path:?}, recursive: {recursive}");
        let (base, name) = split_path(path)?;

        let base_block = self.resolve_dir(base)?;
        let base_file = OpenFile::open(base_block, self.device.clone());
        let mut base_dir = Directory::fetch_from(&base_file);

        let index = base_dir.find_index(name).ok_or(FsError::NotFound)?;
        let (target_block, is_dir) = {
            let entry = base_dir.entry(index);
            (entry.block_id(), entry.is_dir())
        };
        if target_block == ROOT_DIR_BLOCK {
            return Err(FsError::NotFound);
        }

        let mut free_map = FreeMap::fetch_from(&self.free_map_file);
        if recursive && is_dir {
            let target_file = OpenFile::open(target_block, self.device.clone());
            let mut target = Directory::fetch_from(&target_file);
            target.destroy(&self.device, &mut free_map, &target_file);
        }

        let mut header = FileHeader::fetch_from(target_block, &self.device);
        header.deallocate(&mut free_map);
        free_map.clear(target_block);
        base_dir.remove(name)?;

        free_map.write_back(&self.free_map_file);
        base_dir.write_back(&base_file);
        block_cache::sync_all();
        Ok(())
    }

    /// 罗列目录内容；目标必须是目录
    pub fn list(&self, path: &str, recursive: bool) -> Result<Vec<ListEntry>, FsError> {
        if path == "/" {
            let root = Directory::fetch_from(&self.root_dir_file);
            return Ok(root.list(&self.device, "", recursive));
        }

        let block = self.resolve_dir(path)?;
        let file = OpenFile::open(block, self.device.clone());
        Ok(Directory::fetch_from(&file).list(&self.device, path, recursive))
    }

    /// 文件元信息
    pub fn stat(&self, path: &str) -> Result<Stat, FsError> {
        if path == "/" {
            return Ok(Stat {
                size: self.root_dir_file.len() as u64,
                blocks: self.root_dir_file.header().num_blocks() as u64,
                kind: StatKind::DIR,
            });
        }

        let (base, name) = split_path(path)?;
        let base_block = self.resolve_dir(base)?;
        let base_file = OpenFile::open(base_block, self.device.clone());
        let base_dir = Directory::fetch_from(&base_file);

        let entry = base_dir.entry(base_dir.find_index(name).ok_or(FsError::NotFound)?);
        let header = FileHeader::fetch_from(entry.block_id(), &self.device);
        Ok(Stat {
            size: header.len() as u64,
            blocks: header.num_blocks() as u64,
            kind: if entry.is_dir() {
                StatKind::DIR
            } else {
                StatKind::FILE
            },
        })
    }

    /// 当前空闲块数
    pub fn free_blocks(&self) -> usize {
        FreeMap::fetch_from(&self.free_map_file).num_clear()
    }

    /// 打开文件并在句柄表里占一个槽，返回句柄
    pub fn open_id(&mut self, path: &str) -> Result<usize, FsError> {
        let file = self.open_file(path)?;
        self.open_files.insert(file).ok_or(FsError::CapacityExceeded)
    }

    /// 经句柄顺序读
    pub fn read_id(&mut self, id: usize, buf: &mut [u8]) -> Result<usize, FsError> {
        Ok(self.open_files.get_mut(id).ok_or(FsError::NotFound)?.read(buf))
    }

    /// 经句柄顺序写
    pub fn write_id(&mut self, id: usize, buf: &[u8]) -> Result<usize, FsError> {
        Ok(self.open_files.get_mut(id).ok_or(FsError::NotFound)?.write(buf))
    }

    /// 归还句柄并关闭文件；重复关闭报 NotFound
    pub fn close_id(&mut self, id: usize) -> Result<(), FsError> {
        self.open_files.take(id).map(drop).ok_or(FsError::NotFound)
    }

    /// 解析必须是目录的路径，返回其头块。
    /// 普通文件的数据块绝不能被当成目录表读写，
    /// 因此逐级都核对目录项上的类别标志。
    fn resolve_dir(&self, path: &str) -> Result<u32, FsError> {
        if path == "/" {
            return Ok(ROOT_DIR_BLOCK);
        }
        let (base, name) = split_path(path)?;
        let base_block = self.resolve_dir(base)?;
        let base_file = OpenFile::open(base_block, self.device.clone());
        let base_dir = Directory::fetch_from(&base_file);

        let entry = base_dir.entry(base_dir.find_index(name).ok_or(FsError::NotFound)?);
        if !entry.is_dir() {
            return Err(FsError::NotFound);
        }
        Ok(entry.block_id())
    }
}

/// 调试转储：位图用量加全盘递归清单
impl core::fmt::Debug for TinyFileSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let free_map = FreeMap::fetch_from(&self.free_map_file);
        let root = Directory::fetch_from(&self.root_dir_file);
        f.debug_struct("TinyFileSystem")
            .field("total_blocks", &free_map.capacity())
            .field("free_blocks", &free_map.num_clear())
            .field("dir_capacity", &self.dir_capacity)
            .field("entries", &root.list(&self.device, "", true))
            .finish()
    }
}

impl HandleTable {
    fn new() -> Self {
        Self {
            slots: (0..MAX_OPEN_FILES).map(|_| None).collect(),
        }
    }

    fn insert(&mut self, file: OpenFile) -> Option<usize> {
        let slot = self.slots.iter().position(Option::is_none)?;
        self.slots[slot] = Some(file);
        Some(slot)
    }

    fn get_mut(&mut self, id: usize) -> Option<&mut OpenFile> {
        self.slots.get_mut(id)?.as_mut()
    }

    fn take(&mut self, id: usize) -> Option<OpenFile> {
        self.slots.get_mut(id)?.take()
    }
}

/// 把绝对路径拆成父目录路径与最终分量
fn split_path(path: &str) -> Result<(&str, &str), FsError> {
    if !path.starts_with('/') {
        return Err(FsError::InvalidPath);
    }
    let (base, name) = path.rsplit_once('/').ok_or(FsError::InvalidPath)?;
    if name.is_empty() {
        return Err(FsError::InvalidPath);
    }
    Ok((if base.is_empty() { "/" } else { base }, name))
}
