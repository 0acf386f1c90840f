//! # tiny-fs
//!
//! 教学用的磁盘文件系统：文件由定长块组成，大小在创建时一次定死；
//! 目录是内容为定容量表的普通文件，沿 `/` 分隔的绝对路径逐级解析。
//! 整个设计是单线程的，调用方需自行串行化对同一设备的操作。

#![no_std]

extern crate alloc;

/* tiny-fs 的整体架构，自上而下 */

// 磁盘块管理层：格式化、挂载，按路径创建/打开/删除的顶层编排
mod fs;

// 目录层：名字→头块的映射表、路径解析、递归摧毁
mod directory;

// 打开文件层：在文件头之上按字节偏移随机读写
mod file;

// 磁盘数据结构层：文件头、间接组、目录项、空闲位图
mod layout;

// 块缓存层：内存上的磁盘块数据缓存
mod block_cache;

mod error;

pub use self::{
    block_cache::{purge, sync_all},
    directory::{Directory, ListEntry},
    error::FsError,
    file::{OpenFile, Stat, StatKind},
    fs::{MAX_OPEN_FILES, TinyFileSystem},
    layout::{
        DirEntry, FileHeader, FreeMap, GROUP_CAPACITY, MAX_FILE_SIZE, NAME_MAX_LEN, NUM_DIRECT,
        NUM_INDIRECT,
    },
};

/// 块大小（字节）
pub const BLOCK_SIZE: usize = 512;
/// 空闲位图文件的头块，格式化时写死
pub const FREE_MAP_BLOCK: u32 = 0;
/// 根目录文件的头块，格式化时写死
pub const ROOT_DIR_BLOCK: u32 = 1;
/// 空槽哨兵，不与任何合法块号重合
pub const NO_BLOCK: u32 = u32::MAX;

type DataBlock = [u8; BLOCK_SIZE];
