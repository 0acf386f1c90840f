//! # 磁盘数据结构层
//!
//! 盘上只有三种记录：文件头（连同它的间接组）、目录项、空闲位图。
//! 前两者的外形受一条硬约束：单条记录必须恰好放进一块。

mod dir_entry;
mod freemap;
mod header;

pub use self::dir_entry::{DirEntry, NAME_MAX_LEN};
pub use self::freemap::FreeMap;
pub use self::header::{FileHeader, GROUP_CAPACITY, MAX_FILE_SIZE, NUM_DIRECT, NUM_INDIRECT};
