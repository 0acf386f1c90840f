use core::error::Error;
use core::fmt;

/// 核心操作的失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 路径或名字不存在
    NotFound,
    /// 目录中已有同名项
    AlreadyExists,
    /// 目录表已满，或空闲块不足
    CapacityExceeded,
    /// 字节偏移落在文件的块映射之外
    OutOfRange,
    /// 路径不是以分隔符开头的绝对路径
    InvalidPath,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "no such file or directory",
            Self::AlreadyExists => "name already present in directory",
            Self::CapacityExceeded => "directory table full or not enough free blocks",
            Self::OutOfRange => "offset beyond the file's block map",
            Self::InvalidPath => "path is not absolute",
        })
    }
}

impl Error for FsError {}
