use core::{mem, ptr, slice};

use crate::NO_BLOCK;

/// 文件名最大长度（字节）
pub const NAME_MAX_LEN: usize = 23;

/// 目录项：名字到文件头块的一条绑定，恒为32字节
#[repr(C)]
#[derive(Debug, Clone)]
pub struct DirEntry {
    // 末字节恒为 \0
    name: [u8; NAME_MAX_LEN + 1],
    block_id: u32,
    in_use: u8,
    is_dir: u8,
    _pad: [u8; 2],
}

const _: () = assert!(mem::size_of::<DirEntry>() == DirEntry::SIZE);

impl Default for DirEntry {
    fn default() -> Self {
        Self {
            name: [0; NAME_MAX_LEN + 1],
            block_id: NO_BLOCK,
            in_use: 0,
            is_dir: 0,
            _pad: [0; 2],
        }
    }
}

impl DirEntry {
    pub const SIZE: usize = 32;

    /// 新的在用项；超长名字按上限截断存储
    pub fn new(name: &str, block_id: u32, is_dir: bool) -> Self {
        let mut entry = Self {
            block_id,
            in_use: 1,
            is_dir: is_dir as u8,
            ..Default::default()
        };
        let bytes = Self::truncated(name);
        entry.name[..bytes.len()].copy_from_slice(bytes);
        entry
    }

    /// 名字的存储形态：截到上限字节数，截断点退到字符边界上，
    /// 盘上的名字因而始终是合法的 UTF-8
    fn truncated(name: &str) -> &[u8] {
        let mut len = name.len().min(NAME_MAX_LEN);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        &name.as_bytes()[..len]
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&c| c == 0).unwrap();
        core::str::from_utf8(&self.name[..len]).unwrap()
    }

    /// 名字按各自的存储形态比对，且要求槽位在用；
    /// 截断后相同的名字视为同名
    pub fn matches(&self, name: &str) -> bool {
        self.in_use() && self.name().as_bytes() == Self::truncated(name)
    }

    pub fn block_id(&self) -> u32 {
        self.block_id
    }

    pub fn in_use(&self) -> bool {
        self.in_use != 0
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }

    /// 释放槽位；项内其余字段原样留存，不抹零
    pub fn clear(&mut self) {
        self.in_use = 0;
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), Self::SIZE) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), Self::SIZE) }
    }
}
