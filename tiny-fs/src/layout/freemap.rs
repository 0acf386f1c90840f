//! # 空闲位图
//!
//! 设备上每块对应一位，置位即已占用。位图整个常驻内存，
//! 修改只发生在内存里；它的持久形态是一个普通文件的内容，
//! 何时写回由编排事务的调用方决定，位图自己不管。

use alloc::vec;
use alloc::vec::Vec;

use crate::file::OpenFile;

/// 空闲块位图
pub struct FreeMap {
    words: Vec<u64>,
    bits: usize,
}

impl FreeMap {
    /// 全空位图。块总数须填满整字，文件长度才能精确往返。
    pub fn new(bits: usize) -> Self {
        assert_eq!(bits % 64, 0, "total block count must fill whole words");
        Self {
            words: vec![0; bits / 64],
            bits,
        }
    }

    /// 位图指示的块总数
    pub fn capacity(&self) -> usize {
        self.bits
    }

    /// 找到编号最小的空闲位并置位；位图耗尽时返回空
    pub fn find_and_set(&mut self) -> Option<u32> {
        self.words.iter_mut().enumerate().find_map(|(index, word)| {
            (*word != u64::MAX).then(|| {
                let bit = word.trailing_ones();
                *word |= 1 << bit;
                index as u32 * 64 + bit
            })
        })
    }

    pub fn clear(&mut self, block_id: u32) {
        let (word, bit) = Self::locate(block_id);
        // 归还的块一定得是已占用的
        assert_ne!(self.words[word] & (1 << bit), 0);
        self.words[word] &= !(1 << bit);
    }

    pub fn test(&self, block_id: u32) -> bool {
        let (word, bit) = Self::locate(block_id);
        self.words[word] & (1 << bit) != 0
    }

    /// 强行占用指定块；只在格式化时对众所周知的头块使用
    pub fn mark(&mut self, block_id: u32) {
        let (word, bit) = Self::locate(block_id);
        self.words[word] |= 1 << bit;
    }

    pub fn num_clear(&self) -> usize {
        self.words.iter().map(|word| word.count_zeros() as usize).sum()
    }

    /// 从位图文件重建；位数由文件长度决定
    pub fn fetch_from(file: &OpenFile) -> Self {
        let len = file.len();
        let mut buf = vec![0u8; len];
        assert_eq!(file.read_at(0, &mut buf), len);

        let words = buf
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
            .collect();
        Self {
            words,
            bits: len * 8,
        }
    }

    pub fn write_back(&self, file: &OpenFile) {
        let mut buf = Vec::with_capacity(self.words.len() * 8);
        for word in &self.words {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        assert_eq!(file.write_at(0, &buf), buf.len());
    }

    fn locate(block_id: u32) -> (usize, usize) {
        (block_id as usize / 64, block_id as usize % 64)
    }
}
