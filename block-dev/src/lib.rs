//! # 块设备接口层
//!
//! 底层存储介质以固定大小的**块**为单位读写；[`BlockDevice`]
//! 就是对这类介质的同步抽象，文件系统核心只经由该特质访问设备，
//! 不关心介质究竟是磁盘镜像还是别的什么。

#![no_std]

/// 块设备驱动特质；`block_id` 为设备上的块编号，
/// `buf` 的长度必须恰为一块。
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, block_id: usize, buf: &mut [u8]);
    fn write_block(&self, block_id: usize, buf: &[u8]);
}
