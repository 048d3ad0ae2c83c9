//! 块设备驱动接口
//!
//! 缓冲区缓存只通过 [`BlockDevice`] 与存储驱动交互：未命中有效数据时读入，
//! 每次 `bwrite` 时直写。驱动自身的错误处理不属于缓存的职责。

mod ramdisk;

pub use ramdisk::RamDisk;

use crate::fs::BufData;

/// 同步块设备。
///
/// 调用者在整个传输期间持有该缓冲块的独占锁，实现可以睡眠但不应持有
/// 缓冲区缓存的任何自旋锁。
pub trait BlockDevice: Sync {
    /// 在设备 `dev` 的第 `blockno` 块与 `data` 之间传输一个块。
    ///
    /// # 参数
    /// - `writing`: `true` 表示把 `data` 写入磁盘，`false` 表示从磁盘读入 `data`
    fn rw(&self, dev: u32, blockno: u32, data: &mut BufData, writing: bool);
}

impl<D: BlockDevice + ?Sized> BlockDevice for &D {
    fn rw(&self, dev: u32, blockno: u32, data: &mut BufData, writing: bool) {
        (**self).rw(dev, blockno, data, writing)
    }
}
