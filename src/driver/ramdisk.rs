//! 内存盘：以内存保存块内容的同步块设备

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::BlockDevice;
use crate::consts::fs::BSIZE;
use crate::fs::BufData;
use crate::spinlock::SpinLock;

/// 以 `(dev, blockno)` 为键保存块内容的内存盘。
///
/// 从未写过的块读出全零。读写次数分别计数，便于确认缓存是否真的省下了传输。
pub struct RamDisk {
    blocks: SpinLock<BTreeMap<(u32, u32), Box<[u8; BSIZE]>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    pub const fn new() -> Self {
        Self {
            blocks: SpinLock::new(BTreeMap::new(), "ramdisk"),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// 迄今为止的读传输次数
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// 迄今为止的写传输次数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// 绕过缓存直接查看某块在盘上的第一个字节，未写过的块返回 `None`。
    pub fn peek(&self, dev: u32, blockno: u32) -> Option<u8> {
        self.blocks.lock().get(&(dev, blockno)).map(|b| b[0])
    }
}

impl Default for RamDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for RamDisk {
    fn rw(&self, dev: u32, blockno: u32, data: &mut BufData, writing: bool) {
        let mut blocks = self.blocks.lock();
        if writing {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let block = blocks
                .entry((dev, blockno))
                .or_insert_with(|| Box::new([0; BSIZE]));
            block.copy_from_slice(data.as_bytes());
        } else {
            self.reads.fetch_add(1, Ordering::SeqCst);
            match blocks.get(&(dev, blockno)) {
                Some(block) => data.as_bytes_mut().copy_from_slice(&block[..]),
                None => data.as_bytes_mut().fill(0),
            }
        }
    }
}
