//! 缓存层
//!
//! 缓冲区缓存由固定数量的缓冲块组成，以 `(dev, blockno)` 的哈希值索引。
//! 每个缓冲块的簿记信息（键、引用计数、释放时间戳）由它自己的自旋锁保护，
//! 互不相关的缓冲块之间不存在锁竞争；块内容由每块一把的睡眠锁独占访问。
//!
//! 使用方式：
//! * 调用 `bread` 获得某个磁盘块的缓冲区（已加锁、内容有效）；
//! * 修改内容后调用 `bwrite` 直写到磁盘；
//! * 用完后丢弃 `Buf`（或调用 `release`），之后不能再访问它；
//! * 同一时刻只有一个持有者能使用某个缓冲区，因此不要长时间持有。

use core::mem::ManuallyDrop;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};

use array_macro::array;
use log::{debug, trace};

use crate::consts::fs::{BSIZE, HASH_TABLE_SIZE, NBUF};
use crate::cpu;
use crate::driver::BlockDevice;
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::{SpinLock, SpinLockGuard};

/// 缓冲区缓存。
///
/// `Bcache` 提供了一个固定大小的内存缓冲区池，用于缓存磁盘块数据，
/// 以减少重复的磁盘访问。未命中时按“最早释放者优先”的策略回收一个
/// 未被引用的缓冲块。存储驱动 `D` 负责实际的块传输。
///
/// 该结构通常作为内核中的静态变量存在：
/// ```ignore
/// static BCACHE: Bcache<VirtioDisk> = Bcache::new(VirtioDisk::new());
/// ```
pub struct Bcache<D> {
    disk: D,

    /// 哈希索引：键的哈希值 -> 缓冲块下标。
    index: BufIndex,

    /// 每个缓冲块的簿记信息，各自由一把自旋锁保护。
    ctrl: [SpinLock<BufCtrl>; NBUF],

    /// 缓冲块的数据部分，与 `ctrl` 按下标一一对应。
    bufs: [BufInner; NBUF],

    /// `pin` / `unpin` 使用的粗粒度锁，只会在不持有任何槽位锁时获取。
    pin_lock: SpinLock<()>,

    stats: Stats,
}

impl<D: BlockDevice> Bcache<D> {
    pub const fn new(disk: D) -> Self {
        Self {
            disk,
            index: BufIndex::new(),
            ctrl: array![_ => SpinLock::new(BufCtrl::new(), "bcache"); NBUF],
            bufs: array![_ => BufInner::new(); NBUF],
            pin_lock: SpinLock::new((), "bcache.pin"),
            stats: Stats::new(),
        }
    }

    /// 缓存使用的块设备。
    pub fn disk(&self) -> &D {
        &self.disk
    }

    /// 获取指定设备与块号对应的缓冲块，返回时已持有其独占锁。
    ///
    /// # 功能说明
    /// 若缓存命中，则增加引用计数后等待独占锁；否则回收一个未被引用、
    /// 释放时间最早的缓冲块，改写其键并标记内容无效。
    /// 本函数不进行磁盘读写，调用者需通过 `read_through` 保证内容有效。
    ///
    /// # 流程解释
    /// - 读取哈希索引：
    ///   - 若指向的槽位确实缓存着该块：引用计数加一，释放槽位锁，等待睡眠锁；
    ///   - 若指向的槽位缓存着另一个块且仍占据该索引：两个不同的块哈希到同一位置，panic；
    ///   - 若槽位在读取索引后被回收：重新查找；
    /// - 未命中时调用 `find_evictee` 得到一个仍被锁住的候选槽位，
    ///   通过比较交换占据索引。若被别的执行流抢先，放弃候选槽位并重新查找，
    ///   这样同一个块不会同时出现在两个槽位中。
    ///
    /// # 可能的错误
    /// - 所有缓冲块都被引用时 panic（`"bget: no buffers"`）；
    /// - 哈希冲突时 panic（`"bget: hash conflict"`）。
    pub fn bget(&self, dev: u32, blockno: u32) -> Buf<'_, D> {
        let key = hash(dev, blockno);

        loop {
            if let Some(bindex) = self.index.get(key) {
                match self.lookup(key, bindex, dev, blockno) {
                    Some(buf) => return buf,
                    None => continue,
                }
            }

            // 未缓存，回收释放最早的未引用缓冲块
            let (bindex, ctrl) = self.find_evictee();
            if let Some(buf) = self.install(key, bindex, ctrl, dev, blockno) {
                return buf;
            }
        }
    }

    /// 哈希索引指向 `bindex` 时的命中路径。
    ///
    /// 槽位在读取索引之后被回收时返回 `None`，调用者应重新查找。
    fn lookup(&self, key: usize, bindex: usize, dev: u32, blockno: u32) -> Option<Buf<'_, D>> {
        let mut ctrl = self.ctrl[bindex].lock();
        if ctrl.key == Some((dev, blockno)) {
            ctrl.refcnt += 1;
            drop(ctrl);
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            trace!("bget: hit dev {} blockno {} in buf {}", dev, blockno, bindex);
            return Some(self.lock_buf(bindex, dev, blockno));
        }
        if self.index.get(key) == Some(bindex) {
            panic!(
                "bget: hash conflict between {:?} and ({}, {})",
                ctrl.key, dev, blockno
            );
        }
        None
    }

    /// 把 `(dev, blockno)` 装入仍被锁住的候选槽位 `bindex`。
    ///
    /// 索引表项已被别的执行流占据时放弃候选槽位并返回 `None`，调用者应重新查找。
    fn install(
        &self,
        key: usize,
        bindex: usize,
        mut ctrl: SpinLockGuard<'_, BufCtrl>,
        dev: u32,
        blockno: u32,
    ) -> Option<Buf<'_, D>> {
        if self.index.claim(key, bindex).is_err() {
            return None;
        }
        if let Some((old_dev, old_blockno)) = ctrl.key.take() {
            self.index.release(hash(old_dev, old_blockno), bindex);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(
                "bget: evict ({}, {}) from buf {} for ({}, {})",
                old_dev, old_blockno, bindex, dev, blockno
            );
        }
        ctrl.key = Some((dev, blockno));
        ctrl.refcnt = 1;
        // 引用计数为零说明没有持有者或等待者，可以直接作废内容
        self.bufs[bindex].valid.store(false, Ordering::Release);
        drop(ctrl);
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        Some(self.lock_buf(bindex, dev, blockno))
    }

    /// 从缓冲区缓存中读取指定块，必要时从磁盘读入。
    pub fn bread(&self, dev: u32, blockno: u32) -> Buf<'_, D> {
        let mut b = self.bget(dev, blockno);
        b.read_through();
        b
    }

    /// 当前缓存着 `(dev, blockno)` 的缓冲块下标，不增加引用。
    ///
    /// 返回值只是一个快照，调用者不能据此跳过 `bget`。
    pub fn cached(&self, dev: u32, blockno: u32) -> Option<usize> {
        let bindex = self.index.get(hash(dev, blockno))?;
        let ctrl = self.ctrl[bindex].lock();
        if ctrl.key == Some((dev, blockno)) {
            Some(bindex)
        } else {
            None
        }
    }

    /// 命中、未命中与回收次数的快照。
    pub fn stats(&self) -> BcacheStats {
        BcacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }

    fn lock_buf(&self, index: usize, dev: u32, blockno: u32) -> Buf<'_, D> {
        let data = self.bufs[index].data.lock();
        Buf {
            cache: self,
            index,
            dev,
            blockno,
            data: ManuallyDrop::new(data),
        }
    }

    /// 在所有缓冲块中选出一个未被引用、释放时间戳最小的，返回时仍持有它的槽位锁。
    ///
    /// # 流程解释
    /// 按下标顺序扫描一遍：跳过引用计数非零的槽位；遇到更早（或同样早）释放的槽位时，
    /// 先放开旧候选者的锁再保留新候选者的锁。扫描中最多同时持有两把槽位锁，
    /// 且总按下标递增的顺序获取，因此多个扫描者之间不会死锁。
    /// 时间戳相同时下标较大者胜出。
    ///
    /// 返回时锁仍被持有，在选中与改写之间没有其他执行流能抢走该槽位。
    fn find_evictee(&self) -> (usize, SpinLockGuard<'_, BufCtrl>) {
        let mut best: Option<(usize, SpinLockGuard<'_, BufCtrl>)> = None;

        for (i, slot) in self.ctrl.iter().enumerate() {
            let ctrl = slot.lock();
            if ctrl.refcnt != 0 {
                continue;
            }
            let better = match &best {
                Some((_, b)) => ctrl.timestamp <= b.timestamp,
                None => true,
            };
            if better {
                if let Some((_, old)) = best.take() {
                    drop(old);
                }
                best = Some((i, ctrl));
            }
        }

        match best {
            Some(victim) => victim,
            None => panic!("bget: no buffers"),
        }
    }

    /// 释放一次引用，引用计数归零时记录释放时间。
    fn brelse(&self, index: usize) {
        let mut ctrl = self.ctrl[index].lock();
        if ctrl.refcnt == 0 {
            panic!("brelse: buf {} not referenced", index);
        }
        ctrl.refcnt -= 1;
        if ctrl.refcnt == 0 {
            ctrl.timestamp = cpu::ticks();
        }
    }

    fn bpin(&self, index: usize) {
        let guard = self.pin_lock.lock();
        let mut ctrl = self.ctrl[index].lock();
        ctrl.pins += 1;
        ctrl.refcnt += 1;
        drop(ctrl);
        drop(guard);
    }

    fn bunpin(&self, index: usize) {
        let guard = self.pin_lock.lock();
        let mut ctrl = self.ctrl[index].lock();
        // 等待者的引用不能拿来抵消一次没有发生过的 pin
        if ctrl.pins == 0 {
            panic!("bunpin: buf {} not pinned", index);
        }
        ctrl.pins -= 1;
        ctrl.refcnt -= 1;
        drop(ctrl);
        drop(guard);
    }
}

/// 缓存统计信息
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BcacheStats {
    pub hits: usize,
    pub misses: usize,
    pub evictions: usize,
}

struct Stats {
    hits: AtomicUsize,
    misses: AtomicUsize,
    evictions: AtomicUsize,
}

impl Stats {
    const fn new() -> Self {
        Self {
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            evictions: AtomicUsize::new(0),
        }
    }
}

/// 已加锁的缓冲块句柄。
///
/// `Buf` 代表一个特定 `(dev, blockno)` 的缓冲区块，持有对其数据的独占访问权限，
/// 并在生命周期结束时先释放睡眠锁、再归还引用。
pub struct Buf<'a, D: BlockDevice> {
    cache: &'a Bcache<D>,

    /// 缓冲块在缓存中的下标
    index: usize,

    dev: u32,
    blockno: u32,

    /// 在 `Drop` 中先于 `brelse` 手动释放
    data: ManuallyDrop<SleepLockGuard<'a, BufData>>,
}

impl<'a, D: BlockDevice> Buf<'a, D> {
    pub fn read_dev(&self) -> u32 {
        self.dev
    }

    pub fn read_blockno(&self) -> u32 {
        self.blockno
    }

    /// 缓冲块在缓存中的下标。共享同一个键的两个句柄总是得到同一个下标。
    pub fn index(&self) -> usize {
        self.index
    }

    /// 内容是否已从磁盘读入（或由本缓存写出）。
    pub fn is_valid(&self) -> bool {
        self.cache.bufs[self.index].valid.load(Ordering::Acquire)
    }

    /// 若内容无效则从磁盘读入，并标记为有效。
    ///
    /// 读入期间一直持有独占锁，同一块的并发请求者只会看到一次磁盘传输。
    pub fn read_through(&mut self) {
        let inner = &self.cache.bufs[self.index];
        if !inner.valid.load(Ordering::Acquire) {
            self.cache
                .disk
                .rw(self.dev, self.blockno, &mut **self.data, false);
            inner.valid.store(true, Ordering::Release);
        }
    }

    /// 将缓冲区内容直写到磁盘。
    pub fn bwrite(&mut self) {
        self.cache
            .disk
            .rw(self.dev, self.blockno, &mut **self.data, true);
        // 写出后磁盘与缓存一致
        self.cache.bufs[self.index]
            .valid
            .store(true, Ordering::Release);
    }

    /// 增加引用计数，使该块在句柄释放后仍驻留在缓存中。需与 `unpin` 配对。
    pub fn pin(&self) {
        self.cache.bpin(self.index);
    }

    /// 撤销一次 `pin`。
    ///
    /// # 可能的错误
    /// 该块没有尚未撤销的 pin 时 panic，即使此时还有其他等待者持有引用。
    pub fn unpin(&self) {
        self.cache.bunpin(self.index);
    }

    pub fn data(&self) -> &[u8; BSIZE] {
        self.data.as_bytes()
    }

    pub fn data_mut(&mut self) -> &mut [u8; BSIZE] {
        self.data.as_bytes_mut()
    }

    /// 显式释放，等价于丢弃句柄。
    pub fn release(self) {}
}

impl<'a, D: BlockDevice> Drop for Buf<'a, D> {
    fn drop(&mut self) {
        // 安全性：data 只在这里被释放一次，之后不再访问
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.cache.brelse(self.index);
    }
}

/// 缓冲块的簿记信息，由所在槽位的自旋锁保护。
struct BufCtrl {
    /// 缓存的块，`None` 表示从未使用过
    key: Option<(u32, u32)>,

    /// 持有者、等待者与 pin 的总数，为 0 时才能被回收
    refcnt: usize,

    /// 尚未撤销的 pin 次数，总不大于 `refcnt`
    pins: usize,

    /// 引用计数最后一次归零时的逻辑时间
    timestamp: usize,
}

impl BufCtrl {
    const fn new() -> Self {
        Self {
            key: None,
            refcnt: 0,
            pins: 0,
            timestamp: 0,
        }
    }
}

/// 缓冲块的数据部分及其有效性标志。
///
/// `valid` 在持有槽位自旋锁（且引用计数为零）或持有 `data` 睡眠锁时才会被修改。
struct BufInner {
    valid: AtomicBool,
    data: SleepLock<BufData>,
}

impl BufInner {
    const fn new() -> Self {
        Self {
            valid: AtomicBool::new(false),
            data: SleepLock::new(BufData::new(), "buffer"),
        }
    }
}

/// BufData 的对齐方式应足以满足可能由此结构体转换而来的其他结构体的需求。
#[repr(C, align(8))]
pub struct BufData([u8; BSIZE]);

impl BufData {
    pub const fn new() -> Self {
        Self([0; BSIZE])
    }

    pub fn as_bytes(&self) -> &[u8; BSIZE] {
        &self.0
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; BSIZE] {
        &mut self.0
    }
}

impl Default for BufData {
    fn default() -> Self {
        Self::new()
    }
}

const EMPTY: u16 = u16::MAX;
const _: () = assert!(NBUF < EMPTY as usize);

/// 哈希索引。
///
/// 每个表项要么为空，要么是占据它的缓冲块下标。表项只由持有该缓冲块槽位锁的
/// 执行流修改，因此持有槽位锁时看到“表项指向本槽位”，就说明本槽位缓存的块
/// 确实哈希到这个位置。
struct BufIndex {
    slots: [AtomicU16; HASH_TABLE_SIZE],
}

impl BufIndex {
    const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const VACANT: AtomicU16 = AtomicU16::new(EMPTY);
        Self {
            slots: [VACANT; HASH_TABLE_SIZE],
        }
    }

    #[inline]
    fn get(&self, key: usize) -> Option<usize> {
        match self.slots[key].load(Ordering::Acquire) {
            EMPTY => None,
            bindex => Some(bindex as usize),
        }
    }

    /// 让 `bindex` 占据空表项 `key`，表项已被占据时返回当前占据者。
    fn claim(&self, key: usize, bindex: usize) -> Result<(), usize> {
        self.slots[key]
            .compare_exchange(EMPTY, bindex as u16, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|cur| cur as usize)
    }

    /// 清空 `bindex` 占据的表项 `key`。
    fn release(&self, key: usize, bindex: usize) {
        if self.slots[key]
            .compare_exchange(bindex as u16, EMPTY, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            panic!("bcache: index {} not owned by buf {}", key, bindex);
        }
    }
}

#[inline]
fn hash(dev: u32, blockno: u32) -> usize {
    let m = HASH_TABLE_SIZE as u64;
    // 先各自取模，乘积不会溢出
    let d = (dev as u64 + 7) % m;
    let b = (blockno as u64 + 11) % m;
    ((d * b + 57) % m) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RamDisk;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::AtomicBool;
    use std::sync::{mpsc, Barrier};
    use std::thread;
    use std::time::Duration;
    use std::vec::Vec;

    /// 读传输前故意停顿，扩大并发窗口
    struct SlowDisk(RamDisk);

    impl BlockDevice for SlowDisk {
        fn rw(&self, dev: u32, blockno: u32, data: &mut BufData, writing: bool) {
            thread::sleep(Duration::from_millis(20));
            self.0.rw(dev, blockno, data, writing);
        }
    }

    fn refcnt<D: BlockDevice>(cache: &Bcache<D>, index: usize) -> usize {
        cache.ctrl[index].lock().refcnt
    }

    #[test]
    fn hash_matches_table_layout() {
        assert_eq!(hash(1, 0), 145);
        assert_eq!(hash(0, 9364), 145);
        assert!(hash(u32::MAX, u32::MAX) < HASH_TABLE_SIZE);
    }

    #[test]
    fn first_bget_misses_then_read_through_validates() {
        static CACHE: Bcache<RamDisk> = Bcache::new(RamDisk::new());

        let mut b = CACHE.bget(1, 5);
        assert!(!b.is_valid());
        b.read_through();
        assert!(b.is_valid());
        assert_eq!(CACHE.disk().reads(), 1);
        let first = b.index();
        b.release();

        let b = CACHE.bread(1, 5);
        assert!(b.is_valid());
        assert_eq!(b.index(), first);
        assert_eq!(CACHE.disk().reads(), 1);
        drop(b);

        assert_eq!(
            CACHE.stats(),
            BcacheStats { hits: 1, misses: 1, evictions: 0 }
        );
    }

    #[test]
    fn second_bget_blocks_until_release() {
        static CACHE: Bcache<RamDisk> = Bcache::new(RamDisk::new());

        let mut first = CACHE.bread(1, 5);
        first.data_mut()[0] = 0xaa;
        let got = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel();

        thread::scope(|s| {
            let got = &got;
            s.spawn(move || {
                let b = CACHE.bget(1, 5);
                got.store(true, Ordering::SeqCst);
                tx.send((b.index(), b.data()[0], b.is_valid())).unwrap();
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!got.load(Ordering::SeqCst));
            assert_eq!(refcnt(&CACHE, first.index()), 2);
            let index = first.index();
            drop(first);

            let (other, byte, valid) = rx.recv().unwrap();
            assert_eq!(other, index);
            assert_eq!(byte, 0xaa);
            assert!(valid);
        });
        assert!(got.load(Ordering::SeqCst));
    }

    #[test]
    fn evicts_earliest_released() {
        static CACHE: Bcache<RamDisk> = Bcache::new(RamDisk::new());

        for blockno in 0..NBUF as u32 {
            drop(CACHE.bread(1, blockno));
        }
        let a = CACHE.cached(1, 0).unwrap();
        let b = CACHE.cached(1, 1).unwrap();

        let c = CACHE.bget(1, 1000);
        assert_eq!(c.index(), a);
        drop(c);
        assert_eq!(CACHE.cached(1, 0), None);
        assert_eq!(CACHE.cached(1, 1), Some(b));

        let d = CACHE.bget(1, 1001);
        assert_eq!(d.index(), b);
        assert_eq!(CACHE.stats().evictions, 2);
    }

    #[test]
    fn unused_slots_tie_towards_the_last_one() {
        static CACHE: Bcache<RamDisk> = Bcache::new(RamDisk::new());

        let b = CACHE.bget(2, 1);
        assert_eq!(b.index(), NBUF - 1);
        let c = CACHE.bget(2, 2);
        assert_eq!(c.index(), NBUF - 2);
    }

    #[test]
    fn held_buffer_is_never_evicted() {
        static CACHE: Bcache<RamDisk> = Bcache::new(RamDisk::new());

        let mut held = CACHE.bread(1, 0);
        held.data_mut()[0] = 7;
        for blockno in 1..(3 * NBUF as u32) {
            let b = CACHE.bread(1, blockno);
            assert_ne!(b.index(), held.index());
        }
        assert_eq!(CACHE.cached(1, 0), Some(held.index()));
        assert_eq!(held.data()[0], 7);
        assert_eq!(refcnt(&CACHE, held.index()), 1);
    }

    #[test]
    fn pinned_buffer_survives_release() {
        static CACHE: Bcache<RamDisk> = Bcache::new(RamDisk::new());

        let b = CACHE.bread(3, 0);
        let index = b.index();
        b.pin();
        drop(b);
        assert_eq!(refcnt(&CACHE, index), 1);

        for blockno in 1..(2 * NBUF as u32) {
            drop(CACHE.bread(3, blockno));
        }
        assert_eq!(CACHE.cached(3, 0), Some(index));

        let b = CACHE.bget(3, 0);
        assert!(b.is_valid());
        b.unpin();
        drop(b);
        assert_eq!(refcnt(&CACHE, index), 0);

        for blockno in 100..(100 + NBUF as u32) {
            drop(CACHE.bread(3, blockno));
        }
        assert_eq!(CACHE.cached(3, 0), None);
    }

    #[test]
    #[should_panic(expected = "bunpin")]
    fn unpin_without_pin() {
        static CACHE: Bcache<RamDisk> = Bcache::new(RamDisk::new());
        let b = CACHE.bread(1, 1);
        b.unpin();
    }

    #[test]
    fn unpin_without_pin_is_caught_while_others_wait() {
        static CACHE: Bcache<RamDisk> = Bcache::new(RamDisk::new());

        let holder = CACHE.bread(1, 1);
        let index = holder.index();
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                let b = CACHE.bget(1, 1);
                refcnt(&CACHE, b.index())
            });
            while refcnt(&CACHE, index) < 2 {
                thread::yield_now();
            }

            // 等待者的引用不能被当作 pin 抵消
            let unpinned = panic::catch_unwind(AssertUnwindSafe(|| holder.unpin()));
            assert!(unpinned.is_err());
            assert_eq!(refcnt(&CACHE, index), 2);

            drop(holder);
            assert_eq!(waiter.join().unwrap(), 1);
        });
        assert_eq!(refcnt(&CACHE, index), 0);
    }

    #[test]
    fn stale_index_read_retries_as_miss() {
        static CACHE: Bcache<RamDisk> = Bcache::new(RamDisk::new());

        drop(CACHE.bread(1, 0));
        let key = hash(1, 0);
        let old = CACHE.index.get(key).unwrap();
        for blockno in 1..=NBUF as u32 {
            drop(CACHE.bread(1, blockno));
        }
        assert_eq!(CACHE.index.get(key), None);
        assert_ne!(CACHE.ctrl[old].lock().key, Some((1, 0)));

        // 读到旧下标后槽位已被改装：既不是命中，也不是哈希冲突
        assert!(CACHE.lookup(key, old, 1, 0).is_none());

        let before = CACHE.stats();
        let b = CACHE.bget(1, 0);
        assert_ne!(b.index(), old);
        let after = CACHE.stats();
        assert_eq!(after.misses, before.misses + 1);
        assert_eq!(after.hits, before.hits);
    }

    #[test]
    fn lost_index_claim_retries_as_hit() {
        static CACHE: Bcache<RamDisk> = Bcache::new(RamDisk::new());

        let winner = CACHE.bget(2, 7).index();

        // 候选槽位选好之后，索引已被另一个执行流占据
        let (victim, ctrl) = CACHE.find_evictee();
        assert_ne!(victim, winner);
        assert!(CACHE.install(hash(2, 7), victim, ctrl, 2, 7).is_none());
        {
            let ctrl = CACHE.ctrl[victim].lock();
            assert_eq!(ctrl.key, None);
            assert_eq!(ctrl.refcnt, 0);
        }

        let b = CACHE.bget(2, 7);
        assert_eq!(b.index(), winner);
        assert_eq!(
            CACHE.stats(),
            BcacheStats { hits: 1, misses: 1, evictions: 0 }
        );
    }

    #[test]
    fn bwrite_writes_through() {
        static CACHE: Bcache<RamDisk> = Bcache::new(RamDisk::new());

        let mut b = CACHE.bread(4, 2);
        b.data_mut()[0] = 99;
        assert_eq!(CACHE.disk().peek(4, 2), None);
        b.bwrite();
        assert_eq!(CACHE.disk().peek(4, 2), Some(99));
        assert_eq!(CACHE.disk().writes(), 1);
    }

    #[test]
    #[should_panic(expected = "bget: no buffers")]
    fn exhaustion_is_fatal() {
        static CACHE: Bcache<RamDisk> = Bcache::new(RamDisk::new());

        let held: Vec<_> = (0..NBUF as u32).map(|n| CACHE.bget(1, n)).collect();
        assert_eq!(held.len(), NBUF);
        let _ = CACHE.bget(1, NBUF as u32);
    }

    #[test]
    #[should_panic(expected = "bget: hash conflict")]
    fn colliding_keys_are_fatal() {
        static CACHE: Bcache<RamDisk> = Bcache::new(RamDisk::new());

        drop(CACHE.bread(0, 9364));
        drop(CACHE.bread(1, 0));
    }

    #[test]
    fn concurrent_miss_reads_disk_once() {
        static CACHE: Bcache<SlowDisk> = Bcache::new(SlowDisk(RamDisk::new()));

        let mut seed = BufData::new();
        seed.as_bytes_mut()[0] = 77;
        CACHE.disk().0.rw(5, 9, &mut seed, true);

        let barrier = Barrier::new(8);
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait();
                    let b = CACHE.bread(5, 9);
                    assert!(b.is_valid());
                    assert_eq!(b.data()[0], 77);
                });
            }
        });

        assert_eq!(CACHE.disk().0.reads(), 1);
        let stats = CACHE.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 7);
        let index = CACHE.cached(5, 9).unwrap();
        assert_eq!(refcnt(&CACHE, index), 0);
    }

    #[test]
    fn exclusive_lock_serializes_updates() {
        static CACHE: Bcache<RamDisk> = Bcache::new(RamDisk::new());

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..100 {
                        let mut b = CACHE.bread(6, 1);
                        let v = b.data()[0];
                        thread::yield_now();
                        b.data_mut()[0] = v.wrapping_add(1);
                        b.bwrite();
                    }
                });
            }
        });

        assert_eq!(CACHE.disk().peek(6, 1), Some(400u32 as u8));
        assert_eq!(CACHE.bread(6, 1).data()[0], 400u32 as u8);
    }

    #[test]
    fn distinct_blocks_in_parallel() {
        static CACHE: Bcache<RamDisk> = Bcache::new(RamDisk::new());

        thread::scope(|s| {
            for t in 0..4u32 {
                s.spawn(move || {
                    for round in 0..50u32 {
                        let blockno = t * 1000 + round % 10;
                        let mut b = CACHE.bread(7, blockno);
                        b.data_mut()[0] = t as u8;
                        b.bwrite();
                    }
                });
            }
        });

        for t in 0..4u32 {
            for n in 0..10 {
                assert_eq!(CACHE.disk().peek(7, t * 1000 + n), Some(t as u8));
            }
        }
        for index in 0..NBUF {
            assert_eq!(refcnt(&CACHE, index), 0);
        }
    }
}
