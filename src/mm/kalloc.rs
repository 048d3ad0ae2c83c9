//! 物理页分配器，每个 CPU 一个空闲页池
//!
//! 分配与释放只操作当前 CPU 自己的池，不同 CPU 之间互不竞争。
//! 某个 CPU 的池空了时，从空闲页最多的 CPU 那里偷走一半。

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use array_macro::array;
use log::{debug, info, trace};

use super::addr::{Addr, PhysAddr};
use super::list::RunList;
use crate::consts::mm::{JUNK_ALLOC, JUNK_FREE, PGSIZE};
use crate::consts::NCPU;
use crate::cpu::{cpu_id, pop_off, push_off};
use crate::spinlock::{SpinLock, SpinLockGuard};

/// 按 CPU 划分空闲池的物理页分配器。
///
/// 不变式：所有池中的空闲页数加上尚未释放的已分配页数，恒等于 `kinit` 时纳入管理的页数。
///
/// 通常作为内核中的静态变量存在，在启动早期由主核调用一次 [`Kmem::kinit`]：
/// ```ignore
/// static KMEM: Kmem = Kmem::new();
/// unsafe { KMEM.kinit(end as usize, PHYSTOP) };
/// ```
pub struct Kmem {
    /// 每个 CPU 的空闲页链表，各自由一把自旋锁保护
    pools: [SpinLock<RunList>; NCPU],

    /// 管理范围 `[base, end)`
    base: AtomicUsize,
    end: AtomicUsize,

    npages: AtomicUsize,
    steals: AtomicUsize,
    initialized: AtomicBool,
}

impl Kmem {
    pub const fn new() -> Self {
        Self {
            pools: array![_ => SpinLock::new(RunList::new(), "kmem"); NCPU],
            base: AtomicUsize::new(0),
            end: AtomicUsize::new(0),
            npages: AtomicUsize::new(0),
            steals: AtomicUsize::new(0),
            initialized: AtomicBool::new(false),
        }
    }

    /// 初始化分配器，将 `[start, end)` 中的每一整页交给它管理。
    ///
    /// # 功能说明
    /// 起始地址向上取整到页边界，随后逐页调用 `kfree`，因此所有页最初都进入
    /// 调用者所在 CPU 的空闲池，其他 CPU 只能通过窃取获得空闲页。
    ///
    /// # 可能的错误
    /// 重复初始化会 panic。
    ///
    /// # 安全性
    /// - `[start, end)` 必须是可写、且不再被任何人使用的物理内存；
    /// - 此后这段内存的所有权归分配器所有。
    pub unsafe fn kinit(&self, start: usize, end: usize) {
        if self.initialized.swap(true, Ordering::AcqRel) {
            panic!("kinit: init twice");
        }

        let mut pa = PhysAddr::from_raw(start);
        pa.pg_round_up();
        self.base.store(pa.as_usize(), Ordering::Release);
        self.end.store(end, Ordering::Release);

        #[cfg(feature = "verbose_init_info")]
        info!("kmem: available physical memory [{:#x}, {:#x})", pa.as_usize(), end);

        let mut n = 0;
        while pa.as_usize() + PGSIZE <= end {
            self.kfree(pa);
            pa.add_page();
            n += 1;
        }
        self.npages.store(n, Ordering::Release);

        info!("kmem: {} pages seeded", n);
    }

    /// 分配一页物理内存。
    ///
    /// # 流程解释
    /// 1. 关中断以固定当前 CPU，从自己的池中弹出一页；
    /// 2. 若池为空，放开自己的锁后尝试从最富有的 CPU 窃取一次，再重试弹出一次；
    /// 3. 返回前用垃圾字节填满整页。
    ///
    /// # 返回值
    /// - `Some(pa)`: 分配到的页
    /// - `None`: 所有 CPU 都没有空闲页
    ///
    /// # 可能的错误
    /// 当前 CPU 编号不小于 `NCPU` 时 panic。宿主环境下未调用
    /// `cpu::hosted::bind` 的线程会得到这样的编号，`kfree` 同理。
    pub fn kalloc(&self) -> Option<PhysAddr> {
        push_off();
        let id = cpu_id();
        let pool = self.pool(id);

        let mut raw = pool.lock().pop();
        if raw.is_none() {
            self.steal(id);
            raw = pool.lock().pop();
        }
        pop_off();

        let raw = raw?;
        // 安全性：该页刚从空闲链表中取出，只属于调用者
        unsafe { ptr::write_bytes(raw as *mut u8, JUNK_ALLOC, PGSIZE) };
        trace!("kalloc: cpu {} -> {:#x}", id, raw);
        Some(unsafe { PhysAddr::from_raw(raw) })
    }

    /// 释放一页物理内存，放入**当前** CPU 的空闲池，而不是分配它的 CPU 的池。
    ///
    /// # 可能的错误
    /// `pa` 未页对齐或不在管理范围内时 panic。
    ///
    /// # 安全性
    /// - `pa` 应当由 `kalloc` 返回（或处于 `kinit` 期间），且每页只释放一次；
    /// - 释放后调用者不得再访问该页。
    pub unsafe fn kfree(&self, pa: PhysAddr) {
        let raw = pa.as_usize();
        if !pa.is_page_aligned()
            || raw < self.base.load(Ordering::Acquire)
            || raw + PGSIZE > self.end.load(Ordering::Acquire)
        {
            panic!("kfree: bad page {:#x}", raw);
        }

        // 填入垃圾字节，便于发现悬垂引用
        ptr::write_bytes(raw as *mut u8, JUNK_FREE, PGSIZE);

        push_off();
        let id = cpu_id();
        self.pool(id).lock().push(raw);
        pop_off();
    }

    /// 管理的总页数
    pub fn npages(&self) -> usize {
        self.npages.load(Ordering::Acquire)
    }

    /// 编号为 `cpu` 的空闲池当前的页数
    pub fn nfree(&self, cpu: usize) -> usize {
        self.pool(cpu).lock().len()
    }

    /// 所有空闲池的页数之和。逐个加锁统计，并发时只是近似值。
    pub fn total_free(&self) -> usize {
        self.pools.iter().map(|p| p.lock().len()).sum()
    }

    /// 成功窃取的次数
    pub fn steals(&self) -> usize {
        self.steals.load(Ordering::Relaxed)
    }

    fn pool(&self, cpu: usize) -> &SpinLock<RunList> {
        match self.pools.get(cpu) {
            Some(pool) => pool,
            None => panic!(
                "kmem: cpu {} has no pool (NCPU = {}), hosted threads must bind a cpu first",
                cpu, NCPU
            ),
        }
    }

    /// 为 `thief` 补充空闲页，返回偷到的页数。
    fn steal(&self, thief: usize) -> usize {
        match self.richest(thief) {
            Some(victim) => self.steal_from(thief, victim),
            None => 0,
        }
    }

    /// 找出除 `me` 以外空闲页最多的 CPU，页数相同时取编号最小者；都为空时返回 `None`。
    ///
    /// 按编号递增的顺序同时持有其他所有池的锁，得到一份一致的快照。
    /// 调用者不得持有任何池的锁。
    fn richest(&self, me: usize) -> Option<usize> {
        let guards: [Option<SpinLockGuard<'_, RunList>>; NCPU] =
            array![i => if i == me { None } else { Some(self.pools[i].lock()) }; NCPU];

        let mut max = 0;
        let mut richest = None;
        for (i, guard) in guards.iter().enumerate() {
            if let Some(pool) = guard {
                if pool.len() > max {
                    max = pool.len();
                    richest = Some(i);
                }
            }
        }
        drop(guards);

        richest
    }

    /// 把 `victim` 空闲链表的前一半（向上取整）移到 `thief` 的池中，返回移动的页数。
    ///
    /// # 流程解释
    /// 1. 按 CPU 编号递增的顺序获取两个池的锁；
    /// 2. 重新检查受害者的页数，它在 `richest` 放锁之后可能已被取空，此时返回 0；
    /// 3. 在中点拆分受害者的链表并整体接到窃取者的池上。
    ///
    /// # 可能的错误
    /// - `thief == victim` 时 panic；
    /// - 窃取者的池非空时 panic：每个 CPU 同时只会有一次进行中的窃取，
    ///   且只在自己的池为空时发起。
    fn steal_from(&self, thief: usize, victim: usize) -> usize {
        if thief == victim {
            panic!("stealfrom: self");
        }

        let (low, high) = if thief < victim {
            (thief, victim)
        } else {
            (victim, thief)
        };
        let mut low = self.pool(low).lock();
        let mut high = self.pool(high).lock();
        let (mine, theirs) = if thief < victim {
            (&mut *low, &mut *high)
        } else {
            (&mut *high, &mut *low)
        };

        if theirs.is_empty() {
            #[cfg(feature = "kernel_warning")]
            log::warn!("stealfrom: cpu {} drained before cpu {} got there", victim, thief);
            return 0;
        }
        if !mine.is_empty() {
            panic!("stealfrom: thief pool not empty");
        }

        let n = (theirs.len() + 1) / 2;
        mine.adopt(theirs.split_front(n));
        self.steals.fetch_add(1, Ordering::Relaxed);
        debug!(
            "stealfrom: cpu {} took {} pages from cpu {}, {} left",
            thief,
            n,
            victim,
            theirs.len()
        );
        n
    }
}

impl Default for Kmem {
    fn default() -> Self {
        Self::new()
    }
}
