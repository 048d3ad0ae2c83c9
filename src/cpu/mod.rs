//! 处理器状态管理：当前 CPU 编号、中断开关嵌套、睡眠/唤醒与逻辑时钟
//!
//! 缓冲区缓存与物理页分配器并不关心进程与调度的实现，它们只通过 [`Hart`]
//! 向所在平台索取这几项能力。内核在启动早期调用 [`install`] 注册平台实现；
//! 宿主环境（`std` 特性或测试）下未注册时使用 [`hosted`] 中的线程模拟实现。

use core::ptr;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::spinlock::SpinLockGuard;

#[cfg(any(test, feature = "std"))]
pub mod hosted;

/// 平台为资源管理器提供的硬件线程（hart）接口。
///
/// # 约定
/// - `cpu_id` 在 `push_off` 与对应的 `pop_off` 之间必须保持不变；
/// - `sleep` 必须在释放 `guard` 之前登记等待，保证不会丢失随后对同一 `chan` 的 `wakeup`；
/// - `ticks` 单调不减。
pub trait Hart: Sync {
    /// 当前 CPU 的编号。
    fn cpu_id(&self) -> usize;

    /// 关闭中断并增加嵌套计数。
    fn push_off(&self);

    /// 减少嵌套计数，归零时恢复进入 `push_off` 前的中断状态。
    fn pop_off(&self);

    /// 原子地释放 `guard` 并让出处理器，直到有人对 `chan` 调用 `wakeup`（允许虚假唤醒）。
    fn sleep(&self, chan: usize, guard: SpinLockGuard<'_, ()>);

    /// 唤醒所有在 `chan` 上睡眠的执行流。
    fn wakeup(&self, chan: usize);

    /// 逻辑时钟的当前值。
    fn ticks(&self) -> usize;
}

const UNINIT: u8 = 0;
const INSTALLING: u8 = 1;
const READY: u8 = 2;

static STATE: AtomicU8 = AtomicU8::new(UNINIT);
static mut HART: Option<&'static dyn Hart> = None;

/// 注册平台的硬件线程实现。
///
/// 必须在任何核使用自旋锁之前、由单个核调用一次；重复注册会 panic。
pub fn install(hart: &'static dyn Hart) {
    if STATE
        .compare_exchange(UNINIT, INSTALLING, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        panic!("cpu: hart installed twice");
    }
    // 安全性：INSTALLING 状态保证只有当前调用者写入，读者在看到 READY 之前不会读取
    unsafe { ptr::addr_of_mut!(HART).write(Some(hart)) };
    STATE.store(READY, Ordering::Release);
}

fn hart() -> &'static dyn Hart {
    if STATE.load(Ordering::Acquire) == READY {
        // 安全性：READY 之后 HART 不再被写入
        if let Some(hart) = unsafe { ptr::addr_of!(HART).read() } {
            return hart;
        }
    }
    fallback()
}

#[cfg(any(test, feature = "std"))]
fn fallback() -> &'static dyn Hart {
    &hosted::HOSTED
}

#[cfg(not(any(test, feature = "std")))]
fn fallback() -> &'static dyn Hart {
    panic!("cpu: no hart installed");
}

/// 当前 CPU 的编号。
///
/// 调用者应当已经 `push_off`，否则返回值可能在使用前就因迁移而失效。
#[inline]
pub fn cpu_id() -> usize {
    hart().cpu_id()
}

/// 关闭中断，可嵌套，需与 [`pop_off`] 成对使用。
#[inline]
pub fn push_off() {
    hart().push_off();
}

/// 撤销一次 [`push_off`]。
#[inline]
pub fn pop_off() {
    hart().pop_off();
}

/// 释放 `guard` 并在 `chan` 上睡眠。
pub fn sleep(chan: usize, guard: SpinLockGuard<'_, ()>) {
    hart().sleep(chan, guard);
}

/// 唤醒在 `chan` 上睡眠的执行流。
pub fn wakeup(chan: usize) {
    hart().wakeup(chan);
}

/// 逻辑时钟。
#[inline]
pub fn ticks() -> usize {
    hart().ticks()
}

/// 单个 CPU 的中断嵌套状态。
///
/// 平台实现 `push_off` / `pop_off` 时可直接复用：
/// 每个 CPU（或宿主环境下的每个线程）持有一个 `Cpu`。
pub struct Cpu {
    /// 关闭中断的嵌套层数
    noff: u8,
    /// 最外层 `push_off` 之前中断是否开启
    intena: bool,
}

impl Cpu {
    pub const fn new() -> Self {
        Self {
            noff: 0,
            intena: false,
        }
    }

    /// 记录一次关中断。`old` 为关中断之前的中断使能状态。
    pub fn push_off(&mut self, old: bool) {
        if self.noff == 0 {
            self.intena = old;
        }
        self.noff += 1;
    }

    /// 撤销一次关中断。
    ///
    /// # 参数
    /// - `intr_on`: 调用时的中断使能状态，必须为关闭
    ///
    /// # 返回值
    /// 是否应当重新开启中断（嵌套归零且最外层之前为开启）。
    ///
    /// # 可能的错误
    /// - 中断处于开启状态时调用会 panic；
    /// - 调用次数多于 `push_off` 会 panic。
    pub fn pop_off(&mut self, intr_on: bool) -> bool {
        if intr_on {
            panic!("pop_off(): interruptable");
        }
        if self.noff.checked_sub(1).is_none() {
            panic!("pop_off(): count not match");
        }
        self.noff -= 1;
        self.noff == 0 && self.intena
    }

    #[inline]
    pub fn noff(&self) -> u8 {
        self.noff
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
