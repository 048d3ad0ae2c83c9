//! 宿主环境下的硬件线程模拟
//!
//! 每个操作系统线程被视为一个 hart。线程第一次询问编号时会得到一个不小于
//! `NCPU` 的编号，因此不会与任何空闲页池对应；需要以某个 CPU 身份运行的线程
//! 应先调用 [`bind`]。

use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread_local;

use super::{Cpu, Hart};
use crate::consts::NCPU;
use crate::spinlock::SpinLockGuard;

/// 宿主环境的默认平台实例。
pub static HOSTED: Hosted = Hosted::new();

thread_local! {
    static CPU_ID: Cell<Option<usize>> = const { Cell::new(None) };
    static CPU: RefCell<Cpu> = const { RefCell::new(Cpu::new()) };
    static INTR: Cell<bool> = const { Cell::new(true) };
}

/// 将当前线程绑定为编号 `id` 的 CPU。
///
/// 同一时刻应只有一个线程以某个编号运行，这与真实硬件上一个 hart 同时只执行一条控制流一致。
pub fn bind(id: usize) {
    if CPU.with(|c| c.borrow().noff()) != 0 {
        panic!("bind: interrupts disabled");
    }
    CPU_ID.with(|c| c.set(Some(id)));
}

/// 以线程模拟 hart 的平台实现。
///
/// 睡眠/唤醒使用一个全局条件变量，不区分 `chan`：被唤醒者总会重新检查自己的等待条件。
pub struct Hosted {
    chan: Mutex<()>,
    cond: Condvar,
    ticks: AtomicUsize,
    next_id: AtomicUsize,
}

impl Hosted {
    const fn new() -> Self {
        Self {
            chan: Mutex::new(()),
            cond: Condvar::new(),
            ticks: AtomicUsize::new(0),
            next_id: AtomicUsize::new(NCPU),
        }
    }
}

impl Hart for Hosted {
    fn cpu_id(&self) -> usize {
        CPU_ID.with(|c| match c.get() {
            Some(id) => id,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                c.set(Some(id));
                id
            }
        })
    }

    fn push_off(&self) {
        let old = INTR.with(|i| i.replace(false));
        CPU.with(|c| c.borrow_mut().push_off(old));
    }

    fn pop_off(&self) {
        let intr_on = INTR.with(|i| i.get());
        if CPU.with(|c| c.borrow_mut().pop_off(intr_on)) {
            INTR.with(|i| i.set(true));
        }
    }

    fn sleep(&self, _chan: usize, guard: SpinLockGuard<'_, ()>) {
        // 先持有条件变量的互斥锁再释放 guard，唤醒者必须拿到同一把锁才能通知
        let waiting = self.chan.lock().unwrap_or_else(PoisonError::into_inner);
        drop(guard);
        let _waiting = self
            .cond
            .wait(waiting)
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn wakeup(&self, _chan: usize) {
        let _waiting = self.chan.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }

    fn ticks(&self) -> usize {
        self.ticks.fetch_add(1, Ordering::SeqCst) + 1
    }
}
