//! 睡眠锁模块
//! 提供基于睡眠/唤醒机制的同步原语，适用于可能长时间持有的锁。
//!
//! 当锁被占用时，尝试获取锁的执行流会让出处理器，避免忙等待。
//! 缓冲区缓存用它作为每个缓冲块的独占锁，持有期间可以进行磁盘传输。

use core::cell::{Cell, UnsafeCell};
use core::ops::{Deref, DerefMut, Drop};

use crate::cpu;
use crate::spinlock::SpinLock;

/// 睡眠锁结构，提供阻塞式同步机制
///
/// # 字段说明
/// - `lock`: 内部自旋锁，保护`locked`状态的访问
/// - `locked`: 表示锁是否已被占用
/// - `name`: 锁的标识名称，用于调试
/// - `data`: 被保护的数据，通过`UnsafeCell`实现内部可变性
pub struct SleepLock<T: ?Sized> {
    lock: SpinLock<()>,
    locked: Cell<bool>,
    name: &'static str,
    data: UnsafeCell<T>,
}

// 为SleepLock实现Sync，允许跨线程共享（要求T是Send）
// `locked` 只在持有内部自旋锁时读写
unsafe impl<T: ?Sized + Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    /// 创建一个新的睡眠锁实例
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            lock: SpinLock::new((), "sleeplock"),
            locked: Cell::new(false),
            name,
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SleepLock<T> {
    /// 获取睡眠锁（可能阻塞）
    ///
    /// # 流程解释
    /// 1. 获取内部自旋锁保护临界区
    /// 2. 检查`locked`状态：
    ///   - 如果已锁定：在`locked`的地址上睡眠，被唤醒后重新检查
    ///   - 如果未锁定：设置`locked=true`
    /// 3. 释放内部自旋锁并返回守卫
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let mut guard = self.lock.lock();

        while self.locked.get() {
            cpu::sleep(self.chan(), guard);
            guard = self.lock.lock();
        }

        self.locked.set(true);
        drop(guard);

        SleepLockGuard {
            lock: self,
            data: unsafe { &mut *self.data.get() },
        }
    }

    /// 当前是否有持有者。结果只是一个瞬时快照。
    pub fn is_locked(&self) -> bool {
        let guard = self.lock.lock();
        let locked = self.locked.get();
        drop(guard);
        locked
    }

    /// 释放锁（内部方法，由守卫的Drop调用）
    ///
    /// 在持有内部自旋锁时清除`locked`并唤醒等待者，保证唤醒不会丢失。
    fn unlock(&self) {
        let guard = self.lock.lock();
        if !self.locked.get() {
            panic!("sleeplock {} release", self.name);
        }
        self.locked.set(false);
        cpu::wakeup(self.chan());
        drop(guard);
    }

    #[inline]
    fn chan(&self) -> usize {
        self.locked.as_ptr() as usize
    }
}

/// 睡眠锁守卫，提供对受保护数据的访问
///
/// 当守卫存在时，表示锁已被持有。
/// 守卫离开作用域时自动释放锁，确保锁的释放。
pub struct SleepLockGuard<'a, T: ?Sized> {
    lock: &'a SleepLock<T>,
    data: &'a mut T,
}

impl<'a, T: ?Sized> Deref for SleepLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &*self.data
    }
}

impl<'a, T: ?Sized> DerefMut for SleepLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.data
    }
}

impl<'a, T: ?Sized> Drop for SleepLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
