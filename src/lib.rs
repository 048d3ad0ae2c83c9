//! xv6 风格内核的两个共享资源管理器
//!
//! - [`fs::Bcache`]: 磁盘块缓冲区缓存，哈希索引加每槽位自旋锁，未命中时按最近最少使用淘汰；
//! - [`mm::Kmem`]: 物理页分配器，每个 CPU 一个空闲池，池空时从最富有的 CPU 窃取一半。
//!
//! 二者只通过 [`cpu::Hart`] 依赖平台（CPU 编号、关中断嵌套、睡眠/唤醒、逻辑时钟），
//! 通过 [`driver::BlockDevice`] 依赖磁盘驱动。

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(rust_2018_idioms)]

extern crate alloc;

pub mod consts;
pub mod cpu;
pub mod driver;
pub mod fs;
pub mod mm;
pub mod sleeplock;
pub mod spinlock;

pub use fs::{Bcache, Buf};
pub use mm::{Kmem, PhysAddr};
