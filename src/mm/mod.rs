//! 内存管理模块：物理地址与按 CPU 划分的物理页分配器

pub use addr::{Addr, PhysAddr};
pub use kalloc::Kmem;

mod addr;
pub mod kalloc;
mod list;
