//! 提供物理地址包装

use core::convert::TryFrom;
use core::fmt;

use bit_field::BitField;

use crate::consts::mm::{PGSHIFT, PGSIZE};

/// 地址类型通用接口
///
/// 定义页对齐调整、地址转换等操作。
pub trait Addr {
    /// 获取内部地址值的不可变引用
    fn data_ref(&self) -> &usize;

    /// 获取内部地址值的可变引用
    fn data_mut(&mut self) -> &mut usize;

    /// 向上取整到页边界
    #[inline]
    fn pg_round_up(&mut self) {
        *self.data_mut() = (*self.data_mut() + PGSIZE - 1) & !(PGSIZE - 1)
    }

    /// 向下取整到页边界
    #[inline]
    fn pg_round_down(&mut self) {
        *self.data_mut() = *self.data_mut() & !(PGSIZE - 1)
    }

    /// 增加一页大小（PGSIZE）
    ///
    /// # 注意
    /// 不检查地址是否合法，调用者需确保操作后地址有效
    #[inline]
    fn add_page(&mut self) {
        *self.data_mut() += PGSIZE;
    }

    /// 获取地址的usize表示
    #[inline]
    fn as_usize(&self) -> usize {
        *self.data_ref()
    }

    /// 是否页对齐
    #[inline]
    fn is_page_aligned(&self) -> bool {
        self.data_ref().get_bits(0..PGSHIFT) == 0
    }

    /// 转换为只读裸指针
    #[inline]
    fn as_ptr(&self) -> *const u8 {
        *self.data_ref() as *const u8
    }
}

/// 物理地址封装类型
///
/// 由分配器交出的物理地址总是页对齐的。
#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysAddr(usize);

impl Addr for PhysAddr {
    #[inline]
    fn data_ref(&self) -> &usize {
        &self.0
    }

    #[inline]
    fn data_mut(&mut self) -> &mut usize {
        &mut self.0
    }
}

impl PhysAddr {
    /// 从原始usize值构造物理地址，不做任何检查
    ///
    /// # 安全性
    /// 调用者必须确保`raw`是有效的物理地址
    #[inline]
    pub unsafe fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// 解封装获取原始物理地址
    #[inline]
    pub fn into_raw(self) -> usize {
        self.0
    }
}

impl TryFrom<usize> for PhysAddr {
    type Error = &'static str;

    /// 尝试从usize创建页对齐的物理地址
    ///
    /// # 返回值
    /// - `Ok(PhysAddr)`: 地址页对齐
    /// - `Err(&str)`: 地址未对齐
    fn try_from(addr: usize) -> Result<Self, Self::Error> {
        if addr.get_bits(0..PGSHIFT) != 0 {
            return Err("PhysAddr addr not aligned");
        }
        Ok(PhysAddr(addr))
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}
