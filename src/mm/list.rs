//! 空闲页单向链表
//!
//! 每个空闲页的头部存放一个 [`Run`]，链表不另外分配任何内存。

use core::ptr;

/// 空闲页头部的链表节点
#[repr(C)]
pub struct Run {
    next: *mut Run,
}

/// 空闲页单向链表，同时记录长度。
///
/// # 安全说明
/// - 所有操作均基于裸指针，调用者需确保压入的地址有效、对齐且不再被其他人使用；
/// - 链表不管理内存生命周期。
pub struct RunList {
    head: *mut Run,
    len: usize,
}

// 裸指针不是 Send；链表总在某个空闲池的自旋锁保护下访问
unsafe impl Send for RunList {}

impl RunList {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// 将位于 `raw_addr` 的空闲页压入链表头部
    ///
    /// # 安全性
    /// - `raw_addr` 必须指向一整页可写且不再被使用的内存
    pub unsafe fn push(&mut self, raw_addr: usize) {
        let run = raw_addr as *mut Run;
        ptr::write(run, Run { next: self.head });
        self.head = run;
        self.len += 1;
    }

    /// 从链表头部弹出一页，链表为空时返回 `None`
    pub fn pop(&mut self) -> Option<usize> {
        if self.head.is_null() {
            return None;
        }
        let run = self.head;
        // 安全性：链表中的节点都由 push 写入且仍然有效
        self.head = unsafe { (*run).next };
        self.len -= 1;
        Some(run as usize)
    }

    /// 从头部拆下前 `n` 个节点组成新链表，剩余部分留在原链表中。
    ///
    /// # 可能的错误
    /// `n` 大于链表长度时 panic。
    pub fn split_front(&mut self, n: usize) -> RunList {
        if n > self.len {
            panic!("split_front: {} > {}", n, self.len);
        }
        if n == 0 {
            return RunList::new();
        }

        // 找到第 n 个节点，在其后断开
        let front = self.head;
        let mut tail = front;
        for _ in 1..n {
            tail = unsafe { (*tail).next };
        }
        unsafe {
            self.head = (*tail).next;
            (*tail).next = ptr::null_mut();
        }
        self.len -= n;

        RunList { head: front, len: n }
    }

    /// 用 `other` 替换本链表的全部内容。本链表必须为空。
    pub fn adopt(&mut self, other: RunList) {
        if !self.is_empty() {
            panic!("adopt: list not empty");
        }
        *self = other;
    }
}
