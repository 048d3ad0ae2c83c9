//! 内核资源管理的编译期常量

/// 系统支持的最大 CPU（hart）数量，每个 CPU 拥有一个独立的空闲页池。
pub const NCPU: usize = 8;

/// 缓冲区缓存相关常量
pub mod fs {
    /// 磁盘块大小（字节）
    pub const BSIZE: usize = 1024;

    /// 缓冲区缓存中的缓冲块数量
    pub const NBUF: usize = 30;

    /// 哈希索引表大小，取素数且远大于 `NBUF`
    pub const HASH_TABLE_SIZE: usize = 65537;
}

/// 物理内存相关常量
pub mod mm {
    /// 页大小（字节）
    pub const PGSIZE: usize = 4096;

    /// 页内偏移位数
    pub const PGSHIFT: usize = 12;

    /// 分配时填充的垃圾字节，便于发现未初始化使用
    pub const JUNK_ALLOC: u8 = 5;

    /// 释放时填充的垃圾字节，便于发现悬垂引用
    pub const JUNK_FREE: u8 = 1;
}
