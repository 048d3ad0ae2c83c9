//! 文件系统下层：块缓冲区缓存
//!
//! 文件系统各层（日志、索引节点、位图）都经由这里访问磁盘块，本模块不关心块内容的含义。

mod bio;

pub use bio::{Bcache, BcacheStats, Buf, BufData};
