//! 协议层标识的强类型包装。
//!
//! # 模块定位（Why）
//! - X 协议中的 Picture、Pixmap、GlyphSet 等资源共享同一 32 位 XID 空间，
//!   图形上下文（GC）在客户端侧以不透明句柄表示，围栏则以 64 位请求序号标识；
//! - 以新类型区分三者，避免在编码 `Composite` 等多参数请求时把序号或 GC 误当成 XID 写入。

use core::fmt;

/// 服务器端资源标识（XID），用于 Picture、Pixmap、GlyphSet 与渐变。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u32);

impl ResourceId {
    /// 表示"无资源"的哨兵值，对应协议中的 `None`。
    pub const NONE: ResourceId = ResourceId(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for ResourceId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// 图形上下文句柄。
///
/// 上传遮罩图像时需要 GC；其数值由连接适配器解释（XCB 下即 `GContext`），编码器只负责透传。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GcId(u64);

impl GcId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// 围栏（fence）令牌：关联一次共享内存上传与其"服务器已读完"信号的请求序号。
///
/// # 契约说明（What）
/// - 令牌由 [`Connection::begin_ownership`](crate::Connection::begin_ownership) 在接管连接时发放；
/// - 令牌之间相互独立，轮询顺序无关；
/// - 同一令牌只会被登记一次，完成后即从缓冲池的待决表中移除。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FenceToken(u64);

impl FenceToken {
    pub const fn new(sequence: u64) -> Self {
        Self(sequence)
    }

    pub const fn sequence(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fence#{}", self.0)
    }
}
