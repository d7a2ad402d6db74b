//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为编码器、缓冲池与连接适配器提供统一的错误域，调用方可以直接以 `?` 传播；
//! - 每个变体都映射到稳定错误码（[`codes`]），便于日志检索与告警聚合。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，兼容 `std::error::Error`；
//! - 传输层故障以装箱的 `source` 透传，本 crate 不对其做任何分类或重试；
//! - 瓦片装箱失败不是错误：它只表示"刷新后重试"，由编码器内部的单次重试处理。

use std::error::Error as StdError;

use thiserror::Error;

use crate::config::ConfigError;

/// 本工作区统一使用的结果别名。
pub type Result<T, E = XrError> = core::result::Result<T, E>;

/// 稳定错误码集合，遵循 `<域>.<语义>` 命名约定。
pub mod codes {
    pub const TRANSPORT_FAILURE: &str = "xrender.transport_failure";
    pub const FENCE_NOT_ISSUED: &str = "xrender.fence_not_issued";
    pub const TILE_TOO_LARGE: &str = "xrender.tile_too_large";
    pub const REQUEST_TOO_LARGE: &str = "xrender.request_too_large";
    pub const GRADIENT_STOP_MISMATCH: &str = "xrender.gradient_stop_mismatch";
    pub const INVALID_CONFIGURATION: &str = "xrender.invalid_configuration";
}

/// 延迟渲染核心错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：聚合批处理路径上所有可恢复的失败，调用方据此决定是否退回非批处理的直接发送路径；
/// - **契约 (What)**：
///   - 所有变体均满足 `Send + Sync + 'static`，可跨线程传播；
///   - [`XrError::code`] 返回稳定错误码，不随消息文本变化；
/// - **设计权衡 (Trade-offs)**：传输错误以 `Box<dyn Error>` 保存，牺牲一次堆分配换取适配器实现的自由度。
#[derive(Debug, Error)]
pub enum XrError {
    /// 连接适配器报告的底层失败。发送失败后批处理状态不再可信，调用方应放弃该连接。
    #[error("connection collaborator failed during `{operation}`: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    /// 已请求为待登记缓冲排队围栏，但连接未返回令牌。
    #[error("a fence was requested for the pending tile buffer but the connection issued none")]
    FenceNotIssued,

    /// 单个遮罩瓦片超出配置的瓦片区域，无论如何刷新都无法装入。
    #[error("mask tile {width}x{height} exceeds the {edge}x{edge} tile region")]
    TileTooLarge { width: u32, height: u32, edge: u32 },

    /// 单条变长请求（渐变、字形串）超过编码缓冲容量，需走非批处理路径。
    #[error("request of {words} words exceeds the encode buffer capacity of {capacity_words} words")]
    RequestTooLarge { words: usize, capacity_words: usize },

    /// 渐变的色标位置与颜色数量不一致。
    #[error("gradient has {stops} stop positions but {colors} colors")]
    GradientStopMismatch { stops: usize, colors: usize },

    /// 配置解析或校验失败。
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl XrError {
    /// 包装连接适配器的底层错误。
    pub fn transport<E>(operation: &'static str, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        XrError::Transport {
            operation,
            source: source.into(),
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            XrError::Transport { .. } => codes::TRANSPORT_FAILURE,
            XrError::FenceNotIssued => codes::FENCE_NOT_ISSUED,
            XrError::TileTooLarge { .. } => codes::TILE_TOO_LARGE,
            XrError::RequestTooLarge { .. } => codes::REQUEST_TOO_LARGE,
            XrError::GradientStopMismatch { .. } => codes::GRADIENT_STOP_MISMATCH,
            XrError::Config(_) => codes::INVALID_CONFIGURATION,
        }
    }
}
