//! 进程级配置：启动时读取一次，此后以不可变结构按引用传递。
//!
//! # 模块定位（Why）
//! - 瓦片区域边长、共享缓冲数量等参数决定缓冲池的内存形态，必须在构造缓冲池之前确定且此后不再变化；
//! - 以显式结构代替全局可变状态，测试可以并行构造互不干扰的配置。
//!
//! # 数据来源（How）
//! - [`XrConfig::from_env`]：读取 `SPARK_XR_TILE`、`SPARK_XR_SHM`、`SPARK_XR_SHM_BUFFERS` 环境变量；
//! - [`XrConfig::from_lookup`]：同上，但由调用方提供查找函数，便于测试注入；
//! - [`XrConfig::from_toml_str`]：从 TOML 片段反序列化并校验。
//!
//! # 契约说明（What）
//! - 环境变量中越界的瓦片边长会被忽略并记录 `warn`，沿用默认值；无法解析的数字返回错误；
//! - TOML 来源必须完整通过 [`XrConfig::validate`]，不做静默修正。

use serde::Deserialize;
use thiserror::Error;

/// 瓦片区域边长下限（像素）。
pub const MIN_TILE_EDGE: u32 = 32;
/// 瓦片区域边长上限（像素）。
pub const MAX_TILE_EDGE: u32 = 4096;
pub const DEFAULT_TILE_EDGE: u32 = 256;
pub const DEFAULT_SHARED_BUFFERS: usize = 4;
/// 编码缓冲容量，128 KiB。
pub const DEFAULT_ENCODE_CAPACITY: usize = 128 * 1024;
/// 单次接管期间允许累积的请求数，超过后强制一次同步往返，避免 16 位序号回绕。
pub const DEFAULT_SEQUENCE_HORIZON: u32 = 65_500;
pub const DEFAULT_SHM_THRESHOLD_LOW: u32 = 8192;
pub const DEFAULT_SHM_THRESHOLD_HIGH: u32 = 16_384;
/// 未排队任何遮罩瓦片时，编码缓冲超过该字节数即提前刷新，限制单条命令的延迟。
pub const DEFAULT_EAGER_FLUSH_BYTES: usize = 4 * 1024;

pub const ENV_TILE_EDGE: &str = "SPARK_XR_TILE";
pub const ENV_SHM_ENABLED: &str = "SPARK_XR_SHM";
pub const ENV_SHM_BUFFERS: &str = "SPARK_XR_SHM_BUFFERS";

/// 配置解析与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`{key}` must be an unsigned integer, got `{value}`")]
    InvalidNumber { key: &'static str, value: String },

    #[error("tile edge {edge} is outside [32, 4096]")]
    TileEdgeOutOfRange { edge: u32 },

    #[error("encode capacity {capacity} must be a multiple of 4 and at least 64 bytes")]
    InvalidCapacity { capacity: usize },

    #[error("shared-upload thresholds out of order: low {low} > high {high}")]
    ThresholdOrder { low: u32, high: u32 },

    #[error("failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// 延迟渲染核心的不可变配置。
///
/// # 教案式说明
/// - **意图 (Why)**：把散落的魔数集中为一处可审计的结构，并随构造函数注入缓冲池与编码器；
/// - **契约 (What)**：
///   - `tile_edge` 同时是瓦片区域的宽与高，位于 `[32, 4096]`；
///   - `shared_buffers == 0` 表示禁用共享内存上传，只使用私有缓冲；
///   - `encode_capacity` 为 4 的倍数，编码器按 32 位字计算请求长度；
/// - **设计权衡 (Trade-offs)**：字段私有、仅提供读取器与 `with_*` 构造方法，防止构造后被修改。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct XrConfig {
    tile_edge: u32,
    shared_buffers: usize,
    encode_capacity: usize,
    sequence_horizon: u32,
    shm_threshold_low: u32,
    shm_threshold_high: u32,
    eager_flush_bytes: usize,
}

impl Default for XrConfig {
    fn default() -> Self {
        Self {
            tile_edge: DEFAULT_TILE_EDGE,
            shared_buffers: DEFAULT_SHARED_BUFFERS,
            encode_capacity: DEFAULT_ENCODE_CAPACITY,
            sequence_horizon: DEFAULT_SEQUENCE_HORIZON,
            shm_threshold_low: DEFAULT_SHM_THRESHOLD_LOW,
            shm_threshold_high: DEFAULT_SHM_THRESHOLD_HIGH,
            eager_flush_bytes: DEFAULT_EAGER_FLUSH_BYTES,
        }
    }
}

impl XrConfig {
    /// 从进程环境读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 通过调用方提供的查找函数读取配置。
    ///
    /// # 执行逻辑（How）
    /// 1. `SPARK_XR_TILE`：解析为边长，越界时记录告警并保留默认值；
    /// 2. `SPARK_XR_SHM=false`（忽略大小写）直接禁用共享缓冲；
    /// 3. 否则若存在 `SPARK_XR_SHM_BUFFERS`，以其值作为共享缓冲数量。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_TILE_EDGE) {
            let edge = parse_number::<u32>(ENV_TILE_EDGE, &raw)?;
            if (MIN_TILE_EDGE..=MAX_TILE_EDGE).contains(&edge) {
                config.tile_edge = edge;
            } else {
                tracing::warn!(
                    edge,
                    fallback = DEFAULT_TILE_EDGE,
                    "ignoring out-of-range tile edge"
                );
            }
        }

        let shm_disabled = lookup(ENV_SHM_ENABLED)
            .map(|value| value.trim().eq_ignore_ascii_case("false"))
            .unwrap_or(false);
        if shm_disabled {
            config.shared_buffers = 0;
        } else if let Some(raw) = lookup(ENV_SHM_BUFFERS) {
            config.shared_buffers = parse_number::<usize>(ENV_SHM_BUFFERS, &raw)?;
        }

        Ok(config)
    }

    /// 从 TOML 片段读取配置，缺省字段取默认值。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: XrConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验字段间约束。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_TILE_EDGE..=MAX_TILE_EDGE).contains(&self.tile_edge) {
            return Err(ConfigError::TileEdgeOutOfRange {
                edge: self.tile_edge,
            });
        }
        if self.encode_capacity < 64 || self.encode_capacity % 4 != 0 {
            return Err(ConfigError::InvalidCapacity {
                capacity: self.encode_capacity,
            });
        }
        if self.shm_threshold_low > self.shm_threshold_high {
            return Err(ConfigError::ThresholdOrder {
                low: self.shm_threshold_low,
                high: self.shm_threshold_high,
            });
        }
        Ok(())
    }

    pub fn with_tile_edge(mut self, edge: u32) -> Result<Self, ConfigError> {
        if !(MIN_TILE_EDGE..=MAX_TILE_EDGE).contains(&edge) {
            return Err(ConfigError::TileEdgeOutOfRange { edge });
        }
        self.tile_edge = edge;
        Ok(self)
    }

    pub fn with_shared_buffers(mut self, count: usize) -> Self {
        self.shared_buffers = count;
        self
    }

    pub fn with_encode_capacity(mut self, capacity: usize) -> Result<Self, ConfigError> {
        if capacity < 64 || capacity % 4 != 0 {
            return Err(ConfigError::InvalidCapacity { capacity });
        }
        self.encode_capacity = capacity;
        Ok(self)
    }

    pub fn with_sequence_horizon(mut self, horizon: u32) -> Self {
        self.sequence_horizon = horizon;
        self
    }

    pub fn tile_edge(&self) -> u32 {
        self.tile_edge
    }

    pub fn shared_buffers(&self) -> usize {
        self.shared_buffers
    }

    pub fn encode_capacity(&self) -> usize {
        self.encode_capacity
    }

    pub fn sequence_horizon(&self) -> u32 {
        self.sequence_horizon
    }

    pub fn shm_threshold_low(&self) -> u32 {
        self.shm_threshold_low
    }

    pub fn shm_threshold_high(&self) -> u32 {
        self.shm_threshold_high
    }

    pub fn eager_flush_bytes(&self) -> usize {
        self.eager_flush_bytes
    }
}

fn parse_number<T: core::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidNumber {
            key,
            value: raw.to_owned(),
        })
}
