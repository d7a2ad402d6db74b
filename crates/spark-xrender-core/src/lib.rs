#![deny(unsafe_code)]
#![doc = r#"
# spark-xrender-core

## 设计动机（Why）
- **定位**：为延迟（deferred）XRender 请求批处理提供共享契约。编码器与遮罩瓦片缓冲池都只依赖本 crate，
  不直接感知底层连接实现（XCB、测试桩或其它适配器）。
- **架构角色**：承载"连接协作者"接口、进程级配置、稳定错误码与资源标识，是工作区依赖图的最底层。

## 核心契约（What）
- [`Connection`]：所有权接管/归还、围栏（fence）轮询、批量发送与共享内存分配的注入式接口；
- [`XrConfig`]：启动时构造一次的不可变配置，按引用传入缓冲池与编码器；
- [`XrError`] / [`ConfigError`]：基于 `thiserror` 的错误域，附带稳定错误码；
- [`ResourceId`]、[`GcId`]、[`FenceToken`]：协议层标识的强类型包装；
- [`fixed`]：16.16 定点与坐标钳制工具。

## 实现策略（How）
- 单写者模型：所有可变操作以 `&mut self` 暴露，本 crate 不引入任何锁；
- 日志统一通过 `tracing` 宏输出，[`observability::install`] 负责一次性安装订阅器；
- [`test_stubs`] 提供记录型连接，供各 crate 的契约测试复用。
"#]

pub mod config;
pub mod connection;
pub mod error;
pub mod fixed;
pub mod ids;
pub mod observability;
/// 测试桩命名空间，集中暴露记录型 [`Connection`] 实现，供集成测试与基准复用。
///
/// # 设计背景（Why）
/// - 编码器与缓冲池的契约测试都需要一个可观测、可控制围栏完成时机的连接；
/// - 单点维护避免各 crate 重复定义桩对象，接口演进时获得集中编译错误提示。
pub mod test_stubs;

pub use config::{ConfigError, XrConfig};
pub use connection::{
    Connection, MaskResources, MaskUpload, SharedMemory, SharedRegion, Transmission,
};
pub use error::{Result, XrError, codes};
pub use ids::{FenceToken, GcId, ResourceId};
