//! `spark-mask-buffer` 为延迟 XRender 编码器提供遮罩瓦片的暂存区。
//!
//! # 模块定位（Why）
//! - 抗锯齿遮罩通常只有几十像素见方，逐个上传的请求开销远大于像素本身；
//!   把它们装箱进一块较大的区域后随命令批次一次性上传，才能摊薄开销；
//! - 共享内存区域由服务器异步读取，发送后到服务器读完之前不能复用，需要围栏（fence）跟踪。
//!
//! # 设计概要（How）
//! - `tile` 模块实现 [`TileBuffer`]：单块区域上的货架（shelf）装箱，O(1) 判定是否装得下；
//! - `pool` 模块实现 [`MaskBufferPool`]：一个始终可用的私有缓冲加若干共享缓冲，
//!   共享缓冲在 空闲 → 活动 → 待登记 → 待完成 → 空闲 之间流转；
//! - 缓冲在各状态容器之间按值移动，"同一缓冲只处于一个状态"由所有权直接保证。
//!
//! # 命名约定（Consistency）
//! - "shared"/"共享" 指服务器异步读取的共享内存缓冲，"private"/"私有" 指随请求内联上传的缓冲。

mod pool;
mod tile;

pub use pool::{MaskBufferPool, PoolStats};
pub use tile::{MaskTile, ShmThresholds, TileBounds, TileBuffer, TilePlacement};
