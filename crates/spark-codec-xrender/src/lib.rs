#![deny(unsafe_code)]

//! `spark-codec-xrender` 把渲染扩展请求延迟编码进固定容量的缓冲，并与遮罩瓦片上传合并发送。
//!
//! # 模块定位（Why）
//! - 高频小请求（矩形填充、合成、字形串）逐条发送时，开销主要在请求之间的往返与锁竞争；
//! - 抗锯齿遮罩由 [`spark_mask_buffer`] 装箱，本 crate 负责让引用遮罩的合成命令与遮罩像素落在同一批次。
//!
//! # 设计概要（How）
//! - `request` 模块：每种请求一个类型，实现 [`RenderRequest`]，同时给出字数与小端字节布局；
//! - `encoder` 模块：[`DeferredEncoder`] 管理连接所有权、刷新时机、序号窗口与遮罩合成；
//! - `upload` 模块：供连接适配器使用的上传分帧（内联 `PutImage` 或共享内存 `ShmPutImage`）；
//! - `opcode` 模块：协议常量。
//!
//! # 契约说明（What）
//! - 所有公开操作返回 [`spark_xrender_core::Result`]，错误码见 [`spark_xrender_core::codes`]；
//! - 编码器是单写者对象，不在内部加锁。

pub mod opcode;
pub mod upload;

mod encoder;
mod request;

pub use encoder::{DeferredEncoder, MaskSource, MaskedComposite};
pub use request::{
    ClipBox, Color, Composite, CompositeGlyphs, CreateLinearGradient, CreateRadialGradient,
    FillRectangles, Filter, FreePicture, FreePixmap, GlyphRun, PictOp, PointF, Rect,
    RenderRequest, Repeat, SetClipRectangle, SetPictureFilter, SetPictureRepeat,
    SetPictureTransform, Transform,
};
pub use spark_mask_buffer::MaskTile;
pub use upload::UploadPlan;
