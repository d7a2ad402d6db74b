//! 连接协作者契约。
//!
//! # 模块定位（Why）
//! - 延迟编码器与服务器之间共享一条按请求顺序执行的连接，连接本身（字节 IO、序号管理、共享内存段挂载）
//!   由平台适配器负责；核心只通过 [`Connection`] 表达它需要的最小能力集；
//! - 以 trait 注入代替原生调用，使编码器可以在内存桩上完整验证，不依赖真实的显示服务器。
//!
//! # 暴露接口（What）
//! - [`Connection`]：所有权接管/归还、围栏轮询、批量发送、共享区域分配、强制同步；
//! - [`Transmission`] / [`MaskUpload`]：一次批量发送所携带的命令字节与遮罩像素描述；
//! - [`SharedRegion`] / [`SharedMemory`]：适配器分配并持有的共享内存区域，行跨度由适配器决定；
//! - [`MaskResources`]：编码器为遮罩合成预先创建的 Pixmap/Picture/GC。
//!
//! # 设计要点（How）
//! - 所有方法返回 [`Result`]；适配器应把底层故障包装为
//!   [`XrError::Transport`](crate::XrError::Transport)，核心不做部分发送恢复；
//! - 方法均取 `&mut self`，延续单写者模型：跨线程使用需由调用方在连接粒度上串行化。

use core::fmt;

use bytes::BytesMut;

use crate::{
    error::Result,
    ids::{FenceToken, GcId, ResourceId},
};

/// 平台适配器需要实现的连接能力。
///
/// # 契约（Contract）
/// - **所有权**：`begin_ownership` 与 `end_ownership` 必须成对出现，编码器保证不会重复接管；
/// - **围栏**：当 `want_fence` 为真时，`begin_ownership` 必须返回一个令牌，
///   该令牌在服务器读完上一次共享上传之后才会被 `poll_completion` 报告为完成；
/// - **发送**：`transmit` 必须先上传遮罩像素、再写出命令字节，确保合成命令读取到的是本批次的遮罩；
/// - **共享内存**：`allocate_shared_region` 返回 `None` 表示平台不支持，核心将退化为仅使用私有缓冲。
pub trait Connection {
    /// 渲染扩展的主操作码，查询一次后固定不变。
    fn render_major_opcode(&self) -> u8;

    /// 接管连接的独占使用权；按需为待登记的共享缓冲排队围栏并返回其令牌。
    fn begin_ownership(&mut self, want_fence: bool) -> Result<Option<FenceToken>>;

    /// 归还连接使用权。调用前编码器已清空所有缓冲命令。
    fn end_ownership(&mut self) -> Result<()>;

    /// 非阻塞地询问围栏是否已完成。
    fn poll_completion(&mut self, token: FenceToken) -> Result<bool>;

    /// 一次性发送累积的命令与遮罩像素。
    fn transmit(&mut self, transmission: &Transmission<'_>) -> Result<()>;

    /// 分配 `width × height` 的 8 位共享区域；不支持共享内存时返回 `Ok(None)`。
    fn allocate_shared_region(&mut self, width: u32, height: u32) -> Result<Option<SharedRegion>>;

    /// 发起一次同步往返，使服务器确认此前所有请求的序号。
    fn force_synchronization(&mut self) -> Result<()>;

    /// 分配新的资源标识（渐变等由编码器创建的资源使用）。
    fn generate_id(&mut self) -> Result<ResourceId>;

    /// 创建遮罩合成所需的 8 位 Pixmap、A8 Picture 与关闭 exposure 事件的 GC。
    fn create_mask_resources(
        &mut self,
        parent: ResourceId,
        width: u32,
        height: u32,
    ) -> Result<MaskResources>;
}

/// 遮罩合成使用的服务器端资源。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaskResources {
    pub pixmap: ResourceId,
    pub picture: ResourceId,
    pub gc: GcId,
}

/// 服务器可见的共享内存。
///
/// # 契约说明（What）
/// - 实现者持有的必须是服务器直接读取的那块内存（例如已挂载的共享内存段映射），
///   缓冲池把瓦片像素原地写入其中，发送时不再复制；
/// - 内存在实现者被丢弃前保持有效，丢弃时由实现者负责解除映射。
///
/// `BytesMut` 实现本 trait，供不需要真实共享段的测试与堆内退化场景使用。
pub trait SharedMemory: Send + fmt::Debug {
    fn as_bytes(&self) -> &[u8];

    fn as_bytes_mut(&mut self) -> &mut [u8];
}

impl SharedMemory for BytesMut {
    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

/// 适配器分配的共享内存区域。
///
/// # What
/// - `memory`：适配器持有的共享内存，长度应不小于 `stride * height`；缓冲池会校验，不足时退化为仅私有；
/// - `stride`：行跨度（字节），由适配器根据服务器的扫描线对齐要求决定，调用方必须读回使用。
#[derive(Debug)]
pub struct SharedRegion {
    memory: Box<dyn SharedMemory>,
    stride: usize,
    width: u32,
    height: u32,
}

impl SharedRegion {
    pub fn new<M>(memory: M, stride: usize, width: u32, height: u32) -> Self
    where
        M: SharedMemory + 'static,
    {
        Self {
            memory: Box::new(memory),
            stride,
            width,
            height,
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn memory(&self) -> &dyn SharedMemory {
        self.memory.as_ref()
    }

    /// 交出底层内存，由缓冲池持有并按行偏移划分给各共享缓冲。
    pub fn into_memory(self) -> Box<dyn SharedMemory> {
        self.memory
    }
}

/// 一次批量发送。
#[derive(Debug)]
pub struct Transmission<'a> {
    /// 已编码的请求字节，小端序。
    pub commands: &'a [u8],
    /// `commands` 中的请求条数，不含遮罩上传请求。
    pub command_count: u32,
    /// 本批次需要先行上传的遮罩图像。
    pub mask: MaskUpload<'a>,
}

/// 遮罩上传描述。
///
/// # 契约说明（What）
/// - `width`/`height` 为已占用范围；均为 0 时无需上传；
/// - `shared` 为真时适配器应通过共享内存路径上传（源 y 偏移为 `y_offset`），此后该缓冲在围栏完成前不会被复用；
/// - `pixels` 为整块瓦片区域（`stride * tile_edge` 字节），行 `y` 起始于 `y * stride`；共享上传时它就是
///   [`SharedMemory`] 中该缓冲所在的那一段，适配器只需发出 `ShmPutImage`，无需复制。
#[derive(Debug)]
pub struct MaskUpload<'a> {
    pub pixmap: ResourceId,
    pub gc: GcId,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub y_offset: u32,
    pub buffer_id: u32,
    pub shared: bool,
    pub pixels: &'a [u8],
}

impl MaskUpload<'_> {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// 返回第 `row` 行已占用部分的像素。
    pub fn row(&self, row: u32) -> &[u8] {
        let start = row as usize * self.stride;
        &self.pixels[start..start + self.width as usize]
    }
}
