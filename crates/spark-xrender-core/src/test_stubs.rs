//! 记录型连接桩。
//!
//! # 设计定位（Why）
//! - 编码器的刷新时机、围栏登记与共享缓冲轮换都只能通过连接上的调用序列观测；
//! - [`RecordingConnection`] 把每次发送完整复制下来，并允许测试显式控制围栏何时完成。
//!
//! # 使用方式（How）
//! - `RecordingConnection::new()` 模拟支持共享内存的服务器，`without_shared_memory()` 模拟不支持的服务器；
//! - 通过 [`RecordingConnection::complete`] / [`RecordingConnection::complete_all`] 让围栏进入完成状态；
//! - 对所有权接管/归还做严格校验，重复接管或未接管即发送会直接 panic，帮助测试暴露协议误用。
//!
//! # 风险与权衡（Trade-offs）
//! - 桩对象不模拟真实的字节 IO 与序号回绕，仅记录调用；序号语义由 `begin_ownership` 的令牌递增近似。

use std::collections::HashSet;

use bytes::BytesMut;

use crate::{
    connection::{Connection, MaskResources, SharedRegion, Transmission},
    error::Result,
    ids::{FenceToken, GcId, ResourceId},
};

/// 桩连接默认返回的渲染扩展主操作码。
pub const STUB_RENDER_MAJOR_OPCODE: u8 = 139;

/// 一次被记录下来的发送。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedTransmission {
    pub commands: Vec<u8>,
    pub command_count: u32,
    pub mask_pixmap: ResourceId,
    pub mask_gc: GcId,
    pub mask_width: u32,
    pub mask_height: u32,
    pub mask_stride: usize,
    pub mask_y_offset: u32,
    pub mask_buffer_id: u32,
    pub shared: bool,
    /// 遮罩像素是否直接位于本连接分配的共享区域内。
    pub pixels_in_shared_region: bool,
    /// 已占用范围内的遮罩像素，逐行复制。
    pub mask_rows: Vec<Vec<u8>>,
}

/// 记录所有调用的内存连接。
#[derive(Debug)]
pub struct RecordingConnection {
    major_opcode: u8,
    shared_supported: bool,
    withhold_fences: bool,
    truncate_regions: bool,
    shared_span: Option<(usize, usize)>,
    owned: bool,
    next_sequence: u64,
    next_id: u32,
    completed: HashSet<FenceToken>,
    issued_fences: Vec<FenceToken>,
    transmissions: Vec<RecordedTransmission>,
    begin_count: usize,
    end_count: usize,
    sync_count: usize,
    poll_count: usize,
}

impl Default for RecordingConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self {
            major_opcode: STUB_RENDER_MAJOR_OPCODE,
            shared_supported: true,
            withhold_fences: false,
            truncate_regions: false,
            shared_span: None,
            owned: false,
            next_sequence: 0,
            next_id: 0x0040_0000,
            completed: HashSet::new(),
            issued_fences: Vec::new(),
            transmissions: Vec::new(),
            begin_count: 0,
            end_count: 0,
            sync_count: 0,
            poll_count: 0,
        }
    }

    /// 模拟不支持共享内存的服务器。
    pub fn without_shared_memory() -> Self {
        Self {
            shared_supported: false,
            ..Self::new()
        }
    }

    /// 被请求围栏时不返回令牌，用于验证编码器的错误路径。
    pub fn withhold_fences(&mut self, withhold: bool) {
        self.withhold_fences = withhold;
    }

    /// 分配的共享区域只给出一半内存，模拟适配器报告的长度与实际映射不符。
    pub fn truncate_shared_regions(&mut self, truncate: bool) {
        self.truncate_regions = truncate;
    }

    /// 最近一次分配的共享区域的起始地址与字节长度。
    pub fn shared_region_span(&self) -> Option<(usize, usize)> {
        self.shared_span
    }

    /// 将指定围栏标记为已完成。
    pub fn complete(&mut self, token: FenceToken) {
        self.completed.insert(token);
    }

    /// 将所有已发放的围栏标记为已完成。
    pub fn complete_all(&mut self) {
        self.completed.extend(self.issued_fences.iter().copied());
    }

    pub fn transmissions(&self) -> &[RecordedTransmission] {
        &self.transmissions
    }

    pub fn take_transmissions(&mut self) -> Vec<RecordedTransmission> {
        std::mem::take(&mut self.transmissions)
    }

    pub fn issued_fences(&self) -> &[FenceToken] {
        &self.issued_fences
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn begin_count(&self) -> usize {
        self.begin_count
    }

    pub fn end_count(&self) -> usize {
        self.end_count
    }

    pub fn sync_count(&self) -> usize {
        self.sync_count
    }

    pub fn poll_count(&self) -> usize {
        self.poll_count
    }
}

impl Connection for RecordingConnection {
    fn render_major_opcode(&self) -> u8 {
        self.major_opcode
    }

    fn begin_ownership(&mut self, want_fence: bool) -> Result<Option<FenceToken>> {
        assert!(!self.owned, "connection taken twice without release");
        self.owned = true;
        self.begin_count += 1;
        if !want_fence || self.withhold_fences {
            return Ok(None);
        }
        self.next_sequence += 1;
        let token = FenceToken::new(self.next_sequence);
        self.issued_fences.push(token);
        Ok(Some(token))
    }

    fn end_ownership(&mut self) -> Result<()> {
        assert!(self.owned, "connection released without being taken");
        self.owned = false;
        self.end_count += 1;
        Ok(())
    }

    fn poll_completion(&mut self, token: FenceToken) -> Result<bool> {
        self.poll_count += 1;
        Ok(self.completed.contains(&token))
    }

    fn transmit(&mut self, transmission: &Transmission<'_>) -> Result<()> {
        assert!(self.owned, "transmit issued without owning the connection");
        let mask = &transmission.mask;
        let mask_rows = if mask.is_empty() {
            Vec::new()
        } else {
            (0..mask.height).map(|row| mask.row(row).to_vec()).collect()
        };
        let pixels_start = mask.pixels.as_ptr() as usize;
        let pixels_in_shared_region = !mask.pixels.is_empty()
            && self.shared_span.is_some_and(|(base, len)| {
                pixels_start >= base && pixels_start + mask.pixels.len() <= base + len
            });
        self.transmissions.push(RecordedTransmission {
            commands: transmission.commands.to_vec(),
            command_count: transmission.command_count,
            mask_pixmap: mask.pixmap,
            mask_gc: mask.gc,
            mask_width: mask.width,
            mask_height: mask.height,
            mask_stride: mask.stride,
            mask_y_offset: mask.y_offset,
            mask_buffer_id: mask.buffer_id,
            shared: mask.shared,
            pixels_in_shared_region,
            mask_rows,
        });
        Ok(())
    }

    fn allocate_shared_region(&mut self, width: u32, height: u32) -> Result<Option<SharedRegion>> {
        if !self.shared_supported {
            return Ok(None);
        }
        // 8 位 ZPixmap 的扫描线按 32 位对齐。
        let stride = (width as usize + 3) & !3;
        let mut len = stride * height as usize;
        if self.truncate_regions {
            len /= 2;
        }
        let memory = BytesMut::zeroed(len);
        self.shared_span = Some((memory.as_ptr() as usize, memory.len()));
        Ok(Some(SharedRegion::new(memory, stride, width, height)))
    }

    fn force_synchronization(&mut self) -> Result<()> {
        self.sync_count += 1;
        Ok(())
    }

    fn generate_id(&mut self) -> Result<ResourceId> {
        self.next_id += 1;
        Ok(ResourceId::new(self.next_id))
    }

    fn create_mask_resources(
        &mut self,
        _parent: ResourceId,
        _width: u32,
        _height: u32,
    ) -> Result<MaskResources> {
        let pixmap = self.generate_id()?;
        let picture = self.generate_id()?;
        Ok(MaskResources {
            pixmap,
            picture,
            gc: GcId::new(u64::from(self.next_id) + 1),
        })
    }
}
