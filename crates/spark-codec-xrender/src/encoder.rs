use bytes::BytesMut;
use spark_mask_buffer::{MaskBufferPool, MaskTile};
use spark_xrender_core::{
    Connection, MaskResources, MaskUpload, ResourceId, Result, Transmission, XrConfig, XrError,
};

use crate::request::{
    ClipBox, Color, Composite, CompositeGlyphs, CreateLinearGradient, CreateRadialGradient,
    FillRectangles, Filter, FreePicture, FreePixmap, PictOp, PointF, Rect, RenderRequest, Repeat,
    SetClipRectangle, SetPictureFilter, SetPictureRepeat, SetPictureTransform, Transform,
};

/// 遮罩合成的遮罩来源。
#[derive(Clone, Copy, Debug)]
pub enum MaskSource<'a> {
    /// 直接引用已有的遮罩图片（例如额外透明度图片），不经过瓦片缓冲。
    Picture(ResourceId),
    /// 调用方光栅化得到的遮罩字节，装箱进瓦片缓冲后随批次上传。
    Tile(MaskTile<'a>),
}

/// 遮罩合成的几何参数，遮罩坐标由编码器决定。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaskedComposite {
    pub op: PictOp,
    pub src: ResourceId,
    pub dst: ResourceId,
    pub src_x: i16,
    pub src_y: i16,
    pub dst_x: i16,
    pub dst_y: i16,
    pub width: u16,
    pub height: u16,
}

/// 延迟请求编码器。
///
/// # 模块角色（Why）
/// - 把大量小绘制命令写进一块固定容量的缓冲，在连接所有权归还或容量用尽时一次性发送，
///   省去逐条请求的系统调用与锁竞争；
/// - 抗锯齿遮罩不单独上传，而是装箱进瓦片缓冲，与引用它们的合成命令同批发送。
///
/// # 核心机制（How）
/// - **接管**（[`DeferredEncoder::acquire`]）：先回收已完成围栏的共享缓冲，再接管连接；
///   若上一次发送使用了共享上传，则在接管时排队围栏并把令牌登记到缓冲池；
/// - **请求准备**：每条记录写出前检查序号窗口与剩余容量，必要时先刷新并重新接管；
/// - **刷新**：把命令字节、命令数与活动瓦片缓冲的已占用范围交给连接发送，随后结算瓦片缓冲；
/// - **交接**（[`DeferredEncoder::release`]）：总是先刷新再归还连接。
///
/// # 契约说明（What）
/// - 单写者：所有操作取 `&mut self`，跨线程共享需由调用方串行化；
/// - 任一操作返回 [`XrError::Transport`] 后批处理状态不再可信，调用方应放弃该编码器；
/// - 超过缓冲容量的变长请求返回 [`XrError::RequestTooLarge`]，调用方可改走非批处理路径。
///
/// # 设计权衡（Trade-offs）
/// - 合成命令的空间在装箱**之前**预留，容量刷新不会把瓦片与引用它的命令拆到两个批次；
/// - 装箱失败只重试一次：超出区域的瓦片已在入口处以 [`XrError::TileTooLarge`] 拒绝，
///   刷新后的空缓冲必然装得下。
#[derive(Debug)]
pub struct DeferredEncoder<C>
where
    C: Connection,
{
    connection: C,
    config: XrConfig,
    pool: MaskBufferPool,
    mask: MaskResources,
    buffer: BytesMut,
    capacity_words: usize,
    major_opcode: u8,
    owned: bool,
    pending_commands: u32,
    requests_since_take: u32,
}

impl<C> DeferredEncoder<C>
where
    C: Connection,
{
    /// 构建编码器：校验配置、建立遮罩缓冲池，并在 `parent` 下创建遮罩合成资源。
    ///
    /// 配置按引用传入，编码器保留一份副本。
    pub fn new(mut connection: C, config: &XrConfig, parent: ResourceId) -> Result<Self> {
        config.validate()?;
        let pool = MaskBufferPool::new(config, &mut connection)?;
        let edge = pool.tile_edge();
        let mask = connection.create_mask_resources(parent, edge, edge)?;
        let capacity = config.encode_capacity();
        let major_opcode = connection.render_major_opcode();
        tracing::debug!(
            capacity,
            major_opcode,
            mask_picture = %mask.picture,
            "deferred encoder ready"
        );
        Ok(Self {
            connection,
            pool,
            mask,
            buffer: BytesMut::with_capacity(capacity),
            capacity_words: (capacity / 4).min(usize::from(u16::MAX)),
            major_opcode,
            owned: false,
            pending_commands: 0,
            requests_since_take: 0,
            config: config.clone(),
        })
    }

    /// 接管连接；已持有时为空操作。
    ///
    /// # 执行逻辑（How）
    /// 1. 轮询待决围栏，把服务器已读完的共享缓冲放回空闲表；
    /// 2. 以"是否有缓冲等待围栏"为参数接管连接；
    /// 3. 收到令牌即登记；请求了围栏却没有令牌时立即归还连接并返回 [`XrError::FenceNotIssued`]，
    ///    待登记缓冲留在槽位中，下一次接管会重新请求围栏；
    /// 4. 重置本次接管以来的请求计数。
    pub fn acquire(&mut self) -> Result<()> {
        if self.owned {
            return Ok(());
        }
        self.pool.poll_completions(&mut self.connection)?;

        let want_fence = self.pool.is_fence_pending();
        let token = self.connection.begin_ownership(want_fence)?;
        match (want_fence, token) {
            (true, Some(token)) => self.pool.register_pending_token(token),
            (true, None) => {
                tracing::warn!("connection issued no fence for the staged shared buffer");
                self.connection.end_ownership()?;
                return Err(XrError::FenceNotIssued);
            }
            (false, Some(token)) => {
                tracing::warn!(%token, "connection issued an unrequested fence, ignoring it");
            }
            (false, None) => {}
        }
        self.owned = true;
        self.requests_since_take = 0;
        Ok(())
    }

    /// 协作式交接：先发送全部缓冲命令，再归还连接；未持有时为空操作。
    pub fn release(&mut self) -> Result<()> {
        if !self.owned {
            return Ok(());
        }
        self.flush(true)?;
        self.connection.end_ownership()?;
        self.owned = false;
        Ok(())
    }

    /// 发送当前批次。
    ///
    /// 没有缓冲命令时为空操作。`handoff` 为假时发送后立即归还连接，下一条请求会重新接管。
    pub fn flush(&mut self, handoff: bool) -> Result<()> {
        if self.pending_commands == 0 {
            return Ok(());
        }

        let profitable = self.pool.upload_profitable();
        let mask = match self.pool.active_region() {
            Some((tile, pixels)) if !tile.is_empty() => {
                let bounds = tile.bounds();
                MaskUpload {
                    pixmap: self.mask.pixmap,
                    gc: self.mask.gc,
                    width: bounds.width,
                    height: bounds.height,
                    stride: tile.stride(),
                    y_offset: tile.y_offset(),
                    buffer_id: tile.id(),
                    shared: profitable,
                    pixels,
                }
            }
            _ => MaskUpload {
                pixmap: self.mask.pixmap,
                gc: self.mask.gc,
                width: 0,
                height: 0,
                stride: 0,
                y_offset: 0,
                buffer_id: 0,
                shared: false,
                pixels: &[],
            },
        };
        let shared = mask.shared;
        tracing::debug!(
            commands = self.pending_commands,
            bytes = self.buffer.len(),
            mask_width = mask.width,
            mask_height = mask.height,
            buffer = mask.buffer_id,
            shared,
            handoff,
            "flushing deferred batch"
        );

        let transmission = Transmission {
            commands: &self.buffer[..],
            command_count: self.pending_commands,
            mask,
        };
        self.connection.transmit(&transmission)?;

        self.pool.mark_flushed(shared);
        self.buffer.clear();
        self.pending_commands = 0;

        if !handoff {
            self.connection.end_ownership()?;
            self.owned = false;
        }
        Ok(())
    }

    pub fn fill_rectangle(
        &mut self,
        dst: ResourceId,
        op: PictOp,
        color: Color,
        rect: Rect,
    ) -> Result<()> {
        self.fill_rectangles(dst, op, color, &[rect])
    }

    /// 一条请求填充多个矩形；空切片不产生请求。
    pub fn fill_rectangles(
        &mut self,
        dst: ResourceId,
        op: PictOp,
        color: Color,
        rects: &[Rect],
    ) -> Result<()> {
        if rects.is_empty() {
            return Ok(());
        }
        self.submit(&FillRectangles {
            op,
            dst,
            color,
            rects,
        })
    }

    pub fn composite(&mut self, request: &Composite) -> Result<()> {
        self.submit(request)
    }

    /// 遮罩合成。
    ///
    /// # 执行逻辑（How）
    /// - [`MaskSource::Picture`]：退化为普通合成，遮罩坐标为 `(0, 0)`；
    /// - [`MaskSource::Tile`]：
    ///   1. 瓦片超出配置区域时返回 [`XrError::TileTooLarge`]；
    ///   2. 为合成命令完成请求准备（可能触发刷新），之后才装箱，保证瓦片与命令落在同一批次；
    ///   3. 装不下则刷新并重试一次；
    ///   4. 写出引用遮罩图片与装箱坐标的合成命令。
    pub fn masked_composite(
        &mut self,
        request: &MaskedComposite,
        mask: MaskSource<'_>,
    ) -> Result<()> {
        let tile = match mask {
            MaskSource::Picture(picture) => {
                return self.submit(&composite_with_mask(request, picture, 0, 0));
            }
            MaskSource::Tile(tile) => tile,
        };

        let edge = self.pool.tile_edge();
        if tile.width > edge || tile.height > edge {
            return Err(XrError::TileTooLarge {
                width: tile.width,
                height: tile.height,
                edge,
            });
        }

        for attempt in 0..2 {
            self.prepare(Composite::WORDS)?;
            if let Some(placement) = self.pool.store_mask_tile(&tile) {
                let composite = composite_with_mask(
                    request,
                    self.mask.picture,
                    placement.x as i16,
                    placement.y as i16,
                );
                self.write(&composite);
                return Ok(());
            }
            tracing::debug!(attempt, "tile buffer full, flushing before retry");
            self.flush(false)?;
        }
        unreachable!("an empty tile buffer rejected a tile that fits its region")
    }

    pub fn set_picture_repeat(&mut self, picture: ResourceId, repeat: Repeat) -> Result<()> {
        self.submit(&SetPictureRepeat { picture, repeat })
    }

    pub fn set_picture_filter(&mut self, picture: ResourceId, filter: Filter) -> Result<()> {
        self.submit(&SetPictureFilter { picture, filter })
    }

    pub fn set_picture_transform(
        &mut self,
        picture: ResourceId,
        transform: &Transform,
    ) -> Result<()> {
        self.submit(&SetPictureTransform {
            picture,
            transform: *transform,
        })
    }

    /// 设置单矩形裁剪；`None` 表示取消裁剪，编码为 `(0, 0, 32767, 32767)`。
    pub fn set_clip_rectangle(&mut self, picture: ResourceId, clip: Option<ClipBox>) -> Result<()> {
        self.submit(&SetClipRectangle {
            picture,
            clip: clip.unwrap_or(ClipBox::UNBOUNDED),
        })
    }

    /// 创建线性渐变图片并返回新分配的标识。
    pub fn create_linear_gradient(
        &mut self,
        start: PointF,
        end: PointF,
        stops: &[f64],
        colors: &[u32],
    ) -> Result<ResourceId> {
        let mut request = CreateLinearGradient {
            id: ResourceId::NONE,
            start,
            end,
            stops,
            colors,
        };
        check_stops(stops, colors)?;
        self.check_size(request.words())?;
        request.id = self.connection.generate_id()?;
        self.submit(&request)?;
        Ok(request.id)
    }

    /// 创建内外圆同心的径向渐变图片并返回新分配的标识。
    pub fn create_radial_gradient(
        &mut self,
        center: PointF,
        inner_radius: f64,
        outer_radius: f64,
        stops: &[f64],
        colors: &[u32],
    ) -> Result<ResourceId> {
        let mut request = CreateRadialGradient {
            id: ResourceId::NONE,
            center,
            inner_radius,
            outer_radius,
            stops,
            colors,
        };
        check_stops(stops, colors)?;
        self.check_size(request.words())?;
        request.id = self.connection.generate_id()?;
        self.submit(&request)?;
        Ok(request.id)
    }

    /// 以 32 位字形标识绘制字形串；没有字形串时不产生请求。
    pub fn composite_glyphs(&mut self, request: &CompositeGlyphs<'_>) -> Result<()> {
        if request.runs.is_empty() {
            return Ok(());
        }
        self.submit(request)
    }

    pub fn free_picture(&mut self, picture: ResourceId) -> Result<()> {
        self.submit(&FreePicture { picture })
    }

    pub fn free_pixmap(&mut self, pixmap: ResourceId) -> Result<()> {
        self.submit(&FreePixmap { pixmap })
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn pool(&self) -> &MaskBufferPool {
        &self.pool
    }

    pub fn config(&self) -> &XrConfig {
        &self.config
    }

    /// 自上次刷新以来缓冲的命令数。
    pub fn pending_commands(&self) -> u32 {
        self.pending_commands
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_owner(&self) -> bool {
        self.owned
    }

    pub fn mask_resources(&self) -> &MaskResources {
        &self.mask
    }

    /// 交接剩余命令后取回连接。
    pub fn into_connection(mut self) -> Result<C> {
        self.release()?;
        Ok(self.connection)
    }

    fn submit<R>(&mut self, request: &R) -> Result<()>
    where
        R: RenderRequest + ?Sized,
    {
        let words = request.words();
        self.check_size(words)?;
        self.prepare(words)?;
        self.write(request);
        Ok(())
    }

    /// 写出前的准备：接管连接、守住序号窗口、保证剩余容量。
    fn prepare(&mut self, words: usize) -> Result<()> {
        self.acquire()?;

        if self.requests_since_take > self.config.sequence_horizon() {
            tracing::debug!(
                requests = self.requests_since_take,
                "sequence horizon reached, synchronizing"
            );
            self.release()?;
            self.connection.force_synchronization()?;
            self.acquire()?;
        }

        let queued = self.buffer.len();
        let over_capacity = queued + words * 4 > self.config.encode_capacity();
        let eager = self.pool.active_tile_count() == 0 && queued > self.config.eager_flush_bytes();
        if over_capacity || eager {
            self.flush(false)?;
            self.acquire()?;
        }
        Ok(())
    }

    fn write<R>(&mut self, request: &R)
    where
        R: RenderRequest + ?Sized,
    {
        request.encode(self.major_opcode, &mut self.buffer);
        self.pending_commands += 1;
        self.requests_since_take += 1;
    }

    fn check_size(&self, words: usize) -> Result<()> {
        if words > self.capacity_words {
            return Err(XrError::RequestTooLarge {
                words,
                capacity_words: self.capacity_words,
            });
        }
        Ok(())
    }
}

fn composite_with_mask(
    request: &MaskedComposite,
    mask: ResourceId,
    mask_x: i16,
    mask_y: i16,
) -> Composite {
    Composite {
        op: request.op,
        src: request.src,
        mask,
        dst: request.dst,
        src_x: request.src_x,
        src_y: request.src_y,
        mask_x,
        mask_y,
        dst_x: request.dst_x,
        dst_y: request.dst_y,
        width: request.width,
        height: request.height,
    }
}

fn check_stops(stops: &[f64], colors: &[u32]) -> Result<()> {
    if stops.len() != colors.len() {
        return Err(XrError::GradientStopMismatch {
            stops: stops.len(),
            colors: colors.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use spark_xrender_core::test_stubs::RecordingConnection;
    use tracing_test::traced_test;

    use super::*;

    fn encoder(shared: usize) -> DeferredEncoder<RecordingConnection> {
        let config = XrConfig::default().with_shared_buffers(shared);
        DeferredEncoder::new(RecordingConnection::new(), &config, ResourceId::new(1))
            .expect("构建编码器")
    }

    #[test]
    fn acquire_and_release_are_idempotent() {
        let mut encoder = encoder(0);
        encoder.acquire().expect("接管");
        encoder.acquire().expect("重复接管");
        assert_eq!(encoder.connection().begin_count(), 1);
        encoder.release().expect("归还");
        encoder.release().expect("重复归还");
        assert_eq!(encoder.connection().end_count(), 1);
        assert!(encoder.connection().transmissions().is_empty());
    }

    #[test]
    fn release_flushes_before_handing_back() {
        let mut encoder = encoder(0);
        encoder
            .free_picture(ResourceId::new(0x20))
            .expect("编码 FreePicture");
        assert_eq!(encoder.pending_commands(), 1);
        encoder.release().expect("归还");

        let conn = encoder.connection();
        assert_eq!(conn.transmissions().len(), 1);
        assert_eq!(conn.transmissions()[0].command_count, 1);
        assert!(!conn.is_owned());
        assert_eq!(encoder.buffered_bytes(), 0);
    }

    #[test]
    fn gradient_stop_mismatch_is_rejected_before_encoding() {
        let mut encoder = encoder(0);
        let err = encoder
            .create_linear_gradient(
                PointF::new(0.0, 0.0),
                PointF::new(1.0, 0.0),
                &[0.0, 1.0],
                &[0xFF00_0000],
            )
            .expect_err("色标数量不一致");
        assert!(matches!(
            err,
            XrError::GradientStopMismatch { stops: 2, colors: 1 }
        ));
        assert_eq!(encoder.pending_commands(), 0);
        assert!(!encoder.is_owner());
    }

    #[test]
    fn oversized_tile_is_rejected() {
        let mut encoder = encoder(0);
        let data = vec![0u8; 300 * 10];
        let err = encoder
            .masked_composite(
                &MaskedComposite {
                    op: PictOp::Over,
                    src: ResourceId::new(2),
                    dst: ResourceId::new(3),
                    src_x: 0,
                    src_y: 0,
                    dst_x: 0,
                    dst_y: 0,
                    width: 300,
                    height: 10,
                },
                MaskSource::Tile(MaskTile {
                    data: &data,
                    offset: 0,
                    stride: 300,
                    width: 300,
                    height: 10,
                }),
            )
            .expect_err("超出 256 边长");
        assert_eq!(err.code(), spark_xrender_core::codes::TILE_TOO_LARGE);
    }

    #[test]
    #[traced_test]
    fn sequence_horizon_is_logged() {
        let config = XrConfig::default()
            .with_shared_buffers(0)
            .with_sequence_horizon(1);
        let mut encoder =
            DeferredEncoder::new(RecordingConnection::new(), &config, ResourceId::new(1))
                .expect("构建编码器");
        for picture in 0..3u32 {
            encoder.free_picture(ResourceId::new(picture)).expect("编码");
        }
        assert_eq!(encoder.connection().sync_count(), 1);
        assert!(logs_contain("sequence horizon reached"));
    }
}
