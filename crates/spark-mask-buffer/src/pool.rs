use std::collections::HashMap;

use bytes::BytesMut;
use spark_xrender_core::{Connection, FenceToken, Result, SharedMemory, XrConfig};

use crate::tile::{MaskTile, ShmThresholds, TileBuffer, TilePlacement};

/// 缓冲池运行指标快照。
///
/// # 契约说明（What）
/// - 计数字段自池创建起单调递增；`idle_shared`/`pending_fences` 为快照时刻的瞬时值；
/// - `lost_buffers` 只在发布构建中违反"待登记槽位唯一"约束时增长，正常运行应恒为 0。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub shared_acquisitions: u64,
    pub fallback_acquisitions: u64,
    pub fences_registered: u64,
    pub fences_completed: u64,
    pub lost_buffers: u64,
    pub idle_shared: usize,
    pub pending_fences: usize,
}

/// 当前活动缓冲。私有缓冲常驻池内，共享缓冲按值移入。
#[derive(Debug)]
enum ActiveTile {
    Private,
    Shared(TileBuffer),
}

/// 遮罩瓦片缓冲池：一个私有缓冲加若干共享缓冲，以围栏跟踪服务器是否读完共享上传。
///
/// # 模块角色（Why）
/// - 共享上传是异步的：请求发出后服务器才开始读取共享内存，期间再写入该区域会破坏尚未合成的遮罩；
/// - 私有缓冲随请求内联上传，发送返回即可复用，因此总能兜底。
///
/// # 核心机制（How）
/// - 共享缓冲在四个容器之间按值流转：`idle`（LIFO）→ `active` → `awaiting_fence`（至多一个）
///   → `pending`（以围栏令牌为键）→ `idle`；
/// - 缓冲不可能同时出现在两个容器里，"活动缓冲不会处于待决状态"由所有权直接成立；
/// - 待登记槽位只有一个，因为每次接管连接只能排队一个围栏；
/// - 像素内存由池持有：私有缓冲用池内堆内存，共享缓冲原地写入适配器交来的 [`SharedMemory`]，
///   服务器读取的正是瓦片被写入的那块内存。
///
/// # 契约说明（What）
/// - **前置条件**：[`MaskBufferPool::register_pending_token`] 只能在待登记槽位非空时调用；
/// - **后置条件**：[`MaskBufferPool::mark_flushed`] 之后没有活动缓冲，下一次 [`MaskBufferPool::active`] 重新选择；
/// - 单写者：所有变更操作取 `&mut self`，池内不加锁。
///
/// # 设计权衡（Trade-offs）
/// - 空闲表取 LIFO，最近归还的缓冲最可能仍在缓存中；
/// - 待登记槽位被覆盖时发布构建选择丢弃旧缓冲（容量永久减一）而不是 panic，调试构建直接断言失败。
#[derive(Debug)]
pub struct MaskBufferPool {
    private: TileBuffer,
    private_memory: BytesMut,
    shared_memory: Option<Box<dyn SharedMemory>>,
    idle: Vec<TileBuffer>,
    awaiting_fence: Option<TileBuffer>,
    pending: HashMap<FenceToken, TileBuffer>,
    active: Option<ActiveTile>,
    shared_capacity: usize,
    tile_edge: u32,
    metrics: PoolStats,
}

impl MaskBufferPool {
    /// 构建缓冲池，按配置向连接申请一块共享区域并切分为若干共享缓冲。
    ///
    /// # 执行逻辑（How）
    /// 1. 创建边长为 `tile_edge` 的私有缓冲；
    /// 2. `shared_buffers > 0` 时申请 `edge × (edge * count)` 的共享区域，连接不支持则退化为仅私有；
    /// 3. 区域内存短于 `stride * edge * count` 或行跨度小于边长时同样退化为仅私有；
    /// 4. 区域按行划分为 `count` 段，第 `i` 段的 `id = i + 1`、`y_offset = edge * i`，依次压入空闲表。
    pub fn new<C>(config: &XrConfig, connection: &mut C) -> Result<Self>
    where
        C: Connection + ?Sized,
    {
        let mut pool = Self::private_only(config);
        let edge = config.tile_edge();
        let requested = config.shared_buffers();
        if requested == 0 {
            tracing::info!(edge, "mask buffer pool uses the private buffer only");
            return Ok(pool);
        }

        let Some(region_height) = u32::try_from(requested)
            .ok()
            .and_then(|count| edge.checked_mul(count))
        else {
            tracing::warn!(
                requested,
                edge,
                "shared region height overflows, falling back to the private buffer"
            );
            return Ok(pool);
        };

        let Some(region) = connection.allocate_shared_region(edge, region_height)? else {
            tracing::warn!(
                requested,
                "shared memory unavailable, falling back to the private buffer"
            );
            return Ok(pool);
        };

        let stride = region.stride();
        let available = region.memory().as_bytes().len();
        let required = stride.checked_mul(region_height as usize);
        if stride < edge as usize || required.is_none_or(|required| available < required) {
            tracing::warn!(
                requested,
                stride,
                available,
                "shared region is smaller than requested, falling back to the private buffer"
            );
            return Ok(pool);
        }

        let thresholds = ShmThresholds::from_config(config);
        for (index, y_offset) in (0..region_height).step_by(edge as usize).enumerate() {
            let id = index as u32 + 1;
            pool.idle.push(TileBuffer::shared(id, edge, stride, y_offset, thresholds));
        }
        pool.shared_memory = Some(region.into_memory());
        pool.shared_capacity = pool.idle.len();

        tracing::info!(
            edge,
            shared = pool.shared_capacity,
            stride,
            "mask buffer pool ready"
        );
        Ok(pool)
    }

    /// 仅含私有缓冲的池，不触碰连接。
    pub fn private_only(config: &XrConfig) -> Self {
        let edge = config.tile_edge();
        let private = TileBuffer::private(edge, ShmThresholds::from_config(config));
        Self {
            private_memory: BytesMut::zeroed(private.region_len()),
            private,
            shared_memory: None,
            idle: Vec::new(),
            awaiting_fence: None,
            pending: HashMap::new(),
            active: None,
            shared_capacity: 0,
            tile_edge: edge,
            metrics: PoolStats::default(),
        }
    }

    /// 返回活动缓冲；没有时优先取最近归还的空闲共享缓冲，否则使用私有缓冲。
    pub fn active(&mut self) -> &mut TileBuffer {
        self.active_parts().0
    }

    /// 把遮罩装进活动缓冲，像素直接写入该缓冲所在的内存。
    pub fn store_mask_tile(&mut self, tile: &MaskTile<'_>) -> Option<TilePlacement> {
        let (buffer, region) = self.active_parts();
        buffer.store_mask_tile(region, tile)
    }

    /// 活动缓冲及其整块像素区域（行 `y` 起始于 `y * stride`），供发送时描述上传；不触发选择。
    pub fn active_region(&self) -> Option<(&TileBuffer, &[u8])> {
        match (&self.active, &self.shared_memory) {
            (Some(ActiveTile::Shared(buffer)), Some(memory)) => {
                Some((buffer, &memory.as_bytes()[buffer.byte_range()]))
            }
            (Some(ActiveTile::Private), _) => Some((&self.private, &self.private_memory[..])),
            _ => None,
        }
    }

    fn active_parts(&mut self) -> (&mut TileBuffer, &mut [u8]) {
        if self.active.is_none() {
            let next = match self.idle.pop() {
                Some(buffer) => {
                    self.metrics.shared_acquisitions += 1;
                    tracing::trace!(buffer = buffer.id(), "shared tile buffer activated");
                    ActiveTile::Shared(buffer)
                }
                None => {
                    self.metrics.fallback_acquisitions += 1;
                    tracing::trace!("private tile buffer activated");
                    ActiveTile::Private
                }
            };
            self.active = Some(next);
        }
        // 共享缓冲只在共享内存就位之后才会进入空闲表。
        match (&mut self.active, &mut self.shared_memory) {
            (Some(ActiveTile::Shared(buffer)), Some(memory)) => {
                let range = buffer.byte_range();
                (buffer, &mut memory.as_bytes_mut()[range])
            }
            _ => (&mut self.private, &mut self.private_memory[..]),
        }
    }

    /// 查看活动缓冲但不触发选择。
    pub fn peek_active(&self) -> Option<&TileBuffer> {
        match &self.active {
            Some(ActiveTile::Shared(buffer)) => Some(buffer),
            Some(ActiveTile::Private) => Some(&self.private),
            None => None,
        }
    }

    /// 活动缓冲中已装入的瓦片数；没有活动缓冲时为 0。
    pub fn active_tile_count(&self) -> usize {
        self.peek_active().map_or(0, TileBuffer::tile_count)
    }

    /// 以当前空闲共享缓冲数评估活动缓冲是否值得走共享上传。
    pub fn upload_profitable(&self) -> bool {
        self.peek_active()
            .is_some_and(|buffer| buffer.is_upload_with_shm_profitable(self.idle.len()))
    }

    /// 在一次发送之后结算活动缓冲。
    ///
    /// # 执行逻辑（How）
    /// - 没有活动缓冲时直接返回；
    /// - 共享发送：缓冲进入待登记槽位，等待下一次接管连接时排队围栏；
    /// - 内联发送：共享缓冲立即回到空闲表，私有缓冲留在原处；
    /// - 无论哪种情况缓冲都会重置装箱游标。
    pub fn mark_flushed(&mut self, shared_transmission: bool) {
        let Some(active) = self.active.take() else {
            return;
        };
        match active {
            ActiveTile::Private => {
                if shared_transmission {
                    tracing::debug!("private buffer cannot be shared, treating flush as inline");
                }
                self.private.reset();
            }
            ActiveTile::Shared(mut buffer) => {
                buffer.reset();
                if !shared_transmission {
                    self.idle.push(buffer);
                    return;
                }
                debug_assert!(
                    self.awaiting_fence.is_none(),
                    "a shared buffer is already awaiting its fence"
                );
                if let Some(displaced) = self.awaiting_fence.replace(buffer) {
                    self.metrics.lost_buffers += 1;
                    tracing::error!(
                        buffer = displaced.id(),
                        "shared buffer displaced before its fence was registered, dropping it"
                    );
                }
            }
        }
    }

    /// 为待登记的共享缓冲绑定围栏令牌。
    ///
    /// # Panics
    /// 待登记槽位为空时 panic：这意味着调用方在没有共享发送的情况下请求了围栏。
    pub fn register_pending_token(&mut self, token: FenceToken) {
        let Some(buffer) = self.awaiting_fence.take() else {
            panic!("fence {token} registered without a buffer awaiting it");
        };
        tracing::debug!(buffer = buffer.id(), %token, "fence registered");
        self.metrics.fences_registered += 1;
        self.pending.insert(token, buffer);
    }

    /// 轮询所有待决围栏，把已完成的缓冲归还空闲表，返回归还数量。
    ///
    /// 令牌按序号升序处理，保证归还顺序确定。
    pub fn poll_completions<C>(&mut self, connection: &mut C) -> Result<usize>
    where
        C: Connection + ?Sized,
    {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let mut tokens: Vec<FenceToken> = self.pending.keys().copied().collect();
        tokens.sort_unstable();

        let mut reclaimed = 0;
        for token in tokens {
            if !connection.poll_completion(token)? {
                continue;
            }
            if let Some(mut buffer) = self.pending.remove(&token) {
                buffer.reset();
                tracing::trace!(buffer = buffer.id(), %token, "fence completed");
                self.idle.push(buffer);
                self.metrics.fences_completed += 1;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    /// 是否有共享缓冲等待下一次接管时排队围栏。
    pub fn is_fence_pending(&self) -> bool {
        self.awaiting_fence.is_some()
    }

    pub fn idle_shared_count(&self) -> usize {
        self.idle.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn shared_capacity(&self) -> usize {
        self.shared_capacity
    }

    pub fn tile_edge(&self) -> u32 {
        self.tile_edge
    }

    pub fn statistics(&self) -> PoolStats {
        PoolStats {
            idle_shared: self.idle.len(),
            pending_fences: self.pending.len(),
            ..self.metrics
        }
    }
}
