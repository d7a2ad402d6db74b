use core::ops::Range;

use spark_xrender_core::XrConfig;

/// 瓦片在缓冲区内的左上角坐标。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TilePlacement {
    pub x: u32,
    pub y: u32,
}

/// 缓冲区当前已占用的范围，即本批次需要上传的图像尺寸。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileBounds {
    pub width: u32,
    pub height: u32,
}

impl TileBounds {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// 调用方提供的遮罩源数据。
///
/// # 契约说明（What）
/// - 第 `y` 行的像素位于 `data[offset + y * stride .. offset + y * stride + width]`；
/// - **前置条件**：`data` 必须覆盖全部 `height` 行，否则复制时越界 panic。
#[derive(Clone, Copy, Debug)]
pub struct MaskTile<'a> {
    pub data: &'a [u8],
    pub offset: usize,
    pub stride: usize,
    pub width: u32,
    pub height: u32,
}

/// 共享内存上传的收益阈值（以已占用像素计）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShmThresholds {
    /// 空闲共享缓冲多于一个时使用的阈值。
    pub low: u32,
    /// 只剩最后一个（或没有）空闲共享缓冲时使用的阈值。
    pub high: u32,
}

impl ShmThresholds {
    pub fn from_config(config: &XrConfig) -> Self {
        Self {
            low: config.shm_threshold_low(),
            high: config.shm_threshold_high(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct PackingCursor {
    x: u32,
    y: u32,
    row_height: u32,
    max_width: u32,
    tiles: usize,
}

/// 单块遮罩装箱区域。
///
/// # 模块角色（Why）
/// - 以货架装箱把多个小遮罩拼进同一块区域，随命令批次一次性上传；
/// - 判定"装不下"只看剩余高度，不回头寻找空隙，保证每次装箱 O(1)。
///
/// # 核心机制（How）
/// - 瓦片在当前行从左到右排布，行高取该行最高瓦片；
/// - 当前行宽度不足时另起一行，`y` 前进上一行的行高；
/// - 当前行顶部以下的剩余高度小于请求高度时直接失败，即便水平方向仍有空间。
///
/// # 契约说明（What）
/// - 同一装箱周期内游标单调不减；[`TileBuffer::reset`] 开启新周期，
///   调用方必须确认服务器不再读取该区域后才能重置；
/// - 私有缓冲 `id == 0` 且不可共享；共享缓冲 `id` 从 1 开始，`y_offset` 为其在共享大区域中的行偏移；
/// - 缓冲只记录几何与装箱状态，像素存放在缓冲池持有的内存里：私有缓冲对应池内堆内存，
///   共享缓冲对应适配器交来的共享区域中 [`TileBuffer::byte_range`] 那一段。
#[derive(Debug)]
pub struct TileBuffer {
    id: u32,
    width: u32,
    height: u32,
    stride: usize,
    y_offset: u32,
    shareable: bool,
    thresholds: ShmThresholds,
    cursor: PackingCursor,
}

impl TileBuffer {
    /// 创建私有（不可共享）缓冲，行跨度等于边长。
    pub fn private(edge: u32, thresholds: ShmThresholds) -> Self {
        let stride = edge as usize;
        Self {
            id: 0,
            width: edge,
            height: edge,
            stride,
            y_offset: 0,
            shareable: false,
            thresholds,
            cursor: PackingCursor::default(),
        }
    }

    /// 创建共享缓冲，占据共享区域中从第 `y_offset` 行起的 `edge` 行。
    pub fn shared(
        id: u32,
        edge: u32,
        stride: usize,
        y_offset: u32,
        thresholds: ShmThresholds,
    ) -> Self {
        Self {
            id,
            width: edge,
            height: edge,
            stride,
            y_offset,
            shareable: true,
            thresholds,
            cursor: PackingCursor::default(),
        }
    }

    /// 为 `width × height` 的瓦片寻找位置；装不下返回 `None`。
    pub fn store_tile(&mut self, width: u32, height: u32) -> Option<TilePlacement> {
        if width > self.width {
            return None;
        }
        let cursor = &mut self.cursor;
        if self.height - cursor.y - cursor.row_height < height {
            return None;
        }

        let x = if self.width - cursor.x >= width {
            let x = cursor.x;
            cursor.x += width;
            cursor.row_height = cursor.row_height.max(height);
            x
        } else {
            cursor.y += cursor.row_height;
            cursor.x = width;
            cursor.row_height = height;
            0
        };
        cursor.max_width = cursor.max_width.max(cursor.x);
        cursor.tiles += 1;

        let placement = TilePlacement { x, y: cursor.y };
        tracing::trace!(
            buffer = self.id,
            x = placement.x,
            y = placement.y,
            width,
            height,
            "tile stored"
        );
        Some(placement)
    }

    /// 装箱并把遮罩像素逐行复制进 `region`。
    ///
    /// `region` 必须是本缓冲自己的像素区域（长度不小于 [`TileBuffer::region_len`]），第 0 行位于起点。
    pub fn store_mask_tile(
        &mut self,
        region: &mut [u8],
        tile: &MaskTile<'_>,
    ) -> Option<TilePlacement> {
        let placement = self.store_tile(tile.width, tile.height)?;
        let width = tile.width as usize;
        for row in 0..tile.height as usize {
            let src = tile.offset + row * tile.stride;
            let dst = (placement.y as usize + row) * self.stride + placement.x as usize;
            region[dst..dst + width].copy_from_slice(&tile.data[src..src + width]);
        }
        Some(placement)
    }

    /// 当前已占用范围（最大行宽 × 含未封口行在内的总高度）。
    pub fn bounds(&self) -> TileBounds {
        TileBounds {
            width: self.cursor.max_width,
            height: self.cursor.y + self.cursor.row_height,
        }
    }

    /// 判断本批次是否值得走共享内存上传。
    ///
    /// 空闲共享缓冲充裕（多于一个）时使用低阈值，否则使用高阈值，把最后一块共享缓冲留给更大的上传。
    pub fn is_upload_with_shm_profitable(&self, idle_shared: usize) -> bool {
        if !self.shareable {
            return false;
        }
        let occupied = self.bounds().area();
        let threshold = if idle_shared > 1 {
            self.thresholds.low
        } else {
            self.thresholds.high
        };
        occupied >= u64::from(threshold)
    }

    /// 开启新的装箱周期。像素内容不清零，上传只读取已占用范围。
    pub fn reset(&mut self) {
        self.cursor = PackingCursor::default();
    }

    pub fn tile_count(&self) -> usize {
        self.cursor.tiles
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.tiles == 0
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn y_offset(&self) -> u32 {
        self.y_offset
    }

    pub fn is_shareable(&self) -> bool {
        self.shareable
    }

    /// 像素区域的字节数：`stride * height`。
    pub fn region_len(&self) -> usize {
        self.stride * self.height as usize
    }

    /// 本缓冲在其所属内存中的字节范围；共享缓冲从 `y_offset * stride` 开始。
    pub fn byte_range(&self) -> Range<usize> {
        let start = self.y_offset as usize * self.stride;
        start..start + self.region_len()
    }
}
