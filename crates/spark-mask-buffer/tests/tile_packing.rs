//! `tile_packing` 集成测试：以随机瓦片序列验证货架装箱的几何性质。
//!
//! # 测试目标（Why）
//! - 装箱结果直接决定合成命令读取遮罩的坐标，一旦两个瓦片重叠，渲染结果会静默出错；
//! - 手写用例只能覆盖少量行切换场景，随机序列更容易触及"行尾换行"与"高度恰好用尽"的边界。
//!
//! # 覆盖性质（What）
//! - 接受的瓦片两两不重叠且落在缓冲区内；
//! - [`TileBuffer::bounds`] 覆盖所有已接受瓦片；
//! - 重置后第一块瓦片总是落在 `(0, 0)`。

use proptest::prelude::*;
use spark_mask_buffer::{ShmThresholds, TileBuffer, TilePlacement};

const EDGE: u32 = 128;
const THRESHOLDS: ShmThresholds = ShmThresholds {
    low: 8192,
    high: 16_384,
};

fn overlaps(a: (TilePlacement, u32, u32), b: (TilePlacement, u32, u32)) -> bool {
    let (pa, wa, ha) = a;
    let (pb, wb, hb) = b;
    pa.x < pb.x + wb && pb.x < pa.x + wa && pa.y < pb.y + hb && pb.y < pa.y + ha
}

#[test]
fn five_wide_tiles_fill_three_rows() {
    let mut buffer = TileBuffer::private(256, THRESHOLDS);
    let expected = [(0, 0), (100, 0), (0, 50), (100, 50), (0, 100)];
    for (x, y) in expected {
        assert_eq!(buffer.store_tile(100, 50), Some(TilePlacement { x, y }));
    }
}

#[test]
fn a_tile_wider_than_the_buffer_never_fits() {
    let mut buffer = TileBuffer::private(64, THRESHOLDS);
    assert!(buffer.store_tile(65, 1).is_none());
    assert!(buffer.is_empty());
}

proptest! {
    #[test]
    fn accepted_tiles_never_overlap(
        sizes in proptest::collection::vec((1u32..=64, 1u32..=64), 1..64)
    ) {
        let mut buffer = TileBuffer::private(EDGE, THRESHOLDS);
        let mut accepted = Vec::new();
        for (width, height) in sizes {
            if let Some(placement) = buffer.store_tile(width, height) {
                prop_assert!(placement.x + width <= EDGE);
                prop_assert!(placement.y + height <= EDGE);
                for &earlier in &accepted {
                    prop_assert!(!overlaps(earlier, (placement, width, height)));
                }
                accepted.push((placement, width, height));
            }
        }

        let bounds = buffer.bounds();
        prop_assert_eq!(buffer.tile_count(), accepted.len());
        for (placement, width, height) in accepted {
            prop_assert!(placement.x + width <= bounds.width);
            prop_assert!(placement.y + height <= bounds.height);
        }
    }

    #[test]
    fn reset_restarts_at_the_origin(
        sizes in proptest::collection::vec((1u32..=64, 1u32..=64), 0..32),
        width in 1u32..=EDGE,
        height in 1u32..=EDGE,
    ) {
        let mut buffer = TileBuffer::private(EDGE, THRESHOLDS);
        for (w, h) in sizes {
            let _ = buffer.store_tile(w, h);
        }
        buffer.reset();
        prop_assert_eq!(buffer.bounds().area(), 0);
        prop_assert_eq!(buffer.store_tile(width, height), Some(TilePlacement { x: 0, y: 0 }));
    }
}
