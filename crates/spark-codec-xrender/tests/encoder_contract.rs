//! `encoder_contract` 集成测试：验证延迟编码器的刷新时机、围栏登记与遮罩瓦片轮换。
//!
//! # 测试目标（Why）
//! - 刷新过晚会写穿缓冲，过早则失去批处理意义；序号窗口失守会让服务器端序号回绕；
//! - 共享缓冲在围栏完成前被复用会覆盖尚未合成的遮罩，这类错误只在特定调用序列下出现。
//!
//! # 结构安排（How）
//! - 以记录型连接驱动编码器，只通过发送记录与连接调用计数观察行为；
//! - 确定性用例覆盖各刷新条件与遮罩场景，`batches_never_exceed_capacity` 以随机请求序列检查容量与计数守恒。

use proptest::prelude::*;
use spark_codec_xrender::{
    Color, CompositeGlyphs, DeferredEncoder, GlyphRun, MaskSource, MaskTile, MaskedComposite,
    PictOp, Rect,
};
use spark_xrender_core::{
    ResourceId, XrConfig, XrError, codes, test_stubs::RecordingConnection,
};

fn encoder_with(config: XrConfig, conn: RecordingConnection) -> DeferredEncoder<RecordingConnection> {
    DeferredEncoder::new(conn, &config, ResourceId::new(1)).expect("构建编码器")
}

fn masked(width: u16, height: u16) -> MaskedComposite {
    MaskedComposite {
        op: PictOp::Over,
        src: ResourceId::new(0x10),
        dst: ResourceId::new(0x11),
        src_x: 0,
        src_y: 0,
        dst_x: 0,
        dst_y: 0,
        width,
        height,
    }
}

/// 以 `value` 填满一块 `width × height` 的遮罩并合成。
fn composite_tile(
    encoder: &mut DeferredEncoder<RecordingConnection>,
    width: u32,
    height: u32,
    value: u8,
) -> Result<(), XrError> {
    let data = vec![value; (width * height) as usize];
    encoder.masked_composite(
        &masked(width as u16, height as u16),
        MaskSource::Tile(MaskTile {
            data: &data,
            offset: 0,
            stride: width as usize,
            width,
            height,
        }),
    )
}

/// 读取第 `index` 条合成命令（每条 36 字节）的遮罩坐标。
fn mask_origin(commands: &[u8], index: usize) -> (i16, i16) {
    let at = index * 36 + 24;
    (
        i16::from_le_bytes([commands[at], commands[at + 1]]),
        i16::from_le_bytes([commands[at + 2], commands[at + 3]]),
    )
}

#[test]
fn capacity_flush_happens_before_the_overflowing_record() {
    let config = XrConfig::default()
        .with_shared_buffers(0)
        .with_encode_capacity(64)
        .expect("容量合法");
    let mut encoder = encoder_with(config, RecordingConnection::new());

    encoder.free_picture(ResourceId::new(2)).expect("第一条");
    let fill = [Rect::new(0, 0, 1, 1); 4];
    encoder
        .fill_rectangles(ResourceId::new(3), PictOp::Src, Color::default(), &fill)
        .expect("13 字的填充");
    assert!(encoder.connection().transmissions().is_empty());

    encoder.free_picture(ResourceId::new(4)).expect("溢出前先刷新");
    let conn = encoder.connection();
    assert_eq!(conn.transmissions().len(), 1);
    assert_eq!(conn.transmissions()[0].command_count, 2);
    assert_eq!(conn.transmissions()[0].commands.len(), 60);
    assert_eq!(encoder.pending_commands(), 1);
    assert_eq!(encoder.buffered_bytes(), 8);
    assert!(encoder.is_owner());
}

#[test]
fn eager_flush_without_queued_tiles() {
    let config = XrConfig::default().with_shared_buffers(0);
    let mut encoder = encoder_with(config, RecordingConnection::new());

    // 每条 8 字节：第 513 条之后缓冲超过 4 KiB，第 514 条触发刷新。
    for picture in 0..514u32 {
        encoder.free_picture(ResourceId::new(picture)).expect("编码");
    }
    let conn = encoder.connection();
    assert_eq!(conn.transmissions().len(), 1);
    assert_eq!(conn.transmissions()[0].command_count, 513);
    assert_eq!(conn.end_count(), 1);
    assert_eq!(encoder.pending_commands(), 1);
}

#[test]
fn sequence_horizon_forces_a_synchronization() {
    let config = XrConfig::default()
        .with_shared_buffers(0)
        .with_sequence_horizon(10);
    let mut encoder = encoder_with(config, RecordingConnection::new());

    for picture in 0..12u32 {
        encoder.free_picture(ResourceId::new(picture)).expect("编码");
    }
    let conn = encoder.connection();
    assert_eq!(conn.sync_count(), 1);
    assert_eq!(conn.transmissions().len(), 1);
    assert_eq!(conn.transmissions()[0].command_count, 11);
    assert_eq!(conn.begin_count(), 2);
    assert_eq!(encoder.pending_commands(), 1);
}

#[test]
fn five_tiles_share_one_upload() {
    let mut encoder = encoder_with(XrConfig::default(), RecordingConnection::new());
    for value in 1..=5u8 {
        composite_tile(&mut encoder, 100, 50, value).expect("合成");
    }
    encoder.release().expect("交接");

    let conn = encoder.connection();
    assert_eq!(conn.transmissions().len(), 1);
    let sent = &conn.transmissions()[0];
    assert_eq!(sent.command_count, 5);
    assert_eq!((sent.mask_width, sent.mask_height), (200, 150));
    assert!(sent.shared);
    assert!(sent.pixels_in_shared_region);
    assert_eq!(sent.mask_buffer_id, 4);
    assert_eq!(sent.mask_y_offset, 768);

    let origins: Vec<_> = (0..5).map(|i| mask_origin(&sent.commands, i)).collect();
    assert_eq!(origins, vec![(0, 0), (100, 0), (0, 50), (100, 50), (0, 100)]);
    for i in 0..5 {
        let at = i * 36 + 12;
        assert_eq!(
            &sent.commands[at..at + 4],
            &encoder.mask_resources().picture.raw().to_le_bytes()
        );
    }

    assert_eq!(sent.mask_rows[0][99], 1);
    assert_eq!(sent.mask_rows[0][100], 2);
    assert_eq!(sent.mask_rows[75][150], 4);
    assert_eq!(sent.mask_rows[149][0], 5);
    assert_eq!(sent.mask_rows[149][150], 0);
}

#[test]
fn shared_upload_is_fenced_on_the_next_take() {
    let mut encoder = encoder_with(XrConfig::default(), RecordingConnection::new());
    composite_tile(&mut encoder, 128, 128, 9).expect("合成");
    encoder.release().expect("交接");
    assert!(encoder.pool().is_fence_pending());

    encoder.acquire().expect("接管");
    assert!(!encoder.pool().is_fence_pending());
    assert_eq!(encoder.pool().pending_count(), 1);
    assert_eq!(encoder.connection().issued_fences().len(), 1);
    encoder.release().expect("空交接");

    encoder.connection_mut().complete_all();
    encoder.acquire().expect("再次接管");
    assert_eq!(encoder.pool().pending_count(), 0);
    assert_eq!(encoder.pool().idle_shared_count(), 4);
}

#[test]
fn busy_shared_buffers_fall_back_to_the_private_buffer() {
    let config = XrConfig::default().with_shared_buffers(1);
    let mut encoder = encoder_with(config, RecordingConnection::new());

    composite_tile(&mut encoder, 200, 200, 1).expect("第一批");
    encoder.release().expect("交接");
    composite_tile(&mut encoder, 200, 200, 2).expect("第二批");
    encoder.release().expect("交接");

    let conn = encoder.connection();
    let sent = conn.transmissions();
    assert_eq!((sent[0].mask_buffer_id, sent[0].shared), (1, true));
    assert_eq!((sent[1].mask_buffer_id, sent[1].shared), (0, false));
    assert!(sent[0].pixels_in_shared_region);
    assert!(!sent[1].pixels_in_shared_region);
    assert_eq!(encoder.pool().statistics().fallback_acquisitions, 1);
}

#[test]
fn full_tile_buffer_flushes_and_retries_once() {
    let config = XrConfig::default().with_shared_buffers(0);
    let mut encoder = encoder_with(config, RecordingConnection::new());

    composite_tile(&mut encoder, 200, 200, 1).expect("第一块");
    composite_tile(&mut encoder, 200, 200, 2).expect("刷新后重试");

    let conn = encoder.connection();
    assert_eq!(conn.transmissions().len(), 1);
    let first = &conn.transmissions()[0];
    assert_eq!(first.command_count, 1);
    assert_eq!((first.mask_width, first.mask_height), (200, 200));
    assert_eq!(first.mask_rows[0][0], 1);
    assert_eq!(encoder.pending_commands(), 1);
    assert_eq!(encoder.pool().active_tile_count(), 1);
}

#[test]
fn tiles_stay_with_their_composite_across_capacity_flushes() {
    let config = XrConfig::default()
        .with_shared_buffers(0)
        .with_encode_capacity(64)
        .expect("容量合法");
    let mut encoder = encoder_with(config, RecordingConnection::new());

    for value in 1..=4u8 {
        composite_tile(&mut encoder, 10, 10, value).expect("合成");
    }
    encoder.release().expect("交接");

    let sent = encoder.connection().transmissions();
    assert_eq!(sent.len(), 4);
    for (index, batch) in sent.iter().enumerate() {
        assert_eq!(batch.command_count, 1);
        assert_eq!((batch.mask_width, batch.mask_height), (10, 10));
        assert_eq!(batch.mask_rows[0][0], index as u8 + 1);
        assert_eq!(mask_origin(&batch.commands, 0), (0, 0));
    }
}

#[test]
fn missing_fence_hands_the_connection_back() {
    let mut encoder = encoder_with(XrConfig::default(), RecordingConnection::new());
    composite_tile(&mut encoder, 128, 128, 1).expect("合成");
    encoder.release().expect("交接");

    encoder.connection_mut().withhold_fences(true);
    let err = encoder.acquire().expect_err("未发放围栏");
    assert_eq!(err.code(), codes::FENCE_NOT_ISSUED);
    assert!(!encoder.is_owner());
    assert!(!encoder.connection().is_owned());
    assert!(encoder.pool().is_fence_pending());

    // 继续绘制仍然报告同一错误，待登记缓冲保持原位。
    let err = composite_tile(&mut encoder, 128, 128, 2).expect_err("仍未发放围栏");
    assert_eq!(err.code(), codes::FENCE_NOT_ISSUED);
    assert_eq!(encoder.pending_commands(), 0);
    assert!(encoder.pool().is_fence_pending());

    encoder.connection_mut().withhold_fences(false);
    composite_tile(&mut encoder, 128, 128, 3).expect("围栏恢复后继续合成");
    encoder.release().expect("交接");

    let sent = encoder.connection().transmissions();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].shared && sent[1].shared);
    assert_ne!(sent[0].mask_buffer_id, sent[1].mask_buffer_id);
    assert_eq!(encoder.pool().pending_count(), 1);
    assert!(encoder.pool().is_fence_pending());
    assert_eq!(encoder.pool().statistics().lost_buffers, 0);
}

#[test]
fn missing_shared_memory_uploads_inline() {
    let mut encoder = encoder_with(
        XrConfig::default(),
        RecordingConnection::without_shared_memory(),
    );
    assert_eq!(encoder.pool().shared_capacity(), 0);
    composite_tile(&mut encoder, 200, 200, 1).expect("合成");
    encoder.release().expect("交接");

    let sent = &encoder.connection().transmissions()[0];
    assert!(!sent.shared);
    assert_eq!(sent.mask_buffer_id, 0);
}

#[test]
fn plain_mask_picture_bypasses_the_tile_buffer() {
    let mut encoder = encoder_with(XrConfig::default(), RecordingConnection::new());
    encoder
        .masked_composite(&masked(5, 5), MaskSource::Picture(ResourceId::new(0x99)))
        .expect("合成");
    encoder.release().expect("交接");

    let sent = &encoder.connection().transmissions()[0];
    assert_eq!(&sent.commands[12..16], &0x99u32.to_le_bytes());
    assert_eq!(mask_origin(&sent.commands, 0), (0, 0));
    assert_eq!(sent.mask_width, 0);
    assert!(sent.mask_rows.is_empty());
}

#[test]
fn oversized_glyph_request_is_left_to_the_caller() {
    let config = XrConfig::default()
        .with_shared_buffers(0)
        .with_encode_capacity(64)
        .expect("容量合法");
    let mut encoder = encoder_with(config, RecordingConnection::new());
    let glyphs: Vec<u32> = (0..20).collect();
    let runs = [GlyphRun {
        glyphset: ResourceId::new(5),
        dx: 0,
        dy: 0,
        glyphs: &glyphs,
    }];
    let err = encoder
        .composite_glyphs(&CompositeGlyphs {
            op: PictOp::Over,
            src: ResourceId::new(2),
            dst: ResourceId::new(3),
            src_x: 0,
            src_y: 0,
            runs: &runs,
        })
        .expect_err("29 字超过 16 字容量");
    assert!(matches!(
        err,
        XrError::RequestTooLarge {
            words: 29,
            capacity_words: 16
        }
    ));
    assert_eq!(encoder.pending_commands(), 0);
    assert!(!encoder.is_owner());
}

#[test]
fn into_connection_hands_off_pending_work() {
    let mut encoder = encoder_with(XrConfig::default(), RecordingConnection::new());
    encoder.free_pixmap(ResourceId::new(3)).expect("编码");
    let conn = encoder.into_connection().expect("交接");
    assert_eq!(conn.transmissions().len(), 1);
    assert!(!conn.is_owned());
}

#[derive(Clone, Copy, Debug)]
enum Record {
    Free,
    Fill(usize),
    Glyphs(usize),
}

fn record() -> impl Strategy<Value = Record> {
    prop_oneof![
        Just(Record::Free),
        (1usize..=20).prop_map(Record::Fill),
        (1usize..=40).prop_map(Record::Glyphs),
    ]
}

proptest! {
    #[test]
    fn batches_never_exceed_capacity(records in proptest::collection::vec(record(), 1..200)) {
        let capacity = 256;
        let config = XrConfig::default()
            .with_shared_buffers(0)
            .with_encode_capacity(capacity)
            .expect("容量合法");
        let mut encoder = encoder_with(config, RecordingConnection::new());
        let rects = [Rect::new(1, 2, 3, 4); 20];
        let glyphs: Vec<u32> = (0..40).collect();

        for record in &records {
            match *record {
                Record::Free => encoder.free_picture(ResourceId::new(7)),
                Record::Fill(n) => encoder.fill_rectangles(
                    ResourceId::new(8),
                    PictOp::Over,
                    Color::default(),
                    &rects[..n],
                ),
                Record::Glyphs(n) => {
                    let runs = [GlyphRun {
                        glyphset: ResourceId::new(9),
                        dx: 1,
                        dy: 1,
                        glyphs: &glyphs[..n],
                    }];
                    encoder.composite_glyphs(&CompositeGlyphs {
                        op: PictOp::Over,
                        src: ResourceId::new(2),
                        dst: ResourceId::new(3),
                        src_x: 0,
                        src_y: 0,
                        runs: &runs,
                    })
                }
            }
            .expect("所有记录都不超过容量");
            prop_assert!(encoder.buffered_bytes() <= capacity);
        }
        encoder.release().expect("交接");

        let sent = encoder.connection().transmissions();
        let total: u32 = sent.iter().map(|batch| batch.command_count).sum();
        prop_assert_eq!(total as usize, records.len());
        for batch in sent {
            prop_assert!(batch.commands.len() <= capacity);
        }
        prop_assert_eq!(encoder.pending_commands(), 0);
    }
}
