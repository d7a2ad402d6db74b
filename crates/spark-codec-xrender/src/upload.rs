//! 遮罩上传分帧。
//!
//! # 模块定位（Why）
//! - [`Connection::transmit`](spark_xrender_core::Connection::transmit) 的实现者需要在命令字节之前写出一条
//!   遮罩上传请求；各平台适配器都应以同样的方式分帧，否则服务器读取到的遮罩坐标会与合成命令不一致；
//! - 本模块只负责字节布局与上传路径选择，不做任何 IO。
//!
//! # 契约说明（What）
//! - 8 位 ZPixmap 的扫描线按 4 字节对齐，上传宽度取 [`padded_width`]；
//! - 内联上传：24 字节 `PutImage` 头部后跟 `padded_width × height` 字节像素；
//! - 共享上传：40 字节 `ShmPutImage`，源 y 偏移为该瓦片缓冲在共享区域中的行偏移；
//! - 任一上传都算作一条额外请求，适配器计算序号时需计入 [`UploadPlan::request_count`]。

use bytes::{BufMut, BytesMut};
use spark_xrender_core::{MaskUpload, ResourceId, Result, Transmission, XrError};

use crate::opcode::{self, shm, x11};

pub const PUT_IMAGE_HEADER_LEN: usize = 24;
pub const SHM_PUT_IMAGE_HEADER_LEN: usize = 40;

/// 扫描线宽度向上对齐到 4 字节。
pub fn padded_width(width: u32) -> u32 {
    width.next_multiple_of(4)
}

/// 一次发送需要的遮罩上传方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadPlan {
    /// 本批次没有遮罩瓦片。
    None,
    /// 经共享内存上传，服务器异步读取。
    Shared {
        padded_width: u32,
        height: u32,
        y_offset: u32,
    },
    /// 像素随请求内联发送。
    Inline { padded_width: u32, height: u32 },
}

impl UploadPlan {
    pub fn for_transmission(transmission: &Transmission<'_>) -> Self {
        let mask = &transmission.mask;
        if mask.is_empty() {
            return UploadPlan::None;
        }
        let padded_width = padded_width(mask.width);
        if mask.shared {
            UploadPlan::Shared {
                padded_width,
                height: mask.height,
                y_offset: mask.y_offset,
            }
        } else {
            UploadPlan::Inline {
                padded_width,
                height: mask.height,
            }
        }
    }

    /// 上传请求本身占用的请求条数。
    pub fn request_count(&self) -> u32 {
        match self {
            UploadPlan::None => 0,
            UploadPlan::Shared { .. } | UploadPlan::Inline { .. } => 1,
        }
    }
}

/// 内联 `PutImage` 请求头。
///
/// `gcontext` 为服务器端 GC 标识。长度超出 16 位请求长度时返回 [`XrError::RequestTooLarge`]。
pub fn put_image_header(
    pixmap: ResourceId,
    gcontext: u32,
    width: u32,
    height: u32,
) -> Result<[u8; PUT_IMAGE_HEADER_LEN]> {
    let padded = padded_width(width) as usize;
    let words = 6 + padded * height as usize / 4;
    if words > usize::from(u16::MAX) {
        return Err(XrError::RequestTooLarge {
            words,
            capacity_words: usize::from(u16::MAX),
        });
    }

    let mut header = [0u8; PUT_IMAGE_HEADER_LEN];
    let mut out = &mut header[..];
    out.put_u8(x11::PUT_IMAGE);
    out.put_u8(opcode::Z_PIXMAP);
    out.put_u16_le(words as u16);
    out.put_u32_le(pixmap.raw());
    out.put_u32_le(gcontext);
    out.put_u16_le(padded as u16);
    out.put_u16_le(height as u16);
    out.put_i16_le(0);
    out.put_i16_le(0);
    out.put_u8(0);
    out.put_u8(opcode::MASK_DEPTH);
    out.put_u16_le(0);
    Ok(header)
}

/// 内联上传的像素：逐行复制已占用范围，每行补零到对齐宽度。
pub fn inline_image(mask: &MaskUpload<'_>) -> BytesMut {
    let padded = padded_width(mask.width) as usize;
    let mut image = BytesMut::with_capacity(padded * mask.height as usize);
    for row in 0..mask.height {
        let pixels = mask.row(row);
        image.put_slice(pixels);
        image.put_bytes(0, padded - pixels.len());
    }
    image
}

/// 服务器端共享内存段的描述，由适配器在挂载时获得。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShmSegment {
    pub major_opcode: u8,
    pub segment: u32,
    /// 图像数据在段内的字节偏移。
    pub offset: u32,
    /// 整个共享图像的宽高。
    pub total_width: u32,
    pub total_height: u32,
}

/// 共享内存 `ShmPutImage` 请求。
pub fn shm_put_image_header(
    segment: &ShmSegment,
    gcontext: u32,
    mask: &MaskUpload<'_>,
) -> [u8; SHM_PUT_IMAGE_HEADER_LEN] {
    let mut header = [0u8; SHM_PUT_IMAGE_HEADER_LEN];
    let mut out = &mut header[..];
    out.put_u8(segment.major_opcode);
    out.put_u8(shm::PUT_IMAGE);
    out.put_u16_le(10);
    out.put_u32_le(mask.pixmap.raw());
    out.put_u32_le(gcontext);
    out.put_u16_le(segment.total_width as u16);
    out.put_u16_le(segment.total_height as u16);
    out.put_u16_le(0);
    out.put_u16_le(mask.y_offset as u16);
    out.put_u16_le(padded_width(mask.width) as u16);
    out.put_u16_le(mask.height as u16);
    out.put_i16_le(0);
    out.put_i16_le(0);
    out.put_u8(opcode::MASK_DEPTH);
    out.put_u8(opcode::Z_PIXMAP);
    out.put_u8(0);
    out.put_u8(0);
    out.put_u32_le(segment.segment);
    out.put_u32_le(segment.offset);
    header
}

#[cfg(test)]
mod tests {
    use spark_xrender_core::GcId;

    use super::*;

    fn mask(width: u32, height: u32, shared: bool, pixels: &[u8]) -> MaskUpload<'_> {
        MaskUpload {
            pixmap: ResourceId::new(0x0040_0001),
            gc: GcId::new(3),
            width,
            height,
            stride: 8,
            y_offset: 512,
            buffer_id: 3,
            shared,
            pixels,
        }
    }

    #[test]
    fn widths_align_to_four_bytes() {
        assert_eq!(padded_width(0), 0);
        assert_eq!(padded_width(1), 4);
        assert_eq!(padded_width(4), 4);
        assert_eq!(padded_width(250), 252);
    }

    #[test]
    fn plan_follows_the_mask_description() {
        let pixels = [0u8; 32];
        let commands = [0u8; 8];
        let plan = |mask| {
            UploadPlan::for_transmission(&Transmission {
                commands: &commands,
                command_count: 2,
                mask,
            })
        };
        assert_eq!(plan(mask(0, 0, false, &pixels)), UploadPlan::None);
        assert_eq!(
            plan(mask(5, 3, true, &pixels)),
            UploadPlan::Shared {
                padded_width: 8,
                height: 3,
                y_offset: 512
            }
        );
        assert_eq!(
            plan(mask(5, 3, false, &pixels)).request_count(),
            1
        );
    }

    #[test]
    fn put_image_header_counts_padded_rows() {
        let header = put_image_header(ResourceId::new(7), 9, 5, 3).expect("长度合法");
        assert_eq!(header[0], 72);
        assert_eq!(header[1], 2);
        assert_eq!(u16::from_le_bytes([header[2], header[3]]), 6 + 8 * 3 / 4);
        assert_eq!(u16::from_le_bytes([header[12], header[13]]), 8);
        assert_eq!(header[21], 8);

        assert!(put_image_header(ResourceId::new(7), 9, 4096, 4096).is_err());
    }

    #[test]
    fn inline_rows_are_zero_padded() {
        let pixels: Vec<u8> = (1..=16).collect();
        let image = inline_image(&mask(3, 2, false, &pixels));
        assert_eq!(&image[..], &[1, 2, 3, 0, 9, 10, 11, 0]);
    }

    #[test]
    fn shm_header_reads_from_the_tile_offset() {
        let pixels = [0u8; 32];
        let segment = ShmSegment {
            major_opcode: 130,
            segment: 0x77,
            offset: 0,
            total_width: 256,
            total_height: 1024,
        };
        let header = shm_put_image_header(&segment, 9, &mask(6, 4, true, &pixels));
        assert_eq!(&header[..4], &[130, 3, 10, 0]);
        assert_eq!(u16::from_le_bytes([header[18], header[19]]), 512);
        assert_eq!(u16::from_le_bytes([header[20], header[21]]), 8);
        assert_eq!(&header[28..30], &[8, 2]);
        assert_eq!(&header[32..36], &0x77u32.to_le_bytes());
    }
}
