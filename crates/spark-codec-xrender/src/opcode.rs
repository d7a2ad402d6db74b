//! 协议操作码常量。
//!
//! 渲染扩展请求的主操作码在运行时由连接提供，这里只列出次操作码；
//! 核心协议请求使用固定主操作码。

/// 渲染扩展次操作码。
pub mod render {
    pub const CHANGE_PICTURE: u8 = 5;
    pub const SET_PICTURE_CLIP_RECTANGLES: u8 = 6;
    pub const FREE_PICTURE: u8 = 7;
    pub const COMPOSITE: u8 = 8;
    pub const COMPOSITE_GLYPHS_32: u8 = 25;
    pub const FILL_RECTANGLES: u8 = 26;
    pub const SET_PICTURE_TRANSFORM: u8 = 28;
    pub const SET_PICTURE_FILTER: u8 = 30;
    pub const CREATE_LINEAR_GRADIENT: u8 = 34;
    pub const CREATE_RADIAL_GRADIENT: u8 = 35;
}

/// 核心协议主操作码。
pub mod x11 {
    pub const FREE_PIXMAP: u8 = 54;
    pub const PUT_IMAGE: u8 = 72;
}

/// MIT-SHM 扩展次操作码。
pub mod shm {
    pub const PUT_IMAGE: u8 = 3;
}

/// ChangePicture 值掩码中的 repeat 位。
pub const CP_REPEAT: u32 = 1;

/// ZPixmap 图像格式。
pub const Z_PIXMAP: u8 = 2;

/// 遮罩图像的位深。
pub const MASK_DEPTH: u8 = 8;

/// 字形串中表示"切换字形集"的元素计数值。
pub const GLYPHSET_SWITCH: u8 = 255;

/// 单个字形元素可携带的最大字形数。
pub const MAX_GLYPHS_PER_ELEMENT: usize = 254;
