//! 定点与坐标钳制工具。
//!
//! 渲染协议以 16.16 有符号定点表示变换矩阵、渐变几何与色标位置，坐标字段则是 16 位整数。

/// `1.0` 的 16.16 定点表示。
pub const FIXED_ONE: i32 = 1 << 16;

/// 将浮点值转换为 16.16 定点：`round(v * 65536)`，越界时饱和。
pub fn to_fixed(value: f64) -> i32 {
    // `as` 对浮点到整数的转换本身即饱和，NaN 映射为 0。
    (value * 65536.0).round() as i32
}

/// 钳制到有符号 16 位坐标范围。
pub fn clamp_to_i16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// 钳制到无符号 16 位尺寸范围。
pub fn clamp_to_u16(value: i32) -> u16 {
    value.clamp(0, u16::MAX as i32) as u16
}

/// 8 位颜色分量扩展到 16 位：`0xff -> 0xffff`、`0x00 -> 0x0000`。
pub fn expand_channel(value: u8) -> u16 {
    u16::from(value) * 257
}
