//! 渲染请求的线上布局。
//!
//! # 模块定位（Why）
//! - 每种请求是一条定长或变长的小端记录：主操作码、次操作码、以 32 位字计的长度，随后是字段；
//! - 把"长度计算"与"字节写出"放在同一个类型上，编码器在写出前就能按字数判断是否需要先刷新。
//!
//! # 契约说明（What）
//! - [`RenderRequest::words`] 必须与 [`RenderRequest::encode`] 实际写出的字节数 / 4 完全一致；
//! - `encode` 只追加字节，不检查容量，容量判断由编码器在调用前完成；
//! - 坐标字段为 `i16`，尺寸字段为 `u16`，需要钳制的调用方应先用 [`spark_xrender_core::fixed`] 处理。

use bytes::{BufMut, BytesMut};
use spark_xrender_core::{ResourceId, fixed};

use crate::opcode::{self, render, x11};

/// 可被延迟编码器批量写出的请求。
pub trait RenderRequest {
    /// 记录长度（32 位字），含 4 字节头部。
    fn words(&self) -> usize;

    /// 以小端序追加整条记录。`major` 为渲染扩展主操作码，核心协议请求忽略它。
    fn encode(&self, major: u8, out: &mut BytesMut);
}

fn put_header(out: &mut BytesMut, major: u8, minor: u8, words: usize) {
    out.put_u8(major);
    out.put_u8(minor);
    out.put_u16_le(words as u16);
}

fn put_op(out: &mut BytesMut, op: PictOp) {
    out.put_u8(op as u8);
    out.put_u8(0);
    out.put_u16_le(0);
}

fn put_fixed(out: &mut BytesMut, value: f64) {
    out.put_i32_le(fixed::to_fixed(value));
}

/// 渲染合成运算符。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PictOp {
    Clear = 0,
    Src = 1,
    Dst = 2,
    Over = 3,
    OverReverse = 4,
    In = 5,
    InReverse = 6,
    Out = 7,
    OutReverse = 8,
    Atop = 9,
    AtopReverse = 10,
    Xor = 11,
    Add = 12,
    Saturate = 13,
}

/// 图片采样滤镜。线上以四字节名称表示。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    Fast,
    Good,
    Best,
}

impl Filter {
    pub fn name(self) -> &'static [u8; 4] {
        match self {
            Filter::Fast => b"fast",
            Filter::Good => b"good",
            Filter::Best => b"best",
        }
    }
}

/// 图片重复模式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Repeat {
    #[default]
    None = 0,
    Normal = 1,
    Pad = 2,
    Reflect = 3,
}

/// 16 位通道颜色，通道顺序与线上一致。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Color {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
    pub alpha: u16,
}

impl Color {
    pub const fn new(red: u16, green: u16, blue: u16, alpha: u16) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    /// 由打包的 `0xAARRGGBB` 构造，每个 8 位通道按 `c * 257` 扩展到 16 位。
    pub fn from_argb(argb: u32) -> Self {
        let channel = |shift: u32| fixed::expand_channel((argb >> shift) as u8);
        Self {
            red: channel(16),
            green: channel(8),
            blue: channel(0),
            alpha: channel(24),
        }
    }

    fn put(&self, out: &mut BytesMut) {
        out.put_u16_le(self.red);
        out.put_u16_le(self.green);
        out.put_u16_le(self.blue);
        out.put_u16_le(self.alpha);
    }
}

/// 线上矩形：左上角坐标与尺寸。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub const fn new(x: i16, y: i16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// 由 32 位坐标构造，坐标钳制到 `i16`，尺寸钳制到 `u16`。
    pub fn clamped(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x: fixed::clamp_to_i16(x),
            y: fixed::clamp_to_i16(y),
            width: fixed::clamp_to_u16(width),
            height: fixed::clamp_to_u16(height),
        }
    }

    fn put(&self, out: &mut BytesMut) {
        out.put_i16_le(self.x);
        out.put_i16_le(self.y);
        out.put_u16_le(self.width);
        out.put_u16_le(self.height);
    }
}

/// 以两个角点表示的裁剪框，编码时转换为原点加钳制后的尺寸。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClipBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl ClipBox {
    /// 未设置裁剪时使用的全覆盖框。
    pub const UNBOUNDED: ClipBox = ClipBox {
        x1: 0,
        y1: 0,
        x2: 32_767,
        y2: 32_767,
    };
}

/// 浮点平面坐标。
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PointF {
    pub x: f64,
    pub y: f64,
}

impl PointF {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// 2×3 仿射变换矩阵。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub scale_x: f64,
    pub shear_x: f64,
    pub translate_x: f64,
    pub shear_y: f64,
    pub scale_y: f64,
    pub translate_y: f64,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        scale_x: 1.0,
        shear_x: 0.0,
        translate_x: 0.0,
        shear_y: 0.0,
        scale_y: 1.0,
        translate_y: 0.0,
    };

    pub fn translation(x: f64, y: f64) -> Self {
        Self {
            translate_x: x,
            translate_y: y,
            ..Self::IDENTITY
        }
    }

    pub fn scale(x: f64, y: f64) -> Self {
        Self {
            scale_x: x,
            scale_y: y,
            ..Self::IDENTITY
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// 同一字形集、同一起始偏移下的一串字形。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlyphRun<'a> {
    pub glyphset: ResourceId,
    pub dx: i16,
    pub dy: i16,
    pub glyphs: &'a [u32],
}

/// `FillRectangles`：`5 + 2n` 字。
#[derive(Clone, Copy, Debug)]
pub struct FillRectangles<'a> {
    pub op: PictOp,
    pub dst: ResourceId,
    pub color: Color,
    pub rects: &'a [Rect],
}

impl RenderRequest for FillRectangles<'_> {
    fn words(&self) -> usize {
        5 + 2 * self.rects.len()
    }

    fn encode(&self, major: u8, out: &mut BytesMut) {
        put_header(out, major, render::FILL_RECTANGLES, self.words());
        put_op(out, self.op);
        out.put_u32_le(self.dst.raw());
        self.color.put(out);
        for rect in self.rects {
            rect.put(out);
        }
    }
}

/// `Composite`：9 字。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Composite {
    pub op: PictOp,
    pub src: ResourceId,
    pub mask: ResourceId,
    pub dst: ResourceId,
    pub src_x: i16,
    pub src_y: i16,
    pub mask_x: i16,
    pub mask_y: i16,
    pub dst_x: i16,
    pub dst_y: i16,
    pub width: u16,
    pub height: u16,
}

impl Composite {
    pub const WORDS: usize = 9;
}

impl RenderRequest for Composite {
    fn words(&self) -> usize {
        Self::WORDS
    }

    fn encode(&self, major: u8, out: &mut BytesMut) {
        put_header(out, major, render::COMPOSITE, Self::WORDS);
        put_op(out, self.op);
        out.put_u32_le(self.src.raw());
        out.put_u32_le(self.mask.raw());
        out.put_u32_le(self.dst.raw());
        for coordinate in [
            self.src_x,
            self.src_y,
            self.mask_x,
            self.mask_y,
            self.dst_x,
            self.dst_y,
        ] {
            out.put_i16_le(coordinate);
        }
        out.put_u16_le(self.width);
        out.put_u16_le(self.height);
    }
}

/// `ChangePicture`，只设置 repeat 属性：4 字。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetPictureRepeat {
    pub picture: ResourceId,
    pub repeat: Repeat,
}

impl RenderRequest for SetPictureRepeat {
    fn words(&self) -> usize {
        4
    }

    fn encode(&self, major: u8, out: &mut BytesMut) {
        put_header(out, major, render::CHANGE_PICTURE, 4);
        out.put_u32_le(self.picture.raw());
        out.put_u32_le(opcode::CP_REPEAT);
        out.put_u32_le(self.repeat as u32);
    }
}

/// `SetPictureFilter`：4 字，不带滤镜参数。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetPictureFilter {
    pub picture: ResourceId,
    pub filter: Filter,
}

impl RenderRequest for SetPictureFilter {
    fn words(&self) -> usize {
        4
    }

    fn encode(&self, major: u8, out: &mut BytesMut) {
        put_header(out, major, render::SET_PICTURE_FILTER, 4);
        out.put_u32_le(self.picture.raw());
        out.put_u16_le(4);
        out.put_u16_le(0);
        out.put_slice(self.filter.name());
    }
}

/// `SetPictureTransform`：11 字，3×3 矩阵的末行固定为 `(0, 0, 1)`。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SetPictureTransform {
    pub picture: ResourceId,
    pub transform: Transform,
}

impl RenderRequest for SetPictureTransform {
    fn words(&self) -> usize {
        11
    }

    fn encode(&self, major: u8, out: &mut BytesMut) {
        let t = &self.transform;
        put_header(out, major, render::SET_PICTURE_TRANSFORM, 11);
        out.put_u32_le(self.picture.raw());
        for value in [
            t.scale_x,
            t.shear_x,
            t.translate_x,
            t.shear_y,
            t.scale_y,
            t.translate_y,
        ] {
            put_fixed(out, value);
        }
        out.put_i32_le(0);
        out.put_i32_le(0);
        out.put_i32_le(fixed::FIXED_ONE);
    }
}

/// `SetPictureClipRectangles`，单个矩形：5 字。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetClipRectangle {
    pub picture: ResourceId,
    pub clip: ClipBox,
}

impl RenderRequest for SetClipRectangle {
    fn words(&self) -> usize {
        5
    }

    fn encode(&self, major: u8, out: &mut BytesMut) {
        let clip = &self.clip;
        put_header(out, major, render::SET_PICTURE_CLIP_RECTANGLES, 5);
        out.put_u32_le(self.picture.raw());
        out.put_i16_le(0);
        out.put_i16_le(0);
        out.put_i16_le(fixed::clamp_to_i16(clip.x1));
        out.put_i16_le(fixed::clamp_to_i16(clip.y1));
        out.put_u16_le(fixed::clamp_to_u16(clip.x2.saturating_sub(clip.x1)));
        out.put_u16_le(fixed::clamp_to_u16(clip.y2.saturating_sub(clip.y1)));
    }
}

fn put_stops(out: &mut BytesMut, stops: &[f64], colors: &[u32]) {
    out.put_u32_le(stops.len() as u32);
    for &stop in stops {
        put_fixed(out, stop);
    }
    for &argb in colors {
        Color::from_argb(argb).put(out);
    }
}

/// `CreateLinearGradient`：`7 + 3n` 字。
///
/// `stops` 与 `colors` 一一对应，长度一致由编码器在写出前校验。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CreateLinearGradient<'a> {
    pub id: ResourceId,
    pub start: PointF,
    pub end: PointF,
    pub stops: &'a [f64],
    pub colors: &'a [u32],
}

impl RenderRequest for CreateLinearGradient<'_> {
    fn words(&self) -> usize {
        7 + 3 * self.stops.len()
    }

    fn encode(&self, major: u8, out: &mut BytesMut) {
        put_header(out, major, render::CREATE_LINEAR_GRADIENT, self.words());
        out.put_u32_le(self.id.raw());
        put_fixed(out, self.start.x);
        put_fixed(out, self.start.y);
        put_fixed(out, self.end.x);
        put_fixed(out, self.end.y);
        put_stops(out, self.stops, self.colors);
    }
}

/// `CreateRadialGradient`：`8 + 3n` 字，内外圆共用圆心。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CreateRadialGradient<'a> {
    pub id: ResourceId,
    pub center: PointF,
    pub inner_radius: f64,
    pub outer_radius: f64,
    pub stops: &'a [f64],
    pub colors: &'a [u32],
}

impl RenderRequest for CreateRadialGradient<'_> {
    fn words(&self) -> usize {
        8 + 3 * self.stops.len()
    }

    fn encode(&self, major: u8, out: &mut BytesMut) {
        put_header(out, major, render::CREATE_RADIAL_GRADIENT, self.words());
        out.put_u32_le(self.id.raw());
        for _ in 0..2 {
            put_fixed(out, self.center.x);
            put_fixed(out, self.center.y);
        }
        put_fixed(out, self.inner_radius);
        put_fixed(out, self.outer_radius);
        put_stops(out, self.stops, self.colors);
    }
}

/// 把一串字形拆成线上元素；空串仍输出一个计数为 0 的元素以携带偏移。
fn elements(glyphs: &[u32]) -> impl Iterator<Item = &[u32]> {
    let empty = glyphs.is_empty().then_some(glyphs);
    empty
        .into_iter()
        .chain(glyphs.chunks(opcode::MAX_GLYPHS_PER_ELEMENT))
}

/// `CompositeGlyphs32`：`7 + Σ(2 + glyphs) + 3 × 字形集切换次数` 字。
///
/// # 核心逻辑（How）
/// - 头部携带第一串的字形集；之后每当字形集变化，先写一个计数为 255 的切换元素及新字形集标识；
/// - 超过 254 个字形的串拆成多个元素，续接元素的偏移为 `(0, 0)`，相对位置由服务器累加。
#[derive(Clone, Copy, Debug)]
pub struct CompositeGlyphs<'a> {
    pub op: PictOp,
    pub src: ResourceId,
    pub dst: ResourceId,
    pub src_x: i16,
    pub src_y: i16,
    pub runs: &'a [GlyphRun<'a>],
}

impl RenderRequest for CompositeGlyphs<'_> {
    fn words(&self) -> usize {
        let mut words = 7;
        let mut active = self.runs.first().map(|run| run.glyphset);
        for run in self.runs {
            if active != Some(run.glyphset) {
                words += 3;
                active = Some(run.glyphset);
            }
            words += elements(run.glyphs)
                .map(|element| 2 + element.len())
                .sum::<usize>();
        }
        words
    }

    fn encode(&self, major: u8, out: &mut BytesMut) {
        let first = self.runs.first().map_or(ResourceId::NONE, |run| run.glyphset);
        put_header(out, major, render::COMPOSITE_GLYPHS_32, self.words());
        put_op(out, self.op);
        out.put_u32_le(self.src.raw());
        out.put_u32_le(self.dst.raw());
        out.put_u32_le(0);
        out.put_u32_le(first.raw());
        out.put_i16_le(self.src_x);
        out.put_i16_le(self.src_y);

        let mut active = first;
        for run in self.runs {
            if run.glyphset != active {
                out.put_slice(&[opcode::GLYPHSET_SWITCH, 0, 0, 0]);
                out.put_i16_le(0);
                out.put_i16_le(0);
                out.put_u32_le(run.glyphset.raw());
                active = run.glyphset;
            }
            let mut offset = (run.dx, run.dy);
            for element in elements(run.glyphs) {
                out.put_slice(&[element.len() as u8, 0, 0, 0]);
                out.put_i16_le(offset.0);
                out.put_i16_le(offset.1);
                for &glyph in element {
                    out.put_u32_le(glyph);
                }
                offset = (0, 0);
            }
        }
    }
}

/// `FreePicture`：2 字。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreePicture {
    pub picture: ResourceId,
}

impl RenderRequest for FreePicture {
    fn words(&self) -> usize {
        2
    }

    fn encode(&self, major: u8, out: &mut BytesMut) {
        put_header(out, major, render::FREE_PICTURE, 2);
        out.put_u32_le(self.picture.raw());
    }
}

/// 核心协议 `FreePixmap`：2 字。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreePixmap {
    pub pixmap: ResourceId,
}

impl RenderRequest for FreePixmap {
    fn words(&self) -> usize {
        2
    }

    fn encode(&self, _major: u8, out: &mut BytesMut) {
        put_header(out, x11::FREE_PIXMAP, 0, 2);
        out.put_u32_le(self.pixmap.raw());
    }
}
