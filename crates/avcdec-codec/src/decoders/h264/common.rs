//! 解码器公共工具: 图像缓冲区, QP 映射, 帧间运动补偿插值.

use avcdec_core::{AvcError, AvcResult};

// ============================================================
// 工具函数
// ============================================================

pub(super) fn median3(a: i32, b: i32, c: i32) -> i32 {
    a.max(b).min(a.min(b).max(c))
}

/// Luma QP → Chroma QP 映射 (H.264 表 8-15)
pub(super) fn chroma_qp(qp: i32, offset: i32) -> i32 {
    let qpi = (qp + offset).clamp(0, 51);
    CHROMA_QP_TABLE[qpi as usize]
}

/// Chroma QP 映射表 (H.264 表 8-15)
#[rustfmt::skip]
const CHROMA_QP_TABLE: [i32; 52] = [
     0,  1,  2,  3,  4,  5,  6,  7,  8,  9, 10, 11, 12, 13, 14, 15,
    16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 29, 30,
    31, 32, 32, 33, 34, 34, 35, 35, 36, 36, 37, 37, 37, 38, 38, 38,
    39, 39, 39, 39,
];

// ============================================================
// 图像缓冲区
// ============================================================

/// 4:2:0 平面图像缓冲区, Y/U/V 连续存放, 步长等于平面宽度
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct PictureBuffer {
    data: Vec<u8>,
    width: usize,
    height: usize,
}

impl PictureBuffer {
    /// 指定尺寸所需字节数
    pub(super) fn frame_size(width: usize, height: usize) -> usize {
        width * height * 3 / 2
    }

    /// 接管宿主分配的内存
    pub(super) fn from_vec(mut data: Vec<u8>, width: usize, height: usize) -> AvcResult<Self> {
        let size = Self::frame_size(width, height);
        if data.capacity() < size {
            return Err(AvcError::OutOfMemory(format!(
                "H264: 帧缓冲区容量不足, need={}, have={}",
                size,
                data.capacity()
            )));
        }
        data.clear();
        data.resize(size, 128);
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// 交还底层内存
    pub(super) fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub(super) fn width(&self) -> usize {
        self.width
    }

    pub(super) fn height(&self) -> usize {
        self.height
    }

    fn luma_len(&self) -> usize {
        self.width * self.height
    }

    fn chroma_len(&self) -> usize {
        (self.width / 2) * (self.height / 2)
    }

    pub(super) fn luma(&self) -> &[u8] {
        &self.data[..self.luma_len()]
    }

    /// 色度平面, `c` 为 0 (Cb) 或 1 (Cr)
    pub(super) fn chroma(&self, c: usize) -> &[u8] {
        let start = self.luma_len() + c.min(1) * self.chroma_len();
        &self.data[start..start + self.chroma_len()]
    }

    /// 三个平面的可变引用
    pub(super) fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let (luma_len, chroma_len) = (self.luma_len(), self.chroma_len());
        let (y, rest) = self.data.split_at_mut(luma_len);
        let (u, v) = rest.split_at_mut(chroma_len);
        (y, u, &mut v[..chroma_len])
    }

    pub(super) fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }

    /// 整帧复制 (尺寸不同时不做任何事)
    pub(super) fn copy_from(&mut self, other: &PictureBuffer) {
        if self.data.len() == other.data.len() {
            self.data.copy_from_slice(&other.data);
        }
    }

    /// 复制一个宏块的同位样本
    pub(super) fn copy_mb_from(&mut self, other: &PictureBuffer, mb_x: usize, mb_y: usize) {
        if self.data.len() != other.data.len() {
            return;
        }
        let (w, cw) = (self.width, self.width / 2);
        let (luma_len, chroma_len) = (self.luma_len(), self.chroma_len());
        for row in 0..16 {
            let off = (mb_y * 16 + row) * w + mb_x * 16;
            self.data[off..off + 16].copy_from_slice(&other.data[off..off + 16]);
        }
        for c in 0..2 {
            let base = luma_len + c * chroma_len;
            for row in 0..8 {
                let off = base + (mb_y * 8 + row) * cw + mb_x * 8;
                self.data[off..off + 8].copy_from_slice(&other.data[off..off + 8]);
            }
        }
    }
}

// ============================================================
// 运动补偿插值
// ============================================================

#[inline]
fn tap6(a: i32, b: i32, c: i32, d: i32, e: i32, f: i32) -> i32 {
    a - 5 * b + 20 * c + 20 * d - 5 * e + f
}

#[inline]
fn clip1(v: i32) -> i32 {
    v.clamp(0, 255)
}

#[inline]
fn avg(a: i32, b: i32) -> i32 {
    (a + b + 1) >> 1
}

/// 以边缘钳位方式取参考样本窗口
#[allow(clippy::too_many_arguments)]
fn fetch_window(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    x0: i32,
    y0: i32,
    win_w: usize,
    win_h: usize,
    out: &mut [u8],
) {
    let max_x = src_w as i32 - 1;
    let max_y = src_h as i32 - 1;
    for yy in 0..win_h {
        let sy = (y0 + yy as i32).clamp(0, max_y) as usize;
        let row = &src[sy * src_w..(sy + 1) * src_w];
        for xx in 0..win_w {
            let sx = (x0 + xx as i32).clamp(0, max_x) as usize;
            out[yy * win_w + xx] = row[sx];
        }
    }
}

/// 亮度 1/4 像素运动补偿 (6 抽头 1,-5,20,20,-5,1 与双线性平均).
///
/// `(x, y)` 为目标块在图像中的位置, `mv` 以 1/4 亮度样本为单位;
/// 结果写入 `dst` 中同一位置.
#[allow(clippy::too_many_arguments)]
pub(super) fn mc_luma_block(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst: &mut [u8],
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    mv: [i32; 2],
) {
    let x_int = x as i32 + (mv[0] >> 2);
    let y_int = y as i32 + (mv[1] >> 2);
    let (fx, fy) = (mv[0] & 3, mv[1] & 3);

    let ww = w + 5;
    let wh = h + 5;
    let mut win = [0u8; 21 * 21];
    fetch_window(src, src_w, src_h, x_int - 2, y_int - 2, ww, wh, &mut win);

    let g = |px: i32, py: i32| -> i32 { i32::from(win[(py + 2) as usize * ww + (px + 2) as usize]) };
    let b_raw = |px: i32, py: i32| -> i32 {
        tap6(
            g(px - 2, py),
            g(px - 1, py),
            g(px, py),
            g(px + 1, py),
            g(px + 2, py),
            g(px + 3, py),
        )
    };
    let h_raw = |px: i32, py: i32| -> i32 {
        tap6(
            g(px, py - 2),
            g(px, py - 1),
            g(px, py),
            g(px, py + 1),
            g(px, py + 2),
            g(px, py + 3),
        )
    };
    let b = |px: i32, py: i32| clip1((b_raw(px, py) + 16) >> 5);
    let hh = |px: i32, py: i32| clip1((h_raw(px, py) + 16) >> 5);
    let j = |px: i32, py: i32| {
        let raw = tap6(
            b_raw(px, py - 2),
            b_raw(px, py - 1),
            b_raw(px, py),
            b_raw(px, py + 1),
            b_raw(px, py + 2),
            b_raw(px, py + 3),
        );
        clip1((raw + 512) >> 10)
    };

    for dy in 0..h {
        for dx in 0..w {
            let (px, py) = (dx as i32, dy as i32);
            let val = match (fx, fy) {
                (0, 0) => g(px, py),
                (1, 0) => avg(g(px, py), b(px, py)),
                (2, 0) => b(px, py),
                (3, 0) => avg(g(px + 1, py), b(px, py)),
                (0, 1) => avg(g(px, py), hh(px, py)),
                (0, 2) => hh(px, py),
                (0, 3) => avg(g(px, py + 1), hh(px, py)),
                (1, 1) => avg(b(px, py), hh(px, py)),
                (3, 1) => avg(b(px, py), hh(px + 1, py)),
                (1, 3) => avg(hh(px, py), b(px, py + 1)),
                (3, 3) => avg(hh(px + 1, py), b(px, py + 1)),
                (2, 1) => avg(b(px, py), j(px, py)),
                (2, 3) => avg(j(px, py), b(px, py + 1)),
                (1, 2) => avg(hh(px, py), j(px, py)),
                (3, 2) => avg(j(px, py), hh(px + 1, py)),
                _ => j(px, py),
            };
            dst[(y + dy) * src_w + x + dx] = val as u8;
        }
    }
}

/// 色度 1/8 像素双线性运动补偿 (4:2:0).
///
/// `(x, y)` 为色度平面坐标, `mv` 为亮度运动矢量 (即 1/8 色度样本单位).
#[allow(clippy::too_many_arguments)]
pub(super) fn mc_chroma_block(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst: &mut [u8],
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    mv: [i32; 2],
) {
    let x_int = x as i32 + (mv[0] >> 3);
    let y_int = y as i32 + (mv[1] >> 3);
    let (fx, fy) = (mv[0] & 7, mv[1] & 7);

    let ww = w + 1;
    let mut win = [0u8; 9 * 9];
    fetch_window(src, src_w, src_h, x_int, y_int, ww, h + 1, &mut win);

    let wa = (8 - fx) * (8 - fy);
    let wb = fx * (8 - fy);
    let wc = (8 - fx) * fy;
    let wd = fx * fy;
    for dy in 0..h {
        for dx in 0..w {
            let p = |ox: usize, oy: usize| i32::from(win[(dy + oy) * ww + dx + ox]);
            let sum = wa * p(0, 0) + wb * p(1, 0) + wc * p(0, 1) + wd * p(1, 1);
            dst[(y + dy) * src_w + x + dx] = ((sum + 32) >> 6) as u8;
        }
    }
}
