//! H.264 帧内预测.
//!
//! 提供 Intra_4x4 (9 种模式), Intra_16x16 亮度 (4 种模式) 和色度 8x8 (4 种模式)
//! 预测. 邻居可用性由调用方给出; 模式所需的上方/左侧/左上样本不可用时返回错误,
//! 右上样本不可用时以上方最后一个样本替代.

use avcdec_core::{AvcError, AvcResult};

/// Intra_4x4 预测模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intra4x4Mode {
    Vertical,
    Horizontal,
    Dc,
    DiagonalDownLeft,
    DiagonalDownRight,
    VerticalRight,
    HorizontalDown,
    VerticalLeft,
    HorizontalUp,
}

impl Intra4x4Mode {
    pub fn from_index(mode: u8) -> AvcResult<Self> {
        Ok(match mode {
            0 => Self::Vertical,
            1 => Self::Horizontal,
            2 => Self::Dc,
            3 => Self::DiagonalDownLeft,
            4 => Self::DiagonalDownRight,
            5 => Self::VerticalRight,
            6 => Self::HorizontalDown,
            7 => Self::VerticalLeft,
            8 => Self::HorizontalUp,
            _ => {
                return Err(AvcError::InvalidData(format!(
                    "H264: Intra4x4PredMode 非法, value={}",
                    mode
                )));
            }
        })
    }
}

/// Intra_16x16 亮度预测模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intra16x16Mode {
    Vertical,
    Horizontal,
    Dc,
    Plane,
}

impl Intra16x16Mode {
    pub fn from_index(mode: u8) -> AvcResult<Self> {
        Ok(match mode {
            0 => Self::Vertical,
            1 => Self::Horizontal,
            2 => Self::Dc,
            3 => Self::Plane,
            _ => {
                return Err(AvcError::InvalidData(format!(
                    "H264: Intra16x16PredMode 非法, value={}",
                    mode
                )));
            }
        })
    }
}

/// 色度帧内预测模式 (注意与亮度 16x16 的编号顺序不同)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntraChromaMode {
    Dc,
    Horizontal,
    Vertical,
    Plane,
}

impl IntraChromaMode {
    pub fn from_index(mode: u32) -> AvcResult<Self> {
        Ok(match mode {
            0 => Self::Dc,
            1 => Self::Horizontal,
            2 => Self::Vertical,
            3 => Self::Plane,
            _ => {
                return Err(AvcError::InvalidData(format!(
                    "H264: intra_chroma_pred_mode 非法, value={}",
                    mode
                )));
            }
        })
    }
}

/// 预测块的邻居样本可用性
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntraAvail {
    pub left: bool,
    pub top: bool,
    pub top_left: bool,
    pub top_right: bool,
}

fn unavailable(what: &str, needs: &str) -> AvcError {
    AvcError::InvalidData(format!("H264: {} 预测所需的{}样本不可用", what, needs))
}

fn fill_block(plane: &mut [u8], stride: usize, x0: usize, y0: usize, size: usize, val: u8) {
    for dy in 0..size {
        let start = (y0 + dy) * stride + x0;
        plane[start..start + size].fill(val);
    }
}

fn sum_top(plane: &[u8], stride: usize, x0: usize, y0: usize, n: usize) -> u32 {
    let start = (y0 - 1) * stride + x0;
    plane[start..start + n].iter().map(|&v| u32::from(v)).sum()
}

fn sum_left(plane: &[u8], stride: usize, x0: usize, y0: usize, n: usize) -> u32 {
    (0..n)
        .map(|dy| u32::from(plane[(y0 + dy) * stride + x0 - 1]))
        .sum()
}

// ============================================================
// Intra_4x4
// ============================================================

/// Intra_4x4 预测, 结果写入 `(x0, y0)` 处的 4x4 块
pub fn predict_4x4(
    plane: &mut [u8],
    stride: usize,
    x0: usize,
    y0: usize,
    mode: Intra4x4Mode,
    avail: IntraAvail,
) -> AvcResult<()> {
    use Intra4x4Mode::*;

    let need_top = matches!(
        mode,
        Vertical | DiagonalDownLeft | DiagonalDownRight | VerticalRight | HorizontalDown | VerticalLeft
    );
    let need_left = matches!(
        mode,
        Horizontal | DiagonalDownRight | VerticalRight | HorizontalDown | HorizontalUp
    );
    let need_corner = matches!(mode, DiagonalDownRight | VerticalRight | HorizontalDown);
    if need_top && !avail.top {
        return Err(unavailable("Intra4x4", "上方"));
    }
    if need_left && !avail.left {
        return Err(unavailable("Intra4x4", "左侧"));
    }
    if need_corner && !avail.top_left {
        return Err(unavailable("Intra4x4", "左上"));
    }

    // top[0] = p[-1,-1], top[1..9] = p[0..8,-1]; left[0] = p[-1,-1], left[1..5] = p[-1,0..4]
    let mut top = [0i32; 9];
    let mut left = [0i32; 5];
    if avail.top {
        let row = (y0 - 1) * stride + x0;
        for i in 0..4 {
            top[i + 1] = i32::from(plane[row + i]);
        }
        for i in 4..8 {
            top[i + 1] = if avail.top_right {
                i32::from(plane[row + i])
            } else {
                top[4]
            };
        }
    }
    if avail.left {
        for i in 0..4 {
            left[i + 1] = i32::from(plane[(y0 + i) * stride + x0 - 1]);
        }
    }
    if avail.top_left {
        top[0] = i32::from(plane[(y0 - 1) * stride + x0 - 1]);
        left[0] = top[0];
    }
    // p[x,-1] 与 p[-1,y], 下标 -1 指左上角
    let t = |x: i32| top[(x + 1) as usize];
    let l = |y: i32| left[(y + 1) as usize];

    if mode == Dc {
        let dc = match (avail.top, avail.left) {
            (true, true) => (sum_top(plane, stride, x0, y0, 4) + sum_left(plane, stride, x0, y0, 4) + 4) >> 3,
            (true, false) => (sum_top(plane, stride, x0, y0, 4) + 2) >> 2,
            (false, true) => (sum_left(plane, stride, x0, y0, 4) + 2) >> 2,
            (false, false) => 128,
        };
        fill_block(plane, stride, x0, y0, 4, dc as u8);
        return Ok(());
    }

    for y in 0..4i32 {
        for x in 0..4i32 {
            let v = match mode {
                Vertical => t(x),
                Horizontal => l(y),
                DiagonalDownLeft => {
                    if x == 3 && y == 3 {
                        (t(6) + 3 * t(7) + 2) >> 2
                    } else {
                        (t(x + y) + 2 * t(x + y + 1) + t(x + y + 2) + 2) >> 2
                    }
                }
                DiagonalDownRight => {
                    if x > y {
                        (t(x - y - 2) + 2 * t(x - y - 1) + t(x - y) + 2) >> 2
                    } else if x < y {
                        (l(y - x - 2) + 2 * l(y - x - 1) + l(y - x) + 2) >> 2
                    } else {
                        (t(0) + 2 * t(-1) + l(0) + 2) >> 2
                    }
                }
                VerticalRight => {
                    let z = 2 * x - y;
                    let i = x - (y >> 1);
                    if z >= 0 && z % 2 == 0 {
                        (t(i - 1) + t(i) + 1) >> 1
                    } else if z > 0 {
                        (t(i - 2) + 2 * t(i - 1) + t(i) + 2) >> 2
                    } else if z == -1 {
                        (l(0) + 2 * l(-1) + t(0) + 2) >> 2
                    } else {
                        (l(y - 1) + 2 * l(y - 2) + l(y - 3) + 2) >> 2
                    }
                }
                HorizontalDown => {
                    let z = 2 * y - x;
                    let i = y - (x >> 1);
                    if z >= 0 && z % 2 == 0 {
                        (l(i - 1) + l(i) + 1) >> 1
                    } else if z > 0 {
                        (l(i - 2) + 2 * l(i - 1) + l(i) + 2) >> 2
                    } else if z == -1 {
                        (l(0) + 2 * l(-1) + t(0) + 2) >> 2
                    } else {
                        (t(x - 1) + 2 * t(x - 2) + t(x - 3) + 2) >> 2
                    }
                }
                VerticalLeft => {
                    let i = x + (y >> 1);
                    if y % 2 == 0 {
                        (t(i) + t(i + 1) + 1) >> 1
                    } else {
                        (t(i) + 2 * t(i + 1) + t(i + 2) + 2) >> 2
                    }
                }
                HorizontalUp => {
                    let z = x + 2 * y;
                    let i = y + (x >> 1);
                    if z > 5 {
                        l(3)
                    } else if z == 5 {
                        (l(2) + 3 * l(3) + 2) >> 2
                    } else if z % 2 == 0 {
                        (l(i) + l(i + 1) + 1) >> 1
                    } else {
                        (l(i) + 2 * l(i + 1) + l(i + 2) + 2) >> 2
                    }
                }
                Dc => 128,
            };
            plane[(y0 + y as usize) * stride + x0 + x as usize] = v as u8;
        }
    }
    Ok(())
}

// ============================================================
// Intra_16x16 与色度
// ============================================================

/// Intra_16x16 亮度预测
pub fn predict_16x16(
    plane: &mut [u8],
    stride: usize,
    x0: usize,
    y0: usize,
    mode: Intra16x16Mode,
    avail: IntraAvail,
) -> AvcResult<()> {
    match mode {
        Intra16x16Mode::Vertical => {
            if !avail.top {
                return Err(unavailable("Intra16x16", "上方"));
            }
            copy_top_down(plane, stride, x0, y0, 16);
        }
        Intra16x16Mode::Horizontal => {
            if !avail.left {
                return Err(unavailable("Intra16x16", "左侧"));
            }
            copy_left_across(plane, stride, x0, y0, 16);
        }
        Intra16x16Mode::Dc => {
            let dc = match (avail.top, avail.left) {
                (true, true) => {
                    (sum_top(plane, stride, x0, y0, 16) + sum_left(plane, stride, x0, y0, 16) + 16)
                        >> 5
                }
                (true, false) => (sum_top(plane, stride, x0, y0, 16) + 8) >> 4,
                (false, true) => (sum_left(plane, stride, x0, y0, 16) + 8) >> 4,
                (false, false) => 128,
            };
            fill_block(plane, stride, x0, y0, 16, dc as u8);
        }
        Intra16x16Mode::Plane => {
            if !(avail.top && avail.left && avail.top_left) {
                return Err(unavailable("Intra16x16 Plane", "上方/左侧/左上"));
            }
            predict_plane(plane, stride, x0, y0, 16);
        }
    }
    Ok(())
}

/// 色度 8x8 预测 (4:2:0)
pub fn predict_chroma(
    plane: &mut [u8],
    stride: usize,
    x0: usize,
    y0: usize,
    mode: IntraChromaMode,
    avail: IntraAvail,
) -> AvcResult<()> {
    match mode {
        IntraChromaMode::Dc => predict_chroma_dc(plane, stride, x0, y0, avail),
        IntraChromaMode::Horizontal => {
            if !avail.left {
                return Err(unavailable("色度", "左侧"));
            }
            copy_left_across(plane, stride, x0, y0, 8);
        }
        IntraChromaMode::Vertical => {
            if !avail.top {
                return Err(unavailable("色度", "上方"));
            }
            copy_top_down(plane, stride, x0, y0, 8);
        }
        IntraChromaMode::Plane => {
            if !(avail.top && avail.left && avail.top_left) {
                return Err(unavailable("色度 Plane", "上方/左侧/左上"));
            }
            predict_plane(plane, stride, x0, y0, 8);
        }
    }
    Ok(())
}

/// 色度 DC: 每个 4x4 子块按位置选择邻居
fn predict_chroma_dc(plane: &mut [u8], stride: usize, x0: usize, y0: usize, avail: IntraAvail) {
    for (bx, by) in [(0usize, 0usize), (4, 0), (0, 4), (4, 4)] {
        let (sx, sy) = (x0 + bx, y0 + by);
        let top = if avail.top {
            Some(sum_top(plane, stride, sx, y0, 4))
        } else {
            None
        };
        let left = if avail.left {
            Some(sum_left(plane, stride, x0, sy, 4))
        } else {
            None
        };
        // 右上子块优先用上方, 左下子块优先用左侧
        let dc = match ((bx, by), top, left) {
            ((4, 0), Some(t), _) => (t + 2) >> 2,
            ((0, 4), _, Some(l)) => (l + 2) >> 2,
            (_, Some(t), Some(l)) => (t + l + 4) >> 3,
            (_, Some(t), None) => (t + 2) >> 2,
            (_, None, Some(l)) => (l + 2) >> 2,
            (_, None, None) => 128,
        };
        fill_block(plane, stride, sx, sy, 4, dc as u8);
    }
}

fn copy_top_down(plane: &mut [u8], stride: usize, x0: usize, y0: usize, size: usize) {
    let src = (y0 - 1) * stride + x0;
    for dy in 0..size {
        plane.copy_within(src..src + size, (y0 + dy) * stride + x0);
    }
}

fn copy_left_across(plane: &mut [u8], stride: usize, x0: usize, y0: usize, size: usize) {
    for dy in 0..size {
        let row = (y0 + dy) * stride;
        let val = plane[row + x0 - 1];
        plane[row + x0..row + x0 + size].fill(val);
    }
}

/// 平面预测, size 为 16 (亮度) 或 8 (4:2:0 色度)
fn predict_plane(plane: &mut [u8], stride: usize, x0: usize, y0: usize, size: usize) {
    let n = size as i32;
    let half = n / 2;
    // p(x, -1) 与 p(-1, y), 下标 -1 指左上角
    let top = |x: i32| i32::from(plane[(y0 - 1) * stride + (x0 as i32 + x) as usize]);
    let left = |y: i32| i32::from(plane[(y0 as i32 + y) as usize * stride + x0 - 1]);

    let mut h = 0i32;
    let mut v = 0i32;
    for i in 0..half {
        h += (i + 1) * (top(half + i) - top(half - 2 - i));
        v += (i + 1) * (left(half + i) - left(half - 2 - i));
    }
    let a = 16 * (left(n - 1) + top(n - 1));
    let (b, c) = if size == 16 {
        ((5 * h + 32) >> 6, (5 * v + 32) >> 6)
    } else {
        ((34 * h + 32) >> 6, (34 * v + 32) >> 6)
    };
    let center = half - 1;
    for y in 0..n {
        for x in 0..n {
            let val = (a + b * (x - center) + c * (y - center) + 16) >> 5;
            plane[(y0 + y as usize) * stride + x0 + x as usize] = val.clamp(0, 255) as u8;
        }
    }
}
