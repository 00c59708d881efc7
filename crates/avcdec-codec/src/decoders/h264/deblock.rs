//! H.264 环路去块滤波 (8.7).
//!
//! 整幅图像解码完成后按宏块地址顺序处理: 每个宏块先滤波亮度垂直边界 (从左到右),
//! 再滤波水平边界 (从上到下); 色度沿相同的 8 像素边界处理.
//! 参数取自当前宏块 (q 侧) 所在条带.

use super::common::{PictureBuffer, chroma_qp};
use super::macroblock_state::{MbArena, MbInfo, block_to_8x8};

/// 条带级去块参数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct DeblockParams {
    /// disable_deblocking_filter_idc: 0=启用, 1=关闭, 2=不跨条带边界
    pub(super) disable_idc: u32,
    /// FilterOffsetA = slice_alpha_c0_offset_div2 << 1
    pub(super) filter_offset_a: i32,
    /// FilterOffsetB = slice_beta_offset_div2 << 1
    pub(super) filter_offset_b: i32,
}

impl DeblockParams {
    pub(super) fn new(disable_idc: u32, alpha_offset_div2: i32, beta_offset_div2: i32) -> Self {
        Self {
            disable_idc,
            filter_offset_a: alpha_offset_div2 * 2,
            filter_offset_b: beta_offset_div2 * 2,
        }
    }
}

/// 单条边界的滤波门限
#[derive(Debug, Clone, Copy)]
struct Thresholds {
    index_a: usize,
    alpha: i32,
    beta: i32,
}

impl Thresholds {
    fn new(qp_p: i32, qp_q: i32, params: &DeblockParams) -> Self {
        let qp_av = (qp_p + qp_q + 1) >> 1;
        let index_a = (qp_av + params.filter_offset_a).clamp(0, 51) as usize;
        let index_b = (qp_av + params.filter_offset_b).clamp(0, 51) as usize;
        Self {
            index_a,
            alpha: i32::from(ALPHA_TABLE[index_a]),
            beta: i32::from(BETA_TABLE[index_b]),
        }
    }

    fn tc0(&self, bs: u8) -> i32 {
        i32::from(TC0_TABLE[self.index_a][usize::from(bs.clamp(1, 3)) - 1])
    }
}

/// 边界方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeDir {
    Vertical,
    Horizontal,
}

/// 对整幅图像执行去块滤波; `slices[n - 1]` 为条带序号 n 的参数
pub(super) fn deblock_picture(buf: &mut PictureBuffer, arena: &MbArena, slices: &[DeblockParams]) {
    let mb_width = arena.mb_width();
    if mb_width == 0 {
        return;
    }
    let width = buf.width();
    let (luma, cb, cr) = buf.planes_mut();

    for addr in 0..arena.len() {
        let Some(q) = arena.get(addr) else {
            continue;
        };
        if !q.is_decoded() {
            continue;
        }
        let Some(params) = q
            .slice_num
            .checked_sub(1)
            .and_then(|i| slices.get(i as usize))
        else {
            continue;
        };
        if params.disable_idc == 1 {
            continue;
        }
        let (mb_x, mb_y) = (addr % mb_width, addr / mb_width);
        let edge_neighbour = |dx: i32, dy: i32| {
            arena
                .neighbour_addr(addr, dx, dy)
                .and_then(|n| arena.get(n))
                .filter(|p| p.is_decoded() && (params.disable_idc != 2 || p.slice_num == q.slice_num))
        };
        let left = edge_neighbour(-1, 0);
        let top = edge_neighbour(0, -1);

        for dir in [EdgeDir::Vertical, EdgeDir::Horizontal] {
            let outer = match dir {
                EdgeDir::Vertical => left,
                EdgeDir::Horizontal => top,
            };
            for edge in 0..4 {
                let p = if edge == 0 {
                    match outer {
                        Some(p) => p,
                        None => continue,
                    }
                } else {
                    q
                };
                let bs = edge_strengths(p, q, dir, edge);
                if bs == [0; 4] {
                    continue;
                }

                let th = Thresholds::new(p.qp, q.qp, params);
                for k in 0..16 {
                    let (idx, step) = match dir {
                        EdgeDir::Vertical => ((mb_y * 16 + k) * width + mb_x * 16 + edge * 4, 1),
                        EdgeDir::Horizontal => ((mb_y * 16 + edge * 4) * width + mb_x * 16 + k, width),
                    };
                    filter_luma(luma, idx, step, bs[k / 4], &th);
                }

                if edge % 2 != 0 {
                    continue;
                }
                let cw = width / 2;
                for (c, plane) in [&mut *cb, &mut *cr].into_iter().enumerate() {
                    let th = Thresholds::new(
                        chroma_qp(p.qp, p.chroma_qp_offset[c]),
                        chroma_qp(q.qp, q.chroma_qp_offset[c]),
                        params,
                    );
                    for k in 0..8 {
                        let (idx, step) = match dir {
                            EdgeDir::Vertical => ((mb_y * 8 + k) * cw + mb_x * 8 + edge * 2, 1),
                            EdgeDir::Horizontal => ((mb_y * 8 + edge * 2) * cw + mb_x * 8 + k, cw),
                        };
                        filter_chroma(plane, idx, step, bs[k / 2], &th);
                    }
                }
            }
        }
    }
}

/// 一条 16 像素边界上 4 段的边界强度
fn edge_strengths(p: &MbInfo, q: &MbInfo, dir: EdgeDir, edge: usize) -> [u8; 4] {
    let mb_edge = edge == 0;
    std::array::from_fn(|i| {
        let (q_blk, p_blk) = match dir {
            EdgeDir::Vertical => {
                let q_blk = i * 4 + edge;
                (q_blk, if mb_edge { q_blk + 3 } else { q_blk - 1 })
            }
            EdgeDir::Horizontal => {
                let q_blk = edge * 4 + i;
                (q_blk, if mb_edge { q_blk + 12 } else { q_blk - 4 })
            }
        };
        boundary_strength(p, p_blk, q, q_blk, mb_edge)
    })
}

/// 边界强度 bS (8.7.2.1), 块下标为光栅顺序
fn boundary_strength(p: &MbInfo, p_blk: usize, q: &MbInfo, q_blk: usize, mb_edge: bool) -> u8 {
    if p.kind.is_intra() || q.kind.is_intra() {
        return if mb_edge { 4 } else { 3 };
    }
    if p.total_coeff[p_blk] != 0 || q.total_coeff[q_blk] != 0 {
        return 2;
    }
    if p.ref_pic[block_to_8x8(p_blk)] != q.ref_pic[block_to_8x8(q_blk)] {
        return 1;
    }
    let (mv_p, mv_q) = (p.mv[p_blk], q.mv[q_blk]);
    if (mv_p[0] - mv_q[0]).abs() >= 4 || (mv_p[1] - mv_q[1]).abs() >= 4 {
        return 1;
    }
    0
}

/// 亮度单个样本位置的滤波, `q0` 为 q 侧第一个样本下标, `step` 为跨边界方向步长
fn filter_luma(plane: &mut [u8], q0: usize, step: usize, bs: u8, th: &Thresholds) {
    if bs == 0 {
        return;
    }
    let at = |i: isize| q0.wrapping_add_signed(i * step as isize);
    let s = |i: isize| i32::from(plane[at(i)]);
    let (p0, p1, p2, p3) = (s(-1), s(-2), s(-3), s(-4));
    let (q0v, q1, q2, q3) = (s(0), s(1), s(2), s(3));

    if (p0 - q0v).abs() >= th.alpha || (p1 - p0).abs() >= th.beta || (q1 - q0v).abs() >= th.beta {
        return;
    }
    let ap = (p2 - p0).abs() < th.beta;
    let aq = (q2 - q0v).abs() < th.beta;

    if bs >= 4 {
        let small_gap = (p0 - q0v).abs() < (th.alpha >> 2) + 2;
        let mut out = [(at(-1), p0), (at(-2), p1), (at(-3), p2), (at(0), q0v), (at(1), q1), (at(2), q2)];
        if ap && small_gap {
            out[0].1 = (p2 + 2 * p1 + 2 * p0 + 2 * q0v + q1 + 4) >> 3;
            out[1].1 = (p2 + p1 + p0 + q0v + 2) >> 2;
            out[2].1 = (2 * p3 + 3 * p2 + p1 + p0 + q0v + 4) >> 3;
        } else {
            out[0].1 = (2 * p1 + p0 + q1 + 2) >> 2;
        }
        if aq && small_gap {
            out[3].1 = (p1 + 2 * p0 + 2 * q0v + 2 * q1 + q2 + 4) >> 3;
            out[4].1 = (p0 + q0v + q1 + q2 + 2) >> 2;
            out[5].1 = (2 * q3 + 3 * q2 + q1 + q0v + p0 + 4) >> 3;
        } else {
            out[3].1 = (2 * q1 + q0v + p1 + 2) >> 2;
        }
        for (idx, v) in out {
            plane[idx] = v.clamp(0, 255) as u8;
        }
        return;
    }

    let tc0 = th.tc0(bs);
    let tc = tc0 + i32::from(ap) + i32::from(aq);
    let delta = ((((q0v - p0) << 2) + (p1 - q1) + 4) >> 3).clamp(-tc, tc);
    plane[at(-1)] = (p0 + delta).clamp(0, 255) as u8;
    plane[at(0)] = (q0v - delta).clamp(0, 255) as u8;
    if ap {
        let d = ((p2 + ((p0 + q0v + 1) >> 1) - (p1 << 1)) >> 1).clamp(-tc0, tc0);
        plane[at(-2)] = (p1 + d).clamp(0, 255) as u8;
    }
    if aq {
        let d = ((q2 + ((p0 + q0v + 1) >> 1) - (q1 << 1)) >> 1).clamp(-tc0, tc0);
        plane[at(1)] = (q1 + d).clamp(0, 255) as u8;
    }
}

/// 色度单个样本位置的滤波, 只修改 p0/q0
fn filter_chroma(plane: &mut [u8], q0: usize, step: usize, bs: u8, th: &Thresholds) {
    if bs == 0 {
        return;
    }
    let (ip1, ip0, iq1) = (q0 - 2 * step, q0 - step, q0 + step);
    let (p1, p0) = (i32::from(plane[ip1]), i32::from(plane[ip0]));
    let (q0v, q1) = (i32::from(plane[q0]), i32::from(plane[iq1]));

    if (p0 - q0v).abs() >= th.alpha || (p1 - p0).abs() >= th.beta || (q1 - q0v).abs() >= th.beta {
        return;
    }
    let (new_p0, new_q0) = if bs >= 4 {
        ((2 * p1 + p0 + q1 + 2) >> 2, (2 * q1 + q0v + p1 + 2) >> 2)
    } else {
        let tc = th.tc0(bs) + 1;
        let delta = ((((q0v - p0) << 2) + (p1 - q1) + 4) >> 3).clamp(-tc, tc);
        (p0 + delta, q0v - delta)
    };
    plane[ip0] = new_p0.clamp(0, 255) as u8;
    plane[q0] = new_q0.clamp(0, 255) as u8;
}

#[rustfmt::skip]
const ALPHA_TABLE: [u8; 52] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    4, 4, 5, 6, 7, 8, 9, 10, 12, 13, 15, 17, 20, 22, 25, 28,
    32, 36, 40, 45, 50, 56, 63, 71, 80, 90, 101, 113, 127, 144, 162, 182,
    203, 226, 255, 255,
];

#[rustfmt::skip]
const BETA_TABLE: [u8; 52] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 6, 6, 7, 7, 8, 8,
    9, 9, 10, 10, 11, 11, 12, 12, 13, 13, 14, 14, 15, 15, 16, 16,
    17, 17, 18, 18,
];

/// tC0, 列为 bS = 1, 2, 3 (表 8-17)
#[rustfmt::skip]
const TC0_TABLE: [[u8; 3]; 52] = [
    [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0],
    [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0],
    [0, 0, 0], [0, 0, 1], [0, 0, 1], [0, 0, 1], [0, 0, 1], [0, 1, 1], [0, 1, 1], [1, 1, 1],
    [1, 1, 1], [1, 1, 1], [1, 1, 1], [1, 1, 2], [1, 1, 2], [1, 1, 2], [1, 1, 2], [1, 2, 3],
    [1, 2, 3], [2, 2, 3], [2, 2, 4], [2, 3, 4], [2, 3, 4], [3, 3, 5], [3, 4, 6], [3, 4, 6],
    [4, 5, 7], [4, 5, 8], [4, 6, 9], [5, 7, 10], [6, 8, 11], [6, 8, 13], [7, 10, 14], [8, 11, 16],
    [9, 12, 18], [10, 13, 20], [11, 15, 23], [13, 17, 25],
];
