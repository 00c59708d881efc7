//! 帧间宏块重建: 运动矢量预测, P_Skip 推导, 运动补偿.

use avcdec_core::{AvcError, AvcResult};

use super::common::{PictureBuffer, mc_chroma_block, mc_luma_block, median3};
use super::dpb::Dpb;
use super::macroblock::MbSyntax;
use super::macroblock_state::{MbArena, block_to_8x8};
use super::syntax::MbType;

// ============================================================
// 运动信息
// ============================================================

/// 一个运动补偿分区 (位置与尺寸以 4x4 块为单位)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct MotionPart {
    pub(super) x: usize,
    pub(super) y: usize,
    pub(super) w: usize,
    pub(super) h: usize,
    pub(super) ref_idx: u8,
    pub(super) mv: [i32; 2],
}

/// 宏块的运动推导结果
#[derive(Debug, Clone)]
pub(super) struct MbMotion {
    /// 每个 4x4 块的运动矢量 (光栅顺序)
    pub(super) mv: [[i32; 2]; 16],
    /// 每个 4x4 块的参考索引 (光栅顺序)
    pub(super) ref_idx: [i8; 16],
    parts: [MotionPart; 16],
    num_parts: usize,
}

impl MbMotion {
    fn new() -> Self {
        Self {
            mv: [[0; 2]; 16],
            ref_idx: [-1; 16],
            parts: [MotionPart::default(); 16],
            num_parts: 0,
        }
    }

    pub(super) fn parts(&self) -> &[MotionPart] {
        &self.parts[..self.num_parts]
    }

    /// 每个 8x8 分区的参考索引
    pub(super) fn ref_idx_8x8(&self) -> [i8; 4] {
        [
            self.ref_idx[0],
            self.ref_idx[2],
            self.ref_idx[8],
            self.ref_idx[10],
        ]
    }

    fn is_decoded(&self, raster: usize) -> bool {
        self.ref_idx[raster] >= 0
    }

    fn push(&mut self, part: MotionPart) {
        for y in part.y..part.y + part.h {
            for x in part.x..part.x + part.w {
                self.mv[y * 4 + x] = part.mv;
                self.ref_idx[y * 4 + x] = part.ref_idx as i8;
            }
        }
        if let Some(slot) = self.parts.get_mut(self.num_parts) {
            *slot = part;
            self.num_parts += 1;
        }
    }
}

/// 相邻分区的运动数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Neighbour {
    Unavailable,
    /// 帧内宏块的 ref_idx 为 -1
    Available { ref_idx: i32, mv: [i32; 2] },
}

impl Neighbour {
    fn ref_idx(self) -> i32 {
        match self {
            Self::Unavailable => -1,
            Self::Available { ref_idx, .. } => ref_idx,
        }
    }

    fn mv(self) -> [i32; 2] {
        match self {
            Self::Unavailable => [0, 0],
            Self::Available { mv, .. } => mv,
        }
    }
}

/// 取 `(bx, by)` 处 4x4 块 (相对当前宏块) 的运动数据
fn neighbour_motion(arena: &MbArena, addr: usize, cur: &MbMotion, bx: i32, by: i32) -> Neighbour {
    if bx >= 4 && by >= 0 {
        return Neighbour::Unavailable;
    }
    if (0..4).contains(&bx) && (0..4).contains(&by) {
        let raster = (by * 4 + bx) as usize;
        return if cur.is_decoded(raster) {
            Neighbour::Available {
                ref_idx: i32::from(cur.ref_idx[raster]),
                mv: cur.mv[raster],
            }
        } else {
            Neighbour::Unavailable
        };
    }
    let Some((mb, blk)) = arena.luma_block_neighbour(addr, bx, by) else {
        return Neighbour::Unavailable;
    };
    match arena.get(mb) {
        Some(info) if info.kind.is_inter() => Neighbour::Available {
            ref_idx: i32::from(info.ref_idx[block_to_8x8(blk)]),
            mv: info.mv[blk],
        },
        Some(_) => Neighbour::Available {
            ref_idx: -1,
            mv: [0, 0],
        },
        None => Neighbour::Unavailable,
    }
}

/// 分区形状决定的方向性预测规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MvShape {
    Median,
    Upper16x8,
    Lower16x8,
    Left8x16,
    Right8x16,
}

/// 运动矢量预测 (8.4.1.3), `(x, y, w)` 以 4x4 块为单位
fn predict_mv(
    arena: &MbArena,
    addr: usize,
    cur: &MbMotion,
    (x, y, w): (usize, usize, usize),
    ref_idx: i32,
    shape: MvShape,
) -> [i32; 2] {
    let (x, y, w) = (x as i32, y as i32, w as i32);
    let a = neighbour_motion(arena, addr, cur, x - 1, y);
    let mut b = neighbour_motion(arena, addr, cur, x, y - 1);
    let mut c = neighbour_motion(arena, addr, cur, x + w, y - 1);
    if c == Neighbour::Unavailable {
        c = neighbour_motion(arena, addr, cur, x - 1, y - 1);
    }

    match shape {
        MvShape::Upper16x8 if b.ref_idx() == ref_idx => return b.mv(),
        MvShape::Lower16x8 if a.ref_idx() == ref_idx => return a.mv(),
        MvShape::Left8x16 if a.ref_idx() == ref_idx => return a.mv(),
        MvShape::Right8x16 if c.ref_idx() == ref_idx => return c.mv(),
        _ => {}
    }

    if b == Neighbour::Unavailable && c == Neighbour::Unavailable && a != Neighbour::Unavailable {
        b = a;
        c = a;
    }

    let matches = [a, b, c]
        .iter()
        .filter(|n| n.ref_idx() == ref_idx)
        .count();
    if matches == 1 {
        for n in [a, b, c] {
            if n.ref_idx() == ref_idx {
                return n.mv();
            }
        }
    }
    let (ma, mb, mc) = (a.mv(), b.mv(), c.mv());
    [median3(ma[0], mb[0], mc[0]), median3(ma[1], mb[1], mc[1])]
}

/// P_Skip 宏块的运动矢量
pub(super) fn p_skip_mv(arena: &MbArena, addr: usize) -> [i32; 2] {
    let cur = MbMotion::new();
    let a = neighbour_motion(arena, addr, &cur, -1, 0);
    let b = neighbour_motion(arena, addr, &cur, 0, -1);
    let zero_ref0 = Neighbour::Available {
        ref_idx: 0,
        mv: [0, 0],
    };
    if a == Neighbour::Unavailable || b == Neighbour::Unavailable || a == zero_ref0 || b == zero_ref0 {
        return [0, 0];
    }
    predict_mv(arena, addr, &cur, (0, 0, 4), 0, MvShape::Median)
}

/// P_Skip 宏块的运动: 16x16, ref_idx 0
pub(super) fn skip_motion(arena: &MbArena, addr: usize) -> MbMotion {
    let mut motion = MbMotion::new();
    motion.push(MotionPart {
        x: 0,
        y: 0,
        w: 4,
        h: 4,
        ref_idx: 0,
        mv: p_skip_mv(arena, addr),
    });
    motion
}

/// 由 mb_pred / sub_mb_pred 语法推导各分区运动矢量
fn add_mv(mvp: [i32; 2], mvd: [i32; 2]) -> [i32; 2] {
    [mvp[0].saturating_add(mvd[0]), mvp[1].saturating_add(mvd[1])]
}

pub(super) fn derive_motion(arena: &MbArena, addr: usize, syn: &MbSyntax) -> AvcResult<MbMotion> {
    let mut motion = MbMotion::new();
    match syn.mb_type {
        MbType::P16x16 | MbType::P16x8 | MbType::P8x16 => {
            for part in 0..syn.mb_type.num_partitions() {
                let (x, y, w, h) = syn.mb_type.partition_rect(part);
                let shape = match (syn.mb_type, part) {
                    (MbType::P16x8, 0) => MvShape::Upper16x8,
                    (MbType::P16x8, _) => MvShape::Lower16x8,
                    (MbType::P8x16, 0) => MvShape::Left8x16,
                    (MbType::P8x16, _) => MvShape::Right8x16,
                    _ => MvShape::Median,
                };
                let ref_idx = syn.ref_idx[part];
                let mvp = predict_mv(arena, addr, &motion, (x, y, w), i32::from(ref_idx), shape);
                let mvd = syn.mvd[part][0];
                motion.push(MotionPart {
                    x,
                    y,
                    w,
                    h,
                    ref_idx,
                    mv: add_mv(mvp, mvd),
                });
            }
        }
        MbType::P8x8 | MbType::P8x8Ref0 => {
            for i8x8 in 0..4 {
                let (ox, oy) = ((i8x8 % 2) * 2, (i8x8 / 2) * 2);
                let ref_idx = syn.ref_idx[i8x8];
                let sub_type = syn.sub_mb_types[i8x8];
                for sub in 0..sub_type.num_parts() {
                    let (sx, sy, w, h) = sub_type.part_rect(sub);
                    let (x, y) = (ox + sx, oy + sy);
                    let mvp =
                        predict_mv(arena, addr, &motion, (x, y, w), i32::from(ref_idx), MvShape::Median);
                    let mvd = syn.mvd[i8x8][sub];
                    motion.push(MotionPart {
                        x,
                        y,
                        w,
                        h,
                        ref_idx,
                        mv: add_mv(mvp, mvd),
                    });
                }
            }
        }
        other => {
            return Err(AvcError::Internal(format!(
                "H264: 帧内宏块类型进入帧间重建, mb_type={:?}",
                other
            )));
        }
    }
    Ok(motion)
}

// ============================================================
// 运动补偿
// ============================================================

/// 按分区从参考帧做运动补偿, 预测样本写入当前图像
pub(super) fn motion_compensate(
    buf: &mut PictureBuffer,
    mb_x: usize,
    mb_y: usize,
    motion: &MbMotion,
    ref_list: &[Option<usize>],
    dpb: &Dpb,
) -> AvcResult<()> {
    let (width, height) = (buf.width(), buf.height());
    let (luma, cb, cr) = buf.planes_mut();
    for part in motion.parts() {
        let store = ref_list
            .get(usize::from(part.ref_idx))
            .copied()
            .flatten()
            .ok_or_else(|| {
                AvcError::InvalidData(format!(
                    "H264: 参考图像缺失, ref_idx={}, list_len={}",
                    part.ref_idx,
                    ref_list.len()
                ))
            })?;
        let reference = dpb
            .frame(store)
            .and_then(|frame| frame.buf.as_ref())
            .ok_or_else(|| AvcError::Internal(format!("H264: 参考帧存储不可用, idx={}", store)))?;
        if reference.width() != width || reference.height() != height {
            return Err(AvcError::InvalidData("H264: 参考帧尺寸与当前图像不一致".into()));
        }

        let (px, py) = (mb_x * 16 + part.x * 4, mb_y * 16 + part.y * 4);
        let (pw, ph) = (part.w * 4, part.h * 4);
        mc_luma_block(reference.luma(), width, height, luma, px, py, pw, ph, part.mv);
        for (c, plane) in [&mut *cb, &mut *cr].into_iter().enumerate() {
            mc_chroma_block(
                reference.chroma(c),
                width / 2,
                height / 2,
                plane,
                px / 2,
                py / 2,
                pw / 2,
                ph / 2,
                part.mv,
            );
        }
    }
    Ok(())
}

/// 帧间宏块完整重建: 运动补偿 + 残差; 跳过宏块 `syn` 为 None
#[allow(clippy::too_many_arguments)]
pub(super) fn reconstruct_inter(
    buf: &mut PictureBuffer,
    arena: &MbArena,
    addr: usize,
    syn: Option<&MbSyntax>,
    ref_list: &[Option<usize>],
    dpb: &Dpb,
    chroma_qp_offset: [i32; 2],
) -> AvcResult<MbMotion> {
    let mb_width = arena.mb_width().max(1);
    let (mb_x, mb_y) = (addr % mb_width, addr / mb_width);
    let motion = match syn {
        Some(syn) => derive_motion(arena, addr, syn)?,
        None => skip_motion(arena, addr),
    };
    motion_compensate(buf, mb_x, mb_y, &motion, ref_list, dpb)?;

    if let Some(syn) = syn {
        let stride = buf.width();
        let (luma, cb, cr) = buf.planes_mut();
        syn.add_luma_residual(luma, stride, mb_x, mb_y);
        syn.add_chroma_residual([cb, cr], stride / 2, mb_x, mb_y, chroma_qp_offset);
    }
    Ok(motion)
}
