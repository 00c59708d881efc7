//! 未解码宏块的错误隐藏.
//!
//! 优先从参考帧复制同位样本 (零运动矢量), 没有参考帧时用已解码邻居做 DC 预测,
//! 两者都不可用时填充中灰.

use avcdec_core::AvcResult;

use super::common::PictureBuffer;
use super::intra::{Intra16x16Mode, IntraAvail, IntraChromaMode, predict_16x16, predict_chroma};
use super::macroblock_state::{MbArena, MbKind};

/// 隐藏数据来源
#[derive(Debug, Clone, Copy)]
pub(super) struct ConcealSource<'a> {
    /// 用于复制的参考帧及其唯一标识, None 表示没有参考帧
    pub(super) reference: Option<(&'a PictureBuffer, i64)>,
    /// false 时只填充中灰
    pub(super) enabled: bool,
    /// 隐藏宏块记录的 QP 与条带序号 (去块滤波使用)
    pub(super) qp: i32,
    pub(super) slice_num: u32,
}

/// 隐藏所有未解码宏块, 返回隐藏的宏块数
pub(super) fn conceal_picture(
    buf: &mut PictureBuffer,
    arena: &mut MbArena,
    source: ConcealSource<'_>,
) -> AvcResult<usize> {
    let mb_width = arena.mb_width();
    if mb_width == 0 {
        return Ok(0);
    }
    let mut concealed = 0;
    for addr in 0..arena.len() {
        if arena.get(addr).is_none_or(|mb| mb.is_decoded()) {
            continue;
        }
        let (mb_x, mb_y) = (addr % mb_width, addr / mb_width);
        let mut ref_pic = -1;
        match source.reference {
            Some((reference, id)) if source.enabled => {
                buf.copy_mb_from(reference, mb_x, mb_y);
                ref_pic = id;
            }
            _ if source.enabled => conceal_dc(buf, arena, addr, mb_x, mb_y)?,
            _ => fill_mb(buf, mb_x, mb_y, 128),
        }

        if let Some(mb) = arena.get_mut(addr) {
            mb.kind = MbKind::PSkip;
            mb.slice_num = source.slice_num;
            mb.qp = source.qp;
            mb.mv = [[0; 2]; 16];
            mb.ref_idx = [0; 4];
            mb.ref_pic = [ref_pic; 4];
            mb.total_coeff = [0; 24];
            mb.concealed = true;
        }
        concealed += 1;
    }
    Ok(concealed)
}

/// 用已解码 (或已隐藏) 的左/上邻居做 DC 预测
fn conceal_dc(buf: &mut PictureBuffer, arena: &MbArena, addr: usize, mb_x: usize, mb_y: usize) -> AvcResult<()> {
    let decoded = |dx, dy| {
        arena
            .neighbour_addr(addr, dx, dy)
            .and_then(|n| arena.get(n))
            .is_some_and(|mb| mb.is_decoded())
    };
    let avail = IntraAvail {
        left: decoded(-1, 0),
        top: decoded(0, -1),
        ..IntraAvail::default()
    };
    let stride = buf.width();
    let (luma, cb, cr) = buf.planes_mut();
    predict_16x16(luma, stride, mb_x * 16, mb_y * 16, Intra16x16Mode::Dc, avail)?;
    predict_chroma(cb, stride / 2, mb_x * 8, mb_y * 8, IntraChromaMode::Dc, avail)?;
    predict_chroma(cr, stride / 2, mb_x * 8, mb_y * 8, IntraChromaMode::Dc, avail)?;
    Ok(())
}

fn fill_mb(buf: &mut PictureBuffer, mb_x: usize, mb_y: usize, value: u8) {
    let stride = buf.width();
    let (luma, cb, cr) = buf.planes_mut();
    for row in 0..16 {
        let start = (mb_y * 16 + row) * stride + mb_x * 16;
        luma[start..start + 16].fill(value);
    }
    for plane in [cb, cr] {
        for row in 0..8 {
            let start = (mb_y * 8 + row) * (stride / 2) + mb_x * 8;
            plane[start..start + 8].fill(value);
        }
    }
}
