//! 帧内宏块重建: I_NxN, I_16x16, I_PCM.

use avcdec_core::AvcResult;

use super::common::PictureBuffer;
use super::intra::{
    Intra4x4Mode, Intra16x16Mode, IntraAvail, IntraChromaMode, predict_4x4, predict_16x16,
    predict_chroma,
};
use super::macroblock::MbSyntax;
use super::macroblock_state::{BLK_TO_RASTER, MbArena};
use super::syntax::MbType;

/// 相邻宏块能否用于帧内预测; 受限帧内预测时帧间宏块视为不可用
pub(super) fn intra_neighbour_usable(
    arena: &MbArena,
    addr: usize,
    dx: i32,
    dy: i32,
    constrained_intra_pred: bool,
) -> bool {
    arena
        .available(addr, dx, dy)
        .and_then(|n| arena.get(n))
        .is_some_and(|mb| !(constrained_intra_pred && mb.kind.is_inter()))
}

/// 宏块级 (16x16 亮度与色度) 邻居可用性
pub(super) fn mb_intra_avail(arena: &MbArena, addr: usize, constrained_intra_pred: bool) -> IntraAvail {
    let usable = |dx, dy| intra_neighbour_usable(arena, addr, dx, dy, constrained_intra_pred);
    IntraAvail {
        left: usable(-1, 0),
        top: usable(0, -1),
        top_left: usable(-1, -1),
        top_right: usable(1, -1),
    }
}

/// 解码顺序中位于 `raster` 之前的块
fn decoded_before(raster: usize, blk_idx: usize) -> bool {
    BLK_TO_RASTER[..blk_idx].contains(&raster)
}

/// 4x4 块邻居可用性, `mb` 为宏块级可用性
fn block_avail(mb: IntraAvail, raster: usize, blk_idx: usize) -> IntraAvail {
    let bx = raster % 4;
    let by = raster / 4;
    let top_left = match (bx, by) {
        (0, 0) => mb.top_left,
        (0, _) => mb.left,
        (_, 0) => mb.top,
        _ => true,
    };
    let top_right = match (bx, by) {
        (3, 0) => mb.top_right,
        (_, 0) => mb.top,
        (3, _) => false,
        _ => decoded_before(raster - 4 + 1, blk_idx),
    };
    IntraAvail {
        left: bx > 0 || mb.left,
        top: by > 0 || mb.top,
        top_left,
        top_right,
    }
}

/// 重建一个帧内宏块 (预测 + 残差)
pub(super) fn reconstruct_intra(
    buf: &mut PictureBuffer,
    arena: &MbArena,
    addr: usize,
    syn: &MbSyntax,
    chroma_qp_offset: [i32; 2],
    constrained_intra_pred: bool,
) -> AvcResult<()> {
    let mb_width = arena.mb_width().max(1);
    let (mb_x, mb_y) = (addr % mb_width, addr / mb_width);
    let stride = buf.width();
    let stride_c = stride / 2;
    let (luma, cb, cr) = buf.planes_mut();

    if syn.mb_type == MbType::IPcm {
        write_pcm(luma, cb, cr, stride, mb_x, mb_y, &syn.pcm);
        return Ok(());
    }

    let mb_avail = mb_intra_avail(arena, addr, constrained_intra_pred);
    match syn.mb_type {
        MbType::I4x4 => {
            for (blk_idx, &raster) in BLK_TO_RASTER.iter().enumerate() {
                let x0 = mb_x * 16 + (raster % 4) * 4;
                let y0 = mb_y * 16 + (raster / 4) * 4;
                let mode = Intra4x4Mode::from_index(syn.intra4x4_modes[raster])?;
                predict_4x4(luma, stride, x0, y0, mode, block_avail(mb_avail, raster, blk_idx))?;
                syn.add_luma_block_residual(luma, stride, x0, y0, raster);
            }
        }
        MbType::I16x16 { pred_mode, .. } => {
            let mode = Intra16x16Mode::from_index(pred_mode)?;
            predict_16x16(luma, stride, mb_x * 16, mb_y * 16, mode, mb_avail)?;
            syn.add_luma_residual(luma, stride, mb_x, mb_y);
        }
        _ => {}
    }

    let chroma_mode = IntraChromaMode::from_index(syn.chroma_pred_mode)?;
    predict_chroma(cb, stride_c, mb_x * 8, mb_y * 8, chroma_mode, mb_avail)?;
    predict_chroma(cr, stride_c, mb_x * 8, mb_y * 8, chroma_mode, mb_avail)?;
    syn.add_chroma_residual([cb, cr], stride_c, mb_x, mb_y, chroma_qp_offset);
    Ok(())
}

fn write_pcm(
    luma: &mut [u8],
    cb: &mut [u8],
    cr: &mut [u8],
    stride: usize,
    mb_x: usize,
    mb_y: usize,
    pcm: &[u8],
) {
    let (luma_samples, chroma_samples) = pcm.split_at(256);
    for (row, src) in luma_samples.chunks_exact(16).enumerate() {
        let start = (mb_y * 16 + row) * stride + mb_x * 16;
        luma[start..start + 16].copy_from_slice(src);
    }
    let stride_c = stride / 2;
    for (plane, samples) in [cb, cr].into_iter().zip(chroma_samples.chunks_exact(64)) {
        for (row, src) in samples.chunks_exact(8).enumerate() {
            let start = (mb_y * 8 + row) * stride_c + mb_x * 8;
            plane[start..start + 8].copy_from_slice(src);
        }
    }
}
