//! CAVLC 宏块层语法解析.
//!
//! 一个宏块先完整解析到 [`MbSyntax`], 再交给帧内/帧间重建. 解析过程需要
//! 相邻宏块的 Intra4x4PredMode 与非零系数个数, 从 [`MbArena`] 读取.

use avcdec_core::bitreader::BitReader;
use avcdec_core::{AvcError, AvcResult};

use crate::parsers::h264::{read_se, read_te, read_ue};

use super::cavlc::decode_residual_block;
use super::macroblock_state::{BLK_TO_RASTER, MbArena};
use super::common::chroma_qp;
use super::residual::{
    ZIGZAG_4X4, dequant_4x4, dequant_chroma_dc, dequant_luma_dc, idct_4x4_add, inverse_hadamard_2x2,
    inverse_hadamard_4x4,
};
use super::syntax::{
    MbType, SliceType, SubMbType, apply_qp_delta, i_mb_type, p_mb_type, read_coded_block_pattern,
    read_mb_qp_delta,
};

/// I_PCM 样本数 (256 亮度 + 2x64 色度)
const PCM_SAMPLES: usize = 384;

/// 宏块语法解析结果, 解码器持有一份并逐宏块复用
#[derive(Debug, Clone)]
pub(super) struct MbSyntax {
    pub(super) mb_type: MbType,
    /// Intra4x4PredMode (光栅顺序), 非 I_NxN 为 2
    pub(super) intra4x4_modes: [u8; 16],
    pub(super) chroma_pred_mode: u32,
    pub(super) sub_mb_types: [SubMbType; 4],
    /// 每个分区 (或 8x8 子宏块) 的 ref_idx_l0
    pub(super) ref_idx: [u8; 4],
    /// mvd_l0: [分区或 8x8][子分区][x/y]
    pub(super) mvd: [[[i32; 2]; 4]; 4],
    pub(super) cbp: u8,
    /// 本宏块的 QP_Y
    pub(super) qp: i32,
    /// 亮度 16 块 (光栅) + Cb 4 块 + Cr 4 块的 TotalCoeff
    pub(super) total_coeff: [u8; 24],
    /// Intra16x16 DC 系数 (光栅排列的 4x4 矩阵)
    pub(super) luma_dc: [i32; 16],
    /// 亮度 4x4 块系数: [光栅块][光栅位置]
    pub(super) luma: [[i32; 16]; 16],
    pub(super) chroma_dc: [[i32; 4]; 2],
    pub(super) chroma_ac: [[[i32; 16]; 4]; 2],
    pub(super) pcm: [u8; PCM_SAMPLES],
}

impl MbSyntax {
    pub(super) fn new() -> Self {
        Self {
            mb_type: MbType::P16x16,
            intra4x4_modes: [2; 16],
            chroma_pred_mode: 0,
            sub_mb_types: [SubMbType::default(); 4],
            ref_idx: [0; 4],
            mvd: [[[0; 2]; 4]; 4],
            cbp: 0,
            qp: 0,
            total_coeff: [0; 24],
            luma_dc: [0; 16],
            luma: [[0; 16]; 16],
            chroma_dc: [[0; 4]; 2],
            chroma_ac: [[[0; 16]; 4]; 2],
            pcm: [0; PCM_SAMPLES],
        }
    }

    fn clear(&mut self) {
        self.intra4x4_modes = [2; 16];
        self.chroma_pred_mode = 0;
        self.sub_mb_types = [SubMbType::default(); 4];
        self.ref_idx = [0; 4];
        self.mvd = [[[0; 2]; 4]; 4];
        self.cbp = 0;
        self.total_coeff = [0; 24];
        self.luma_dc = [0; 16];
        self.luma = [[0; 16]; 16];
        self.chroma_dc = [[0; 4]; 2];
        self.chroma_ac = [[[0; 16]; 4]; 2];
    }

    pub(super) fn cbp_luma(&self) -> u8 {
        self.cbp & 0x0F
    }

    pub(super) fn cbp_chroma(&self) -> u8 {
        self.cbp >> 4
    }

    pub(super) fn is_intra16x16(&self) -> bool {
        matches!(self.mb_type, MbType::I16x16 { .. })
    }
}

// ============================================================
// 残差叠加
// ============================================================

impl MbSyntax {
    /// 亮度 4x4 块残差: 反量化 + 反变换, 叠加到 `(x0, y0)` 处的预测样本
    pub(super) fn add_luma_block_residual(&self, plane: &mut [u8], stride: usize, x0: usize, y0: usize, raster: usize) {
        if self.total_coeff[raster] == 0 {
            return;
        }
        let mut coeffs = self.luma[raster];
        dequant_4x4(&mut coeffs, self.qp, false);
        idct_4x4_add(&coeffs, plane, stride, x0, y0);
    }

    /// 整个宏块的亮度残差 (Intra16x16 与帧间宏块)
    pub(super) fn add_luma_residual(&self, plane: &mut [u8], stride: usize, mb_x: usize, mb_y: usize) {
        if self.is_intra16x16() {
            let mut dc = self.luma_dc;
            inverse_hadamard_4x4(&mut dc);
            dequant_luma_dc(&mut dc, self.qp);
            for raster in 0..16 {
                let mut coeffs = self.luma[raster];
                dequant_4x4(&mut coeffs, self.qp, true);
                coeffs[0] = dc[raster];
                if coeffs.iter().any(|&c| c != 0) {
                    let x0 = mb_x * 16 + (raster % 4) * 4;
                    let y0 = mb_y * 16 + (raster / 4) * 4;
                    idct_4x4_add(&coeffs, plane, stride, x0, y0);
                }
            }
            return;
        }
        for raster in 0..16 {
            let x0 = mb_x * 16 + (raster % 4) * 4;
            let y0 = mb_y * 16 + (raster / 4) * 4;
            self.add_luma_block_residual(plane, stride, x0, y0, raster);
        }
    }

    /// 色度残差, `chroma_qp_offset` 为 Cb/Cr 的 chroma_qp_index_offset
    pub(super) fn add_chroma_residual(
        &self,
        planes: [&mut [u8]; 2],
        stride: usize,
        mb_x: usize,
        mb_y: usize,
        chroma_qp_offset: [i32; 2],
    ) {
        if self.cbp_chroma() == 0 {
            return;
        }
        for (comp, plane) in planes.into_iter().enumerate() {
            let qpc = chroma_qp(self.qp, chroma_qp_offset[comp]);
            let mut dc = self.chroma_dc[comp];
            inverse_hadamard_2x2(&mut dc);
            dequant_chroma_dc(&mut dc, qpc);
            for (blk, &dc_value) in dc.iter().enumerate() {
                let mut coeffs = self.chroma_ac[comp][blk];
                dequant_4x4(&mut coeffs, qpc, true);
                coeffs[0] = dc_value;
                if coeffs.iter().any(|&c| c != 0) {
                    let x0 = mb_x * 8 + (blk % 2) * 4;
                    let y0 = mb_y * 8 + (blk / 2) * 4;
                    idct_4x4_add(&coeffs, plane, stride, x0, y0);
                }
            }
        }
    }
}

/// 解析宏块所需的条带级参数
#[derive(Debug, Clone, Copy)]
pub(super) struct MbParseParams {
    pub(super) slice_type: SliceType,
    pub(super) num_ref_idx_active: u32,
    pub(super) constrained_intra_pred: bool,
}

// ============================================================
// macroblock_layer
// ============================================================

/// 解析一个非跳过宏块, `qp` 为 QP_Y,PRED, 遇到 mb_qp_delta 时更新
pub(super) fn parse_macroblock(
    br: &mut BitReader,
    arena: &MbArena,
    addr: usize,
    params: &MbParseParams,
    qp: &mut i32,
    syn: &mut MbSyntax,
) -> AvcResult<()> {
    syn.clear();
    let raw = read_ue(br)?;
    syn.mb_type = match params.slice_type {
        SliceType::I => i_mb_type(raw)?,
        SliceType::P => p_mb_type(raw)?,
    };

    if syn.mb_type == MbType::IPcm {
        br.align_to_byte();
        let samples = br.read_bytes(PCM_SAMPLES)?;
        syn.pcm.copy_from_slice(samples);
        syn.total_coeff = [16; 24];
        syn.qp = *qp;
        return Ok(());
    }

    match syn.mb_type {
        MbType::P8x8 | MbType::P8x8Ref0 => parse_sub_mb_pred(br, params, syn)?,
        _ => parse_mb_pred(br, arena, addr, params, syn)?,
    }

    syn.cbp = match syn.mb_type {
        MbType::I16x16 {
            cbp_luma,
            cbp_chroma,
            ..
        } => cbp_luma | (cbp_chroma << 4),
        other => read_coded_block_pattern(br, other == MbType::I4x4)?,
    };

    if syn.cbp != 0 || syn.is_intra16x16() {
        let delta = read_mb_qp_delta(br)?;
        *qp = apply_qp_delta(*qp, delta);
    }
    syn.qp = *qp;

    parse_residual(br, arena, addr, syn)
}

fn read_ref_idx(br: &mut BitReader, num_active: u32) -> AvcResult<u8> {
    let value = read_te(br, num_active - 1)?;
    if value >= num_active {
        return Err(AvcError::InvalidData(format!(
            "H264: ref_idx_l0 超出范围, value={}, num_active={}",
            value, num_active
        )));
    }
    Ok(value as u8)
}

/// mvd 取值范围, 1/4 像素单位
const MVD_RANGE: std::ops::RangeInclusive<i32> = -32768..=32767;

fn read_mvd(br: &mut BitReader) -> AvcResult<[i32; 2]> {
    let mvd = [read_se(br)?, read_se(br)?];
    if !mvd.iter().all(|v| MVD_RANGE.contains(v)) {
        return Err(AvcError::InvalidData(format!("H264: mvd 越界, mvd={:?}", mvd)));
    }
    Ok(mvd)
}

fn parse_mb_pred(
    br: &mut BitReader,
    arena: &MbArena,
    addr: usize,
    params: &MbParseParams,
    syn: &mut MbSyntax,
) -> AvcResult<()> {
    if syn.mb_type.is_intra() {
        if syn.mb_type == MbType::I4x4 {
            for &raster in &BLK_TO_RASTER {
                let prev_flag = br.read_flag()?;
                let predicted = predicted_intra4x4_mode(
                    arena,
                    addr,
                    &syn.intra4x4_modes,
                    raster,
                    params.constrained_intra_pred,
                );
                syn.intra4x4_modes[raster] = if prev_flag {
                    predicted
                } else {
                    let rem = br.read_bits(3)? as u8;
                    if rem < predicted { rem } else { rem + 1 }
                };
            }
        }
        let mode = read_ue(br)?;
        if mode > 3 {
            return Err(AvcError::InvalidData(format!(
                "H264: intra_chroma_pred_mode 超出范围, value={}",
                mode
            )));
        }
        syn.chroma_pred_mode = mode;
        return Ok(());
    }

    let parts = syn.mb_type.num_partitions();
    if params.num_ref_idx_active > 1 {
        for part in 0..parts {
            syn.ref_idx[part] = read_ref_idx(br, params.num_ref_idx_active)?;
        }
    }
    for part in 0..parts {
        syn.mvd[part][0] = read_mvd(br)?;
    }
    Ok(())
}

fn parse_sub_mb_pred(br: &mut BitReader, params: &MbParseParams, syn: &mut MbSyntax) -> AvcResult<()> {
    for sub_type in syn.sub_mb_types.iter_mut() {
        *sub_type = SubMbType::from_raw(read_ue(br)?)?;
    }
    if params.num_ref_idx_active > 1 && syn.mb_type != MbType::P8x8Ref0 {
        for ref_idx in syn.ref_idx.iter_mut() {
            *ref_idx = read_ref_idx(br, params.num_ref_idx_active)?;
        }
    }
    for i in 0..4 {
        for sub in 0..syn.sub_mb_types[i].num_parts() {
            syn.mvd[i][sub] = read_mvd(br)?;
        }
    }
    Ok(())
}

/// predIntra4x4PredMode: 左侧与上方块模式的较小值, 任一不可用时为 DC (2)
fn predicted_intra4x4_mode(
    arena: &MbArena,
    addr: usize,
    current: &[u8; 16],
    raster: usize,
    constrained_intra_pred: bool,
) -> u8 {
    let bx = (raster % 4) as i32;
    let by = (raster / 4) as i32;
    let mode_of = |(mb, blk): (usize, usize)| -> Option<u8> {
        if mb == addr {
            return Some(current[blk]);
        }
        let info = arena.get(mb)?;
        if constrained_intra_pred && info.kind.is_inter() {
            return None;
        }
        Some(info.intra4x4_modes[blk])
    };
    let left = arena.luma_block_neighbour(addr, bx - 1, by).and_then(mode_of);
    let top = arena.luma_block_neighbour(addr, bx, by - 1).and_then(mode_of);
    match (left, top) {
        (Some(a), Some(b)) => a.min(b),
        _ => 2,
    }
}

// ============================================================
// residual
// ============================================================

/// 由左侧/上方块的非零系数个数推导 nC
fn predict_nc(a: Option<u8>, b: Option<u8>) -> i32 {
    match (a, b) {
        (Some(a), Some(b)) => (i32::from(a) + i32::from(b) + 1) >> 1,
        (Some(n), None) | (None, Some(n)) => i32::from(n),
        (None, None) => 0,
    }
}

fn coeff_count(arena: &MbArena, addr: usize, current: &[u8; 24], mb: usize, idx: usize) -> u8 {
    if mb == addr {
        current[idx]
    } else {
        arena.get(mb).map_or(0, |info| info.total_coeff[idx])
    }
}

fn luma_nc(arena: &MbArena, addr: usize, current: &[u8; 24], raster: usize) -> i32 {
    let bx = (raster % 4) as i32;
    let by = (raster / 4) as i32;
    let count = |(mb, blk): (usize, usize)| coeff_count(arena, addr, current, mb, blk);
    predict_nc(
        arena.luma_block_neighbour(addr, bx - 1, by).map(count),
        arena.luma_block_neighbour(addr, bx, by - 1).map(count),
    )
}

fn chroma_nc(arena: &MbArena, addr: usize, current: &[u8; 24], comp: usize, blk: usize) -> i32 {
    let bx = (blk % 2) as i32;
    let by = (blk / 2) as i32;
    let base = 16 + comp * 4;
    let count = |(mb, b): (usize, usize)| coeff_count(arena, addr, current, mb, base + b);
    predict_nc(
        arena.chroma_block_neighbour(addr, bx - 1, by).map(count),
        arena.chroma_block_neighbour(addr, bx, by - 1).map(count),
    )
}

/// 解码一个 4x4 残差块并反扫描到光栅顺序, 返回 TotalCoeff
fn read_block_4x4(
    br: &mut BitReader,
    nc: i32,
    max_coeff: usize,
    out: &mut [i32; 16],
) -> AvcResult<u8> {
    let block = decode_residual_block(br, nc, max_coeff)?;
    let mut scan = [0i32; 16];
    block.expand_into(&mut scan, 16 - max_coeff)?;
    for (pos, &level) in scan.iter().enumerate() {
        out[ZIGZAG_4X4[pos]] = level;
    }
    Ok(block.total_coeff as u8)
}

fn parse_residual(br: &mut BitReader, arena: &MbArena, addr: usize, syn: &mut MbSyntax) -> AvcResult<()> {
    let intra16x16 = syn.is_intra16x16();
    if intra16x16 {
        let nc = luma_nc(arena, addr, &syn.total_coeff, 0);
        read_block_4x4(br, nc, 16, &mut syn.luma_dc)?;
    }

    let cbp_luma = syn.cbp_luma();
    let max_coeff = if intra16x16 { 15 } else { 16 };
    for (blk_idx, &raster) in BLK_TO_RASTER.iter().enumerate() {
        if cbp_luma & (1 << (blk_idx / 4)) == 0 {
            continue;
        }
        let nc = luma_nc(arena, addr, &syn.total_coeff, raster);
        syn.total_coeff[raster] = read_block_4x4(br, nc, max_coeff, &mut syn.luma[raster])?;
    }

    let cbp_chroma = syn.cbp_chroma();
    if cbp_chroma != 0 {
        for comp in 0..2 {
            let block = decode_residual_block(br, -1, 4)?;
            block.expand_into(&mut syn.chroma_dc[comp], 0)?;
        }
    }
    if cbp_chroma & 2 != 0 {
        for comp in 0..2 {
            for blk in 0..4 {
                let nc = chroma_nc(arena, addr, &syn.total_coeff, comp, blk);
                syn.total_coeff[16 + comp * 4 + blk] =
                    read_block_4x4(br, nc, 15, &mut syn.chroma_ac[comp][blk])?;
            }
        }
    }
    Ok(())
}
