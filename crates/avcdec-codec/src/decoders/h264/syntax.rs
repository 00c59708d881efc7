//! H.264 CAVLC 宏块层语法元素: mb_type / sub_mb_type 映射, me(v) 编码块模式,
//! mb_qp_delta.

use avcdec_core::bitreader::BitReader;
use avcdec_core::{AvcError, AvcResult};

use crate::parsers::h264::{read_se, read_ue};

// ============================================================
// 条带与宏块类型
// ============================================================

/// 条带类型 (只支持 I/P, 其余在条带头解析时拒绝)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    /// P 条带
    P,
    /// I 条带
    I,
}

impl SliceType {
    /// 由 slice_type 语法值映射, B/SP/SI 返回 Unsupported
    pub fn from_raw(slice_type: u32) -> AvcResult<Self> {
        match slice_type {
            0 | 5 => Ok(Self::P),
            2 | 7 => Ok(Self::I),
            1 | 6 => Err(AvcError::Unsupported("H264: 不支持 B 条带".into())),
            3 | 8 | 4 | 9 => Err(AvcError::Unsupported(format!(
                "H264: 不支持 SP/SI 条带, slice_type={}",
                slice_type
            ))),
            _ => Err(AvcError::InvalidData(format!(
                "H264: slice_type 非法, value={}",
                slice_type
            ))),
        }
    }
}

/// 宏块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbType {
    /// I_NxN (4x4 帧内预测)
    I4x4,
    /// I_16x16, 预测模式与 CBP 由类型值给出
    I16x16 {
        /// Intra16x16PredMode (0=V, 1=H, 2=DC, 3=Plane)
        pred_mode: u8,
        /// CodedBlockPatternLuma (0 或 15)
        cbp_luma: u8,
        /// CodedBlockPatternChroma (0..=2)
        cbp_chroma: u8,
    },
    /// I_PCM
    IPcm,
    /// P_L0_16x16
    P16x16,
    /// P_L0_L0_16x8
    P16x8,
    /// P_L0_L0_8x16
    P8x16,
    /// P_8x8
    P8x8,
    /// P_8x8ref0 (所有 ref_idx 推断为 0)
    P8x8Ref0,
}

impl MbType {
    /// 是否为帧内宏块
    pub fn is_intra(&self) -> bool {
        matches!(self, Self::I4x4 | Self::I16x16 { .. } | Self::IPcm)
    }

    /// 帧间分区数
    pub fn num_partitions(&self) -> usize {
        match self {
            Self::P16x16 => 1,
            Self::P16x8 | Self::P8x16 => 2,
            Self::P8x8 | Self::P8x8Ref0 => 4,
            _ => 0,
        }
    }

    /// 帧间分区矩形 (以 4x4 块为单位): (x, y, w, h)
    pub fn partition_rect(&self, part: usize) -> (usize, usize, usize, usize) {
        match self {
            Self::P16x8 => (0, part * 2, 4, 2),
            Self::P8x16 => (part * 2, 0, 2, 4),
            Self::P8x8 | Self::P8x8Ref0 => ((part % 2) * 2, (part / 2) * 2, 2, 2),
            _ => (0, 0, 4, 4),
        }
    }
}

/// I 条带 mb_type 映射 (0..=25)
pub fn i_mb_type(mb_type: u32) -> AvcResult<MbType> {
    match mb_type {
        0 => Ok(MbType::I4x4),
        1..=24 => {
            let t = mb_type - 1;
            Ok(MbType::I16x16 {
                pred_mode: (t % 4) as u8,
                cbp_chroma: ((t / 4) % 3) as u8,
                cbp_luma: if t >= 12 { 15 } else { 0 },
            })
        }
        25 => Ok(MbType::IPcm),
        _ => Err(AvcError::InvalidData(format!(
            "H264: I 条带 mb_type 超出范围, value={}",
            mb_type
        ))),
    }
}

/// P 条带 mb_type 映射 (0..=30, 5 起为帧内类型)
pub fn p_mb_type(mb_type: u32) -> AvcResult<MbType> {
    match mb_type {
        0 => Ok(MbType::P16x16),
        1 => Ok(MbType::P16x8),
        2 => Ok(MbType::P8x16),
        3 => Ok(MbType::P8x8),
        4 => Ok(MbType::P8x8Ref0),
        5..=30 => i_mb_type(mb_type - 5),
        _ => Err(AvcError::InvalidData(format!(
            "H264: P 条带 mb_type 超出范围, value={}",
            mb_type
        ))),
    }
}

/// P 子宏块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubMbType {
    /// P_L0_8x8
    #[default]
    P8x8,
    /// P_L0_8x4
    P8x4,
    /// P_L0_4x8
    P4x8,
    /// P_L0_4x4
    P4x4,
}

impl SubMbType {
    /// 由 sub_mb_type 语法值映射
    pub fn from_raw(sub_mb_type: u32) -> AvcResult<Self> {
        match sub_mb_type {
            0 => Ok(Self::P8x8),
            1 => Ok(Self::P8x4),
            2 => Ok(Self::P4x8),
            3 => Ok(Self::P4x4),
            _ => Err(AvcError::InvalidData(format!(
                "H264: P 条带 sub_mb_type 超出范围, value={}",
                sub_mb_type
            ))),
        }
    }

    /// 子分区数
    pub fn num_parts(&self) -> usize {
        match self {
            Self::P8x8 => 1,
            Self::P8x4 | Self::P4x8 => 2,
            Self::P4x4 => 4,
        }
    }

    /// 子分区相对 8x8 块左上角的矩形 (4x4 块为单位): (x, y, w, h)
    pub fn part_rect(&self, part: usize) -> (usize, usize, usize, usize) {
        match self {
            Self::P8x8 => (0, 0, 2, 2),
            Self::P8x4 => (0, part, 2, 1),
            Self::P4x8 => (part, 0, 1, 2),
            Self::P4x4 => (part % 2, part / 2, 1, 1),
        }
    }
}

// ============================================================
// 编码块模式 me(v)
// ============================================================

/// me(v) 码号 → Intra_4x4 宏块 CBP (ChromaArrayType 1/2)
#[rustfmt::skip]
static GOLOMB_TO_INTRA4X4_CBP: [u8; 48] = [
    47, 31, 15, 0, 23, 27, 29, 30, 7, 11, 13, 14, 39, 43, 45, 46,
    16, 3, 5, 10, 12, 19, 21, 26, 28, 35, 37, 42, 44, 1, 2, 4,
    8, 17, 18, 20, 24, 6, 9, 22, 25, 32, 33, 34, 36, 40, 38, 41,
];

/// me(v) 码号 → 帧间宏块 CBP
#[rustfmt::skip]
static GOLOMB_TO_INTER_CBP: [u8; 48] = [
    0, 16, 1, 2, 4, 8, 32, 3, 5, 10, 12, 15, 47, 7, 11, 13,
    14, 6, 9, 31, 35, 37, 42, 44, 33, 34, 36, 40, 39, 43, 45, 46,
    17, 18, 20, 24, 19, 21, 26, 28, 23, 27, 29, 30, 22, 25, 38, 41,
];

/// 读取 coded_block_pattern (me(v))
///
/// 低 4 位为亮度 8x8 块掩码, 高 2 位为色度模式 (0..=2).
pub fn read_coded_block_pattern(br: &mut BitReader, intra: bool) -> AvcResult<u8> {
    let code = read_ue(br)? as usize;
    let table = if intra {
        &GOLOMB_TO_INTRA4X4_CBP
    } else {
        &GOLOMB_TO_INTER_CBP
    };
    table.get(code).copied().ok_or_else(|| {
        AvcError::InvalidData(format!(
            "H264: coded_block_pattern 码号超出范围, value={}",
            code
        ))
    })
}

/// 读取 mb_qp_delta 并校验范围 (-26..=25)
pub fn read_mb_qp_delta(br: &mut BitReader) -> AvcResult<i32> {
    let delta = read_se(br)?;
    if !(-26..=25).contains(&delta) {
        return Err(AvcError::InvalidData(format!(
            "H264: mb_qp_delta 超出范围, value={}",
            delta
        )));
    }
    Ok(delta)
}

/// 由上一个 QP 与 mb_qp_delta 计算新 QP (模 52 回绕)
pub fn apply_qp_delta(qp_prev: i32, delta: i32) -> i32 {
    (qp_prev + delta + 52).rem_euclid(52)
}
