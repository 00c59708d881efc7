//! H.264 CAVLC 残差块解码.
//!
//! 按 coeff_token → trailing_ones 符号 → level (前缀/后缀, 自适应后缀长度)
//! → total_zeros → run_before 的顺序解码一个残差块. 输出按解码顺序
//! (最高频系数在前) 的 level/run 并行数组, 展开到扫描位置与反量化由调用方完成.

use avcdec_core::bitreader::BitReader;
use avcdec_core::{AvcError, AvcResult};

// ============================================================
// VLC 表
// ============================================================

/// coeff_token 码长, 索引 `total_coeff * 4 + trailing_ones`, 分别对应
/// 0<=nC<2, 2<=nC<4, 4<=nC<8
#[rustfmt::skip]
pub(super) static COEFF_TOKEN_LEN: [[u8; 68]; 3] = [
    [
        1, 0, 0, 0,   6, 2, 0, 0,   8, 6, 3, 0,   9, 8, 7, 5,
        10, 9, 8, 6,  11, 10, 9, 7, 13, 11, 10, 8, 13, 13, 11, 9,
        13, 13, 13, 10, 14, 14, 13, 11, 14, 14, 14, 13, 15, 15, 14, 14,
        15, 15, 15, 14, 16, 15, 15, 15, 16, 16, 16, 15, 16, 16, 16, 16,
        16, 16, 16, 16,
    ],
    [
        2, 0, 0, 0,   6, 2, 0, 0,   6, 5, 3, 0,   7, 6, 6, 4,
        8, 6, 6, 4,   8, 7, 7, 5,   9, 8, 8, 6,   11, 9, 9, 6,
        11, 11, 11, 7, 12, 11, 11, 9, 12, 12, 12, 11, 12, 12, 12, 11,
        13, 13, 13, 12, 13, 13, 13, 13, 13, 14, 13, 13, 14, 14, 14, 13,
        14, 14, 14, 14,
    ],
    [
        4, 0, 0, 0,   6, 4, 0, 0,   6, 5, 4, 0,   6, 5, 5, 4,
        7, 5, 5, 4,   7, 5, 5, 4,   7, 6, 6, 4,   7, 6, 6, 4,
        8, 7, 7, 5,   8, 8, 7, 6,   9, 8, 8, 7,   9, 9, 8, 8,
        9, 9, 9, 8,   10, 9, 9, 9,  10, 10, 10, 10, 10, 10, 10, 10,
        10, 10, 10, 10,
    ],
];

/// coeff_token 码字, 布局同 [`COEFF_TOKEN_LEN`]
#[rustfmt::skip]
pub(super) static COEFF_TOKEN_BITS: [[u8; 68]; 3] = [
    [
        1, 0, 0, 0,   5, 1, 0, 0,   7, 4, 1, 0,   7, 6, 5, 3,
        7, 6, 5, 3,   7, 6, 5, 4,   15, 6, 5, 4,  11, 14, 5, 4,
        8, 10, 13, 4, 15, 14, 9, 4, 11, 10, 13, 12, 15, 14, 9, 12,
        11, 10, 13, 8, 15, 1, 9, 12, 11, 14, 13, 8, 7, 10, 9, 12,
        4, 6, 5, 8,
    ],
    [
        3, 0, 0, 0,   11, 2, 0, 0,  7, 7, 3, 0,   7, 10, 9, 5,
        7, 6, 5, 4,   4, 6, 5, 6,   7, 6, 5, 8,   15, 6, 5, 4,
        11, 14, 13, 4, 15, 10, 9, 4, 11, 14, 13, 12, 8, 10, 9, 8,
        15, 14, 13, 12, 11, 10, 9, 12, 7, 11, 6, 8, 9, 8, 10, 1,
        7, 6, 5, 4,
    ],
    [
        15, 0, 0, 0,  15, 14, 0, 0, 11, 15, 13, 0, 8, 12, 14, 12,
        15, 10, 11, 11, 11, 8, 9, 10, 9, 14, 13, 9, 8, 10, 9, 8,
        15, 14, 13, 13, 11, 14, 10, 12, 15, 10, 13, 12, 11, 14, 9, 12,
        8, 10, 13, 8, 13, 7, 9, 12, 9, 12, 11, 10, 5, 8, 7, 6,
        1, 4, 3, 2,
    ],
];

/// 色度 DC (nC = -1) coeff_token 码长, 索引 `total_coeff * 4 + trailing_ones`
#[rustfmt::skip]
pub(super) static CHROMA_DC_COEFF_TOKEN_LEN: [u8; 20] = [
    2, 0, 0, 0,  6, 1, 0, 0,  6, 6, 3, 0,  6, 7, 7, 6,  6, 8, 8, 7,
];

/// 色度 DC (nC = -1) coeff_token 码字
#[rustfmt::skip]
pub(super) static CHROMA_DC_COEFF_TOKEN_BITS: [u8; 20] = [
    1, 0, 0, 0,  7, 1, 0, 0,  4, 6, 1, 0,  3, 3, 2, 5,  2, 3, 2, 0,
];

/// total_zeros 码长, 索引 `[total_coeff - 1][total_zeros]` (4x4 块)
#[rustfmt::skip]
pub(super) static TOTAL_ZEROS_LEN: [&[u8]; 15] = [
    &[1, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 9],
    &[3, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 6, 6, 6, 6],
    &[4, 3, 3, 3, 4, 4, 3, 3, 4, 5, 5, 6, 5, 6],
    &[5, 3, 4, 4, 3, 3, 3, 4, 3, 4, 5, 5, 5],
    &[4, 4, 4, 3, 3, 3, 3, 3, 4, 5, 4, 5],
    &[6, 5, 3, 3, 3, 3, 3, 3, 4, 3, 6],
    &[6, 5, 3, 3, 3, 2, 3, 4, 3, 6],
    &[6, 4, 5, 3, 2, 2, 3, 3, 6],
    &[6, 6, 4, 2, 2, 3, 2, 5],
    &[5, 5, 3, 2, 2, 2, 4],
    &[4, 4, 3, 3, 1, 3],
    &[4, 4, 2, 1, 3],
    &[3, 3, 1, 2],
    &[2, 2, 1],
    &[1, 1],
];

/// total_zeros 码字, 布局同 [`TOTAL_ZEROS_LEN`]
#[rustfmt::skip]
pub(super) static TOTAL_ZEROS_BITS: [&[u8]; 15] = [
    &[1, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 1],
    &[7, 6, 5, 4, 3, 5, 4, 3, 2, 3, 2, 3, 2, 1, 0],
    &[5, 7, 6, 5, 4, 3, 4, 3, 2, 3, 2, 1, 1, 0],
    &[3, 7, 5, 4, 6, 5, 4, 3, 3, 2, 2, 1, 0],
    &[5, 4, 3, 7, 6, 5, 4, 3, 2, 1, 1, 0],
    &[1, 1, 7, 6, 5, 4, 3, 2, 1, 1, 0],
    &[1, 1, 5, 4, 3, 3, 2, 1, 1, 0],
    &[1, 1, 1, 3, 3, 2, 2, 1, 0],
    &[1, 0, 1, 3, 2, 1, 1, 1],
    &[1, 0, 1, 3, 2, 1, 1],
    &[0, 1, 1, 2, 1, 3],
    &[0, 1, 1, 1, 1],
    &[0, 1, 1, 1],
    &[0, 1, 1],
    &[0, 1],
];

/// 色度 DC total_zeros 码长, 索引 `[total_coeff - 1][total_zeros]`
pub(super) static CHROMA_DC_TOTAL_ZEROS_LEN: [&[u8]; 3] = [&[1, 2, 3, 3], &[1, 2, 2], &[1, 1]];

/// 色度 DC total_zeros 码字
pub(super) static CHROMA_DC_TOTAL_ZEROS_BITS: [&[u8]; 3] = [&[1, 1, 1, 0], &[1, 1, 0], &[1, 0]];

/// run_before 码长, 索引 `[min(zeros_left, 7) - 1][run_before]`
#[rustfmt::skip]
pub(super) static RUN_BEFORE_LEN: [&[u8]; 7] = [
    &[1, 1],
    &[1, 2, 2],
    &[2, 2, 2, 2],
    &[2, 2, 2, 3, 3],
    &[2, 2, 3, 3, 3, 3],
    &[2, 3, 3, 3, 3, 3, 3],
    &[3, 3, 3, 3, 3, 3, 3, 4, 5, 6, 7, 8, 9, 10, 11],
];

/// run_before 码字
#[rustfmt::skip]
pub(super) static RUN_BEFORE_BITS: [&[u8]; 7] = [
    &[1, 0],
    &[1, 1, 0],
    &[3, 2, 1, 0],
    &[3, 2, 1, 1, 0],
    &[3, 2, 3, 2, 1, 0],
    &[3, 0, 1, 3, 2, 5, 4],
    &[7, 6, 5, 4, 3, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1],
];

// ============================================================
// 残差块
// ============================================================

/// CAVLC 残差块解码结果
///
/// `levels[i]`/`runs[i]` 按解码顺序排列: `levels[0]` 是扫描顺序中最后一个非零系数,
/// `runs[i]` 是 `levels[i]` 之前 (更低频方向) 的连续零个数.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResidualBlock {
    /// 非零系数值
    pub levels: [i32; 16],
    /// 每个非零系数前的零游程
    pub runs: [u8; 16],
    /// 非零系数个数 (TotalCoeff)
    pub total_coeff: usize,
    /// 末尾 ±1 个数 (TrailingOnes)
    pub trailing_ones: usize,
}

impl ResidualBlock {
    /// 将 level/run 展开到扫描位置, 写入 `coeffs[start_idx..]`
    pub fn expand_into(&self, coeffs: &mut [i32], start_idx: usize) -> AvcResult<()> {
        let mut pos = start_idx;
        for i in (0..self.total_coeff).rev() {
            pos += self.runs[i] as usize;
            let slot = coeffs.get_mut(pos).ok_or_else(|| {
                AvcError::InvalidData(format!("H264: 残差系数位置越界, pos={}", pos))
            })?;
            *slot = self.levels[i];
            pos += 1;
        }
        Ok(())
    }
}

/// 解码一个 CAVLC 残差块
///
/// - `nc`: 邻块预测的非零系数个数, 色度 DC 传 -1
/// - `max_coeff`: 块的最大系数个数 (16, 15 或 4)
pub fn decode_residual_block(
    br: &mut BitReader,
    nc: i32,
    max_coeff: usize,
) -> AvcResult<ResidualBlock> {
    let mut block = ResidualBlock::default();
    let (total_coeff, trailing_ones) = read_coeff_token(br, nc)?;
    if total_coeff > max_coeff {
        return Err(AvcError::InvalidData(format!(
            "H264: CAVLC 系数个数超出块容量, total_coeff={}, max={}",
            total_coeff, max_coeff
        )));
    }
    block.total_coeff = total_coeff;
    block.trailing_ones = trailing_ones;
    if total_coeff == 0 {
        return Ok(block);
    }

    // trailing_ones 符号
    for level in block.levels.iter_mut().take(trailing_ones) {
        *level = if br.read_bit()? == 1 { -1 } else { 1 };
    }

    // 其余 level
    let mut suffix_length = if total_coeff > 10 && trailing_ones < 3 {
        1u32
    } else {
        0u32
    };
    for i in trailing_ones..total_coeff {
        let level_prefix = read_level_prefix(br)?;
        let mut level_code = (level_prefix.min(15) << suffix_length) as i32;
        let suffix_size = if level_prefix == 14 && suffix_length == 0 {
            4
        } else if level_prefix >= 15 {
            level_prefix - 3
        } else {
            suffix_length
        };
        if suffix_size > 0 {
            level_code += br.read_bits(suffix_size)? as i32;
        }
        if level_prefix >= 15 && suffix_length == 0 {
            level_code += 15;
        }
        if i == trailing_ones && trailing_ones < 3 {
            level_code += 2;
        }
        let level = if level_code % 2 == 0 {
            (level_code + 2) >> 1
        } else {
            (-level_code - 1) >> 1
        };
        block.levels[i] = level;

        if suffix_length == 0 {
            suffix_length = 1;
        }
        if level.abs() > (3 << (suffix_length - 1)) && suffix_length < 6 {
            suffix_length += 1;
        }
    }

    // total_zeros
    let mut zeros_left = if total_coeff < max_coeff {
        read_total_zeros(br, total_coeff, max_coeff == 4)?
    } else {
        0
    };
    if zeros_left + total_coeff > max_coeff {
        return Err(AvcError::InvalidData(format!(
            "H264: CAVLC total_zeros 非法, total_zeros={}, total_coeff={}, max={}",
            zeros_left, total_coeff, max_coeff
        )));
    }

    // run_before
    for i in 0..total_coeff - 1 {
        if zeros_left == 0 {
            break;
        }
        let run = read_run_before(br, zeros_left)?;
        if run > zeros_left {
            return Err(AvcError::InvalidData(format!(
                "H264: CAVLC run_before 超出剩余零个数, run={}, zeros_left={}",
                run, zeros_left
            )));
        }
        block.runs[i] = run as u8;
        zeros_left -= run;
    }
    block.runs[total_coeff - 1] = zeros_left as u8;

    Ok(block)
}

// ============================================================
// 语法元素读取
// ============================================================

/// 读取 coeff_token, 返回 (TotalCoeff, TrailingOnes)
fn read_coeff_token(br: &mut BitReader, nc: i32) -> AvcResult<(usize, usize)> {
    if nc >= 8 {
        let code = br.read_bits(6)? as usize;
        if code == 3 {
            return Ok((0, 0));
        }
        let total_coeff = (code >> 2) + 1;
        let trailing_ones = code & 3;
        if trailing_ones > total_coeff {
            return Err(AvcError::InvalidData(format!(
                "H264: CAVLC 定长 coeff_token 非法, code={}",
                code
            )));
        }
        return Ok((total_coeff, trailing_ones));
    }

    let (lens, bits): (&[u8], &[u8]) = match nc {
        -1 => (&CHROMA_DC_COEFF_TOKEN_LEN, &CHROMA_DC_COEFF_TOKEN_BITS),
        0 | 1 => (&COEFF_TOKEN_LEN[0], &COEFF_TOKEN_BITS[0]),
        2 | 3 => (&COEFF_TOKEN_LEN[1], &COEFF_TOKEN_BITS[1]),
        4..=7 => (&COEFF_TOKEN_LEN[2], &COEFF_TOKEN_BITS[2]),
        _ => {
            return Err(AvcError::InvalidData(format!("H264: CAVLC nC 非法, nc={}", nc)));
        }
    };
    let idx = match_vlc(br, lens, bits, 16)
        .ok_or_else(|| AvcError::InvalidData(format!("H264: CAVLC coeff_token 无法匹配, nc={}", nc)))?;
    Ok((idx / 4, idx % 4))
}

/// 读取 level_prefix (前导零个数)
fn read_level_prefix(br: &mut BitReader) -> AvcResult<u32> {
    let mut zeros = 0u32;
    while br.read_bit()? == 0 {
        zeros += 1;
        if zeros > 15 {
            return Err(AvcError::InvalidData(format!(
                "H264: CAVLC level_prefix 超出 Baseline 范围, level_prefix>{}",
                15
            )));
        }
    }
    Ok(zeros)
}

/// 读取 total_zeros
fn read_total_zeros(br: &mut BitReader, total_coeff: usize, chroma_dc: bool) -> AvcResult<usize> {
    let (lens, bits) = if chroma_dc {
        (
            CHROMA_DC_TOTAL_ZEROS_LEN[total_coeff - 1],
            CHROMA_DC_TOTAL_ZEROS_BITS[total_coeff - 1],
        )
    } else {
        (
            TOTAL_ZEROS_LEN[total_coeff - 1],
            TOTAL_ZEROS_BITS[total_coeff - 1],
        )
    };
    match_vlc(br, lens, bits, 9).ok_or_else(|| {
        AvcError::InvalidData(format!(
            "H264: CAVLC total_zeros 无法匹配, total_coeff={}",
            total_coeff
        ))
    })
}

/// 读取 run_before
fn read_run_before(br: &mut BitReader, zeros_left: usize) -> AvcResult<usize> {
    let table = zeros_left.min(7) - 1;
    match_vlc(br, RUN_BEFORE_LEN[table], RUN_BEFORE_BITS[table], 11).ok_or_else(|| {
        AvcError::InvalidData(format!(
            "H264: CAVLC run_before 无法匹配, zeros_left={}",
            zeros_left
        ))
    })
}

/// 在 (码长, 码字) 表中查找与比特流前缀匹配的项, 匹配成功时消耗对应位数
fn match_vlc(br: &mut BitReader, lens: &[u8], bits: &[u8], peek_width: u32) -> Option<usize> {
    let window = br.peek_bits_padded(peek_width);
    let available = br.bits_left();
    let idx = lens.iter().zip(bits).position(|(&len, &code)| {
        len > 0
            && (len as usize) <= available
            && window >> (peek_width - u32::from(len)) == u32::from(code)
    })?;
    br.skip_bits(u32::from(lens[idx])).ok()?;
    Some(idx)
}
