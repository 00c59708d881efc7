//! Exp-Golomb 变长码读取.
//!
//! - `ue(v)`: 前导零个数 k, 值为 `2^k - 1 + 后续 k 位`, 共消耗 `2k+1` 位
//! - `se(v)`: 码号 c 映射为 `(-1)^(c+1) * ceil(c/2)`
//! - `te(v)`: 取值范围为 1 时读取 1 位并取反, 否则等同 `ue(v)`

use avcdec_core::bitreader::BitReader;
use avcdec_core::{AvcError, AvcResult};

/// 读取无符号 Exp-Golomb 编码值 ue(v)
pub fn read_ue(br: &mut BitReader) -> AvcResult<u32> {
    let mut leading_zeros = 0u32;
    while br.read_bit()? == 0 {
        leading_zeros += 1;
        if leading_zeros > 31 {
            return Err(AvcError::InvalidData("H264: Exp-Golomb 前导零过多".into()));
        }
    }

    if leading_zeros == 0 {
        return Ok(0);
    }

    let suffix = br.read_bits(leading_zeros)?;
    Ok(((1u64 << leading_zeros) - 1 + u64::from(suffix)) as u32)
}

/// 读取有符号 Exp-Golomb 编码值 se(v)
pub fn read_se(br: &mut BitReader) -> AvcResult<i32> {
    let code = read_ue(br)?;
    // 映射: 0→0, 1→1, 2→-1, 3→2, 4→-2, ...
    let value = code.div_ceil(2) as i32;
    if code & 1 == 0 { Ok(-value) } else { Ok(value) }
}

/// 读取截断 Exp-Golomb 编码值 te(v)
///
/// `range` 为语法元素的最大取值, 为 0 时不读取任何位.
pub fn read_te(br: &mut BitReader, range: u32) -> AvcResult<u32> {
    match range {
        0 => Ok(0),
        1 => Ok(1 - br.read_bit()?),
        _ => read_ue(br),
    }
}
