//! H.264 残差重建: 反扫描, 平坦反量化, 反 Hadamard 变换, 4x4 反整数变换.
//!
//! 系数块统一按光栅顺序 (行优先) 存放, 熵解码输出经 [`ZIGZAG_4X4`] 展开.

// ============================================================
// 扫描顺序表
// ============================================================

/// 4x4 zigzag 扫描顺序 (帧编码): 扫描位置 → 光栅位置
#[rustfmt::skip]
pub(super) const ZIGZAG_4X4: [usize; 16] = [
    0, 1, 4, 8, 5, 2, 3, 6, 9, 12, 13, 10, 7, 11, 14, 15,
];

// ============================================================
// 量化参数表
// ============================================================

/// LevelScale 表 (H.264 表 8-14 的 normAdjust): [qP % 6][scale_index]
/// scale_index: 0=偶行偶列, 1=奇偶混合, 2=奇行奇列
const LEVEL_SCALE: [[i32; 3]; 6] = [
    [10, 13, 16],
    [11, 14, 18],
    [13, 16, 20],
    [14, 18, 23],
    [16, 20, 25],
    [18, 23, 29],
];

/// 光栅位置 → 缩放因子类别
#[rustfmt::skip]
const SCALE_INDEX: [usize; 16] = [
    0, 1, 0, 1,
    1, 2, 1, 2,
    0, 1, 0, 1,
    1, 2, 1, 2,
];

// ============================================================
// 反变换
// ============================================================

/// 4x4 Luma DC 反 Hadamard 变换 (I_16x16)
pub fn inverse_hadamard_4x4(block: &mut [i32; 16]) {
    let mut temp = [0i32; 16];

    // 行变换
    for i in 0..4 {
        let s = i * 4;
        let a = block[s] + block[s + 2];
        let b = block[s] - block[s + 2];
        let c = block[s + 1] - block[s + 3];
        let d = block[s + 1] + block[s + 3];
        temp[s] = a + d;
        temp[s + 1] = b + c;
        temp[s + 2] = b - c;
        temp[s + 3] = a - d;
    }

    // 列变换
    for j in 0..4 {
        let a = temp[j] + temp[8 + j];
        let b = temp[j] - temp[8 + j];
        let c = temp[4 + j] - temp[12 + j];
        let d = temp[4 + j] + temp[12 + j];
        block[j] = a + d;
        block[4 + j] = b + c;
        block[8 + j] = b - c;
        block[12 + j] = a - d;
    }
}

/// 2x2 Chroma DC 反 Hadamard 变换 (4:2:0), 输入输出均为光栅顺序
pub fn inverse_hadamard_2x2(block: &mut [i32; 4]) {
    let a = block[0] + block[1];
    let b = block[0] - block[1];
    let c = block[2] + block[3];
    let d = block[2] - block[3];
    block[0] = a + c;
    block[1] = b + d;
    block[2] = a - c;
    block[3] = b - d;
}

/// 4x4 反整数变换, 结果 `(x + 32) >> 6` 后叠加到预测样本并裁剪
pub fn idct_4x4_add(coeffs: &[i32; 16], plane: &mut [u8], stride: usize, x0: usize, y0: usize) {
    let mut temp = [0i32; 16];

    // 行变换
    for i in 0..4 {
        let s = i * 4;
        let e0 = coeffs[s] + coeffs[s + 2];
        let e1 = coeffs[s] - coeffs[s + 2];
        let e2 = (coeffs[s + 1] >> 1) - coeffs[s + 3];
        let e3 = coeffs[s + 1] + (coeffs[s + 3] >> 1);
        temp[s] = e0 + e3;
        temp[s + 1] = e1 + e2;
        temp[s + 2] = e1 - e2;
        temp[s + 3] = e0 - e3;
    }

    // 列变换
    for j in 0..4 {
        let e0 = temp[j] + temp[8 + j];
        let e1 = temp[j] - temp[8 + j];
        let e2 = (temp[4 + j] >> 1) - temp[12 + j];
        let e3 = temp[4 + j] + (temp[12 + j] >> 1);
        let col = [e0 + e3, e1 + e2, e1 - e2, e0 - e3];
        for (i, v) in col.iter().enumerate() {
            let idx = (y0 + i) * stride + x0 + j;
            let res = (v + 32) >> 6;
            plane[idx] = (i32::from(plane[idx]) + res).clamp(0, 255) as u8;
        }
    }
}

// ============================================================
// 反量化
// ============================================================

/// Luma DC 系数反量化 (I_16x16, 在 Hadamard 变换之后)
pub fn dequant_luma_dc(coeffs: &mut [i32; 16], qp: i32) {
    let qp_per = qp / 6;
    let scale = LEVEL_SCALE[(qp % 6) as usize][0];
    for c in coeffs.iter_mut() {
        if qp_per >= 2 {
            *c = (*c * scale) << (qp_per - 2);
        } else {
            *c = (*c * scale + (1 << (1 - qp_per))) >> (2 - qp_per);
        }
    }
}

/// Chroma DC 系数反量化 (4:2:0, 在 Hadamard 变换之后)
pub fn dequant_chroma_dc(coeffs: &mut [i32; 4], qp: i32) {
    let qp_per = qp / 6;
    let scale = LEVEL_SCALE[(qp % 6) as usize][0];
    for c in coeffs.iter_mut() {
        if qp_per >= 1 {
            *c = (*c * scale) << (qp_per - 1);
        } else {
            *c = (*c * scale) >> 1;
        }
    }
}

/// 4x4 块平坦反量化 (光栅顺序)
///
/// `skip_dc` 为真时保留位置 0 (I_16x16 与色度的 DC 已单独反量化).
pub fn dequant_4x4(coeffs: &mut [i32; 16], qp: i32, skip_dc: bool) {
    let qp_per = qp / 6;
    let row = &LEVEL_SCALE[(qp % 6) as usize];
    let start = usize::from(skip_dc);
    for (i, c) in coeffs.iter_mut().enumerate().skip(start) {
        if *c != 0 {
            *c = (*c * row[SCALE_INDEX[i]]) << qp_per;
        }
    }
}
