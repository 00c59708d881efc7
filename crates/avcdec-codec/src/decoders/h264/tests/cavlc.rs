use avcdec_core::{BitReader, BitWriter};

use super::super::cavlc::decode_residual_block;

use super::helpers::*;

/// 编码后立即解码, 返回扫描顺序的系数
fn reencode(coeffs: &[i32], nc: i32) -> Vec<i32> {
    let mut bw = BitWriter::new();
    encode_residual_block(&mut bw, coeffs, nc);
    let bits = bw.bits_written();
    bw.write_trailing_bits();
    let data = bw.finish();

    let mut br = BitReader::new(&data);
    let block = decode_residual_block(&mut br, nc, coeffs.len()).expect("残差块解码失败");
    assert_eq!(br.bits_read(), bits, "解码消耗的比特数应与编码一致");
    let mut out = vec![0; coeffs.len()];
    block.expand_into(&mut out, 0).unwrap();
    out
}

#[test]
fn test_escape_levels_with_zero_suffix_length() {
    // level_prefix = 15
    let mut coeffs = [0; 16];
    coeffs[0] = 9;
    coeffs[3] = -20;
    coeffs[5] = 1;
    assert_eq!(reencode(&coeffs, 0), coeffs.to_vec());

    // level_prefix = 14, 4 位后缀
    let mut coeffs = [0; 16];
    coeffs[2] = -2;
    coeffs[7] = 9;
    assert_eq!(reencode(&coeffs, 0), coeffs.to_vec());
}

#[test]
fn test_suffix_length_grows_with_large_levels() {
    let coeffs = [
        120, -64, 33, 0, -17, 9, 0, 0, 5, -3, 2, 0, 1, 0, 0, 0,
    ];
    assert_eq!(reencode(&coeffs, 3), coeffs.to_vec());
}

#[test]
fn test_many_coefficients_start_with_suffix_length_one() {
    // TotalCoeff > 10 且 TrailingOnes < 3
    let coeffs = [7, 6, -5, 4, 3, -3, 2, 2, -2, 2, 2, 0, 1, 0, 0, 0];
    assert_eq!(reencode(&coeffs, 5), coeffs.to_vec());
}

#[test]
fn test_full_block_without_total_zeros() {
    let coeffs: Vec<i32> = (0..16).map(|i| if i % 2 == 0 { 2 } else { -1 }).collect();
    assert_eq!(reencode(&coeffs, 9), coeffs);
}

#[test]
fn test_ac_block_of_fifteen() {
    let mut coeffs = vec![0; 15];
    coeffs[0] = -1;
    coeffs[14] = 4;
    assert_eq!(reencode(&coeffs, 1), coeffs);
}

#[test]
fn test_chroma_dc_with_zeros() {
    assert_eq!(reencode(&[0, -6, 0, 1], -1), vec![0, -6, 0, 1]);
    assert_eq!(reencode(&[0, 0, 0, 0], -1), vec![0, 0, 0, 0]);
}

/// xorshift32, 固定种子保证可复现
struct XorShift(u32);

impl XorShift {
    fn next(&mut self) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0
    }

    fn below(&mut self, n: u32) -> u32 {
        self.next() % n
    }
}

/// 随机稀疏系数块, 幅值以 ±1 为主, 偶尔出现需要转义的大值
fn random_block(rng: &mut XorShift, len: usize) -> Vec<i32> {
    let mut coeffs = vec![0; len];
    let count = rng.below(len as u32 + 1);
    for _ in 0..count {
        let pos = rng.below(len as u32) as usize;
        let magnitude = match rng.below(8) {
            0..=3 => 1,
            4 | 5 => 1 + rng.below(4),
            6 => 1 + rng.below(40),
            _ => 1 + rng.below(1000),
        } as i32;
        coeffs[pos] = if rng.below(2) == 0 { magnitude } else { -magnitude };
    }
    coeffs
}

#[test]
fn test_random_blocks_every_nc_class() {
    let mut rng = XorShift(0x9e37_79b9);
    // (块长度, nC): 色度 DC, 四个 coeff_token 表, 以及 15 系数的 AC 块
    let classes: [(usize, i32); 11] = [
        (4, -1),
        (16, 0),
        (16, 1),
        (16, 2),
        (16, 3),
        (16, 4),
        (16, 7),
        (16, 8),
        (16, 16),
        (15, 0),
        (15, 6),
    ];
    for &(len, nc) in &classes {
        for _ in 0..3000 {
            let coeffs = random_block(&mut rng, len);
            assert_eq!(reencode(&coeffs, nc), coeffs, "nC={} 系数 {:?} 编解码不一致", nc, coeffs);
        }
    }
}
