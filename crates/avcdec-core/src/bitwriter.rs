//! 比特流写入器.
//!
//! 按大端位序写入, 与 [`BitReader`](crate::bitreader::BitReader) 对应.
//! 解码器本身不写码流, 本模块供测试构造码流与基准测试生成输入使用.

/// 比特流写入器
///
/// # 示例
/// ```
/// use avcdec_core::bitwriter::BitWriter;
///
/// let mut bw = BitWriter::new();
/// bw.write_bits(0b1011, 4);
/// bw.write_ue(0);
/// bw.write_ue(2);
/// let data = bw.finish();
/// assert_eq!(data, vec![0b1011_1011]);
/// ```
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    /// 输出缓冲区
    data: Vec<u8>,
    /// 当前字节 (正在填充)
    current_byte: u8,
    /// 当前字节中已填充的位数 (0-7)
    bit_count: u8,
}

impl BitWriter {
    /// 创建新的比特流写入器
    pub fn new() -> Self {
        Self::default()
    }

    /// 以指定容量创建比特流写入器
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            current_byte: 0,
            bit_count: 0,
        }
    }

    /// 获取已写入的总位数
    pub fn bits_written(&self) -> usize {
        self.data.len() * 8 + self.bit_count as usize
    }

    /// 当前是否位于字节边界
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_count == 0
    }

    /// 写入 1 个位
    pub fn write_bit(&mut self, bit: u32) {
        self.current_byte = (self.current_byte << 1) | (bit & 1) as u8;
        self.bit_count += 1;
        if self.bit_count >= 8 {
            self.data.push(self.current_byte);
            self.current_byte = 0;
            self.bit_count = 0;
        }
    }

    /// 写入 1 位标志
    pub fn write_flag(&mut self, flag: bool) {
        self.write_bit(u32::from(flag));
    }

    /// 写入 N 个位 (最多 32 位)
    ///
    /// 值的低 N 位被写入, 高位在前 (大端).
    pub fn write_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32, "write_bits: n={} 超过 32 位", n);
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1);
        }
    }

    /// 写入无符号 Exp-Golomb 码 ue(v)
    pub fn write_ue(&mut self, value: u32) {
        let code = u64::from(value) + 1;
        let len = 64 - code.leading_zeros();
        self.write_bits(0, len - 1);
        for i in (0..len).rev() {
            self.write_bit(((code >> i) & 1) as u32);
        }
    }

    /// 写入有符号 Exp-Golomb 码 se(v)
    pub fn write_se(&mut self, value: i32) {
        let code = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            value.unsigned_abs() * 2
        };
        self.write_ue(code);
    }

    /// 写入 rbsp_trailing_bits (停止位加补零)
    pub fn write_trailing_bits(&mut self) {
        self.write_bit(1);
        self.align_to_byte();
    }

    /// 用 0 填充到字节边界
    pub fn align_to_byte(&mut self) {
        while self.bit_count != 0 {
            self.write_bit(0);
        }
    }

    /// 写入整字节序列 (要求字节对齐)
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        debug_assert!(self.is_byte_aligned(), "write_bytes 需要字节对齐");
        self.data.extend_from_slice(bytes);
    }

    /// 结束写入, 返回字节缓冲区 (不完整字节以 0 补齐)
    pub fn finish(mut self) -> Vec<u8> {
        self.align_to_byte();
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitreader::BitReader;

    #[test]
    fn test_write_bits_basic() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b101, 3);
        bw.write_bits(0b10001, 5);
        bw.write_bits(0xABCD, 16);
        assert_eq!(bw.bits_written(), 24);
        assert_eq!(bw.finish(), vec![0b1011_0001, 0xAB, 0xCD]);
    }

    #[test]
    fn test_write_ue_codes() {
        // 0 -> 1, 1 -> 010, 2 -> 011, 3 -> 00100
        let mut bw = BitWriter::new();
        bw.write_ue(0);
        bw.write_ue(1);
        bw.write_ue(2);
        bw.write_ue(3);
        assert_eq!(bw.bits_written(), 1 + 3 + 3 + 5);
        let data = bw.finish();
        assert_eq!(data, vec![0b1010_0110, 0b0100_0000]);
    }

    #[test]
    fn test_write_se_mapping() {
        let mut bw = BitWriter::new();
        bw.write_se(1); // codeNum 1
        bw.write_se(-1); // codeNum 2
        bw.write_se(0); // codeNum 0
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(3).unwrap(), 0b010);
        assert_eq!(br.read_bits(3).unwrap(), 0b011);
        assert_eq!(br.read_bits(1).unwrap(), 1);
    }

    #[test]
    fn test_trailing_bits() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b11, 2);
        bw.write_trailing_bits();
        assert!(bw.is_byte_aligned());
        assert_eq!(bw.finish(), vec![0b1110_0000]);
    }
}
