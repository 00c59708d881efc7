//! 比特流读取器.
//!
//! 按大端位序 (MSB first) 从 RBSP 字节缓冲区中按位读取数据, 是 Exp-Golomb
//! 与 CAVLC 熵解码的基础设施. 任何越过缓冲区末尾的读取都返回 [`AvcError::Eof`].

use crate::{AvcError, AvcResult};

/// 比特流读取器
///
/// # 示例
/// ```
/// use avcdec_core::bitreader::BitReader;
///
/// let data = [0b10110001, 0b01010101];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_bits(4).unwrap(), 0b1011);
/// assert_eq!(br.peek_bits(4).unwrap(), 0b0001);
/// assert_eq!(br.read_bits(4).unwrap(), 0b0001);
/// assert_eq!(br.read_bits(8).unwrap(), 0b01010101);
/// ```
#[derive(Clone)]
pub struct BitReader<'a> {
    /// 源数据
    data: &'a [u8],
    /// 当前字节索引
    byte_pos: usize,
    /// 当前字节中的位位置 (0-7, 0 表示最高位)
    bit_pos: u8,
    /// rbsp_stop_one_bit 的绝对位位置 (无停止位时为 None)
    stop_bit: Option<usize>,
}

impl<'a> BitReader<'a> {
    /// 创建新的比特流读取器
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
            stop_bit: find_stop_bit(data),
        }
    }

    /// 获取已读取的总位数
    pub fn bits_read(&self) -> usize {
        self.byte_pos * 8 + self.bit_pos as usize
    }

    /// 获取剩余可读位数
    pub fn bits_left(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.bits_read())
    }

    /// 是否已到达末尾
    pub fn is_eof(&self) -> bool {
        self.bits_left() == 0
    }

    /// 当前是否位于字节边界
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_pos == 0
    }

    /// 读取 1 个位
    pub fn read_bit(&mut self) -> AvcResult<u32> {
        if self.byte_pos >= self.data.len() {
            return Err(AvcError::Eof);
        }

        let bit = (self.data[self.byte_pos] >> (7 - self.bit_pos)) & 1;
        self.bit_pos += 1;
        if self.bit_pos >= 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }

        Ok(u32::from(bit))
    }

    /// 读取 1 位标志
    pub fn read_flag(&mut self) -> AvcResult<bool> {
        Ok(self.read_bit()? == 1)
    }

    /// 读取 N 个位 (最多 32 位)
    ///
    /// 按大端位序读取, 返回值的低 N 位有效.
    pub fn read_bits(&mut self, n: u32) -> AvcResult<u32> {
        if n == 0 {
            return Ok(0);
        }
        if n > 32 {
            return Err(AvcError::InvalidArgument(format!(
                "read_bits: n={} 超过 32 位",
                n,
            )));
        }
        if (n as usize) > self.bits_left() {
            return Err(AvcError::Eof);
        }

        let mut result: u64 = 0;
        let mut remaining = n;

        while remaining > 0 {
            let available = 8 - self.bit_pos as u32;
            let to_read = remaining.min(available);

            // 从当前字节中提取位
            let shift = available - to_read;
            let mask = ((1u32 << to_read) - 1) as u8;
            let bits = (self.data[self.byte_pos] >> shift) & mask;

            result = (result << to_read) | u64::from(bits);

            self.bit_pos += to_read as u8;
            if self.bit_pos >= 8 {
                self.bit_pos = 0;
                self.byte_pos += 1;
            }
            remaining -= to_read;
        }

        Ok(result as u32)
    }

    /// 窥视 N 个位 (不移动位置)
    pub fn peek_bits(&self, n: u32) -> AvcResult<u32> {
        self.clone().read_bits(n)
    }

    /// 窥视 N 个位, 不足部分以 0 补齐
    ///
    /// 变长码表查找时使用, 码字本身可能比窥视宽度短.
    pub fn peek_bits_padded(&self, n: u32) -> u32 {
        let left = self.bits_left().min(n as usize) as u32;
        match self.peek_bits(left) {
            Ok(v) if left > 0 => v << (n - left),
            _ => 0,
        }
    }

    /// 跳过 N 个位
    pub fn skip_bits(&mut self, n: u32) -> AvcResult<()> {
        if (n as usize) > self.bits_left() {
            return Err(AvcError::Eof);
        }

        let total_bits = self.bit_pos as usize + n as usize;
        self.byte_pos += total_bits / 8;
        self.bit_pos = (total_bits % 8) as u8;

        Ok(())
    }

    /// 对齐到下一个字节边界
    ///
    /// 如果当前已在字节边界, 则不做任何事.
    pub fn align_to_byte(&mut self) {
        if self.bit_pos > 0 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
    }

    /// 获取当前字节位置
    pub fn byte_position(&self) -> usize {
        self.byte_pos
    }

    /// 从当前位置读取原始字节切片
    ///
    /// 仅在字节对齐时可用.
    pub fn read_bytes(&mut self, n: usize) -> AvcResult<&'a [u8]> {
        if self.bit_pos != 0 {
            return Err(AvcError::InvalidArgument("read_bytes 需要字节对齐".into()));
        }

        let end = self.byte_pos.checked_add(n).ok_or(AvcError::Eof)?;
        if end > self.data.len() {
            return Err(AvcError::Eof);
        }

        let slice = &self.data[self.byte_pos..end];
        self.byte_pos = end;
        Ok(slice)
    }

    /// 当前位置之后是否还有语法数据 (more_rbsp_data)
    ///
    /// 仅剩 rbsp_stop_one_bit 及其后的补零时返回 false.
    pub fn more_rbsp_data(&self) -> bool {
        match self.stop_bit {
            Some(stop) => self.bits_read() < stop,
            None => false,
        }
    }

    /// 获取底层数据的引用
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

/// 查找最后一个置 1 的位 (rbsp_stop_one_bit) 的绝对位置
fn find_stop_bit(data: &[u8]) -> Option<usize> {
    let idx = data.iter().rposition(|&b| b != 0)?;
    let byte = data[idx];
    Some(idx * 8 + 7 - byte.trailing_zeros() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_bits_basic() {
        let data = [0b10110001, 0b01010101];
        let mut br = BitReader::new(&data);

        assert_eq!(br.read_bits(1).unwrap(), 1);
        assert_eq!(br.read_bits(1).unwrap(), 0);
        assert_eq!(br.read_bits(2).unwrap(), 0b11);
        assert_eq!(br.read_bits(4).unwrap(), 0b0001);
        assert_eq!(br.read_bits(8).unwrap(), 0b01010101);

        assert!(br.is_eof());
        assert!(matches!(br.read_bit(), Err(AvcError::Eof)));
    }

    #[test]
    fn test_read_bits_32_bit_unaligned() {
        let data = [0x0F, 0xF0, 0x0F, 0xF0, 0x0F];
        let mut br = BitReader::new(&data);
        br.skip_bits(4).unwrap();
        assert_eq!(br.read_bits(32).unwrap(), 0xFF00FF00);
    }

    #[test]
    fn test_read_past_end_is_eof() {
        let data = [0xAB];
        let mut br = BitReader::new(&data);
        br.read_bits(5).unwrap();
        assert!(matches!(br.read_bits(4), Err(AvcError::Eof)), "越界应返回 Eof");
        // 失败后位置不变
        assert_eq!(br.read_bits(3).unwrap(), 0b011);
    }

    #[test]
    fn test_peek_bits() {
        let data = [0b10110001];
        let mut br = BitReader::new(&data);

        assert_eq!(br.peek_bits(4).unwrap(), 0b1011);
        assert_eq!(br.peek_bits(4).unwrap(), 0b1011); // 不移动
        assert_eq!(br.read_bits(4).unwrap(), 0b1011); // 现在移动了
        assert_eq!(br.peek_bits(4).unwrap(), 0b0001);
        assert_eq!(br.peek_bits_padded(8), 0b0001_0000);
    }

    #[test]
    fn test_skip_and_align() {
        let data = [0b10110001, 0b01010101];
        let mut br = BitReader::new(&data);

        br.skip_bits(3).unwrap();
        assert!(!br.is_byte_aligned());
        br.align_to_byte();
        assert_eq!(br.byte_position(), 1);
        assert_eq!(br.read_bits(8).unwrap(), 0b01010101);
    }

    #[test]
    fn test_more_rbsp_data() {
        // 数据位 101, 停止位, 补零
        let data = [0b1011_0000];
        let mut br = BitReader::new(&data);
        assert!(br.more_rbsp_data());
        br.read_bits(3).unwrap();
        assert!(!br.more_rbsp_data(), "只剩停止位时应返回 false");

        // 尾部零字节 (cabac_zero_word 风格) 不影响判断
        let data = [0xC0, 0x80, 0x00, 0x00];
        let mut br = BitReader::new(&data);
        br.read_bits(8).unwrap();
        assert!(!br.more_rbsp_data());

        let empty: [u8; 2] = [0, 0];
        assert!(!BitReader::new(&empty).more_rbsp_data());
    }

    #[test]
    fn test_read_bytes() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut br = BitReader::new(&data);

        let bytes = br.read_bytes(2).unwrap();
        assert_eq!(bytes, &[0x01, 0x02]);
        br.read_bit().unwrap();
        assert!(br.read_bytes(1).is_err(), "未对齐时 read_bytes 应失败");
    }
}
