//! H.264 NAL (Network Abstraction Layer) 单元解析.
//!
//! # Annex B 格式
//!
//! Annex B 使用起始码 (start code) 分隔 NAL 单元:
//! - 3 字节起始码: `00 00 01`
//! - 4 字节起始码: `00 00 00 01`
//!
//! # NAL 头部 (1 字节)
//! ```text
//! ┌─────────────────────────────────────┐
//! │ forbidden(1) | ref_idc(2) | type(5) │
//! └─────────────────────────────────────┘
//! ```

use avcdec_core::{AvcError, AvcResult};

/// NAL 单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    /// 非 IDR 图像切片
    Slice,
    /// 数据分区 A (DPA)
    SliceDpa,
    /// 数据分区 B (DPB)
    SliceDpb,
    /// 数据分区 C (DPC)
    SliceDpc,
    /// IDR 图像切片
    SliceIdr,
    /// 增补增强信息 (SEI)
    Sei,
    /// 序列参数集 (SPS)
    Sps,
    /// 图像参数集 (PPS)
    Pps,
    /// 访问单元分隔符 (AUD)
    Aud,
    /// 序列结束
    EndOfSequence,
    /// 流结束
    EndOfStream,
    /// 填充数据
    FillerData,
    /// 其他类型 (SPS 扩展, 前缀 NAL, 保留值等)
    Unknown(u8),
}

impl NalUnitType {
    /// 从 NAL 类型编号创建
    pub fn from_type_id(type_id: u8) -> Self {
        match type_id {
            1 => Self::Slice,
            2 => Self::SliceDpa,
            3 => Self::SliceDpb,
            4 => Self::SliceDpc,
            5 => Self::SliceIdr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::FillerData,
            _ => Self::Unknown(type_id),
        }
    }

    /// 获取类型编号
    pub fn type_id(&self) -> u8 {
        match self {
            Self::Slice => 1,
            Self::SliceDpa => 2,
            Self::SliceDpb => 3,
            Self::SliceDpc => 4,
            Self::SliceIdr => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Aud => 9,
            Self::EndOfSequence => 10,
            Self::EndOfStream => 11,
            Self::FillerData => 12,
            Self::Unknown(id) => *id,
        }
    }

    /// 是否为 VCL (Video Coding Layer) NAL
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            Self::Slice | Self::SliceDpa | Self::SliceDpb | Self::SliceDpc | Self::SliceIdr
        )
    }

    /// 是否为数据分区切片
    pub fn is_partition(&self) -> bool {
        matches!(self, Self::SliceDpa | Self::SliceDpb | Self::SliceDpc)
    }
}

impl std::fmt::Display for NalUnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Slice => write!(f, "Slice"),
            Self::SliceDpa => write!(f, "SliceDPA"),
            Self::SliceDpb => write!(f, "SliceDPB"),
            Self::SliceDpc => write!(f, "SliceDPC"),
            Self::SliceIdr => write!(f, "IDR"),
            Self::Sei => write!(f, "SEI"),
            Self::Sps => write!(f, "SPS"),
            Self::Pps => write!(f, "PPS"),
            Self::Aud => write!(f, "AUD"),
            Self::EndOfSequence => write!(f, "EndOfSeq"),
            Self::EndOfStream => write!(f, "EndOfStream"),
            Self::FillerData => write!(f, "Filler"),
            Self::Unknown(id) => write!(f, "Unknown({id})"),
        }
    }
}

/// 解析 NAL 头部字节, 返回 (类型, nal_ref_idc)
pub fn parse_nal_header(header: u8) -> AvcResult<(NalUnitType, u8)> {
    let forbidden = (header >> 7) & 1;
    if forbidden != 0 {
        return Err(AvcError::InvalidData(format!(
            "H264: forbidden_zero_bit 非法, value={}",
            forbidden
        )));
    }
    let ref_idc = (header >> 5) & 0x03;
    Ok((NalUnitType::from_type_id(header & 0x1F), ref_idc))
}

/// 分割后的 NAL 单元
#[derive(Debug, Clone)]
pub struct NalUnit {
    /// NAL 单元类型
    pub nal_type: NalUnitType,
    /// nal_ref_idc (参考重要性, 0-3)
    pub ref_idc: u8,
    /// NAL 单元原始数据 (不含起始码, 含 NAL 头部字节, 仍为 EBSP)
    pub data: Vec<u8>,
}

impl NalUnit {
    /// 从 NAL 数据 (含头部字节) 解析
    pub fn parse(data: &[u8]) -> AvcResult<Self> {
        let Some(&header) = data.first() else {
            return Err(AvcError::InvalidData("H264: NAL 单元数据为空".into()));
        };
        let (nal_type, ref_idc) = parse_nal_header(header)?;
        Ok(Self {
            nal_type,
            ref_idc,
            data: data.to_vec(),
        })
    }

    /// 获取 RBSP 数据 (去掉头部字节与防竞争字节)
    pub fn rbsp(&self) -> Vec<u8> {
        let mut buf = self.data.get(1..).unwrap_or_default().to_vec();
        ebsp_to_rbsp_in_place(&mut buf);
        buf
    }
}

/// EBSP → RBSP 原地转换
///
/// 删除每个 `00 00 03` 序列中的 `0x03`, 一次遍历, 只会缩短缓冲区.
pub fn ebsp_to_rbsp_in_place(buf: &mut Vec<u8>) {
    let mut zeros = 0usize;
    let mut write = 0usize;
    for read in 0..buf.len() {
        let byte = buf[read];
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        buf[write] = byte;
        write += 1;
    }
    buf.truncate(write);
}

/// 从 Annex B 字节流中分割出所有 NAL 单元
///
/// 支持 3 字节 (00 00 01) 和 4 字节 (00 00 00 01) 起始码.
/// 返回的 NAL 单元不含起始码, 头部非法的单元被丢弃.
pub fn split_annex_b(data: &[u8]) -> Vec<NalUnit> {
    let offsets = find_start_codes(data);
    let mut nalus = Vec::new();

    for (i, &(start, code_len)) in offsets.iter().enumerate() {
        let end = offsets.get(i + 1).map_or(data.len(), |&(next, _)| next);
        let nal_start = start + code_len;

        // 去除尾部的 0 字节 (trailing_zero_8bits)
        let mut nal_end = end;
        while nal_end > nal_start && data[nal_end - 1] == 0x00 {
            nal_end -= 1;
        }

        if nal_end > nal_start {
            if let Ok(nalu) = NalUnit::parse(&data[nal_start..nal_end]) {
                nalus.push(nalu);
            }
        }
    }

    nalus
}

// ============================================================
// 内部工具函数
// ============================================================

/// 查找所有起始码的 (位置, 长度)
fn find_start_codes(data: &[u8]) -> Vec<(usize, usize)> {
    let mut positions = Vec::new();
    let mut i = 0;

    while i + 2 < data.len() {
        if data[i] == 0x00 && data[i + 1] == 0x00 {
            if data[i + 2] == 0x01 {
                positions.push((i, 3));
                i += 3;
                continue;
            } else if i + 3 < data.len() && data[i + 2] == 0x00 && data[i + 3] == 0x01 {
                positions.push((i, 4));
                i += 4;
                continue;
            }
        }
        i += 1;
    }

    positions
}
