//! # avcdec
//!
//! 纯 Rust 实现的 H.264/AVC 基线解码器.
//!
//! 输入 Annex B 字节流或单个 NAL 单元, 输出按显示顺序排列的 4:2:0 8-bit
//! 重建帧. 不支持的特性 (B 条带, CABAC, 场编码, 数据分区) 会被干净地拒绝.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use avcdec::codec::DecoderConfig;
//!
//! let stream = std::fs::read("input.264").unwrap();
//! let (frames, stats) = avcdec::decode_to_frames(&stream, DecoderConfig::default());
//! println!("输出 {} 帧, 隐藏宏块 {}", frames.len(), stats.concealed_mbs);
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `avcdec-core` | 错误类型, 比特流读写, 有理数 |
//! | `avcdec-codec` | NAL/SPS 解析与解码引擎 |

use std::ops::ControlFlow;

/// 核心类型与工具
pub use avcdec_core as core;

/// H.264 解析器与解码器
pub use avcdec_codec as codec;

use avcdec_codec::{DecodeStats, DecoderConfig, OutputPicture, StreamDecoder};

/// 获取 avcdec 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 一幅已按裁剪矩形拷贝出来的 I420 图像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub poc: i32,
    pub pic_id: u32,
    pub decode_order: u64,
    pub is_idr: bool,
    pub num_err_mbs: u32,
    /// 裁剪后的显示宽度
    pub width: u32,
    pub height: u32,
    /// Y, U, V 平面依次排列
    pub data: Vec<u8>,
}

impl DecodedFrame {
    fn from_picture(pic: &OutputPicture<'_>) -> Self {
        let mut data = Vec::new();
        pic.write_cropped_i420(&mut data);
        Self {
            poc: pic.poc,
            pic_id: pic.pic_id,
            decode_order: pic.decode_order,
            is_idr: pic.is_idr,
            num_err_mbs: pic.num_err_mbs,
            width: pic.crop.width,
            height: pic.crop.height,
            data,
        }
    }

    /// 亮度平面
    pub fn luma(&self) -> &[u8] {
        let len = (self.width * self.height) as usize;
        &self.data[..len.min(self.data.len())]
    }
}

/// 解码整段 Annex B 码流, 返回全部输出帧 (显示顺序) 与统计
pub fn decode_to_frames(stream: &[u8], config: DecoderConfig) -> (Vec<DecodedFrame>, DecodeStats) {
    let mut decoder = StreamDecoder::new(config);
    let mut frames = Vec::new();
    let mut collect = |pic: &OutputPicture<'_>| -> ControlFlow<()> {
        frames.push(DecodedFrame::from_picture(pic));
        ControlFlow::Continue(())
    };
    let _ = decoder.decode_annex_b(stream, &mut collect);
    let _ = decoder.finish(&mut collect);
    log::debug!("H264: 码流解码完成, 输出 {} 帧", frames.len());
    (frames, decoder.stats().clone())
}
