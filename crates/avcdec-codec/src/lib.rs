//! # avcdec-codec
//!
//! H.264/AVC 基线解码器. 输入 NAL 单元, 输出 4:2:0 8-bit 重建帧.
//!
//! ## 支持范围
//!
//! - Baseline / Constrained Baseline 以及只使用基线工具的 Main/Extended 码流
//! - I/P 帧条带, CAVLC, 条带组 (FMO), 任意条带顺序, 长期参考帧与 MMCO
//! - 环路去块滤波, 丢失宏块的错误隐藏, frame_num 间隙补帧
//!
//! ## 使用示例
//!
//! ```rust
//! use avcdec_codec::parsers::h264::split_annex_b;
//! use avcdec_codec::{DecodeStatus, DecoderConfig, H264Decoder};
//!
//! let mut decoder = H264Decoder::new(DecoderConfig::default());
//! let stream: &[u8] = &[];
//! for (idx, nal) in split_annex_b(stream).iter().enumerate() {
//!     loop {
//!         let status = decoder.decode_nal(&nal.data, idx as u32);
//!         while let Some(pic) = decoder.next_output(false) {
//!             let _ = pic.poc;
//!         }
//!         if status != (DecodeStatus::PictureReady { consumed: false }) {
//!             break;
//!         }
//!     }
//! }
//! decoder.flush();
//! while decoder.next_output(true).is_some() {}
//! ```

pub mod decoders;
pub mod parsers;
pub mod stream;

pub use decoders::h264::{
    CropRect, DecodeStatus, DecoderConfig, DecoderHost, DefaultHost, H264Decoder, OutputPicture,
    SeiMessage, SequenceInfo,
};
pub use stream::{DecodeStats, StreamDecoder};
