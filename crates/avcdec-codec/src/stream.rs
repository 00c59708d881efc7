//! Annex B 码流驱动.
//!
//! 拆分起始码, 逐个提交 NAL 单元, 处理 `consumed == false` 的重新提交,
//! 并按输出顺序把每一帧交给调用方的回调. 回调返回 `ControlFlow::Break`
//! 时立即停止, 不再提交后续数据.

use std::ops::ControlFlow;

use log::{debug, warn};
use serde::Serialize;

use crate::decoders::h264::{DecodeStatus, DecoderConfig, H264Decoder, OutputPicture};
use crate::parsers::h264::split_annex_b;

/// 同一 NAL 最多提交的次数 (一次正常提交加一次序列切换后的重新提交)
const MAX_SUBMITS_PER_NAL: usize = 2;

/// 解码过程统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    /// 已提交的 NAL 单元数 (不含重新提交)
    pub nal_units: u64,
    /// 重新提交的次数
    pub resubmissions: u64,
    /// 返回 Fail 的提交次数
    pub failures: u64,
    /// 返回 MemoryFail 的提交次数
    pub memory_failures: u64,
    /// 被跳过的 NAL (等待 IDR, 冗余条带)
    pub skipped: u64,
    /// 已完成的图像数
    pub pictures_decoded: u64,
    /// 已输出的图像数
    pub pictures_output: u64,
    pub idr_pictures: u64,
    /// 输出图像中被隐藏的宏块总数
    pub concealed_mbs: u64,
}

/// 面向整段 Annex B 数据的解码驱动
pub struct StreamDecoder {
    decoder: H264Decoder,
    stats: DecodeStats,
}

impl StreamDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self::with_decoder(H264Decoder::new(config))
    }

    /// 使用已构造好的解码器 (例如自定义宿主)
    pub fn with_decoder(decoder: H264Decoder) -> Self {
        Self {
            decoder,
            stats: DecodeStats::default(),
        }
    }

    pub fn decoder(&self) -> &H264Decoder {
        &self.decoder
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// 解码一段 Annex B 数据中的全部 NAL 单元, 不做结尾刷新
    pub fn decode_annex_b<B, F>(&mut self, data: &[u8], sink: &mut F) -> ControlFlow<B>
    where
        F: FnMut(&OutputPicture<'_>) -> ControlFlow<B>,
    {
        let nalus = split_annex_b(data);
        debug!("H264: Annex B 数据 {} 字节, {} 个 NAL 单元", data.len(), nalus.len());
        for nal in &nalus {
            self.feed_nal(&nal.data, sink)?;
        }
        ControlFlow::Continue(())
    }

    /// 提交一个 NAL 单元 (含头部字节), 取走期间变为可输出的帧.
    ///
    /// 宿主图像标识取该 NAL 的提交序号.
    pub fn feed_nal<B, F>(&mut self, nal: &[u8], sink: &mut F) -> ControlFlow<B>
    where
        F: FnMut(&OutputPicture<'_>) -> ControlFlow<B>,
    {
        let pic_id = self.stats.nal_units as u32;
        self.stats.nal_units += 1;

        for attempt in 0..MAX_SUBMITS_PER_NAL {
            if attempt > 0 {
                self.stats.resubmissions += 1;
            }
            let status = self.decoder.decode_nal(nal, pic_id);
            self.record(status);
            self.drain(false, sink)?;
            if status != (DecodeStatus::PictureReady { consumed: false }) {
                return ControlFlow::Continue(());
            }
        }
        warn!("H264: NAL #{} 多次提交仍未被消费, 已放弃", pic_id);
        ControlFlow::Continue(())
    }

    /// 码流结束: 完成当前图像并按显示顺序取走 DPB 中剩余的帧
    pub fn finish<B, F>(&mut self, sink: &mut F) -> ControlFlow<B>
    where
        F: FnMut(&OutputPicture<'_>) -> ControlFlow<B>,
    {
        let status = self.decoder.flush();
        self.record(status);
        self.drain(true, sink)
    }

    fn record(&mut self, status: DecodeStatus) {
        match status {
            DecodeStatus::Success => {}
            DecodeStatus::PictureReady { .. } => self.stats.pictures_decoded += 1,
            DecodeStatus::NeedMoreData => self.stats.skipped += 1,
            DecodeStatus::Fail => {
                self.stats.failures += 1;
                if let Some(err) = self.decoder.last_error() {
                    debug!("H264: NAL 解码失败: {}", err);
                }
            }
            DecodeStatus::MemoryFail => self.stats.memory_failures += 1,
        }
    }

    fn drain<B, F>(&mut self, flush: bool, sink: &mut F) -> ControlFlow<B>
    where
        F: FnMut(&OutputPicture<'_>) -> ControlFlow<B>,
    {
        while let Some(pic) = self.decoder.next_output(flush) {
            self.stats.pictures_output += 1;
            self.stats.concealed_mbs += u64::from(pic.num_err_mbs);
            if pic.is_idr {
                self.stats.idr_pictures += 1;
            }
            sink(&pic)?;
        }
        ControlFlow::Continue(())
    }
}
