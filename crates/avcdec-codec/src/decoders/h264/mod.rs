//! H.264/AVC 基线解码器.
//!
//! 输入 Annex B 拆分后的 NAL 单元, 输出 4:2:0 重建帧. 支持 CAVLC 熵解码,
//! I/P 帧条带, 条带组, 长期参考帧与 MMCO. 每次调用同步完成, 不持有线程.
//!
//! 调用约定: `decode_nal` 返回 [`DecodeStatus::PictureReady`] 后, 宿主应循环调用
//! [`H264Decoder::next_output`] 取走可输出的帧; `consumed == false` 时同一 NAL
//! 需要再次提交.

mod cavlc;
mod common;
mod conceal;
mod config;
mod deblock;
mod dpb;
mod host;
mod intra;
mod macroblock;
mod macroblock_inter;
mod macroblock_intra;
mod macroblock_state;
mod output;
mod parameter_sets;
mod poc;
mod reference;
mod residual;
mod sei;
mod slice_decode;
mod slice_group;
mod slice_parse;
mod syntax;

pub use config::DecoderConfig;
pub use host::{DecoderHost, DefaultHost};
pub use output::OutputPicture;
pub use sei::SeiMessage;

use avcdec_core::{AvcError, AvcResult, Rational};
use log::{Level, debug, warn};

use crate::parsers::h264::{NalUnitType, Sps, ebsp_to_rbsp_in_place, parse_nal_header, parse_sps};

use common::PictureBuffer;
use deblock::DeblockParams;
use dpb::Dpb;
use macroblock::MbSyntax;
use macroblock_state::MbArena;
use parameter_sets::{ParamSetStore, check_sps_supported, parse_pps};
use poc::{PocResult, PocState};
use slice_parse::SliceHeader;

// ============================================================
// 公共类型
// ============================================================

/// `decode_nal` / `flush` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// NAL 已处理, 没有完成的图像
    Success,
    /// 一幅图像已完成; `consumed == false` 时需要重新提交同一 NAL
    PictureReady { consumed: bool },
    /// NAL 被跳过 (等待 IDR, 冗余条带)
    NeedMoreData,
    /// 码流错误或不支持的特性, 详情见 `last_error`
    Fail,
    /// 宿主内存分配失败
    MemoryFail,
}

/// 裁剪矩形 (像素)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// 当前激活序列的信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceInfo {
    pub profile_idc: u8,
    pub level_idc: u8,
    /// 编码宽度 (宏块对齐)
    pub coded_width: u32,
    pub coded_height: u32,
    pub crop: CropRect,
    pub dpb_size: usize,
    pub max_num_ref_frames: u32,
    pub sar: Rational,
    pub frame_rate: Option<Rational>,
}

impl SequenceInfo {
    fn from_sps(sps: &Sps, dpb_size: usize) -> Self {
        let (left, right, top, bottom) = sps.crop_rect();
        let coded_width = sps.coded_width();
        let coded_height = sps.coded_height();
        let vui = sps.vui.as_ref();
        Self {
            profile_idc: sps.profile_idc,
            level_idc: sps.level_idc,
            coded_width,
            coded_height,
            crop: CropRect {
                left,
                top,
                width: coded_width.saturating_sub(left + right),
                height: coded_height.saturating_sub(top + bottom),
            },
            dpb_size,
            max_num_ref_frames: sps.max_num_ref_frames,
            sar: vui.map_or(Rational::new(1, 1), |v| v.sar),
            frame_rate: vui.and_then(|v| v.fps).map(Rational::reduce),
        }
    }
}

// ============================================================
// 解码器状态
// ============================================================

/// 正在解码的图像
struct CurrentPicture {
    store: usize,
    buf: PictureBuffer,
    /// 首个条带的 header, 用于新图像检测与参考标记
    header: SliceHeader,
    sps: Sps,
    poc: PocResult,
    /// 已开始的条带数, 条带序号从 1 开始
    slice_count: u32,
    /// 下标为条带序号 - 1
    deblock: Vec<DeblockParams>,
    /// 最近一个条带的 QP, 错误隐藏宏块沿用
    last_qp: i32,
    /// 最近一个 P 条带的 RefPicList0[0]
    conceal_ref: Option<usize>,
}

/// H.264 基线解码器
pub struct H264Decoder {
    config: DecoderConfig,
    host: Box<dyn DecoderHost>,
    params: ParamSetStore,
    /// 当前激活的 SPS (决定帧池尺寸)
    active_sps: Option<Sps>,
    sequence: Option<SequenceInfo>,
    dpb: Dpb,
    arena: MbArena,
    poc: PocState,
    syn: MbSyntax,
    current: Option<CurrentPicture>,
    /// NAL → RBSP 转换复用的缓冲区
    scratch: Vec<u8>,
    seen_idr: bool,
    /// 最近一个参考图像的 frame_num (PrevRefFrameNum)
    prev_ref_frame_num: Option<u32>,
    /// 序列切换时已请求宿主取走旧帧
    sequence_drain_requested: bool,
    last_error: Option<AvcError>,
}

impl Default for H264Decoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

impl std::fmt::Debug for H264Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H264Decoder")
            .field("config", &self.config)
            .field("sequence", &self.sequence)
            .field("decoding", &self.current.is_some())
            .field("seen_idr", &self.seen_idr)
            .finish_non_exhaustive()
    }
}

impl H264Decoder {
    /// 使用默认宿主 (堆内存, `log` 日志) 创建解码器
    pub fn new(config: DecoderConfig) -> Self {
        Self::with_host(config, Box::new(DefaultHost))
    }

    /// 使用自定义宿主创建解码器
    pub fn with_host(config: DecoderConfig, host: Box<dyn DecoderHost>) -> Self {
        Self {
            config,
            host,
            params: ParamSetStore::new(),
            active_sps: None,
            sequence: None,
            dpb: Dpb::default(),
            arena: MbArena::default(),
            poc: PocState::new(),
            syn: MbSyntax::new(),
            current: None,
            scratch: Vec::new(),
            seen_idr: false,
            prev_ref_frame_num: None,
            sequence_drain_requested: false,
            last_error: None,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// 处理一个 NAL 单元 (含 1 字节头, 不含起始码)
    ///
    /// `pic_id` 为宿主的不透明图像标识, 随输出帧原样返回.
    pub fn decode_nal(&mut self, nal: &[u8], pic_id: u32) -> DecodeStatus {
        match self.decode_nal_inner(nal, pic_id) {
            Ok(status) => status,
            Err(err) => self.report_error(err),
        }
    }

    /// 码流结束: 完成正在解码的图像
    ///
    /// 之后用 `next_output(true)` 取走全部剩余帧.
    pub fn flush(&mut self) -> DecodeStatus {
        if self.current.is_none() {
            return DecodeStatus::Success;
        }
        match self.finish_picture() {
            Ok(()) => DecodeStatus::PictureReady { consumed: true },
            Err(err) => self.report_error(err),
        }
    }

    /// 回到初始状态: 丢弃当前图像与 DPB 内容, 保留参数集与帧内存
    pub fn reset(&mut self) {
        if let Some(cur) = self.current.take() {
            self.dpb.abort_current(cur.store, cur.buf);
        }
        self.dpb.clear(self.host.as_mut());
        self.arena.reset();
        self.poc = PocState::new();
        self.seen_idr = false;
        self.prev_ref_frame_num = None;
        self.sequence_drain_requested = false;
        self.last_error = None;
        debug!("H264: 解码器已重置");
    }

    /// 最近一次失败的原因
    pub fn last_error(&self) -> Option<&AvcError> {
        self.last_error.as_ref()
    }

    /// 当前激活序列的信息, 尚未激活时为 None
    pub fn sequence_info(&self) -> Option<SequenceInfo> {
        self.sequence.clone()
    }

    fn report_error(&mut self, err: AvcError) -> DecodeStatus {
        let status = if err.is_out_of_memory() {
            DecodeStatus::MemoryFail
        } else {
            DecodeStatus::Fail
        };
        self.host.log(Level::Warn, &err.to_string());
        self.last_error = Some(err);
        status
    }

    // ============================================================
    // NAL 分发
    // ============================================================

    fn decode_nal_inner(&mut self, nal: &[u8], pic_id: u32) -> AvcResult<DecodeStatus> {
        let Some((&header, payload)) = nal.split_first() else {
            return Err(AvcError::InvalidArgument("H264: NAL 单元为空".into()));
        };
        let (nal_type, ref_idc) = parse_nal_header(header)?;

        self.scratch.clear();
        self.scratch.extend_from_slice(payload);
        ebsp_to_rbsp_in_place(&mut self.scratch);

        match nal_type {
            NalUnitType::Slice | NalUnitType::SliceIdr => self.handle_slice(nal_type, ref_idc, pic_id),
            NalUnitType::Sps => self.handle_sps().map(|()| DecodeStatus::Success),
            NalUnitType::Pps => self.handle_pps().map(|()| DecodeStatus::Success),
            NalUnitType::Sei => {
                self.handle_sei();
                Ok(DecodeStatus::Success)
            }
            NalUnitType::SliceDpa | NalUnitType::SliceDpb | NalUnitType::SliceDpc => Err(
                AvcError::Unsupported(format!("H264: 不支持数据分区条带, nal_type={:?}", nal_type)),
            ),
            NalUnitType::Aud
            | NalUnitType::EndOfSequence
            | NalUnitType::EndOfStream
            | NalUnitType::FillerData => Ok(DecodeStatus::Success),
            NalUnitType::Unknown(type_id) => {
                debug!("H264: 忽略 NAL 类型 {}", type_id);
                Ok(DecodeStatus::Success)
            }
        }
    }

    /// 处理 SPS: 解析失败或不支持时不改动存储表
    fn handle_sps(&mut self) -> AvcResult<()> {
        let sps = parse_sps(&self.scratch)?;
        check_sps_supported(&sps)?;
        debug!(
            "H264: SPS id={} {}x{} profile={} level={} poc_type={}",
            sps.sps_id, sps.width, sps.height, sps.profile_idc, sps.level_idc, sps.poc_type
        );
        let sps_id = sps.sps_id;
        if self.params.store_sps(sps)? {
            debug!("H264: SPS id={} 内容已更新", sps_id);
        }
        Ok(())
    }

    fn handle_pps(&mut self) -> AvcResult<()> {
        let pps = parse_pps(&self.scratch, &self.params)?;
        debug!(
            "H264: PPS id={} sps_id={} slice_groups={}",
            pps.pps_id, pps.sps_id, pps.num_slice_groups
        );
        self.params.store_pps(pps)
    }

    /// SEI 只记录日志, 解析失败也不影响解码
    fn handle_sei(&mut self) {
        match sei::parse_sei_rbsp(&self.scratch) {
            Ok(messages) => {
                for message in &messages {
                    debug!("H264: SEI payload_type={} {:?}", message.payload_type(), message);
                }
            }
            Err(err) => warn!("H264: SEI 解析失败, {}", err),
        }
    }

    // ============================================================
    // 序列激活
    // ============================================================

    /// 配置 DPB 容量上限后的帧数
    fn effective_dpb_size(&self, sps: &Sps) -> usize {
        let size = sps.dpb_size() as usize;
        match self.config.max_dpb_frames {
            Some(cap) => size.min(cap.max(sps.max_num_ref_frames as usize).max(1)),
            None => size,
        }
    }

    /// 激活 SPS 是否需要重新分配帧池
    fn needs_reconfigure(&self, sps: &Sps) -> bool {
        let Some(active) = &self.active_sps else {
            return true;
        };
        !self.dpb.is_allocated()
            || active.coded_width() != sps.coded_width()
            || active.coded_height() != sps.coded_height()
            || self.dpb.dpb_size() != self.effective_dpb_size(sps)
    }

    /// 按 SPS 分配帧池与宏块状态表
    fn activate_sequence(&mut self, sps: &Sps) -> AvcResult<()> {
        let dpb_size = self.effective_dpb_size(sps);
        let (width, height) = (sps.coded_width() as usize, sps.coded_height() as usize);
        self.active_sps = None;
        self.sequence = None;
        if let Err(err) = self.dpb.allocate(self.host.as_mut(), width, height, dpb_size) {
            self.arena.configure(0, 0);
            return Err(err);
        }

        self.arena
            .configure(sps.pic_width_in_mbs as usize, sps.frame_height_in_mbs() as usize);
        self.poc = PocState::new();
        self.prev_ref_frame_num = None;
        self.refresh_sequence(sps);
        debug!(
            "H264: 激活序列 {}x{}, dpb_size={}, max_num_ref_frames={}",
            width, height, dpb_size, sps.max_num_ref_frames
        );
        Ok(())
    }
}

impl Drop for H264Decoder {
    fn drop(&mut self) {
        if let Some(cur) = self.current.take() {
            self.dpb.abort_current(cur.store, cur.buf);
        }
        self.dpb.release(self.host.as_mut());
    }
}
