use std::sync::{Arc, Mutex};

use avcdec_core::BitWriter;

use super::super::cavlc::{
    CHROMA_DC_COEFF_TOKEN_BITS, CHROMA_DC_COEFF_TOKEN_LEN, CHROMA_DC_TOTAL_ZEROS_BITS,
    CHROMA_DC_TOTAL_ZEROS_LEN, COEFF_TOKEN_BITS, COEFF_TOKEN_LEN, RUN_BEFORE_BITS, RUN_BEFORE_LEN,
    TOTAL_ZEROS_BITS, TOTAL_ZEROS_LEN,
};
use super::super::{DecodeStatus, DecoderConfig, DecoderHost, H264Decoder};

pub const NAL_SLICE: u8 = 1;
pub const NAL_IDR: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;

// ============================================================
// 参数集
// ============================================================

#[derive(Debug, Clone)]
pub struct SpsSpec {
    pub sps_id: u32,
    pub profile_idc: u8,
    pub level_idc: u8,
    pub mb_width: u32,
    pub mb_height: u32,
    pub log2_max_frame_num: u32,
    pub poc_type: u32,
    pub log2_max_poc_lsb: u32,
    pub offset_for_non_ref_pic: i32,
    pub offset_for_ref_frame: Vec<i32>,
    pub max_num_ref_frames: u32,
    pub gaps_allowed: bool,
    pub frame_mbs_only: bool,
    /// 裁剪 (left, right, top, bottom), 单位为 2 像素
    pub crop: Option<(u32, u32, u32, u32)>,
}

impl Default for SpsSpec {
    fn default() -> Self {
        Self {
            sps_id: 0,
            profile_idc: 66,
            level_idc: 30,
            mb_width: 2,
            mb_height: 2,
            log2_max_frame_num: 4,
            poc_type: 0,
            log2_max_poc_lsb: 4,
            offset_for_non_ref_pic: 0,
            offset_for_ref_frame: Vec::new(),
            max_num_ref_frames: 4,
            gaps_allowed: false,
            frame_mbs_only: true,
            crop: None,
        }
    }
}

pub fn build_sps_rbsp(spec: &SpsSpec) -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bits(u32::from(spec.profile_idc), 8);
    bw.write_bits(0, 8); // constraint_set_flags
    bw.write_bits(u32::from(spec.level_idc), 8);
    bw.write_ue(spec.sps_id);
    bw.write_ue(spec.log2_max_frame_num - 4);
    bw.write_ue(spec.poc_type);
    match spec.poc_type {
        0 => bw.write_ue(spec.log2_max_poc_lsb - 4),
        1 => {
            bw.write_flag(false); // delta_pic_order_always_zero_flag
            bw.write_se(spec.offset_for_non_ref_pic);
            bw.write_se(0); // offset_for_top_to_bottom_field
            bw.write_ue(spec.offset_for_ref_frame.len() as u32);
            for &offset in &spec.offset_for_ref_frame {
                bw.write_se(offset);
            }
        }
        _ => {}
    }
    bw.write_ue(spec.max_num_ref_frames);
    bw.write_flag(spec.gaps_allowed);
    bw.write_ue(spec.mb_width - 1);
    let map_units = if spec.frame_mbs_only {
        spec.mb_height
    } else {
        spec.mb_height / 2
    };
    bw.write_ue(map_units - 1);
    bw.write_flag(spec.frame_mbs_only);
    if !spec.frame_mbs_only {
        bw.write_flag(false); // mb_adaptive_frame_field_flag
    }
    bw.write_flag(true); // direct_8x8_inference_flag
    bw.write_flag(spec.crop.is_some());
    if let Some((left, right, top, bottom)) = spec.crop {
        bw.write_ue(left);
        bw.write_ue(right);
        bw.write_ue(top);
        bw.write_ue(bottom);
    }
    bw.write_flag(false); // vui_parameters_present_flag
    bw.write_trailing_bits();
    bw.finish()
}

#[derive(Debug, Clone)]
pub struct PpsSpec {
    pub pps_id: u32,
    pub sps_id: u32,
    pub cabac: bool,
    /// 交织条带组 (类型 0) 的游程长度, 空表示单条带组
    pub interleaved_runs: Vec<u32>,
    pub num_ref_idx_default_active: u32,
    pub pic_init_qp: i32,
    pub chroma_qp_index_offset: i32,
    pub deblocking_filter_control: bool,
    pub constrained_intra_pred: bool,
    pub redundant_pic_cnt_present: bool,
}

impl Default for PpsSpec {
    fn default() -> Self {
        Self {
            pps_id: 0,
            sps_id: 0,
            cabac: false,
            interleaved_runs: Vec::new(),
            num_ref_idx_default_active: 1,
            pic_init_qp: 26,
            chroma_qp_index_offset: 0,
            deblocking_filter_control: false,
            constrained_intra_pred: false,
            redundant_pic_cnt_present: false,
        }
    }
}

pub fn build_pps_rbsp(spec: &PpsSpec) -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_ue(spec.pps_id);
    bw.write_ue(spec.sps_id);
    bw.write_flag(spec.cabac);
    bw.write_flag(false); // bottom_field_pic_order_in_frame_present_flag
    if spec.interleaved_runs.is_empty() {
        bw.write_ue(0);
    } else {
        bw.write_ue(spec.interleaved_runs.len() as u32 - 1);
        bw.write_ue(0); // slice_group_map_type
        for &run in &spec.interleaved_runs {
            bw.write_ue(run - 1);
        }
    }
    bw.write_ue(spec.num_ref_idx_default_active - 1);
    bw.write_ue(0); // num_ref_idx_l1_default_active_minus1
    bw.write_flag(false); // weighted_pred_flag
    bw.write_bits(0, 2); // weighted_bipred_idc
    bw.write_se(spec.pic_init_qp - 26);
    bw.write_se(0); // pic_init_qs_minus26
    bw.write_se(spec.chroma_qp_index_offset);
    bw.write_flag(spec.deblocking_filter_control);
    bw.write_flag(spec.constrained_intra_pred);
    bw.write_flag(spec.redundant_pic_cnt_present);
    bw.write_trailing_bits();
    bw.finish()
}

// ============================================================
// 条带
// ============================================================

#[derive(Debug, Clone)]
pub struct SliceSpec {
    pub nal_ref_idc: u8,
    pub is_idr: bool,
    pub first_mb: u32,
    /// slice_type 语法值
    pub slice_type: u32,
    pub pps_id: u32,
    pub frame_num: u32,
    pub idr_pic_id: u32,
    pub poc_lsb: u32,
    pub delta_pic_order_cnt0: i32,
    pub redundant_pic_cnt: u32,
    /// 仅 frame_mbs_only = 0 时写出
    pub field_pic: bool,
    pub num_ref_idx_override: Option<u32>,
    /// 非 IDR 参考图像的 MMCO 命令 (op, 参数...)
    pub mmco: Vec<(u32, Vec<u32>)>,
    pub slice_qp_delta: i32,
    /// (idc, alpha_div2, beta_div2), 仅 deblocking_filter_control 时写出
    pub deblock: (u32, i32, i32),
}

impl SliceSpec {
    pub fn idr(idr_pic_id: u32) -> Self {
        Self {
            nal_ref_idc: 3,
            is_idr: true,
            first_mb: 0,
            slice_type: 7,
            pps_id: 0,
            frame_num: 0,
            idr_pic_id,
            poc_lsb: 0,
            delta_pic_order_cnt0: 0,
            redundant_pic_cnt: 0,
            field_pic: false,
            num_ref_idx_override: None,
            mmco: Vec::new(),
            slice_qp_delta: 0,
            deblock: (0, 0, 0),
        }
    }

    pub fn p(frame_num: u32, poc_lsb: u32, nal_ref_idc: u8) -> Self {
        Self {
            nal_ref_idc,
            is_idr: false,
            slice_type: 5,
            frame_num,
            poc_lsb,
            ..Self::idr(0)
        }
    }

    pub fn nal_type(&self) -> u8 {
        if self.is_idr { NAL_IDR } else { NAL_SLICE }
    }
}

/// 写出 slice_header, 之后由调用方写 slice_data
pub fn write_slice_header(bw: &mut BitWriter, sps: &SpsSpec, pps: &PpsSpec, slice: &SliceSpec) {
    bw.write_ue(slice.first_mb);
    bw.write_ue(slice.slice_type);
    bw.write_ue(slice.pps_id);
    bw.write_bits(slice.frame_num, sps.log2_max_frame_num);
    if !sps.frame_mbs_only {
        bw.write_flag(slice.field_pic);
        if slice.field_pic {
            bw.write_flag(false); // bottom_field_flag
        }
    }
    if slice.is_idr {
        bw.write_ue(slice.idr_pic_id);
    }
    match sps.poc_type {
        0 => bw.write_bits(slice.poc_lsb, sps.log2_max_poc_lsb),
        1 => bw.write_se(slice.delta_pic_order_cnt0),
        _ => {}
    }
    if pps.redundant_pic_cnt_present {
        bw.write_ue(slice.redundant_pic_cnt);
    }
    let slice_type = slice.slice_type % 5;
    if slice_type == 0 || slice_type == 1 {
        if slice_type == 1 {
            bw.write_flag(false); // direct_spatial_mv_pred_flag
        }
        bw.write_flag(slice.num_ref_idx_override.is_some());
        if let Some(num) = slice.num_ref_idx_override {
            bw.write_ue(num - 1);
        }
        bw.write_flag(false); // ref_pic_list_modification_flag_l0
    }
    if slice.nal_ref_idc != 0 {
        if slice.is_idr {
            bw.write_flag(false); // no_output_of_prior_pics_flag
            bw.write_flag(false); // long_term_reference_flag
        } else {
            bw.write_flag(!slice.mmco.is_empty());
            if !slice.mmco.is_empty() {
                for (op, args) in &slice.mmco {
                    bw.write_ue(*op);
                    for &arg in args {
                        bw.write_ue(arg);
                    }
                }
                bw.write_ue(0);
            }
        }
    }
    bw.write_se(slice.slice_qp_delta);
    if pps.deblocking_filter_control {
        let (idc, alpha, beta) = slice.deblock;
        bw.write_ue(idc);
        if idc != 1 {
            bw.write_se(alpha);
            bw.write_se(beta);
        }
    }
}

pub fn build_slice_header_rbsp(sps: &SpsSpec, pps: &PpsSpec, slice: &SliceSpec) -> Vec<u8> {
    let mut bw = BitWriter::new();
    write_slice_header(&mut bw, sps, pps, slice);
    bw.write_trailing_bits();
    bw.finish()
}

// ============================================================
// 宏块
// ============================================================

/// I 条带中 DC 预测, 无残差的 I_16x16 宏块
pub fn write_i16x16_dc_mb(bw: &mut BitWriter) {
    bw.write_ue(3); // mb_type: I_16x16_2_0_0
    bw.write_ue(0); // intra_chroma_pred_mode = DC
    bw.write_se(0); // mb_qp_delta
    bw.write_bit(1); // Intra16x16DCLevel: coeff_token TotalCoeff=0 (nC=0)
}

/// I_PCM 宏块, `mb_type_code` 在 I 条带为 25, P 条带为 30
pub fn write_pcm_mb(bw: &mut BitWriter, mb_type_code: u32, samples: &[u8; 384]) {
    bw.write_ue(mb_type_code);
    bw.align_to_byte();
    bw.write_bytes(samples);
}

/// 宏块 (mb_x, mb_y) 的 PCM 样本, 取自 `pattern(x, y, plane)`
pub fn pcm_samples(mb_x: usize, mb_y: usize, pattern: impl Fn(usize, usize, usize) -> u8) -> [u8; 384] {
    let mut samples = [0u8; 384];
    for y in 0..16 {
        for x in 0..16 {
            samples[y * 16 + x] = pattern(mb_x * 16 + x, mb_y * 16 + y, 0);
        }
    }
    for plane in 1..3 {
        for y in 0..8 {
            for x in 0..8 {
                samples[256 + (plane - 1) * 64 + y * 8 + x] = pattern(mb_x * 8 + x, mb_y * 8 + y, plane);
            }
        }
    }
    samples
}

pub fn gradient(x: usize, y: usize, plane: usize) -> u8 {
    ((x * 7 + y * 3 + plane * 40) % 251) as u8 + 2
}

pub fn checker(x: usize, y: usize, plane: usize) -> u8 {
    if ((x / 4) + (y / 4) + plane) % 2 == 0 { 40 } else { 200 }
}

/// 全部宏块为 I_PCM 的 I 条带
pub fn build_pcm_slice(
    sps: &SpsSpec,
    pps: &PpsSpec,
    slice: &SliceSpec,
    mb_addrs: &[u32],
    pattern: fn(usize, usize, usize) -> u8,
) -> Vec<u8> {
    let mut bw = BitWriter::new();
    write_slice_header(&mut bw, sps, pps, slice);
    for &addr in mb_addrs {
        let (mb_x, mb_y) = ((addr % sps.mb_width) as usize, (addr / sps.mb_width) as usize);
        write_pcm_mb(&mut bw, 25, &pcm_samples(mb_x, mb_y, pattern));
    }
    bw.write_trailing_bits();
    nal(slice.nal_type(), slice.nal_ref_idc, &bw.finish())
}

/// 全部宏块为 P_Skip 的 P 条带
pub fn build_skip_slice(sps: &SpsSpec, pps: &PpsSpec, slice: &SliceSpec, mb_count: u32) -> Vec<u8> {
    let mut bw = BitWriter::new();
    write_slice_header(&mut bw, sps, pps, slice);
    bw.write_ue(mb_count);
    bw.write_trailing_bits();
    nal(slice.nal_type(), slice.nal_ref_idc, &bw.finish())
}

// ============================================================
// NAL
// ============================================================

/// 加 NAL 头并插入防竞争字节
pub fn nal(nal_type: u8, ref_idc: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut out = vec![(ref_idc << 5) | nal_type];
    let mut zeros = 0;
    for &byte in rbsp {
        if zeros >= 2 && byte <= 3 {
            out.push(0x03);
            zeros = 0;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
    out
}

pub fn sps_nal(spec: &SpsSpec) -> Vec<u8> {
    nal(NAL_SPS, 3, &build_sps_rbsp(spec))
}

pub fn pps_nal(spec: &PpsSpec) -> Vec<u8> {
    nal(NAL_PPS, 3, &build_pps_rbsp(spec))
}

// ============================================================
// CAVLC 编码 (解码器的逆过程)
// ============================================================

fn write_code(bw: &mut BitWriter, len: u8, code: u8) {
    bw.write_bits(u32::from(code), u32::from(len));
}

/// 把扫描顺序的系数编码为一个 CAVLC 残差块
pub fn encode_residual_block(bw: &mut BitWriter, coeffs: &[i32], nc: i32) {
    let max_coeff = coeffs.len();
    let positions: Vec<usize> = (0..max_coeff).filter(|&i| coeffs[i] != 0).collect();
    // 解码顺序: 最高频在前
    let levels: Vec<i32> = positions.iter().rev().map(|&p| coeffs[p]).collect();
    let total_coeff = levels.len();
    let trailing_ones = levels.iter().take(3).take_while(|l| l.abs() == 1).count();

    let token = total_coeff * 4 + trailing_ones;
    match nc {
        -1 => write_code(bw, CHROMA_DC_COEFF_TOKEN_LEN[token], CHROMA_DC_COEFF_TOKEN_BITS[token]),
        0 | 1 => write_code(bw, COEFF_TOKEN_LEN[0][token], COEFF_TOKEN_BITS[0][token]),
        2 | 3 => write_code(bw, COEFF_TOKEN_LEN[1][token], COEFF_TOKEN_BITS[1][token]),
        4..=7 => write_code(bw, COEFF_TOKEN_LEN[2][token], COEFF_TOKEN_BITS[2][token]),
        _ => {
            let code = if total_coeff == 0 {
                3
            } else {
                ((total_coeff as u32 - 1) << 2) | trailing_ones as u32
            };
            bw.write_bits(code, 6);
        }
    }
    if total_coeff == 0 {
        return;
    }

    for level in levels.iter().take(trailing_ones) {
        bw.write_bit(u32::from(*level < 0));
    }

    let mut suffix_length = u32::from(total_coeff > 10 && trailing_ones < 3);
    for (i, &level) in levels.iter().enumerate().skip(trailing_ones) {
        let mut level_code = if level > 0 { 2 * level - 2 } else { -2 * level - 1 } as u32;
        if i == trailing_ones && trailing_ones < 3 {
            level_code -= 2;
        }
        let (prefix, suffix, suffix_bits) = if suffix_length == 0 {
            if level_code < 14 {
                (level_code, 0, 0)
            } else if level_code < 30 {
                (14, level_code - 14, 4)
            } else {
                (15, level_code - 30, 12)
            }
        } else if level_code < (15 << suffix_length) {
            (
                level_code >> suffix_length,
                level_code & ((1 << suffix_length) - 1),
                suffix_length,
            )
        } else {
            (15, level_code - (15 << suffix_length), 12)
        };
        for _ in 0..prefix {
            bw.write_bit(0);
        }
        bw.write_bit(1);
        if suffix_bits > 0 {
            bw.write_bits(suffix, suffix_bits);
        }

        if suffix_length == 0 {
            suffix_length = 1;
        }
        if level.unsigned_abs() > (3 << (suffix_length - 1)) && suffix_length < 6 {
            suffix_length += 1;
        }
    }

    let last = *positions.last().unwrap_or(&0);
    let total_zeros = last + 1 - total_coeff;
    if total_coeff < max_coeff {
        let (lens, bits) = if max_coeff == 4 {
            (
                CHROMA_DC_TOTAL_ZEROS_LEN[total_coeff - 1],
                CHROMA_DC_TOTAL_ZEROS_BITS[total_coeff - 1],
            )
        } else {
            (TOTAL_ZEROS_LEN[total_coeff - 1], TOTAL_ZEROS_BITS[total_coeff - 1])
        };
        write_code(bw, lens[total_zeros], bits[total_zeros]);
    }

    let mut zeros_left = total_zeros;
    let scan_desc: Vec<usize> = positions.iter().rev().copied().collect();
    for i in 0..total_coeff - 1 {
        if zeros_left == 0 {
            break;
        }
        let run = scan_desc[i] - scan_desc[i + 1] - 1;
        let table = zeros_left.min(7) - 1;
        write_code(bw, RUN_BEFORE_LEN[table][run], RUN_BEFORE_BITS[table][run]);
        zeros_left -= run;
    }
}

// ============================================================
// 宿主与驱动
// ============================================================

/// 拒绝分配帧池的宿主
pub struct RefusingHost;

impl DecoderHost for RefusingHost {
    fn allocate_frame_pool(&mut self, _mbs_per_frame: usize, _frame_count: usize) -> bool {
        false
    }
}

/// 第 N 次起 `allocate` 失败的宿主
pub struct FailingAllocHost {
    pub remaining: usize,
}

impl DecoderHost for FailingAllocHost {
    fn allocate(&mut self, size: usize) -> Option<Vec<u8>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(Vec::with_capacity(size))
    }
}

/// 记录绑定事件的宿主
#[derive(Default, Clone)]
pub struct RecordingHost {
    pub binds: Arc<Mutex<Vec<(usize, u32)>>>,
    pub unbinds: Arc<Mutex<Vec<usize>>>,
    pub logs: Arc<Mutex<Vec<String>>>,
}

impl DecoderHost for RecordingHost {
    fn bind_frame(&mut self, frame_index: usize, pic_id: u32) {
        self.binds.lock().unwrap().push((frame_index, pic_id));
    }

    fn unbind_frame(&mut self, frame_index: usize) {
        self.unbinds.lock().unwrap().push(frame_index);
    }

    fn log(&mut self, _level: log::Level, message: &str) {
        self.logs.lock().unwrap().push(message.to_string());
    }
}

/// 一幅输出图像的摘要
#[derive(Debug, Clone)]
pub struct Output {
    pub poc: i32,
    pub pic_id: u32,
    pub width: u32,
    pub height: u32,
    pub is_idr: bool,
    pub num_err_mbs: u32,
    pub luma: Vec<u8>,
    pub cb: Vec<u8>,
}

pub fn drain(dec: &mut H264Decoder, flush: bool, outputs: &mut Vec<Output>) {
    while let Some(pic) = dec.next_output(flush) {
        outputs.push(Output {
            poc: pic.poc,
            pic_id: pic.pic_id,
            width: pic.width,
            height: pic.height,
            is_idr: pic.is_idr,
            num_err_mbs: pic.num_err_mbs,
            luma: pic.luma.to_vec(),
            cb: pic.cb.to_vec(),
        });
    }
}

/// 提交一个 NAL, `consumed == false` 时取走输出后重新提交; 返回全部状态
pub fn submit(dec: &mut H264Decoder, nal: &[u8], pic_id: u32, outputs: &mut Vec<Output>) -> Vec<DecodeStatus> {
    let mut statuses = Vec::new();
    for _ in 0..4 {
        let status = dec.decode_nal(nal, pic_id);
        statuses.push(status);
        drain(dec, false, outputs);
        if status != (DecodeStatus::PictureReady { consumed: false }) {
            break;
        }
    }
    statuses
}

/// 依次提交 NAL (pic_id 为下标), 结束时 flush 并取走全部输出
pub fn decode_stream(dec: &mut H264Decoder, nals: &[Vec<u8>]) -> (Vec<DecodeStatus>, Vec<Output>) {
    let mut statuses = Vec::new();
    let mut outputs = Vec::new();
    for (idx, nal) in nals.iter().enumerate() {
        statuses.extend(submit(dec, nal, idx as u32, &mut outputs));
    }
    statuses.push(dec.flush());
    drain(dec, true, &mut outputs);
    (statuses, outputs)
}

pub fn picture_ready_count(statuses: &[DecodeStatus]) -> usize {
    statuses
        .iter()
        .filter(|s| matches!(s, DecodeStatus::PictureReady { .. }))
        .count()
}

pub fn new_decoder() -> H264Decoder {
    H264Decoder::new(DecoderConfig::default())
}

/// 期望的亮度平面
pub fn expected_luma(width: usize, height: usize, pattern: fn(usize, usize, usize) -> u8) -> Vec<u8> {
    let mut plane = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            plane.push(pattern(x, y, 0));
        }
    }
    plane
}
