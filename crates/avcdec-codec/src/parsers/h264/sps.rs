//! H.264 SPS (Sequence Parameter Set) 解析器.
//!
//! SPS 包含编码视频序列的全局参数, 包括:
//! - Profile / Level (编码规格, 级别须在级别表中)
//! - 图像宽度和高度 (以宏块为单位, 需要 cropping 调整)
//! - 图像顺序计数 (POC) 模式及其参数
//! - 参考帧数量与 DPB 容量
//! - VUI (含 HRD 参数, 仅解析结构, 保留宽高比/帧率/重排序深度)
//!
//! 本模块只做语法解析与取值范围校验, 特性支持检查由解码器在激活时完成.

use avcdec_core::bitreader::BitReader;
use avcdec_core::{AvcError, AvcResult, Rational};

use super::exp_golomb::{read_se, read_ue};

/// HRD (Hypothetical Reference Decoder) 参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HrdParameters {
    /// cpb_cnt_minus1 + 1
    pub cpb_cnt: u32,
    /// bit_rate_scale
    pub bit_rate_scale: u32,
    /// cpb_size_scale
    pub cpb_size_scale: u32,
    /// 每个 CPB 的 (bit_rate_value_minus1, cpb_size_value_minus1, cbr_flag)
    pub cpb_specs: Vec<(u32, u32, bool)>,
    /// initial_cpb_removal_delay_length_minus1 + 1
    pub initial_cpb_removal_delay_length: u32,
    /// cpb_removal_delay_length_minus1 + 1
    pub cpb_removal_delay_length: u32,
    /// dpb_output_delay_length_minus1 + 1
    pub dpb_output_delay_length: u32,
    /// time_offset_length
    pub time_offset_length: u32,
}

/// VUI (Video Usability Information) 参数
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vui {
    /// SAR (Sample Aspect Ratio, 像素宽高比)
    pub sar: Rational,
    /// video_full_range_flag
    pub full_range: bool,
    /// (colour_primaries, transfer_characteristics, matrix_coefficients)
    pub colour_description: Option<(u8, u8, u8)>,
    /// 帧率 (time_scale / (2 * num_units_in_tick))
    pub fps: Option<Rational>,
    /// fixed_frame_rate_flag
    pub fixed_frame_rate: bool,
    /// NAL HRD 参数
    pub nal_hrd: Option<HrdParameters>,
    /// VCL HRD 参数
    pub vcl_hrd: Option<HrdParameters>,
    /// pic_struct_present_flag
    pub pic_struct_present: bool,
    /// bitstream_restriction 中的 max_num_reorder_frames
    pub max_num_reorder_frames: Option<u32>,
    /// bitstream_restriction 中的 max_dec_frame_buffering
    pub max_dec_frame_buffering: Option<u32>,
}

impl Vui {
    /// SEI 时序消息使用的 HRD 参数 (NAL 优先)
    pub fn hrd(&self) -> Option<&HrdParameters> {
        self.nal_hrd.as_ref().or(self.vcl_hrd.as_ref())
    }
}

/// SPS 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    /// profile_idc (编码规格, 如 66=Baseline, 77=Main, 100=High)
    pub profile_idc: u8,
    /// constraint_set 标志位
    pub constraint_set_flags: u8,
    /// level_idc (编码级别, 如 30=3.0, 41=4.1)
    pub level_idc: u8,
    /// SPS ID (seq_parameter_set_id)
    pub sps_id: u32,
    /// 色度格式 (0=单色, 1=4:2:0, 2=4:2:2, 3=4:4:4)
    pub chroma_format_idc: u32,
    /// separate_colour_plane_flag
    pub separate_colour_plane: bool,
    /// 亮度位深
    pub bit_depth_luma: u32,
    /// 色度位深
    pub bit_depth_chroma: u32,
    /// qpprime_y_zero_transform_bypass_flag
    pub transform_bypass: bool,
    /// seq_scaling_matrix_present_flag
    pub scaling_matrix_present: bool,
    /// log2(MaxFrameNum) = log2_max_frame_num_minus4 + 4
    pub log2_max_frame_num: u32,
    /// 图像顺序计数类型 (0, 1, 2)
    pub poc_type: u32,
    /// log2(MaxPicOrderCntLsb) (仅 poc_type==0)
    pub log2_max_poc_lsb: u32,
    /// `poc_type==1` 时的 delta_pic_order_always_zero_flag.
    pub delta_pic_order_always_zero_flag: bool,
    /// `poc_type==1` 时的 offset_for_non_ref_pic.
    pub offset_for_non_ref_pic: i32,
    /// `poc_type==1` 时的 offset_for_top_to_bottom_field.
    pub offset_for_top_to_bottom_field: i32,
    /// `poc_type==1` 时的 offset_for_ref_frame 列表.
    pub offset_for_ref_frame: Vec<i32>,
    /// 最大参考帧数
    pub max_num_ref_frames: u32,
    /// gaps_in_frame_num_value_allowed_flag.
    pub gaps_in_frame_num_allowed: bool,
    /// 图像宽度 (宏块)
    pub pic_width_in_mbs: u32,
    /// 图像高度 (映射单元)
    pub pic_height_in_map_units: u32,
    /// 是否为帧编码 (非场编码)
    pub frame_mbs_only: bool,
    /// mb_adaptive_frame_field_flag
    pub mb_adaptive_frame_field: bool,
    /// direct_8x8_inference_flag
    pub direct_8x8_inference: bool,
    /// cropping 偏移 (裁剪单位)
    pub crop_left: u32,
    /// cropping 偏移 (裁剪单位)
    pub crop_right: u32,
    /// cropping 偏移 (裁剪单位)
    pub crop_top: u32,
    /// cropping 偏移 (裁剪单位)
    pub crop_bottom: u32,
    /// 图像宽度 (像素, 已应用 cropping)
    pub width: u32,
    /// 图像高度 (像素, 已应用 cropping)
    pub height: u32,
    /// VUI 参数
    pub vui: Option<Vui>,
}

impl Sps {
    /// MaxFrameNum
    pub fn max_frame_num(&self) -> u32 {
        1 << self.log2_max_frame_num
    }

    /// MaxPicOrderCntLsb
    pub fn max_poc_lsb(&self) -> u32 {
        1 << self.log2_max_poc_lsb
    }

    /// FrameHeightInMbs
    pub fn frame_height_in_mbs(&self) -> u32 {
        self.pic_height_in_map_units * if self.frame_mbs_only { 1 } else { 2 }
    }

    /// PicSizeInMapUnits
    pub fn pic_size_in_map_units(&self) -> u32 {
        self.pic_width_in_mbs * self.pic_height_in_map_units
    }

    /// PicSizeInMbs (帧图像)
    pub fn pic_size_in_mbs(&self) -> u32 {
        self.pic_width_in_mbs * self.frame_height_in_mbs()
    }

    /// 编码宽度 (像素, 未裁剪)
    pub fn coded_width(&self) -> u32 {
        self.pic_width_in_mbs * 16
    }

    /// 编码高度 (像素, 未裁剪)
    pub fn coded_height(&self) -> u32 {
        self.frame_height_in_mbs() * 16
    }

    /// 裁剪矩形 (像素): (left, right, top, bottom)
    pub fn crop_rect(&self) -> (u32, u32, u32, u32) {
        let (ux, uy) = cropping_unit(self.chroma_format_idc, self.frame_mbs_only);
        (
            self.crop_left * ux,
            self.crop_right * ux,
            self.crop_top * uy,
            self.crop_bottom * uy,
        )
    }

    /// DPB 容量 (帧数)
    ///
    /// `MaxDpbMbs / PicSizeInMbs` 截断到 16, VUI 的 max_dec_frame_buffering
    /// 优先, 且不小于 max_num_ref_frames.
    pub fn dpb_size(&self) -> u32 {
        let pic_size = self.pic_size_in_mbs().max(1);
        let level_mbs = max_dpb_mbs(self.level_idc, self.constraint_set_flags).unwrap_or(0);
        let mut size = (level_mbs / pic_size).min(16);
        if let Some(buffering) = self.vui.as_ref().and_then(|v| v.max_dec_frame_buffering) {
            size = buffering.min(16);
        }
        size.max(self.max_num_ref_frames).max(1)
    }
}

/// 级别表: level_idc → MaxDpbMbs (ITU-T H.264 表 A-1)
///
/// 未收录的级别返回 None. level_idc=11 且 constraint_set3 置位时为级别 1b.
pub fn max_dpb_mbs(level_idc: u8, constraint_set_flags: u8) -> Option<u32> {
    let constraint_set3 = constraint_set_flags & 0x10 != 0;
    let mbs = match level_idc {
        9 | 10 => 396,
        11 if constraint_set3 => 396,
        11 => 900,
        12 | 13 | 20 => 2376,
        21 => 4752,
        22 | 30 => 8100,
        31 => 18000,
        32 => 20480,
        40 | 41 => 32768,
        42 => 34816,
        50 => 110400,
        51 | 52 => 184320,
        _ => return None,
    };
    Some(mbs)
}

/// 预定义的 SAR 表 (ITU-T H.264 表 E-1)
const SAR_TABLE: [(u32, u32); 17] = [
    (0, 1),    // 0: 未指定
    (1, 1),    // 1: 1:1
    (12, 11),  // 2: 12:11
    (10, 11),  // 3: 10:11
    (16, 11),  // 4: 16:11
    (40, 33),  // 5: 40:33
    (24, 11),  // 6: 24:11
    (20, 11),  // 7: 20:11
    (32, 11),  // 8: 32:11
    (80, 33),  // 9: 80:33
    (18, 11),  // 10: 18:11
    (15, 11),  // 11: 15:11
    (64, 33),  // 12: 64:33
    (160, 99), // 13: 160:99
    (4, 3),    // 14: 4:3
    (3, 2),    // 15: 3:2
    (2, 1),    // 16: 2:1
];

/// 从 RBSP 数据 (不含 NAL 头部) 解析 SPS
pub fn parse_sps(rbsp: &[u8]) -> AvcResult<Sps> {
    if rbsp.len() < 3 {
        return Err(AvcError::InvalidData("H264: SPS RBSP 太短".into()));
    }

    let mut br = BitReader::new(rbsp);

    let profile_idc = br.read_bits(8)? as u8;
    let constraint_set_flags = br.read_bits(8)? as u8;
    let level_idc = br.read_bits(8)? as u8;
    if max_dpb_mbs(level_idc, constraint_set_flags).is_none() {
        return Err(AvcError::InvalidData(format!(
            "H264: level_idc 不在级别表中, level_idc={}",
            level_idc
        )));
    }
    let sps_id = read_ue(&mut br)?;
    if sps_id > 31 {
        return Err(AvcError::InvalidData(format!(
            "H264: sps_id 超出范围, sps_id={}",
            sps_id
        )));
    }

    let mut chroma_format_idc = 1; // 默认 4:2:0
    let mut separate_colour_plane = false;
    let mut bit_depth_luma = 8;
    let mut bit_depth_chroma = 8;
    let mut transform_bypass = false;
    let mut scaling_matrix_present = false;

    // High profile 及以上有额外字段
    if is_high_profile(profile_idc) {
        chroma_format_idc = read_ue(&mut br)?;
        if chroma_format_idc > 3 {
            return Err(AvcError::InvalidData(format!(
                "H264: chroma_format_idc 非法, value={}",
                chroma_format_idc
            )));
        }
        if chroma_format_idc == 3 {
            separate_colour_plane = br.read_flag()?;
        }
        bit_depth_luma = read_ue(&mut br)? + 8;
        bit_depth_chroma = read_ue(&mut br)? + 8;
        if !(8..=14).contains(&bit_depth_luma) || !(8..=14).contains(&bit_depth_chroma) {
            return Err(AvcError::InvalidData(format!(
                "H264: 位深非法, luma={}, chroma={}",
                bit_depth_luma, bit_depth_chroma
            )));
        }
        transform_bypass = br.read_flag()?;
        scaling_matrix_present = br.read_flag()?;
        if scaling_matrix_present {
            let count = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..count {
                if br.read_flag()? {
                    skip_scaling_list(&mut br, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    let log2_max_frame_num_minus4 = read_ue(&mut br)?;
    if log2_max_frame_num_minus4 > 12 {
        return Err(AvcError::InvalidData(format!(
            "H264: log2_max_frame_num_minus4 超出范围, value={}",
            log2_max_frame_num_minus4
        )));
    }

    let poc_type = read_ue(&mut br)?;
    if poc_type > 2 {
        return Err(AvcError::InvalidData(format!(
            "H264: pic_order_cnt_type 非法, value={}",
            poc_type
        )));
    }
    let mut log2_max_poc_lsb = 0u32;
    let mut delta_pic_order_always_zero_flag = false;
    let mut offset_for_non_ref_pic = 0i32;
    let mut offset_for_top_to_bottom_field = 0i32;
    let mut offset_for_ref_frame = Vec::new();
    match poc_type {
        0 => {
            let log2_max_poc_lsb_minus4 = read_ue(&mut br)?;
            if log2_max_poc_lsb_minus4 > 12 {
                return Err(AvcError::InvalidData(format!(
                    "H264: log2_max_pic_order_cnt_lsb_minus4 超出范围, value={}",
                    log2_max_poc_lsb_minus4
                )));
            }
            log2_max_poc_lsb = log2_max_poc_lsb_minus4 + 4;
        }
        1 => {
            delta_pic_order_always_zero_flag = br.read_flag()?;
            offset_for_non_ref_pic = read_se(&mut br)?;
            offset_for_top_to_bottom_field = read_se(&mut br)?;
            let num_ref_in_poc = read_ue(&mut br)?;
            if num_ref_in_poc > 255 {
                return Err(AvcError::InvalidData(format!(
                    "H264: num_ref_frames_in_pic_order_cnt_cycle 超出范围, value={}",
                    num_ref_in_poc
                )));
            }
            for _ in 0..num_ref_in_poc {
                offset_for_ref_frame.push(read_se(&mut br)?);
            }
        }
        _ => {} // poc_type == 2: 无额外字段
    }

    let max_num_ref_frames = read_ue(&mut br)?;
    if max_num_ref_frames > 16 {
        return Err(AvcError::InvalidData(format!(
            "H264: max_num_ref_frames 超出范围, value={}",
            max_num_ref_frames
        )));
    }
    let gaps_in_frame_num_allowed = br.read_flag()?;

    let pic_width_in_mbs = read_ue(&mut br)?.saturating_add(1);
    let pic_height_in_map_units = read_ue(&mut br)?.saturating_add(1);
    // 上限取级别 5.1 的最大帧尺寸
    if pic_width_in_mbs > 1024 || pic_height_in_map_units > 1024 {
        return Err(AvcError::InvalidData(format!(
            "H264: 图像尺寸超出范围, mbs={}x{}",
            pic_width_in_mbs, pic_height_in_map_units
        )));
    }

    let frame_mbs_only = br.read_flag()?;
    let mb_adaptive_frame_field = if frame_mbs_only {
        false
    } else {
        br.read_flag()?
    };
    let direct_8x8_inference = br.read_flag()?;

    let mut crop_left = 0u32;
    let mut crop_right = 0u32;
    let mut crop_top = 0u32;
    let mut crop_bottom = 0u32;
    if br.read_flag()? {
        crop_left = read_ue(&mut br)?;
        crop_right = read_ue(&mut br)?;
        crop_top = read_ue(&mut br)?;
        crop_bottom = read_ue(&mut br)?;
    }

    let chroma_array_type = if separate_colour_plane {
        0
    } else {
        chroma_format_idc
    };
    let (crop_unit_x, crop_unit_y) = cropping_unit(chroma_array_type, frame_mbs_only);
    let raw_width = pic_width_in_mbs * 16;
    let raw_height = pic_height_in_map_units * if frame_mbs_only { 16 } else { 32 };
    let crop_x = crop_left
        .checked_add(crop_right)
        .and_then(|v| v.checked_mul(crop_unit_x))
        .ok_or_else(|| AvcError::InvalidData("H264: 计算水平裁剪时发生溢出".into()))?;
    let crop_y = crop_top
        .checked_add(crop_bottom)
        .and_then(|v| v.checked_mul(crop_unit_y))
        .ok_or_else(|| AvcError::InvalidData("H264: 计算垂直裁剪时发生溢出".into()))?;
    if crop_x >= raw_width || crop_y >= raw_height {
        return Err(AvcError::InvalidData(format!(
            "H264: 裁剪参数非法, raw={}x{}, crop_x={}, crop_y={}",
            raw_width, raw_height, crop_x, crop_y
        )));
    }

    let vui = if br.read_flag()? {
        Some(parse_vui(&mut br)?)
    } else {
        None
    };

    Ok(Sps {
        profile_idc,
        constraint_set_flags,
        level_idc,
        sps_id,
        chroma_format_idc,
        separate_colour_plane,
        bit_depth_luma,
        bit_depth_chroma,
        transform_bypass,
        scaling_matrix_present,
        log2_max_frame_num: log2_max_frame_num_minus4 + 4,
        poc_type,
        log2_max_poc_lsb,
        delta_pic_order_always_zero_flag,
        offset_for_non_ref_pic,
        offset_for_top_to_bottom_field,
        offset_for_ref_frame,
        max_num_ref_frames,
        gaps_in_frame_num_allowed,
        pic_width_in_mbs,
        pic_height_in_map_units,
        frame_mbs_only,
        mb_adaptive_frame_field,
        direct_8x8_inference,
        crop_left,
        crop_right,
        crop_top,
        crop_bottom,
        width: raw_width - crop_x,
        height: raw_height - crop_y,
        vui,
    })
}

// ============================================================
// 辅助函数
// ============================================================

/// 是否为 High Profile 或更高 (SPS 中携带色度格式与位深字段)
fn is_high_profile(profile_idc: u8) -> bool {
    matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    )
}

/// 获取 cropping 单位
fn cropping_unit(chroma_array_type: u32, frame_mbs_only: bool) -> (u32, u32) {
    let (sub_width, sub_height) = match chroma_array_type {
        1 => (2, 2),
        2 => (2, 1),
        _ => (1, 1),
    };
    let field_factor = if frame_mbs_only { 1 } else { 2 };
    if chroma_array_type == 0 {
        (1, field_factor)
    } else {
        (sub_width, sub_height * field_factor)
    }
}

/// 跳过一个量化矩阵 (只需维持比特位置)
fn skip_scaling_list(br: &mut BitReader, size: usize) -> AvcResult<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = read_se(br)?;
            if !(-128..=127).contains(&delta) {
                return Err(AvcError::InvalidData(format!(
                    "H264: delta_scale 超出范围, value={}",
                    delta
                )));
            }
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// 解析 VUI 参数
fn parse_vui(br: &mut BitReader) -> AvcResult<Vui> {
    let mut vui = Vui {
        sar: Rational::new(1, 1),
        ..Vui::default()
    };

    // aspect_ratio_info_present_flag
    if br.read_flag()? {
        let ar_idc = br.read_bits(8)? as usize;
        if ar_idc == 255 {
            // Extended_SAR
            let sar_w = br.read_bits(16)?;
            let sar_h = br.read_bits(16)?;
            if sar_w > 0 && sar_h > 0 {
                vui.sar = Rational::new(sar_w as i32, sar_h as i32);
            }
        } else if let Some(&(w, h)) = SAR_TABLE.get(ar_idc) {
            if w > 0 {
                vui.sar = Rational::new(w as i32, h as i32);
            }
        }
    }

    // overscan_info_present_flag
    if br.read_flag()? {
        br.skip_bits(1)?; // overscan_appropriate_flag
    }

    // video_signal_type_present_flag
    if br.read_flag()? {
        br.skip_bits(3)?; // video_format
        vui.full_range = br.read_flag()?;
        if br.read_flag()? {
            let primaries = br.read_bits(8)? as u8;
            let transfer = br.read_bits(8)? as u8;
            let matrix = br.read_bits(8)? as u8;
            vui.colour_description = Some((primaries, transfer, matrix));
        }
    }

    // chroma_loc_info_present_flag
    if br.read_flag()? {
        read_ue(br)?;
        read_ue(br)?;
    }

    // timing_info_present_flag
    if br.read_flag()? {
        let num_units = br.read_bits(32)?;
        let time_scale = br.read_bits(32)?;
        vui.fixed_frame_rate = br.read_flag()?;
        if num_units > 0 && time_scale > 0 {
            let den = u64::from(num_units) * 2;
            if time_scale <= i32::MAX as u32 && den <= i32::MAX as u64 {
                vui.fps = Some(Rational::new(time_scale as i32, den as i32));
            }
        }
    }

    if br.read_flag()? {
        vui.nal_hrd = Some(parse_hrd(br)?);
    }
    if br.read_flag()? {
        vui.vcl_hrd = Some(parse_hrd(br)?);
    }
    if vui.nal_hrd.is_some() || vui.vcl_hrd.is_some() {
        br.skip_bits(1)?; // low_delay_hrd_flag
    }
    vui.pic_struct_present = br.read_flag()?;

    // bitstream_restriction_flag
    if br.read_flag()? {
        br.skip_bits(1)?; // motion_vectors_over_pic_boundaries_flag
        read_ue(br)?; // max_bytes_per_pic_denom
        read_ue(br)?; // max_bits_per_mb_denom
        read_ue(br)?; // log2_max_mv_length_horizontal
        read_ue(br)?; // log2_max_mv_length_vertical
        let reorder = read_ue(br)?;
        let buffering = read_ue(br)?;
        if reorder > 16 || buffering > 16 {
            return Err(AvcError::InvalidData(format!(
                "H264: VUI 重排序参数超出范围, reorder={}, buffering={}",
                reorder, buffering
            )));
        }
        vui.max_num_reorder_frames = Some(reorder);
        vui.max_dec_frame_buffering = Some(buffering);
    }

    Ok(vui)
}

/// 解析 HRD 参数
fn parse_hrd(br: &mut BitReader) -> AvcResult<HrdParameters> {
    let cpb_cnt = read_ue(br)? + 1;
    if cpb_cnt > 32 {
        return Err(AvcError::InvalidData(format!(
            "H264: cpb_cnt_minus1 超出范围, value={}",
            cpb_cnt - 1
        )));
    }
    let bit_rate_scale = br.read_bits(4)?;
    let cpb_size_scale = br.read_bits(4)?;
    let mut cpb_specs = Vec::with_capacity(cpb_cnt as usize);
    for _ in 0..cpb_cnt {
        let bit_rate = read_ue(br)?;
        let cpb_size = read_ue(br)?;
        let cbr = br.read_flag()?;
        cpb_specs.push((bit_rate, cpb_size, cbr));
    }
    Ok(HrdParameters {
        cpb_cnt,
        bit_rate_scale,
        cpb_size_scale,
        cpb_specs,
        initial_cpb_removal_delay_length: br.read_bits(5)? + 1,
        cpb_removal_delay_length: br.read_bits(5)? + 1,
        dpb_output_delay_length: br.read_bits(5)? + 1,
        time_offset_length: br.read_bits(5)?,
    })
}
