//! H.264 slice header 解析.
//!
//! 只接受 I/P 帧条带. B/SP/SI 条带, 场条带, 以及引用了不支持特性的参数集
//! 都在这里被拒绝, 调用方据此决定跳过或失败.

use avcdec_core::bitreader::BitReader;
use avcdec_core::{AvcError, AvcResult};

use crate::parsers::h264::{NalUnitType, read_se, read_ue};

use super::parameter_sets::ParamSetStore;
use super::syntax::SliceType;

/// ref_pic_list_modification 单条命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefPicListMod {
    /// modification_of_pic_nums_idc = 0
    ShortTermSub { abs_diff_pic_num_minus1: u32 },
    /// modification_of_pic_nums_idc = 1
    ShortTermAdd { abs_diff_pic_num_minus1: u32 },
    /// modification_of_pic_nums_idc = 2
    LongTerm { long_term_pic_num: u32 },
}

/// 自适应参考图像标记命令 (MMCO 1..=6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmcoOp {
    ForgetShort {
        difference_of_pic_nums_minus1: u32,
    },
    ForgetLong {
        long_term_pic_num: u32,
    },
    ConvertShortToLong {
        difference_of_pic_nums_minus1: u32,
        long_term_frame_idx: u32,
    },
    TrimLong {
        max_long_term_frame_idx_plus1: u32,
    },
    ClearAll,
    MarkCurrentLong {
        long_term_frame_idx: u32,
    },
}

/// dec_ref_pic_marking 语法
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecRefPicMarking {
    pub no_output_of_prior_pics: bool,
    pub long_term_reference_flag: bool,
    pub adaptive: bool,
    pub ops: Vec<MmcoOp>,
}

impl DecRefPicMarking {
    /// 是否包含 MMCO5
    pub fn has_mmco5(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, MmcoOp::ClearAll))
    }
}

/// 解析后的 slice header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    pub first_mb: u32,
    pub slice_type: SliceType,
    pub pps_id: u32,
    pub frame_num: u32,
    pub idr_pic_id: u32,
    pub pic_order_cnt_lsb: u32,
    pub delta_pic_order_cnt_bottom: i32,
    pub delta_pic_order_cnt: [i32; 2],
    pub redundant_pic_cnt: u32,
    pub num_ref_idx_l0_active: u32,
    pub ref_pic_list_mods: Vec<RefPicListMod>,
    pub dec_ref_pic_marking: DecRefPicMarking,
    pub slice_qp: i32,
    pub disable_deblocking_filter_idc: u32,
    pub slice_alpha_c0_offset_div2: i32,
    pub slice_beta_offset_div2: i32,
    pub slice_group_change_cycle: u32,
    pub nal_ref_idc: u8,
    pub is_idr: bool,
    /// slice_data() 起始比特偏移
    pub data_bit_offset: usize,
}

impl SliceHeader {
    /// 是否与另一条带属于同一图像的首个 VCL NAL 判定值相同 (7.4.1.2.4)
    pub fn same_picture_as(&self, other: &SliceHeader) -> bool {
        self.frame_num == other.frame_num
            && self.pps_id == other.pps_id
            && (self.nal_ref_idc == 0) == (other.nal_ref_idc == 0)
            && self.is_idr == other.is_idr
            && (!self.is_idr || self.idr_pic_id == other.idr_pic_id)
            && self.pic_order_cnt_lsb == other.pic_order_cnt_lsb
            && self.delta_pic_order_cnt_bottom == other.delta_pic_order_cnt_bottom
            && self.delta_pic_order_cnt == other.delta_pic_order_cnt
    }
}

/// 单图像允许的最大 MMCO 命令数
const MAX_MMCO_OPS: usize = 66;
/// 单列表允许的最大修改命令数
const MAX_REF_LIST_MODS: usize = 33;

/// 解析 slice header.
///
/// `rbsp` 为去掉 NAL 头的条带 RBSP; 返回的 header 记录了 slice_data 起始比特.
pub fn parse_slice_header(
    rbsp: &[u8],
    nal_type: NalUnitType,
    nal_ref_idc: u8,
    store: &ParamSetStore,
) -> AvcResult<SliceHeader> {
    let mut br = BitReader::new(rbsp);
    let is_idr = nal_type == NalUnitType::SliceIdr;

    let first_mb = read_ue(&mut br)?;
    let slice_type = SliceType::from_raw(read_ue(&mut br)?)?;
    if is_idr && slice_type != SliceType::I {
        return Err(AvcError::InvalidData("H264: IDR 条带必须为 I 条带".into()));
    }
    if is_idr && nal_ref_idc == 0 {
        return Err(AvcError::InvalidData("H264: IDR 条带的 nal_ref_idc 不能为 0".into()));
    }

    let pps_id = read_ue(&mut br)?;
    let (pps, sps) = store.resolve(pps_id)?;

    if first_mb >= sps.pic_size_in_mbs() {
        return Err(AvcError::InvalidData(format!(
            "H264: first_mb_in_slice 超出范围, value={}, max={}",
            first_mb,
            sps.pic_size_in_mbs()
        )));
    }

    let frame_num = br.read_bits(sps.log2_max_frame_num)?;
    if is_idr && frame_num != 0 {
        return Err(AvcError::InvalidData(format!(
            "H264: IDR 条带 frame_num 必须为 0, value={}",
            frame_num
        )));
    }

    if !sps.frame_mbs_only && br.read_flag()? {
        return Err(AvcError::Unsupported("H264: 不支持场编码条带".into()));
    }

    let mut idr_pic_id = 0;
    if is_idr {
        idr_pic_id = read_ue(&mut br)?;
        if idr_pic_id > 65535 {
            return Err(AvcError::InvalidData(format!(
                "H264: idr_pic_id 超出范围, value={}",
                idr_pic_id
            )));
        }
    }

    let mut pic_order_cnt_lsb = 0;
    let mut delta_pic_order_cnt_bottom = 0;
    let mut delta_pic_order_cnt = [0i32; 2];
    if sps.poc_type == 0 {
        pic_order_cnt_lsb = br.read_bits(sps.log2_max_poc_lsb)?;
        if pps.bottom_field_pic_order_in_frame_present {
            delta_pic_order_cnt_bottom = read_se(&mut br)?;
        }
    } else if sps.poc_type == 1 && !sps.delta_pic_order_always_zero_flag {
        delta_pic_order_cnt[0] = read_se(&mut br)?;
        if pps.bottom_field_pic_order_in_frame_present {
            delta_pic_order_cnt[1] = read_se(&mut br)?;
        }
    }

    let mut redundant_pic_cnt = 0;
    if pps.redundant_pic_cnt_present {
        redundant_pic_cnt = read_ue(&mut br)?;
        if redundant_pic_cnt > 127 {
            return Err(AvcError::InvalidData(format!(
                "H264: redundant_pic_cnt 超出范围, value={}",
                redundant_pic_cnt
            )));
        }
    }

    let mut num_ref_idx_l0_active = pps.num_ref_idx_l0_default_active;
    let mut ref_pic_list_mods = Vec::new();
    if slice_type == SliceType::P {
        if br.read_flag()? {
            num_ref_idx_l0_active = read_ue(&mut br)?.saturating_add(1);
        }
        if num_ref_idx_l0_active > 32 {
            return Err(AvcError::InvalidData(format!(
                "H264: num_ref_idx_l0_active_minus1 非法, value={}",
                num_ref_idx_l0_active - 1
            )));
        }
        if br.read_flag()? {
            ref_pic_list_mods = parse_ref_pic_list_mods(&mut br, sps.max_frame_num())?;
        }
    }

    let max_long_term = sps.max_num_ref_frames.max(1);
    let dec_ref_pic_marking = if nal_ref_idc != 0 {
        parse_dec_ref_pic_marking(&mut br, is_idr, sps.max_frame_num(), max_long_term)?
    } else {
        DecRefPicMarking::default()
    };

    let slice_qp_delta = read_se(&mut br)?;
    let slice_qp = pps
        .pic_init_qp
        .checked_add(slice_qp_delta)
        .filter(|qp| (0..=51).contains(qp))
        .ok_or_else(|| {
            AvcError::InvalidData(format!(
                "H264: slice_qp 超出范围, pic_init_qp={}, slice_qp_delta={}",
                pps.pic_init_qp, slice_qp_delta
            ))
        })?;

    let mut disable_deblocking_filter_idc = 0;
    let mut slice_alpha_c0_offset_div2 = 0;
    let mut slice_beta_offset_div2 = 0;
    if pps.deblocking_filter_control {
        disable_deblocking_filter_idc = read_ue(&mut br)?;
        if disable_deblocking_filter_idc > 2 {
            return Err(AvcError::InvalidData(format!(
                "H264: disable_deblocking_filter_idc 非法, value={}",
                disable_deblocking_filter_idc
            )));
        }
        if disable_deblocking_filter_idc != 1 {
            slice_alpha_c0_offset_div2 = read_se(&mut br)?;
            slice_beta_offset_div2 = read_se(&mut br)?;
            if !(-6..=6).contains(&slice_alpha_c0_offset_div2) {
                return Err(AvcError::InvalidData(format!(
                    "H264: slice_alpha_c0_offset_div2 超出范围, value={}",
                    slice_alpha_c0_offset_div2
                )));
            }
            if !(-6..=6).contains(&slice_beta_offset_div2) {
                return Err(AvcError::InvalidData(format!(
                    "H264: slice_beta_offset_div2 超出范围, value={}",
                    slice_beta_offset_div2
                )));
            }
        }
    }

    let mut slice_group_change_cycle = 0;
    if let Some(bits) = pps.slice_group_change_cycle_bits(sps) {
        slice_group_change_cycle = br.read_bits(bits)?;
    }

    Ok(SliceHeader {
        first_mb,
        slice_type,
        pps_id,
        frame_num,
        idr_pic_id,
        pic_order_cnt_lsb,
        delta_pic_order_cnt_bottom,
        delta_pic_order_cnt,
        redundant_pic_cnt,
        num_ref_idx_l0_active,
        ref_pic_list_mods,
        dec_ref_pic_marking,
        slice_qp,
        disable_deblocking_filter_idc,
        slice_alpha_c0_offset_div2,
        slice_beta_offset_div2,
        slice_group_change_cycle,
        nal_ref_idc,
        is_idr,
        data_bit_offset: br.bits_read(),
    })
}

/// 解析 list0 的 ref_pic_list_modification 命令序列
fn parse_ref_pic_list_mods(br: &mut BitReader, max_pic_num: u32) -> AvcResult<Vec<RefPicListMod>> {
    let mut mods = Vec::new();
    loop {
        let op = read_ue(br)?;
        let cmd = match op {
            0 | 1 => {
                let abs_diff_pic_num_minus1 = read_ue(br)?;
                if abs_diff_pic_num_minus1 >= max_pic_num {
                    return Err(AvcError::InvalidData(format!(
                        "H264: abs_diff_pic_num_minus1 超范围, value={}, max={}",
                        abs_diff_pic_num_minus1,
                        max_pic_num - 1
                    )));
                }
                if op == 0 {
                    RefPicListMod::ShortTermSub {
                        abs_diff_pic_num_minus1,
                    }
                } else {
                    RefPicListMod::ShortTermAdd {
                        abs_diff_pic_num_minus1,
                    }
                }
            }
            2 => RefPicListMod::LongTerm {
                long_term_pic_num: read_ue(br)?,
            },
            3 => break,
            _ => {
                return Err(AvcError::InvalidData(format!(
                    "H264: modification_of_pic_nums_idc 非法, value={}",
                    op
                )));
            }
        };
        if mods.len() >= MAX_REF_LIST_MODS {
            return Err(AvcError::InvalidData(
                "H264: ref_pic_list_modification 项数过多".into(),
            ));
        }
        mods.push(cmd);
    }
    Ok(mods)
}

/// 解析 dec_ref_pic_marking 语法 (调用方保证 nal_ref_idc != 0)
fn parse_dec_ref_pic_marking(
    br: &mut BitReader,
    is_idr: bool,
    max_pic_num: u32,
    max_long_term: u32,
) -> AvcResult<DecRefPicMarking> {
    let mut marking = DecRefPicMarking::default();
    if is_idr {
        marking.no_output_of_prior_pics = br.read_flag()?;
        marking.long_term_reference_flag = br.read_flag()?;
        return Ok(marking);
    }

    marking.adaptive = br.read_flag()?;
    if !marking.adaptive {
        return Ok(marking);
    }

    let check_long_term_idx = |idx: u32, what: &str| -> AvcResult<u32> {
        if idx >= max_long_term {
            return Err(AvcError::InvalidData(format!(
                "H264: {} 超范围, value={}, max={}",
                what,
                idx,
                max_long_term - 1
            )));
        }
        Ok(idx)
    };
    let check_difference = |diff: u32| -> AvcResult<u32> {
        if diff >= max_pic_num {
            return Err(AvcError::InvalidData(format!(
                "H264: difference_of_pic_nums_minus1 超范围, value={}",
                diff
            )));
        }
        Ok(diff)
    };

    loop {
        let op = read_ue(br)?;
        let cmd = match op {
            0 => break,
            1 => MmcoOp::ForgetShort {
                difference_of_pic_nums_minus1: check_difference(read_ue(br)?)?,
            },
            2 => MmcoOp::ForgetLong {
                long_term_pic_num: check_long_term_idx(read_ue(br)?, "MMCO2 long_term_pic_num")?,
            },
            3 => {
                let difference_of_pic_nums_minus1 = check_difference(read_ue(br)?)?;
                let long_term_frame_idx =
                    check_long_term_idx(read_ue(br)?, "MMCO3 long_term_frame_idx")?;
                MmcoOp::ConvertShortToLong {
                    difference_of_pic_nums_minus1,
                    long_term_frame_idx,
                }
            }
            4 => {
                let max_long_term_frame_idx_plus1 = read_ue(br)?;
                if max_long_term_frame_idx_plus1 > max_long_term {
                    return Err(AvcError::InvalidData(format!(
                        "H264: MMCO4 max_long_term_frame_idx_plus1 超范围, value={}, max={}",
                        max_long_term_frame_idx_plus1, max_long_term
                    )));
                }
                MmcoOp::TrimLong {
                    max_long_term_frame_idx_plus1,
                }
            }
            5 => MmcoOp::ClearAll,
            6 => MmcoOp::MarkCurrentLong {
                long_term_frame_idx: check_long_term_idx(read_ue(br)?, "MMCO6 long_term_frame_idx")?,
            },
            _ => {
                return Err(AvcError::InvalidData(format!(
                    "H264: MMCO op 非法, op={}",
                    op
                )));
            }
        };
        if marking.ops.len() >= MAX_MMCO_OPS {
            return Err(AvcError::InvalidData(format!(
                "H264: MMCO 操作数量过多, max={}",
                MAX_MMCO_OPS
            )));
        }
        marking.ops.push(cmd);
    }
    Ok(marking)
}
