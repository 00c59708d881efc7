//! H.264 参数集: PPS 语法解析, 合法性校验与 SPS/PPS 存储表.
//!
//! 参数集按 id 存放在固定容量的表中 (SPS 32 项, PPS 256 项).
//! 解析失败或包含不支持特性的参数集不会替换表中已有条目.

use avcdec_core::bitreader::BitReader;
use avcdec_core::{AvcError, AvcResult};

use crate::parsers::h264::{Sps, read_se, read_ue};

/// SPS 表容量
pub const MAX_SPS_COUNT: usize = 32;
/// PPS 表容量
pub const MAX_PPS_COUNT: usize = 256;

// ============================================================
// PPS 参数
// ============================================================

/// 条带组映射参数 (slice_group_map_type 0..=6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceGroupMap {
    /// 类型 0: 交织, 每组的游程长度
    Interleaved { run_lengths: Vec<u32> },
    /// 类型 1: 分散
    Dispersed,
    /// 类型 2: 前景矩形加剩余背景
    Foreground {
        top_left: Vec<u32>,
        bottom_right: Vec<u32>,
    },
    /// 类型 3..=5: 盒式外扩, 光栅扫描, 擦除; 由 slice_group_change_cycle 驱动
    Evolving {
        map_type: u32,
        change_direction: bool,
        change_rate: u32,
    },
    /// 类型 6: 显式映射
    Explicit { ids: Vec<u32> },
}

/// PPS 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pps {
    pub pps_id: u32,
    pub sps_id: u32,
    pub entropy_coding_mode: bool,
    pub bottom_field_pic_order_in_frame_present: bool,
    /// 条带组数量 (1..=8)
    pub num_slice_groups: u32,
    /// 条带组映射, 单组时为 None
    pub slice_group_map: Option<SliceGroupMap>,
    pub num_ref_idx_l0_default_active: u32,
    pub num_ref_idx_l1_default_active: u32,
    pub weighted_pred: bool,
    pub weighted_bipred_idc: u32,
    pub pic_init_qp: i32,
    pub pic_init_qs: i32,
    pub chroma_qp_index_offset: i32,
    pub deblocking_filter_control: bool,
    pub constrained_intra_pred: bool,
    pub redundant_pic_cnt_present: bool,
    pub transform_8x8_mode: bool,
    pub pic_scaling_matrix_present: bool,
    pub second_chroma_qp_index_offset: i32,
}

impl Pps {
    /// slice_group_change_cycle 的比特宽度, 无该语法元素时为 None
    pub fn slice_group_change_cycle_bits(&self, sps: &Sps) -> Option<u32> {
        let Some(SliceGroupMap::Evolving { change_rate, .. }) = &self.slice_group_map else {
            return None;
        };
        let rate = (*change_rate).max(1);
        let units = sps.pic_size_in_map_units();
        // Ceil(Log2(PicSizeInMapUnits ÷ SliceGroupChangeRate + 1))
        let ratio = units.div_ceil(rate) + 1;
        Some(u32::BITS - (ratio - 1).leading_zeros())
    }
}

/// 解析 PPS 参数, 依赖其引用的 SPS 已存在于存储表中.
pub fn parse_pps(rbsp: &[u8], store: &ParamSetStore) -> AvcResult<Pps> {
    if rbsp.is_empty() {
        return Err(AvcError::InvalidData("H264: PPS RBSP 为空".into()));
    }

    let mut br = BitReader::new(rbsp);
    let pps_id = read_ue(&mut br)?;
    if pps_id as usize >= MAX_PPS_COUNT {
        return Err(AvcError::InvalidData(format!(
            "H264: pps_id 超出范围, pps_id={}",
            pps_id
        )));
    }

    let sps_id = read_ue(&mut br)?;
    if sps_id as usize >= MAX_SPS_COUNT {
        return Err(AvcError::InvalidData(format!(
            "H264: sps_id 超出范围, sps_id={}",
            sps_id
        )));
    }
    let sps = store.sps(sps_id).ok_or_else(|| {
        AvcError::InvalidData(format!(
            "H264: PPS 引用的 SPS 不存在, pps_id={}, sps_id={}",
            pps_id, sps_id
        ))
    })?;

    let entropy_coding_mode = br.read_flag()?;
    if entropy_coding_mode {
        return Err(AvcError::Unsupported(format!(
            "H264: 不支持 CABAC 熵编码, pps_id={}",
            pps_id
        )));
    }
    let bottom_field_pic_order_in_frame_present = br.read_flag()?;

    let num_slice_groups_minus1 = read_ue(&mut br)?;
    if num_slice_groups_minus1 > 7 {
        return Err(AvcError::InvalidData(format!(
            "H264: num_slice_groups_minus1 超出范围, value={}",
            num_slice_groups_minus1
        )));
    }
    let slice_group_map = if num_slice_groups_minus1 > 0 {
        Some(parse_slice_group_map(&mut br, num_slice_groups_minus1, sps)?)
    } else {
        None
    };

    let num_ref_idx_l0_default_active_minus1 = read_ue(&mut br)?;
    if num_ref_idx_l0_default_active_minus1 > 31 {
        return Err(AvcError::InvalidData(format!(
            "H264: num_ref_idx_l0_default_active_minus1 超出范围, value={}",
            num_ref_idx_l0_default_active_minus1
        )));
    }
    let num_ref_idx_l1_default_active_minus1 = read_ue(&mut br)?;
    if num_ref_idx_l1_default_active_minus1 > 31 {
        return Err(AvcError::InvalidData(format!(
            "H264: num_ref_idx_l1_default_active_minus1 超出范围, value={}",
            num_ref_idx_l1_default_active_minus1
        )));
    }

    let weighted_pred = br.read_flag()?;
    let weighted_bipred_idc = br.read_bits(2)?;
    if weighted_bipred_idc > 2 {
        return Err(AvcError::InvalidData(format!(
            "H264: weighted_bipred_idc 非法, value={}",
            weighted_bipred_idc
        )));
    }
    if weighted_pred {
        return Err(AvcError::Unsupported(format!(
            "H264: 不支持加权预测, pps_id={}",
            pps_id
        )));
    }

    // pic_init_qp_minus26 / pic_init_qs_minus26
    let pic_init_qp = read_qp_minus26(&mut br, "pic_init_qp")?;
    let pic_init_qs = read_qp_minus26(&mut br, "pic_init_qs")?;

    let chroma_qp_index_offset = read_se(&mut br)?;
    validate_chroma_offset("chroma_qp_index_offset", chroma_qp_index_offset)?;

    let deblocking_filter_control = br.read_flag()?;
    let constrained_intra_pred = br.read_flag()?;
    let redundant_pic_cnt_present = br.read_flag()?;

    let mut transform_8x8_mode = false;
    let mut pic_scaling_matrix_present = false;
    let mut second_chroma_qp_index_offset = chroma_qp_index_offset;
    if br.more_rbsp_data() {
        transform_8x8_mode = br.read_flag()?;
        pic_scaling_matrix_present = br.read_flag()?;
        if transform_8x8_mode {
            return Err(AvcError::Unsupported(format!(
                "H264: 不支持 8x8 变换, pps_id={}",
                pps_id
            )));
        }
        if pic_scaling_matrix_present {
            return Err(AvcError::Unsupported(format!(
                "H264: 不支持 PPS 量化矩阵, pps_id={}",
                pps_id
            )));
        }
        second_chroma_qp_index_offset = read_se(&mut br)?;
        validate_chroma_offset(
            "second_chroma_qp_index_offset",
            second_chroma_qp_index_offset,
        )?;
    }

    Ok(Pps {
        pps_id,
        sps_id,
        entropy_coding_mode,
        bottom_field_pic_order_in_frame_present,
        num_slice_groups: num_slice_groups_minus1 + 1,
        slice_group_map,
        num_ref_idx_l0_default_active: num_ref_idx_l0_default_active_minus1 + 1,
        num_ref_idx_l1_default_active: num_ref_idx_l1_default_active_minus1 + 1,
        weighted_pred,
        weighted_bipred_idc,
        pic_init_qp,
        pic_init_qs,
        chroma_qp_index_offset,
        deblocking_filter_control,
        constrained_intra_pred,
        redundant_pic_cnt_present,
        transform_8x8_mode,
        pic_scaling_matrix_present,
        second_chroma_qp_index_offset,
    })
}

/// 读取 `*_minus26` 形式的 QP 并检查 0..=51
fn read_qp_minus26(br: &mut BitReader, field: &str) -> AvcResult<i32> {
    let minus26 = read_se(br)?;
    minus26
        .checked_add(26)
        .filter(|qp| (0..=51).contains(qp))
        .ok_or_else(|| {
            AvcError::InvalidData(format!(
                "H264: {} 超出范围, {}_minus26={}",
                field, field, minus26
            ))
        })
}

fn validate_chroma_offset(field: &str, value: i32) -> AvcResult<()> {
    if !(-12..=12).contains(&value) {
        return Err(AvcError::InvalidData(format!(
            "H264: {} 超出范围, value={}",
            field, value
        )));
    }
    Ok(())
}

/// 解析 PPS 的条带组映射语法.
fn parse_slice_group_map(
    br: &mut BitReader,
    num_slice_groups_minus1: u32,
    sps: &Sps,
) -> AvcResult<SliceGroupMap> {
    let map_units = sps.pic_size_in_map_units();
    let slice_group_map_type = read_ue(br)?;
    let map = match slice_group_map_type {
        0 => {
            let mut run_lengths = Vec::with_capacity(num_slice_groups_minus1 as usize + 1);
            for _ in 0..=num_slice_groups_minus1 {
                let run_length_minus1 = read_ue(br)?;
                if run_length_minus1 >= map_units {
                    return Err(AvcError::InvalidData(format!(
                        "H264: run_length_minus1 超出范围, value={}",
                        run_length_minus1
                    )));
                }
                run_lengths.push(run_length_minus1 + 1);
            }
            SliceGroupMap::Interleaved { run_lengths }
        }
        1 => SliceGroupMap::Dispersed,
        2 => {
            let mut top_left = Vec::with_capacity(num_slice_groups_minus1 as usize);
            let mut bottom_right = Vec::with_capacity(num_slice_groups_minus1 as usize);
            for _ in 0..num_slice_groups_minus1 {
                let tl = read_ue(br)?;
                let brc = read_ue(br)?;
                let width = sps.pic_width_in_mbs;
                if tl > brc || brc >= map_units || tl % width > brc % width {
                    return Err(AvcError::InvalidData(format!(
                        "H264: 前景条带组矩形非法, top_left={}, bottom_right={}",
                        tl, brc
                    )));
                }
                top_left.push(tl);
                bottom_right.push(brc);
            }
            SliceGroupMap::Foreground {
                top_left,
                bottom_right,
            }
        }
        3..=5 => {
            let change_direction = br.read_flag()?;
            let change_rate = read_ue(br)? + 1;
            if change_rate > map_units {
                return Err(AvcError::InvalidData(format!(
                    "H264: slice_group_change_rate 超出范围, value={}",
                    change_rate
                )));
            }
            SliceGroupMap::Evolving {
                map_type: slice_group_map_type,
                change_direction,
                change_rate,
            }
        }
        6 => {
            let pic_size_in_map_units = read_ue(br)?.saturating_add(1);
            if pic_size_in_map_units != map_units {
                return Err(AvcError::InvalidData(format!(
                    "H264: pic_size_in_map_units 与 SPS 不一致, pps={}, sps={}",
                    pic_size_in_map_units, map_units
                )));
            }
            let bits_per_id = bits_for_slice_group_id(num_slice_groups_minus1 + 1);
            let mut ids = Vec::with_capacity(map_units as usize);
            for _ in 0..map_units {
                let id = br.read_bits(bits_per_id)?;
                if id > num_slice_groups_minus1 {
                    return Err(AvcError::InvalidData(format!(
                        "H264: slice_group_id 超出范围, value={}",
                        id
                    )));
                }
                ids.push(id);
            }
            SliceGroupMap::Explicit { ids }
        }
        _ => {
            return Err(AvcError::InvalidData(format!(
                "H264: slice_group_map_type 非法, value={}",
                slice_group_map_type
            )));
        }
    };
    Ok(map)
}

/// slice_group_id 的比特宽度 Ceil(Log2(num_slice_groups))
fn bits_for_slice_group_id(group_count: u32) -> u32 {
    if group_count <= 1 {
        0
    } else {
        u32::BITS - (group_count - 1).leading_zeros()
    }
}

// ============================================================
// 参数集存储
// ============================================================

/// 检查 SPS 是否在基线解码能力之内
pub fn check_sps_supported(sps: &Sps) -> AvcResult<()> {
    if sps.chroma_format_idc != 1 || sps.separate_colour_plane {
        return Err(AvcError::Unsupported(format!(
            "H264: 仅支持 4:2:0 色度格式, chroma_format_idc={}",
            sps.chroma_format_idc
        )));
    }
    if sps.bit_depth_luma != 8 || sps.bit_depth_chroma != 8 {
        return Err(AvcError::Unsupported(format!(
            "H264: 仅支持 8 位深, luma={}, chroma={}",
            sps.bit_depth_luma, sps.bit_depth_chroma
        )));
    }
    if sps.transform_bypass {
        return Err(AvcError::Unsupported(
            "H264: 不支持 qpprime_y_zero_transform_bypass".into(),
        ));
    }
    if sps.scaling_matrix_present {
        return Err(AvcError::Unsupported("H264: 不支持 SPS 量化矩阵".into()));
    }
    if sps.mb_adaptive_frame_field {
        return Err(AvcError::Unsupported("H264: 不支持 MBAFF".into()));
    }
    Ok(())
}

/// SPS/PPS 固定容量存储表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSetStore {
    sps: Vec<Option<Sps>>,
    pps: Vec<Option<Pps>>,
}

impl Default for ParamSetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamSetStore {
    /// 创建空表
    pub fn new() -> Self {
        Self {
            sps: vec![None; MAX_SPS_COUNT],
            pps: vec![None; MAX_PPS_COUNT],
        }
    }

    pub fn sps(&self, sps_id: u32) -> Option<&Sps> {
        self.sps.get(sps_id as usize).and_then(Option::as_ref)
    }

    pub fn pps(&self, pps_id: u32) -> Option<&Pps> {
        self.pps.get(pps_id as usize).and_then(Option::as_ref)
    }

    /// 存入 SPS, 返回同 id 旧条目是否被不同内容替换
    pub fn store_sps(&mut self, sps: Sps) -> AvcResult<bool> {
        let slot = self.sps.get_mut(sps.sps_id as usize).ok_or_else(|| {
            AvcError::InvalidArgument(format!("H264: sps_id 超出范围, sps_id={}", sps.sps_id))
        })?;
        let replaced = slot.as_ref().is_some_and(|old| *old != sps);
        *slot = Some(sps);
        Ok(replaced)
    }

    /// 存入 PPS
    pub fn store_pps(&mut self, pps: Pps) -> AvcResult<()> {
        let slot = self.pps.get_mut(pps.pps_id as usize).ok_or_else(|| {
            AvcError::InvalidArgument(format!("H264: pps_id 超出范围, pps_id={}", pps.pps_id))
        })?;
        *slot = Some(pps);
        Ok(())
    }

    /// 由 pps_id 解析 PPS→SPS 链
    pub fn resolve(&self, pps_id: u32) -> AvcResult<(&Pps, &Sps)> {
        let pps = self
            .pps(pps_id)
            .ok_or_else(|| AvcError::InvalidData(format!("H264: 未找到 PPS id={}", pps_id)))?;
        let sps = self
            .sps(pps.sps_id)
            .ok_or_else(|| AvcError::InvalidData(format!("H264: 未找到 SPS id={}", pps.sps_id)))?;
        Ok((pps, sps))
    }
}
