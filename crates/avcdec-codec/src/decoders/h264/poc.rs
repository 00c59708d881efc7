//! H.264 图像顺序计数 (POC) 推导, 支持 pic_order_cnt_type 0/1/2.
//!
//! 只处理帧图像, 结果为 `min(TopFieldOrderCnt, BottomFieldOrderCnt)`.
//! 参数集与条带头中的偏移量可取满 i32 范围, 推导中的加法一律按 i32 回绕.

use crate::parsers::h264::Sps;

use super::slice_parse::SliceHeader;

/// 单幅图像的 POC 推导结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PocResult {
    pub top: i32,
    pub bottom: i32,
    pub poc_msb: i32,
    pub frame_num_offset: i32,
}

impl PocResult {
    /// PicOrderCnt(帧) = min(top, bottom)
    pub fn pic_order_cnt(&self) -> i32 {
        self.top.min(self.bottom)
    }
}

/// 跨图像保存的 POC 历史状态
#[derive(Debug, Clone, Default)]
pub struct PocState {
    prev_poc_msb: i32,
    prev_poc_lsb: i32,
    prev_frame_num_offset: i32,
    prev_frame_num: u32,
}

impl PocState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 计算当前图像的 POC, 不修改历史状态
    pub fn compute(&self, header: &SliceHeader, sps: &Sps) -> PocResult {
        match sps.poc_type {
            0 => self.compute_type0(header, sps),
            1 => self.compute_type1(header, sps),
            _ => self.compute_type2(header, sps),
        }
    }

    fn compute_type0(&self, header: &SliceHeader, sps: &Sps) -> PocResult {
        let (prev_msb, prev_lsb) = if header.is_idr {
            (0, 0)
        } else {
            (self.prev_poc_msb, self.prev_poc_lsb)
        };
        let max_lsb = sps.max_poc_lsb() as i32;
        let lsb = header.pic_order_cnt_lsb as i32;
        let poc_msb = if lsb < prev_lsb && prev_lsb - lsb >= max_lsb / 2 {
            prev_msb.wrapping_add(max_lsb)
        } else if lsb > prev_lsb && lsb - prev_lsb > max_lsb / 2 {
            prev_msb.wrapping_sub(max_lsb)
        } else {
            prev_msb
        };
        let top = poc_msb.wrapping_add(lsb);
        PocResult {
            top,
            bottom: top.wrapping_add(header.delta_pic_order_cnt_bottom),
            poc_msb,
            frame_num_offset: 0,
        }
    }

    fn frame_num_offset(&self, header: &SliceHeader, sps: &Sps) -> i32 {
        if header.is_idr {
            0
        } else if self.prev_frame_num > header.frame_num {
            self.prev_frame_num_offset.wrapping_add(sps.max_frame_num() as i32)
        } else {
            self.prev_frame_num_offset
        }
    }

    fn compute_type1(&self, header: &SliceHeader, sps: &Sps) -> PocResult {
        let frame_num_offset = self.frame_num_offset(header, sps);
        let cycle = &sps.offset_for_ref_frame;
        let mut abs_frame_num = if cycle.is_empty() {
            0
        } else {
            frame_num_offset.wrapping_add(header.frame_num as i32)
        };
        if header.nal_ref_idc == 0 && abs_frame_num > 0 {
            abs_frame_num -= 1;
        }

        let mut expected_poc = 0i32;
        if abs_frame_num > 0 {
            let cycle_len = cycle.len() as i32;
            let expected_delta_per_cycle = cycle.iter().fold(0i32, |acc, v| acc.wrapping_add(*v));
            let cycle_cnt = (abs_frame_num - 1) / cycle_len;
            let frame_num_in_cycle = ((abs_frame_num - 1) % cycle_len) as usize;
            expected_poc = cycle_cnt.wrapping_mul(expected_delta_per_cycle);
            for offset in &cycle[..=frame_num_in_cycle] {
                expected_poc = expected_poc.wrapping_add(*offset);
            }
        }
        if header.nal_ref_idc == 0 {
            expected_poc = expected_poc.wrapping_add(sps.offset_for_non_ref_pic);
        }

        let top = expected_poc.wrapping_add(header.delta_pic_order_cnt[0]);
        let bottom = top
            .wrapping_add(sps.offset_for_top_to_bottom_field)
            .wrapping_add(header.delta_pic_order_cnt[1]);
        PocResult {
            top,
            bottom,
            poc_msb: 0,
            frame_num_offset,
        }
    }

    fn compute_type2(&self, header: &SliceHeader, sps: &Sps) -> PocResult {
        let frame_num_offset = self.frame_num_offset(header, sps);
        let poc = if header.is_idr {
            0
        } else {
            let doubled = frame_num_offset
                .wrapping_add(header.frame_num as i32)
                .wrapping_mul(2);
            if header.nal_ref_idc == 0 {
                doubled.wrapping_sub(1)
            } else {
                doubled
            }
        };
        PocResult {
            top: poc,
            bottom: poc,
            poc_msb: 0,
            frame_num_offset,
        }
    }

    /// 图像解码完成后更新历史状态
    ///
    /// MMCO5 图像按 frame_num = 0 且 POC 归零后的值记入历史.
    pub fn finish_picture(
        &mut self,
        header: &SliceHeader,
        result: &PocResult,
        has_mmco5: bool,
    ) {
        if header.nal_ref_idc != 0 {
            if has_mmco5 {
                self.prev_poc_msb = 0;
                self.prev_poc_lsb = result.top.wrapping_sub(result.pic_order_cnt());
            } else {
                self.prev_poc_msb = result.poc_msb;
                self.prev_poc_lsb = header.pic_order_cnt_lsb as i32;
            }
        }
        if has_mmco5 {
            self.prev_frame_num_offset = 0;
            self.prev_frame_num = 0;
        } else {
            self.prev_frame_num_offset = result.frame_num_offset;
            self.prev_frame_num = header.frame_num;
        }
    }

    /// frame_num 间隙占位帧推进 FrameNumOffset 历史 (类型 0 的 MSB/LSB 不变)
    pub fn advance_frame_num(&mut self, frame_num: u32, max_frame_num: u32) {
        if self.prev_frame_num > frame_num {
            self.prev_frame_num_offset = self.prev_frame_num_offset.wrapping_add(max_frame_num as i32);
        }
        self.prev_frame_num = frame_num;
    }
}
