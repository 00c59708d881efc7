//! 集成测试用的 Annex B 码流构造器.
//!
//! 只生成基线语法: poc_type 0, 单条带组, CAVLC, 宏块为 I_16x16 DC,
//! I_PCM 或 P_Skip.

#![allow(dead_code)]

use avcdec::core::BitWriter;

pub const LOG2_MAX_FRAME_NUM: u32 = 4;
pub const LOG2_MAX_POC_LSB: u32 = 8;

/// 码流构造器, 每个 NAL 前写 4 字节起始码
pub struct StreamBuilder {
    pub mb_width: u32,
    pub mb_height: u32,
    out: Vec<u8>,
}

impl StreamBuilder {
    pub fn new(mb_width: u32, mb_height: u32) -> Self {
        Self {
            mb_width,
            mb_height,
            out: Vec::new(),
        }
    }

    pub fn mb_count(&self) -> u32 {
        self.mb_width * self.mb_height
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }

    /// 追加一个 NAL 单元 (含头部字节, 已是 EBSP)
    pub fn push_nal(&mut self, nal: &[u8]) -> &mut Self {
        self.out.extend_from_slice(&[0, 0, 0, 1]);
        self.out.extend_from_slice(nal);
        self
    }

    pub fn sps(&mut self) -> &mut Self {
        let mut bw = BitWriter::new();
        bw.write_bits(66, 8); // profile_idc
        bw.write_bits(0xC0, 8); // constraint_set0/1
        bw.write_bits(30, 8); // level_idc
        bw.write_ue(0); // sps_id
        bw.write_ue(LOG2_MAX_FRAME_NUM - 4);
        bw.write_ue(0); // poc_type
        bw.write_ue(LOG2_MAX_POC_LSB - 4);
        bw.write_ue(2); // max_num_ref_frames
        bw.write_flag(false); // gaps_in_frame_num_allowed
        bw.write_ue(self.mb_width - 1);
        bw.write_ue(self.mb_height - 1);
        bw.write_flag(true); // frame_mbs_only
        bw.write_flag(true); // direct_8x8_inference
        bw.write_flag(false); // frame_cropping
        bw.write_flag(false); // vui
        bw.write_trailing_bits();
        self.push_nal(&nal(7, 3, &bw.finish()))
    }

    pub fn pps(&mut self, cabac: bool) -> &mut Self {
        let mut bw = BitWriter::new();
        bw.write_ue(0); // pps_id
        bw.write_ue(0); // sps_id
        bw.write_flag(cabac);
        bw.write_flag(false); // bottom_field_pic_order_in_frame_present
        bw.write_ue(0); // num_slice_groups_minus1
        bw.write_ue(0); // num_ref_idx_l0_default_active_minus1
        bw.write_ue(0); // num_ref_idx_l1_default_active_minus1
        bw.write_flag(false); // weighted_pred
        bw.write_bits(0, 2); // weighted_bipred_idc
        bw.write_se(0); // pic_init_qp_minus26
        bw.write_se(0); // pic_init_qs_minus26
        bw.write_se(0); // chroma_qp_index_offset
        bw.write_flag(false); // deblocking_filter_control_present
        bw.write_flag(false); // constrained_intra_pred
        bw.write_flag(false); // redundant_pic_cnt_present
        bw.write_trailing_bits();
        self.push_nal(&nal(8, 3, &bw.finish()))
    }

    pub fn aud(&mut self) -> &mut Self {
        self.push_nal(&[0x09, 0xF0])
    }

    pub fn end_of_stream(&mut self) -> &mut Self {
        self.push_nal(&[0x0B])
    }

    /// user_data_unregistered SEI
    pub fn sei_user_data(&mut self, payload: &[u8]) -> &mut Self {
        let mut rbsp = vec![5, (16 + payload.len()) as u8];
        rbsp.extend_from_slice(&[0x11; 16]);
        rbsp.extend_from_slice(payload);
        rbsp.push(0x80);
        self.push_nal(&nal(6, 0, &rbsp))
    }

    /// IDR 条带, 宏块 `first_mb..first_mb + count` 均为无残差的 I_16x16 DC
    pub fn idr_dc_slice(&mut self, idr_pic_id: u32, first_mb: u32, count: u32) -> &mut Self {
        let mut bw = BitWriter::new();
        write_idr_header(&mut bw, first_mb, idr_pic_id);
        for _ in 0..count {
            bw.write_ue(3); // I_16x16_2_0_0
            bw.write_ue(0); // intra_chroma_pred_mode
            bw.write_se(0); // mb_qp_delta
            bw.write_bit(1); // DC 系数块 TotalCoeff = 0
        }
        bw.write_trailing_bits();
        self.push_nal(&nal(5, 3, &bw.finish()))
    }

    /// 整幅 I_PCM 的 IDR 图像, 样本取自 `pattern(x, y, plane)`
    pub fn idr_pcm_picture(&mut self, idr_pic_id: u32, pattern: fn(usize, usize, usize) -> u8) -> &mut Self {
        let mut bw = BitWriter::new();
        write_idr_header(&mut bw, 0, idr_pic_id);
        for addr in 0..self.mb_count() {
            let (mb_x, mb_y) = ((addr % self.mb_width) as usize, (addr / self.mb_width) as usize);
            bw.write_ue(25); // I_PCM
            bw.align_to_byte();
            bw.write_bytes(&pcm_samples(mb_x, mb_y, pattern));
        }
        bw.write_trailing_bits();
        self.push_nal(&nal(5, 3, &bw.finish()))
    }

    /// 整幅 P_Skip 的 P 图像
    pub fn p_skip_picture(&mut self, frame_num: u32, poc_lsb: u32, ref_idc: u8) -> &mut Self {
        let mut bw = BitWriter::new();
        bw.write_ue(0); // first_mb_in_slice
        bw.write_ue(5); // slice_type P (全图一致)
        bw.write_ue(0); // pps_id
        bw.write_bits(frame_num, LOG2_MAX_FRAME_NUM);
        bw.write_bits(poc_lsb, LOG2_MAX_POC_LSB);
        bw.write_flag(false); // num_ref_idx_active_override
        bw.write_flag(false); // ref_pic_list_modification_flag_l0
        if ref_idc != 0 {
            bw.write_flag(false); // adaptive_ref_pic_marking_mode
        }
        bw.write_se(0); // slice_qp_delta
        bw.write_ue(self.mb_count()); // mb_skip_run
        bw.write_trailing_bits();
        self.push_nal(&nal(1, ref_idc, &bw.finish()))
    }
}

fn write_idr_header(bw: &mut BitWriter, first_mb: u32, idr_pic_id: u32) {
    bw.write_ue(first_mb);
    bw.write_ue(7); // slice_type I (全图一致)
    bw.write_ue(0); // pps_id
    bw.write_bits(0, LOG2_MAX_FRAME_NUM); // frame_num
    bw.write_ue(idr_pic_id);
    bw.write_bits(0, LOG2_MAX_POC_LSB); // pic_order_cnt_lsb
    bw.write_flag(false); // no_output_of_prior_pics
    bw.write_flag(false); // long_term_reference
    bw.write_se(0); // slice_qp_delta
}

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

pub fn pcm_samples(mb_x: usize, mb_y: usize, pattern: fn(usize, usize, usize) -> u8) -> Vec<u8> {
    let mut samples = Vec::with_capacity(384);
    for y in 0..16 {
        for x in 0..16 {
            samples.push(pattern(mb_x * 16 + x, mb_y * 16 + y, 0));
        }
    }
    for plane in 1..3 {
        for y in 0..8 {
            for x in 0..8 {
                samples.push(pattern(mb_x * 8 + x, mb_y * 8 + y, plane));
            }
        }
    }
    samples
}

pub fn gradient(x: usize, y: usize, plane: usize) -> u8 {
    ((x * 5 + y * 9 + plane * 60) % 241) as u8 + 8
}

/// 按 pattern 生成整幅 I420 (未裁剪)
pub fn expected_i420(width: usize, height: usize, pattern: fn(usize, usize, usize) -> u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(width * height * 3 / 2);
    for y in 0..height {
        for x in 0..width {
            out.push(pattern(x, y, 0));
        }
    }
    for plane in 1..3 {
        for y in 0..height / 2 {
            for x in 0..width / 2 {
                out.push(pattern(x, y, plane));
            }
        }
    }
    out
}
