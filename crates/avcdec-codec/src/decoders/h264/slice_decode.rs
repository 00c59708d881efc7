//! 条带与图像级解码流程: 新图像检测, frame_num 间隙, 宏块循环, 图像完成.

use super::*;

use avcdec_core::bitreader::BitReader;

use super::conceal::{ConcealSource, conceal_picture};
use super::deblock::deblock_picture;
use super::dpb::CompletedPicture;
use super::macroblock::{MbParseParams, parse_macroblock};
use super::macroblock_inter::{MbMotion, reconstruct_inter};
use super::macroblock_intra::reconstruct_intra;
use super::macroblock_state::{MbInfo, MbKind};
use super::slice_group::{build_mb_slice_group_map, next_mb_addr};
use super::slice_parse::parse_slice_header;
use super::syntax::{MbType, SliceType};
use crate::parsers::h264::read_ue;

impl H264Decoder {
    // ============================================================
    // 条带入口
    // ============================================================

    pub(super) fn handle_slice(
        &mut self,
        nal_type: NalUnitType,
        ref_idc: u8,
        pic_id: u32,
    ) -> AvcResult<DecodeStatus> {
        let header = parse_slice_header(&self.scratch, nal_type, ref_idc, &self.params)?;

        if header.redundant_pic_cnt > 0 {
            debug!("H264: 跳过冗余条带, redundant_pic_cnt={}", header.redundant_pic_cnt);
            return Ok(DecodeStatus::NeedMoreData);
        }
        if !header.is_idr && self.config.wait_for_idr && !self.seen_idr {
            debug!("H264: 等待 IDR, 跳过条带 frame_num={}", header.frame_num);
            return Ok(DecodeStatus::NeedMoreData);
        }

        if let Some(cur) = &self.current {
            let first_decoded = self
                .arena
                .get(header.first_mb as usize)
                .is_some_and(|mb| mb.is_decoded());
            if first_decoded || !cur.header.same_picture_as(&header) {
                self.finish_picture()?;
                return Ok(DecodeStatus::PictureReady { consumed: false });
            }
        }

        if self.current.is_none()
            && let Some(status) = self.start_picture(&header, pic_id)?
        {
            return Ok(status);
        }

        if self.decode_slice(&header)? {
            self.finish_picture()?;
            return Ok(DecodeStatus::PictureReady { consumed: true });
        }
        Ok(DecodeStatus::Success)
    }

    // ============================================================
    // 图像开始
    // ============================================================

    /// 开始新图像. 需要宿主先取走旧序列的帧时返回 `Some(PictureReady)`
    fn start_picture(&mut self, header: &SliceHeader, pic_id: u32) -> AvcResult<Option<DecodeStatus>> {
        let sps = self.params.resolve(header.pps_id)?.1.clone();

        if self.needs_reconfigure(&sps) {
            if self.dpb.is_allocated() && self.dpb.has_waiting_output() && !self.sequence_drain_requested {
                self.dpb.bump_epoch();
                self.sequence_drain_requested = true;
                debug!(
                    "H264: 序列参数变化, 先输出旧序列的帧, 新尺寸 {}x{}",
                    sps.coded_width(),
                    sps.coded_height()
                );
                return Ok(Some(DecodeStatus::PictureReady { consumed: false }));
            }
            self.sequence_drain_requested = false;
            self.activate_sequence(&sps)?;
        } else if self.active_sps.as_ref() != Some(&sps) {
            self.refresh_sequence(&sps);
        }

        if header.is_idr {
            self.dpb.start_idr(header.dec_ref_pic_marking.no_output_of_prior_pics);
            self.seen_idr = true;
        } else {
            self.fill_frame_num_gap(header, &sps)?;
        }

        let (store, buf) = self.dpb.bind_current(self.host.as_mut(), pic_id)?;
        let poc = self.poc.compute(header, &sps);
        self.arena.reset();
        debug!(
            "H264: 开始图像 frame_num={} poc={} idr={} store={}",
            header.frame_num,
            poc.pic_order_cnt(),
            header.is_idr,
            store
        );
        self.current = Some(CurrentPicture {
            store,
            buf,
            header: header.clone(),
            sps,
            poc,
            slice_count: 0,
            deblock: Vec::new(),
            last_qp: header.slice_qp,
            conceal_ref: None,
        });
        Ok(None)
    }

    /// 同尺寸 SPS 内容变化: 只更新输出重排参数与序列信息
    pub(super) fn refresh_sequence(&mut self, sps: &Sps) {
        let dpb_size = self.dpb.dpb_size();
        let reorder = sps.vui.as_ref().and_then(|v| v.max_num_reorder_frames);
        let no_reorder = self.config.output_in_decode_order || sps.poc_type == 2 || reorder == Some(0);
        let reorder_depth = reorder.map_or(dpb_size, |r| (r as usize).min(dpb_size));
        self.dpb
            .configure_ordering(reorder_depth, no_reorder, sps.max_num_ref_frames as usize);
        self.sequence = Some(SequenceInfo::from_sps(sps, dpb_size));
        self.active_sps = Some(sps.clone());
    }

    /// frame_num 不连续时为缺失的值插入占位参考帧
    fn fill_frame_num_gap(&mut self, header: &SliceHeader, sps: &Sps) -> AvcResult<()> {
        let Some(prev) = self.prev_ref_frame_num else {
            return Ok(());
        };
        let max_frame_num = sps.max_frame_num();
        let frame_num = header.frame_num;
        if frame_num == prev || frame_num == (prev + 1) % max_frame_num {
            return Ok(());
        }

        let missing = (frame_num + max_frame_num - prev - 1) % max_frame_num;
        // 逐个插入时更早的占位帧会被滑动窗口立即移出, 只插入最后 max_num_ref_frames 个, 结果相同
        let keep = sps.max_num_ref_frames.max(1);
        let skipped = missing.saturating_sub(keep);
        if !sps.gaps_in_frame_num_allowed {
            warn!(
                "H264: frame_num 不连续, 可能丢失参考帧, prev={}, cur={}",
                prev, frame_num
            );
        }
        warn!(
            "H264: frame_num 间隙, prev={}, cur={}, 插入 {} 个占位帧",
            prev,
            frame_num,
            missing - skipped
        );

        let mut num = prev;
        for i in 0..missing {
            num = (num + 1) % max_frame_num;
            if i >= skipped {
                self.dpb.insert_placeholder(self.host.as_mut(), num, max_frame_num)?;
            }
            self.poc.advance_frame_num(num, max_frame_num);
        }
        self.prev_ref_frame_num = Some(num);
        Ok(())
    }

    // ============================================================
    // 条带数据
    // ============================================================

    /// 解码一个条带的全部宏块, 返回图像是否已完整
    fn decode_slice(&mut self, header: &SliceHeader) -> AvcResult<bool> {
        let (pps, sps) = self.params.resolve(header.pps_id)?;
        let cur = self
            .current
            .as_mut()
            .ok_or_else(|| AvcError::Internal("H264: 没有正在解码的图像".into()))?;

        cur.slice_count += 1;
        let slice_num = cur.slice_count;
        cur.deblock.push(DeblockParams::new(
            header.disable_deblocking_filter_idc,
            header.slice_alpha_c0_offset_div2,
            header.slice_beta_offset_div2,
        ));
        cur.last_qp = header.slice_qp;

        let ref_list = match header.slice_type {
            SliceType::P => {
                let list = self.dpb.build_ref_pic_list0(
                    header.frame_num,
                    sps.max_frame_num(),
                    header.num_ref_idx_l0_active as usize,
                    &header.ref_pic_list_mods,
                )?;
                if let Some(first) = list.first().copied().flatten() {
                    cur.conceal_ref = Some(first);
                }
                list
            }
            SliceType::I => Vec::new(),
        };

        let map = build_mb_slice_group_map(pps, sps, header.slice_group_change_cycle);
        if map.len() != self.arena.len() {
            return Err(AvcError::InvalidData(format!(
                "H264: 条带组映射与图像尺寸不一致, map={}, mbs={}",
                map.len(),
                self.arena.len()
            )));
        }

        let ctx = SliceContext {
            header,
            map: &map,
            params: MbParseParams {
                slice_type: header.slice_type,
                num_ref_idx_active: header.num_ref_idx_l0_active,
                constrained_intra_pred: pps.constrained_intra_pred,
            },
            chroma_qp_offset: [pps.chroma_qp_index_offset, pps.second_chroma_qp_index_offset],
            slice_num,
            ref_list: &ref_list,
        };
        match decode_slice_data(
            &ctx,
            &self.scratch,
            &mut cur.buf,
            &mut self.arena,
            &self.dpb,
            &mut self.syn,
        ) {
            Ok(qp) => cur.last_qp = qp,
            Err(err) => {
                // 失败条带的宏块交给错误隐藏
                for addr in 0..self.arena.len() {
                    if let Some(mb) = self.arena.get_mut(addr)
                        && mb.slice_num == slice_num
                    {
                        *mb = MbInfo::default();
                    }
                }
                return Err(err);
            }
        }

        Ok(self.arena.decoded_count() == self.arena.len())
    }

    // ============================================================
    // 图像完成
    // ============================================================

    /// 完成当前图像: 错误隐藏, 去块滤波, 参考标记, 进入 DPB
    pub(super) fn finish_picture(&mut self) -> AvcResult<()> {
        let Some(mut cur) = self.current.take() else {
            return Ok(());
        };
        let num_err_mbs = match self.conceal_missing(&mut cur) {
            Ok(count) => count,
            Err(err) => {
                self.dpb.abort_current(cur.store, cur.buf);
                return Err(err);
            }
        };
        if self.config.deblocking {
            deblock_picture(&mut cur.buf, &self.arena, &cur.deblock);
        }

        let header = &cur.header;
        let poc = cur.poc.pic_order_cnt();
        self.dpb.finish_current(
            cur.store,
            cur.buf,
            CompletedPicture {
                frame_num: header.frame_num,
                poc,
                is_idr: header.is_idr,
                num_err_mbs: num_err_mbs as u32,
            },
        );

        let mut has_mmco5 = false;
        if header.nal_ref_idc != 0 {
            has_mmco5 = self.dpb.mark_current_reference(
                cur.store,
                header.frame_num,
                cur.sps.max_frame_num(),
                header.is_idr,
                &header.dec_ref_pic_marking,
            );
            self.prev_ref_frame_num = Some(if has_mmco5 { 0 } else { header.frame_num });
        }
        self.poc.finish_picture(header, &cur.poc, has_mmco5);

        debug!(
            "H264: 图像完成 frame_num={} poc={} slices={} err_mbs={} ref={}",
            header.frame_num,
            poc,
            cur.slice_count,
            num_err_mbs,
            header.nal_ref_idc != 0
        );
        Ok(())
    }

    /// 隐藏未解码的宏块, 返回隐藏数量
    fn conceal_missing(&mut self, cur: &mut CurrentPicture) -> AvcResult<usize> {
        let missing = self.arena.len() - self.arena.decoded_count();
        if missing == 0 {
            return Ok(0);
        }
        let reference = cur
            .conceal_ref
            .or_else(|| self.dpb.newest_reference())
            .filter(|&idx| idx != cur.store)
            .and_then(|idx| {
                self.dpb
                    .frame(idx)
                    .and_then(|frame| frame.buf.as_ref())
                    .map(|buf| (buf, idx as i64))
            });
        let source = ConcealSource {
            reference,
            enabled: self.config.conceal_errors,
            qp: cur.last_qp,
            slice_num: cur.slice_count.max(1),
        };
        let concealed = conceal_picture(&mut cur.buf, &mut self.arena, source)?;
        warn!(
            "H264: 图像缺少 {} 个宏块, 已隐藏, frame_num={}",
            concealed, cur.header.frame_num
        );
        Ok(concealed)
    }
}

// ============================================================
// 宏块循环
// ============================================================

/// 条带级解码上下文
struct SliceContext<'a> {
    header: &'a SliceHeader,
    map: &'a [u8],
    params: MbParseParams,
    chroma_qp_offset: [i32; 2],
    slice_num: u32,
    ref_list: &'a [Option<usize>],
}

/// 按条带组顺序解码 slice_data, 返回最后的 QP
fn decode_slice_data(
    ctx: &SliceContext<'_>,
    rbsp: &[u8],
    buf: &mut PictureBuffer,
    arena: &mut MbArena,
    dpb: &Dpb,
    syn: &mut MbSyntax,
) -> AvcResult<i32> {
    let mut br = BitReader::new(rbsp);
    br.skip_bits(ctx.header.data_bit_offset as u32)?;
    let mut qp = ctx.header.slice_qp;
    let mut addr = ctx.header.first_mb as usize;
    if addr >= arena.len() {
        return Err(AvcError::InvalidData(format!(
            "H264: first_mb_in_slice 超出图像, first_mb={}, mbs={}",
            addr,
            arena.len()
        )));
    }

    loop {
        if ctx.params.slice_type == SliceType::P {
            let skip_run = read_ue(&mut br)?;
            for i in 0..skip_run {
                claim_mb(arena, addr, ctx.slice_num)?;
                let motion = reconstruct_inter(buf, arena, addr, None, ctx.ref_list, dpb, ctx.chroma_qp_offset)?;
                store_inter(arena, addr, ctx, MbKind::PSkip, qp, 0, [0; 24], &motion);
                addr = match next_mb_addr(ctx.map, addr) {
                    Some(next) => next,
                    None if i + 1 == skip_run => return Ok(qp),
                    None => {
                        return Err(AvcError::InvalidData(format!(
                            "H264: mb_skip_run 超出条带组, run={}",
                            skip_run
                        )));
                    }
                };
            }
            if skip_run > 0 && !br.more_rbsp_data() {
                return Ok(qp);
            }
        }

        claim_mb(arena, addr, ctx.slice_num)?;
        parse_macroblock(&mut br, arena, addr, &ctx.params, &mut qp, syn)?;
        match syn.mb_type {
            MbType::I4x4 | MbType::I16x16 { .. } | MbType::IPcm => {
                reconstruct_intra(
                    buf,
                    arena,
                    addr,
                    syn,
                    ctx.chroma_qp_offset,
                    ctx.params.constrained_intra_pred,
                )?;
                store_intra(arena, addr, ctx, syn);
            }
            _ => {
                let motion =
                    reconstruct_inter(buf, arena, addr, Some(syn), ctx.ref_list, dpb, ctx.chroma_qp_offset)?;
                store_inter(arena, addr, ctx, MbKind::PInter, syn.qp, syn.cbp, syn.total_coeff, &motion);
            }
        }

        if !br.more_rbsp_data() {
            return Ok(qp);
        }
        addr = match next_mb_addr(ctx.map, addr) {
            Some(next) => next,
            None => {
                debug!("H264: 条带在最后一个宏块之后仍有数据, 忽略");
                return Ok(qp);
            }
        };
    }
}

/// 宏块开始解码前登记条带序号, 重复解码视为码流错误
fn claim_mb(arena: &mut MbArena, addr: usize, slice_num: u32) -> AvcResult<()> {
    let mb = arena
        .get_mut(addr)
        .ok_or_else(|| AvcError::InvalidData(format!("H264: 宏块地址越界, addr={}", addr)))?;
    if mb.is_decoded() {
        return Err(AvcError::InvalidData(format!("H264: 宏块重复解码, addr={}", addr)));
    }
    mb.slice_num = slice_num;
    Ok(())
}

fn store_intra(arena: &mut MbArena, addr: usize, ctx: &SliceContext<'_>, syn: &MbSyntax) {
    let (kind, qp, modes) = match syn.mb_type {
        MbType::I4x4 => (MbKind::I4x4, syn.qp, syn.intra4x4_modes),
        MbType::IPcm => (MbKind::IPcm, 0, [2; 16]),
        _ => (MbKind::I16x16, syn.qp, [2; 16]),
    };
    if let Some(mb) = arena.get_mut(addr) {
        *mb = MbInfo {
            kind,
            slice_num: ctx.slice_num,
            qp,
            chroma_qp_offset: ctx.chroma_qp_offset,
            cbp: syn.cbp,
            intra4x4_modes: modes,
            total_coeff: syn.total_coeff,
            ..MbInfo::default()
        };
    }
}

#[allow(clippy::too_many_arguments)]
fn store_inter(
    arena: &mut MbArena,
    addr: usize,
    ctx: &SliceContext<'_>,
    kind: MbKind,
    qp: i32,
    cbp: u8,
    total_coeff: [u8; 24],
    motion: &MbMotion,
) {
    let ref_idx = motion.ref_idx_8x8();
    let ref_pic = ref_idx.map(|r| {
        usize::try_from(r)
            .ok()
            .and_then(|r| ctx.ref_list.get(r).copied().flatten())
            .map_or(-1, |store| store as i64)
    });
    if let Some(mb) = arena.get_mut(addr) {
        *mb = MbInfo {
            kind,
            slice_num: ctx.slice_num,
            qp,
            chroma_qp_offset: ctx.chroma_qp_offset,
            cbp,
            intra4x4_modes: [2; 16],
            total_coeff,
            mv: motion.mv,
            ref_idx,
            ref_pic,
            concealed: false,
        };
    }
}
