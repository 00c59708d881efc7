//! 解码图像缓冲区 (DPB): 帧池分配, 参考图像标记, 输出顺序管理.
//!
//! 帧池大小为 `dpb_size + 1`, 所有帧存储由 DPB 独占. 正在解码的图像的
//! 像素缓冲区在解码期间被取出, 完成时归还.

use avcdec_core::{AvcError, AvcResult};
use bitflags::bitflags;
use log::{debug, warn};

use super::common::PictureBuffer;
use super::host::DecoderHost;
use super::slice_parse::{DecRefPicMarking, MmcoOp};

bitflags! {
    /// 帧存储状态位
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(super) struct FrameStatus: u8 {
        const SHORT_TERM = 1;
        const LONG_TERM = 1 << 1;
        const NEEDED_FOR_OUTPUT = 1 << 2;
        const NON_EXISTING = 1 << 3;
        const DECODING = 1 << 4;
    }
}

/// 帧池中的一个帧存储
#[derive(Debug, Default)]
pub(super) struct FrameStore {
    /// 像素内存, 解码期间为 None
    pub(super) buf: Option<PictureBuffer>,
    pub(super) status: FrameStatus,
    pub(super) frame_num: u32,
    pub(super) frame_num_wrap: i32,
    pub(super) long_term_frame_idx: u32,
    pub(super) poc: i32,
    pub(super) epoch: u32,
    pub(super) decode_order: u64,
    pub(super) pic_id: u32,
    pub(super) is_idr: bool,
    pub(super) num_err_mbs: u32,
    bound: bool,
}

impl FrameStore {
    pub(super) fn is_short_term(&self) -> bool {
        self.status.contains(FrameStatus::SHORT_TERM)
    }

    pub(super) fn is_long_term(&self) -> bool {
        self.status.contains(FrameStatus::LONG_TERM)
    }

    pub(super) fn is_reference(&self) -> bool {
        self.status
            .intersects(FrameStatus::SHORT_TERM | FrameStatus::LONG_TERM)
    }

    pub(super) fn is_waiting_output(&self) -> bool {
        self.status.contains(FrameStatus::NEEDED_FOR_OUTPUT)
            && !self.status.contains(FrameStatus::DECODING)
    }

    fn is_free(&self) -> bool {
        self.status.is_empty() && self.buf.is_some()
    }

    fn unmark_reference(&mut self) {
        self.status
            .remove(FrameStatus::SHORT_TERM | FrameStatus::LONG_TERM | FrameStatus::NON_EXISTING);
    }

    fn output_key(&self) -> (u32, i32, u64) {
        (self.epoch, self.poc, self.decode_order)
    }
}

/// 图像完成时写入帧存储的元数据
#[derive(Debug, Clone, Copy)]
pub(super) struct CompletedPicture {
    pub(super) frame_num: u32,
    pub(super) poc: i32,
    pub(super) is_idr: bool,
    pub(super) num_err_mbs: u32,
}

/// 解码图像缓冲区
#[derive(Debug, Default)]
pub(super) struct Dpb {
    frames: Vec<FrameStore>,
    width: usize,
    height: usize,
    dpb_size: usize,
    max_num_ref_frames: usize,
    reorder_depth: usize,
    no_reorder: bool,
    /// MaxLongTermFrameIdx, None 表示 "无长期帧索引"
    max_long_term_frame_idx: Option<u32>,
    epoch: u32,
    decode_counter: u64,
}

impl Dpb {
    pub(super) fn is_allocated(&self) -> bool {
        !self.frames.is_empty()
    }

    pub(super) fn geometry(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub(super) fn dpb_size(&self) -> usize {
        self.dpb_size
    }

    pub(super) fn frames(&self) -> &[FrameStore] {
        &self.frames
    }

    pub(super) fn frame(&self, idx: usize) -> Option<&FrameStore> {
        self.frames.get(idx)
    }

    pub(super) fn epoch(&self) -> u32 {
        self.epoch
    }

    // ============================================================
    // 帧池分配
    // ============================================================

    /// 通过宿主分配 `dpb_size + 1` 个帧存储, 失败时回滚全部已分配内存
    pub(super) fn allocate(
        &mut self,
        host: &mut dyn DecoderHost,
        width: usize,
        height: usize,
        dpb_size: usize,
    ) -> AvcResult<()> {
        self.release(host);
        let count = dpb_size + 1;
        let mbs = (width / 16) * (height / 16);
        if !host.allocate_frame_pool(mbs, count) {
            return Err(AvcError::OutOfMemory(format!(
                "H264: 宿主拒绝分配帧池, mbs={}, frames={}",
                mbs, count
            )));
        }

        let size = PictureBuffer::frame_size(width, height);
        let mut frames: Vec<FrameStore> = Vec::with_capacity(count);
        for _ in 0..count {
            let mem = match host.allocate(size) {
                Some(mem) if mem.capacity() >= size => mem,
                other => {
                    if let Some(mem) = other {
                        host.free(mem);
                    }
                    for frame in frames {
                        if let Some(buf) = frame.buf {
                            host.free(buf.into_vec());
                        }
                    }
                    return Err(AvcError::OutOfMemory(format!(
                        "H264: 帧缓冲区分配失败, size={}, frames={}",
                        size, count
                    )));
                }
            };
            frames.push(FrameStore {
                buf: Some(PictureBuffer::from_vec(mem, width, height)?),
                ..FrameStore::default()
            });
        }

        debug!(
            "H264: 帧池分配完成, {}x{}, dpb_size={}, frames={}",
            width, height, dpb_size, count
        );
        self.frames = frames;
        self.width = width;
        self.height = height;
        self.dpb_size = dpb_size;
        self.max_long_term_frame_idx = None;
        Ok(())
    }

    /// 归还全部帧内存
    pub(super) fn release(&mut self, host: &mut dyn DecoderHost) {
        for (idx, frame) in self.frames.iter_mut().enumerate() {
            if frame.bound {
                host.unbind_frame(idx);
            }
            if let Some(buf) = frame.buf.take() {
                host.free(buf.into_vec());
            }
        }
        self.frames.clear();
        self.dpb_size = 0;
        self.width = 0;
        self.height = 0;
    }

    /// 设置输出重排深度与参考帧上限
    pub(super) fn configure_ordering(
        &mut self,
        reorder_depth: usize,
        no_reorder: bool,
        max_num_ref_frames: usize,
    ) {
        self.reorder_depth = reorder_depth;
        self.no_reorder = no_reorder;
        self.max_num_ref_frames = max_num_ref_frames;
    }

    /// 清空全部状态, 保留帧内存
    pub(super) fn clear(&mut self, host: &mut dyn DecoderHost) {
        for frame in &mut self.frames {
            frame.status = FrameStatus::empty();
        }
        self.sweep(host);
        self.max_long_term_frame_idx = None;
        self.epoch = 0;
        self.decode_counter = 0;
    }

    /// 进入新的输出代: 此前等待输出的图像全部先于之后的图像输出
    pub(super) fn bump_epoch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// 解除已空闲帧存储与宿主图像的绑定
    fn sweep(&mut self, host: &mut dyn DecoderHost) {
        for (idx, frame) in self.frames.iter_mut().enumerate() {
            if frame.bound && frame.status.is_empty() {
                host.unbind_frame(idx);
                frame.bound = false;
            }
        }
    }

    // ============================================================
    // 当前图像
    // ============================================================

    /// 为新图像选择帧存储并取出其像素缓冲区
    pub(super) fn bind_current(
        &mut self,
        host: &mut dyn DecoderHost,
        pic_id: u32,
    ) -> AvcResult<(usize, PictureBuffer)> {
        let idx = self.acquire_store(host)?;
        let frame = &mut self.frames[idx];
        let buf = frame
            .buf
            .take()
            .ok_or_else(|| AvcError::Internal("H264: 空闲帧存储缺少像素内存".into()))?;
        frame.status = FrameStatus::DECODING;
        frame.pic_id = pic_id;
        frame.epoch = self.epoch;
        frame.decode_order = self.decode_counter;
        frame.num_err_mbs = 0;
        frame.bound = true;
        self.decode_counter += 1;
        host.bind_frame(idx, pic_id);
        Ok((idx, buf))
    }

    /// 放弃正在解码的图像, 归还缓冲区
    pub(super) fn abort_current(&mut self, idx: usize, buf: PictureBuffer) {
        if let Some(frame) = self.frames.get_mut(idx) {
            frame.buf = Some(buf);
            frame.status = FrameStatus::empty();
        }
    }

    /// 图像解码完成: 归还缓冲区并标记为等待输出
    pub(super) fn finish_current(&mut self, idx: usize, buf: PictureBuffer, pic: CompletedPicture) {
        let Some(frame) = self.frames.get_mut(idx) else {
            return;
        };
        frame.buf = Some(buf);
        frame.status = FrameStatus::NEEDED_FOR_OUTPUT;
        frame.frame_num = pic.frame_num;
        frame.poc = pic.poc;
        frame.is_idr = pic.is_idr;
        frame.num_err_mbs = pic.num_err_mbs;
    }

    /// 找一个空闲帧存储; 没有时依次淘汰最老的短期参考帧, 丢弃最老的待输出帧
    fn acquire_store(&mut self, host: &mut dyn DecoderHost) -> AvcResult<usize> {
        for _ in 0..=self.frames.len() * 3 {
            self.sweep(host);
            if let Some(idx) = self.frames.iter().position(FrameStore::is_free) {
                return Ok(idx);
            }

            let oldest_short = self
                .frames
                .iter()
                .enumerate()
                .filter(|(_, f)| f.is_short_term())
                .min_by_key(|(_, f)| f.frame_num_wrap)
                .map(|(idx, _)| idx);
            if let Some(idx) = oldest_short
                && !self.frames[idx].is_waiting_output()
            {
                warn!(
                    "H264: 帧池已满, 淘汰短期参考帧 frame_num={}",
                    self.frames[idx].frame_num
                );
                self.frames[idx].unmark_reference();
                continue;
            }

            let oldest_waiting = self
                .frames
                .iter()
                .enumerate()
                .filter(|(_, f)| f.is_waiting_output() && !f.is_reference())
                .min_by_key(|(_, f)| f.output_key())
                .map(|(idx, _)| idx);
            if let Some(idx) = oldest_waiting {
                warn!(
                    "H264: 帧池已满且宿主未取走输出, 丢弃 poc={}",
                    self.frames[idx].poc
                );
                self.frames[idx].status.remove(FrameStatus::NEEDED_FOR_OUTPUT);
                continue;
            }

            let victim = oldest_short.or_else(|| {
                self.frames
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| f.is_long_term())
                    .min_by_key(|(_, f)| f.long_term_frame_idx)
                    .map(|(idx, _)| idx)
            });
            match victim {
                Some(idx) => self.frames[idx].unmark_reference(),
                None => break,
            }
        }
        Err(AvcError::Internal("H264: 帧池中没有可用的帧存储".into()))
    }

    // ============================================================
    // 参考图像标记
    // ============================================================

    /// 以当前图像的 frame_num 重新计算短期参考帧的 FrameNumWrap
    pub(super) fn update_frame_num_wrap(&mut self, cur_frame_num: u32, max_frame_num: u32) {
        for frame in self.frames.iter_mut().filter(|f| f.is_short_term()) {
            frame.frame_num_wrap = if frame.frame_num > cur_frame_num {
                frame.frame_num as i32 - max_frame_num as i32
            } else {
                frame.frame_num as i32
            };
        }
    }

    fn max_refs(&self) -> usize {
        self.max_num_ref_frames.max(1)
    }

    fn ref_count_excluding(&self, exclude: Option<usize>) -> usize {
        self.frames
            .iter()
            .enumerate()
            .filter(|(idx, f)| Some(*idx) != exclude && f.is_reference())
            .count()
    }

    pub(super) fn ref_count(&self) -> usize {
        self.ref_count_excluding(None)
    }

    fn oldest_short_term_excluding(&self, exclude: Option<usize>) -> Option<usize> {
        self.frames
            .iter()
            .enumerate()
            .filter(|(idx, f)| Some(*idx) != exclude && f.is_short_term())
            .min_by_key(|(_, f)| f.frame_num_wrap)
            .map(|(idx, _)| idx)
    }

    /// 滑动窗口标记: 参考帧已满时移除 FrameNumWrap 最小的短期参考帧
    fn sliding_window(&mut self, exclude: Option<usize>) {
        while self.ref_count_excluding(exclude) >= self.max_refs() {
            let Some(idx) = self.oldest_short_term_excluding(exclude) else {
                break;
            };
            self.frames[idx].unmark_reference();
        }
    }

    /// 保证参考帧总数不超过 max(max_num_ref_frames, 1)
    fn enforce_capacity(&mut self, cur: usize) {
        while self.ref_count() > self.max_refs() {
            let victim = self.oldest_short_term_excluding(Some(cur)).or_else(|| {
                self.frames
                    .iter()
                    .enumerate()
                    .filter(|(idx, f)| *idx != cur && f.is_long_term())
                    .min_by_key(|(_, f)| f.long_term_frame_idx)
                    .map(|(idx, _)| idx)
            });
            let Some(idx) = victim else {
                break;
            };
            warn!(
                "H264: 参考帧数量超过上限 {}, 移除 frame_num={}",
                self.max_refs(),
                self.frames[idx].frame_num
            );
            self.frames[idx].unmark_reference();
        }
    }

    /// IDR 图像开始: 全部参考帧标记为不用于参考, 可选丢弃待输出帧
    pub(super) fn start_idr(&mut self, no_output_of_prior_pics: bool) {
        let mut dropped = 0;
        for frame in &mut self.frames {
            frame.unmark_reference();
            if no_output_of_prior_pics && frame.is_waiting_output() {
                frame.status.remove(FrameStatus::NEEDED_FOR_OUTPUT);
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!("H264: no_output_of_prior_pics, 丢弃 {} 个待输出帧", dropped);
        }
        self.max_long_term_frame_idx = None;
        self.bump_epoch();
    }

    fn short_term_by_pic_num(&self, pic_num: i32, exclude: usize) -> Option<usize> {
        (0..self.frames.len()).find(|&idx| {
            let f = &self.frames[idx];
            idx != exclude && f.is_short_term() && f.frame_num_wrap == pic_num
        })
    }

    fn long_term_by_idx(&self, long_term_frame_idx: u32, exclude: usize) -> Option<usize> {
        (0..self.frames.len()).find(|&idx| {
            let f = &self.frames[idx];
            idx != exclude && f.is_long_term() && f.long_term_frame_idx == long_term_frame_idx
        })
    }

    /// 参考图像解码完成后执行标记, 返回是否执行了 MMCO5
    pub(super) fn mark_current_reference(
        &mut self,
        cur: usize,
        frame_num: u32,
        max_frame_num: u32,
        is_idr: bool,
        marking: &DecRefPicMarking,
    ) -> bool {
        if cur >= self.frames.len() {
            return false;
        }
        self.update_frame_num_wrap(frame_num, max_frame_num);
        let cur_pic_num = frame_num as i32;
        let mut current_long_term = None;
        let mut has_mmco5 = false;

        if is_idr {
            if marking.long_term_reference_flag {
                self.max_long_term_frame_idx = Some(0);
                current_long_term = Some(0);
            } else {
                self.max_long_term_frame_idx = None;
            }
        } else if marking.adaptive {
            for op in &marking.ops {
                match *op {
                    MmcoOp::ForgetShort {
                        difference_of_pic_nums_minus1,
                    } => {
                        let pic_num = cur_pic_num - (difference_of_pic_nums_minus1 as i32 + 1);
                        match self.short_term_by_pic_num(pic_num, cur) {
                            Some(idx) => self.frames[idx].unmark_reference(),
                            None => warn!("H264: MMCO1 目标不存在, pic_num={}", pic_num),
                        }
                    }
                    MmcoOp::ForgetLong { long_term_pic_num } => {
                        match self.long_term_by_idx(long_term_pic_num, cur) {
                            Some(idx) => self.frames[idx].unmark_reference(),
                            None => warn!(
                                "H264: MMCO2 目标不存在, long_term_pic_num={}",
                                long_term_pic_num
                            ),
                        }
                    }
                    MmcoOp::ConvertShortToLong {
                        difference_of_pic_nums_minus1,
                        long_term_frame_idx,
                    } => {
                        let pic_num = cur_pic_num - (difference_of_pic_nums_minus1 as i32 + 1);
                        if self
                            .max_long_term_frame_idx
                            .is_none_or(|max| long_term_frame_idx > max)
                        {
                            warn!(
                                "H264: MMCO3 长期帧索引越界, idx={}",
                                long_term_frame_idx
                            );
                            continue;
                        }
                        let Some(target) = self.short_term_by_pic_num(pic_num, cur) else {
                            warn!("H264: MMCO3 目标不存在, pic_num={}", pic_num);
                            continue;
                        };
                        if let Some(old) = self.long_term_by_idx(long_term_frame_idx, cur)
                            && old != target
                        {
                            self.frames[old].unmark_reference();
                        }
                        let frame = &mut self.frames[target];
                        frame.status.remove(FrameStatus::SHORT_TERM);
                        frame.status.insert(FrameStatus::LONG_TERM);
                        frame.long_term_frame_idx = long_term_frame_idx;
                    }
                    MmcoOp::TrimLong {
                        max_long_term_frame_idx_plus1,
                    } => {
                        self.max_long_term_frame_idx = max_long_term_frame_idx_plus1.checked_sub(1);
                        let max = self.max_long_term_frame_idx;
                        for (idx, frame) in self.frames.iter_mut().enumerate() {
                            if idx != cur
                                && frame.is_long_term()
                                && max.is_none_or(|max| frame.long_term_frame_idx > max)
                            {
                                frame.unmark_reference();
                            }
                        }
                    }
                    MmcoOp::ClearAll => {
                        for (idx, frame) in self.frames.iter_mut().enumerate() {
                            if idx != cur {
                                frame.unmark_reference();
                            }
                        }
                        self.max_long_term_frame_idx = None;
                        has_mmco5 = true;
                    }
                    MmcoOp::MarkCurrentLong {
                        long_term_frame_idx,
                    } => {
                        if self
                            .max_long_term_frame_idx
                            .is_some_and(|max| long_term_frame_idx <= max)
                        {
                            current_long_term = Some(long_term_frame_idx);
                        } else {
                            warn!(
                                "H264: MMCO6 长期帧索引越界, idx={}, 按短期参考处理",
                                long_term_frame_idx
                            );
                        }
                    }
                }
            }
        } else {
            self.sliding_window(Some(cur));
        }

        if let Some(lt_idx) = current_long_term {
            if let Some(old) = self.long_term_by_idx(lt_idx, cur) {
                self.frames[old].unmark_reference();
            }
            let frame = &mut self.frames[cur];
            frame.status.insert(FrameStatus::LONG_TERM);
            frame.long_term_frame_idx = lt_idx;
        } else {
            let frame = &mut self.frames[cur];
            frame.status.insert(FrameStatus::SHORT_TERM);
            frame.frame_num_wrap = frame_num as i32;
        }

        if has_mmco5 {
            self.bump_epoch();
            let epoch = self.epoch;
            let frame = &mut self.frames[cur];
            frame.epoch = epoch;
            frame.poc = 0;
            frame.frame_num = 0;
            frame.frame_num_wrap = 0;
        }

        self.enforce_capacity(cur);
        has_mmco5
    }

    /// 最近解码的参考帧
    pub(super) fn newest_reference(&self) -> Option<usize> {
        self.frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_reference() && f.buf.is_some())
            .max_by_key(|(_, f)| f.decode_order)
            .map(|(idx, _)| idx)
    }

    /// 为丢失的 frame_num 插入一个不存在的短期参考帧
    pub(super) fn insert_placeholder(
        &mut self,
        host: &mut dyn DecoderHost,
        frame_num: u32,
        max_frame_num: u32,
    ) -> AvcResult<()> {
        self.update_frame_num_wrap(frame_num, max_frame_num);
        self.sliding_window(None);
        let idx = self.acquire_store(host)?;
        let src = self.newest_reference().filter(|&src| src != idx);

        let mut buf = self.frames[idx]
            .buf
            .take()
            .ok_or_else(|| AvcError::Internal("H264: 占位帧缺少像素内存".into()))?;
        match src.and_then(|src| self.frames[src].buf.as_ref()) {
            Some(reference) => buf.copy_from(reference),
            None => buf.fill(128),
        }

        let frame = &mut self.frames[idx];
        frame.buf = Some(buf);
        frame.status = FrameStatus::SHORT_TERM | FrameStatus::NON_EXISTING;
        frame.frame_num = frame_num;
        frame.frame_num_wrap = frame_num as i32;
        frame.poc = 0;
        frame.is_idr = false;
        frame.num_err_mbs = 0;
        frame.epoch = self.epoch;
        frame.decode_order = self.decode_counter;
        self.decode_counter += 1;
        Ok(())
    }

    // ============================================================
    // 输出
    // ============================================================

    pub(super) fn has_waiting_output(&self) -> bool {
        self.frames.iter().any(FrameStore::is_waiting_output)
    }

    /// 选出下一个可以输出的帧
    pub(super) fn output_candidate(&self, flush: bool) -> Option<usize> {
        let waiting = self.frames.iter().filter(|f| f.is_waiting_output()).count();
        let (idx, best) = self
            .frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_waiting_output())
            .min_by_key(|(_, f)| f.output_key())?;
        let occupied = self
            .frames
            .iter()
            .filter(|f| !f.status.is_empty() && !f.status.contains(FrameStatus::DECODING))
            .count();
        let eligible = flush
            || best.epoch != self.epoch
            || self.no_reorder
            || waiting > self.reorder_depth
            || occupied >= self.dpb_size;
        eligible.then_some(idx)
    }

    /// 取走输出帧: 清除等待输出标志
    pub(super) fn take_output(&mut self, host: &mut dyn DecoderHost, idx: usize) -> Option<&FrameStore> {
        self.sweep(host);
        let frame = self.frames.get_mut(idx)?;
        frame.status.remove(FrameStatus::NEEDED_FOR_OUTPUT);
        Some(&self.frames[idx])
    }

    /// 丢弃全部等待输出的帧
    pub(super) fn discard_output(&mut self) -> usize {
        let mut dropped = 0;
        for frame in &mut self.frames {
            if frame.is_waiting_output() {
                frame.status.remove(FrameStatus::NEEDED_FOR_OUTPUT);
                dropped += 1;
            }
        }
        dropped
    }
}
