//! 输出图像: 从 DPB 选帧, 借出像素平面给宿主.

use super::*;

/// 一幅可输出的解码图像, 借用解码器内部的帧存储直到下一次调用
#[derive(Debug, Clone, Copy)]
pub struct OutputPicture<'a> {
    pub luma: &'a [u8],
    pub cb: &'a [u8],
    pub cr: &'a [u8],
    pub luma_stride: usize,
    pub chroma_stride: usize,
    /// 编码宽度 (宏块对齐, 未裁剪)
    pub width: u32,
    pub height: u32,
    pub crop: CropRect,
    /// PicOrderCnt, 显示顺序
    pub poc: i32,
    /// 解码顺序序号
    pub decode_order: u64,
    /// 宿主在 `decode_nal` 时传入的图像标识
    pub pic_id: u32,
    pub is_idr: bool,
    /// 被错误隐藏的宏块数
    pub num_err_mbs: u32,
    /// 该帧不再作为参考, 宿主可以立即回收对应图像
    pub reclaimable: bool,
}

impl OutputPicture<'_> {
    /// 按裁剪矩形输出 I420 平面数据 (Y, U, V 依次排列)
    pub fn write_cropped_i420(&self, out: &mut Vec<u8>) {
        let crop = self.crop;
        let (left, top) = (crop.left as usize, crop.top as usize);
        let (width, height) = (crop.width as usize, crop.height as usize);
        out.reserve(width * height * 3 / 2);
        copy_rect(out, self.luma, self.luma_stride, left, top, width, height);
        for plane in [self.cb, self.cr] {
            copy_rect(
                out,
                plane,
                self.chroma_stride,
                left / 2,
                top / 2,
                width.div_ceil(2),
                height.div_ceil(2),
            );
        }
    }
}

fn copy_rect(out: &mut Vec<u8>, plane: &[u8], stride: usize, x: usize, y: usize, w: usize, h: usize) {
    for row in plane.chunks(stride).skip(y).take(h) {
        if let Some(samples) = row.get(x..x + w) {
            out.extend_from_slice(samples);
        }
    }
}

impl H264Decoder {
    /// 取下一幅可输出的图像.
    ///
    /// `flush == false` 时只返回重排窗口允许输出的图像; 码流结束后传 true
    /// 取走全部剩余帧. 返回 None 表示当前没有可输出的帧.
    pub fn next_output(&mut self, flush: bool) -> Option<OutputPicture<'_>> {
        let idx = self.dpb.output_candidate(flush)?;
        let crop = self.sequence.as_ref().map(|seq| seq.crop);
        let frame = self.dpb.take_output(self.host.as_mut(), idx)?;
        let buf = frame.buf.as_ref()?;

        let (width, height) = (buf.width() as u32, buf.height() as u32);
        let crop = crop
            .filter(|c| c.left + c.width <= width && c.top + c.height <= height)
            .unwrap_or(CropRect {
                left: 0,
                top: 0,
                width,
                height,
            });
        debug!(
            "H264: 输出图像 poc={} decode_order={} pic_id={}",
            frame.poc, frame.decode_order, frame.pic_id
        );
        Some(OutputPicture {
            luma: buf.luma(),
            cb: buf.chroma(0),
            cr: buf.chroma(1),
            luma_stride: buf.width(),
            chroma_stride: buf.width() / 2,
            width,
            height,
            crop,
            poc: frame.poc,
            decode_order: frame.decode_order,
            pic_id: frame.pic_id,
            is_idr: frame.is_idr,
            num_err_mbs: frame.num_err_mbs,
            reclaimable: !frame.is_reference(),
        })
    }
}
