//! 宿主能力接口: 帧内存分配, 输出图像绑定, 日志.
//!
//! 解码器只通过 [`DecoderHost`] 与外部环境交互, 所有方法都有基于堆内存
//! 和 `log` 门面的默认实现.

/// 宿主能力接口
pub trait DecoderHost: Send {
    /// 即将分配 `frame_count` 个帧, 每帧 `mbs_per_frame` 个宏块; 返回 false 表示拒绝
    fn allocate_frame_pool(&mut self, mbs_per_frame: usize, frame_count: usize) -> bool {
        let _ = (mbs_per_frame, frame_count);
        true
    }

    /// 分配至少 `size` 字节容量的缓冲区, 失败返回 None
    fn allocate(&mut self, size: usize) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).ok()?;
        Some(buf)
    }

    /// 归还由 [`DecoderHost::allocate`] 分配的缓冲区
    fn free(&mut self, buf: Vec<u8>) {
        drop(buf);
    }

    /// 帧存储 `frame_index` 开始承载宿主图像 `pic_id`
    fn bind_frame(&mut self, frame_index: usize, pic_id: u32) {
        let _ = (frame_index, pic_id);
    }

    /// 帧存储 `frame_index` 不再承载任何宿主图像
    fn unbind_frame(&mut self, frame_index: usize) {
        let _ = frame_index;
    }

    /// 解码器级别的日志输出
    fn log(&mut self, level: log::Level, message: &str) {
        log::log!(level, "{}", message);
    }
}

/// 默认宿主: 堆内存 + `log` 门面
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHost;

impl DecoderHost for DefaultHost {}
