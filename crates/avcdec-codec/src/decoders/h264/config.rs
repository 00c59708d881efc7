//! 解码器运行配置.

use serde::{Deserialize, Serialize};

/// H.264 解码器配置, 可由 JSON 反序列化, 缺省字段取默认值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// 是否执行环路去块滤波
    pub deblocking: bool,
    /// 是否对未解码宏块做错误隐藏 (否则填充中灰)
    pub conceal_errors: bool,
    /// DPB 帧数上限, 覆盖码流推导出的 dpb_size
    pub max_dpb_frames: Option<usize>,
    /// 按解码顺序输出, 不做 POC 重排
    pub output_in_decode_order: bool,
    /// 第一个 IDR 之前的非 IDR 条带直接跳过
    pub wait_for_idr: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            deblocking: true,
            conceal_errors: true,
            max_dpb_frames: None,
            output_in_decode_order: false,
            wait_for_idr: true,
        }
    }
}
