//! 统一错误类型定义.
//!
//! 解码引擎各模块共用的错误类型, 公共接口再将其映射为解码状态码.

use thiserror::Error;

/// avcdec 统一错误类型
#[derive(Debug, Error)]
pub enum AvcError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 码流声明了不支持的特性 (B 条带, CABAC, 场编码等)
    #[error("不支持的特性: {0}")]
    Unsupported(String),

    /// 无效数据 (损坏的码流, 越界的语法元素)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 宿主分配回调失败
    #[error("内存分配失败: {0}")]
    OutOfMemory(String),

    /// 比特流读取越过 RBSP 末尾
    #[error("已到达比特流末尾")]
    Eof,

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

impl AvcError {
    /// 是否为资源类失败 (映射为 memory-fail 状态)
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory(_))
    }
}

/// avcdec 统一 Result 类型
pub type AvcResult<T> = Result<T, AvcError>;
