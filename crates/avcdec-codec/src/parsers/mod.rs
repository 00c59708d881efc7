//! 码流解析器.
//!
//! 负责 NAL 单元分割与序列级语法解析, 不涉及像素重建.

pub mod h264;
