//! 解码器实现.

pub mod h264;
