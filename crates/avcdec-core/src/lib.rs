//! # avcdec-core
//!
//! avcdec 的基础设施库, 提供统一错误类型、比特流读写器和有理数类型.
//!
//! 解码引擎与命令行工具共用本 crate, 不依赖任何编解码细节.

pub mod bitreader;
pub mod bitwriter;
pub mod error;
pub mod rational;

// 重导出常用类型
pub use bitreader::BitReader;
pub use bitwriter::BitWriter;
pub use error::{AvcError, AvcResult};
pub use rational::Rational;
