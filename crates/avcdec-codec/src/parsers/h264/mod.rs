//! H.264/AVC 码流解析器.
//!
//! 提供对 H.264 Annex B 码流的解析能力:
//! - NAL 单元分割与类型识别, EBSP → RBSP 原地转换
//! - Exp-Golomb 变长码读取
//! - SPS (Sequence Parameter Set) 解析, 含 VUI/HRD 与级别表

pub mod exp_golomb;
pub mod nal;
pub mod sps;

pub use exp_golomb::{read_se, read_te, read_ue};
pub use nal::{NalUnit, NalUnitType, ebsp_to_rbsp_in_place, parse_nal_header, split_annex_b};
pub use sps::{HrdParameters, Sps, Vui, max_dpb_mbs, parse_sps};
