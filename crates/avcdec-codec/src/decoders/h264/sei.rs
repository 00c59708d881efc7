//! SEI 消息解析. 消息只记录到日志, 不影响解码.

use avcdec_core::bitreader::BitReader;
use avcdec_core::{AvcError, AvcResult};

use crate::parsers::h264::read_ue;

const SEI_BUFFERING_PERIOD: u32 = 0;
const SEI_PIC_TIMING: u32 = 1;
const SEI_USER_DATA_UNREGISTERED: u32 = 5;
const SEI_RECOVERY_POINT: u32 = 6;

/// 一条 SEI 消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeiMessage {
    /// buffering_period, 只解析 SPS id
    BufferingPeriod { seq_parameter_set_id: u32, raw: Vec<u8> },
    /// pic_timing, 语法依赖 VUI HRD 参数, 保留原始字节
    PicTiming { raw: Vec<u8> },
    UserDataUnregistered { uuid: [u8; 16], payload: Vec<u8> },
    RecoveryPoint {
        recovery_frame_cnt: u32,
        exact_match: bool,
        broken_link: bool,
        changing_slice_group_idc: u8,
    },
    Unknown { payload_type: u32, data: Vec<u8> },
}

impl SeiMessage {
    /// payloadType 值
    pub fn payload_type(&self) -> u32 {
        match self {
            Self::BufferingPeriod { .. } => SEI_BUFFERING_PERIOD,
            Self::PicTiming { .. } => SEI_PIC_TIMING,
            Self::UserDataUnregistered { .. } => SEI_USER_DATA_UNREGISTERED,
            Self::RecoveryPoint { .. } => SEI_RECOVERY_POINT,
            Self::Unknown { payload_type, .. } => *payload_type,
        }
    }
}

/// 按字节前进的 SEI 游标
struct SeiCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SeiCursor<'a> {
    /// 剩余部分只有 rbsp_trailing_bits
    fn at_trailing_bits(&self) -> bool {
        match self.data.get(self.pos..) {
            None | Some([]) => true,
            Some([first, rest @ ..]) => *first == 0x80 && rest.iter().all(|&b| b == 0),
        }
    }

    /// 0xFF 累加编码的 payloadType / payloadSize
    fn read_ff_coded(&mut self, what: &str) -> AvcResult<u32> {
        let mut value = 0u32;
        loop {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| AvcError::InvalidData(format!("H264: SEI {} 截断", what)))?;
            self.pos += 1;
            value = value
                .checked_add(u32::from(byte))
                .ok_or_else(|| AvcError::InvalidData(format!("H264: SEI {} 溢出", what)))?;
            if byte != 0xFF {
                return Ok(value);
            }
        }
    }

    fn take(&mut self, len: usize) -> AvcResult<&'a [u8]> {
        let remain = self.data.len().saturating_sub(self.pos);
        if len > remain {
            return Err(AvcError::InvalidData(format!(
                "H264: SEI payload 截断, size={}, remain={}",
                len, remain
            )));
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }
}

/// 解析 SEI RBSP 中的全部消息
pub fn parse_sei_rbsp(rbsp: &[u8]) -> AvcResult<Vec<SeiMessage>> {
    let mut cursor = SeiCursor { data: rbsp, pos: 0 };
    let mut messages = Vec::new();
    while !cursor.at_trailing_bits() {
        let payload_type = cursor.read_ff_coded("payload_type")?;
        let payload_size = cursor.read_ff_coded("payload_size")? as usize;
        let payload = cursor.take(payload_size)?;
        messages.push(parse_payload(payload_type, payload)?);
    }
    Ok(messages)
}

fn parse_payload(payload_type: u32, payload: &[u8]) -> AvcResult<SeiMessage> {
    let message = match payload_type {
        SEI_BUFFERING_PERIOD => SeiMessage::BufferingPeriod {
            seq_parameter_set_id: read_ue(&mut BitReader::new(payload))?,
            raw: payload.to_vec(),
        },
        SEI_PIC_TIMING => SeiMessage::PicTiming {
            raw: payload.to_vec(),
        },
        SEI_USER_DATA_UNREGISTERED => {
            let (uuid, rest) = payload.split_first_chunk::<16>().ok_or_else(|| {
                AvcError::InvalidData(format!(
                    "H264: SEI user_data_unregistered 截断, len={}",
                    payload.len()
                ))
            })?;
            SeiMessage::UserDataUnregistered {
                uuid: *uuid,
                payload: rest.to_vec(),
            }
        }
        SEI_RECOVERY_POINT => {
            let mut br = BitReader::new(payload);
            SeiMessage::RecoveryPoint {
                recovery_frame_cnt: read_ue(&mut br)?,
                exact_match: br.read_flag()?,
                broken_link: br.read_flag()?,
                changing_slice_group_idc: br.read_bits(2)? as u8,
            }
        }
        _ => SeiMessage::Unknown {
            payload_type,
            data: payload.to_vec(),
        },
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_point_and_user_data() {
        let mut rbsp = vec![SEI_RECOVERY_POINT as u8, 1, 0b1_1_0_01_000];
        rbsp.extend_from_slice(&[SEI_USER_DATA_UNREGISTERED as u8, 18]);
        rbsp.extend((0..16).map(|i| i as u8));
        rbsp.extend_from_slice(&[0xAB, 0xCD, 0x80]);

        let messages = parse_sei_rbsp(&rbsp).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            SeiMessage::RecoveryPoint {
                recovery_frame_cnt: 0,
                exact_match: true,
                broken_link: false,
                changing_slice_group_idc: 1,
            }
        );
        match &messages[1] {
            SeiMessage::UserDataUnregistered { uuid, payload } => {
                assert_eq!(uuid[15], 15);
                assert_eq!(payload, &vec![0xAB, 0xCD]);
            }
            other => panic!("消息类型错误: {:?}", other),
        }
    }

    #[test]
    fn test_ff_coded_type_and_unknown_payload() {
        // payloadType = 255 + 10
        let rbsp = [0xFF, 10, 2, 0x11, 0x22, 0x80];
        let messages = parse_sei_rbsp(&rbsp).unwrap();
        assert_eq!(messages[0].payload_type(), 265);
        assert_eq!(
            messages[0],
            SeiMessage::Unknown {
                payload_type: 265,
                data: vec![0x11, 0x22],
            }
        );
    }

    #[test]
    fn test_truncated_payload_rejected() {
        assert!(parse_sei_rbsp(&[SEI_PIC_TIMING as u8, 8, 0x00]).is_err());
        assert!(parse_sei_rbsp(&[SEI_USER_DATA_UNREGISTERED as u8, 2, 1, 2, 0x80]).is_err());
    }

    #[test]
    fn test_buffering_period_sps_id() {
        // ue(2) = 011, 后跟填充
        let rbsp = [SEI_BUFFERING_PERIOD as u8, 1, 0b0110_0000, 0x80];
        let messages = parse_sei_rbsp(&rbsp).unwrap();
        assert!(matches!(
            messages[0],
            SeiMessage::BufferingPeriod {
                seq_parameter_set_id: 2,
                ..
            }
        ));
    }
}
