//! 解码流程: 读取输入, 驱动解码器, 写出 I420 并汇总统计.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use log::{debug, info, warn};
use serde::Serialize;

use avcdec_codec::{DecodeStats, DecoderConfig, OutputPicture, StreamDecoder};

pub(crate) struct DecodeOptions {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub config: DecoderConfig,
    pub max_frames: Option<u64>,
    pub overwrite: bool,
}

/// 解码结果汇总, `--stats-json` 的输出内容
#[derive(Debug, Serialize)]
pub(crate) struct DecodeSummary {
    pub input: String,
    pub output: Option<String>,
    /// 裁剪后的显示尺寸, 未激活任何序列时为 0
    pub width: u32,
    pub height: u32,
    pub profile_idc: u8,
    pub level_idc: u8,
    /// 样本宽高比, 如 "1/1"
    pub sar: String,
    /// VUI 帧率, 码流未给出时为 None
    pub frame_rate: Option<f64>,
    pub frames_written: u64,
    pub bytes_written: u64,
    /// 达到 --frames 上限后提前结束
    pub stopped_early: bool,
    pub stats: DecodeStats,
}

/// 读取解码器配置; 未指定文件时使用默认配置
pub(crate) fn load_config(path: Option<&Path>) -> anyhow::Result<DecoderConfig> {
    let Some(path) = path else {
        return Ok(DecoderConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("无法读取配置文件 '{}'", path.display()))?;
    let config: DecoderConfig = serde_json::from_str(&text)
        .with_context(|| format!("配置文件格式错误 '{}'", path.display()))?;
    debug!("解码配置: {:?}", config);
    Ok(config)
}

/// 回调提前终止的原因
enum Stop {
    FrameLimit,
    Write(io::Error),
}

/// 逐帧写出裁剪后的 I420 数据
struct FrameSink {
    writer: Option<BufWriter<File>>,
    scratch: Vec<u8>,
    max_frames: Option<u64>,
    frames_written: u64,
    bytes_written: u64,
}

impl FrameSink {
    fn accept(&mut self, pic: &OutputPicture<'_>) -> ControlFlow<Stop> {
        if self.max_frames.is_some_and(|max| self.frames_written >= max) {
            return ControlFlow::Break(Stop::FrameLimit);
        }
        self.scratch.clear();
        pic.write_cropped_i420(&mut self.scratch);
        if let Some(writer) = self.writer.as_mut()
            && let Err(e) = writer.write_all(&self.scratch)
        {
            return ControlFlow::Break(Stop::Write(e));
        }
        self.frames_written += 1;
        self.bytes_written += self.scratch.len() as u64;
        debug!(
            "帧 #{}: poc={} pic_id={} idr={} 隐藏宏块={}",
            self.frames_written, pic.poc, pic.pic_id, pic.is_idr, pic.num_err_mbs
        );
        if pic.num_err_mbs > 0 {
            warn!("帧 poc={} 有 {} 个宏块被隐藏", pic.poc, pic.num_err_mbs);
        }
        ControlFlow::Continue(())
    }
}

pub(crate) fn run_decode(options: &DecodeOptions) -> anyhow::Result<DecodeSummary> {
    if let Some(output) = &options.output
        && !options.overwrite
        && output.exists()
    {
        bail!("输出文件已存在 '{}', 使用 -y 覆盖", output.display());
    }

    let data = std::fs::read(&options.input)
        .with_context(|| format!("无法打开输入文件 '{}'", options.input.display()))?;
    info!("输入 {} 字节", data.len());

    let writer = match &options.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("无法创建输出文件 '{}'", path.display()))?,
        )),
        None => None,
    };

    let mut sink = FrameSink {
        writer,
        scratch: Vec::new(),
        max_frames: options.max_frames,
        frames_written: 0,
        bytes_written: 0,
    };
    let mut accept = |pic: &OutputPicture<'_>| sink.accept(pic);

    let mut decoder = StreamDecoder::new(options.config.clone());
    let flow = match decoder.decode_annex_b(&data, &mut accept) {
        ControlFlow::Continue(()) => decoder.finish(&mut accept),
        stop => stop,
    };
    let stopped_early = match flow {
        ControlFlow::Continue(()) => false,
        ControlFlow::Break(Stop::FrameLimit) => {
            info!("已达到帧数上限 {:?}", options.max_frames);
            true
        }
        ControlFlow::Break(Stop::Write(e)) => return Err(e).context("写入输出文件失败"),
    };

    if let Some(writer) = sink.writer.as_mut() {
        writer.flush().context("写入输出文件失败")?;
    }

    let seq_info = decoder.decoder().sequence_info();
    if let Some(seq) = &seq_info {
        info!(
            "序列: {}x{} (编码 {}x{}), profile={} level={} SAR={} 帧率={}",
            seq.crop.width,
            seq.crop.height,
            seq.coded_width,
            seq.coded_height,
            seq.profile_idc,
            seq.level_idc,
            seq.sar,
            seq.frame_rate.map_or_else(|| "未知".to_string(), |r| format!("{:.3}", r.to_f64())),
        );
    }
    let stats = decoder.stats().clone();
    if stats.failures > 0 || stats.memory_failures > 0 {
        warn!(
            "解码过程中 {} 个 NAL 失败, {} 次内存分配失败",
            stats.failures, stats.memory_failures
        );
    }

    Ok(DecodeSummary {
        input: options.input.display().to_string(),
        output: options.output.as_ref().map(|p| p.display().to_string()),
        width: seq_info.as_ref().map_or(0, |i| i.crop.width),
        height: seq_info.as_ref().map_or(0, |i| i.crop.height),
        profile_idc: seq_info.as_ref().map_or(0, |i| i.profile_idc),
        level_idc: seq_info.as_ref().map_or(0, |i| i.level_idc),
        sar: seq_info.as_ref().map_or_else(String::new, |i| i.sar.to_string()),
        frame_rate: seq_info.as_ref().and_then(|i| i.frame_rate).map(|r| r.to_f64()),
        frames_written: sink.frames_written,
        bytes_written: sink.bytes_written,
        stopped_early,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use avcdec_core::BitWriter;

    fn nal(header: u8, rbsp: &[u8]) -> Vec<u8> {
        let mut out = vec![0, 0, 0, 1, header];
        let mut zeros = 0;
        for &byte in rbsp {
            if zeros >= 2 && byte <= 3 {
                out.push(0x03);
                zeros = 0;
            }
            out.push(byte);
            zeros = if byte == 0 { zeros + 1 } else { 0 };
        }
        out
    }

    /// 32x16 (裁剪为 32x14), `pictures` 幅全 DC 帧内 IDR
    fn dc_stream(pictures: u32) -> Vec<u8> {
        let mut stream = Vec::new();
        let mut bw = BitWriter::new();
        bw.write_bits(66, 8);
        bw.write_bits(0, 8);
        bw.write_bits(30, 8);
        bw.write_ue(0);
        bw.write_ue(0); // log2_max_frame_num = 4
        bw.write_ue(2); // poc_type
        bw.write_ue(1);
        bw.write_flag(false);
        bw.write_ue(1); // 2 宏块宽
        bw.write_ue(0); // 1 宏块高
        bw.write_flag(true);
        bw.write_flag(true);
        bw.write_flag(true); // frame_cropping
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_ue(1); // 底部裁剪 2 行
        bw.write_flag(false);
        bw.write_trailing_bits();
        stream.extend(nal(0x67, &bw.finish()));

        let mut bw = BitWriter::new();
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_flag(false);
        bw.write_flag(false);
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_flag(false);
        bw.write_bits(0, 2);
        bw.write_se(0);
        bw.write_se(0);
        bw.write_se(0);
        bw.write_flag(false);
        bw.write_flag(false);
        bw.write_flag(false);
        bw.write_trailing_bits();
        stream.extend(nal(0x68, &bw.finish()));

        for idr_pic_id in 0..pictures {
            let mut bw = BitWriter::new();
            bw.write_ue(0);
            bw.write_ue(7);
            bw.write_ue(0);
            bw.write_bits(0, 4);
            bw.write_ue(idr_pic_id);
            bw.write_flag(false);
            bw.write_flag(false);
            bw.write_se(0);
            for _ in 0..2 {
                bw.write_ue(3);
                bw.write_ue(0);
                bw.write_se(0);
                bw.write_bit(1);
            }
            bw.write_trailing_bits();
            stream.extend(nal(0x65, &bw.finish()));
        }
        stream
    }

    fn options(dir: &Path, pictures: u32) -> DecodeOptions {
        let input = dir.join("input.264");
        std::fs::write(&input, dc_stream(pictures)).unwrap();
        DecodeOptions {
            input,
            output: Some(dir.join("out.yuv")),
            config: DecoderConfig::default(),
            max_frames: None,
            overwrite: false,
        }
    }

    #[test]
    fn test_decode_writes_cropped_i420() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), 3);
        let summary = run_decode(&opts).expect("解码应成功");

        assert_eq!((summary.width, summary.height), (32, 14), "应使用裁剪后的尺寸");
        assert_eq!(summary.frames_written, 3);
        let frame_size = 32 * 14 + 2 * 16 * 7;
        assert_eq!(summary.bytes_written, 3 * frame_size as u64);
        assert!(!summary.stopped_early);

        let written = std::fs::read(dir.path().join("out.yuv")).unwrap();
        assert_eq!(written.len(), 3 * frame_size);
        assert!(written.iter().all(|&v| v == 128), "全 DC 图像应为中灰");
    }

    #[test]
    fn test_frame_limit_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let opts = DecodeOptions {
            max_frames: Some(2),
            ..options(dir.path(), 4)
        };
        let summary = run_decode(&opts).unwrap();
        assert_eq!(summary.frames_written, 2);
        assert!(summary.stopped_early, "达到上限应标记提前结束");
    }

    #[test]
    fn test_existing_output_requires_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), 1);
        std::fs::write(dir.path().join("out.yuv"), b"old").unwrap();
        let err = run_decode(&opts).unwrap_err();
        assert!(err.to_string().contains("已存在"), "错误信息: {err}");

        let opts = DecodeOptions {
            overwrite: true,
            ..opts
        };
        assert_eq!(run_decode(&opts).unwrap().frames_written, 1);
    }

    #[test]
    fn test_missing_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let opts = DecodeOptions {
            input: dir.path().join("missing.264"),
            output: None,
            config: DecoderConfig::default(),
            max_frames: None,
            overwrite: false,
        };
        let err = run_decode(&opts).unwrap_err();
        assert!(format!("{err:#}").contains("无法打开输入文件"));
    }

    #[test]
    fn test_load_config_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{"deblocking": false, "max_dpb_frames": 2}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert!(!config.deblocking);
        assert_eq!(config.max_dpb_frames, Some(2));
        assert!(config.conceal_errors, "缺省字段取默认值");

        std::fs::write(&path, "{not json").unwrap();
        assert!(load_config(Some(&path)).is_err());
        assert_eq!(load_config(None).unwrap(), DecoderConfig::default());
    }
}
