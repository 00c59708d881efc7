//! avcdec-cli - H.264 基线码流解码命令行工具
//!
//! 读取 Annex B 格式的 .264 文件, 按显示顺序输出裁剪后的原始 I420 帧.

mod decode;
mod logging;

use clap::Parser;
use std::path::PathBuf;
use std::process;

use decode::{DecodeOptions, load_config, run_decode};

#[derive(Parser, Debug)]
#[command(name = "avcdec-cli", version, about = "纯 Rust H.264 基线解码工具")]
struct Cli {
    /// 输入文件路径 (Annex B 字节流)
    input: PathBuf,

    /// 输出原始 I420 文件路径, 省略时只解码不写出
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 解码器配置 (JSON), 缺省字段取默认值
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 解码结束后向 stdout 输出 JSON 统计
    #[arg(long)]
    stats_json: bool,

    /// 最多输出的帧数
    #[arg(short = 'n', long)]
    frames: Option<u64>,

    /// 覆盖输出文件
    #[arg(short = 'y', long)]
    overwrite: bool,

    /// 日志级别 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    logging::init("avcdec-cli", cli.verbose);

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("错误: {e:#}");
            process::exit(1);
        }
    };

    eprintln!(
        "avcdec 版本 {} -- 纯 Rust H.264 基线解码工具",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("输入: {}", cli.input.display());
    if let Some(output) = &cli.output {
        eprintln!("输出: {}", output.display());
    }

    let options = DecodeOptions {
        input: cli.input,
        output: cli.output,
        config,
        max_frames: cli.frames,
        overwrite: cli.overwrite,
    };
    let summary = match run_decode(&options) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("错误: {e:#}");
            process::exit(1);
        }
    };

    eprintln!(
        "完成: {} 帧 ({}x{}), {:.2} MB, 隐藏宏块 {}, 失败 NAL {}",
        summary.frames_written,
        summary.width,
        summary.height,
        summary.bytes_written as f64 / (1024.0 * 1024.0),
        summary.stats.concealed_mbs,
        summary.stats.failures,
    );

    if cli.stats_json {
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("错误: 统计序列化失败: {e}");
                process::exit(1);
            }
        }
    }
}
