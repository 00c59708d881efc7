//! avcdec 解码性能基准测试.
//!
//! 覆盖比特流读取、Exp-Golomb 解码与整帧解码 (帧内 DC, P_Skip) 路径.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use avcdec::codec::parsers::h264::{read_ue, split_annex_b};
use avcdec::codec::DecoderConfig;
use avcdec::core::{BitReader, BitWriter};

const MB_WIDTH: u32 = 40;
const MB_HEIGHT: u32 = 30;

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

/// 640x480 码流: 一幅全 DC 帧内 IDR, 其后 `p_frames` 幅全 P_Skip 图像
fn build_stream(p_frames: u32) -> Vec<u8> {
    let mut stream = Vec::new();

    let mut bw = BitWriter::new();
    bw.write_bits(66, 8);
    bw.write_bits(0xC0, 8);
    bw.write_bits(30, 8);
    bw.write_ue(0); // sps_id
    bw.write_ue(4); // log2_max_frame_num = 8
    bw.write_ue(2); // poc_type
    bw.write_ue(1); // max_num_ref_frames
    bw.write_flag(false);
    bw.write_ue(MB_WIDTH - 1);
    bw.write_ue(MB_HEIGHT - 1);
    bw.write_flag(true);
    bw.write_flag(true);
    bw.write_flag(false);
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
    bw.write_flag(true); // deblocking_filter_control_present
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_trailing_bits();
    stream.extend(nal(0x68, &bw.finish()));

    let mut bw = BitWriter::new();
    bw.write_ue(0);
    bw.write_ue(7);
    bw.write_ue(0);
    bw.write_bits(0, 8); // frame_num
    bw.write_ue(0); // idr_pic_id
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_se(0);
    bw.write_ue(0); // disable_deblocking_filter_idc
    bw.write_se(0);
    bw.write_se(0);
    for _ in 0..MB_WIDTH * MB_HEIGHT {
        bw.write_ue(3);
        bw.write_ue(0);
        bw.write_se(0);
        bw.write_bit(1);
    }
    bw.write_trailing_bits();
    stream.extend(nal(0x65, &bw.finish()));

    for frame_num in 1..=p_frames {
        let mut bw = BitWriter::new();
        bw.write_ue(0);
        bw.write_ue(5);
        bw.write_ue(0);
        bw.write_bits(frame_num % 256, 8);
        bw.write_flag(false); // num_ref_idx_active_override
        bw.write_flag(false); // ref_pic_list_modification_flag_l0
        bw.write_flag(false); // adaptive_ref_pic_marking_mode
        bw.write_se(0);
        bw.write_ue(0);
        bw.write_se(0);
        bw.write_se(0);
        bw.write_ue(MB_WIDTH * MB_HEIGHT);
        bw.write_trailing_bits();
        stream.extend(nal(0x41, &bw.finish()));
    }
    stream
}

fn bench_exp_golomb(c: &mut Criterion) {
    c.bench_function("exp_golomb_read_ue_4096", |b| {
        let mut bw = BitWriter::new();
        for v in 0..4096u32 {
            bw.write_ue(v * 7);
        }
        let data = bw.finish();
        b.iter(|| {
            let mut br = BitReader::new(black_box(&data));
            let mut sum = 0u64;
            for _ in 0..4096 {
                sum += u64::from(read_ue(&mut br).unwrap_or(0));
            }
            black_box(sum)
        });
    });
}

fn bench_split_annex_b(c: &mut Criterion) {
    let stream = build_stream(30);
    c.bench_function("split_annex_b_640x480_31_frames", |b| {
        b.iter(|| black_box(split_annex_b(black_box(&stream)).len()));
    });
}

fn bench_decode_intra_idr(c: &mut Criterion) {
    let stream = build_stream(0);
    c.bench_function("decode_intra_dc_idr_640x480", |b| {
        b.iter(|| {
            let (frames, _) = avcdec::decode_to_frames(black_box(&stream), DecoderConfig::default());
            black_box(frames.len())
        });
    });
}

fn bench_decode_p_skip(c: &mut Criterion) {
    let stream = build_stream(30);
    c.bench_function("decode_p_skip_640x480_31_frames", |b| {
        b.iter(|| {
            let (frames, _) = avcdec::decode_to_frames(black_box(&stream), DecoderConfig::default());
            black_box(frames.len())
        });
    });
}

criterion_group!(
    benches,
    bench_exp_golomb,
    bench_split_annex_b,
    bench_decode_intra_idr,
    bench_decode_p_skip
);
criterion_main!(benches);
