//! 端到端解码测试: Annex B 字节流 → 显示顺序的 I420 帧.

mod common;

use std::ops::ControlFlow;

use avcdec::codec::parsers::h264::{NalUnitType, split_annex_b};
use avcdec::codec::{DecodeStatus, DecoderConfig, H264Decoder, StreamDecoder};
use avcdec::decode_to_frames;

use common::*;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_all_dc_intra_idr_is_mid_grey() {
    init_logger();
    let mut sb = StreamBuilder::new(16, 16);
    let count = sb.mb_count();
    sb.sps().pps(false).idr_dc_slice(0, 0, count);
    let stream = sb.finish();

    let (frames, stats) = decode_to_frames(&stream, DecoderConfig::default());
    assert_eq!(frames.len(), 1, "应输出一幅图像");
    assert_eq!(stats.pictures_decoded, 1, "应只完成一幅图像");
    let frame = &frames[0];
    assert_eq!((frame.width, frame.height), (256, 256));
    assert!(frame.is_idr);
    assert_eq!(frame.num_err_mbs, 0);
    assert!(frame.luma().iter().all(|&v| v == 128), "全 DC 预测且无残差时亮度应全为 128");
    assert!(frame.data.iter().all(|&v| v == 128), "色度同样应为 128");
}

#[test]
fn test_pcm_and_skip_frames_reconstruct_exactly() {
    init_logger();
    let mut sb = StreamBuilder::new(3, 2);
    sb.sps()
        .pps(false)
        .idr_pcm_picture(0, gradient)
        .p_skip_picture(1, 4, 2)
        .p_skip_picture(2, 2, 0)
        .p_skip_picture(2, 8, 2);
    let stream = sb.finish();

    let (frames, stats) = decode_to_frames(&stream, DecoderConfig::default());
    let pocs: Vec<i32> = frames.iter().map(|f| f.poc).collect();
    assert_eq!(pocs, vec![0, 2, 4, 8], "输出应按 POC 升序");

    let expected = expected_i420(48, 32, gradient);
    for frame in &frames {
        assert_eq!(frame.data, expected, "poc={} 重建数据错误", frame.poc);
    }
    assert_eq!(stats.pictures_output, 4);
    assert_eq!(stats.idr_pictures, 1);
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.concealed_mbs, 0);
}

#[test]
fn test_non_vcl_nal_units_are_ignored() {
    init_logger();
    let mut sb = StreamBuilder::new(2, 2);
    sb.aud()
        .sps()
        .pps(false)
        .sei_user_data(b"avcd")
        .aud()
        .idr_pcm_picture(0, gradient)
        .aud()
        .p_skip_picture(1, 2, 2)
        .end_of_stream();
    let stream = sb.finish();

    let nal_types: Vec<NalUnitType> = split_annex_b(&stream).iter().map(|n| n.nal_type).collect();
    assert_eq!(nal_types.len(), 9);
    assert_eq!(nal_types[3], NalUnitType::Sei);

    let (frames, stats) = decode_to_frames(&stream, DecoderConfig::default());
    assert_eq!(frames.len(), 2);
    assert_eq!(stats.nal_units, 9);
    assert_eq!(stats.failures, 0, "AUD/SEI/EOS 不应导致失败");
}

#[test]
fn test_missing_slice_is_concealed() {
    init_logger();
    let mut sb = StreamBuilder::new(4, 4);
    // IDR 只发送前 10 个宏块, 剩余 6 个丢失
    sb.sps().pps(false).idr_dc_slice(0, 0, 10).p_skip_picture(1, 2, 2);
    let stream = sb.finish();

    let (frames, stats) = decode_to_frames(&stream, DecoderConfig::default());
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].num_err_mbs, 6, "丢失的宏块应计入 num_err_mbs");
    assert_eq!(frames[1].num_err_mbs, 0);
    assert_eq!(stats.concealed_mbs, 6);
    assert_eq!(stats.resubmissions, 1, "新图像到达时旧图像完成, 同一 NAL 需重新提交");
}

#[test]
fn test_cabac_stream_fails_cleanly() {
    init_logger();
    let mut sb = StreamBuilder::new(2, 2);
    sb.sps().pps(true).idr_dc_slice(0, 0, 4);
    let stream = sb.finish();

    let (frames, stats) = decode_to_frames(&stream, DecoderConfig::default());
    assert!(frames.is_empty(), "CABAC 码流不应产生输出");
    assert_eq!(stats.failures, 2, "CABAC PPS 与随后引用它的条带都应失败");
}

#[test]
fn test_truncated_and_corrupted_slices_do_not_panic() {
    init_logger();
    let mut sb = StreamBuilder::new(3, 3);
    let count = sb.mb_count();
    sb.sps().pps(false).idr_dc_slice(0, 0, count);
    let valid = sb.finish();
    let nalus = split_annex_b(&valid);
    let slice = &nalus[2].data;

    let mut decoder = H264Decoder::new(DecoderConfig::default());
    for nal in &nalus[..2] {
        assert_eq!(decoder.decode_nal(&nal.data, 0), DecodeStatus::Success);
    }

    // 截断条带的每一个前缀
    for len in 1..slice.len() {
        let _ = decoder.decode_nal(&slice[..len], len as u32);
        while decoder.next_output(false).is_some() {}
    }

    // 伪随机条带负载
    let mut seed = 0x2545_f491_u32;
    for round in 0..200u32 {
        let mut nal = vec![if round % 2 == 0 { 0x65 } else { 0x41 }];
        for _ in 0..(8 + round % 64) {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            nal.push(seed as u8);
        }
        let _ = decoder.decode_nal(&nal, round);
        while decoder.next_output(false).is_some() {}
    }
    decoder.flush();
    while decoder.next_output(true).is_some() {}
}

#[test]
fn test_stream_decoder_stops_when_sink_breaks() {
    init_logger();
    let mut sb = StreamBuilder::new(2, 2);
    sb.sps()
        .pps(false)
        .idr_pcm_picture(0, gradient)
        .p_skip_picture(1, 2, 2)
        .p_skip_picture(2, 4, 2);
    let stream = sb.finish();

    let mut decoder = StreamDecoder::new(DecoderConfig {
        output_in_decode_order: true,
        ..DecoderConfig::default()
    });
    let mut seen = Vec::new();
    let mut sink = |pic: &avcdec::codec::OutputPicture<'_>| {
        seen.push(pic.poc);
        if seen.len() == 2 {
            ControlFlow::Break(pic.poc)
        } else {
            ControlFlow::Continue(())
        }
    };
    let flow = decoder.decode_annex_b(&stream, &mut sink);
    assert_eq!(flow, ControlFlow::Break(2), "第二帧输出后应停止");
    assert_eq!(seen, vec![0, 2]);
    assert_eq!(decoder.stats().nal_units, 4, "停止后不应再提交后续 NAL");
}
