use crate::parsers::h264::{NalUnitType, Sps, parse_sps};

use super::super::parameter_sets::{ParamSetStore, parse_pps};
use super::super::poc::PocState;
use super::super::slice_parse::{SliceHeader, parse_slice_header};

use super::helpers::*;

struct PocHarness {
    sps_spec: SpsSpec,
    pps_spec: PpsSpec,
    store: ParamSetStore,
    sps: Sps,
    state: PocState,
}

impl PocHarness {
    fn new(sps_spec: SpsSpec) -> Self {
        let pps_spec = PpsSpec::default();
        let sps = parse_sps(&build_sps_rbsp(&sps_spec)).expect("SPS 解析失败");
        let mut store = ParamSetStore::new();
        store.store_sps(sps.clone()).unwrap();
        let pps = parse_pps(&build_pps_rbsp(&pps_spec), &store).unwrap();
        store.store_pps(pps).unwrap();
        Self {
            sps_spec,
            pps_spec,
            store,
            sps,
            state: PocState::new(),
        }
    }

    fn header(&self, slice: &SliceSpec) -> SliceHeader {
        let rbsp = build_slice_header_rbsp(&self.sps_spec, &self.pps_spec, slice);
        let nal_type = if slice.is_idr {
            NalUnitType::SliceIdr
        } else {
            NalUnitType::Slice
        };
        parse_slice_header(&rbsp, nal_type, slice.nal_ref_idc, &self.store).expect("条带头解析失败")
    }

    /// 计算一幅图像的 POC 并更新历史
    fn push(&mut self, slice: &SliceSpec) -> i32 {
        let header = self.header(slice);
        let result = self.state.compute(&header, &self.sps);
        let has_mmco5 = header.dec_ref_pic_marking.has_mmco5();
        self.state.finish_picture(&header, &result, has_mmco5);
        result.pic_order_cnt()
    }
}

#[test]
fn test_type0_msb_wraps_forward() {
    let mut h = PocHarness::new(SpsSpec::default());
    let pocs: Vec<i32> = [
        SliceSpec::idr(0),
        SliceSpec::p(1, 8, 2),
        SliceSpec::p(2, 14, 2),
        SliceSpec::p(3, 2, 2),
        SliceSpec::p(4, 10, 2),
    ]
    .iter()
    .map(|s| h.push(s))
    .collect();
    assert_eq!(pocs, vec![0, 8, 14, 18, 26], "MaxPicOrderCntLsb=16 时 POC 应跨越 LSB 回绕单调递增");
}

#[test]
fn test_type0_non_reference_does_not_update_history() {
    let mut h = PocHarness::new(SpsSpec::default());
    assert_eq!(h.push(&SliceSpec::idr(0)), 0);
    assert_eq!(h.push(&SliceSpec::p(1, 6, 2)), 6);
    // 非参考图像 lsb=14 不进入 prevPicOrderCnt
    assert_eq!(h.push(&SliceSpec::p(2, 14, 0)), 14);
    assert_eq!(h.push(&SliceSpec::p(2, 4, 2)), 4);
}

#[test]
fn test_type0_mmco5_resets_reference_point() {
    let mut h = PocHarness::new(SpsSpec::default());
    assert_eq!(h.push(&SliceSpec::idr(0)), 0);
    let with_mmco5 = SliceSpec {
        mmco: vec![(5, Vec::new())],
        ..SliceSpec::p(1, 14, 2)
    };
    assert_eq!(h.push(&with_mmco5), 14);
    // MMCO5 之后 prevPicOrderCntLsb 为 0, lsb=2 不再被视作回绕
    assert_eq!(h.push(&SliceSpec::p(1, 2, 2)), 2);
}

#[test]
fn test_type1_expected_cycle() {
    let mut h = PocHarness::new(SpsSpec {
        poc_type: 1,
        offset_for_non_ref_pic: -2,
        offset_for_ref_frame: vec![4],
        ..SpsSpec::default()
    });
    assert_eq!(h.push(&SliceSpec::idr(0)), 0);
    assert_eq!(h.push(&SliceSpec::p(1, 0, 2)), 4);
    assert_eq!(h.push(&SliceSpec::p(2, 0, 0)), 2, "非参考图像加 offset_for_non_ref_pic");
    let with_delta = SliceSpec {
        delta_pic_order_cnt0: 1,
        ..SliceSpec::p(2, 0, 2)
    };
    assert_eq!(h.push(&with_delta), 9);
}

#[test]
fn test_type1_empty_cycle() {
    let mut h = PocHarness::new(SpsSpec {
        poc_type: 1,
        offset_for_non_ref_pic: -2,
        ..SpsSpec::default()
    });
    assert_eq!(h.push(&SliceSpec::idr(0)), 0);
    assert_eq!(h.push(&SliceSpec::p(1, 0, 2)), 0, "空循环时 expectedPicOrderCnt 为 0");
    assert_eq!(h.push(&SliceSpec::p(2, 0, 0)), -2);
}

#[test]
fn test_type2_follows_decode_order_across_frame_num_wrap() {
    let mut h = PocHarness::new(SpsSpec {
        poc_type: 2,
        ..SpsSpec::default()
    });
    assert_eq!(h.push(&SliceSpec::idr(0)), 0);
    assert_eq!(h.push(&SliceSpec::p(1, 0, 0)), 1, "非参考图像为 2*FrameNum-1");
    for frame_num in 1..16 {
        assert_eq!(h.push(&SliceSpec::p(frame_num, 0, 2)), 2 * frame_num as i32);
    }
    // frame_num 回绕, FrameNumOffset 增加 MaxFrameNum
    assert_eq!(h.push(&SliceSpec::p(0, 0, 2)), 32);
}

#[test]
fn test_type2_mmco5_resets_frame_num_offset() {
    let mut h = PocHarness::new(SpsSpec {
        poc_type: 2,
        ..SpsSpec::default()
    });
    h.push(&SliceSpec::idr(0));
    h.push(&SliceSpec::p(1, 0, 2));
    let with_mmco5 = SliceSpec {
        mmco: vec![(5, Vec::new())],
        ..SliceSpec::p(2, 0, 2)
    };
    assert_eq!(h.push(&with_mmco5), 4);
    assert_eq!(h.push(&SliceSpec::p(1, 0, 2)), 2);
}

#[test]
fn test_type1_extreme_offsets_wrap() {
    let mut h = PocHarness::new(SpsSpec {
        poc_type: 1,
        offset_for_non_ref_pic: i32::MAX,
        offset_for_ref_frame: vec![i32::MAX, 1],
        ..SpsSpec::default()
    });
    assert_eq!(h.push(&SliceSpec::idr(0)), 0);
    assert_eq!(h.push(&SliceSpec::p(1, 0, 2)), i32::MAX);
    assert_eq!(h.push(&SliceSpec::p(2, 0, 2)), i32::MIN, "循环偏移累加应按 i32 回绕");
    // 非参考图像 abs_frame_num 减 1 后同为 2, 再加 offset_for_non_ref_pic
    assert_eq!(h.push(&SliceSpec::p(3, 0, 0)), i32::MIN.wrapping_add(i32::MAX));
}

#[test]
fn test_type1_extreme_delta_pic_order_cnt_wraps() {
    let mut h = PocHarness::new(SpsSpec {
        poc_type: 1,
        offset_for_ref_frame: vec![4],
        ..SpsSpec::default()
    });
    assert_eq!(h.push(&SliceSpec::idr(0)), 0);
    let with_delta = SliceSpec {
        delta_pic_order_cnt0: i32::MAX,
        ..SliceSpec::p(1, 0, 2)
    };
    assert_eq!(h.push(&with_delta), 4i32.wrapping_add(i32::MAX));
}
