//! H.264 条带组映射 (slice_group_map_type 0..=6) 与宏块遍历顺序.

use crate::parsers::h264::Sps;

use super::parameter_sets::{Pps, SliceGroupMap};

/// 生成宏块 → 条带组映射表 (长度 PicSizeInMbs).
///
/// 单条带组时返回全 0 表.
pub fn build_mb_slice_group_map(pps: &Pps, sps: &Sps, slice_group_change_cycle: u32) -> Vec<u8> {
    let pic_size_in_mbs = sps.pic_size_in_mbs() as usize;
    let Some(map) = &pps.slice_group_map else {
        return vec![0; pic_size_in_mbs];
    };
    let units = map_unit_slice_group_map(map, pps.num_slice_groups, sps, slice_group_change_cycle);
    if sps.frame_mbs_only {
        return units;
    }
    // 非 frame_mbs_only 的帧图像: 一个映射单元覆盖上下两个宏块
    let width = sps.pic_width_in_mbs as usize;
    (0..pic_size_in_mbs)
        .map(|i| {
            let unit = (i / (2 * width)) * width + i % width;
            units.get(unit).copied().unwrap_or(0)
        })
        .collect()
}

/// 当前条带组内的下一个宏块地址 (nextMbAddress)
pub fn next_mb_addr(map: &[u8], cur: usize) -> Option<usize> {
    let group = *map.get(cur)?;
    map.iter()
        .enumerate()
        .skip(cur + 1)
        .find(|&(_, &g)| g == group)
        .map(|(addr, _)| addr)
}

/// 生成映射单元 → 条带组表 (8.2.2.1 ~ 8.2.2.7)
fn map_unit_slice_group_map(
    map: &SliceGroupMap,
    num_slice_groups: u32,
    sps: &Sps,
    slice_group_change_cycle: u32,
) -> Vec<u8> {
    let width = sps.pic_width_in_mbs as usize;
    let height = sps.pic_height_in_map_units as usize;
    let size = width * height;
    let groups = num_slice_groups.max(1) as usize;
    let mut out = vec![0u8; size];

    match map {
        SliceGroupMap::Interleaved { run_lengths } => {
            let mut i = 0usize;
            while i < size {
                let before = i;
                for (group, &run) in run_lengths.iter().enumerate().take(groups) {
                    if i >= size {
                        break;
                    }
                    let run = run as usize;
                    for slot in out.iter_mut().skip(i).take(run) {
                        *slot = group as u8;
                    }
                    i += run;
                }
                if i == before {
                    break;
                }
            }
        }
        SliceGroupMap::Dispersed => {
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = (((i % width) + (((i / width) * groups) / 2)) % groups) as u8;
            }
        }
        SliceGroupMap::Foreground {
            top_left,
            bottom_right,
        } => {
            out.fill((groups - 1) as u8);
            // 编号小的前景组优先, 逆序覆盖
            for group in (0..top_left.len().min(bottom_right.len())).rev() {
                let (tl, brc) = (top_left[group] as usize, bottom_right[group] as usize);
                for y in tl / width..=brc / width {
                    for x in tl % width..=brc % width {
                        if let Some(slot) = out.get_mut(y * width + x) {
                            *slot = group as u8;
                        }
                    }
                }
            }
        }
        SliceGroupMap::Evolving {
            map_type,
            change_direction,
            change_rate,
        } => {
            let units_in_group0 =
                (slice_group_change_cycle as usize * *change_rate as usize).min(size);
            let dir = usize::from(*change_direction);
            match map_type {
                3 => box_out(&mut out, width, height, units_in_group0, *change_direction),
                4 => {
                    let upper_left = if *change_direction {
                        size - units_in_group0
                    } else {
                        units_in_group0
                    };
                    for (i, slot) in out.iter_mut().enumerate() {
                        *slot = if i < upper_left { dir } else { 1 - dir } as u8;
                    }
                }
                _ => {
                    let upper_left = if *change_direction {
                        size - units_in_group0
                    } else {
                        units_in_group0
                    };
                    let mut k = 0usize;
                    for x in 0..width {
                        for y in 0..height {
                            out[y * width + x] = if k < upper_left { dir } else { 1 - dir } as u8;
                            k += 1;
                        }
                    }
                }
            }
        }
        SliceGroupMap::Explicit { ids } => {
            for (slot, &id) in out.iter_mut().zip(ids.iter()) {
                *slot = id as u8;
            }
        }
    }
    out
}

/// 盒式外扩 (类型 3): 从中心螺旋向外把映射单元划入条带组 0
fn box_out(out: &mut [u8], width: usize, height: usize, units_in_group0: usize, dir: bool) {
    out.fill(1);
    if width == 0 || height == 0 {
        return;
    }
    let d = i64::from(dir);
    let (w, h) = (width as i64, height as i64);
    let mut x = (w - d) / 2;
    let mut y = (h - d) / 2;
    let (mut left, mut top) = (x, y);
    let (mut right, mut bottom) = (x, y);
    let (mut x_dir, mut y_dir) = (d - 1, d);

    let mut k = 0usize;
    // 每个单元最多被访问常数次, 上限防止异常参数下死循环
    let mut budget = 4 * out.len() + 16;
    while k < units_in_group0 && budget > 0 {
        budget -= 1;
        let idx = (y * w + x) as usize;
        let vacant = out[idx] == 1;
        if vacant {
            out[idx] = 0;
        }
        if x_dir == -1 && x == left {
            left = (left - 1).max(0);
            x = left;
            x_dir = 0;
            y_dir = 2 * d - 1;
        } else if x_dir == 1 && x == right {
            right = (right + 1).min(w - 1);
            x = right;
            x_dir = 0;
            y_dir = 1 - 2 * d;
        } else if y_dir == -1 && y == top {
            top = (top - 1).max(0);
            y = top;
            x_dir = 1 - 2 * d;
            y_dir = 0;
        } else if y_dir == 1 && y == bottom {
            bottom = (bottom + 1).min(h - 1);
            y = bottom;
            x_dir = 2 * d - 1;
            y_dir = 0;
        } else {
            x += x_dir;
            y += y_dir;
        }
        k += usize::from(vacant);
    }
}
