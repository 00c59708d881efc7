//! P 条带参考图像列表 RefPicList0 的初始化与重排.

use avcdec_core::{AvcError, AvcResult};
use log::debug;

use super::dpb::Dpb;
use super::slice_parse::RefPicListMod;

impl Dpb {
    /// 构建 RefPicList0, 元素为帧存储下标, None 表示该位置没有参考图像.
    ///
    /// 初始顺序: 短期参考帧按 PicNum 降序, 然后长期参考帧按 LongTermPicNum 升序;
    /// 截断到 `num_active` 后执行重排命令. 重排引用的图像不存在时返回错误.
    pub(super) fn build_ref_pic_list0(
        &mut self,
        frame_num: u32,
        max_frame_num: u32,
        num_active: usize,
        mods: &[RefPicListMod],
    ) -> AvcResult<Vec<Option<usize>>> {
        self.update_frame_num_wrap(frame_num, max_frame_num);
        let frames = self.frames();

        let mut short: Vec<usize> = (0..frames.len()).filter(|&i| frames[i].is_short_term()).collect();
        short.sort_by_key(|&i| std::cmp::Reverse(frames[i].frame_num_wrap));
        let mut long: Vec<usize> = (0..frames.len()).filter(|&i| frames[i].is_long_term()).collect();
        long.sort_by_key(|&i| frames[i].long_term_frame_idx);

        let mut list: Vec<Option<usize>> = short.into_iter().chain(long).map(Some).collect();
        list.resize(num_active, None);

        if !mods.is_empty() {
            self.apply_modifications(&mut list, frame_num, max_frame_num, num_active, mods)?;
        }
        debug!("H264: RefPicList0 = {:?}", list);
        Ok(list)
    }

    fn apply_modifications(
        &self,
        list: &mut Vec<Option<usize>>,
        frame_num: u32,
        max_frame_num: u32,
        num_active: usize,
        mods: &[RefPicListMod],
    ) -> AvcResult<()> {
        let frames = self.frames();
        let max_pic_num = max_frame_num as i32;
        let cur_pic_num = frame_num as i32;
        let mut pic_num_pred = cur_pic_num;
        let mut ref_idx = 0usize;

        for &m in mods {
            if ref_idx >= num_active {
                return Err(AvcError::InvalidData(format!(
                    "H264: 参考列表重排命令过多, num_active={}",
                    num_active
                )));
            }
            let (target, is_long) = match m {
                RefPicListMod::ShortTermSub {
                    abs_diff_pic_num_minus1,
                }
                | RefPicListMod::ShortTermAdd {
                    abs_diff_pic_num_minus1,
                } => {
                    let abs_diff = abs_diff_pic_num_minus1 as i32 + 1;
                    if abs_diff > max_pic_num {
                        return Err(AvcError::InvalidData(format!(
                            "H264: abs_diff_pic_num 越界, value={}",
                            abs_diff
                        )));
                    }
                    let mut no_wrap = if matches!(m, RefPicListMod::ShortTermSub { .. }) {
                        pic_num_pred - abs_diff
                    } else {
                        pic_num_pred + abs_diff
                    };
                    if no_wrap < 0 {
                        no_wrap += max_pic_num;
                    } else if no_wrap >= max_pic_num {
                        no_wrap -= max_pic_num;
                    }
                    pic_num_pred = no_wrap;
                    let pic_num = if no_wrap > cur_pic_num {
                        no_wrap - max_pic_num
                    } else {
                        no_wrap
                    };
                    let target = (0..frames.len())
                        .find(|&i| frames[i].is_short_term() && frames[i].frame_num_wrap == pic_num)
                        .ok_or_else(|| {
                            AvcError::InvalidData(format!(
                                "H264: 重排引用的短期参考帧不存在, pic_num={}",
                                pic_num
                            ))
                        })?;
                    (target, false)
                }
                RefPicListMod::LongTerm { long_term_pic_num } => {
                    let target = (0..frames.len())
                        .find(|&i| {
                            frames[i].is_long_term()
                                && frames[i].long_term_frame_idx == long_term_pic_num
                        })
                        .ok_or_else(|| {
                            AvcError::InvalidData(format!(
                                "H264: 重排引用的长期参考帧不存在, long_term_pic_num={}",
                                long_term_pic_num
                            ))
                        })?;
                    (target, true)
                }
            };

            // 插入到 ref_idx 处, 并删除其后重复出现的同一图像
            list.insert(ref_idx, Some(target));
            list.truncate(num_active + 1);
            ref_idx += 1;
            let mut kept = ref_idx;
            for c in ref_idx..list.len() {
                let duplicate = list[c].is_some_and(|i| {
                    i == target && frames[i].is_long_term() == is_long
                });
                if !duplicate {
                    list[kept] = list[c];
                    kept += 1;
                }
            }
            list.truncate(kept);
        }
        list.truncate(num_active);
        Ok(())
    }
}
