//! 图像级宏块状态表: 每个宏块地址一项, 每幅图像开始时重置而不重新分配.
//!
//! 邻居查询统一以 4x4 块为单位, 可用性按 "在图像内, 已解码, 属于同一条带" 判定.

/// 宏块解码种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) enum MbKind {
    #[default]
    NotDecoded,
    I4x4,
    I16x16,
    IPcm,
    PInter,
    PSkip,
}

impl MbKind {
    pub(super) fn is_intra(self) -> bool {
        matches!(self, Self::I4x4 | Self::I16x16 | Self::IPcm)
    }

    pub(super) fn is_inter(self) -> bool {
        matches!(self, Self::PInter | Self::PSkip)
    }
}

/// 单个宏块的解码结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct MbInfo {
    pub(super) kind: MbKind,
    /// 图像内条带序号, 从 1 开始
    pub(super) slice_num: u32,
    /// 去块滤波使用的亮度 QP (I_PCM 为 0)
    pub(super) qp: i32,
    /// Cb/Cr 的 chroma_qp_index_offset
    pub(super) chroma_qp_offset: [i32; 2],
    pub(super) cbp: u8,
    /// Intra4x4PredMode, 光栅顺序; 非 I_NxN 宏块全部为 2 (DC)
    pub(super) intra4x4_modes: [u8; 16],
    /// 非零系数个数: 亮度 16 块 (光栅), Cb 4 块, Cr 4 块
    pub(super) total_coeff: [u8; 24],
    /// 每个 4x4 块的运动矢量 (1/4 像素, 光栅顺序)
    pub(super) mv: [[i32; 2]; 16],
    /// 每个 8x8 分区的参考索引, 帧内为 -1
    pub(super) ref_idx: [i8; 4],
    /// 每个 8x8 分区所引用图像的唯一标识, 帧内为 -1
    pub(super) ref_pic: [i64; 4],
    /// 由错误隐藏生成
    pub(super) concealed: bool,
}

impl Default for MbInfo {
    fn default() -> Self {
        Self {
            kind: MbKind::NotDecoded,
            slice_num: 0,
            qp: 0,
            chroma_qp_offset: [0; 2],
            cbp: 0,
            intra4x4_modes: [2; 16],
            total_coeff: [0; 24],
            mv: [[0; 2]; 16],
            ref_idx: [-1; 4],
            ref_pic: [-1; 4],
            concealed: false,
        }
    }
}

impl MbInfo {
    pub(super) fn is_decoded(&self) -> bool {
        self.kind != MbKind::NotDecoded
    }
}

/// 4x4 块光栅下标所在的 8x8 分区
pub(super) fn block_to_8x8(raster: usize) -> usize {
    ((raster / 8) * 2) + ((raster % 4) / 2)
}

/// 亮度 4x4 块解码顺序 (luma4x4BlkIdx) → 光栅下标
#[rustfmt::skip]
pub(super) const BLK_TO_RASTER: [usize; 16] = [
    0, 1, 4, 5, 2, 3, 6, 7, 8, 9, 12, 13, 10, 11, 14, 15,
];

/// 宏块状态表
#[derive(Debug, Default)]
pub(super) struct MbArena {
    mb_width: usize,
    mb_height: usize,
    mbs: Vec<MbInfo>,
}

impl MbArena {
    /// 按图像尺寸配置, 尺寸不变时只重置内容
    pub(super) fn configure(&mut self, mb_width: usize, mb_height: usize) {
        if self.mb_width != mb_width || self.mb_height != mb_height {
            self.mb_width = mb_width;
            self.mb_height = mb_height;
            self.mbs = vec![MbInfo::default(); mb_width * mb_height];
        } else {
            self.reset();
        }
    }

    pub(super) fn reset(&mut self) {
        self.mbs.fill(MbInfo::default());
    }

    pub(super) fn mb_width(&self) -> usize {
        self.mb_width
    }

    pub(super) fn mb_height(&self) -> usize {
        self.mb_height
    }

    pub(super) fn len(&self) -> usize {
        self.mbs.len()
    }

    pub(super) fn get(&self, addr: usize) -> Option<&MbInfo> {
        self.mbs.get(addr)
    }

    pub(super) fn get_mut(&mut self, addr: usize) -> Option<&mut MbInfo> {
        self.mbs.get_mut(addr)
    }

    pub(super) fn iter(&self) -> impl Iterator<Item = &MbInfo> {
        self.mbs.iter()
    }

    pub(super) fn decoded_count(&self) -> usize {
        self.mbs.iter().filter(|mb| mb.is_decoded()).count()
    }

    /// 相邻宏块地址 (仅判断是否在图像内)
    pub(super) fn neighbour_addr(&self, addr: usize, dx: i32, dy: i32) -> Option<usize> {
        if self.mb_width == 0 {
            return None;
        }
        let x = (addr % self.mb_width) as i32 + dx;
        let y = (addr / self.mb_width) as i32 + dy;
        if x < 0 || y < 0 || x >= self.mb_width as i32 || y >= self.mb_height as i32 {
            return None;
        }
        Some(y as usize * self.mb_width + x as usize)
    }

    /// 可用的相邻宏块: 在图像内, 已解码, 且与 `addr` 属于同一条带
    pub(super) fn available(&self, addr: usize, dx: i32, dy: i32) -> Option<usize> {
        let cur = self.mbs.get(addr)?;
        let n = self.neighbour_addr(addr, dx, dy)?;
        let mb = &self.mbs[n];
        (mb.is_decoded() && mb.slice_num == cur.slice_num).then_some(n)
    }

    /// 亮度 4x4 块邻居, `(bx, by)` 为相对当前宏块的块坐标 (-1..=4).
    ///
    /// 返回 (宏块地址, 光栅块下标); 当前宏块内部的位置直接返回 `addr`.
    pub(super) fn luma_block_neighbour(&self, addr: usize, bx: i32, by: i32) -> Option<(usize, usize)> {
        self.block_neighbour(addr, bx, by, 4)
    }

    /// 色度 4x4 块邻居 (4:2:0 每分量 2x2 块), `(bx, by)` 取 -1..=2
    pub(super) fn chroma_block_neighbour(&self, addr: usize, bx: i32, by: i32) -> Option<(usize, usize)> {
        self.block_neighbour(addr, bx, by, 2)
    }

    fn block_neighbour(&self, addr: usize, bx: i32, by: i32, n: i32) -> Option<(usize, usize)> {
        let dx = bx.div_euclid(n);
        let dy = by.div_euclid(n);
        let mb = if dx == 0 && dy == 0 {
            addr
        } else {
            self.available(addr, dx, dy)?
        };
        let blk = (by.rem_euclid(n) * n + bx.rem_euclid(n)) as usize;
        Some((mb, blk))
    }
}
