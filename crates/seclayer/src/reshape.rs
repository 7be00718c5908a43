//! Local data-layout transforms shared by the convolution and pooling operators.
//!
//! Tensors are flat row-major buffers. 4D tensors use the NHWC layout, filters the
//! `[FH][FW][CI][CO]` layout.
use crate::domain::{Domain, DomainKind};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Batched primitives operate on multiples of this many elements.
pub const BATCH_ALIGNMENT: usize = 8;

/// Round `len` up to the next multiple of [`BATCH_ALIGNMENT`].
pub fn ceil_to_alignment(len: usize) -> usize {
    len.div_ceil(BATCH_ALIGNMENT) * BATCH_ALIGNMENT
}

/// Copy `values` into a zero-padded buffer whose length is a multiple of [`BATCH_ALIGNMENT`].
pub fn pad_to_alignment(values: &[u64]) -> Vec<u64> {
    let mut padded = vec![0; ceil_to_alignment(values.len())];
    padded[..values.len()].copy_from_slice(values);
    padded
}

/// Zero padding around the spatial dimensions. The padding may be asymmetric.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Padding {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl Padding {
    pub fn uniform(pad: usize) -> Self {
        Self {
            top: pad,
            bottom: pad,
            left: pad,
            right: pad,
        }
    }
}

/// Number of kernel positions along one axis.
fn sliding_positions(
    dim: usize,
    pad_before: usize,
    pad_after: usize,
    k: usize,
    stride: usize,
) -> usize {
    assert!(stride > 0, "stride must be positive");
    let padded = dim + pad_before + pad_after;
    if padded < k {
        0
    } else {
        (padded - k) / stride + 1
    }
}

/// Shape parameters of a 2D convolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvParams {
    pub n: usize,
    pub h: usize,
    pub w: usize,
    pub ci: usize,
    pub fh: usize,
    pub fw: usize,
    pub co: usize,
    pub pad: Padding,
    pub stride_h: usize,
    pub stride_w: usize,
}

impl ConvParams {
    pub fn out_h(&self) -> usize {
        sliding_positions(self.h, self.pad.top, self.pad.bottom, self.fh, self.stride_h)
    }

    pub fn out_w(&self) -> usize {
        sliding_positions(self.w, self.pad.left, self.pad.right, self.fw, self.stride_w)
    }

    pub fn input_len(&self) -> usize {
        self.n * self.h * self.w * self.ci
    }

    pub fn filter_len(&self) -> usize {
        self.fh * self.fw * self.ci * self.co
    }

    pub fn output_len(&self) -> usize {
        self.n * self.out_h() * self.out_w() * self.co
    }

    /// Dimensions `(s1, s2, s3)` of the matrix product computing this convolution.
    pub fn matmul_dims(&self) -> (usize, usize, usize) {
        (
            self.co,
            self.fh * self.fw * self.ci,
            self.n * self.out_h() * self.out_w(),
        )
    }

    /// Parameters of a single group of a grouped convolution.
    pub fn group(&self, groups: usize) -> Self {
        assert!(
            groups > 0 && self.ci % groups == 0 && self.co % groups == 0,
            "CI={} and CO={} must be divisible by G={groups}",
            self.ci,
            self.co
        );
        Self {
            ci: self.ci / groups,
            co: self.co / groups,
            ..*self
        }
    }
}

/// Flatten a `[FH][FW][CI][CO]` filter into the `[CO][FH*FW*CI]` left operand of the matrix
/// product.
pub fn reshape_filter_for_matmul(p: &ConvParams, filter: &[u64]) -> Vec<u64> {
    assert_eq!(filter.len(), p.filter_len(), "filter length");
    let cols = p.fh * p.fw * p.ci;
    let mut out = vec![0; p.co * cols];
    for (r, filter_row) in filter.chunks_exact(p.co).enumerate() {
        for (co, &val) in filter_row.iter().enumerate() {
            out[co * cols + r] = val;
        }
    }
    out
}

/// im2col. Every output position `(n, oh, ow)` becomes a column holding the `FH*FW*CI` input
/// values its kernel covers. Positions outside the input are 0.
pub fn reshape_input_for_matmul(p: &ConvParams, input: &[u64]) -> Vec<u64> {
    assert_eq!(input.len(), p.input_len(), "input length");
    let (out_h, out_w) = (p.out_h(), p.out_w());
    let cols = p.n * out_h * out_w;
    let rows = p.fh * p.fw * p.ci;
    let mut out = vec![0; rows * cols];
    if cols == 0 {
        return out;
    }
    out.par_chunks_mut(cols)
        .enumerate()
        .for_each(|(row, out_row)| {
            let ci = row % p.ci;
            let fw = (row / p.ci) % p.fw;
            let fh = row / (p.ci * p.fw);
            for n in 0..p.n {
                for oh in 0..out_h {
                    let ih = (oh * p.stride_h + fh) as isize - p.pad.top as isize;
                    if ih < 0 || ih >= p.h as isize {
                        continue;
                    }
                    for ow in 0..out_w {
                        let iw = (ow * p.stride_w + fw) as isize - p.pad.left as isize;
                        if iw < 0 || iw >= p.w as isize {
                            continue;
                        }
                        let src = ((n * p.h + ih as usize) * p.w + iw as usize) * p.ci + ci;
                        out_row[(n * out_h + oh) * out_w + ow] = input[src];
                    }
                }
            }
        });
    out
}

/// Transpose the `[CO][N*newH*newW]` product back into an NHWC tensor.
pub fn scatter_matmul_output_to_conv(p: &ConvParams, product: &[u64], out: &mut [u64]) {
    let (_, _, cols) = p.matmul_dims();
    assert_eq!(product.len(), p.co * cols, "product length");
    assert_eq!(out.len(), p.output_len(), "output length");
    for (co, product_row) in product.chunks_exact(cols.max(1)).enumerate().take(p.co) {
        for (pos, &val) in product_row.iter().enumerate() {
            out[pos * p.co + co] = val;
        }
    }
}

/// Channels `[g*ci/G, (g+1)*ci/G)` of an NHWC input.
pub fn slice_input_group(p: &ConvParams, groups: usize, g: usize, input: &[u64]) -> Vec<u64> {
    let cig = p.ci / groups;
    input
        .chunks_exact(p.ci)
        .flat_map(|pixel| pixel[g * cig..(g + 1) * cig].iter().copied())
        .collect()
}

/// Output channels `[g*co/G, (g+1)*co/G)` of a `[FH][FW][CI/G][CO]` filter.
pub fn slice_filter_group(p: &ConvParams, groups: usize, g: usize, filter: &[u64]) -> Vec<u64> {
    let cog = p.co / groups;
    filter
        .chunks_exact(p.co)
        .flat_map(|row| row[g * cog..(g + 1) * cog].iter().copied())
        .collect()
}

/// Write the output of group `g` into its channels of the full NHWC output.
pub fn scatter_group_output(
    p: &ConvParams,
    groups: usize,
    g: usize,
    group_out: &[u64],
    out: &mut [u64],
) {
    let cog = p.co / groups;
    for (dst, src) in out.chunks_exact_mut(p.co).zip(group_out.chunks_exact(cog)) {
        dst[g * cog..(g + 1) * cog].copy_from_slice(src);
    }
}

/// Shape parameters of max and average pooling over an NHWC image.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolParams {
    pub n: usize,
    pub img_h: usize,
    pub img_w: usize,
    pub c: usize,
    pub ksize_h: usize,
    pub ksize_w: usize,
    pub pad: Padding,
    pub stride_h: usize,
    pub stride_w: usize,
}

impl PoolParams {
    pub fn out_h(&self) -> usize {
        sliding_positions(self.img_h, self.pad.top, self.pad.bottom, self.ksize_h, self.stride_h)
    }

    pub fn out_w(&self) -> usize {
        sliding_positions(self.img_w, self.pad.left, self.pad.right, self.ksize_w, self.stride_w)
    }

    pub fn input_len(&self) -> usize {
        self.n * self.img_h * self.img_w * self.c
    }

    pub fn output_len(&self) -> usize {
        self.n * self.out_h() * self.out_w() * self.c
    }

    pub fn window_len(&self) -> usize {
        self.ksize_h * self.ksize_w
    }

    /// Number of windows, i.e. of real rows in [`PoolWindows`].
    pub fn rows(&self) -> usize {
        self.n * self.c * self.out_h() * self.out_w()
    }
}

/// Pooling windows, one row of `window_len` values per window. Rows past `rows` are zero
/// padding.
#[derive(Debug, Clone)]
pub struct PoolWindows {
    pub rows: usize,
    pub padded_rows: usize,
    pub window_len: usize,
    pub data: Vec<u64>,
}

impl PoolWindows {
    pub fn row(&self, idx: usize) -> &[u64] {
        &self.data[idx * self.window_len..(idx + 1) * self.window_len]
    }
}

/// Window corners along one axis. The corner slides from `-pad_before` while the window still
/// ends within the padded extent.
fn window_corners(
    dim: usize,
    pad_before: usize,
    pad_after: usize,
    k: usize,
    stride: usize,
) -> Vec<isize> {
    let last = dim as isize - 1 + pad_after as isize;
    let mut corners = vec![];
    let mut corner = -(pad_before as isize);
    while corner + k as isize - 1 <= last {
        corners.push(corner);
        corner += stride as isize;
    }
    corners
}

/// Extract every pooling window into its own row. Rows are ordered by `(n, c, oh, ow)` and
/// padded to a multiple of [`BATCH_ALIGNMENT`].
pub fn extract_pooling_windows(p: &PoolParams, input: &[u64]) -> PoolWindows {
    assert_eq!(input.len(), p.input_len(), "input length");
    let corners_h = window_corners(p.img_h, p.pad.top, p.pad.bottom, p.ksize_h, p.stride_h);
    let corners_w = window_corners(p.img_w, p.pad.left, p.pad.right, p.ksize_w, p.stride_w);
    debug_assert_eq!(corners_h.len(), p.out_h());
    debug_assert_eq!(corners_w.len(), p.out_w());

    let rows = p.n * p.c * corners_h.len() * corners_w.len();
    let padded_rows = ceil_to_alignment(rows);
    let window_len = p.window_len();
    let mut data = vec![0; padded_rows * window_len];
    let mut row = 0;
    for n in 0..p.n {
        for c in 0..p.c {
            for &top in &corners_h {
                for &left in &corners_w {
                    let window = &mut data[row * window_len..(row + 1) * window_len];
                    for kh in 0..p.ksize_h {
                        let ih = top + kh as isize;
                        if ih < 0 || ih >= p.img_h as isize {
                            continue;
                        }
                        for kw in 0..p.ksize_w {
                            let iw = left + kw as isize;
                            if iw < 0 || iw >= p.img_w as isize {
                                continue;
                            }
                            let src =
                                ((n * p.img_h + ih as usize) * p.img_w + iw as usize) * p.c + c;
                            window[kh * p.ksize_w + kw] = input[src];
                        }
                    }
                    row += 1;
                }
            }
        }
    }
    PoolWindows {
        rows,
        padded_rows,
        window_len,
        data,
    }
}

/// Sum of every window row. Field sums are reduced after every addition, ring sums wrap and are
/// masked once.
pub fn window_sums(windows: &PoolWindows, domain: &Domain) -> Vec<u64> {
    (0..windows.padded_rows)
        .map(|idx| {
            let row = windows.row(idx);
            match domain.kind() {
                DomainKind::Ring => {
                    domain.mask(row.iter().fold(0_u64, |acc, &v| acc.wrapping_add(v)))
                }
                DomainKind::Field => row.iter().fold(0, |acc, &v| domain.add(acc, v)),
            }
        })
        .collect()
}

/// Write one value per window row into the NHWC output. Padding rows are ignored.
pub fn scatter_pool_output(p: &PoolParams, per_row: &[u64], out: &mut [u64]) {
    assert!(per_row.len() >= p.rows(), "too few pooled rows");
    assert_eq!(out.len(), p.output_len(), "output length");
    let (out_h, out_w) = (p.out_h(), p.out_w());
    for n in 0..p.n {
        for c in 0..p.c {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let row = ((n * p.c + c) * out_h + oh) * out_w + ow;
                    out[((n * out_h + oh) * out_w + ow) * p.c + c] = per_row[row];
                }
            }
        }
    }
}
