//! Cleartext reference implementations of the layer operators.
//!
//! These operate on reconstructed values in the domain representation and are used by the
//! verification oracle and the tests. None of them communicate.
use crate::domain::Domain;
use crate::reshape::{ConvParams, PoolParams};
use num_integer::Integer;
use rayon::prelude::*;

/// `C = A * B` for row-major `A: s1 x s2` and `B: s2 x s3`.
pub fn matmul(domain: &Domain, s1: usize, s2: usize, s3: usize, a: &[u64], b: &[u64]) -> Vec<u64> {
    assert_eq!(a.len(), s1 * s2, "lhs length");
    assert_eq!(b.len(), s2 * s3, "rhs length");
    let mut c = vec![0; s1 * s3];
    if s3 == 0 {
        return c;
    }
    c.par_chunks_mut(s3).enumerate().for_each(|(i, c_row)| {
        let a_row = &a[i * s2..(i + 1) * s2];
        for (k, &a_ik) in a_row.iter().enumerate() {
            if a_ik == 0 {
                continue;
            }
            let b_row = &b[k * s3..(k + 1) * s3];
            for (c_ij, &b_kj) in c_row.iter_mut().zip(b_row) {
                *c_ij = domain.add(*c_ij, domain.mul(a_ik, b_kj));
            }
        }
    });
    c
}

/// Transpose of a row-major `rows x cols` matrix.
pub fn transpose(rows: usize, cols: usize, m: &[u64]) -> Vec<u64> {
    assert_eq!(m.len(), rows * cols);
    let mut t = vec![0; m.len()];
    for r in 0..rows {
        for c in 0..cols {
            t[c * rows + r] = m[r * cols + c];
        }
    }
    t
}

pub fn hadamard(domain: &Domain, a: &[u64], b: &[u64]) -> Vec<u64> {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(&x, &y)| domain.mul(x, y)).collect()
}

/// Direct convolution over an NHWC input and a `[FH][FW][CI][CO]` filter.
pub fn conv2d(domain: &Domain, p: &ConvParams, input: &[u64], filter: &[u64]) -> Vec<u64> {
    let (out_h, out_w) = (p.out_h(), p.out_w());
    let mut out = vec![0; p.output_len()];
    for n in 0..p.n {
        for oh in 0..out_h {
            for ow in 0..out_w {
                for co in 0..p.co {
                    let mut acc = 0;
                    for fh in 0..p.fh {
                        let ih = (oh * p.stride_h + fh) as isize - p.pad.top as isize;
                        if ih < 0 || ih >= p.h as isize {
                            continue;
                        }
                        for fw in 0..p.fw {
                            let iw = (ow * p.stride_w + fw) as isize - p.pad.left as isize;
                            if iw < 0 || iw >= p.w as isize {
                                continue;
                            }
                            for ci in 0..p.ci {
                                let pixel = (n * p.h + ih as usize) * p.w + iw as usize;
                                let x = input[pixel * p.ci + ci];
                                let f = filter[((fh * p.fw + fw) * p.ci + ci) * p.co + co];
                                acc = domain.add(acc, domain.mul(x, f));
                            }
                        }
                    }
                    out[((n * out_h + oh) * out_w + ow) * p.co + co] = acc;
                }
            }
        }
    }
    out
}

/// Grouped convolution with a `[FH][FW][CI/G][CO]` filter.
pub fn conv2d_group(
    domain: &Domain,
    p: &ConvParams,
    groups: usize,
    input: &[u64],
    filter: &[u64],
) -> Vec<u64> {
    let gp = p.group(groups);
    let mut out = vec![0; p.output_len()];
    for g in 0..groups {
        let group_in = crate::reshape::slice_input_group(p, groups, g, input);
        let group_filter = crate::reshape::slice_filter_group(p, groups, g, filter);
        let group_out = conv2d(domain, &gp, &group_in, &group_filter);
        crate::reshape::scatter_group_output(p, groups, g, &group_out, &mut out);
    }
    out
}

pub fn relu(domain: &Domain, x: &[u64]) -> Vec<u64> {
    x.iter()
        .map(|&v| if domain.to_signed(v) < 0 { 0 } else { domain.mask(v) })
        .collect()
}

/// Arithmetic right shift by `sf` bits of the signed values.
pub fn scale_down(domain: &Domain, x: &[u64], sf: u32) -> Vec<u64> {
    let sf = sf.min(i64::BITS - 1);
    x.iter()
        .map(|&v| domain.from_signed(domain.to_signed(v) >> sf))
        .collect()
}

pub fn scale_up(domain: &Domain, x: &[u64], sf: u32) -> Vec<u64> {
    x.iter().map(|&v| domain.shl(v, sf)).collect()
}

/// Signed floor division by a public positive divisor.
pub fn div_public(domain: &Domain, x: &[u64], divisor: u64) -> Vec<u64> {
    let divisor = i128::from(divisor);
    x.iter()
        .map(|&v| {
            let q = Integer::div_floor(&i128::from(domain.to_signed(v)), &divisor);
            domain.from_signed(q as i64)
        })
        .collect()
}

fn pool_windows<'a>(
    p: &'a PoolParams,
    input: &'a [u64],
) -> impl Iterator<Item = (usize, Vec<u64>)> + 'a {
    let (out_h, out_w) = (p.out_h(), p.out_w());
    (0..p.n).flat_map(move |n| {
        (0..out_h).flat_map(move |oh| {
            (0..out_w).flat_map(move |ow| {
                (0..p.c).map(move |c| {
                    let mut window = Vec::with_capacity(p.window_len());
                    for kh in 0..p.ksize_h {
                        let ih = (oh * p.stride_h + kh) as isize - p.pad.top as isize;
                        for kw in 0..p.ksize_w {
                            let iw = (ow * p.stride_w + kw) as isize - p.pad.left as isize;
                            let inside = ih >= 0
                                && ih < p.img_h as isize
                                && iw >= 0
                                && iw < p.img_w as isize;
                            window.push(if inside {
                                let pixel = (n * p.img_h + ih as usize) * p.img_w + iw as usize;
                                input[pixel * p.c + c]
                            } else {
                                0
                            });
                        }
                    }
                    (((n * out_h + oh) * out_w + ow) * p.c + c, window)
                })
            })
        })
    })
}

pub fn max_pool(domain: &Domain, p: &PoolParams, input: &[u64]) -> Vec<u64> {
    let mut out = vec![0; p.output_len()];
    for (idx, window) in pool_windows(p, input) {
        out[idx] = window
            .into_iter()
            .max_by_key(|&v| domain.to_signed(v))
            .unwrap_or(0);
    }
    out
}

pub fn avg_pool(domain: &Domain, p: &PoolParams, input: &[u64]) -> Vec<u64> {
    let divisor = p.window_len() as i64;
    let mut out = vec![0; p.output_len()];
    for (idx, window) in pool_windows(p, input) {
        let sum = window.into_iter().fold(0, |acc, v| domain.add(acc, v));
        out[idx] = domain.from_signed(domain.to_signed(sum).div_euclid(divisor));
    }
    out
}

/// Index of the first maximal element in the signed interpretation.
pub fn argmax(domain: &Domain, x: &[u64]) -> u64 {
    let mut best = 0;
    for (idx, &v) in x.iter().enumerate().skip(1) {
        if domain.to_signed(v) > domain.to_signed(x[best]) {
            best = idx;
        }
    }
    best as u64
}
