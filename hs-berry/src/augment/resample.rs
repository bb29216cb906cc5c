//! 三线性 pull-back 重采样.
//!
//! 所有空间重采样 (仿射正/逆变换, 弹性形变正/逆变换) 共用同一套实现:
//! 对输出网格的每个体素, 由调用方给出的映射算出源坐标, 再在源张量上做
//! 三线性插值. 源坐标落在支撑域之外时, 以调用方给出的逐通道填充值补齐.

use itertools::iproduct;
use ndarray::{Array4, ArrayView3, ArrayView4};

use crate::errors::TransformError;

/// 计算 3x3 矩阵的行列式.
#[inline]
fn det3(m: &[[f32; 3]; 3]) -> f32 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// 以伴随矩阵法求 3x3 矩阵的逆.
///
/// 行列式绝对值小于 `1e-6` 视为退化, 返回 [`TransformError::SingularAffine`].
pub fn invert3(m: &[[f32; 3]; 3]) -> Result<[[f32; 3]; 3], TransformError> {
    let det = det3(m);
    if det.abs() < 1e-6 {
        return Err(TransformError::SingularAffine(det));
    }

    let inv_det = 1.0 / det;
    let mut out = [[0.0f32; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            // 余子式按转置位置排布.
            let (a, b) = ((i + 1) % 3, (i + 2) % 3);
            let (c, d) = ((j + 1) % 3, (j + 2) % 3);
            out[j][i] = (m[a][c] * m[b][d] - m[a][d] * m[b][c]) * inv_det;
        }
    }
    Ok(out)
}

/// 3x3 矩阵乘 3 维向量.
#[inline]
pub fn mat_vec(m: &[[f32; 3]; 3], v: [f32; 3]) -> [f32; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// 在单通道 3D 张量上做三线性插值. 超出支撑域时返回 `fill`.
pub fn trilinear(ch: &ArrayView3<f32>, p: [f32; 3], fill: f32) -> f32 {
    let s = ch.shape();
    let (sx, sy, sz) = (s[0] as isize, s[1] as isize, s[2] as isize);

    let base = [p[0].floor(), p[1].floor(), p[2].floor()];
    let frac = [p[0] - base[0], p[1] - base[1], p[2] - base[2]];
    let (ix, iy, iz) = (base[0] as isize, base[1] as isize, base[2] as isize);

    // 8 个相邻格点之外的任何访问都视为出界.
    if ix < -1 || iy < -1 || iz < -1 || ix >= sx || iy >= sy || iz >= sz {
        return fill;
    }

    let mut acc = 0.0f32;
    for (dx, wx) in [(0, 1.0 - frac[0]), (1, frac[0])] {
        for (dy, wy) in [(0, 1.0 - frac[1]), (1, frac[1])] {
            for (dz, wz) in [(0, 1.0 - frac[2]), (1, frac[2])] {
                let w = wx * wy * wz;
                if w == 0.0 {
                    continue;
                }
                let (x, y, z) = (ix + dx, iy + dy, iz + dz);
                let v = if x < 0 || y < 0 || z < 0 || x >= sx || y >= sy || z >= sz {
                    fill
                } else {
                    ch[(x as usize, y as usize, z as usize)]
                };
                acc += w * v;
            }
        }
    }
    acc
}

/// 在单通道 3D 张量上做边界 clamp 的三线性插值.
///
/// 用于控制点网格的稠密化: 位移场在边界外按边界值延拓.
pub fn trilinear_clamped(ch: &ArrayView3<f32>, p: [f32; 3]) -> f32 {
    let s = ch.shape();
    let clamp = |v: f32, hi: usize| v.clamp(0.0, (hi - 1) as f32);
    let p = [clamp(p[0], s[0]), clamp(p[1], s[1]), clamp(p[2], s[2])];
    // clamp 之后不可能出界, fill 值不会被用到.
    trilinear(ch, p, 0.0)
}

/// 逐体素 pull-back 重采样.
///
/// 对输出张量 (形状与 `input` 相同) 的每个空间坐标 `o`, 调用
/// `source_of(o)` 获得源坐标, 并对每个通道做三线性插值;
/// 出界填充值由 `fill_of(channel)` 给出.
pub fn pull_back<F, G>(input: &ArrayView4<f32>, source_of: F, fill_of: G) -> Array4<f32>
where
    F: Fn([f32; 3]) -> [f32; 3],
    G: Fn(usize) -> f32,
{
    let s = input.shape();
    let (c, x, y, z) = (s[0], s[1], s[2], s[3]);

    let mut out = Array4::<f32>::zeros((c, x, y, z));
    for (ox, oy, oz) in iproduct!(0..x, 0..y, 0..z) {
        let src = source_of([ox as f32, oy as f32, oz as f32]);
        for ci in 0..c {
            let ch = input.index_axis(ndarray::Axis(0), ci);
            out[(ci, ox, oy, oz)] = trilinear(&ch, src, fill_of(ci));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4, Axis};

    fn f32_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    /// 逆矩阵乘原矩阵应为单位阵.
    #[test]
    fn test_invert3_roundtrip() {
        let m = [[2.0, 0.5, 0.0], [0.0, 1.5, 0.3], [0.1, 0.0, 0.9]];
        let inv = invert3(&m).unwrap();

        for (i, row) in [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
            .iter()
            .enumerate()
        {
            let col = mat_vec(&m, [inv[0][i], inv[1][i], inv[2][i]]);
            for j in 0..3 {
                assert!(f32_eq(col[j], row[j]), "entry ({i}, {j})");
            }
        }
    }

    /// 退化矩阵必须报 SingularAffine.
    #[test]
    fn test_invert3_singular() {
        let m = [[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]];
        assert!(invert3(&m).is_err());
    }

    /// 整数格点上的三线性插值等于直接取值.
    #[test]
    fn test_trilinear_on_grid() {
        let mut ch = Array3::<f32>::zeros((3, 3, 3));
        ch[(1, 2, 0)] = 7.0;
        let v = trilinear(&ch.view(), [1.0, 2.0, 0.0], -1.0);
        assert!(f32_eq(v, 7.0));
    }

    /// 中点插值为两端平均值; 出界返回填充值.
    #[test]
    fn test_trilinear_midpoint_and_oob() {
        let mut ch = Array3::<f32>::zeros((2, 2, 2));
        ch[(0, 0, 0)] = 2.0;
        ch[(1, 0, 0)] = 4.0;

        assert!(f32_eq(trilinear(&ch.view(), [0.5, 0.0, 0.0], -1.0), 3.0));
        assert!(f32_eq(trilinear(&ch.view(), [5.0, 0.0, 0.0], -1.0), -1.0));
        assert!(f32_eq(trilinear(&ch.view(), [-3.0, 0.0, 0.0], -1.0), -1.0));
    }

    /// 恒等映射下的 pull-back 不改变张量.
    #[test]
    fn test_pull_back_identity() {
        let mut input = Array4::<f32>::zeros((2, 3, 3, 3));
        input
            .index_axis_mut(Axis(0), 1)
            .iter_mut()
            .enumerate()
            .for_each(|(i, v)| *v = i as f32);

        let out = pull_back(&input.view(), |o| o, |_| 0.0);
        assert!(out
            .iter()
            .zip(input.iter())
            .all(|(a, b)| f32_eq(*a, *b)));
    }
}
