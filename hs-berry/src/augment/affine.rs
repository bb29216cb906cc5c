//! 随机仿射变换.
//!
//! 记录中保存的是正向增强使用的 pull-back 矩阵 `M` 与平移 `t`:
//! 增强时, 输出体素 `o` 的取值来自源坐标 `M (o - c) + c + t`
//! (`c` 为体素网格中心). 逆向重建时对 `M` 求逆, 源坐标为
//! `M^{-1} (o - c - t) + c`. 求逆失败 (退化矩阵) 是逆向重建阶段的
//! 致命错误.

use ndarray::{Array4, ArrayView4};
use rand::rngs::StdRng;
use rand::Rng;

use crate::augment::resample::{invert3, mat_vec, pull_back};
use crate::config::AffineConfig;
use crate::errors::TransformError;

/// 一次仿射增强的采样参数.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineParams {
    /// pull-back 线性部分 (旋转 × 缩放).
    pub matrix: [[f32; 3]; 3],

    /// pull-back 平移部分, 以体素为单位.
    pub translation: [f32; 3],
}

/// 绕单轴的旋转矩阵. `axis` 为旋转轴下标, `deg` 以度为单位.
fn rotation(axis: usize, deg: f32) -> [[f32; 3]; 3] {
    let rad = deg.to_radians();
    let (sin, cos) = rad.sin_cos();

    let mut m = [[0.0f32; 3]; 3];
    m[axis][axis] = 1.0;
    let (a, b) = ((axis + 1) % 3, (axis + 2) % 3);
    m[a][a] = cos;
    m[a][b] = -sin;
    m[b][a] = sin;
    m[b][b] = cos;
    m
}

/// 3x3 矩阵乘法.
fn mat_mul(a: &[[f32; 3]; 3], b: &[[f32; 3]; 3]) -> [[f32; 3]; 3] {
    let mut out = [[0.0f32; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

impl AffineParams {
    /// 从配置给出的对称范围中均匀采样一组仿射参数.
    pub fn sample(rng: &mut StdRng, cfg: &AffineConfig) -> Self {
        let mut sym = |amp: f32| {
            if amp > 0.0 {
                rng.gen_range(-amp..=amp)
            } else {
                0.0
            }
        };

        let degs = [sym(cfg.degrees), sym(cfg.degrees), sym(cfg.degrees)];
        let translation = [
            sym(cfg.translation),
            sym(cfg.translation),
            sym(cfg.translation),
        ];
        let scales: [f32; 3] = std::array::from_fn(|_| {
            let amp = cfg.scales.min(0.99);
            if amp > 0.0 {
                1.0 + rng.gen_range(-amp..=amp)
            } else {
                1.0
            }
        });

        let mut matrix = mat_mul(
            &rotation(2, degs[2]),
            &mat_mul(&rotation(1, degs[1]), &rotation(0, degs[0])),
        );
        for row in matrix.iter_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                *v *= scales[j];
            }
        }

        Self {
            matrix,
            translation,
        }
    }

    /// 正向增强: 按记录的 pull-back 映射重采样. 出界填 0 (强度图像).
    pub fn apply(&self, input: &ArrayView4<f32>) -> Array4<f32> {
        let c = center(input);
        pull_back(
            input,
            |o| {
                let p = mat_vec(&self.matrix, [o[0] - c[0], o[1] - c[1], o[2] - c[2]]);
                [
                    p[0] + c[0] + self.translation[0],
                    p[1] + c[1] + self.translation[1],
                    p[2] + c[2] + self.translation[2],
                ]
            },
            |_| 0.0,
        )
    }

    /// 逆向重建: 以 `M^{-1}` 把增强空间的张量映回原网格.
    ///
    /// 出界填充值由 `fill_of(channel)` 给出 (概率张量填背景).
    pub fn apply_inverse<G>(
        &self,
        input: &ArrayView4<f32>,
        fill_of: G,
    ) -> Result<Array4<f32>, TransformError>
    where
        G: Fn(usize) -> f32,
    {
        let inv = invert3(&self.matrix)?;
        let c = center(input);
        Ok(pull_back(
            input,
            |o| {
                let p = mat_vec(
                    &inv,
                    [
                        o[0] - c[0] - self.translation[0],
                        o[1] - c[1] - self.translation[1],
                        o[2] - c[2] - self.translation[2],
                    ],
                );
                [p[0] + c[0], p[1] + c[1], p[2] + c[2]]
            },
            fill_of,
        ))
    }
}

/// 体素网格中心坐标.
#[inline]
fn center(input: &ArrayView4<f32>) -> [f32; 3] {
    let s = input.shape();
    [
        (s[1] as f32 - 1.0) / 2.0,
        (s[2] as f32 - 1.0) / 2.0,
        (s[3] as f32 - 1.0) / 2.0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;
    use rand::SeedableRng;

    fn f32_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn identity() -> AffineParams {
        AffineParams {
            matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }

    /// 恒等参数下正反两个方向都是 no-op.
    #[test]
    fn test_affine_identity() {
        let mut input = Array4::<f32>::zeros((1, 4, 4, 4));
        input.iter_mut().enumerate().for_each(|(i, v)| *v = i as f32);

        let p = identity();
        let fwd = p.apply(&input.view());
        let back = p.apply_inverse(&fwd.view(), |_| 0.0).unwrap();

        assert!(fwd.iter().zip(input.iter()).all(|(a, b)| f32_eq(*a, *b)));
        assert!(back.iter().zip(input.iter()).all(|(a, b)| f32_eq(*a, *b)));
    }

    /// 纯平移的逆变换把图像内容移回原位 (内部区域).
    #[test]
    fn test_affine_translation_roundtrip() {
        let mut input = Array4::<f32>::zeros((1, 8, 8, 8));
        input[(0, 4, 4, 4)] = 1.0;

        let p = AffineParams {
            matrix: identity().matrix,
            translation: [1.0, 0.0, 0.0],
        };
        let fwd = p.apply(&input.view());
        // pull-back 平移 +1 意味着内容向低下标方向移动.
        assert!(f32_eq(fwd[(0, 3, 4, 4)], 1.0));

        let back = p.apply_inverse(&fwd.view(), |_| 0.0).unwrap();
        assert!(f32_eq(back[(0, 4, 4, 4)], 1.0));
    }

    /// 随机采样的参数必须可逆, 且逆变换能恢复内部体素.
    #[test]
    fn test_affine_sampled_roundtrip_center() {
        let mut rng = StdRng::seed_from_u64(7);
        let cfg = AffineConfig::default();

        let mut input = Array4::<f32>::zeros((1, 16, 16, 16));
        input[(0, 8, 8, 8)] = 10.0;

        for _ in 0..8 {
            let p = AffineParams::sample(&mut rng, &cfg);
            let fwd = p.apply(&input.view());
            let back = p.apply_inverse(&fwd.view(), |_| 0.0).unwrap();

            // 三线性插值有损, 只要求质量集中在中心附近.
            let total: f32 = back.iter().sum();
            assert!(total > 4.0, "mass lost after roundtrip: {total}");
            assert!(back[(0, 8, 8, 8)] > 0.5);
        }
    }
}
