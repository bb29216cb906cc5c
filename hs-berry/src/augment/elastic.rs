//! 随机弹性形变.
//!
//! 在粗糙控制点网格上采样位移向量, 三线性稠密化为全分辨率位移场 `u`.
//! 正向增强为 `out[o] = in[o + u(o)]`, 逆向重建取负位移
//! `out[o] = in[o - u(o)]`. 负位移逆是该类形变的标准近似逆,
//! 在 `max_displacement` 远小于体素网格尺寸时误差可忽略.

use ndarray::{Array4, ArrayView4, Axis};
use rand::rngs::StdRng;
use rand::Rng;

use crate::augment::resample::{pull_back, trilinear_clamped};
use crate::config::ElasticConfig;

/// 一次弹性形变的采样参数: 控制点位移网格, 形状 `[3, n, n, n]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ElasticParams {
    grid: Array4<f32>,
}

impl ElasticParams {
    /// 采样一组控制点位移. 外侧 `locked_borders` 层控制点锁定为零位移.
    pub fn sample(rng: &mut StdRng, cfg: &ElasticConfig) -> Self {
        let n = cfg.num_control_points.max(4);
        // 锁定层数至多到网格一半, 否则位移场恒为零.
        let locked = cfg.locked_borders.min((n - 1) / 2);

        let mut grid = Array4::<f32>::zeros((3, n, n, n));
        let amp = cfg.max_displacement.max(0.0);

        for v in grid.iter_mut() {
            *v = if amp > 0.0 {
                rng.gen_range(-amp..=amp)
            } else {
                0.0
            };
        }

        if locked > 0 {
            let inner = locked..n - locked;
            for d in 0..3 {
                let mut ch = grid.index_axis_mut(Axis(0), d);
                ch.indexed_iter_mut().for_each(|((x, y, z), v)| {
                    if !(inner.contains(&x) && inner.contains(&y) && inner.contains(&z)) {
                        *v = 0.0;
                    }
                });
            }
        }

        Self { grid }
    }

    /// 由恒为零的控制点构造 (仅测试用).
    #[cfg(test)]
    pub fn zero(n: usize) -> Self {
        Self {
            grid: Array4::zeros((3, n, n, n)),
        }
    }

    /// 求体素坐标 `o` 处的稠密位移向量.
    ///
    /// 控制点均匀铺满体素网格, 位移场按三线性插值延拓.
    fn displacement(&self, o: [f32; 3], shape: [usize; 3]) -> [f32; 3] {
        let n = self.grid.len_of(Axis(1));
        let to_grid = |v: f32, len: usize| {
            if len <= 1 {
                0.0
            } else {
                v / (len - 1) as f32 * (n - 1) as f32
            }
        };
        let g = [
            to_grid(o[0], shape[0]),
            to_grid(o[1], shape[1]),
            to_grid(o[2], shape[2]),
        ];

        std::array::from_fn(|d| {
            let ch = self.grid.index_axis(Axis(0), d);
            trilinear_clamped(&ch, g)
        })
    }

    /// 正向增强: `out[o] = in[o + u(o)]`. 出界填 0 (强度图像).
    pub fn apply(&self, input: &ArrayView4<f32>) -> Array4<f32> {
        self.warp(input, 1.0, |_| 0.0)
    }

    /// 逆向重建: `out[o] = in[o - u(o)]`.
    ///
    /// 出界填充值由 `fill_of(channel)` 给出 (概率张量填背景).
    pub fn apply_inverse<G>(&self, input: &ArrayView4<f32>, fill_of: G) -> Array4<f32>
    where
        G: Fn(usize) -> f32,
    {
        self.warp(input, -1.0, fill_of)
    }

    fn warp<G>(&self, input: &ArrayView4<f32>, sign: f32, fill_of: G) -> Array4<f32>
    where
        G: Fn(usize) -> f32,
    {
        let s = input.shape();
        let shape = [s[1], s[2], s[3]];
        pull_back(
            input,
            |o| {
                let u = self.displacement(o, shape);
                [o[0] + sign * u[0], o[1] + sign * u[1], o[2] + sign * u[2]]
            },
            fill_of,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;
    use rand::SeedableRng;

    fn f32_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    /// 零位移场下正反方向都是 no-op.
    #[test]
    fn test_elastic_zero_field() {
        let mut input = Array4::<f32>::zeros((1, 5, 5, 5));
        input.iter_mut().enumerate().for_each(|(i, v)| *v = i as f32);

        let p = ElasticParams::zero(4);
        let fwd = p.apply(&input.view());
        let back = p.apply_inverse(&fwd.view(), |_| 0.0);

        assert!(fwd.iter().zip(input.iter()).all(|(a, b)| f32_eq(*a, *b)));
        assert!(back.iter().zip(input.iter()).all(|(a, b)| f32_eq(*a, *b)));
    }

    /// 锁定层数被 clamp 到网格一半以内: 4^3 网格最多锁 1 层,
    /// 边界控制点为零而内部控制点保留随机位移.
    #[test]
    fn test_elastic_locked_borders() {
        let mut rng = StdRng::seed_from_u64(11);
        let cfg = ElasticConfig {
            num_control_points: 4,
            max_displacement: 4.0,
            locked_borders: 2,
        };

        let p = ElasticParams::sample(&mut rng, &cfg);
        for d in 0..3 {
            let ch = p.grid.index_axis(Axis(0), d);
            assert_eq!(ch[(0, 0, 0)], 0.0);
            assert_eq!(ch[(3, 1, 2)], 0.0);
        }
        assert!(p.grid.iter().any(|&v| v != 0.0));
    }

    /// 更密的网格在内部保留非零位移, 且不超过 max_displacement.
    #[test]
    fn test_elastic_sample_bounded() {
        let mut rng = StdRng::seed_from_u64(3);
        let cfg = ElasticConfig {
            num_control_points: 7,
            max_displacement: 4.0,
            locked_borders: 2,
        };

        let p = ElasticParams::sample(&mut rng, &cfg);
        assert!(p.grid.iter().any(|&v| v != 0.0));
        assert!(p.grid.iter().all(|&v| v.abs() <= 4.0));

        let u = p.displacement([8.0, 8.0, 8.0], [16, 16, 16]);
        assert!(u.iter().all(|d| d.abs() <= 4.0));
    }
}
