//! 测试时增强 (TTA) 采样与逆变换重建.
//!
//! 每个增强变体由一条 [`TransformRecord`] 完整描述: 先 (可选地)
//! 翻转若干空间轴, 再 (可选地) 施加仿射或弹性形变之一.
//! 记录中保存的参数足以构造精确逆变换, 因此推理结果可以映回原始
//! 体素网格后再参与集成. 随机性由调用方显式传入的种子驱动,
//! 不存在隐式全局随机状态.

use ndarray::{Array4, ArrayView4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::AugmentationConfig;
use crate::consts::label::HIPPO_BACKGROUND;
use crate::errors::TransformError;

pub mod affine;
pub mod elastic;
pub mod flip;
pub mod resample;

pub use affine::AffineParams;
pub use elastic::ElasticParams;

/// 空间重采样分支: 仿射或弹性形变二选一 (对应上游的 `OneOf`).
#[derive(Debug, Clone, PartialEq)]
pub enum Warp {
    /// 仿射分支.
    Affine(AffineParams),

    /// 弹性形变分支.
    Elastic(ElasticParams),
}

/// 一次增强实例的完整参数记录.
///
/// 记录归属于且仅归属于一个 [`AugmentedVariant`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRecord {
    /// 被翻转的空间轴.
    pub flipped: [bool; 3],

    /// 重采样分支. `None` 代表未施加空间形变.
    pub warp: Option<Warp>,
}

impl TransformRecord {
    /// 恒等变换记录.
    #[inline]
    pub fn identity() -> Self {
        Self {
            flipped: [false; 3],
            warp: None,
        }
    }

    /// 该记录是否恒等.
    #[inline]
    pub fn is_identity(&self) -> bool {
        self.flipped == [false; 3] && self.warp.is_none()
    }

    /// 正向增强: 翻转, 然后重采样. 用于强度图像, 出界填 0.
    pub fn apply(&self, input: &ArrayView4<f32>) -> Array4<f32> {
        let flipped = flip::flip_spatial(input, self.flipped);
        match &self.warp {
            None => flipped,
            Some(Warp::Affine(p)) => p.apply(&flipped.view()),
            Some(Warp::Elastic(p)) => p.apply(&flipped.view()),
        }
    }

    /// 逆变换重建: 以与正向相反的次序撤销各步变换, 把增强空间中的
    /// 逐类概率张量映回原始体素网格.
    ///
    /// 逆映射后落在支撑域之外的体素以背景概率填充
    /// (背景通道填 1, 其余通道填 0). 恒等记录是严格的 no-op.
    pub fn apply_inverse(&self, probs: &ArrayView4<f32>) -> Result<Array4<f32>, TransformError> {
        let fill = |c: usize| {
            if c == HIPPO_BACKGROUND as usize {
                1.0
            } else {
                0.0
            }
        };

        let unwarped = match &self.warp {
            None => probs.to_owned(),
            Some(Warp::Affine(p)) => p.apply_inverse(probs, fill)?,
            Some(Warp::Elastic(p)) => p.apply_inverse(probs, fill),
        };
        Ok(flip::flip_spatial(&unwarped.view(), self.flipped))
    }
}

/// 一个增强变体: 稳定编号, 增强空间中的张量, 以及变换记录.
///
/// 生命周期局限于单次 pipeline 调用, 逆变换重建之后即被丢弃.
#[derive(Debug, Clone)]
pub struct AugmentedVariant {
    /// 稳定编号, 等于该变体在请求序列中的下标.
    /// 后续阶段以此把预测与变换记录关联起来, 与执行顺序无关.
    pub id: usize,

    /// 增强空间中的张量, `[channel, x, y, z]`.
    pub tensor: Array4<f32>,

    /// 产生该变体的变换记录.
    pub record: TransformRecord,
}

/// 采样单条变换记录.
fn sample_record(rng: &mut StdRng, cfg: &AugmentationConfig) -> TransformRecord {
    let mut flipped = [false; 3];
    for (f, &enabled) in flipped.iter_mut().zip(cfg.flip.axes.iter()) {
        if enabled && rng.gen_bool(cfg.flip.flip_probability.clamp(0.0, 1.0)) {
            *f = true;
        }
    }

    let total = cfg.branch_total();
    let warp = if total <= 0.0 {
        None
    } else if rng.gen_bool((cfg.affine_probability / total).clamp(0.0, 1.0)) {
        Some(Warp::Affine(AffineParams::sample(rng, &cfg.affine)))
    } else {
        Some(Warp::Elastic(ElasticParams::sample(rng, &cfg.elastic)))
    };

    TransformRecord { flipped, warp }
}

/// 第 `id` 个变体的派生种子. 各变体的随机流相互独立,
/// 因此变体生成次序 (串行或并行) 不影响结果.
#[inline]
fn variant_seed(seed: u64, id: usize) -> u64 {
    // SplitMix64 的一步混合, 避免相邻种子产生相关随机流.
    let mut s = seed.wrapping_add((id as u64).wrapping_mul(0x9e3779b97f4a7c15));
    s = (s ^ (s >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    s = (s ^ (s >> 27)).wrapping_mul(0x94d049bb133111eb);
    s ^ (s >> 31)
}

/// 产出第 `id` 个变体. `id == 0` 固定为恒等变体.
fn make_variant(
    input: &ArrayView4<f32>,
    cfg: &AugmentationConfig,
    seed: u64,
    id: usize,
) -> AugmentedVariant {
    let record = if id == 0 {
        TransformRecord::identity()
    } else {
        let mut rng = StdRng::seed_from_u64(variant_seed(seed, id));
        sample_record(&mut rng, cfg)
    };

    let tensor = if record.is_identity() {
        input.to_owned()
    } else {
        record.apply(input)
    };

    AugmentedVariant { id, tensor, record }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};

        /// 采样 `n` 个增强变体.
        ///
        /// 首个变体恒为未增强的恒等变体, 其余 `n - 1` 个独立随机采样
        /// (即恒等变体计入 `n` 内). 变体生成相互独立, 借助 `rayon`
        /// 并行执行; 输出按编号升序排列, 与串行版本逐位一致.
        pub fn sample_variants(
            input: &ArrayView4<f32>,
            cfg: &AugmentationConfig,
            n: usize,
            seed: u64,
        ) -> Vec<AugmentedVariant> {
            let mut variants: Vec<_> = (0..n)
                .into_par_iter()
                .map(|id| make_variant(input, cfg, seed, id))
                .collect();
            variants.sort_by_key(|v| v.id);
            variants
        }
    } else {
        /// 采样 `n` 个增强变体.
        ///
        /// 首个变体恒为未增强的恒等变体, 其余 `n - 1` 个独立随机采样
        /// (即恒等变体计入 `n` 内). 输出按编号升序排列.
        pub fn sample_variants(
            input: &ArrayView4<f32>,
            cfg: &AugmentationConfig,
            n: usize,
            seed: u64,
        ) -> Vec<AugmentedVariant> {
            (0..n).map(|id| make_variant(input, cfg, seed, id)).collect()
        }
    }
}
