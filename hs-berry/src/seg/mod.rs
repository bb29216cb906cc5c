//! 分割编排引擎.
//!
//! 单次调用按固定阶段顺序推进:
//! 增强采样 -> batch 调度 -> 推理 -> softmax -> 标签归约 ->
//! 逆变换重建 -> 集成聚合. 任一阶段失败则整次调用失败,
//! 不产出部分结果; 多受试者之间的失败隔离由外部编排负责.
//!
//! 每个样本自始至终携带 (engine, augmentation) 编号, 保证并行化
//! 任何一个阶段都不会破坏 "先对齐同一坐标系, 再聚合" 的前提.

use itertools::iproduct;
use ndarray::{Array3, Array4, Array5, ArrayView4, Axis};

use crate::augment::{sample_variants, AugmentedVariant};
use crate::config::{AugmentationConfig, EngineConfig, SegmentationConfig};
use crate::data::MriVolume;
use crate::engine::{scheduler, InferenceEngine};
use crate::errors::{ConfigError, SegError, TransformError};
use crate::labels::CaMode;

pub mod ensemble;

/// 一个已重建回原始体素网格的概率预测样本.
#[derive(Debug, Clone)]
pub struct PredictionSample {
    /// 产生该样本的增强变体编号.
    pub aug_id: usize,

    /// 产生该样本的引擎编号.
    pub engine_id: usize,

    /// 原始体素网格中的逐类概率张量, `[classes, x, y, z]`.
    pub probs: Array4<f32>,
}

/// 一次分割调用的完整结果.
#[derive(Debug, Clone)]
pub struct EnsembleResult {
    /// 概率样本栈, `[samples, classes, x, y, z]`,
    /// 按 (engine, augmentation) 编号升序排列.
    pub soft_predictions: Array5<f32>,

    /// 多数表决得到的分类分割, 形状等于原始体数据空间形状.
    pub hard_segmentation: Array3<u8>,

    /// 各样本的 `(engine_id, aug_id)` 来源标注, 与样本轴一一对应.
    pub sample_ids: Vec<(usize, usize)>,
}

impl EnsembleResult {
    /// 样本个数.
    #[inline]
    pub fn num_samples(&self) -> usize {
        self.soft_predictions.len_of(Axis(0))
    }
}

/// 对 `[classes, x, y, z]` logits 的通道轴做 softmax.
///
/// 减去逐体素最大值以保证数值稳定.
pub fn softmax_channels(logits: Array4<f32>) -> Array4<f32> {
    let mut out = logits;
    let s = out.shape().to_vec();

    for (x, y, z) in iproduct!(0..s[1], 0..s[2], 0..s[3]) {
        let mut max = f32::NEG_INFINITY;
        for c in 0..s[0] {
            max = max.max(out[(c, x, y, z)]);
        }
        let mut total = 0.0f32;
        for c in 0..s[0] {
            let e = (out[(c, x, y, z)] - max).exp();
            out[(c, x, y, z)] = e;
            total += e;
        }
        for c in 0..s[0] {
            out[(c, x, y, z)] /= total;
        }
    }
    out
}

/// 分割编排引擎.
///
/// 引擎集合与全部配置在构建时一次性固定; `ca_mode` 在此处解析,
/// 运行中途不可更换分组模式.
pub struct Segmenter {
    engines: Vec<InferenceEngine>,
    ca_mode: CaMode,
    seg_cfg: SegmentationConfig,
    aug_cfg: AugmentationConfig,
    configured_batch: usize,
}

impl Segmenter {
    /// 构建编排引擎. 所有配置错误在此处暴露.
    pub fn new(
        engines: Vec<InferenceEngine>,
        seg_cfg: SegmentationConfig,
        aug_cfg: AugmentationConfig,
        engine_cfg: &EngineConfig,
    ) -> Result<Self, SegError> {
        if engines.is_empty() {
            return Err(ConfigError::NoEngines.into());
        }
        let ca_mode: CaMode = seg_cfg.ca_mode.parse()?;

        // 整除性约束尽早检查, 不等到第一次 segment 调用.
        scheduler::validate(Self::num_variants_of(&seg_cfg), &engines)?;

        Ok(Self {
            engines,
            ca_mode,
            seg_cfg,
            aug_cfg,
            configured_batch: engine_cfg.batch_size,
        })
    }

    /// 本次运行的解剖分组模式.
    #[inline]
    pub fn ca_mode(&self) -> CaMode {
        self.ca_mode
    }

    /// 每个引擎的增强变体个数 (恒等变体计入其中).
    #[inline]
    pub fn num_variants(&self) -> usize {
        Self::num_variants_of(&self.seg_cfg)
    }

    #[inline]
    fn num_variants_of(cfg: &SegmentationConfig) -> usize {
        if cfg.test_time_augmentation {
            cfg.test_time_num_aug
        } else {
            1
        }
    }

    /// 对一个已裁剪, 已定向, 已预处理的体数据做一次完整分割.
    ///
    /// `seed` 驱动全部增强随机性; 同一 `(volume, seed)` 的结果可复现.
    /// 返回的样本个数恒等于 `num_variants() × 引擎个数`.
    pub fn segment(
        &mut self,
        volume: &MriVolume,
        seed: u64,
    ) -> Result<EnsembleResult, SegError> {
        let n = self.num_variants();
        scheduler::validate(n, &self.engines)?;

        let variants = sample_variants(&volume.data(), &self.aug_cfg, n, seed);
        log::debug!("augmented: {} variants (seed {seed})", variants.len());

        let mut samples = Vec::with_capacity(n * self.engines.len());
        for engine in self.engines.iter_mut() {
            let logits = scheduler::run_engine(engine, &variants, self.configured_batch)?;
            log::debug!("engine #{} ({}) inferred {n} variants", engine.id(), engine.name());

            for (variant, raw) in variants.iter().zip(logits) {
                samples.push(reconcile_sample(self.ca_mode, engine.id(), variant, raw)?);
            }
        }

        debug_assert_eq!(samples.len(), n * self.engines.len());
        Ok(ensemble::aggregate(samples))
    }
}

/// 单个样本的后处理链: softmax -> 标签归约 -> 逆变换重建.
///
/// 必须先重建回原始网格, 才允许与其它样本聚合.
fn reconcile_sample(
    ca_mode: CaMode,
    engine_id: usize,
    variant: &AugmentedVariant,
    raw_logits: Array4<f32>,
) -> Result<PredictionSample, SegError> {
    // 预测必须与产生它的变体处于同一体素网格, 否则逆变换记录不适用.
    if raw_logits.shape()[1..] != variant.tensor.shape()[1..] {
        return Err(TransformError::ShapeMismatch.into());
    }

    let probs = softmax_channels(raw_logits);
    let reduced = ca_mode.reduce(&probs.view());
    let reconciled = variant.record.apply_inverse(&reduced.view())?;

    Ok(PredictionSample {
        aug_id: variant.id,
        engine_id,
        probs: reconciled,
    })
}

/// 供测试与上层复用的纯数学路径: 不经过推理后端,
/// 直接对给定 logits 走与 [`Segmenter::segment`] 相同的
/// softmax/归约/重建/聚合链.
pub fn aggregate_raw_logits(
    ca_mode: CaMode,
    per_engine_logits: Vec<Vec<Array4<f32>>>,
    variants: &[AugmentedVariant],
) -> Result<EnsembleResult, SegError> {
    let mut samples = Vec::new();
    for (engine_id, logits) in per_engine_logits.into_iter().enumerate() {
        assert_eq!(logits.len(), variants.len(), "每个引擎必须覆盖全部变体");
        for (variant, raw) in variants.iter().zip(logits) {
            samples.push(reconcile_sample(ca_mode, engine_id, variant, raw)?);
        }
    }
    Ok(ensemble::aggregate(samples))
}
