//! batch 调度.
//!
//! 把有序的增强变体序列切分为与引擎约束相容的连续 batch, 并驱动
//! 引擎完成推理. 固定 batch 后端的整除性在任何推理调用之前检查,
//! 违反属于致命配置错误而不是运行时错误.

use std::ops::Range;

use ndarray::{s, Array4, Array5, Axis};

use crate::augment::AugmentedVariant;
use crate::engine::InferenceEngine;
use crate::errors::{ConfigError, SegError};

/// 校验变体总数与整个引擎集合的 batch 约束相容.
///
/// 在任何推理调用之前执行; 对固定 batch 引擎要求整除.
pub fn validate(n_variants: usize, engines: &[InferenceEngine]) -> Result<(), ConfigError> {
    if engines.is_empty() {
        return Err(ConfigError::NoEngines);
    }
    if n_variants == 0 {
        return Err(ConfigError::NoVariants);
    }

    for engine in engines {
        if let Some(b) = engine.required_batch() {
            if n_variants % b != 0 {
                return Err(ConfigError::BatchIndivisible(n_variants, b));
            }
        }
    }
    Ok(())
}

/// 把 `0..n` 切分为大小至多 `batch` 的连续区间.
///
/// `allow_tail` 为 false 时要求整除 (固定 batch 后端);
/// 为 true 时允许最后一个短 batch (通用后端).
pub fn plan(n: usize, batch: usize, allow_tail: bool) -> Result<Vec<Range<usize>>, ConfigError> {
    if batch == 0 {
        return Err(ConfigError::InvalidBatchSize(0));
    }
    if !allow_tail && n % batch != 0 {
        return Err(ConfigError::BatchIndivisible(n, batch));
    }

    Ok((0..n)
        .step_by(batch)
        .map(|lo| lo..usize::min(lo + batch, n))
        .collect())
}

/// 把一段变体堆叠为 `[batch, channel, x, y, z]` 张量.
fn stack_batch(variants: &[AugmentedVariant]) -> Array5<f32> {
    let s = variants[0].tensor.shape();
    let mut batch = Array5::<f32>::zeros((variants.len(), s[0], s[1], s[2], s[3]));
    for (i, v) in variants.iter().enumerate() {
        batch.slice_mut(s![i, .., .., .., ..]).assign(&v.tensor);
    }
    batch
}

/// 用单个引擎按序推理全部变体.
///
/// 返回与 `variants` 等长, 次序一一对应的原始 logits 序列
/// (每项形状 `[classes, x, y, z]`). 引擎实例不保证可重入,
/// 同一引擎的各 batch 串行执行.
pub fn run_engine(
    engine: &mut InferenceEngine,
    variants: &[AugmentedVariant],
    configured_batch: usize,
) -> Result<Vec<Array4<f32>>, SegError> {
    let (batch_size, allow_tail) = match engine.required_batch() {
        Some(b) => (b, false),
        None => (configured_batch, true),
    };

    let ranges = plan(variants.len(), batch_size, allow_tail)?;

    let mut logits = Vec::with_capacity(variants.len());
    for range in ranges {
        let batch = stack_batch(&variants[range]);
        let out = engine.predict(&batch.view())?;

        for sample in out.axis_iter(Axis(0)) {
            logits.push(sample.to_owned());
        }
    }
    Ok(logits)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 整除切分与短尾切分.
    #[test]
    fn test_plan_exact_and_tail() {
        let exact = plan(6, 2, false).unwrap();
        assert_eq!(exact, vec![0..2, 2..4, 4..6]);

        let tail = plan(5, 2, true).unwrap();
        assert_eq!(tail, vec![0..2, 2..4, 4..5]);
    }

    /// 固定 batch 下 5 个变体配 batch 2 是配置错误,
    /// 在任何推理调用之前暴露.
    #[test]
    fn test_plan_indivisible() {
        assert_eq!(
            plan(5, 2, false).unwrap_err(),
            ConfigError::BatchIndivisible(5, 2)
        );
    }

    /// batch size 0 非法.
    #[test]
    fn test_plan_zero_batch() {
        assert_eq!(
            plan(4, 0, true).unwrap_err(),
            ConfigError::InvalidBatchSize(0)
        );
    }

    /// 空引擎集合与零变体都是配置错误.
    #[test]
    fn test_validate_degenerate() {
        assert_eq!(validate(4, &[]).unwrap_err(), ConfigError::NoEngines);
    }
}
