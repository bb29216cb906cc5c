//! 集成聚合: 从概率样本栈到单一分类分割.
//!
//! 所有样本在进入本模块之前必须已经重建回同一原始体素网格;
//! 处于不同坐标空间的样本绝不允许参与聚合.

use ndarray::{s, Array3, Array5, ArrayView4, ArrayView5, Axis};

use super::{EnsembleResult, PredictionSample};

/// 对 `[classes, x, y, z]` 概率张量逐体素取 arg-maximum 类别.
///
/// 并列时取下标最小的类别 (严格大于才更新).
pub fn argmax_classes(probs: &ArrayView4<f32>) -> Array3<u8> {
    let s = probs.shape();
    let mut out = Array3::<u8>::zeros((s[1], s[2], s[3]));

    for ((x, y, z), lab) in out.indexed_iter_mut() {
        let mut best = 0usize;
        let mut best_v = probs[(0, x, y, z)];
        for c in 1..s[0] {
            let v = probs[(c, x, y, z)];
            if v > best_v {
                best = c;
                best_v = v;
            }
        }
        *lab = best as u8;
    }
    out
}

/// 逐体素多数表决.
///
/// 对样本栈 `[samples, classes, x, y, z]`: 先取每个样本的 arg-maximum
/// 类别, 再在样本轴上取众数; 平票时取类别下标最小者.
/// 这是从概率集成到单一分类输出的唯一归约.
pub fn majority_vote(stack: &ArrayView5<f32>) -> Array3<u8> {
    let s = stack.shape();
    let (n_samples, n_classes) = (s[0], s[1]);
    assert!(n_samples >= 1, "空样本栈无法表决");

    let votes: Vec<Array3<u8>> = (0..n_samples)
        .map(|i| argmax_classes(&stack.index_axis(Axis(0), i)))
        .collect();

    let mut out = Array3::<u8>::zeros((s[2], s[3], s[4]));
    let mut counts = vec![0u32; n_classes];

    for ((x, y, z), lab) in out.indexed_iter_mut() {
        counts.iter_mut().for_each(|c| *c = 0);
        for v in votes.iter() {
            counts[v[(x, y, z)] as usize] += 1;
        }

        // 从低类别开始扫描, 严格大于才替换: 平票自然落在最小下标上.
        let mut best = 0usize;
        for (c, &cnt) in counts.iter().enumerate().skip(1) {
            if cnt > counts[best] {
                best = c;
            }
        }
        *lab = best as u8;
    }
    out
}

/// 把重建后的预测样本聚合为最终结果.
///
/// 样本按 (engine, augmentation) 编号排序后沿新样本轴堆叠,
/// 因此 `soft_predictions` 的样本次序与并行执行顺序无关.
/// 所有样本必须同形状 (同一 ca_mode, 同一原始网格), 否则 panic.
pub fn aggregate(mut samples: Vec<PredictionSample>) -> EnsembleResult {
    assert!(!samples.is_empty(), "没有可聚合的预测样本");
    samples.sort_by_key(|p| (p.engine_id, p.aug_id));

    let shape = samples[0].probs.raw_dim();
    assert!(
        samples.iter().all(|p| p.probs.raw_dim() == shape),
        "样本形状不一致, 不能聚合"
    );

    let (c, x, y, z) = (shape[0], shape[1], shape[2], shape[3]);
    let mut soft = Array5::<f32>::zeros((samples.len(), c, x, y, z));
    for (i, p) in samples.iter().enumerate() {
        soft.slice_mut(s![i, .., .., .., ..]).assign(&p.probs);
    }

    let hard = majority_vote(&soft.view());
    let sample_ids = samples.into_iter().map(|p| (p.engine_id, p.aug_id)).collect();

    EnsembleResult {
        soft_predictions: soft,
        hard_segmentation: hard,
        sample_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array4, Array5};

    /// 构造 1x1x1 体素, 给定各类概率的单样本.
    fn voxel_sample(engine_id: usize, aug_id: usize, probs: &[f32]) -> PredictionSample {
        let mut t = Array4::<f32>::zeros((probs.len(), 1, 1, 1));
        for (c, &p) in probs.iter().enumerate() {
            t[(c, 0, 0, 0)] = p;
        }
        PredictionSample {
            engine_id,
            aug_id,
            probs: t,
        }
    }

    /// argmax 的平票取最小类别下标.
    #[test]
    fn test_argmax_tie_lowest() {
        let s = voxel_sample(0, 0, &[0.4, 0.4, 0.2]);
        let lab = argmax_classes(&s.probs.view());
        assert_eq!(lab[(0, 0, 0)], 0);
    }

    /// 10 个样本中 6 票类别 2, 其余分散: 表决结果为 2.
    #[test]
    fn test_majority_vote_six_of_ten() {
        let mut stack = Array5::<f32>::zeros((10, 4, 1, 1, 1));
        let winners = [2, 2, 2, 2, 2, 2, 0, 1, 3, 0];
        for (i, &w) in winners.iter().enumerate() {
            stack[(i, w, 0, 0, 0)] = 1.0;
        }

        let hard = majority_vote(&stack.view());
        assert_eq!(hard[(0, 0, 0)], 2);
    }

    /// 5 vs 5 平票时取较小类别.
    #[test]
    fn test_majority_vote_tie() {
        let mut stack = Array5::<f32>::zeros((10, 4, 1, 1, 1));
        for i in 0..5 {
            stack[(i, 3, 0, 0, 0)] = 1.0;
            stack[(i + 5, 1, 0, 0, 0)] = 1.0;
        }

        let hard = majority_vote(&stack.view());
        assert_eq!(hard[(0, 0, 0)], 1);
    }

    /// 单样本聚合: hard 即该样本概率的 argmax.
    #[test]
    fn test_aggregate_single_sample() {
        let s = voxel_sample(0, 0, &[0.1, 0.2, 0.7]);
        let result = aggregate(vec![s]);

        assert_eq!(result.soft_predictions.shape()[0], 1);
        assert_eq!(result.hard_segmentation[(0, 0, 0)], 2);
        assert_eq!(result.sample_ids, vec![(0, 0)]);
    }

    /// 聚合按 (engine, augmentation) 排序, 与输入顺序无关.
    #[test]
    fn test_aggregate_order_stable() {
        let a = voxel_sample(1, 0, &[1.0, 0.0]);
        let b = voxel_sample(0, 1, &[0.0, 1.0]);
        let c = voxel_sample(0, 0, &[0.0, 1.0]);

        let result = aggregate(vec![a, b, c]);
        assert_eq!(result.sample_ids, vec![(0, 0), (0, 1), (1, 0)]);
        // 样本 0 对应 (engine 0, aug 0), 其 argmax 为类别 1.
        assert_eq!(result.soft_predictions[(0, 1, 0, 0, 0)], 1.0);
    }
}
