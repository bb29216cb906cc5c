//! 预测不确定度估计.
//!
//! 逐体素不确定度定义为样本平均类别分布的熵:
//! `-Σ_c mean_s(p_s,c) · ln(mean_s(p_s,c) + ε)`, 并在 0 处截断以
//! 抑制浮点误差产生的微小负值. 熵越高, 集成内部分歧越大.

use ndarray::{Array3, Array4, ArrayView5, Axis};

use crate::consts::ENTROPY_EPS;

/// 计算一个受试者样本栈的逐体素预测熵.
///
/// `stack` 形状为 `[samples, classes, x, y, z]`, 要求 `samples > 1`:
/// 单样本栈不存在集成分歧的概念, 传入即 panic.
/// 通道数为 1 (单前景概率图) 时先扩展为二类分布 `{p, 1 - p}`.
pub fn voxelwise_uncertainty(stack: &ArrayView5<f32>) -> Array3<f32> {
    let s = stack.shape();
    assert!(
        s[0] > 1,
        "单样本栈没有定义的集成不确定度 (samples = {})",
        s[0]
    );

    // 样本轴平均: [classes, x, y, z].
    let mean = stack.mean_axis(Axis(0)).unwrap();

    let mean: Array4<f32> = if s[1] == 1 {
        let p = mean.index_axis(Axis(0), 0).to_owned();
        let mut two = Array4::<f32>::zeros((2, s[2], s[3], s[4]));
        two.index_axis_mut(Axis(0), 0).assign(&p);
        two.index_axis_mut(Axis(0), 1).assign(&p.mapv(|v| 1.0 - v));
        two
    } else {
        mean
    };

    let mut out = Array3::<f32>::zeros((s[2], s[3], s[4]));
    for ((x, y, z), u) in out.indexed_iter_mut() {
        let mut h = 0.0f32;
        for c in 0..mean.len_of(Axis(0)) {
            let p = mean[(c, x, y, z)];
            h -= p * (p + ENTROPY_EPS).ln();
        }
        *u = h.max(0.0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array5;

    fn f32_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    /// 所有样本完全一致 (one-hot) 时, 熵处处约等于 0.
    #[test]
    fn test_zero_disagreement() {
        let mut stack = Array5::<f32>::zeros((4, 3, 2, 2, 2));
        stack.index_axis_mut(Axis(1), 1).fill(1.0);

        let u = voxelwise_uncertainty(&stack.view());
        assert!(u.iter().all(|&v| v.abs() < 1e-4));
        assert!(u.iter().all(|&v| v >= 0.0), "熵必须在 0 处截断");
    }

    /// 单通道 p = 0.5 的图, 二类扩展后熵为 ln 2.
    #[test]
    fn test_binary_expansion_half() {
        let stack = Array5::<f32>::from_elem((2, 1, 2, 2, 2), 0.5);

        let u = voxelwise_uncertainty(&stack.view());
        let ln2 = std::f32::consts::LN_2;
        assert!(u.iter().all(|&v| f32_eq(v, ln2)));
    }

    /// 两个样本各执一词时熵为 ln 2 (平均分布为均匀二类).
    #[test]
    fn test_full_disagreement() {
        let mut stack = Array5::<f32>::zeros((2, 2, 1, 1, 1));
        stack[(0, 0, 0, 0, 0)] = 1.0;
        stack[(1, 1, 0, 0, 0)] = 1.0;

        let u = voxelwise_uncertainty(&stack.view());
        assert!(f32_eq(u[(0, 0, 0)], std::f32::consts::LN_2));
    }

    /// 单样本栈是调用方错误.
    #[test]
    #[should_panic]
    fn test_single_sample_panics() {
        let stack = Array5::<f32>::zeros((1, 2, 1, 1, 1));
        let _ = voxelwise_uncertainty(&stack.view());
    }
}
