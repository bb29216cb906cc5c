//! 空间轴翻转.
//!
//! 翻转是自逆变换, 正向与逆向共用同一实现.

use ndarray::{Array4, ArrayView4, Axis};

/// 按 `flipped` 指定的空间轴翻转张量. 通道轴不参与.
pub fn flip_spatial(input: &ArrayView4<f32>, flipped: [bool; 3]) -> Array4<f32> {
    let mut view = input.view();
    for (axis, &f) in flipped.iter().enumerate() {
        if f {
            view.invert_axis(Axis(axis + 1));
        }
    }
    // `to_owned` 会拷贝回标准布局, 后续阶段依赖连续内存.
    view.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    /// 翻转两次等于恒等.
    #[test]
    fn test_flip_involution() {
        let mut input = Array4::<f32>::zeros((1, 2, 3, 4));
        input.iter_mut().enumerate().for_each(|(i, v)| *v = i as f32);

        let flipped = [true, false, true];
        let once = flip_spatial(&input.view(), flipped);
        let twice = flip_spatial(&once.view(), flipped);

        assert_eq!(input, twice);
        assert_ne!(input, once);
    }

    /// 单轴翻转的首尾元素互换.
    #[test]
    fn test_flip_single_axis() {
        let mut input = Array4::<f32>::zeros((1, 4, 1, 1));
        input.iter_mut().enumerate().for_each(|(i, v)| *v = i as f32);

        let out = flip_spatial(&input.view(), [true, false, false]);
        assert_eq!(out[(0, 0, 0, 0)], 3.0);
        assert_eq!(out[(0, 3, 0, 0)], 0.0);
    }
}
