//! 解剖分组模式 (ca_mode) 与标签空间归约.
//!
//! 模型原始输出有 [`RAW_NUM_CLASSES`] 个通道 (背景 + DG + CA1 + CA2 +
//! CA3 + SUB). 归约把若干相邻 CA 子区通道逐元素求和合并为一个通道.
//! 求和不重新 softmax, 逐体素概率质量守恒. 模式在 pipeline 启动时
//! 解析一次, 整个运行过程对每个样本统一使用.

use std::str::FromStr;

use ndarray::{Array4, ArrayView4, Axis};

use crate::consts::RAW_NUM_CLASSES;
use crate::errors::ConfigError;

/// 封闭的解剖分组模式集合.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CaMode {
    /// `"1/2/3"`: 恒等, CA1/CA2/CA3 保持独立.
    Separate,

    /// `"1/23"`: 合并 CA2 与 CA3.
    MergePair,

    /// `"123"`: 合并 CA1, CA2 与 CA3.
    MergeTriple,

    /// `"binary"`: 所有前景通道合并为单一前景.
    Binary,
}

impl FromStr for CaMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1/2/3" => Ok(Self::Separate),
            "1/23" => Ok(Self::MergePair),
            "123" => Ok(Self::MergeTriple),
            "binary" => Ok(Self::Binary),
            other => Err(ConfigError::UnknownCaMode(other.to_owned())),
        }
    }
}

impl CaMode {
    /// 归约后的通道个数.
    #[inline]
    pub fn num_classes(&self) -> usize {
        match self {
            Self::Separate => RAW_NUM_CLASSES,
            Self::MergePair => RAW_NUM_CLASSES - 1,
            Self::MergeTriple => RAW_NUM_CLASSES - 2,
            Self::Binary => 2,
        }
    }

    /// 归约后各输出通道对应的原始通道组.
    ///
    /// 组内原始通道逐元素求和. 组次序即输出通道次序,
    /// 背景恒为第 0 组.
    fn groups(&self) -> &'static [&'static [usize]] {
        match self {
            // 0 bg, 1 DG, 2 CA1, 3 CA2, 4 CA3, 5 SUB
            Self::Separate => &[&[0], &[1], &[2], &[3], &[4], &[5]],
            Self::MergePair => &[&[0], &[1], &[2], &[3, 4], &[5]],
            Self::MergeTriple => &[&[0], &[1], &[2, 3, 4], &[5]],
            Self::Binary => &[&[0], &[1, 2, 3, 4, 5]],
        }
    }

    /// 对 `[classes, x, y, z]` 张量的通道轴做归约.
    ///
    /// 纯函数: 输入既可以是概率也可以是 logits, 本函数只做逐元素求和.
    /// 输入通道数必须等于 [`RAW_NUM_CLASSES`], 否则 panic
    /// (上游引擎输出形状已在推理阶段校验).
    pub fn reduce(&self, input: &ArrayView4<f32>) -> Array4<f32> {
        assert_eq!(
            input.len_of(Axis(0)),
            RAW_NUM_CLASSES,
            "归约输入通道数与模型输出不符"
        );

        let s = input.shape();
        let groups = self.groups();

        let mut out = Array4::<f32>::zeros((groups.len(), s[1], s[2], s[3]));
        for (gi, group) in groups.iter().enumerate() {
            let mut dst = out.index_axis_mut(Axis(0), gi);
            for &ci in group.iter() {
                dst += &input.index_axis(Axis(0), ci);
            }
        }
        out
    }
}
