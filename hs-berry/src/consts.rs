//! 通用常量.

/// 分割标签 (硬分割输出体素值, 同时也是原始 logits 的通道下标).
pub mod label {
    /// 背景的体素值 / 通道下标.
    pub const HIPPO_BACKGROUND: u8 = 0;

    /// 齿状回 (dentate gyrus, DG) 的体素值 / 通道下标.
    pub const HIPPO_DG: u8 = 1;

    /// CA1 子区的体素值 / 通道下标.
    pub const HIPPO_CA1: u8 = 2;

    /// CA2 子区的体素值 / 通道下标.
    pub const HIPPO_CA2: u8 = 3;

    /// CA3 子区的体素值 / 通道下标.
    pub const HIPPO_CA3: u8 = 4;

    /// 下托 (subiculum, SUB) 的体素值 / 通道下标.
    pub const HIPPO_SUB: u8 = 5;

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, HIPPO_BACKGROUND)
    }

    /// 体素是否属于 cornu ammonis (CA1/CA2/CA3)?
    #[inline]
    pub const fn is_cornu_ammonis(p: u8) -> bool {
        matches!(p, HIPPO_CA1 | HIPPO_CA2 | HIPPO_CA3)
    }

    /// 体素是否是前景 (任一海马子区)?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        !is_background(p) && p <= HIPPO_SUB
    }
}

/// 预训练模型输出的原始通道个数 (背景 + 5 个子区).
pub const RAW_NUM_CLASSES: usize = 6;

/// 预处理时, 各空间维度须补齐到该值的整数倍, 与模型的下采样层数对应.
pub const SHAPE_MULTIPLE: usize = 8;

/// ONNX 模型输入张量名.
pub const MODEL_INPUT_NAME: &str = "input";

/// 熵计算的数值稳定项.
pub const ENTROPY_EPS: f32 = 1e-12;
