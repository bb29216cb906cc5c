//! 运行配置.
//!
//! 所有配置在 pipeline 启动时一次性消费, 运行中途不可更改.
//! 字段布局与上游配置文件 (hydra 风格) 一一对应, 因此部分字段
//! (如 `ca_mode`) 以字符串形式保存, 在启动阶段解析并校验.

use std::collections::HashMap;

/// 随机翻转配置.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlipConfig {
    /// 各空间轴 (x, y, z) 是否参与随机翻转.
    pub axes: [bool; 3],

    /// 每个参与轴独立翻转的概率.
    pub flip_probability: f64,
}

impl Default for FlipConfig {
    fn default() -> Self {
        // 海马体左右裁剪后仅在 LR 轴上翻转有解剖学意义.
        Self {
            axes: [true, false, false],
            flip_probability: 0.5,
        }
    }
}

/// 随机仿射配置. 所有范围均对称: 实际采样区间为 `[-x, x]` 或 `[1 - x, 1 + x]`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AffineConfig {
    /// 各向同性缩放幅度. `0.2` 代表缩放系数取自 `[0.8, 1.2]`.
    pub scales: f32,

    /// 各轴旋转角度幅度, 以度为单位.
    pub degrees: f32,

    /// 各轴平移幅度, 以体素为单位.
    pub translation: f32,
}

impl Default for AffineConfig {
    fn default() -> Self {
        Self {
            scales: 0.2,
            degrees: 15.0,
            translation: 3.0,
        }
    }
}

/// 随机弹性形变配置.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ElasticConfig {
    /// 每个空间轴上的控制点个数. 必须 >= 4.
    pub num_control_points: usize,

    /// 控制点最大位移, 以体素为单位.
    pub max_displacement: f32,

    /// 锁定为零位移的边界控制点层数.
    pub locked_borders: usize,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            num_control_points: 4,
            max_displacement: 4.0,
            locked_borders: 2,
        }
    }
}

/// 测试时增强 (TTA) 的完整配置.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AugmentationConfig {
    /// 随机翻转配置. 翻转总是先于空间重采样变换.
    pub flip: FlipConfig,

    /// 随机仿射配置.
    pub affine: AffineConfig,

    /// 随机弹性形变配置.
    pub elastic: ElasticConfig,

    /// 采样到仿射分支的概率. 与 `elastic_probability` 二选一归一化.
    pub affine_probability: f64,

    /// 采样到弹性形变分支的概率.
    pub elastic_probability: f64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            flip: FlipConfig::default(),
            affine: AffineConfig::default(),
            elastic: ElasticConfig::default(),
            affine_probability: 0.8,
            elastic_probability: 0.2,
        }
    }
}

impl AugmentationConfig {
    /// 两个分支概率之和, 用于归一化.
    #[inline]
    pub(crate) fn branch_total(&self) -> f64 {
        self.affine_probability + self.elastic_probability
    }
}

/// 推理后端种类. 构建时一次性解析, 运行中不再按名字分发.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EngineBackend {
    /// 通用数值后端, 接受任意 batch size >= 1.
    General,

    /// 面向稀疏化/量化模型的 CPU 优化后端, batch size 在构建时固定.
    /// 构建时校验向量指令支持, 不满足则直接报配置错误.
    Optimized,
}

/// 推理引擎配置.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// 后端种类.
    pub backend: EngineBackend,

    /// 每次推理调用的 batch size. 对优化后端是硬性约束.
    pub batch_size: usize,

    /// 后端设备偏好, 按优先级排列. 如 `["cuda", "cpu"]`.
    /// 仅对通用后端有意义; 优化后端只在 CPU 上运行.
    pub execution_providers: Vec<String>,

    /// 推理线程数. `None` 代表交给后端自行决定.
    pub num_threads: Option<usize>,

    /// 模型文件名到期望 xxh3-64 校验和的映射.
    ///
    /// 引擎构建前, 映射中列出的模型逐一校验内容完整性;
    /// 未列出的模型跳过校验. 空映射代表完全不校验.
    pub model_checksums: HashMap<String, u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: EngineBackend::General,
            batch_size: 1,
            execution_providers: vec!["cpu".to_owned()],
            num_threads: None,
            model_checksums: HashMap::new(),
        }
    }
}

/// 分割过程配置.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentationConfig {
    /// 是否开启测试时增强. 关闭时每个引擎只推理一次恒等变体.
    pub test_time_augmentation: bool,

    /// 测试时增强的变体总数. 恒等变体计入其中 (即 `n` 包含 1 个恒等 +
    /// `n - 1` 个随机变体).
    pub test_time_num_aug: usize,

    /// 解剖分组模式字符串: `"1/2/3"`, `"1/23"`, `"123"` 或 `"binary"`.
    /// 启动时解析为 [`crate::labels::CaMode`], 未知取值是致命配置错误.
    pub ca_mode: String,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            test_time_augmentation: true,
            test_time_num_aug: 20,
            ca_mode: "1/2/3".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 默认配置须满足各模块的先验约束.
    #[test]
    fn test_default_config_sanity() {
        let aug = AugmentationConfig::default();
        assert!(aug.elastic.num_control_points >= 4);
        assert!(aug.branch_total() >= 0.0);

        let seg = SegmentationConfig::default();
        assert!(seg.test_time_num_aug >= 1);

        let engine = EngineConfig::default();
        assert!(engine.batch_size >= 1);
        assert!(!engine.execution_providers.is_empty());
    }
}
