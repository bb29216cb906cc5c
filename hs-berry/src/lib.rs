#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供海马体 MRI 裁剪体数据的子区 (subfield) 语义分割能力:
//! 测试时增强 (TTA), 多模型集成推理, 以及逐体素预测不确定度估计.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 本 crate 只消费已经由外部 ROI 定位器裁剪并定向好的体数据,
//!    不负责海马体的定位, 也不负责把结果映回原生图像空间.
//! 2. 配置类错误 (非法 `ca_mode`, batch 整除性, CPU 指令集不满足)
//!    全部在任何推理调用之前暴露. 在非期望情况下, 程序会直接
//!    panic, 而不会导致内存错误. As what Rust promises.
//!
//! # 模块总览
//!
//! ### 体数据与预处理 ✅
//!
//! nii 读写, z-normalization, 形状补齐. 实现位于 `hs-berry/src/data`.
//!
//! ### 测试时增强与逆变换重建 ✅
//!
//! 翻转 / 仿射 / 弹性形变三类随机变换, 每个变体携带可精确求逆的
//! 变换记录. 随机性由显式种子驱动, 变体间相互独立, 可并行采样.
//!
//! 实现位于 `hs-berry/src/augment`.
//!
//! ### 推理引擎适配与 batch 调度 ✅
//!
//! 通用后端与固定 batch 的 CPU 优化后端共用 `predict(batch) -> logits`
//! 契约. 实现位于 `hs-berry/src/engine`.
//!
//! ### 标签空间归约 ✅
//!
//! `ca_mode` 的四种封闭分组模式, 逐元素求和, 概率质量守恒.
//! 实现位于 `hs-berry/src/labels.rs`.
//!
//! ### 集成聚合与不确定度 ✅
//!
//! 多数表决硬分割与样本平均分布熵. 实现位于 `hs-berry/src/seg` 与
//! `hs-berry/src/uncertainty.rs`.
//!
//! ### 模型工件校验 ✅
//!
//! `*.onnx` 发现与 xxh3-64 完整性校验. 实现位于 `hs-berry/src/models.rs`.

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

pub mod consts;

pub mod errors;

pub mod config;

/// 3D MRI nii 文件基础数据结构.
pub mod data;

pub use data::{MriVolume, PadRecord};

pub mod augment;

pub mod engine;

pub mod labels;

pub mod models;

pub mod seg;

pub use seg::{EnsembleResult, PredictionSample, Segmenter};

pub mod uncertainty;

pub mod prelude;
