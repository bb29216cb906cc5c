//! 推理引擎适配层.
//!
//! 两种后端变体隐藏在同一个 `predict(batch) -> logits` 能力之后:
//!
//! 1. **通用后端**: 常规 ONNX Runtime 会话, 接受任意 batch size >= 1,
//!    可按配置挂载 GPU 等 execution provider;
//! 2. **优化后端**: 面向稀疏化/量化模型的 CPU 执行方案, batch size
//!    在构建时固定, 构建时校验向量指令支持 (AVX2 起步), 不满足时
//!    直接报配置错误而不是静默退化.
//!
//! 后端种类在构建时一次性解析, 运行中不再按名字分发. 引擎集合由
//! 调用方显式构造并在整个运行期间复用.

use std::path::Path;

use ndarray::Array5;
use once_cell::sync::Lazy;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;

use crate::config::{EngineBackend, EngineConfig};
use crate::consts::{MODEL_INPUT_NAME, RAW_NUM_CLASSES};
use crate::data::BatchView;
use crate::errors::{ConfigError, EngineError, InferenceError, SegError};

pub mod scheduler;

/// CPU 向量指令支持级别, 决定优化后端的可用性与效率.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuSupportTier {
    /// AVX-512 VNNI: int8 量化网络的最优路径.
    Full,

    /// AVX-512: 快速推理.
    Partial,

    /// 仅 AVX2: 可用但较慢.
    Minimal,

    /// 无 AVX2: 优化后端不可用.
    Unsupported,
}

/// CPU 特性不会在进程运行中途变化, 只探测一次.
static DETECTED_TIER: Lazy<CpuSupportTier> = Lazy::new(CpuSupportTier::probe);

impl CpuSupportTier {
    /// 当前 CPU 的支持级别 (进程内缓存).
    pub fn detect() -> Self {
        *DETECTED_TIER
    }

    fn probe() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "x86_64")] {
                if std::arch::is_x86_feature_detected!("avx512vnni") {
                    Self::Full
                } else if std::arch::is_x86_feature_detected!("avx512f") {
                    Self::Partial
                } else if std::arch::is_x86_feature_detected!("avx2") {
                    Self::Minimal
                } else {
                    Self::Unsupported
                }
            } else {
                Self::Unsupported
            }
        }
    }

    /// 优化后端是否可用.
    #[inline]
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

/// 后端实现. 封闭集合, 构建后不可变.
#[derive(Debug)]
enum BackendImp {
    /// 通用数值后端.
    General { session: Session },

    /// 稀疏/量化优化后端, batch size 固定.
    Optimized { session: Session, batch_size: usize },
}

/// 一个已加载模型的推理引擎句柄.
///
/// 模型权重在构建时一次性载入, 之后跨调用只读共享; 引擎本身
/// 跨调用无状态.
#[derive(Debug)]
pub struct InferenceEngine {
    /// 稳定编号, 等于该引擎在集合中的下标.
    id: usize,

    /// 模型文件名, 用于日志.
    name: String,

    imp: BackendImp,
}

/// 把配置中的 provider 名字解析为 ort 的 execution provider.
fn resolve_provider(name: &str) -> Result<ExecutionProviderDispatch, ConfigError> {
    match name {
        "cpu" => Ok(CPUExecutionProvider::default().build()),
        "cuda" => Ok(CUDAExecutionProvider::default().build()),
        "coreml" => Ok(CoreMLExecutionProvider::default().build()),
        other => Err(ConfigError::UnknownProvider(other.to_owned())),
    }
}

impl InferenceEngine {
    /// 从模型文件构建推理引擎.
    ///
    /// 所有配置错误 (未知 provider, 非法 batch size, CPU 不支持优化
    /// 后端) 都在此处暴露, 先于任何推理调用.
    pub fn build(id: usize, model: &Path, cfg: &EngineConfig) -> Result<Self, SegError> {
        if cfg.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(0).into());
        }
        if !model.is_file() {
            return Err(EngineError::ModelNotFound(model.to_path_buf()).into());
        }

        let name = model
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| model.display().to_string());

        let imp = match cfg.backend {
            EngineBackend::General => {
                let providers = cfg
                    .execution_providers
                    .iter()
                    .map(|p| resolve_provider(p))
                    .collect::<Result<Vec<_>, _>>()?;

                let mut builder = Session::builder()
                    .map_err(EngineError::Session)?
                    .with_execution_providers(providers)
                    .map_err(EngineError::Session)?;
                if let Some(t) = cfg.num_threads {
                    builder = builder.with_intra_threads(t).map_err(EngineError::Session)?;
                }
                let session = builder
                    .commit_from_file(model)
                    .map_err(EngineError::Session)?;

                BackendImp::General { session }
            }
            EngineBackend::Optimized => {
                let tier = CpuSupportTier::detect();
                log::info!(
                    "optimized backend support (minimal: AVX2 | partial: AVX512 | full: AVX512 VNNI): {tier:?}"
                );
                if !tier.is_supported() {
                    return Err(ConfigError::CpuUnsupported.into());
                }

                let mut builder = Session::builder()
                    .map_err(EngineError::Session)?
                    .with_optimization_level(GraphOptimizationLevel::Level3)
                    .map_err(EngineError::Session)?;
                if let Some(t) = cfg.num_threads {
                    builder = builder.with_intra_threads(t).map_err(EngineError::Session)?;
                }
                let session = builder
                    .commit_from_file(model)
                    .map_err(EngineError::Session)?;

                BackendImp::Optimized {
                    session,
                    batch_size: cfg.batch_size,
                }
            }
        };

        log::debug!("engine #{id} loaded: {name}");
        Ok(Self { id, name, imp })
    }

    /// 稳定编号.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// 模型文件名.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 固定 batch 约束. `None` 代表任意 batch size >= 1.
    #[inline]
    pub fn required_batch(&self) -> Option<usize> {
        match &self.imp {
            BackendImp::General { .. } => None,
            BackendImp::Optimized { batch_size, .. } => Some(*batch_size),
        }
    }

    /// 对一个 batch 做一次前向推理.
    ///
    /// 输入形状 `[batch, channel, x, y, z]`, 输出形状
    /// `[batch, RAW_NUM_CLASSES, x, y, z]`; 输出形状不符是致命的
    /// [`InferenceError`].
    pub fn predict(&mut self, batch: &BatchView<'_>) -> Result<Array5<f32>, InferenceError> {
        let in_shape: Vec<usize> = batch.shape().to_vec();
        if let Some(required) = self.required_batch() {
            // scheduler 已保证, 此处兜底.
            debug_assert_eq!(in_shape[0], required);
        }

        let dims: Vec<i64> = in_shape.iter().map(|&d| d as i64).collect();
        let contiguous = batch.as_standard_layout();
        // 标准布局下必然连续, 不会失败.
        let slice = contiguous.as_slice().unwrap();

        let input = TensorRef::from_array_view((dims.as_slice(), slice))
            .map_err(InferenceError::Backend)?;

        let session = match &mut self.imp {
            BackendImp::General { session } => session,
            BackendImp::Optimized { session, .. } => session,
        };

        let out_name = match session.outputs.first() {
            Some(o) => o.name.clone(),
            None => return Err(InferenceError::UnexpectedRank(0)),
        };

        let outputs = session
            .run(ort::inputs![MODEL_INPUT_NAME => input])
            .map_err(InferenceError::Backend)?;

        let (out_shape, data) = outputs[out_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(InferenceError::Backend)?;

        let out_shape: Vec<usize> = out_shape.iter().map(|&d| d as usize).collect();
        if out_shape.len() != 5 {
            return Err(InferenceError::UnexpectedRank(out_shape.len()));
        }

        let expected = [
            in_shape[0],
            RAW_NUM_CLASSES,
            in_shape[2],
            in_shape[3],
            in_shape[4],
        ];
        if out_shape != expected {
            return Err(InferenceError::UnexpectedShape(expected.to_vec(), out_shape));
        }

        // 形状已校验, from_shape_vec 不会失败.
        Ok(Array5::from_shape_vec(
            (
                expected[0],
                expected[1],
                expected[2],
                expected[3],
                expected[4],
            ),
            data.to_vec(),
        )
        .unwrap())
    }
}

/// 从模型目录构建引擎集合.
///
/// 目录中的每个 `*.onnx` 文件各成为一个引擎, 按文件名升序编号
/// (见 [`crate::models::discover_models`]); 集合在运行开始前一次性
/// 构建完毕, 运行中不再重新扫描目录.
///
/// 配置中给出校验和映射时, 列出的模型先通过 xxh3-64 完整性校验,
/// 校验失败则不构建任何引擎.
pub fn load_engines(models_dir: &Path, cfg: &EngineConfig) -> Result<Vec<InferenceEngine>, SegError> {
    let models = crate::models::discover_models(models_dir)?;
    crate::models::verify_models(&models, &cfg.model_checksums)?;

    models
        .iter()
        .enumerate()
        .map(|(id, path)| InferenceEngine::build(id, path, cfg))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// provider 名字解析: 未知名字是配置错误.
    #[test]
    fn test_resolve_provider() {
        assert!(resolve_provider("cpu").is_ok());
        assert!(matches!(
            resolve_provider("tpu"),
            Err(ConfigError::UnknownProvider(_))
        ));
    }

    /// 不存在的模型文件在构建阶段即报错.
    #[test]
    fn test_build_missing_model() {
        let err = InferenceEngine::build(
            0,
            Path::new("/nonexistent/model.onnx"),
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SegError::Engine(EngineError::ModelNotFound(_))
        ));
    }

    /// 校验和不符时引擎集合整体构建失败, 先于任何会话构建.
    #[test]
    fn test_load_engines_checksum_gate() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("hs-berry-engine-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let model = dir.join("fake.onnx");
        std::fs::write(&model, b"not a real model").unwrap();

        let mut cfg = EngineConfig::default();
        cfg.model_checksums.insert("fake.onnx".to_owned(), 0);

        let err = load_engines(&dir, &cfg).unwrap_err();
        assert!(matches!(
            err,
            SegError::Engine(EngineError::ChecksumMismatch(_, _, _))
        ));

        std::fs::remove_file(model).unwrap();
        std::fs::remove_dir(dir).unwrap();
    }

    /// batch size 为 0 是配置错误, 先于一切文件访问.
    #[test]
    fn test_build_zero_batch() {
        let cfg = EngineConfig {
            batch_size: 0,
            ..EngineConfig::default()
        };
        let err = InferenceEngine::build(0, Path::new("/nonexistent/model.onnx"), &cfg)
            .unwrap_err();
        assert!(matches!(
            err,
            SegError::Config(ConfigError::InvalidBatchSize(0))
        ));
    }
}
