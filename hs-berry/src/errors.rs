//! 运行时错误.
//!
//! 错误分类遵循 "配置错误先于任何推理调用暴露" 的原则:
//! [`ConfigError`] 与 [`EngineError`] 均在 pipeline 启动阶段产生,
//! [`InferenceError`] 与 [`TransformError`] 产生于单次调用内部.
//! 任一错误都会使该次调用整体失败, 不存在部分结果.

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// 分割 pipeline 的统一错误类型.
#[derive(Debug)]
pub enum SegError {
    /// 启动前的配置错误. 不可重试.
    Config(ConfigError),

    /// 推理引擎构建错误.
    Engine(EngineError),

    /// 推理阶段后端返回了非期望结果.
    Inference(InferenceError),

    /// 逆变换重建错误.
    Transform(TransformError),
}

/// 配置错误. 全部在任何推理调用之前被检查出来.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// 未知的 `ca_mode` 字符串.
    UnknownCaMode(String),

    /// 未知的 execution provider 名字.
    UnknownProvider(String),

    /// 固定 batch 后端要求变体总数是 batch size 的整数倍.
    ///
    /// 参数依次为 `(n_variants, batch_size)`.
    BatchIndivisible(usize, usize),

    /// batch size 非法 (必须 >= 1).
    InvalidBatchSize(usize),

    /// 当前 CPU 不支持所请求的优化后端.
    CpuUnsupported,

    /// 引擎集合为空.
    NoEngines,

    /// 请求的增强变体个数为 0.
    NoVariants,
}

/// 推理引擎构建错误.
#[derive(Debug)]
pub enum EngineError {
    /// 模型文件不存在.
    ModelNotFound(PathBuf),

    /// 模型文件内容与期望的 xxh3-64 校验和不符.
    ///
    /// 参数依次为 `(路径, 期望值, 实际值)`.
    ChecksumMismatch(PathBuf, u64, u64),

    /// 模型目录中没有任何 `*.onnx` 文件.
    EmptyModelDir(PathBuf),

    /// 模型文件或目录存在但无法读取.
    Io(PathBuf, std::io::Error),

    /// ONNX Runtime 会话构建失败.
    Session(ort::Error),
}

/// 推理阶段错误.
#[derive(Debug)]
pub enum InferenceError {
    /// 后端调用本身失败.
    Backend(ort::Error),

    /// 后端输出张量秩非期望 (期望 5 维 `[batch, classes, x, y, z]`).
    UnexpectedRank(usize),

    /// 后端输出张量形状与输入 batch 不一致.
    ///
    /// 参数依次为 `(期望形状, 实际形状)`.
    UnexpectedShape(Vec<usize>, Vec<usize>),
}

/// 逆变换重建错误.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformError {
    /// 仿射矩阵退化 (行列式过小), 无法求逆.
    SingularAffine(f32),

    /// 变换记录与张量的空间形状不一致.
    ShapeMismatch,
}

impl fmt::Display for SegError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Engine(e) => write!(f, "engine construction error: {e}"),
            Self::Inference(e) => write!(f, "inference error: {e}"),
            Self::Transform(e) => write!(f, "transform error: {e}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCaMode(s) => {
                write!(f, "unknown ca_mode {s:?} (expected 1/2/3, 1/23, 123 or binary)")
            }
            Self::UnknownProvider(s) => write!(f, "unknown execution provider {s:?}"),
            Self::BatchIndivisible(n, b) => {
                write!(f, "{n} variants cannot be evenly split into batches of {b}")
            }
            Self::InvalidBatchSize(b) => write!(f, "invalid batch size {b}"),
            Self::CpuUnsupported => {
                write!(f, "optimized backend requires AVX2-capable x86-64 CPU")
            }
            Self::NoEngines => write!(f, "engine collection is empty"),
            Self::NoVariants => write!(f, "requested 0 augmentation variants"),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModelNotFound(p) => write!(f, "model file {} does not exist", p.display()),
            Self::ChecksumMismatch(p, want, got) => write!(
                f,
                "model file {} xxh3-64 mismatch: expected {want:016x}, got {got:016x}",
                p.display()
            ),
            Self::EmptyModelDir(p) => {
                write!(f, "no *.onnx model found under {}", p.display())
            }
            Self::Io(p, e) => write!(f, "cannot read {}: {e}", p.display()),
            Self::Session(e) => write!(f, "session build failed: {e}"),
        }
    }
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(e) => write!(f, "backend call failed: {e}"),
            Self::UnexpectedRank(r) => write!(f, "expected rank-5 output, got rank {r}"),
            Self::UnexpectedShape(want, got) => {
                write!(f, "expected output shape {want:?}, got {got:?}")
            }
        }
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingularAffine(det) => {
                write!(f, "affine matrix is singular (det = {det:e})")
            }
            Self::ShapeMismatch => write!(f, "transform record does not match tensor shape"),
        }
    }
}

impl Error for SegError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Engine(e) => Some(e),
            Self::Inference(e) => Some(e),
            Self::Transform(e) => Some(e),
        }
    }
}

impl Error for ConfigError {}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(_, e) => Some(e),
            Self::Session(e) => Some(e),
            _ => None,
        }
    }
}

impl Error for InferenceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Backend(e) => Some(e),
            _ => None,
        }
    }
}

impl Error for TransformError {}

impl From<ConfigError> for SegError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<EngineError> for SegError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<InferenceError> for SegError {
    fn from(e: InferenceError) -> Self {
        Self::Inference(e)
    }
}

impl From<TransformError> for SegError {
    fn from(e: TransformError) -> Self {
        Self::Transform(e)
    }
}
