//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::config::{
    AugmentationConfig, EngineBackend, EngineConfig, SegmentationConfig,
};
pub use crate::data::{preprocess, save_label, save_scalar, MriVolume, PadRecord};
pub use crate::errors::{ConfigError, EngineError, InferenceError, SegError, TransformError};

pub use crate::augment::{sample_variants, AugmentedVariant, TransformRecord};
pub use crate::engine::{load_engines, CpuSupportTier, InferenceEngine};
pub use crate::labels::CaMode;
pub use crate::seg::{EnsembleResult, PredictionSample, Segmenter};
pub use crate::uncertainty::voxelwise_uncertainty;

pub use crate::consts::label::{
    HIPPO_BACKGROUND, HIPPO_CA1, HIPPO_CA2, HIPPO_CA3, HIPPO_DG, HIPPO_SUB,
};
pub use crate::consts::RAW_NUM_CLASSES;

pub use crate::models::{default_models_dir, discover_models, verify_model, verify_models};
