//! 输入数据与运行配置加载.
//!
//! 上游 ROI 定位器把左右海马体裁剪为独立的 nii 文件放进裁剪目录,
//! 本模块负责发现这些文件并从环境变量组装运行配置.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use hs_berry::prelude::*;

/// 获取裁剪体数据基本路径.
///
/// 1. 若环境变量 `$HSB_CROPS_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/hippocampus/crops`.
pub fn crops_dir_from_env_or_home() -> PathBuf {
    if let Ok(d) = env::var("HSB_CROPS_DIR") {
        PathBuf::from(d)
    } else {
        let mut p = dirs::home_dir().expect("无法定位用户主目录");
        p.extend(["dataset", "hippocampus", "crops"]);
        p
    }
}

/// 获取模型目录.
///
/// 1. 若环境变量 `$HSB_MODELS_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/hs-berry/models`.
pub fn models_dir_from_env_or_home() -> PathBuf {
    if let Ok(d) = env::var("HSB_MODELS_DIR") {
        PathBuf::from(d)
    } else {
        default_models_dir().expect("无法定位用户主目录")
    }
}

/// 枚举目录下全部 nii 裁剪文件, 按文件名升序.
pub fn list_crops(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            let name = p.file_name().map(|s| s.to_string_lossy().into_owned());
            name.is_some_and(|n| n.ends_with(".nii") || n.ends_with(".nii.gz"))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// 环境变量读取, 带默认值与解析.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// 从环境变量组装分割配置.
///
/// `$HSB_TTA` (0/1), `$HSB_NUM_AUG`, `$HSB_CA_MODE`.
pub fn segmentation_config_from_env() -> SegmentationConfig {
    let default = SegmentationConfig::default();
    SegmentationConfig {
        test_time_augmentation: env_or("HSB_TTA", 1u8) != 0,
        test_time_num_aug: env_or("HSB_NUM_AUG", default.test_time_num_aug),
        ca_mode: env::var("HSB_CA_MODE").unwrap_or(default.ca_mode),
    }
}

/// 从环境变量组装引擎配置.
///
/// `$HSB_BACKEND` (`general`/`optimized`), `$HSB_BATCH_SIZE`,
/// `$HSB_PROVIDERS` (逗号分隔), `$HSB_THREADS`.
pub fn engine_config_from_env() -> EngineConfig {
    let default = EngineConfig::default();

    let backend = match env::var("HSB_BACKEND").as_deref() {
        Ok("optimized") => EngineBackend::Optimized,
        _ => EngineBackend::General,
    };

    let execution_providers = env::var("HSB_PROVIDERS")
        .map(|v| v.split(',').map(|s| s.trim().to_owned()).collect())
        .unwrap_or(default.execution_providers);

    EngineConfig {
        backend,
        batch_size: env_or("HSB_BATCH_SIZE", default.batch_size),
        execution_providers,
        num_threads: env::var("HSB_THREADS").ok().and_then(|v| v.parse().ok()),
        model_checksums: model_checksums_from_env(),
    }
}

/// 从 `$HSB_CHECKSUMS` 指向的清单文件读取模型校验和映射.
///
/// 变量未设置时返回空映射 (跳过校验); 文件不可读时记录警告并跳过.
pub fn model_checksums_from_env() -> HashMap<String, u64> {
    let Ok(path) = env::var("HSB_CHECKSUMS") else {
        return HashMap::new();
    };
    match std::fs::read_to_string(&path) {
        Ok(content) => parse_checksum_manifest(&content),
        Err(e) => {
            log::warn!("cannot read checksum manifest {path}: {e}");
            HashMap::new()
        }
    }
}

/// 解析校验和清单: 每行 `<xxh3-64 十六进制> <模型文件名>`,
/// 与常见 `*sums` 工具的格式一致. 空行与 `#` 注释行忽略,
/// 无法解析的行记录警告后跳过.
fn parse_checksum_manifest(content: &str) -> HashMap<String, u64> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let sum = fields.next().and_then(|h| u64::from_str_radix(h, 16).ok());
        match (sum, fields.next()) {
            (Some(sum), Some(name)) => {
                map.insert(name.to_owned(), sum);
            }
            _ => log::warn!("ignoring malformed checksum line: {line}"),
        }
    }
    map
}

/// 随机种子: `$HSB_SEED`, 默认 0.
pub fn seed_from_env() -> u64 {
    env_or("HSB_SEED", 0u64)
}

/// 去掉 nii 扩展名的文件主干.
pub fn stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.trim_end_matches(".gz").trim_end_matches(".nii").to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// nii 扩展名剥离.
    #[test]
    fn test_stem() {
        assert_eq!(stem(Path::new("/a/b/sub-01_left.nii.gz")), "sub-01_left");
        assert_eq!(stem(Path::new("sub-01_right.nii")), "sub-01_right");
    }

    /// 清单解析: 合法行入映射, 注释与坏行跳过.
    #[test]
    fn test_parse_checksum_manifest() {
        let manifest = "\
# models fetched 2026-08
d94445b1cd7a331b  arunet_1.onnx
0123456789abcdef  arunet_2.onnx

not-a-hash  broken.onnx
";
        let map = parse_checksum_manifest(manifest);
        assert_eq!(map.len(), 2);
        assert_eq!(map["arunet_1.onnx"], 0xd94445b1cd7a331b);
        assert_eq!(map["arunet_2.onnx"], 0x0123456789abcdef);
        assert!(!map.contains_key("broken.onnx"));
    }
}
