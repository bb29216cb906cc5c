//! 模型工件的发现与完整性校验.
//!
//! 模型文件的下载由外部 artifact provider 负责; 本模块只保证引擎
//! 构建之前, 给定目录下的模型文件存在且内容与期望的 xxh3-64
//! 校验和一致. 校验失败由调用方决定重新获取, 核心直接报
//! [`EngineError`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use xxhash_rust::xxh3::Xxh3;

use crate::errors::EngineError;

/// 获取 `{用户主目录}/hs-berry/models` 目录, 即默认模型存放位置.
pub fn default_models_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("hs-berry");
    ans.push("models");
    Some(ans)
}

/// 流式计算文件内容的 xxh3-64.
pub fn xxh3_file<P: AsRef<Path>>(path: P) -> std::io::Result<u64> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);
    let mut hasher = Xxh3::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.digest())
}

/// 校验单个模型文件: 存在且校验和一致.
pub fn verify_model<P: AsRef<Path>>(path: P, expected_xxh3: u64) -> Result<(), EngineError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(EngineError::ModelNotFound(path.to_path_buf()));
    }

    let actual = xxh3_file(path).map_err(|e| EngineError::Io(path.to_path_buf(), e))?;
    if actual != expected_xxh3 {
        return Err(EngineError::ChecksumMismatch(
            path.to_path_buf(),
            expected_xxh3,
            actual,
        ));
    }
    Ok(())
}

/// 按文件名校验一组模型文件.
///
/// `checksums` 把模型文件名映射到期望的 xxh3-64; 映射中列出的模型
/// 逐一调用 [`verify_model`], 未列出的模型跳过. 任一模型校验失败则
/// 整体失败, 不继续校验后续模型.
pub fn verify_models(
    models: &[PathBuf],
    checksums: &HashMap<String, u64>,
) -> Result<(), EngineError> {
    if checksums.is_empty() {
        return Ok(());
    }

    for model in models {
        let name = model
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(&expected) = checksums.get(&name) {
            verify_model(model, expected)?;
        }
    }
    Ok(())
}

/// 枚举目录下全部 `*.onnx` 模型, 按文件名升序排列.
///
/// 升序保证引擎编号与目录扫描顺序无关. 目录不可读或没有模型
/// 都是构建错误.
pub fn discover_models(dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let mut models: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| EngineError::Io(dir.to_path_buf(), e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "onnx"))
        .collect();
    models.sort();

    if models.is_empty() {
        return Err(EngineError::EmptyModelDir(dir.to_path_buf()));
    }
    Ok(models)
}
