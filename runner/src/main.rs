//! 批量分割入口.
//!
//! 遍历裁剪目录中的全部海马体 nii 文件, 对每个文件独立运行一次
//! 分割 pipeline, 写出硬分割与 (样本数大于 1 时) 不确定度图.
//! 单个文件的失败只记录日志并跳过, 不中断整个批次.

use std::error::Error;
use std::path::Path;

use hs_berry::prelude::*;

mod loader;

/// 处理单个裁剪文件: 读入 -> 预处理 -> 分割 -> 裁剪回原网格 -> 落盘.
fn process_one(path: &Path, segmenter: &mut Segmenter, seed: u64) -> Result<(), Box<dyn Error>> {
    let volume = MriVolume::open(path)?;
    let (volume, pad) = preprocess(volume);

    let result = segmenter.segment(&volume, seed)?;

    let stem = loader::stem(path);
    let parent = path.parent().unwrap_or(Path::new("."));

    let seg = pad.crop(&result.hard_segmentation);
    let seg_path = parent.join(format!("{stem}_seg_crop.nii.gz"));
    save_label(&seg_path, volume.header(), &seg)?;
    log::info!("saved segmentation to {}", seg_path.display());

    if result.num_samples() > 1 {
        let unc = voxelwise_uncertainty(&result.soft_predictions.view());
        let unc = pad.crop(&unc);
        let unc_path = parent.join(format!("{stem}_unc_crop.nii.gz"));
        save_scalar(&unc_path, volume.header(), &unc)?;
        log::info!("saved uncertainty map to {}", unc_path.display());
    }

    Ok(())
}

fn main() {
    simple_logger::init_with_level(log::Level::Info).unwrap();

    let crops_dir = loader::crops_dir_from_env_or_home();
    let models_dir = loader::models_dir_from_env_or_home();
    let seg_cfg = loader::segmentation_config_from_env();
    let engine_cfg = loader::engine_config_from_env();
    let seed = loader::seed_from_env();

    log::info!("crops dir: {}", crops_dir.display());
    log::info!("models dir: {}", models_dir.display());
    log::info!(
        "ca_mode: {}, tta: {}, num_aug: {}",
        seg_cfg.ca_mode,
        seg_cfg.test_time_augmentation,
        seg_cfg.test_time_num_aug
    );

    let engines = match load_engines(&models_dir, &engine_cfg) {
        Ok(e) => e,
        Err(e) => {
            log::error!("engine construction failed: {e}");
            std::process::exit(1);
        }
    };
    log::info!("loaded {} inference engines", engines.len());

    let mut segmenter = match Segmenter::new(
        engines,
        seg_cfg,
        AugmentationConfig::default(),
        &engine_cfg,
    ) {
        Ok(s) => s,
        Err(e) => {
            log::error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let crops = match loader::list_crops(&crops_dir) {
        Ok(c) => c,
        Err(e) => {
            log::error!("cannot list {}: {e}", crops_dir.display());
            std::process::exit(1);
        }
    };
    log::info!("found {} crops to segment", crops.len());

    let mut failures = 0usize;
    for (i, path) in crops.iter().enumerate() {
        log::info!("[{}/{}] segmenting {}", i + 1, crops.len(), path.display());

        // 单个受试者失败不影响其余受试者.
        if let Err(e) = process_one(path, &mut segmenter, seed) {
            log::error!("failed on {}: {e}", path.display());
            failures += 1;
        }
    }

    if failures > 0 {
        log::warn!("{failures} of {} crops failed", crops.len());
        std::process::exit(2);
    }
}
