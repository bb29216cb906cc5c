//! 体数据预处理.
//!
//! 对应上游推理约定: 强度 z-normalization 后, 将空间形状补齐到
//! [`SHAPE_MULTIPLE`](crate::consts::SHAPE_MULTIPLE) 的整数倍,
//! 以满足模型下采样路径的要求. 补齐信息记录在 [`PadRecord`] 中,
//! 以便把最终分割结果裁剪回原始网格.
//!
//! 坐标系规范化 (reorientation) 属于外部 ROI provider 的职责,
//! 本模块假定输入已处于期望朝向.

use ndarray::{s, Array3, Array4, Axis};

use crate::consts::SHAPE_MULTIPLE;
use crate::data::MriVolume;
use crate::Idx3d;

/// 空间补齐记录. 记录每个空间轴前后各补了多少体素.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadRecord {
    /// 各空间轴前侧补齐量.
    pub before: [usize; 3],

    /// 各空间轴后侧补齐量.
    pub after: [usize; 3],
}

impl PadRecord {
    /// 补齐是否为空操作.
    #[inline]
    pub fn is_identity(&self) -> bool {
        self.before == [0; 3] && self.after == [0; 3]
    }

    /// 补齐后的空间形状.
    #[inline]
    pub fn padded_shape(&self, (x, y, z): Idx3d) -> Idx3d {
        (
            x + self.before[0] + self.after[0],
            y + self.before[1] + self.after[1],
            z + self.before[2] + self.after[2],
        )
    }

    /// 将 3D 结果体数据裁剪回补齐前的网格.
    pub fn crop<T: Clone>(&self, vol: &Array3<T>) -> Array3<T> {
        let s = vol.shape();
        let hi = [
            s[0] - self.after[0],
            s[1] - self.after[1],
            s[2] - self.after[2],
        ];
        vol.slice(s![
            self.before[0]..hi[0],
            self.before[1]..hi[1],
            self.before[2]..hi[2]
        ])
        .to_owned()
    }
}

/// 对每个通道做 z-normalization: `(v - mean) / std`.
///
/// 统计量在全通道体素上计算. 标准差退化 (常数图像) 时只做去均值.
fn znormalize(mut data: Array4<f32>) -> Array4<f32> {
    for mut ch in data.axis_iter_mut(Axis(0)) {
        let n = ch.len() as f64;
        let mean = ch.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = ch.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();

        let (mean, std) = (mean as f32, std as f32);
        if std > f32::EPSILON {
            ch.mapv_inplace(|v| (v - mean) / std);
        } else {
            ch.mapv_inplace(|v| v - mean);
        }
    }
    data
}

/// 单轴补齐量, 平均分配到前后两侧 (余数放在后侧).
#[inline]
fn pad_amount(len: usize) -> (usize, usize) {
    let rem = len % SHAPE_MULTIPLE;
    if rem == 0 {
        return (0, 0);
    }
    let total = SHAPE_MULTIPLE - rem;
    (total / 2, total - total / 2)
}

/// 预处理入口: z-normalization + 空间补齐.
///
/// 返回预处理后的体数据与补齐记录.
pub fn preprocess(volume: MriVolume) -> (MriVolume, PadRecord) {
    let header = Box::new(volume.header().clone());
    let data = znormalize(volume.into_data());

    let s = data.shape();
    let (c, shape) = (s[0], [s[1], s[2], s[3]]);

    let mut before = [0usize; 3];
    let mut after = [0usize; 3];
    for axis in 0..3 {
        (before[axis], after[axis]) = pad_amount(shape[axis]);
    }
    let record = PadRecord { before, after };

    if record.is_identity() {
        return (MriVolume::from_parts(header, data), record);
    }

    let (px, py, pz) = record.padded_shape((shape[0], shape[1], shape[2]));
    let mut padded = Array4::<f32>::zeros((c, px, py, pz));
    padded
        .slice_mut(s![
            ..,
            before[0]..before[0] + shape[0],
            before[1]..before[1] + shape[1],
            before[2]..before[2] + shape[2]
        ])
        .assign(&data);

    (MriVolume::from_parts(header, padded), record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic_volume;
    use ndarray::Array4;

    fn f32_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    /// 已是 8 的倍数的形状不补齐, 且 z-normalization 后均值为 0.
    #[test]
    fn test_preprocess_no_pad() {
        let mut data = Array4::<f32>::zeros((1, 8, 8, 8));
        data.iter_mut().enumerate().for_each(|(i, v)| *v = i as f32);

        let (vol, record) = preprocess(synthetic_volume(data));
        assert!(record.is_identity());
        assert_eq!(vol.spatial_shape(), (8, 8, 8));

        let mean = vol.data().iter().sum::<f32>() / 512.0;
        assert!(f32_eq(mean, 0.0));
    }

    /// 非整倍形状补齐到下一个 8 的倍数, 裁剪后恢复原形状.
    #[test]
    fn test_preprocess_pad_and_crop() {
        let data = Array4::<f32>::ones((1, 5, 8, 13));
        let (vol, record) = preprocess(synthetic_volume(data));

        assert_eq!(vol.spatial_shape(), (8, 8, 16));
        assert_eq!(record.padded_shape((5, 8, 13)), (8, 8, 16));

        let seg = Array3::<u8>::zeros((8, 8, 16));
        let cropped = record.crop(&seg);
        assert_eq!(cropped.shape(), &[5, 8, 13]);
    }

    /// 常数图像的标准差退化路径: 不产生 NaN.
    #[test]
    fn test_znorm_constant_image() {
        let data = Array4::<f32>::from_elem((1, 8, 8, 8), 42.0);
        let (vol, _) = preprocess(synthetic_volume(data));
        assert!(vol.data().iter().all(|v| v.is_finite()));
        assert!(vol.data().iter().all(|&v| f32_eq(v, 0.0)));
    }
}
