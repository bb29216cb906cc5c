//! MRI nii 文件基础数据结构.

use std::path::Path;

use ndarray::{Array3, Array4, ArrayView, ArrayView5, Axis, Ix4};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use nifti::writer::WriterOptions;

use crate::Idx3d;

pub mod preproc;

pub use preproc::{preprocess, PadRecord};

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// nii 格式 3D MRI 体数据, 包括 header 和强度数据.
///
/// 数据轴次序固定为 `[channel, x, y, z]`. 单对比度图像 channel 数为 1;
/// 多对比度 (如 T1w + T2w) 图像按通道堆叠, 前提是各对比度已在外部配准
/// 到同一体素网格.
///
/// 该结构不可变: 所有几何变换都产生新的 `MriVolume`.
#[derive(Debug, Clone)]
pub struct MriVolume {
    header: BoxedHeader,
    data: Array4<f32>,
}

impl MriVolume {
    /// 打开 nii 文件格式的 3D MRI. `path` 为 nii 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    ///
    /// 数据按 nifti 原生 `[X, Y, Z]` 次序读入, 并在最前面插入通道轴.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        let data = obj.into_volume().into_ndarray::<f32>()?;

        // ROI provider 给出的裁剪结果必然是 3D 标量体数据.
        let data = data.into_dimensionality::<ndarray::Ix3>().map_err(|_| {
            nifti::NiftiError::InvalidFormat
        })?;

        Ok(Self {
            header,
            data: data.insert_axis(Axis(0)),
        })
    }

    /// 从已有 header 和张量直接构造.
    ///
    /// 主要服务于增强变体和测试数据.
    #[inline]
    pub fn from_parts(header: BoxedHeader, data: Array4<f32>) -> Self {
        Self { header, data }
    }

    /// 获取 header 部分.
    #[inline]
    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    /// 获取通道个数.
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// 获取空间形状 `(x, y, z)`.
    #[inline]
    pub fn spatial_shape(&self) -> Idx3d {
        let s = self.data.shape();
        (s[1], s[2], s[3])
    }

    /// 获取单个体素分辨率 `(x, y, z)`, 以毫米为单位.
    #[inline]
    pub fn pix_dim(&self) -> [f64; 3] {
        let [_, x, y, z, ..] = self.header.pixdim;
        [x as f64, y as f64, z as f64]
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix4> {
        self.data.view()
    }

    /// 消费自身, 产出数据张量.
    #[inline]
    pub fn into_data(self) -> Array4<f32> {
        self.data
    }

    /// 将另一幅已配准到同一体素网格的对比度图像按通道堆叠进来.
    ///
    /// 两者空间形状不一致时 panic: 配准是外部协作者的职责,
    /// 形状不一致说明上游配准缺失.
    pub fn stack_channel(mut self, other: &Self) -> Self {
        assert_eq!(
            self.spatial_shape(),
            other.spatial_shape(),
            "多对比度图像必须先配准到同一体素网格"
        );
        for ch in other.data.axis_iter(Axis(0)) {
            self.data.push(Axis(0), ch).unwrap();
        }
        self
    }
}

/// 将 `u8` 硬分割结果以给定 nii 文件 header 为参照写到 `path`.
pub fn save_label<P: AsRef<Path>>(
    path: P,
    header: &NiftiHeader,
    seg: &Array3<u8>,
) -> nifti::Result<()> {
    WriterOptions::new(path.as_ref())
        .reference_header(header)
        .write_nifti(seg)
}

/// 将 `f32` 体数据 (如不确定度图) 以给定 nii 文件 header 为参照写到 `path`.
pub fn save_scalar<P: AsRef<Path>>(
    path: P,
    header: &NiftiHeader,
    vol: &Array3<f32>,
) -> nifti::Result<()> {
    WriterOptions::new(path.as_ref())
        .reference_header(header)
        .write_nifti(vol)
}

/// 仅用于测试与合成数据的空 header 体数据构造.
pub fn synthetic_volume(data: Array4<f32>) -> MriVolume {
    MriVolume::from_parts(Box::new(NiftiHeader::default()), data)
}

/// 批量张量视图别名: `[batch, channel, x, y, z]`.
pub type BatchView<'a> = ArrayView5<'a, f32>;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    /// 通道堆叠后空间形状不变, 通道数相加.
    #[test]
    fn test_stack_channel() {
        let a = synthetic_volume(Array4::zeros((1, 4, 5, 6)));
        let b = synthetic_volume(Array4::ones((1, 4, 5, 6)));

        let stacked = a.stack_channel(&b);
        assert_eq!(stacked.num_channels(), 2);
        assert_eq!(stacked.spatial_shape(), (4, 5, 6));
        assert_eq!(stacked.data()[(0, 0, 0, 0)], 0.0);
        assert_eq!(stacked.data()[(1, 0, 0, 0)], 1.0);
    }

    /// 形状不一致的堆叠必须直接失败.
    #[test]
    #[should_panic]
    fn test_stack_channel_shape_mismatch() {
        let a = synthetic_volume(Array4::zeros((1, 4, 5, 6)));
        let b = synthetic_volume(Array4::zeros((1, 4, 5, 7)));
        let _ = a.stack_channel(&b);
    }
}
