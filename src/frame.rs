// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - NCHW 输入张量定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::RgbImage;
use ndarray::{Array4, ArrayView4};
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

/// 送入网络的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  /// 与存储顺序相反
  Bgr,
}

#[derive(Error, Debug, PartialEq)]
pub enum FrameError {
  #[error("第 {index} 张图像尺寸为 {actual:?}, 期望 {expected:?}")]
  SizeMismatch {
    index: usize,
    expected: (u32, u32),
    actual: (u32, u32),
  },
}

/// 批量 NCHW 浮点张量，像素值归一化到 [0, 1]
#[derive(Debug, Clone)]
pub struct RgbNchwBatch {
  data: Array4<f32>,
}

impl RgbNchwBatch {
  pub fn zeros(batch: usize, height: usize, width: usize) -> Self {
    Self {
      data: Array4::zeros((batch, RGB_CHANNELS, height, width)),
    }
  }

  /// 由若干同尺寸图像组装批量张量
  pub fn from_images<'a, I>(
    images: I,
    width: u32,
    height: u32,
    order: ChannelOrder,
  ) -> Result<Self, FrameError>
  where
    I: IntoIterator<Item = &'a RgbImage>,
  {
    let images: Vec<&RgbImage> = images.into_iter().collect();
    let mut batch = Self::zeros(images.len(), height as usize, width as usize);

    for (n, image) in images.iter().enumerate() {
      if image.dimensions() != (width, height) {
        return Err(FrameError::SizeMismatch {
          index: n,
          expected: (width, height),
          actual: image.dimensions(),
        });
      }

      for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..RGB_CHANNELS {
          let src = match order {
            ChannelOrder::Rgb => c,
            ChannelOrder::Bgr => RGB_CHANNELS - 1 - c,
          };
          batch.data[[n, c, y, x]] = pixel[src] as f32 / 255.0;
        }
      }
    }

    Ok(batch)
  }

  pub fn batch(&self) -> usize {
    self.data.shape()[0]
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn height(&self) -> usize {
    self.data.shape()[2]
  }

  pub fn width(&self) -> usize {
    self.data.shape()[3]
  }

  pub fn shape(&self) -> [usize; 4] {
    [self.batch(), RGB_CHANNELS, self.height(), self.width()]
  }

  pub fn view(&self) -> ArrayView4<'_, f32> {
    self.data.view()
  }

  /// 按行优先顺序复制出扁平数据
  pub fn to_vec(&self) -> Vec<f32> {
    self.data.iter().copied().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn packs_planes_and_normalizes() {
    let image = RgbImage::from_pixel(4, 2, Rgb([255, 0, 51]));
    let batch = RgbNchwBatch::from_images([&image], 4, 2, ChannelOrder::Rgb).unwrap();

    assert_eq!(batch.shape(), [1, 3, 2, 4]);
    let view = batch.view();
    assert_eq!(view[[0, 0, 1, 3]], 1.0);
    assert_eq!(view[[0, 1, 0, 0]], 0.0);
    assert!((view[[0, 2, 0, 2]] - 0.2).abs() < 1e-6);
  }

  #[test]
  fn bgr_reverses_channels() {
    let image = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
    let batch = RgbNchwBatch::from_images([&image], 2, 2, ChannelOrder::Bgr).unwrap();
    let view = batch.view();
    assert_eq!(view[[0, 0, 0, 0]], 0.0);
    assert_eq!(view[[0, 2, 0, 0]], 1.0);
  }

  #[test]
  fn rejects_mismatched_image() {
    let a = RgbImage::new(4, 4);
    let b = RgbImage::new(4, 3);
    let err = RgbNchwBatch::from_images([&a, &b], 4, 4, ChannelOrder::Rgb).unwrap_err();
    assert_eq!(
      err,
      FrameError::SizeMismatch {
        index: 1,
        expected: (4, 4),
        actual: (4, 3),
      }
    );
  }

  #[test]
  fn flat_layout_is_nchw() {
    let image = RgbImage::from_fn(2, 1, |x, _| Rgb([x as u8, 10, 20]));
    let batch = RgbNchwBatch::from_images([&image], 2, 1, ChannelOrder::Rgb).unwrap();
    let flat: Vec<u8> = batch
      .to_vec()
      .into_iter()
      .map(|v| (v * 255.0).round() as u8)
      .collect();
    assert_eq!(flat, vec![0, 1, 10, 10, 20, 20]);
  }
}
