// 该文件是 Shanan （山南西风） 项目的一部分。
// src/preprocess.rs - 批量预处理
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

use std::borrow::Cow;

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  config::DetectorConfig,
  frame::{ChannelOrder, FrameError, RgbNchwBatch},
  letterbox::{LetterboxOptions, LetterboxParams, letterbox},
};

#[derive(Error, Debug, PartialEq)]
pub enum PreprocessError {
  #[error("输入图像数量 {got} 超过批大小 {capacity}")]
  BatchOverflow { got: usize, capacity: usize },
  #[error("张量组装错误: {0}")]
  FrameError(#[from] FrameError),
}

/// 把任意尺寸的图像组装成固定形状的一批网络输入
#[derive(Debug, Clone)]
pub struct BatchPreprocessor {
  options: LetterboxOptions,
  batch_size: usize,
}

impl BatchPreprocessor {
  pub fn new(options: LetterboxOptions, batch_size: usize) -> Self {
    // 批内所有图像必须同尺寸，不能按步长收缩画布
    let options = options.auto_shape(false);
    Self {
      options,
      batch_size,
    }
  }

  pub fn from_config(config: &DetectorConfig) -> Self {
    let options = LetterboxOptions::new(config.net_width, config.net_height)
      .stride(config.stride)
      .allow_upscale(config.allow_upscale)
      .pad_color(config.pad_color);
    Self::new(options, config.batch_size)
  }

  pub fn batch_size(&self) -> usize {
    self.batch_size
  }

  pub fn net_size(&self) -> (u32, u32) {
    (self.options.target_width, self.options.target_height)
  }

  /// 对每张图像做 letterbox，不足批大小时补全零图像
  pub fn prepare<'a>(
    &self,
    images: &'a [RgbImage],
  ) -> Result<PreprocessedBatch<'a>, PreprocessError> {
    if images.len() > self.batch_size {
      return Err(PreprocessError::BatchOverflow {
        got: images.len(),
        capacity: self.batch_size,
      });
    }

    let net_size = self.net_size();
    let mut entries = Vec::with_capacity(self.batch_size);
    let mut source_sizes = Vec::with_capacity(images.len());

    for image in images {
      source_sizes.push(image.dimensions());
      if image.dimensions() == net_size {
        entries.push((Cow::Borrowed(image), LetterboxParams::IDENTITY));
      } else {
        let (resized, params) = letterbox(image, &self.options);
        entries.push((Cow::Owned(resized), params));
      }
    }

    let lack = self.batch_size - images.len();
    if lack > 0 {
      debug!("批内补充 {} 张空白图像", lack);
    }
    for _ in 0..lack {
      let blank = RgbImage::new(net_size.0, net_size.1);
      entries.push((Cow::Owned(blank), LetterboxParams::IDENTITY));
    }

    Ok(PreprocessedBatch {
      entries,
      source_sizes,
      net_size,
    })
  }
}

/// 一批网络输入图像及其逆映射参数
///
/// 前 `real_len()` 项对应调用方的图像，其余为补齐用的空白图像。
#[derive(Debug, Clone)]
pub struct PreprocessedBatch<'a> {
  entries: Vec<(Cow<'a, RgbImage>, LetterboxParams)>,
  source_sizes: Vec<(u32, u32)>,
  net_size: (u32, u32),
}

impl PreprocessedBatch<'_> {
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn real_len(&self) -> usize {
    self.source_sizes.len()
  }

  pub fn is_padding(&self, index: usize) -> bool {
    index >= self.real_len()
  }

  pub fn image(&self, index: usize) -> Option<&RgbImage> {
    self.entries.get(index).map(|(image, _)| &**image)
  }

  pub fn params(&self, index: usize) -> Option<&LetterboxParams> {
    self.entries.get(index).map(|(_, params)| params)
  }

  /// 原图尺寸，补齐项没有原图
  pub fn source_size(&self, index: usize) -> Option<(u32, u32)> {
    self.source_sizes.get(index).copied()
  }

  pub fn net_size(&self) -> (u32, u32) {
    self.net_size
  }

  pub fn to_tensor(&self, order: ChannelOrder) -> Result<RgbNchwBatch, PreprocessError> {
    let (width, height) = self.net_size;
    let tensor = RgbNchwBatch::from_images(
      self.entries.iter().map(|(image, _)| &**image),
      width,
      height,
      order,
    )?;
    Ok(tensor)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn preprocessor(batch_size: usize) -> BatchPreprocessor {
    let config = DetectorConfig {
      batch_size,
      ..Default::default()
    };
    BatchPreprocessor::from_config(&config)
  }

  #[test]
  fn pads_batch_with_blank_identity_entries() {
    let images = vec![RgbImage::new(1280, 720), RgbImage::new(320, 320)];
    let batch = preprocessor(4).prepare(&images).unwrap();

    assert_eq!(batch.len(), 4);
    assert_eq!(batch.real_len(), 2);
    assert!(!batch.is_padding(1));
    assert!(batch.is_padding(2));
    assert_eq!(batch.source_size(0), Some((1280, 720)));
    assert_eq!(batch.source_size(3), None);

    for index in 0..4 {
      assert_eq!(batch.image(index).unwrap().dimensions(), (640, 640));
    }
    for index in 2..4 {
      assert!(batch.params(index).unwrap().is_identity());
      assert!(batch.image(index).unwrap().pixels().all(|p| p.0 == [0, 0, 0]));
    }
    assert_eq!(batch.params(0).unwrap().pad_y, 140.0);
  }

  #[test]
  fn network_sized_image_is_passed_through() {
    let images = vec![RgbImage::from_pixel(640, 640, Rgb([1, 2, 3]))];
    let batch = preprocessor(1).prepare(&images).unwrap();
    assert!(batch.params(0).unwrap().is_identity());
    assert_eq!(batch.image(0).unwrap(), &images[0]);
  }

  #[test]
  fn too_many_images_is_rejected() {
    let images = vec![RgbImage::new(8, 8); 3];
    assert_eq!(
      preprocessor(2).prepare(&images).unwrap_err(),
      PreprocessError::BatchOverflow {
        got: 3,
        capacity: 2
      }
    );
  }

  #[test]
  fn tensor_has_batch_shape() {
    let images = vec![RgbImage::new(100, 50)];
    let tensor = preprocessor(3)
      .prepare(&images)
      .unwrap()
      .to_tensor(ChannelOrder::Rgb)
      .unwrap();
    assert_eq!(tensor.shape(), [3, 3, 640, 640]);
  }

  #[test]
  fn source_images_are_untouched() {
    let images = vec![RgbImage::from_pixel(300, 200, Rgb([9, 9, 9]))];
    let before = images.clone();
    let _ = preprocessor(1).prepare(&images).unwrap();
    assert_eq!(images, before);
  }
}
