// 该文件是 Shanan （山南西风） 项目的一部分。
// src/postprocess/mask.rs - 实例分割掩码解码
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

use image::{GrayImage, Luma};
use ndarray::{ArrayView1, ArrayView3};

use crate::{
  letterbox::LetterboxParams,
  model::{BoundingBox, BoxMask},
  postprocess::sigmoid,
};

/// 原型掩码上的一块矩形区域及其 logit
struct ProtoPatch {
  x0: usize,
  y0: usize,
  width: usize,
  height: usize,
  logits: Vec<f32>,
}

impl ProtoPatch {
  fn at(&self, x: usize, y: usize) -> f32 {
    self.logits[(y - self.y0) * self.width + (x - self.x0)]
  }

  /// 双线性插值，坐标在区域内截断
  fn sample(&self, x: f32, y: f32) -> f32 {
    let max_x = (self.x0 + self.width - 1) as f32;
    let max_y = (self.y0 + self.height - 1) as f32;
    let x = x.clamp(self.x0 as f32, max_x);
    let y = y.clamp(self.y0 as f32, max_y);

    let (x1, y1) = (x.floor() as usize, y.floor() as usize);
    let x2 = (x1 + 1).min(self.x0 + self.width - 1);
    let y2 = (y1 + 1).min(self.y0 + self.height - 1);
    let (fx, fy) = (x - x1 as f32, y - y1 as f32);

    let top = self.at(x1, y1) * (1.0 - fx) + self.at(x2, y1) * fx;
    let bottom = self.at(x1, y2) * (1.0 - fx) + self.at(x2, y2) * fx;
    top * (1.0 - fy) + bottom * fy
  }
}

/// 由掩码系数和原型掩码 `[nm, mh, mw]` 计算框内二值掩码
///
/// `bbox` 为原图坐标，且已截断在原图范围内。
/// 原型掩码覆盖整个网络输入，先映射回网络空间再按比例缩到原型空间。
pub fn decode_mask(
  protos: ArrayView3<'_, f32>,
  coefficients: ArrayView1<'_, f32>,
  bbox: &BoundingBox,
  params: &LetterboxParams,
  net_size: (u32, u32),
  threshold: f32,
) -> Option<BoxMask> {
  let (nm, mh, mw) = protos.dim();
  if nm == 0 || mh == 0 || mw == 0 || coefficients.len() != nm {
    return None;
  }

  let x0 = bbox.x.max(0.0).floor() as u32;
  let y0 = bbox.y.max(0.0).floor() as u32;
  let x1 = bbox.right().ceil().max(0.0) as u32;
  let y1 = bbox.bottom().ceil().max(0.0) as u32;
  if x1 <= x0 || y1 <= y0 {
    return None;
  }

  let sx = mw as f32 / net_size.0 as f32;
  let sy = mh as f32 / net_size.1 as f32;
  let to_proto = |x: f32, y: f32| {
    let (nx, ny) = params.to_network(x, y);
    (nx * sx - 0.5, ny * sy - 0.5)
  };

  let (px0, py0) = to_proto(x0 as f32, y0 as f32);
  let (px1, py1) = to_proto(x1 as f32, y1 as f32);
  let clamp_x = |v: f32| (v.max(0.0) as usize).min(mw - 1);
  let clamp_y = |v: f32| (v.max(0.0) as usize).min(mh - 1);
  let (px0, py0) = (clamp_x(px0.floor()), clamp_y(py0.floor()));
  let (px1, py1) = (clamp_x(px1.ceil() + 1.0), clamp_y(py1.ceil() + 1.0));

  let width = px1 - px0 + 1;
  let height = py1 - py0 + 1;
  let mut logits = Vec::with_capacity(width * height);
  for y in py0..=py1 {
    for x in px0..=px1 {
      let value = coefficients
        .iter()
        .enumerate()
        .map(|(k, c)| c * protos[[k, y, x]])
        .sum::<f32>();
      logits.push(value);
    }
  }
  let patch = ProtoPatch {
    x0: px0,
    y0: py0,
    width,
    height,
    logits,
  };

  let mask = GrayImage::from_fn(x1 - x0, y1 - y0, |dx, dy| {
    let (px, py) = to_proto((x0 + dx) as f32 + 0.5, (y0 + dy) as f32 + 0.5);
    if sigmoid(patch.sample(px, py)) > threshold {
      Luma([255])
    } else {
      Luma([0])
    }
  });

  Some(BoxMask { x: x0, y: y0, mask })
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::{Array1, Array3};

  /// 单通道原型，左半为正、右半为负
  fn half_protos(size: usize) -> Array3<f32> {
    Array3::from_shape_fn((1, size, size), |(_, _, x)| {
      if x < size / 2 { 4.0 } else { -4.0 }
    })
  }

  #[test]
  fn mask_follows_proto_sign() {
    let protos = half_protos(16);
    let coefficients = Array1::from(vec![1.0]);
    let bbox = BoundingBox::new(0.0, 0.0, 64.0, 32.0);
    let mask = decode_mask(
      protos.view(),
      coefficients.view(),
      &bbox,
      &LetterboxParams::IDENTITY,
      (64, 64),
      0.5,
    )
    .unwrap();

    assert_eq!((mask.x, mask.y), (0, 0));
    assert_eq!(mask.mask.dimensions(), (64, 32));
    assert!(mask.contains(5, 10));
    assert!(!mask.contains(60, 10));
    // 左半全为前景
    assert_eq!(mask.area(), 32 * 32);
  }

  #[test]
  fn negative_coefficient_flips_mask() {
    let protos = half_protos(16);
    let coefficients = Array1::from(vec![-1.0]);
    let bbox = BoundingBox::new(8.0, 8.0, 48.0, 16.0);
    let mask = decode_mask(
      protos.view(),
      coefficients.view(),
      &bbox,
      &LetterboxParams::IDENTITY,
      (64, 64),
      0.5,
    )
    .unwrap();
    assert_eq!((mask.x, mask.y), (8, 8));
    assert!(!mask.contains(10, 10));
    assert!(mask.contains(50, 10));
  }

  #[test]
  fn follows_letterbox_mapping() {
    // 原图 128x64 缩放 0.5 后居中放入 64x64，上下各 16 像素
    let params = LetterboxParams {
      scale_x: 0.5,
      scale_y: 0.5,
      pad_x: 0.0,
      pad_y: 16.0,
    };
    let protos = half_protos(16);
    let coefficients = Array1::from(vec![1.0]);
    let bbox = BoundingBox::new(0.0, 0.0, 128.0, 64.0);
    let mask = decode_mask(
      protos.view(),
      coefficients.view(),
      &bbox,
      &params,
      (64, 64),
      0.5,
    )
    .unwrap();
    assert_eq!(mask.mask.dimensions(), (128, 64));
    assert!(mask.contains(20, 30));
    assert!(!mask.contains(110, 30));
  }

  #[test]
  fn empty_box_has_no_mask() {
    let protos = half_protos(8);
    let coefficients = Array1::from(vec![1.0]);
    let bbox = BoundingBox::new(5.0, 5.0, 0.0, 3.0);
    assert!(
      decode_mask(
        protos.view(),
        coefficients.view(),
        &bbox,
        &LetterboxParams::IDENTITY,
        (64, 64),
        0.5
      )
      .is_none()
    );
  }
}
