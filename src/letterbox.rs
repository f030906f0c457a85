// 该文件是 Shanan （山南西风） 项目的一部分。
// src/letterbox.rs - Letterbox 缩放填充变换
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

use image::{
  Rgb, RgbImage,
  imageops::{self, FilterType},
};
use tracing::debug;

/// 默认填充颜色（中灰）
pub const DEFAULT_PAD_COLOR: [u8; 3] = [114, 114, 114];

/// 网络坐标与原图坐标之间的映射参数
///
/// 原图坐标 = (网络坐标 - pad) / scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxParams {
  pub scale_x: f32,
  pub scale_y: f32,
  pub pad_x: f32,
  pub pad_y: f32,
}

impl LetterboxParams {
  /// 恒等变换，图像已是网络输入尺寸
  pub const IDENTITY: Self = Self {
    scale_x: 1.0,
    scale_y: 1.0,
    pad_x: 0.0,
    pad_y: 0.0,
  };

  pub fn is_identity(&self) -> bool {
    *self == Self::IDENTITY
  }

  /// 网络坐标 -> 原图坐标
  pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (x - self.pad_x) / self.scale_x,
      (y - self.pad_y) / self.scale_y,
    )
  }

  /// 原图坐标 -> 网络坐标
  pub fn to_network(&self, x: f32, y: f32) -> (f32, f32) {
    (
      x * self.scale_x + self.pad_x,
      y * self.scale_y + self.pad_y,
    )
  }

  /// 网络空间的宽高 -> 原图空间的宽高
  pub fn length_to_original(&self, width: f32, height: f32) -> (f32, f32) {
    (width / self.scale_x, height / self.scale_y)
  }
}

impl Default for LetterboxParams {
  fn default() -> Self {
    Self::IDENTITY
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxOptions {
  pub target_width: u32,
  pub target_height: u32,
  pub stride: u32,
  /// 只填充到步长的整数倍，输出尺寸会小于目标尺寸
  pub auto_shape: bool,
  /// 拉伸到目标尺寸，不保持宽高比
  pub scale_fill: bool,
  pub allow_upscale: bool,
  pub pad_color: [u8; 3],
}

impl Default for LetterboxOptions {
  fn default() -> Self {
    Self {
      target_width: 640,
      target_height: 640,
      stride: 32,
      auto_shape: false,
      scale_fill: false,
      allow_upscale: true,
      pad_color: DEFAULT_PAD_COLOR,
    }
  }
}

impl LetterboxOptions {
  pub fn new(target_width: u32, target_height: u32) -> Self {
    Self {
      target_width,
      target_height,
      ..Default::default()
    }
  }

  pub fn stride(mut self, stride: u32) -> Self {
    self.stride = stride;
    self
  }

  pub fn auto_shape(mut self, auto_shape: bool) -> Self {
    self.auto_shape = auto_shape;
    self
  }

  pub fn scale_fill(mut self, scale_fill: bool) -> Self {
    self.scale_fill = scale_fill;
    self
  }

  pub fn allow_upscale(mut self, allow_upscale: bool) -> Self {
    self.allow_upscale = allow_upscale;
    self
  }

  pub fn pad_color(mut self, pad_color: [u8; 3]) -> Self {
    self.pad_color = pad_color;
    self
  }
}

/// 将图像等比缩放并对称填充到目标尺寸
///
/// 返回变换后的图像，以及把网络坐标映射回原图坐标所需的参数。
/// 图像尺寸已等于目标尺寸时原样返回，参数为恒等变换。
pub fn letterbox(image: &RgbImage, options: &LetterboxOptions) -> (RgbImage, LetterboxParams) {
  let (src_w, src_h) = image.dimensions();
  let (dst_w, dst_h) = (options.target_width, options.target_height);

  if (src_w, src_h) == (dst_w, dst_h) {
    return (image.clone(), LetterboxParams::IDENTITY);
  }

  if src_w == 0 || src_h == 0 {
    debug!("空图像 {}x{}，直接输出填充画布", src_w, src_h);
    let canvas = RgbImage::from_pixel(dst_w, dst_h, Rgb(options.pad_color));
    return (canvas, LetterboxParams::IDENTITY);
  }

  let (ratio_x, ratio_y, unpad_w, unpad_h, dw, dh) = if options.scale_fill {
    (
      dst_w as f32 / src_w as f32,
      dst_h as f32 / src_h as f32,
      dst_w,
      dst_h,
      0,
      0,
    )
  } else {
    let mut ratio = (dst_w as f32 / src_w as f32).min(dst_h as f32 / src_h as f32);
    if !options.allow_upscale {
      ratio = ratio.min(1.0);
    }

    let unpad_w = ((src_w as f32 * ratio).round() as u32).clamp(1, dst_w.max(1));
    let unpad_h = ((src_h as f32 * ratio).round() as u32).clamp(1, dst_h.max(1));
    let mut dw = dst_w.saturating_sub(unpad_w);
    let mut dh = dst_h.saturating_sub(unpad_h);
    if options.auto_shape && options.stride > 0 {
      dw %= options.stride;
      dh %= options.stride;
    }
    (ratio, ratio, unpad_w, unpad_h, dw, dh)
  };

  // 两侧相差不超过一个像素
  let half_w = dw as f32 / 2.0;
  let half_h = dh as f32 / 2.0;
  let left = (half_w - 0.1).round().max(0.0) as u32;
  let right = (half_w + 0.1).round().max(0.0) as u32;
  let top = (half_h - 0.1).round().max(0.0) as u32;
  let bottom = (half_h + 0.1).round().max(0.0) as u32;

  let resized = if (unpad_w, unpad_h) == (src_w, src_h) {
    image.clone()
  } else {
    imageops::resize(image, unpad_w, unpad_h, FilterType::Triangle)
  };

  let mut canvas = RgbImage::from_pixel(
    unpad_w + left + right,
    unpad_h + top + bottom,
    Rgb(options.pad_color),
  );
  imageops::replace(&mut canvas, &resized, left as i64, top as i64);

  let params = LetterboxParams {
    scale_x: ratio_x,
    scale_y: ratio_y,
    pad_x: left as f32,
    pad_y: top as f32,
  };

  debug!(
    "letterbox: {}x{} -> {}x{} (内容 {}x{}), 参数 {:?}",
    src_w,
    src_h,
    canvas.width(),
    canvas.height(),
    unpad_w,
    unpad_h,
    params
  );

  (canvas, params)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
      Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
  }

  #[test]
  fn scenario_1280x720_into_640() {
    let options = LetterboxOptions::new(640, 640)
      .stride(32)
      .allow_upscale(false);
    let (out, params) = letterbox(&gradient(1280, 720), &options);

    assert_eq!(out.dimensions(), (640, 640));
    assert_eq!(params.scale_x, 0.5);
    assert_eq!(params.scale_y, 0.5);
    assert_eq!(params.pad_x, 0.0);
    assert_eq!(params.pad_y, 140.0);

    let (x, y) = params.to_original(320.0, 320.0);
    assert!((x - 640.0).abs() < 1e-4);
    assert!((y - 360.0).abs() < 1e-4);

    // 上下边框是填充色，内容区从第 140 行开始
    assert_eq!(out.get_pixel(10, 139).0, DEFAULT_PAD_COLOR);
    assert_eq!(out.get_pixel(10, 500).0, DEFAULT_PAD_COLOR);
    assert_ne!(out.get_pixel(10, 140).0, DEFAULT_PAD_COLOR);
  }

  #[test]
  fn identity_when_already_network_size() {
    let image = gradient(640, 640);
    let (out, params) = letterbox(&image, &LetterboxOptions::default());
    assert!(params.is_identity());
    assert_eq!(out, image);
  }

  #[test]
  fn odd_padding_differs_by_one_pixel() {
    // 640x635 -> 内容 640x635, dh = 5 -> 上 2 下 3
    let (out, params) = letterbox(&gradient(640, 635), &LetterboxOptions::default());
    assert_eq!(out.dimensions(), (640, 640));
    assert_eq!(params.pad_y, 2.0);
    assert_eq!(out.get_pixel(0, 1).0, DEFAULT_PAD_COLOR);
    assert_ne!(out.get_pixel(0, 2).0, DEFAULT_PAD_COLOR);
    assert_ne!(out.get_pixel(0, 636).0, DEFAULT_PAD_COLOR);
    assert_eq!(out.get_pixel(0, 637).0, DEFAULT_PAD_COLOR);
  }

  #[test]
  fn no_upscale_keeps_small_image_size() {
    let options = LetterboxOptions::default().allow_upscale(false);
    let (out, params) = letterbox(&gradient(320, 240), &options);
    assert_eq!(out.dimensions(), (640, 640));
    assert_eq!(params.scale_x, 1.0);
    assert_eq!((params.pad_x, params.pad_y), (160.0, 200.0));
  }

  #[test]
  fn upscale_fills_target() {
    let (out, params) = letterbox(&gradient(320, 240), &LetterboxOptions::default());
    assert_eq!(out.dimensions(), (640, 640));
    assert_eq!(params.scale_x, 2.0);
    assert_eq!((params.pad_x, params.pad_y), (0.0, 80.0));
  }

  #[test]
  fn auto_shape_pads_to_stride_multiple() {
    let options = LetterboxOptions::default().auto_shape(true);
    let (out, params) = letterbox(&gradient(1280, 720), &options);
    // 内容 640x360, dh = 280 % 32 = 24 -> 画布高 384
    assert_eq!(out.dimensions(), (640, 384));
    assert_eq!(out.height() % 32, 0);
    assert_eq!(params.pad_y, 12.0);
  }

  #[test]
  fn scale_fill_stretches_without_padding() {
    let options = LetterboxOptions::default().scale_fill(true);
    let (out, params) = letterbox(&gradient(1280, 720), &options);
    assert_eq!(out.dimensions(), (640, 640));
    assert_eq!(params.scale_x, 0.5);
    assert!((params.scale_y - 640.0 / 720.0).abs() < 1e-6);
    assert_eq!((params.pad_x, params.pad_y), (0.0, 0.0));
  }

  #[test]
  fn content_corners_map_back_to_source() {
    let sizes = [
      (1280, 720),
      (720, 1280),
      (1920, 1080),
      (333, 777),
      (641, 639),
      (100, 50),
      (3001, 2000),
      (17, 913),
    ];
    for (w, h) in sizes {
      let (_, params) = letterbox(&gradient(w, h), &LetterboxOptions::default());
      let unpad_w = (w as f32 * params.scale_x).round();
      let unpad_h = (h as f32 * params.scale_y).round();

      let corners = [
        ((params.pad_x, params.pad_y), (0.0, 0.0)),
        ((params.pad_x + unpad_w, params.pad_y), (w as f32, 0.0)),
        ((params.pad_x, params.pad_y + unpad_h), (0.0, h as f32)),
        (
          (params.pad_x + unpad_w, params.pad_y + unpad_h),
          (w as f32, h as f32),
        ),
      ];
      for ((nx, ny), (ox, oy)) in corners {
        let (x, y) = params.to_original(nx, ny);
        // 网络空间内误差不超过一个像素，原图内不超过 1 / scale 像素
        assert!((x - ox).abs() * params.scale_x <= 1.0, "{}x{}: x {} vs {}", w, h, x, ox);
        assert!((y - oy).abs() * params.scale_y <= 1.0, "{}x{}: y {} vs {}", w, h, y, oy);
        if params.scale_x >= 0.5 {
          assert!((x - ox).abs() <= 1.0, "{}x{}: x {} vs {}", w, h, x, ox);
          assert!((y - oy).abs() <= 1.0, "{}x{}: y {} vs {}", w, h, y, oy);
        }

        let (bx, by) = params.to_network(ox, oy);
        assert!((bx - nx).abs() <= 1.0 && (by - ny).abs() <= 1.0);
      }
    }
  }
}
