// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut,
  },
  rect::Rect,
};
use serde_json::{Value, json};
use thiserror::Error;

use crate::{
  model::{BoundingBox, BoxMask, DetectResult, Detection, DetectionExtra, Keypoint, RotatedBox, WithLabel},
  postprocess::PoseSkeleton,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const MASK_ALPHA: f32 = 0.5;

/// 按类别循环使用的固定调色板 (RGB)
pub const PALETTE: [[u8; 3]; 20] = [
  [255, 56, 56],
  [255, 157, 151],
  [255, 112, 31],
  [255, 178, 29],
  [207, 210, 49],
  [72, 249, 10],
  [146, 204, 23],
  [61, 219, 134],
  [26, 147, 52],
  [0, 212, 187],
  [44, 153, 168],
  [0, 194, 255],
  [52, 69, 147],
  [100, 115, 255],
  [0, 24, 236],
  [132, 56, 255],
  [82, 0, 133],
  [203, 56, 255],
  [255, 149, 200],
  [255, 55, 199],
];

pub fn class_color(class_id: usize) -> [u8; 3] {
  PALETTE[class_id % PALETTE.len()]
}

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效")]
  InvalidFont,
}

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: Option<FontVec>,
  skeleton: PoseSkeleton,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font: None,
      skeleton: PoseSkeleton::coco(),
    }
  }
}

impl Draw {
  /// 加载字体后标签绘制文字，否则只绘制色块
  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data).map_err(|_| DrawError::InvalidFont)?;
    Ok(Self {
      font: Some(font),
      ..Default::default()
    })
  }

  pub fn skeleton(mut self, skeleton: PoseSkeleton) -> Self {
    self.skeleton = skeleton;
    self
  }

  pub fn draw_detections<T: WithLabel>(&self, image: &mut RgbImage, result: &DetectResult) {
    // 先画掩码，避免盖住边框
    for item in result.iter() {
      if let Some(mask) = item.mask() {
        draw_mask(image, mask, class_color(item.class_id));
      }
    }

    for item in result.iter() {
      let color = class_color(item.class_id);
      match &item.extra {
        DetectionExtra::Rotated(rotated) => draw_rotated(image, rotated, color),
        _ => draw_bbox(image, &item.bbox, color),
      }
      if let Some(keypoints) = item.keypoints() {
        self.draw_keypoints(image, keypoints);
      }

      let label = format!("{} {:.2}", item.label::<T>().to_label_str(), item.confidence);
      self.draw_label(image, &item.bbox, &label, color);
    }
  }

  pub fn draw_on_copy<T: WithLabel>(&self, image: &RgbImage, result: &DetectResult) -> RgbImage {
    let mut image = image.clone();
    self.draw_detections::<T>(&mut image, result);
    image
  }

  fn draw_label(&self, image: &mut RgbImage, bbox: &BoundingBox, label: &str, color: [u8; 3]) {
    let w = image.width() as i32;
    let text_width = (label.len() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 标签放在边框上方，放不下时贴着图像顶部
    let label_x = (bbox.x as i32).max(0);
    let label_y = (bbox.y as i32 - text_height).max(0);
    let label_width = text_width.min((w - label_x).max(0)) as u32;
    if label_width == 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width, text_height as u32);
    draw_filled_rect_mut(image, rect, Rgb(color));

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb([255, 255, 255]),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        label,
      );
    }
  }

  fn draw_keypoints(&self, image: &mut RgbImage, keypoints: &[Keypoint]) {
    if self.skeleton.draw_limbs {
      for (i, &(a, b)) in self.skeleton.connections.iter().enumerate() {
        let (Some(p), Some(q)) = (keypoints.get(a), keypoints.get(b)) else {
          continue;
        };
        if !p.visible || !q.visible {
          continue;
        }
        let color = self
          .skeleton
          .limb_colors
          .get(i)
          .copied()
          .unwrap_or([255, 255, 255]);
        draw_line_segment_mut(image, (p.x, p.y), (q.x, q.y), Rgb(color));
      }
    }

    for (i, point) in keypoints.iter().enumerate() {
      if !point.visible {
        continue;
      }
      draw_filled_circle_mut(
        image,
        (point.x as i32, point.y as i32),
        self.skeleton.radius,
        Rgb(self.skeleton.keypoint_color(i)),
      );
    }
  }
}

fn draw_bbox(image: &mut RgbImage, bbox: &BoundingBox, color: [u8; 3]) {
  let (x, y) = (bbox.x.floor() as i32, bbox.y.floor() as i32);
  let (w, h) = (bbox.width.ceil() as i32, bbox.height.ceil() as i32);
  // 边框加粗，逐圈向内收缩
  for t in 0..BOX_THICKNESS {
    let (rw, rh) = (w - 2 * t, h - 2 * t);
    if rw <= 0 || rh <= 0 {
      break;
    }
    let rect = Rect::at(x + t, y + t).of_size(rw as u32, rh as u32);
    draw_hollow_rect_mut(image, rect, Rgb(color));
  }
}

fn draw_rotated(image: &mut RgbImage, rotated: &RotatedBox, color: [u8; 3]) {
  let corners = rotated.corners();
  for i in 0..corners.len() {
    let next = corners[(i + 1) % corners.len()];
    draw_line_segment_mut(image, corners[i], next, Rgb(color));
  }
}

fn draw_mask(image: &mut RgbImage, mask: &BoxMask, color: [u8; 3]) {
  for (dx, dy, value) in mask.mask.enumerate_pixels() {
    if value.0[0] == 0 {
      continue;
    }
    let (x, y) = (mask.x + dx, mask.y + dy);
    if let Some(pixel) = image.get_pixel_mut_checked(x, y) {
      for c in 0..3 {
        let blended = pixel.0[c] as f32 * (1.0 - MASK_ALPHA) + color[c] as f32 * MASK_ALPHA;
        pixel.0[c] = blended.round() as u8;
      }
    }
  }
}

/// 以 JSON 形式记录检测结果
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  fn item_json<T: WithLabel>(&self, item: &Detection) -> Value {
    let label = item.label::<T>();
    let mut value = json!({
      "label": if self.label_with_name {
        Value::from(label.to_label_str())
      } else {
        Value::from(label.to_label_id())
      },
      "confidence": item.confidence,
      "bbox": [item.bbox.x, item.bbox.y, item.bbox.width, item.bbox.height],
    });

    let extra = match &item.extra {
      DetectionExtra::None => None,
      DetectionExtra::Rotated(rotated) => Some((
        "rotated",
        json!({
          "cx": rotated.cx,
          "cy": rotated.cy,
          "width": rotated.width,
          "height": rotated.height,
          "angle": rotated.angle_degrees(),
        }),
      )),
      DetectionExtra::Mask(mask) => Some((
        "mask",
        json!({
          "x": mask.x,
          "y": mask.y,
          "width": mask.mask.width(),
          "height": mask.mask.height(),
          "area": mask.area(),
        }),
      )),
      DetectionExtra::Pose(keypoints) => Some((
        "keypoints",
        keypoints
          .iter()
          .map(|k| json!([k.x, k.y, k.confidence]))
          .collect::<Value>(),
      )),
    };
    if let (Some((key, extra)), Some(object)) = (extra, value.as_object_mut()) {
      object.insert(key.to_string(), extra);
    }
    value
  }

  pub fn to_json<T: WithLabel>(&self, result: &DetectResult) -> Value {
    result.iter().map(|item| self.item_json::<T>(item)).collect()
  }

  /// 写入与 `path` 同名的 .json 文件
  pub fn record<T: WithLabel>(
    &self,
    result: &DetectResult,
    path: &Path,
  ) -> Result<(), std::io::Error> {
    let json = serde_json::to_string_pretty(&self.to_json::<T>(result))?;
    std::fs::write(path.with_extension("json"), json)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::CocoLabel;
  use image::GrayImage;

  fn result() -> DetectResult {
    DetectResult::from(vec![
      Detection {
        class_id: 0,
        confidence: 0.9,
        bbox: BoundingBox::new(10.0, 40.0, 20.0, 20.0),
        extra: DetectionExtra::Mask(BoxMask {
          x: 10,
          y: 40,
          mask: GrayImage::from_pixel(20, 20, image::Luma([255])),
        }),
      },
      Detection {
        class_id: 2,
        confidence: 0.5,
        bbox: BoundingBox::new(60.0, 40.0, 10.0, 30.0),
        extra: DetectionExtra::None,
      },
    ])
  }

  #[test]
  fn draws_boxes_and_masks() {
    let image = RgbImage::new(100, 100);
    let drawn = Draw::default().draw_on_copy::<CocoLabel>(&image, &result());

    assert_eq!(drawn.get_pixel(10, 50).0, class_color(0));
    // 掩码内部按透明度混合
    let inside = drawn.get_pixel(20, 50).0;
    assert_eq!(inside[0], (class_color(0)[0] as f32 * MASK_ALPHA).round() as u8);
    assert_eq!(drawn.get_pixel(60, 50).0, class_color(2));
    // 标签色块在框的上方
    assert_eq!(drawn.get_pixel(12, 30).0, class_color(0));
    assert_eq!(drawn.get_pixel(95, 95).0, [0, 0, 0]);
  }

  #[test]
  fn draws_visible_keypoints_only() {
    let keypoints = vec![
      Keypoint {
        x: 10.0,
        y: 10.0,
        confidence: 0.9,
        visible: true,
      },
      Keypoint {
        x: 30.0,
        y: 30.0,
        confidence: 0.1,
        visible: false,
      },
    ];
    let mut image = RgbImage::new(40, 40);
    let draw = Draw::default().skeleton(PoseSkeleton::points_only(2));
    draw.draw_keypoints(&mut image, &keypoints);
    assert_ne!(image.get_pixel(10, 10).0, [0, 0, 0]);
    assert_eq!(image.get_pixel(30, 30).0, [0, 0, 0]);
  }

  #[test]
  fn record_as_json() {
    let record = Record {
      label_with_name: true,
    };
    let value = record.to_json::<CocoLabel>(&result());
    assert_eq!(value[0]["label"], "person");
    assert_eq!(value[1]["label"], "car");
    assert_eq!(value[0]["mask"]["area"], 400);
    assert_eq!(value[1]["bbox"][2], 10.0);

    let record = Record {
      label_with_name: false,
    };
    assert_eq!(record.to_json::<CocoLabel>(&result())[1]["label"], 2);
  }
}
