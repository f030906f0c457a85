// 该文件是 Shanan （山南西风） 项目的一部分。
// src/postprocess/pose.rs - 姿态关键点解码
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

use ndarray::ArrayView1;

use crate::{letterbox::LetterboxParams, model::Keypoint};

/// COCO 17 点人体骨架连线，下标从 0 开始
pub const COCO_SKELETON: [(usize, usize); 19] = [
  (15, 13),
  (13, 11),
  (16, 14),
  (14, 12),
  (11, 12),
  (5, 11),
  (6, 12),
  (5, 6),
  (5, 7),
  (6, 8),
  (7, 9),
  (8, 10),
  (1, 2),
  (0, 1),
  (0, 2),
  (1, 3),
  (2, 4),
  (3, 5),
  (4, 6),
];

pub const COCO_KEYPOINT_NAMES: [&str; 17] = [
  "nose",
  "left_eye",
  "right_eye",
  "left_ear",
  "right_ear",
  "left_shoulder",
  "right_shoulder",
  "left_elbow",
  "right_elbow",
  "left_wrist",
  "right_wrist",
  "left_hip",
  "right_hip",
  "left_knee",
  "right_knee",
  "left_ankle",
  "right_ankle",
];

/// RGB 调色板
pub const POSE_PALETTE: [[u8; 3]; 20] = [
  [0, 128, 255],
  [51, 153, 255],
  [102, 178, 255],
  [0, 230, 230],
  [255, 153, 255],
  [255, 204, 153],
  [255, 102, 255],
  [255, 51, 255],
  [255, 178, 102],
  [255, 153, 51],
  [153, 153, 255],
  [102, 102, 255],
  [51, 51, 255],
  [153, 255, 153],
  [102, 255, 102],
  [51, 255, 51],
  [0, 255, 0],
  [255, 0, 0],
  [0, 0, 255],
  [255, 255, 255],
];

/// 每条骨架连线在调色板中的颜色
pub const LIMB_COLOR_INDEX: [usize; 19] = [9, 9, 9, 9, 7, 7, 7, 0, 0, 0, 0, 0, 16, 16, 16, 16, 16, 16, 16];

/// 每个关键点在调色板中的颜色
pub const KEYPOINT_COLOR_INDEX: [usize; 17] = [16, 16, 16, 16, 16, 0, 0, 0, 0, 0, 0, 9, 9, 9, 9, 9, 9];

/// 骨架绘制配置
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSkeleton {
  pub connections: Vec<(usize, usize)>,
  pub limb_colors: Vec<[u8; 3]>,
  pub keypoint_colors: Vec<[u8; 3]>,
  pub radius: i32,
  pub draw_limbs: bool,
}

impl PoseSkeleton {
  pub fn coco() -> Self {
    Self {
      connections: COCO_SKELETON.to_vec(),
      limb_colors: LIMB_COLOR_INDEX.iter().map(|&i| POSE_PALETTE[i]).collect(),
      keypoint_colors: KEYPOINT_COLOR_INDEX
        .iter()
        .map(|&i| POSE_PALETTE[i])
        .collect(),
      radius: 5,
      draw_limbs: true,
    }
  }

  /// 没有连线数据的骨架，关键点统一着色
  pub fn points_only(keypoints: usize) -> Self {
    Self {
      connections: Vec::new(),
      limb_colors: Vec::new(),
      keypoint_colors: vec![POSE_PALETTE[16]; keypoints],
      radius: 5,
      draw_limbs: false,
    }
  }

  pub fn for_keypoints(keypoints: usize) -> Self {
    if keypoints == COCO_KEYPOINT_NAMES.len() {
      Self::coco()
    } else {
      Self::points_only(keypoints)
    }
  }

  pub fn keypoint_color(&self, index: usize) -> [u8; 3] {
    self
      .keypoint_colors
      .get(index)
      .copied()
      .unwrap_or(POSE_PALETTE[16])
  }
}

impl Default for PoseSkeleton {
  fn default() -> Self {
    Self::coco()
  }
}

/// 解码一个候选的关键点数值 `[x, y, (conf)] * keypoints`
///
/// 两维关键点没有置信度，视为 1。坐标截断到原图范围。
pub fn decode_keypoints(
  values: ArrayView1<'_, f32>,
  keypoints: usize,
  dims: usize,
  params: &LetterboxParams,
  image_size: (u32, u32),
  threshold: f32,
) -> Vec<Keypoint> {
  let (width, height) = (image_size.0 as f32, image_size.1 as f32);
  (0..keypoints)
    .filter(|k| (k + 1) * dims <= values.len())
    .map(|k| {
      let base = k * dims;
      let (x, y) = params.to_original(values[base], values[base + 1]);
      let confidence = if dims >= 3 { values[base + 2] } else { 1.0 };
      Keypoint {
        x: x.clamp(0.0, width),
        y: y.clamp(0.0, height),
        confidence,
        visible: confidence >= threshold,
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::Array1;

  #[test]
  fn skeleton_indices_are_in_range() {
    for (a, b) in COCO_SKELETON {
      assert!(a < 17 && b < 17);
    }
    let skeleton = PoseSkeleton::coco();
    assert_eq!(skeleton.limb_colors.len(), skeleton.connections.len());
    assert_eq!(skeleton.keypoint_colors.len(), 17);
  }

  #[test]
  fn decodes_and_maps_keypoints() {
    let params = LetterboxParams {
      scale_x: 0.5,
      scale_y: 0.5,
      pad_x: 0.0,
      pad_y: 140.0,
    };
    let values = Array1::from(vec![100.0, 240.0, 0.9, 10.0, 150.0, 0.2]);
    let points = decode_keypoints(values.view(), 2, 3, &params, (1280, 720), 0.5);

    assert_eq!(points.len(), 2);
    assert_eq!((points[0].x, points[0].y), (200.0, 200.0));
    assert!(points[0].visible);
    assert_eq!((points[1].x, points[1].y), (20.0, 20.0));
    assert!(!points[1].visible);
  }

  #[test]
  fn clamps_to_image() {
    let values = Array1::from(vec![-5.0, 900.0]);
    let points = decode_keypoints(values.view(), 1, 2, &LetterboxParams::IDENTITY, (640, 480), 0.5);
    assert_eq!((points[0].x, points[0].y), (0.0, 480.0));
    assert_eq!(points[0].confidence, 1.0);
    assert!(points[0].visible);
  }

  #[test]
  fn non_coco_layout_has_no_limbs() {
    let skeleton = PoseSkeleton::for_keypoints(5);
    assert!(skeleton.connections.is_empty());
    assert!(!skeleton.draw_limbs);
    assert_eq!(skeleton.keypoint_color(4), POSE_PALETTE[16]);
  }
}
