// 该文件是 Shanan （山南西风） 项目的一部分。
// src/postprocess/nms.rs - 非极大值抑制
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

use crate::{
  config::{DetectorConfig, NmsScope},
  model::BoundingBox,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmsOptions {
  pub score_threshold: f32,
  pub iou_threshold: f32,
  pub scope: NmsScope,
  pub max_detections: usize,
}

impl NmsOptions {
  pub fn from_config(config: &DetectorConfig) -> Self {
    Self {
      score_threshold: config.class_confidence_threshold,
      iou_threshold: config.nms_iou_threshold,
      scope: config.nms_scope,
      max_detections: config.max_detections,
    }
  }
}

/// 贪心 NMS，返回保留候选的下标，按分数降序
///
/// 分数相同的候选保持原有顺序。IoU 严格大于阈值才会被抑制。
pub fn non_max_suppression(
  boxes: &[BoundingBox],
  scores: &[f32],
  class_ids: &[usize],
  options: &NmsOptions,
) -> Vec<usize> {
  let mut order: Vec<usize> = (0..boxes.len())
    .filter(|&i| scores[i] >= options.score_threshold)
    .collect();
  order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

  let mut suppressed = vec![false; boxes.len()];
  let mut keep = Vec::new();

  for (pos, &i) in order.iter().enumerate() {
    if suppressed[i] {
      continue;
    }
    keep.push(i);
    if keep.len() >= options.max_detections {
      break;
    }

    for &j in &order[pos + 1..] {
      if suppressed[j] {
        continue;
      }
      if options.scope == NmsScope::PerClass && class_ids[i] != class_ids[j] {
        continue;
      }
      if boxes[i].iou(&boxes[j]) > options.iou_threshold {
        suppressed[j] = true;
      }
    }
  }

  keep
}

#[cfg(test)]
mod tests {
  use super::*;

  fn options(scope: NmsScope) -> NmsOptions {
    NmsOptions {
      score_threshold: 0.25,
      iou_threshold: 0.45,
      scope,
      max_detections: 300,
    }
  }

  #[test]
  fn suppresses_overlap_within_class() {
    let boxes = [
      BoundingBox::new(0.0, 0.0, 10.0, 10.0),
      BoundingBox::new(1.0, 0.0, 10.0, 10.0),
      BoundingBox::new(50.0, 50.0, 10.0, 10.0),
    ];
    let keep = non_max_suppression(&boxes, &[0.8, 0.9, 0.5], &[0, 0, 0], &options(NmsScope::PerClass));
    assert_eq!(keep, vec![1, 2]);
  }

  #[test]
  fn iou_at_threshold_keeps_both() {
    // IoU = 50 / 150
    let boxes = [
      BoundingBox::new(0.0, 0.0, 10.0, 10.0),
      BoundingBox::new(5.0, 0.0, 10.0, 10.0),
    ];
    let mut opts = options(NmsScope::PerClass);
    opts.iou_threshold = boxes[0].iou(&boxes[1]);
    let keep = non_max_suppression(&boxes, &[0.9, 0.8], &[0, 0], &opts);
    assert_eq!(keep, vec![0, 1]);
  }

  #[test]
  fn per_class_and_agnostic_scope() {
    let boxes = [
      BoundingBox::new(0.0, 0.0, 10.0, 10.0),
      BoundingBox::new(0.0, 0.0, 10.0, 10.0),
    ];
    let scores = [0.9, 0.8];
    let classes = [0, 1];
    assert_eq!(
      non_max_suppression(&boxes, &scores, &classes, &options(NmsScope::PerClass)),
      vec![0, 1]
    );
    assert_eq!(
      non_max_suppression(&boxes, &scores, &classes, &options(NmsScope::Agnostic)),
      vec![0]
    );
  }

  #[test]
  fn equal_scores_keep_row_order() {
    let boxes = [
      BoundingBox::new(0.0, 0.0, 10.0, 10.0),
      BoundingBox::new(0.0, 0.0, 10.0, 10.0),
      BoundingBox::new(100.0, 0.0, 10.0, 10.0),
    ];
    let keep = non_max_suppression(&boxes, &[0.5, 0.5, 0.5], &[0, 0, 0], &options(NmsScope::PerClass));
    assert_eq!(keep, vec![0, 2]);
  }

  #[test]
  fn caps_at_max_detections() {
    let boxes: Vec<BoundingBox> = (0..10)
      .map(|i| BoundingBox::new(i as f32 * 20.0, 0.0, 10.0, 10.0))
      .collect();
    let scores = vec![0.9; 10];
    let classes = vec![0; 10];
    let mut opts = options(NmsScope::PerClass);
    opts.max_detections = 3;
    assert_eq!(non_max_suppression(&boxes, &scores, &classes, &opts), vec![0, 1, 2]);
  }

  #[test]
  fn empty_input() {
    assert!(non_max_suppression(&[], &[], &[], &options(NmsScope::Agnostic)).is_empty());
  }
}
