// 该文件是 Shanan （山南西风） 项目的一部分。
// src/postprocess/decode.rs - 检测输出解码
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

use ndarray::{ArrayView2, Axis};
use thiserror::Error;

use crate::{
  config::Task,
  letterbox::LetterboxParams,
  model::BoundingBox,
  postprocess::obb::decode_rotated,
};

const BOX_CHANNELS: usize = 4;

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
  #[error("输出通道数 {channels} 不足以容纳 4 个坐标和 {extra} 个附加通道")]
  TooFewChannels { channels: usize, extra: usize },
}

/// 单张图像输出 `[4 + nc + extra, candidates]` 的通道划分
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputLayout {
  pub task: Task,
  pub num_classes: usize,
  /// 类别分数之后的附加通道数
  pub extra_channels: usize,
}

impl OutputLayout {
  /// `mask_channels` 只在分割任务中使用，取原型掩码的通道数
  pub fn for_task(task: Task, channels: usize, mask_channels: usize) -> Result<Self, DecodeError> {
    let extra = match task {
      Task::Detect => 0,
      Task::Segment => mask_channels,
      Task::Pose { keypoints, dims } => keypoints * dims,
      Task::Obb => 1,
    };
    if channels <= BOX_CHANNELS + extra {
      return Err(DecodeError::TooFewChannels { channels, extra });
    }
    Ok(Self {
      task,
      num_classes: channels - BOX_CHANNELS - extra,
      extra_channels: extra,
    })
  }

  pub fn channels(&self) -> usize {
    BOX_CHANNELS + self.num_classes + self.extra_channels
  }

  /// 附加通道起始下标
  pub fn extra_offset(&self) -> usize {
    BOX_CHANNELS + self.num_classes
  }
}

/// 通过阈值的候选框，各列表一一对应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidates {
  pub boxes: Vec<BoundingBox>,
  pub scores: Vec<f32>,
  pub class_ids: Vec<usize>,
  /// 候选在输出张量中的列号，用于取附加通道
  pub rows: Vec<usize>,
}

impl Candidates {
  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }

  fn push(&mut self, bbox: BoundingBox, score: f32, class_id: usize, row: usize) {
    self.boxes.push(bbox);
    self.scores.push(score);
    self.class_ids.push(class_id);
    self.rows.push(row);
  }
}

/// 解码单张图像的输出 `[channels, candidates]`，坐标映射回原图
///
/// 最高类别分数低于 `threshold` 的候选被丢弃。左上角被截到 0，宽高保持不变。
pub fn decode_detections(
  output: ArrayView2<'_, f32>,
  layout: &OutputLayout,
  params: &LetterboxParams,
  threshold: f32,
) -> Candidates {
  let mut candidates = Candidates::default();
  let class_end = BOX_CHANNELS + layout.num_classes;

  for (row, column) in output.axis_iter(Axis(1)).enumerate() {
    let mut class_id = 0;
    let mut score = f32::MIN;
    for c in BOX_CHANNELS..class_end {
      if column[c] > score {
        score = column[c];
        class_id = c - BOX_CHANNELS;
      }
    }
    if score < threshold {
      continue;
    }

    let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
    let bbox = match layout.task {
      Task::Obb => {
        let angle = column[layout.extra_offset()];
        decode_rotated(cx, cy, w, h, angle, params).bounding_rect()
      }
      _ => {
        let (x_center, y_center) = params.to_original(cx, cy);
        let (w, h) = params.length_to_original(w, h);
        BoundingBox::new(x_center - w / 2.0, y_center - h / 2.0, w, h)
      }
    };
    let bbox = BoundingBox::new(bbox.x.max(0.0), bbox.y.max(0.0), bbox.width, bbox.height);
    candidates.push(bbox, score, class_id, row);
  }

  candidates
}
