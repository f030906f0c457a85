// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 检测器配置
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

use std::str::FromStr;

use thiserror::Error;

use crate::{frame::ChannelOrder, letterbox::DEFAULT_PAD_COLOR};

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("阈值 {name} 必须位于 (0, 1] 区间, 实际为 {value}")]
  Threshold { name: &'static str, value: f32 },
  #[error("批大小必须大于 0")]
  ZeroBatchSize,
  #[error("步长必须大于 0")]
  ZeroStride,
  #[error("网络输入尺寸 {width}x{height} 不是步长 {stride} 的整数倍")]
  NetSize { width: u32, height: u32, stride: u32 },
  #[error("最大检测数必须大于 0")]
  ZeroMaxDetections,
  #[error("关键点形状 {keypoints}x{dims} 无效")]
  KeypointShape { keypoints: usize, dims: usize },
  #[error("参数 {key} 的值 '{value}' 无法解析")]
  InvalidValue { key: String, value: String },
  #[error("未知参数: {0}")]
  UnknownKey(String),
}

impl ConfigError {
  fn invalid(key: &str, value: &str) -> Self {
    ConfigError::InvalidValue {
      key: key.to_string(),
      value: value.to_string(),
    }
  }
}

/// 非极大值抑制的作用范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmsScope {
  /// 只在同一类别内抑制
  #[default]
  PerClass,
  /// 跨类别抑制
  Agnostic,
}

impl FromStr for NmsScope {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "class" | "per-class" | "per_class" => Ok(NmsScope::PerClass),
      "agnostic" | "global" => Ok(NmsScope::Agnostic),
      _ => Err(ConfigError::invalid("nms", s)),
    }
  }
}

/// 模型任务类型，决定输出张量中 4 + 类别 之后的附加通道含义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Task {
  #[default]
  Detect,
  /// 附加通道为掩码系数，第二个输出为原型掩码
  Segment,
  /// 附加通道为 keypoints * dims 个关键点数值
  Pose { keypoints: usize, dims: usize },
  /// 附加通道为旋转角（弧度）
  Obb,
}

impl Task {
  pub const COCO_POSE: Task = Task::Pose {
    keypoints: 17,
    dims: 3,
  };
}

impl FromStr for Task {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "detect" => Ok(Task::Detect),
      "segment" | "seg" => Ok(Task::Segment),
      "pose" => Ok(Task::COCO_POSE),
      "obb" => Ok(Task::Obb),
      _ => Err(ConfigError::invalid("task", s)),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  pub task: Task,
  pub net_width: u32,
  pub net_height: u32,
  pub batch_size: usize,
  pub class_confidence_threshold: f32,
  pub nms_iou_threshold: f32,
  pub mask_probability_threshold: f32,
  pub keypoint_confidence_threshold: f32,
  pub stride: u32,
  pub allow_upscale: bool,
  pub nms_scope: NmsScope,
  pub max_detections: usize,
  pub channel_order: ChannelOrder,
  pub pad_color: [u8; 3],
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      task: Task::Detect,
      net_width: 640,
      net_height: 640,
      batch_size: 1,
      class_confidence_threshold: 0.25,
      nms_iou_threshold: 0.45,
      mask_probability_threshold: 0.5,
      keypoint_confidence_threshold: 0.5,
      stride: 32,
      allow_upscale: true,
      nms_scope: NmsScope::PerClass,
      max_detections: 300,
      channel_order: ChannelOrder::Rgb,
      pad_color: DEFAULT_PAD_COLOR,
    }
  }
}

fn check_threshold(name: &'static str, value: f32) -> Result<(), ConfigError> {
  if value > 0.0 && value <= 1.0 {
    Ok(())
  } else {
    Err(ConfigError::Threshold { name, value })
  }
}

pub(crate) fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value
    .trim()
    .parse::<T>()
    .map_err(|_| ConfigError::invalid(key, value))
}

pub(crate) fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
  match value.trim() {
    "" | "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(ConfigError::invalid(key, value)),
  }
}

/// 解析 `640x480` 或 `640`
fn parse_size(key: &str, value: &str) -> Result<(u32, u32), ConfigError> {
  match value.split_once(['x', 'X']) {
    Some((w, h)) => Ok((parse(key, w)?, parse(key, h)?)),
    None => {
      let side = parse(key, value)?;
      Ok((side, side))
    }
  }
}

impl DetectorConfig {
  /// 检查配置，非法值直接拒绝而不是截断
  pub fn validate(&self) -> Result<(), ConfigError> {
    check_threshold("class_confidence_threshold", self.class_confidence_threshold)?;
    check_threshold("nms_iou_threshold", self.nms_iou_threshold)?;
    check_threshold("mask_probability_threshold", self.mask_probability_threshold)?;
    check_threshold(
      "keypoint_confidence_threshold",
      self.keypoint_confidence_threshold,
    )?;

    if self.batch_size == 0 {
      return Err(ConfigError::ZeroBatchSize);
    }
    if self.stride == 0 {
      return Err(ConfigError::ZeroStride);
    }
    if self.net_width == 0
      || self.net_height == 0
      || self.net_width % self.stride != 0
      || self.net_height % self.stride != 0
    {
      return Err(ConfigError::NetSize {
        width: self.net_width,
        height: self.net_height,
        stride: self.stride,
      });
    }
    if self.max_detections == 0 {
      return Err(ConfigError::ZeroMaxDetections);
    }
    if let Task::Pose { keypoints, dims } = self.task
      && (keypoints == 0 || !(2..=3).contains(&dims))
    {
      return Err(ConfigError::KeypointShape { keypoints, dims });
    }
    Ok(())
  }

  /// 按 URL 查询参数设置单个配置项
  pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
      "task" => self.task = value.parse()?,
      "conf" | "confidence" => self.class_confidence_threshold = parse(key, value)?,
      "iou" | "nms_iou" => self.nms_iou_threshold = parse(key, value)?,
      "mask" => self.mask_probability_threshold = parse(key, value)?,
      "kpt" | "keypoint" => self.keypoint_confidence_threshold = parse(key, value)?,
      "batch" => self.batch_size = parse(key, value)?,
      "size" => (self.net_width, self.net_height) = parse_size(key, value)?,
      "stride" => self.stride = parse(key, value)?,
      "upscale" => self.allow_upscale = parse_bool(key, value)?,
      "nms" => self.nms_scope = value.parse()?,
      "max_det" => self.max_detections = parse(key, value)?,
      "bgr" => {
        self.channel_order = if parse_bool(key, value)? {
          ChannelOrder::Bgr
        } else {
          ChannelOrder::Rgb
        }
      }
      "pad" => {
        let gray: u8 = parse(key, value)?;
        self.pad_color = [gray; 3];
      }
      "kpt_shape" => {
        let (keypoints, dims) = parse_size(key, value)?;
        self.task = Task::Pose {
          keypoints: keypoints as usize,
          dims: dims as usize,
        };
      }
      _ => return Err(ConfigError::UnknownKey(key.to_string())),
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_is_valid() {
    assert_eq!(DetectorConfig::default().validate(), Ok(()));
  }

  #[test]
  fn rejects_non_positive_thresholds() {
    let config = DetectorConfig {
      class_confidence_threshold: 0.0,
      ..Default::default()
    };
    assert!(matches!(
      config.validate(),
      Err(ConfigError::Threshold {
        name: "class_confidence_threshold",
        ..
      })
    ));

    let config = DetectorConfig {
      nms_iou_threshold: -0.5,
      ..Default::default()
    };
    assert!(config.validate().is_err());

    let config = DetectorConfig {
      mask_probability_threshold: 1.5,
      ..Default::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn rejects_zero_batch_size() {
    let config = DetectorConfig {
      batch_size: 0,
      ..Default::default()
    };
    assert_eq!(config.validate(), Err(ConfigError::ZeroBatchSize));
  }

  #[test]
  fn rejects_net_size_off_stride() {
    let config = DetectorConfig {
      net_width: 630,
      ..Default::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::NetSize { .. })));
  }

  #[test]
  fn rejects_bad_keypoint_shape() {
    let config = DetectorConfig {
      task: Task::Pose {
        keypoints: 17,
        dims: 4,
      },
      ..Default::default()
    };
    assert!(matches!(
      config.validate(),
      Err(ConfigError::KeypointShape { .. })
    ));
  }

  #[test]
  fn set_from_query_values() {
    let mut config = DetectorConfig::default();
    config.set("task", "seg").unwrap();
    config.set("conf", "0.4").unwrap();
    config.set("size", "1280x736").unwrap();
    config.set("batch", "4").unwrap();
    config.set("upscale", "false").unwrap();
    config.set("nms", "agnostic").unwrap();
    config.set("bgr", "").unwrap();

    assert_eq!(config.task, Task::Segment);
    assert_eq!(config.class_confidence_threshold, 0.4);
    assert_eq!((config.net_width, config.net_height), (1280, 736));
    assert_eq!(config.batch_size, 4);
    assert!(!config.allow_upscale);
    assert_eq!(config.nms_scope, NmsScope::Agnostic);
    assert_eq!(config.channel_order, ChannelOrder::Bgr);
    assert_eq!(config.validate(), Ok(()));
  }

  #[test]
  fn set_rejects_garbage() {
    let mut config = DetectorConfig::default();
    assert!(matches!(
      config.set("conf", "high"),
      Err(ConfigError::InvalidValue { .. })
    ));
    assert_eq!(
      config.set("colour", "red"),
      Err(ConfigError::UnknownKey("colour".to_string()))
    );
  }
}
