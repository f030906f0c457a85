// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use image::GrayImage;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;

  fn infer_batch(&self, inputs: &[Self::Input]) -> Result<Vec<Self::Output>, Self::Error> {
    inputs.iter().map(|input| self.infer(input)).collect()
  }
}

/// 轴对齐矩形框，左上角 + 宽高，原图像素坐标
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn right(&self) -> f32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.height
  }

  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }

  pub fn is_empty(&self) -> bool {
    self.width <= 0.0 || self.height <= 0.0
  }

  /// 两个矩形的交集，不相交时宽高为 0
  pub fn intersect(&self, other: &BoundingBox) -> BoundingBox {
    let x1 = self.x.max(other.x);
    let y1 = self.y.max(other.y);
    let x2 = self.right().min(other.right());
    let y2 = self.bottom().min(other.bottom());
    if x2 <= x1 || y2 <= y1 {
      return BoundingBox::default();
    }
    BoundingBox::new(x1, y1, x2 - x1, y2 - y1)
  }

  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let intersection = self.intersect(other).area();
    let union = self.area() + other.area() - intersection;
    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }

  /// [x_min, y_min, x_max, y_max]
  pub fn to_xyxy(&self) -> [f32; 4] {
    [self.x, self.y, self.right(), self.bottom()]
  }
}

/// 旋转矩形框，中心 + 宽高 + 旋转角（弧度）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RotatedBox {
  pub cx: f32,
  pub cy: f32,
  pub width: f32,
  pub height: f32,
  pub angle: f32,
}

impl RotatedBox {
  pub fn angle_degrees(&self) -> f32 {
    self.angle.to_degrees()
  }

  /// 四个顶点，按顺时针排列
  pub fn corners(&self) -> [(f32, f32); 4] {
    let (sin, cos) = self.angle.sin_cos();
    let (hw, hh) = (self.width / 2.0, self.height / 2.0);
    [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)].map(|(dx, dy)| {
      (
        self.cx + dx * cos - dy * sin,
        self.cy + dx * sin + dy * cos,
      )
    })
  }

  /// 外接轴对齐矩形
  pub fn bounding_rect(&self) -> BoundingBox {
    let (sin, cos) = self.angle.sin_cos();
    let (sin, cos) = (sin.abs(), cos.abs());
    let ex = self.width / 2.0 * cos + self.height / 2.0 * sin;
    let ey = self.width / 2.0 * sin + self.height / 2.0 * cos;
    BoundingBox::new(self.cx - ex, self.cy - ey, 2.0 * ex, 2.0 * ey)
  }
}

/// 框内二值掩码，`mask` 左上角位于原图 (x, y)，前景为 255
#[derive(Debug, Clone, PartialEq)]
pub struct BoxMask {
  pub x: u32,
  pub y: u32,
  pub mask: GrayImage,
}

impl BoxMask {
  /// 原图坐标 (x, y) 是否落在掩码前景上
  pub fn contains(&self, x: u32, y: u32) -> bool {
    if x < self.x || y < self.y {
      return false;
    }
    self
      .mask
      .get_pixel_checked(x - self.x, y - self.y)
      .map(|p| p.0[0] > 0)
      .unwrap_or(false)
  }

  pub fn area(&self) -> usize {
    self.mask.pixels().filter(|p| p.0[0] > 0).count()
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
  pub x: f32,
  pub y: f32,
  pub confidence: f32,
  /// 置信度不低于关键点阈值
  pub visible: bool,
}

/// 不同任务附带的检测信息
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DetectionExtra {
  #[default]
  None,
  Rotated(RotatedBox),
  Mask(BoxMask),
  Pose(Vec<Keypoint>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_id: usize,
  pub confidence: f32,
  pub bbox: BoundingBox,
  pub extra: DetectionExtra,
}

impl Detection {
  pub fn mask(&self) -> Option<&BoxMask> {
    match &self.extra {
      DetectionExtra::Mask(mask) => Some(mask),
      _ => None,
    }
  }

  pub fn keypoints(&self) -> Option<&[Keypoint]> {
    match &self.extra {
      DetectionExtra::Pose(keypoints) => Some(keypoints),
      _ => None,
    }
  }

  pub fn rotated_box(&self) -> Option<&RotatedBox> {
    match &self.extra {
      DetectionExtra::Rotated(rotated) => Some(rotated),
      _ => None,
    }
  }

  pub fn label<T: WithLabel>(&self) -> T {
    T::from_label_id(self.class_id as u32)
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;
}

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CocoLabel(pub u32);

impl WithLabel for CocoLabel {
  fn to_label_str(&self) -> String {
    COCO_CLASSES
      .get(self.0 as usize)
      .map(|name| name.to_string())
      .unwrap_or_else(|| format!("class-{}", self.0))
  }

  fn to_label_id(&self) -> u32 {
    self.0
  }

  fn from_label_id(id: u32) -> Self {
    CocoLabel(id)
  }
}

mod backend;
pub use self::backend::{BackendOptions, InferenceBackend, RawTensor, SessionInfo, TensorError};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxBackend, OnnxBackendError};

mod yolov8;
pub use self::yolov8::{Yolov8, Yolov8Builder, Yolov8Error};
