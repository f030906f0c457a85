// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/backend.rs - 推理后端抽象
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

use ndarray::{ArrayView3, ArrayView4, Ix3, Ix4};
use thiserror::Error;

use crate::frame::RgbNchwBatch;

#[derive(Error, Debug, PartialEq)]
pub enum TensorError {
  #[error("张量形状 {shape:?} 需要 {expected} 个元素, 实际为 {actual}")]
  LengthMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
  #[error("张量维度为 {actual}, 期望 {expected}")]
  RankMismatch { expected: usize, actual: usize },
}

/// 后端输出的一个浮点张量，行优先存储
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

impl RawTensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, TensorError> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
      return Err(TensorError::LengthMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }
    Ok(Self { shape, data })
  }

  pub fn view3(&self) -> Result<ArrayView3<'_, f32>, TensorError> {
    if self.shape.len() != 3 {
      return Err(TensorError::RankMismatch {
        expected: 3,
        actual: self.shape.len(),
      });
    }
    let dim = Ix3(self.shape[0], self.shape[1], self.shape[2]);
    ArrayView3::from_shape(dim, &self.data).map_err(|_| self.length_error())
  }

  pub fn view4(&self) -> Result<ArrayView4<'_, f32>, TensorError> {
    if self.shape.len() != 4 {
      return Err(TensorError::RankMismatch {
        expected: 4,
        actual: self.shape.len(),
      });
    }
    let dim = Ix4(self.shape[0], self.shape[1], self.shape[2], self.shape[3]);
    ArrayView4::from_shape(dim, &self.data).map_err(|_| self.length_error())
  }

  fn length_error(&self) -> TensorError {
    TensorError::LengthMismatch {
      shape: self.shape.clone(),
      expected: self.shape.iter().product(),
      actual: self.data.len(),
    }
  }
}

/// 模型的输入输出形状，`None` 表示该维度是动态的
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionInfo {
  pub input_shape: Vec<Option<usize>>,
  pub output_shapes: Vec<Vec<Option<usize>>>,
  pub supports_dynamic_batch: bool,
  pub supports_dynamic_size: bool,
}

impl SessionInfo {
  /// 由形状推断动态能力，非正数维度视为动态
  pub fn from_shapes(input_shape: &[i64], output_shapes: &[Vec<i64>]) -> Self {
    let to_dims = |shape: &[i64]| -> Vec<Option<usize>> {
      shape
        .iter()
        .map(|&d| if d > 0 { Some(d as usize) } else { None })
        .collect()
    };
    let input_shape = to_dims(input_shape);
    let supports_dynamic_batch = input_shape.first().is_some_and(|d| d.is_none());
    let supports_dynamic_size = input_shape.len() == 4 && input_shape[2..].iter().any(|d| d.is_none());
    Self {
      output_shapes: output_shapes.iter().map(|s| to_dims(s)).collect(),
      input_shape,
      supports_dynamic_batch,
      supports_dynamic_size,
    }
  }

  /// 固定的批大小
  pub fn static_batch(&self) -> Option<usize> {
    self.input_shape.first().copied().flatten()
  }

  /// 固定的输入尺寸 (宽, 高)
  pub fn static_size(&self) -> Option<(usize, usize)> {
    match self.input_shape.as_slice() {
      [_, _, Some(h), Some(w)] => Some((*w, *h)),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendOptions {
  pub intra_threads: usize,
  pub use_cuda: bool,
  pub cuda_device: i32,
  pub warmup_runs: usize,
}

impl Default for BackendOptions {
  fn default() -> Self {
    Self {
      intra_threads: 4,
      use_cuda: false,
      cuda_device: 0,
      warmup_runs: 0,
    }
  }
}

/// 推理后端
///
/// 接收预处理好的 NCHW 批量张量，返回模型全部输出张量。
/// `run` 失败后后端必须仍然可用。
pub trait InferenceBackend: Sized {
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(path: &Path, options: &BackendOptions) -> Result<Self, Self::Error>;
  fn session_info(&self) -> &SessionInfo;
  fn run(&self, input: &RgbNchwBatch) -> Result<Vec<RawTensor>, Self::Error>;
}
