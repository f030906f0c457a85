// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use std::{path::Path, sync::Mutex};

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::{TensorRef, ValueType},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::RgbNchwBatch,
  model::backend::{BackendOptions, InferenceBackend, RawTensor, SessionInfo, TensorError},
};

#[derive(Error, Debug)]
pub enum OnnxBackendError {
  #[error("模型文件读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("ONNX Runtime 错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("模型结构不支持: {0}")]
  Unsupported(String),
  #[error("会话锁已损坏")]
  Poisoned,
  #[error("输出张量错误: {0}")]
  Tensor(#[from] TensorError),
}

pub struct OnnxBackend {
  session: Mutex<Session>,
  input_name: String,
  output_names: Vec<String>,
  info: SessionInfo,
}

impl std::fmt::Debug for OnnxBackend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("OnnxBackend")
      .field("input_name", &self.input_name)
      .field("output_names", &self.output_names)
      .field("info", &self.info)
      .finish()
  }
}

fn tensor_shape(value_type: &ValueType) -> Option<Vec<i64>> {
  match value_type {
    ValueType::Tensor { shape, .. } => Some(shape.iter().copied().collect()),
    _ => None,
  }
}

impl InferenceBackend for OnnxBackend {
  type Error = OnnxBackendError;

  fn load(path: &Path, options: &BackendOptions) -> Result<Self, Self::Error> {
    let model_data = std::fs::read(path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let builder = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(options.intra_threads)?;

    #[cfg(feature = "cuda")]
    let builder = if options.use_cuda {
      let cuda = ort::execution_providers::CUDAExecutionProvider::default()
        .with_device_id(options.cuda_device)
        .build();
      match builder.clone().with_execution_providers([cuda]) {
        Ok(builder) => {
          info!("使用 CUDA 设备 {}", options.cuda_device);
          builder
        }
        Err(e) => {
          warn!("CUDA 不可用, 回退到 CPU: {}", e);
          builder
        }
      }
    } else {
      builder
    };
    #[cfg(not(feature = "cuda"))]
    if options.use_cuda {
      warn!("未启用 cuda 特性, 使用 CPU 推理");
    }

    info!("创建 ONNX Runtime 会话");
    let session = builder.commit_from_memory(&model_data)?;

    if session.inputs.len() != 1 {
      return Err(OnnxBackendError::Unsupported(format!(
        "预期模型输入数量为 1, 实际为 {}",
        session.inputs.len()
      )));
    }
    let input = &session.inputs[0];
    let input_shape = tensor_shape(&input.input_type)
      .ok_or_else(|| OnnxBackendError::Unsupported("模型输入不是张量".to_string()))?;
    if input_shape.len() != 4 {
      return Err(OnnxBackendError::Unsupported(format!(
        "模型输入应为 NCHW 四维张量, 实际形状 {:?}",
        input_shape
      )));
    }

    let mut output_names = Vec::with_capacity(session.outputs.len());
    let mut output_shapes = Vec::with_capacity(session.outputs.len());
    for output in &session.outputs {
      let shape = tensor_shape(&output.output_type).ok_or_else(|| {
        OnnxBackendError::Unsupported(format!("模型输出 {} 不是张量", output.name))
      })?;
      debug!("模型输出 {}: {:?}", output.name, shape);
      output_names.push(output.name.clone());
      output_shapes.push(shape);
    }

    let info = SessionInfo::from_shapes(&input_shape, &output_shapes);
    debug!("模型输入 {}: {:?}", input.name, input_shape);
    debug!(
      "动态批大小: {}, 动态尺寸: {}",
      info.supports_dynamic_batch, info.supports_dynamic_size
    );

    Ok(OnnxBackend {
      input_name: input.name.clone(),
      session: Mutex::new(session),
      output_names,
      info,
    })
  }

  fn session_info(&self) -> &SessionInfo {
    &self.info
  }

  fn run(&self, input: &RgbNchwBatch) -> Result<Vec<RawTensor>, Self::Error> {
    let view = input.view();
    let tensor = TensorRef::from_array_view(view)?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| OnnxBackendError::Poisoned)?;
    let outputs = session.run(ort::inputs![self.input_name.as_str() => tensor])?;

    let mut tensors = Vec::with_capacity(self.output_names.len());
    for name in &self.output_names {
      let (shape, data) = outputs[name.as_str()].try_extract_tensor::<f32>()?;
      let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
      tensors.push(RawTensor::new(shape, data.to_vec())?);
    }
    Ok(tensors)
  }
}
