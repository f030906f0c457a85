// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 检测器
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

use image::RgbImage;
use ndarray::{Axis, s};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  url_path,
  config::{self, ConfigError, DetectorConfig, Task},
  frame::RgbNchwBatch,
  model::{
    BoundingBox, DetectResult, Detection, DetectionExtra, Model,
    backend::{BackendOptions, InferenceBackend, RawTensor, SessionInfo},
  },
  postprocess::{
    NmsOptions, OutputLayout, decode_detections, decode_keypoints, decode_mask, decode_rotated,
    non_max_suppression,
  },
  preprocess::{BatchPreprocessor, PreprocessError, PreprocessedBatch},
};

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("模型加载错误: {path}, {reason}")]
  ModelLoadError { path: String, reason: String },
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("推理执行错误: {0}")]
  BackendExecutionError(String),
  #[error("配置无效: {0}")]
  InvalidConfiguration(#[from] ConfigError),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("预处理错误: {0}")]
  PreprocessError(#[from] PreprocessError),
}

impl Yolov8Error {
  fn load(path: &str, reason: impl std::fmt::Display) -> Self {
    Yolov8Error::ModelLoadError {
      path: path.to_string(),
      reason: reason.to_string(),
    }
  }

  fn output(msg: impl std::fmt::Display) -> Self {
    Yolov8Error::BackendExecutionError(msg.to_string())
  }

  /// 加载阶段的错误，检测器不可用
  pub fn is_load_error(&self) -> bool {
    matches!(
      self,
      Yolov8Error::ModelLoadError { .. } | Yolov8Error::ModelInvalid(_)
    )
  }
}

/// 未加载状态的检测器
#[derive(Debug, Clone)]
pub struct Yolov8Builder {
  model_path: String,
  config: DetectorConfig,
  backend: BackendOptions,
}

const YOLOV8_SCHEME: &str = "yolov8";

impl FromUrl for Yolov8Builder {
  type Error = Yolov8Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != YOLOV8_SCHEME {
      return Err(Yolov8Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        YOLOV8_SCHEME
      )));
    }

    let model_path = url_path(url);
    if model_path.is_empty() {
      return Err(Yolov8Error::ModelPathError("模型路径为空".to_string()));
    }

    let mut builder = Yolov8Builder::new(model_path);
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "cuda" => builder.backend.use_cuda = config::parse_bool(&key, &value)?,
        "device" => builder.backend.cuda_device = config::parse(&key, &value)?,
        "threads" => builder.backend.intra_threads = config::parse(&key, &value)?,
        "warmup" => builder.backend.warmup_runs = config::parse(&key, &value)?,
        _ => builder.config.set(&key, &value)?,
      }
    }
    debug!("模型配置: {:?}", builder.config);
    Ok(builder)
  }
}

impl FromUrlWithScheme for Yolov8Builder {
  const SCHEME: &'static str = YOLOV8_SCHEME;
}

impl Yolov8Builder {
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
      config: DetectorConfig::default(),
      backend: BackendOptions::default(),
    }
  }

  pub fn model_path(&self) -> &str {
    &self.model_path
  }

  pub fn detector_config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn config(mut self, config: DetectorConfig) -> Self {
    self.config = config;
    self
  }

  pub fn task(mut self, task: Task) -> Self {
    self.config.task = task;
    self
  }

  pub fn batch_size(mut self, batch_size: usize) -> Self {
    self.config.batch_size = batch_size;
    self
  }

  pub fn net_size(mut self, width: u32, height: u32) -> Self {
    self.config.net_width = width;
    self.config.net_height = height;
    self
  }

  pub fn confidence_threshold(mut self, threshold: f32) -> Self {
    self.config.class_confidence_threshold = threshold;
    self
  }

  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.config.nms_iou_threshold = threshold;
    self
  }

  pub fn backend_options(mut self, options: BackendOptions) -> Self {
    self.backend = options;
    self
  }

  pub fn warmup(mut self, runs: usize) -> Self {
    self.backend.warmup_runs = runs;
    self
  }

  /// 加载模型并检查输入输出形状，失败时构建器被消耗
  pub fn build<B: InferenceBackend>(self) -> Result<Yolov8<B>, Yolov8Error> {
    self.config.validate()?;

    let path = Path::new(&self.model_path);
    if !path.is_file() {
      error!("模型文件不存在: {}", self.model_path);
      return Err(Yolov8Error::load(&self.model_path, "文件不存在"));
    }

    info!("加载模型文件: {}", self.model_path);
    let backend = B::load(path, &self.backend).map_err(|e| {
      error!("模型加载失败: {}", e);
      Yolov8Error::load(&self.model_path, e)
    })?;

    let info = backend.session_info();
    debug!("模型输入形状: {:?}", info.input_shape);
    debug!("模型输出形状: {:?}", info.output_shapes);
    check_session(info, &self.config)?;
    info!("模型加载完成");

    let detector = Yolov8 {
      preprocessor: BatchPreprocessor::from_config(&self.config),
      nms: NmsOptions::from_config(&self.config),
      config: self.config,
      backend,
    };

    if self.backend.warmup_runs > 0 {
      info!("预热 {} 次", self.backend.warmup_runs);
      let (width, height) = detector.preprocessor.net_size();
      let blank = RgbNchwBatch::zeros(
        detector.config.batch_size,
        height as usize,
        width as usize,
      );
      for _ in 0..self.backend.warmup_runs {
        detector
          .backend
          .run(&blank)
          .map_err(|e| Yolov8Error::load(&self.model_path, e))?;
      }
    }

    Ok(detector)
  }
}

/// 检查模型的固定维度与配置一致
fn check_session(info: &SessionInfo, config: &DetectorConfig) -> Result<(), Yolov8Error> {
  if let Some(batch) = info.static_batch()
    && batch != config.batch_size
  {
    error!("模型批大小为 {}, 配置为 {}", batch, config.batch_size);
    return Err(Yolov8Error::ModelInvalid(format!(
      "模型批大小为 {}, 配置为 {}",
      batch, config.batch_size
    )));
  }
  if let Some((width, height)) = info.static_size()
    && (width as u32, height as u32) != (config.net_width, config.net_height)
  {
    error!(
      "模型输入尺寸为 {}x{}, 配置为 {}x{}",
      width, height, config.net_width, config.net_height
    );
    return Err(Yolov8Error::ModelInvalid(format!(
      "模型输入尺寸为 {}x{}, 配置为 {}x{}",
      width, height, config.net_width, config.net_height
    )));
  }

  let required = if config.task == Task::Segment { 2 } else { 1 };
  if info.output_shapes.len() < required {
    error!(
      "预期模型输出数量至少为 {}, 实际为 {}",
      required,
      info.output_shapes.len()
    );
    return Err(Yolov8Error::ModelInvalid(format!(
      "预期模型输出数量至少为 {}, 实际为 {}",
      required,
      info.output_shapes.len()
    )));
  }

  if let Some(Some(channels)) = info.output_shapes[0].get(1) {
    let mask_channels = match info.output_shapes.get(1).and_then(|s| s.get(1)) {
      Some(Some(nm)) if config.task == Task::Segment => *nm,
      _ => 0,
    };
    OutputLayout::for_task(config.task, *channels, mask_channels)
      .map_err(|e| Yolov8Error::ModelInvalid(e.to_string()))?;
  }
  Ok(())
}

/// 已加载的检测器
pub struct Yolov8<B> {
  backend: B,
  config: DetectorConfig,
  preprocessor: BatchPreprocessor,
  nms: NmsOptions,
}

impl<B> std::fmt::Debug for Yolov8<B> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Yolov8")
      .field("config", &self.config)
      .field("nms", &self.nms)
      .finish_non_exhaustive()
  }
}

impl<B: InferenceBackend> Yolov8<B> {
  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn session_info(&self) -> &SessionInfo {
    self.backend.session_info()
  }

  pub fn detect(&self, image: &RgbImage) -> Result<DetectResult, Yolov8Error> {
    let mut results = self.detect_batch(std::slice::from_ref(image))?;
    Ok(results.pop().unwrap_or_default())
  }

  /// 每张输入图像对应一个结果，超过批大小时分多批执行
  pub fn detect_batch(&self, images: &[RgbImage]) -> Result<Vec<DetectResult>, Yolov8Error> {
    if images.is_empty() {
      debug!("输入为空");
      return Ok(Vec::new());
    }

    let mut results = Vec::with_capacity(images.len());
    for chunk in images.chunks(self.config.batch_size) {
      let batch = self.preprocessor.prepare(chunk)?;
      let tensor = batch.to_tensor(self.config.channel_order)?;
      debug!("输入张量形状: {:?}", tensor.shape());

      let outputs = self.backend.run(&tensor).map_err(|e| {
        warn!("推理失败: {}", e);
        Yolov8Error::output(e)
      })?;
      results.extend(self.postprocess(&batch, &outputs)?);
    }
    Ok(results)
  }

  /// 把模型输出解码为每张真实图像的检测结果，补齐项被忽略
  pub fn postprocess(
    &self,
    batch: &PreprocessedBatch<'_>,
    outputs: &[RawTensor],
  ) -> Result<Vec<DetectResult>, Yolov8Error> {
    let detections = outputs
      .first()
      .ok_or_else(|| Yolov8Error::output("模型没有输出"))?
      .view3()
      .map_err(Yolov8Error::output)?;
    if detections.len_of(Axis(0)) != batch.len() {
      return Err(Yolov8Error::output(format!(
        "输出批大小为 {}, 输入为 {}",
        detections.len_of(Axis(0)),
        batch.len()
      )));
    }

    let protos = match self.config.task {
      Task::Segment => {
        let protos = outputs
          .get(1)
          .ok_or_else(|| Yolov8Error::output("分割模型缺少原型掩码输出"))?
          .view4()
          .map_err(Yolov8Error::output)?;
        if protos.len_of(Axis(0)) != batch.len() {
          return Err(Yolov8Error::output("原型掩码批大小与输入不一致"));
        }
        Some(protos)
      }
      _ => None,
    };
    let mask_channels = protos.as_ref().map(|p| p.len_of(Axis(1))).unwrap_or(0);
    let layout = OutputLayout::for_task(
      self.config.task,
      detections.len_of(Axis(1)),
      mask_channels,
    )
    .map_err(Yolov8Error::output)?;

    let mut results = Vec::with_capacity(batch.real_len());
    for index in 0..batch.real_len() {
      let (Some(params), Some(size)) = (batch.params(index), batch.source_size(index)) else {
        break;
      };
      let output = detections.index_axis(Axis(0), index);
      let protos = protos.as_ref().map(|p| p.index_axis(Axis(0), index));

      let candidates = decode_detections(
        output,
        &layout,
        params,
        self.config.class_confidence_threshold,
      );
      let keep = non_max_suppression(
        &candidates.boxes,
        &candidates.scores,
        &candidates.class_ids,
        &self.nms,
      );
      debug!(
        "第 {} 张图像: 候选 {} 个, 保留 {} 个",
        index,
        candidates.len(),
        keep.len()
      );

      let frame = BoundingBox::new(0.0, 0.0, size.0 as f32, size.1 as f32);
      let mut items = Vec::with_capacity(keep.len());
      for k in keep {
        let bbox = candidates.boxes[k].intersect(&frame);
        if bbox.is_empty() {
          warn!("第 {} 张图像的检测框落在图像外, 已丢弃", index);
          continue;
        }

        let column = output.column(candidates.rows[k]);
        let offset = layout.extra_offset();
        let extra = match (self.config.task, protos.as_ref()) {
          (Task::Segment, Some(protos)) => {
            let coefficients = column.slice_move(s![offset..offset + layout.extra_channels]);
            decode_mask(
              protos.view(),
              coefficients,
              &bbox,
              params,
              batch.net_size(),
              self.config.mask_probability_threshold,
            )
            .map(DetectionExtra::Mask)
            .unwrap_or_else(|| {
              warn!("第 {} 张图像的掩码无法解码, 只保留检测框", index);
              DetectionExtra::None
            })
          }
          (Task::Pose { keypoints, dims }, _) => DetectionExtra::Pose(decode_keypoints(
            column.slice_move(s![offset..]),
            keypoints,
            dims,
            params,
            size,
            self.config.keypoint_confidence_threshold,
          )),
          (Task::Obb, _) => DetectionExtra::Rotated(decode_rotated(
            column[0],
            column[1],
            column[2],
            column[3],
            column[offset],
            params,
          )),
          _ => DetectionExtra::None,
        };

        items.push(Detection {
          class_id: candidates.class_ids[k],
          confidence: candidates.scores[k],
          bbox,
          extra,
        });
      }
      results.push(DetectResult::from(items));
    }

    debug!("检测结果: {:?}", results.iter().map(|r| r.len()).collect::<Vec<_>>());
    Ok(results)
  }
}

impl<B: InferenceBackend> Model for Yolov8<B> {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = Yolov8Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect(input)
  }

  fn infer_batch(&self, inputs: &[Self::Input]) -> Result<Vec<Self::Output>, Self::Error> {
    self.detect_batch(inputs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_from_url() {
    let url = Url::parse(
      "yolov8:///models/yolov8n-seg.onnx?task=segment&conf=0.3&batch=4&cuda=true&threads=2&warmup=1",
    )
    .unwrap();
    let builder = Yolov8Builder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), "/models/yolov8n-seg.onnx");
    assert_eq!(builder.detector_config().task, Task::Segment);
    assert_eq!(builder.detector_config().class_confidence_threshold, 0.3);
    assert_eq!(builder.detector_config().batch_size, 4);
    assert!(builder.backend.use_cuda);
    assert_eq!(builder.backend.intra_threads, 2);
    assert_eq!(builder.backend.warmup_runs, 1);
  }

  #[test]
  fn relative_model_path() {
    let url = Url::parse("yolov8://models/yolov8n.onnx").unwrap();
    let builder = Yolov8Builder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), "models/yolov8n.onnx");
  }

  #[test]
  fn rejects_other_scheme_and_bad_query() {
    let url = Url::parse("onnx:///model.onnx").unwrap();
    assert!(matches!(
      Yolov8Builder::from_url(&url),
      Err(Yolov8Error::ModelPathError(_))
    ));

    let url = Url::parse("yolov8:///model.onnx?conf=abc").unwrap();
    assert!(matches!(
      Yolov8Builder::from_url(&url),
      Err(Yolov8Error::InvalidConfiguration(_))
    ));
  }

  #[test]
  fn session_shape_checks() {
    let config = DetectorConfig::default();
    let info = SessionInfo::from_shapes(&[1, 3, 640, 640], &[vec![1, 84, 8400]]);
    assert!(check_session(&info, &config).is_ok());

    let info = SessionInfo::from_shapes(&[2, 3, 640, 640], &[vec![2, 84, 8400]]);
    assert!(matches!(
      check_session(&info, &config),
      Err(Yolov8Error::ModelInvalid(_))
    ));

    let info = SessionInfo::from_shapes(&[-1, 3, 320, 320], &[vec![-1, 84, 2100]]);
    assert!(check_session(&info, &config).is_err());

    let seg = DetectorConfig {
      task: Task::Segment,
      ..Default::default()
    };
    let info = SessionInfo::from_shapes(&[1, 3, 640, 640], &[vec![1, 116, 8400]]);
    assert!(check_session(&info, &seg).is_err());
  }
}
