// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::{
  marker::PhantomData,
  path::{Path, PathBuf},
  sync::atomic::{AtomicU32, Ordering},
};

use chrono::{Datelike, Local};
use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectResult, WithLabel},
  output::{
    Render,
    draw::{Draw, DrawError, Record},
  },
  url_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
}

pub enum DrawWrapper {
  Draw(Box<Draw>),
  Record(Record),
}

impl DrawWrapper {
  pub fn save_result<T: WithLabel>(
    &self,
    path: &Path,
    frame: &RgbImage,
    result: &DetectResult,
  ) -> Result<(), DirectoryRecordOutputError> {
    match self {
      DrawWrapper::Draw(draw) => {
        draw.draw_on_copy::<T>(frame, result).save(path)?;
      }
      DrawWrapper::Record(record) => {
        frame.save(path)?;
        record.record::<T>(result, path)?;
      }
    };

    Ok(())
  }

  pub fn with(kind: &str, font: Option<&str>) -> Result<Self, DrawError> {
    Ok(match kind {
      "record-name" => DrawWrapper::Record(Record {
        label_with_name: true,
      }),
      "record-id" => DrawWrapper::Record(Record {
        label_with_name: false,
      }),
      _ => {
        let draw = match font {
          Some(font) => Draw::with_font_file(font)?,
          None => Draw::default(),
        };
        DrawWrapper::Draw(Box::new(draw))
      }
    })
  }
}

/// 按日期分目录保存每一帧
///
/// `folder:///dir` 保存标注后的图像；`?record=name|id` 保存原图和 JSON 记录；
/// 默认只保存有检测结果的帧，`?always` 保存所有帧。
pub struct DirectoryRecordOutput<T> {
  directory: PathBuf,
  draw: DrawWrapper,
  frame_counter: AtomicU32,
  always: bool,
  _label: PhantomData<fn() -> T>,
}

impl<T> FromUrlWithScheme for DirectoryRecordOutput<T> {
  const SCHEME: &'static str = "folder";
}

impl<T> FromUrl for DirectoryRecordOutput<T> {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let kind = match uri.query_pairs().find(|(k, _)| k == "record") {
      Some((_, v)) if v == "id" => "record-id",
      Some(_) => "record-name",
      None => "draw",
    };
    let font = uri
      .query_pairs()
      .find(|(k, _)| k == "font")
      .map(|(_, v)| v.into_owned());
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(url_path(uri)),
      draw: DrawWrapper::with(kind, font.as_deref())?,
      frame_counter: AtomicU32::new(0),
      always,
      _label: PhantomData,
    })
  }
}

impl<T> DirectoryRecordOutput<T> {
  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl<T: WithLabel> Render<RgbImage, DetectResult> for DirectoryRecordOutput<T> {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &DetectResult) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      debug!("无检测结果, 跳过保存");
      return Ok(());
    }
    let path = self.frame_path()?;
    self.draw.save_result::<T>(&path, frame, result)?;
    debug!("保存记录: {}", path.display());
    Ok(())
  }
}
