// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::{marker::PhantomData, path::Path};

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectResult, WithLabel},
  output::{
    Render,
    draw::{Draw, DrawError},
  },
  url_path,
};

pub struct SaveImageFileOutput<T> {
  path: String,
  draw: Draw,
  _label: PhantomData<fn() -> T>,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl<T> FromUrlWithScheme for SaveImageFileOutput<T> {
  const SCHEME: &'static str = "image";
}

impl<T> FromUrl for SaveImageFileOutput<T> {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let draw = match uri.query_pairs().find(|(k, _)| k == "font") {
      Some((_, font)) => Draw::with_font_file(&*font)?,
      None => Draw::default(),
    };

    Ok(SaveImageFileOutput {
      path: url_path(uri),
      draw,
      _label: PhantomData,
    })
  }
}

impl<T> SaveImageFileOutput<T> {
  pub fn new(path: impl Into<String>, draw: Draw) -> Self {
    Self {
      path: path.into(),
      draw,
      _label: PhantomData,
    }
  }

  fn save_image(&self, image: RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    info!("保存图像到文件: {}", self.path);

    Ok(())
  }
}

impl<T: WithLabel> Render<RgbImage, DetectResult> for SaveImageFileOutput<T> {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &RgbImage, result: &DetectResult) -> Result<(), Self::Error> {
    let image = self.draw.draw_on_copy::<T>(frame, result);
    self.save_image(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, CocoLabel, Detection, DetectionExtra};

  #[test]
  fn saves_annotated_copy() {
    let dir = std::env::temp_dir().join(format!("shanan-save-{}", std::process::id()));
    let path = dir.join("nested").join("out.png");
    let output = SaveImageFileOutput::<CocoLabel>::new(path.to_string_lossy(), Draw::default());

    let frame = RgbImage::new(64, 64);
    let result = DetectResult::from(vec![Detection {
      class_id: 1,
      confidence: 0.8,
      bbox: BoundingBox::new(30.0, 30.0, 20.0, 20.0),
      extra: DetectionExtra::None,
    }]);
    output.render_result(&frame, &result).unwrap();

    let saved = image::open(&path).unwrap().into_rgb8();
    assert_eq!(saved.dimensions(), (64, 64));
    assert_ne!(saved.get_pixel(30, 40).0, [0, 0, 0]);
    // 原图不被修改
    assert_eq!(frame.get_pixel(30, 40).0, [0, 0, 0]);

    std::fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn rejects_other_scheme() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      SaveImageFileOutput::<CocoLabel>::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
