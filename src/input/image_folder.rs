// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/image_folder.rs - 图像目录输入
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

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, url_path};

#[derive(Error, Debug)]
pub enum ImageFolderInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
}

const IMAGE_FOLDER_SCHEME: &str = "folder";
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// 目录下的全部图像文件，按文件名排序
#[derive(Debug, Clone)]
pub struct ImageFolderInput {
  files: Vec<PathBuf>,
}

fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    .unwrap_or(false)
}

impl ImageFolderInput {
  pub fn open(dir: impl AsRef<Path>) -> Result<Self, ImageFolderInputError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
      let path = entry?.path();
      if path.is_file() && is_image_file(&path) {
        files.push(path);
      }
    }
    files.sort();
    info!("目录 {} 中有 {} 张图像", dir.as_ref().display(), files.len());
    Ok(Self { files })
  }

  pub fn files(&self) -> &[PathBuf] {
    &self.files
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }
}

impl FromUrl for ImageFolderInput {
  type Error = ImageFolderInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != IMAGE_FOLDER_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        IMAGE_FOLDER_SCHEME,
        url.scheme()
      );
      return Err(ImageFolderInputError::SchemaMismatch);
    }
    Self::open(url_path(url))
  }
}

impl FromUrlWithScheme for ImageFolderInput {
  const SCHEME: &'static str = IMAGE_FOLDER_SCHEME;
}

impl IntoIterator for ImageFolderInput {
  type Item = RgbImage;
  type IntoIter = ImageFolderIter;

  fn into_iter(self) -> Self::IntoIter {
    ImageFolderIter {
      files: self.files.into_iter(),
    }
  }
}

/// 逐个解码图像，无法解码的文件被跳过
pub struct ImageFolderIter {
  files: std::vec::IntoIter<PathBuf>,
}

impl Iterator for ImageFolderIter {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      let decoded = ImageReader::open(&path)
        .map_err(image::ImageError::IoError)
        .and_then(|reader| reader.decode());
      match decoded {
        Ok(image) => {
          debug!("读取图像 {}", path.display());
          return Some(image.into_rgb8());
        }
        Err(e) => warn!("跳过无法读取的图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lists_sorted_images_and_skips_broken() {
    let dir = std::env::temp_dir().join(format!("shanan-folder-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    RgbImage::new(4, 4).save(dir.join("b.png")).unwrap();
    RgbImage::new(2, 2).save(dir.join("a.png")).unwrap();
    std::fs::write(dir.join("c.png"), b"not an image").unwrap();
    std::fs::write(dir.join("notes.txt"), b"skip").unwrap();

    let input = ImageFolderInput::open(&dir).unwrap();
    assert_eq!(input.len(), 3);
    assert!(input.files()[0].ends_with("a.png"));

    let sizes: Vec<(u32, u32)> = input.into_iter().map(|i| i.dimensions()).collect();
    assert_eq!(sizes, vec![(2, 2), (4, 4)]);

    std::fs::remove_dir_all(&dir).unwrap();
  }
}
