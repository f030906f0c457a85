// 该文件是 Shanan （山南西风） 项目的一部分。
// src/postprocess/obb.rs - 旋转框解码
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

use crate::{letterbox::LetterboxParams, model::RotatedBox};

/// 网络空间的 (cx, cy, w, h, 弧度) 映射回原图
pub fn decode_rotated(
  cx: f32,
  cy: f32,
  width: f32,
  height: f32,
  angle: f32,
  params: &LetterboxParams,
) -> RotatedBox {
  let (cx, cy) = params.to_original(cx, cy);
  let (width, height) = params.length_to_original(width, height);
  RotatedBox {
    cx,
    cy,
    width,
    height,
    angle,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn maps_center_and_size() {
    let params = LetterboxParams {
      scale_x: 0.5,
      scale_y: 0.5,
      pad_x: 0.0,
      pad_y: 140.0,
    };
    let rotated = decode_rotated(100.0, 240.0, 30.0, 10.0, 0.3, &params);
    assert_eq!(rotated.cx, 200.0);
    assert_eq!(rotated.cy, 200.0);
    assert_eq!((rotated.width, rotated.height), (60.0, 20.0));
    assert_eq!(rotated.angle, 0.3);
  }
}
