// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/simple_repeatshot.rs - 重复推理，统计耗时
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use url::Url;

use shanan_yolov8::{
  FromUrl,
  input::InputWrapper,
  model::{CocoLabel, OnnxBackend, Yolov8Builder},
  output::OutputWrapper,
  task::{RepeatShotTask, Task},
};
use tracing::info;

/// Shanan 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址, 例如 yolov8:///models/yolov8n.onnx?conf=0.3
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 重复次数
  #[arg(long, default_value_t = 1000)]
  pub repeat: usize,
  /// 不计入平均时间的次数
  #[arg(long, default_value_t = 2)]
  pub warmup: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let model = Yolov8Builder::from_url(&args.model)?.build::<OnnxBackend>()?;
  let output = OutputWrapper::<CocoLabel>::from_url(&args.output)?;

  RepeatShotTask::default()
    .with_repeat(args.repeat)
    .with_warmup(args.warmup)
    .run_task(input.into_images(), model, output)?;

  Ok(())
}
