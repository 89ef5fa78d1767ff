// 该文件是 Wangyue （望月） 项目的一部分。
// src/bin/detection_node.rs - 检测节点主程序
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

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use wangyue::{
  FromUrl,
  input::{DOCK_CAM_TOPIC, ReplayPublisher, topic},
  model::{DefaultLoader, DetectorOptions},
  node::NodeConfig,
  task::{ContinuousTask, StdoutUplink, Task},
};

/// Wangyue 检测节点参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 数据根目录，标注图像保存在其下的 delayed/dock_images
  #[arg(long, env = "WANGYUE_DATA_PATH", value_name = "DIR")]
  pub data_path: PathBuf,

  /// 模型地址，例如 onnx:///opt/models/dock.onnx?labels=/opt/models/labels.txt
  #[arg(long, env = "WANGYUE_MODEL", value_name = "MODEL")]
  pub model: Url,

  /// 推理线程数提示
  #[arg(long, default_value = "4", value_name = "COUNT")]
  pub threads: usize,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub score_threshold: f32,

  /// 每帧最多返回的检测数
  #[arg(long, default_value = "3", value_name = "COUNT")]
  pub max_results: usize,

  /// 保存图像的 JPEG 质量 (1 - 100)
  #[arg(long, default_value = "100", value_name = "QUALITY")]
  pub jpeg_quality: u8,

  /// 订阅的话题名
  #[arg(long, default_value = DOCK_CAM_TOPIC, value_name = "TOPIC")]
  pub topic: String,

  /// 回放来源，例如 replay:///data/dock.jpg?rate=5
  #[arg(long, value_name = "SOURCE")]
  pub replay: Option<Url>,

  /// 启动时即开启检测
  #[arg(long)]
  pub detect_on_start: bool,
}

fn main() -> Result<()> {
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  info!("数据根目录: {}", args.data_path.display());
  info!("模型地址: {}", args.model);
  info!("订阅话题: {}", args.topic);

  let mut config = NodeConfig::new(&args.data_path, args.model.clone());
  config.detector = DetectorOptions {
    threads: args.threads,
    score_threshold: args.score_threshold,
    max_results: args.max_results,
  };
  config.jpeg_quality = args.jpeg_quality;
  config.control.0 = args.detect_on_start;

  let replay = args
    .replay
    .as_ref()
    .map(ReplayPublisher::from_url)
    .transpose()?;

  ContinuousTask::new(config)
    .with_replay(replay)
    .run_task(topic(&args.topic), DefaultLoader::default(), Arc::new(StdoutUplink))?;

  Ok(())
}
