// 该文件是 Wangyue （望月） 项目的一部分。
// src/node.rs - 检测节点的启动与停止
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

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::command::{Dispatcher, Uplink, UplinkMessage};
use crate::control::ControlState;
use crate::input::{FrameStream, Subscription, TransportError};
use crate::model::{DetectorHandle, DetectorOptions, Engine, EngineLoader, HandleState};
use crate::output::{DetectionReport, ImageStore};
use crate::pipeline::DetectionPipeline;

pub const IMAGE_SUBDIRECTORY: &str = "delayed/dock_images";

#[derive(Error, Debug)]
pub enum NodeError {
  #[error("无法创建输出目录 {path}: {source}")]
  OutputDirectory {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("传输错误: {0}")]
  Transport(#[from] TransportError),
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
  pub data_path: PathBuf,
  pub model: Url,
  pub detector: DetectorOptions,
  pub jpeg_quality: u8,
  pub control: (bool, bool),
}

impl NodeConfig {
  pub fn new(data_path: impl Into<PathBuf>, model: Url) -> Self {
    let control = ControlState::default().get();
    Self {
      data_path: data_path.into(),
      model,
      detector: DetectorOptions::default(),
      jpeg_quality: 100,
      control,
    }
  }

  pub fn output_dir(&self) -> PathBuf {
    self.data_path.join(IMAGE_SUBDIRECTORY)
  }
}

/// 运行中的检测节点
///
/// `start` 依次创建输出目录、打开检测器、订阅帧话题；`stop` 按相反顺序退订、
/// 等待在途帧结束、关闭检测器。模型加载失败不会阻止启动，节点会在推理不可用的
/// 状态下继续运行。
pub struct DetectionNode<E: Engine + 'static> {
  control: Arc<ControlState>,
  detector: Arc<DetectorHandle<E>>,
  subscription: Option<Subscription>,
  output_dir: PathBuf,
  uplink: Option<Arc<dyn Uplink>>,
}

impl<E: Engine + 'static> DetectionNode<E> {
  pub fn start<L, R>(
    config: &NodeConfig,
    loader: &L,
    stream: FrameStream,
    report: R,
  ) -> Result<Self, NodeError>
  where
    L: EngineLoader<Engine = E>,
    R: DetectionReport + 'static,
  {
    let output_dir = config.output_dir();
    std::fs::create_dir_all(&output_dir).map_err(|source| NodeError::OutputDirectory {
      path: output_dir.clone(),
      source,
    })?;
    info!("输出目录: {}", output_dir.display());

    let control = Arc::new(ControlState::new(config.control.0, config.control.1));
    let detector = Arc::new(DetectorHandle::new());
    if let Err(e) = detector.open(loader, &config.model, &config.detector) {
      error!("检测器打开失败，推理在重启前不可用: {}", e);
    }

    let pipeline = DetectionPipeline::new(
      control.clone(),
      detector.clone(),
      ImageStore::new(&output_dir).with_quality(config.jpeg_quality),
    )
    .with_report(report);

    info!("订阅话题: {}", stream.topic());
    let subscription = stream.subscribe(move |frame| {
      let outcome = pipeline.process(&frame);
      debug!("帧处理结果: {:?}", outcome);
    });
    let subscription = match subscription {
      Ok(subscription) => subscription,
      Err(e) => {
        detector.close();
        return Err(e.into());
      }
    };

    Ok(Self {
      control,
      detector,
      subscription: Some(subscription),
      output_dir,
      uplink: None,
    })
  }

  /// 附加指挥链路，并报告节点已启动
  pub fn with_uplink(mut self, uplink: Arc<dyn Uplink>) -> Self {
    uplink.send(UplinkMessage::Started {
      info: "info".to_string(),
    });
    self.uplink = Some(uplink);
    self
  }

  pub fn control(&self) -> Arc<ControlState> {
    self.control.clone()
  }

  pub fn dispatcher(&self) -> Dispatcher {
    Dispatcher::new(self.control.clone())
  }

  pub fn detector_state(&self) -> HandleState {
    self.detector.state()
  }

  pub fn output_dir(&self) -> &std::path::Path {
    &self.output_dir
  }

  pub fn stop(mut self) -> Result<(), NodeError> {
    self.shutdown()
  }

  fn shutdown(&mut self) -> Result<(), NodeError> {
    // 先停止投递并等待在途帧，之后才允许关闭检测器
    let unsubscribed = match self.subscription.take() {
      Some(subscription) => subscription.unsubscribe(),
      None => return Ok(()),
    };
    self.detector.close();
    if let Some(uplink) = self.uplink.take() {
      uplink.send(UplinkMessage::Stopped {
        info: "info".to_string(),
      });
    }
    info!("检测节点已停止");
    unsubscribed.map_err(NodeError::from)
  }
}

impl<E: Engine + 'static> Drop for DetectionNode<E> {
  fn drop(&mut self) {
    if let Err(e) = self.shutdown() {
      warn!("停止检测节点失败: {}", e);
    }
  }
}
