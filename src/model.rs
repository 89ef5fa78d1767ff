// 该文件是 Wangyue （望月） 项目的一部分。
// src/model.rs - 模型
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

use image::RgbImage;
use thiserror::Error;
use url::Url;

/// 推理引擎
///
/// 引擎自行负责置信度过滤和结果数量截断，返回的顺序即模型给出的排序。
/// 引擎通常不支持并发调用，因此 `detect` 取 `&mut self`。
pub trait Engine: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  fn detect(&mut self, image: &RgbImage) -> Result<DetectResult, Self::Error>;
}

/// 根据模型地址和选项创建引擎
pub trait EngineLoader {
  type Engine: Engine;

  fn load(&self, model: &Url, options: &DetectorOptions) -> Result<Self::Engine, LoadError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOptions {
  /// 推理线程数提示，后端可以忽略
  pub threads: usize,
  pub score_threshold: f32,
  pub max_results: usize,
}

impl Default for DetectorOptions {
  fn default() -> Self {
    Self {
      threads: 4,
      score_threshold: 0.5,
      max_results: 3,
    }
  }
}

impl DetectorOptions {
  /// 按模型顺序保留达到阈值的结果，最多 `max_results` 个
  pub fn retain(&self, items: impl IntoIterator<Item = DetectItem>) -> DetectResult {
    items
      .into_iter()
      .filter(|item| item.score >= self.score_threshold)
      .take(self.max_results)
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub label: String,
  pub score: f32,
  pub bbox: [f32; 4], // [left, top, right, bottom]，像素坐标
}

impl DetectItem {
  pub fn new(label: impl Into<String>, score: f32, bbox: [f32; 4]) -> Self {
    Self {
      label: label.into(),
      score,
      bbox,
    }
  }

  pub fn center(&self) -> (f32, f32) {
    (
      (self.bbox[0] + self.bbox[2]) / 2.0,
      (self.bbox[1] + self.bbox[3]) / 2.0,
    )
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem> {
    self.items.iter()
  }
}

impl FromIterator<DetectItem> for DetectResult {
  fn from_iter<I: IntoIterator<Item = DetectItem>>(iter: I) -> Self {
    Self {
      items: iter.into_iter().collect(),
    }
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum LoadError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("没有可用的推理后端: {0}")]
  NoBackend(String),
  #[error("检测器已经打开")]
  AlreadyOpen,
  #[error("检测器已经关闭")]
  Closed,
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("检测器不可用")]
  Unavailable,
  #[error("推理错误: {0}")]
  Engine(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("推理引擎 panic: {0}")]
  Panicked(String),
}

/// 未启用任何后端时使用的加载器，拒绝所有模型
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBackend;

/// 不可能被构造的引擎
#[derive(Debug)]
pub enum NoEngine {}

impl Engine for NoEngine {
  type Error = std::convert::Infallible;

  fn detect(&mut self, _image: &RgbImage) -> Result<DetectResult, Self::Error> {
    match *self {}
  }
}

impl EngineLoader for NoBackend {
  type Engine = NoEngine;

  fn load(&self, model: &Url, _options: &DetectorOptions) -> Result<Self::Engine, LoadError> {
    Err(LoadError::NoBackend(format!(
      "未编译支持 '{}' 方案的后端",
      model.scheme()
    )))
  }
}

mod handle;
pub use self::handle::{DetectorHandle, HandleState};

#[cfg(feature = "backend-tract")]
mod onnx;
#[cfg(feature = "backend-tract")]
pub use self::onnx::{OnnxDetector, OnnxError, OnnxLoader};

#[cfg(feature = "backend-tract")]
pub type DefaultLoader = OnnxLoader;
#[cfg(not(feature = "backend-tract"))]
pub type DefaultLoader = NoBackend;
