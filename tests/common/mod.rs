// 该文件是 Wangyue （望月） 项目的一部分。
// tests/common/mod.rs - 测试用的引擎与上报替身
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

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use image::{GrayImage, ImageFormat, Luma, RgbImage};
use url::Url;
use wangyue::model::{DetectItem, DetectResult, DetectorOptions, Engine, EngineLoader, LoadError};
use wangyue::output::DetectionReport;

#[derive(Debug, thiserror::Error)]
#[error("engine failure")]
pub struct EngineFailure;

#[derive(Default)]
pub struct Counters {
  pub infers: AtomicUsize,
  pub releases: AtomicUsize,
}

/// 固定返回预设检测结果的引擎
pub struct ScriptedEngine {
  items: Vec<DetectItem>,
  fail: bool,
  panics_left: usize,
  counters: Arc<Counters>,
}

impl Engine for ScriptedEngine {
  type Error = EngineFailure;

  fn detect(&mut self, _image: &RgbImage) -> Result<DetectResult, EngineFailure> {
    self.counters.infers.fetch_add(1, Ordering::SeqCst);
    if self.panics_left > 0 {
      self.panics_left -= 1;
      panic!("engine crashed");
    }
    if self.fail {
      return Err(EngineFailure);
    }
    Ok(self.items.clone().into())
  }
}

impl Drop for ScriptedEngine {
  fn drop(&mut self) {
    self.counters.releases.fetch_add(1, Ordering::SeqCst);
  }
}

#[derive(Default)]
pub struct ScriptedLoader {
  pub items: Vec<DetectItem>,
  pub fail_load: bool,
  pub fail_infer: bool,
  /// 前若干次推理直接 panic
  pub panics: usize,
  pub counters: Arc<Counters>,
}

impl ScriptedLoader {
  pub fn returning(items: Vec<DetectItem>) -> Self {
    Self {
      items,
      ..Self::default()
    }
  }

  pub fn infers(&self) -> usize {
    self.counters.infers.load(Ordering::SeqCst)
  }

  pub fn releases(&self) -> usize {
    self.counters.releases.load(Ordering::SeqCst)
  }
}

impl EngineLoader for ScriptedLoader {
  type Engine = ScriptedEngine;

  fn load(&self, _model: &Url, _options: &DetectorOptions) -> Result<ScriptedEngine, LoadError> {
    if self.fail_load {
      return Err(LoadError::ModelInvalid("missing model resource".to_string()));
    }
    Ok(ScriptedEngine {
      items: self.items.clone(),
      fail: self.fail_infer,
      panics_left: self.panics,
      counters: self.counters.clone(),
    })
  }
}

/// 记录每条上报的检测结果
#[derive(Clone, Default)]
pub struct RecordingReport {
  pub lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingReport {
  pub fn lines(&self) -> Vec<String> {
    self.lines.lock().unwrap().clone()
  }
}

impl DetectionReport for RecordingReport {
  fn report(&self, item: &DetectItem) {
    self
      .lines
      .lock()
      .unwrap()
      .push(wangyue::output::describe(item));
  }
}

pub fn model_url() -> Url {
  Url::parse("test:///model.onnx").unwrap()
}

pub fn panel() -> DetectItem {
  DetectItem::new("panel", 0.82, [10.0, 10.0, 50.0, 50.0])
}

/// 单通道 JPEG，与坞站相机发布的格式一致
pub fn mono_jpeg(width: u32, height: u32) -> Vec<u8> {
  let image = GrayImage::from_pixel(width, height, Luma([90u8]));
  let mut bytes = Cursor::new(Vec::new());
  image.write_to(&mut bytes, ImageFormat::Jpeg).unwrap();
  bytes.into_inner()
}

pub fn files_in(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
  let mut files: Vec<_> = std::fs::read_dir(dir)
    .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
    .unwrap_or_default();
  files.sort();
  files
}

pub fn wait_until(mut condition: impl FnMut() -> bool) {
  let deadline = Instant::now() + Duration::from_secs(5);
  while !condition() {
    assert!(Instant::now() < deadline, "timed out waiting for condition");
    thread::sleep(Duration::from_millis(5));
  }
}
