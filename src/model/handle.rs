// 该文件是 Wangyue （望月） 项目的一部分。
// src/model/handle.rs - 检测器生命周期
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

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use image::RgbImage;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::model::{DetectResult, DetectorOptions, Engine, EngineLoader, InferenceError, LoadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
  Unopened,
  Open,
  Closed,
}

enum Lifecycle<E> {
  Unopened,
  Open(E),
  Closed,
}

/// 持有推理引擎的句柄
///
/// 状态机为 `Unopened -> Open -> Closed`。引擎只在 `Open` 状态可达，
/// `infer` 与 `close` 共用同一把锁，任意时刻至多一个推理在进行，
/// 关闭会等待正在进行的推理结束。句柄被丢弃时引擎随之释放。
pub struct DetectorHandle<E> {
  lifecycle: Mutex<Lifecycle<E>>,
}

impl<E> Default for DetectorHandle<E> {
  fn default() -> Self {
    Self {
      lifecycle: Mutex::new(Lifecycle::Unopened),
    }
  }
}

impl<E: Engine> DetectorHandle<E> {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Lifecycle<E>> {
    // 引擎在推理中 panic 时锁会中毒，状态本身仍然有效
    self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn state(&self) -> HandleState {
    match *self.lock() {
      Lifecycle::Unopened => HandleState::Unopened,
      Lifecycle::Open(_) => HandleState::Open,
      Lifecycle::Closed => HandleState::Closed,
    }
  }

  /// 加载引擎，仅在 `Unopened` 状态下有效；失败时保持 `Unopened`
  pub fn open<L>(&self, loader: &L, model: &Url, options: &DetectorOptions) -> Result<(), LoadError>
  where
    L: EngineLoader<Engine = E>,
  {
    let mut lifecycle = self.lock();
    match *lifecycle {
      Lifecycle::Unopened => {}
      Lifecycle::Open(_) => return Err(LoadError::AlreadyOpen),
      Lifecycle::Closed => return Err(LoadError::Closed),
    }

    info!("加载模型: {}", model);
    let now = Instant::now();
    let engine = loader.load(model, options)?;
    info!("模型加载完成，耗时: {:.2?}", now.elapsed());

    *lifecycle = Lifecycle::Open(engine);
    Ok(())
  }

  pub fn infer(&self, image: &RgbImage) -> Result<DetectResult, InferenceError> {
    let mut lifecycle = self.lock();
    match &mut *lifecycle {
      Lifecycle::Open(engine) => {
        // 引擎的 panic 只影响当前这一帧
        match panic::catch_unwind(AssertUnwindSafe(|| engine.detect(image))) {
          Ok(result) => result.map_err(|e| InferenceError::Engine(Box::new(e))),
          Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("推理引擎 panic: {}", message);
            Err(InferenceError::Panicked(message))
          }
        }
      }
      _ => Err(InferenceError::Unavailable),
    }
  }

  /// 释放引擎，可重复调用；返回本次调用是否真正释放了引擎
  pub fn close(&self) -> bool {
    let mut lifecycle = self.lock();
    match std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
      Lifecycle::Open(engine) => {
        drop(engine);
        info!("检测器已关闭");
        true
      }
      Lifecycle::Unopened => {
        warn!("检测器从未打开，直接标记为关闭");
        false
      }
      Lifecycle::Closed => {
        debug!("检测器已处于关闭状态");
        false
      }
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "未知 panic".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Debug, thiserror::Error)]
  #[error("boom")]
  struct Boom;

  struct CountingEngine {
    released: Arc<AtomicUsize>,
    panics_left: usize,
  }

  impl Engine for CountingEngine {
    type Error = Boom;

    fn detect(&mut self, _image: &RgbImage) -> Result<DetectResult, Boom> {
      if self.panics_left > 0 {
        self.panics_left -= 1;
        panic!("engine crashed");
      }
      Ok(vec![DetectItem::new("panel", 0.9, [0.0, 0.0, 1.0, 1.0])].into())
    }
  }

  impl Drop for CountingEngine {
    fn drop(&mut self) {
      self.released.fetch_add(1, Ordering::SeqCst);
    }
  }

  struct Loader {
    fail: bool,
    panics: usize,
    released: Arc<AtomicUsize>,
  }

  impl EngineLoader for Loader {
    type Engine = CountingEngine;

    fn load(&self, _model: &Url, _options: &DetectorOptions) -> Result<CountingEngine, LoadError> {
      if self.fail {
        return Err(LoadError::ModelInvalid("missing".to_string()));
      }
      Ok(CountingEngine {
        released: self.released.clone(),
        panics_left: self.panics,
      })
    }
  }

  fn model_url() -> Url {
    Url::parse("test:///model").unwrap()
  }

  fn loader(fail: bool) -> (Loader, Arc<AtomicUsize>) {
    let released = Arc::new(AtomicUsize::new(0));
    (
      Loader {
        fail,
        panics: 0,
        released: released.clone(),
      },
      released,
    )
  }

  #[test]
  fn open_infer_close() {
    let (loader, released) = loader(false);
    let handle = DetectorHandle::new();
    handle
      .open(&loader, &model_url(), &DetectorOptions::default())
      .unwrap();
    assert_eq!(handle.state(), HandleState::Open);

    let result = handle.infer(&RgbImage::new(4, 4)).unwrap();
    assert_eq!(result.len(), 1);

    assert!(handle.close());
    assert_eq!(handle.state(), HandleState::Closed);
    assert_eq!(released.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn close_twice_releases_once() {
    let (loader, released) = loader(false);
    let handle = DetectorHandle::new();
    handle
      .open(&loader, &model_url(), &DetectorOptions::default())
      .unwrap();

    assert!(handle.close());
    assert!(!handle.close());
    assert_eq!(released.load(Ordering::SeqCst), 1);
    drop(handle);
    assert_eq!(released.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn failed_open_leaves_handle_unavailable() {
    let (loader, _) = loader(true);
    let handle: DetectorHandle<CountingEngine> = DetectorHandle::new();
    assert!(
      handle
        .open(&loader, &model_url(), &DetectorOptions::default())
        .is_err()
    );
    assert_eq!(handle.state(), HandleState::Unopened);

    for _ in 0..5 {
      assert!(matches!(
        handle.infer(&RgbImage::new(4, 4)),
        Err(InferenceError::Unavailable)
      ));
    }
    assert!(!handle.close());
  }

  #[test]
  fn open_is_refused_once_opened_or_closed() {
    let (loader, released) = loader(false);
    let handle = DetectorHandle::new();
    let options = DetectorOptions::default();
    handle.open(&loader, &model_url(), &options).unwrap();
    assert!(matches!(
      handle.open(&loader, &model_url(), &options),
      Err(LoadError::AlreadyOpen)
    ));
    handle.close();
    assert!(matches!(
      handle.open(&loader, &model_url(), &options),
      Err(LoadError::Closed)
    ));
    assert!(matches!(
      handle.infer(&RgbImage::new(4, 4)),
      Err(InferenceError::Unavailable)
    ));
    assert_eq!(released.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn dropping_open_handle_releases_engine() {
    let (loader, released) = loader(false);
    {
      let handle = DetectorHandle::new();
      handle
        .open(&loader, &model_url(), &DetectorOptions::default())
        .unwrap();
    }
    assert_eq!(released.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn engine_panic_fails_only_that_call() {
    let (loader, released) = loader(false);
    let loader = Loader { panics: 1, ..loader };
    let handle = DetectorHandle::new();
    handle
      .open(&loader, &model_url(), &DetectorOptions::default())
      .unwrap();

    match handle.infer(&RgbImage::new(4, 4)) {
      Err(InferenceError::Panicked(message)) => assert_eq!(message, "engine crashed"),
      other => panic!("unexpected result: {:?}", other.map(|r| r.len())),
    }
    assert_eq!(handle.state(), HandleState::Open);
    assert_eq!(handle.infer(&RgbImage::new(4, 4)).unwrap().len(), 1);

    assert!(handle.close());
    assert_eq!(released.load(Ordering::SeqCst), 1);
  }
}
