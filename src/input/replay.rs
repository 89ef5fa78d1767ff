// 该文件是 Wangyue （望月） 项目的一部分。
// src/input/replay.rs - 图像回放发布
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

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::{ImageFormat, ImageReader};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::input::Publisher;
use crate::{FromUrl, FromUrlWithScheme};

const DEFAULT_RATE_HZ: f64 = 5.0;

#[derive(Error, Debug)]
pub enum ReplayPublisherError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image error: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("Invalid rate: {0}")]
  InvalidRate(String),
}

/// 把一张图片编码为单通道 JPEG，并按固定频率反复发布
///
/// 地址形如 `replay:///path/to/dock.png?rate=5`。
pub struct ReplayPublisher {
  jpeg: Vec<u8>,
  period: Duration,
}

impl FromUrlWithScheme for ReplayPublisher {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayPublisher {
  type Error = ReplayPublisherError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayPublisherError::SchemeMismatch);
    }

    let rate = match url.query_pairs().find(|(k, _)| k == "rate") {
      Some((_, v)) => v
        .parse::<f64>()
        .map_err(|_| ReplayPublisherError::InvalidRate(v.to_string()))?,
      None => DEFAULT_RATE_HZ,
    };

    let image = ImageReader::open(url.path())?.decode()?;
    let mut jpeg = Cursor::new(Vec::new());
    image.to_luma8().write_to(&mut jpeg, ImageFormat::Jpeg)?;

    ReplayPublisher::new(jpeg.into_inner(), rate)
  }
}

impl ReplayPublisher {
  pub fn new(jpeg: Vec<u8>, rate: f64) -> Result<Self, ReplayPublisherError> {
    if !rate.is_finite() || rate <= 0.0 {
      return Err(ReplayPublisherError::InvalidRate(rate.to_string()));
    }
    Ok(Self {
      jpeg,
      period: Duration::from_secs_f64(1.0 / rate),
    })
  }

  pub fn period(&self) -> Duration {
    self.period
  }

  /// 在后台线程发布，直到 `stop` 被置位或话题不再有订阅者
  pub fn spawn(
    self,
    publisher: Publisher,
    stop: Arc<AtomicBool>,
  ) -> Result<JoinHandle<()>, ReplayPublisherError> {
    info!(
      "开始回放到话题 {}，间隔 {:.2?}",
      publisher.topic(),
      self.period
    );
    let handle = thread::Builder::new()
      .name("replay".to_string())
      .spawn(move || {
        while !stop.load(Ordering::Acquire) {
          if let Err(e) = publisher.publish(self.jpeg.clone()) {
            error!("回放停止: {}", e);
            break;
          }
          thread::sleep(self.period);
        }
      })?;
    Ok(handle)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::topic;
  use image::{GrayImage, Luma};
  use std::sync::Mutex;

  #[test]
  fn loads_image_as_mono_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dock.png");
    GrayImage::from_pixel(20, 10, Luma([40u8])).save(&path).unwrap();

    let url = Url::parse(&format!("replay://{}?rate=10", path.display())).unwrap();
    let replay = ReplayPublisher::from_url(&url).unwrap();

    assert!((replay.period().as_secs_f64() - 0.1).abs() < 1e-6);
    let decoded = image::load_from_memory(&replay.jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (20, 10));
    assert_eq!(decoded.color(), image::ColorType::L8);
  }

  #[test]
  fn rejects_non_positive_rate() {
    assert!(matches!(
      ReplayPublisher::new(Vec::new(), 0.0),
      Err(ReplayPublisherError::InvalidRate(_))
    ));
  }

  #[test]
  fn publishes_until_stopped() {
    let (publisher, stream) = topic("replay-test");
    let received = Arc::new(Mutex::new(0usize));
    let subscription = {
      let received = received.clone();
      stream
        .subscribe(move |_| *received.lock().unwrap() += 1)
        .unwrap()
    };

    let stop = Arc::new(AtomicBool::new(false));
    let worker = ReplayPublisher::new(vec![1, 2, 3], 200.0)
      .unwrap()
      .spawn(publisher, stop.clone())
      .unwrap();
    while *received.lock().unwrap() < 3 {
      thread::sleep(Duration::from_millis(5));
    }
    stop.store(true, Ordering::Release);
    worker.join().unwrap();
    subscription.unsubscribe().unwrap();
  }
}
