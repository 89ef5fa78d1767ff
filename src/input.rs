// 该文件是 Wangyue （望月） 项目的一部分。
// src/input.rs - 帧话题与订阅
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

//! # 进程内帧话题
//!
//! 话题按发布顺序把压缩帧交给唯一的订阅者。每个订阅有一个专用的回调线程，
//! 回调串行执行，前一帧处理完之前不会开始下一帧。等待处理的帧至多
//! [`QUEUE_SIZE`] 个，队列满时新到的帧被丢弃。
//!
//! ```no_run
//! use wangyue::input::topic;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (publisher, stream) = topic("/camera/compressed");
//! let subscription = stream.subscribe(|frame| println!("{} 字节", frame.len()))?;
//! publisher.publish(vec![0xff, 0xd8])?;
//! subscription.unsubscribe()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::frame::Frame;

mod replay;
pub use self::replay::{ReplayPublisher, ReplayPublisherError};

pub const DOCK_CAM_TOPIC: &str = "/mgt/img_sampler/dock_cam/image_record/compressed";

/// 每个话题排队等待处理的最大帧数
pub const QUEUE_SIZE: usize = 10;

// 回调线程检查退订标志的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum TransportError {
  #[error("话题 {0} 已没有订阅者")]
  Closed(String),
  #[error("无法启动回调线程: {0}")]
  SpawnError(#[from] std::io::Error),
  #[error("话题 {0} 的回调线程异常退出")]
  ListenerPanicked(String),
}

/// 创建一个话题，返回发布端和尚未订阅的帧流
pub fn topic(name: &str) -> (Publisher, FrameStream) {
  let name: Arc<str> = Arc::from(name);
  let (tx, rx) = mpsc::sync_channel(QUEUE_SIZE);
  (
    Publisher {
      topic: name.clone(),
      tx,
    },
    FrameStream { topic: name, rx },
  )
}

#[derive(Debug, Clone)]
pub struct Publisher {
  topic: Arc<str>,
  tx: SyncSender<Vec<u8>>,
}

impl Publisher {
  pub fn topic(&self) -> &str {
    &self.topic
  }

  /// 发布一帧；订阅者处理不过来时丢弃该帧，不阻塞发布端
  pub fn publish(&self, data: Vec<u8>) -> Result<(), TransportError> {
    match self.tx.try_send(data) {
      Ok(()) => Ok(()),
      Err(TrySendError::Full(_)) => {
        warn!("话题 {} 的队列已满，丢弃一帧", self.topic);
        Ok(())
      }
      Err(TrySendError::Disconnected(_)) => Err(TransportError::Closed(self.topic.to_string())),
    }
  }
}

pub struct FrameStream {
  topic: Arc<str>,
  rx: Receiver<Vec<u8>>,
}

impl FrameStream {
  pub fn topic(&self) -> &str {
    &self.topic
  }

  /// 在专用线程上为每一帧调用 `listener`
  pub fn subscribe<F>(self, mut listener: F) -> Result<Subscription, TransportError>
  where
    F: FnMut(Frame) + Send + 'static,
  {
    let active = Arc::new(AtomicBool::new(true));
    let FrameStream { topic, rx } = self;

    let worker = {
      let active = active.clone();
      let topic = topic.clone();
      thread::Builder::new()
        .name(format!("subscriber:{}", topic))
        .spawn(move || {
          while active.load(Ordering::Acquire) {
            match rx.recv_timeout(POLL_INTERVAL) {
              Ok(data) => {
                // 退订后不再开始新的帧
                if !active.load(Ordering::Acquire) {
                  break;
                }
                listener(Frame::received(data));
              }
              Err(RecvTimeoutError::Timeout) => continue,
              Err(RecvTimeoutError::Disconnected) => {
                debug!("话题 {} 的发布端已全部关闭", topic);
                break;
              }
            }
          }
          let dropped = rx.try_iter().count();
          if dropped > 0 {
            warn!("退订话题 {}，丢弃 {} 个未处理的帧", topic, dropped);
          }
        })?
    };

    info!("已订阅话题: {}", topic);
    Ok(Subscription {
      topic,
      active,
      worker: Some(worker),
    })
  }
}

/// 活动的订阅；退订会等待正在执行的回调结束
pub struct Subscription {
  topic: Arc<str>,
  active: Arc<AtomicBool>,
  worker: Option<JoinHandle<()>>,
}

impl Subscription {
  pub fn topic(&self) -> &str {
    &self.topic
  }

  /// 回调线程是否仍在接收帧；发布端全部关闭或回调 panic 后为 `false`
  pub fn is_active(&self) -> bool {
    self.active.load(Ordering::Acquire)
      && self
        .worker
        .as_ref()
        .is_some_and(|worker| !worker.is_finished())
  }

  pub fn unsubscribe(mut self) -> Result<(), TransportError> {
    self.shutdown()
  }

  fn shutdown(&mut self) -> Result<(), TransportError> {
    self.active.store(false, Ordering::Release);
    match self.worker.take() {
      Some(worker) => {
        worker
          .join()
          .map_err(|_| TransportError::ListenerPanicked(self.topic.to_string()))?;
        info!("已退订话题: {}", self.topic);
        Ok(())
      }
      None => Ok(()),
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Err(e) = self.shutdown() {
      warn!("退订失败: {}", e);
    }
  }
}
