// 该文件是 Wangyue （望月） 项目的一部分。
// src/task.rs - 节点运行任务
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

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::{thread, time::Duration};

use anyhow::Context;
use tracing::{info, warn};

use crate::command::{Uplink, UplinkMessage};
use crate::input::{FrameStream, Publisher, ReplayPublisher};
use crate::model::EngineLoader;
use crate::node::{DetectionNode, NodeConfig};
use crate::output::TracingReport;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 把指挥链路消息逐行以 JSON 写到标准输出
#[derive(Debug, Default)]
pub struct StdoutUplink;

impl Uplink for StdoutUplink {
  fn send(&self, message: UplinkMessage) {
    match serde_json::to_string(&message) {
      Ok(line) => {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", line).and_then(|_| stdout.flush()) {
          warn!("写出指挥链路消息失败: {}", e);
        }
      }
      Err(e) => warn!("序列化指挥链路消息失败: {}", e),
    }
  }
}

enum TaskEvent {
  Command(String),
  Interrupt,
}

/// 持续运行节点：标准输入的每一行是一条命令，Ctrl-C 触发有序停止
pub struct ContinuousTask {
  config: NodeConfig,
  replay: Option<ReplayPublisher>,
}

impl ContinuousTask {
  pub fn new(config: NodeConfig) -> Self {
    Self {
      config,
      replay: None,
    }
  }

  pub fn with_replay(mut self, replay: Option<ReplayPublisher>) -> Self {
    self.replay = replay;
    self
  }
}

fn spawn_command_reader(tx: mpsc::Sender<TaskEvent>) -> std::io::Result<()> {
  thread::Builder::new()
    .name("commands".to_string())
    .spawn(move || {
      for line in std::io::stdin().lock().lines() {
        match line {
          Ok(line) if line.trim().is_empty() => continue,
          Ok(line) => {
            if tx.send(TaskEvent::Command(line)).is_err() {
              break;
            }
          }
          Err(e) => {
            warn!("读取命令失败: {}", e);
            break;
          }
        }
      }
      info!("命令输入已关闭");
    })?;
  Ok(())
}

impl<L, U> Task<(Publisher, FrameStream), L, Arc<U>> for ContinuousTask
where
  L: EngineLoader,
  L::Engine: 'static,
  U: Uplink + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    (publisher, stream): (Publisher, FrameStream),
    loader: L,
    uplink: Arc<U>,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = mpsc::channel();

    {
      let tx = tx.clone();
      ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        let _ = tx.send(TaskEvent::Interrupt);
        thread::spawn(|| {
          thread::sleep(SHUTDOWN_GRACE);
          warn!("强制退出程序");
          std::process::exit(1);
        });
      })
      .context("无法设置 Ctrl-C 处理函数")?;
    }
    spawn_command_reader(tx).context("无法启动命令读取线程")?;

    let node = DetectionNode::start(&self.config, &loader, stream, TracingReport)
      .context("检测节点启动失败")?
      .with_uplink(uplink.clone());
    let dispatcher = node.dispatcher();

    let stop = Arc::new(AtomicBool::new(false));
    // 没有回放时保留发布端，话题在任务结束前保持存活
    let (replay, _idle_publisher) = match self.replay {
      Some(replay) => (
        Some(
          replay
            .spawn(publisher, stop.clone())
            .context("无法启动回放线程")?,
        ),
        None,
      ),
      None => (None, Some(publisher)),
    };

    while let Ok(event) = rx.recv() {
      match event {
        TaskEvent::Command(payload) => {
          dispatcher.serve(&payload, &*uplink);
        }
        TaskEvent::Interrupt => {
          warn!("中断信号接收，退出任务循环");
          break;
        }
      }
    }

    stop.store(true, Ordering::Release);
    node.stop().context("检测节点停止失败")?;
    if let Some(replay) = replay
      && replay.join().is_err()
    {
      warn!("回放线程异常退出");
    }

    info!("任务完成，退出");
    Ok(())
  }
}
