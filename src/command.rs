// 该文件是 Wangyue （望月） 项目的一部分。
// src/command.rs - 远程命令与应答
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

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::control::ControlState;

const ACK_TOPIC: &str = "data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  EnableDetection,
  DisableDetection,
  EnableImageSaving,
  DisableImageSaving,
}

impl Command {
  pub fn name(&self) -> &'static str {
    match self {
      Command::EnableDetection => "enable_detection",
      Command::DisableDetection => "disable_detection",
      Command::EnableImageSaving => "enable_image_saving",
      Command::DisableImageSaving => "disable_image_saving",
    }
  }

  fn apply(&self, state: &ControlState) -> &'static str {
    match self {
      Command::EnableDetection => {
        state.set_run_inference(true);
        "Detection ENABLED"
      }
      Command::DisableDetection => {
        state.set_run_inference(false);
        "Detection DISABLED"
      }
      Command::EnableImageSaving => {
        state.set_save_outputs(true);
        "Saving images ENABLED"
      }
      Command::DisableImageSaving => {
        state.set_save_outputs(false);
        "Saving images DISABLED"
      }
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
  #[error("无法解析命令: {0}")]
  Parse(String),
  #[error("未知命令: {0}")]
  Unknown(String),
}

impl CommandError {
  fn reason(&self) -> &'static str {
    match self {
      CommandError::Parse(_) => "Unable to parse command",
      CommandError::Unknown(_) => "Unrecognized command",
    }
  }
}

impl FromStr for Command {
  type Err = CommandError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "enable_detection" => Ok(Command::EnableDetection),
      "disable_detection" => Ok(Command::DisableDetection),
      "enable_image_saving" => Ok(Command::EnableImageSaving),
      "disable_image_saving" => Ok(Command::DisableImageSaving),
      other => Err(CommandError::Unknown(other.to_string())),
    }
  }
}

/// 入站命令：必需的 `name` 与可选参数
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
  pub name: String,
  #[serde(flatten)]
  pub params: Map<String, Value>,
}

impl FromStr for CommandRequest {
  type Err = CommandError;

  fn from_str(payload: &str) -> Result<Self, Self::Err> {
    serde_json::from_str(payload).map_err(|e| CommandError::Parse(e.to_string()))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
  Summary(String),
  Error(CommandError),
}

#[derive(Serialize)]
struct SummaryPayload<'a> {
  #[serde(rename = "Summary")]
  summary: &'a str,
}

impl Response {
  pub fn is_error(&self) -> bool {
    matches!(self, Response::Error(_))
  }

  /// 成功时为 `{"Summary": ...}`，失败时为 `ERROR: <原因>`
  pub fn to_payload(&self) -> String {
    match self {
      Response::Summary(summary) => serde_json::to_string(&SummaryPayload { summary })
        .unwrap_or_else(|e| format!("ERROR: {}", e)),
      Response::Error(e) => format!("ERROR: {}", e.reason()),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
  Json,
  String,
}

/// 发往指挥链路的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UplinkMessage {
  Started {
    info: String,
  },
  Stopped {
    info: String,
  },
  ReceivedCommand {
    info: String,
  },
  Data {
    message_type: MessageType,
    topic: String,
    data: String,
  },
}

pub trait Uplink: Send + Sync {
  fn send(&self, message: UplinkMessage);
}

impl<U: Uplink + ?Sized> Uplink for Arc<U> {
  fn send(&self, message: UplinkMessage) {
    (**self).send(message)
  }
}

/// 把命令映射为开关写入
///
/// 写入是非阻塞的原子操作，不会等待正在处理的帧。
#[derive(Debug, Clone)]
pub struct Dispatcher {
  state: Arc<ControlState>,
}

impl Dispatcher {
  pub fn new(state: Arc<ControlState>) -> Self {
    Self { state }
  }

  pub fn state(&self) -> &ControlState {
    &self.state
  }

  pub fn execute(&self, command: Command) -> Response {
    let summary = command.apply(&self.state);
    info!("执行命令 {}: {}", command.name(), summary);
    Response::Summary(summary.to_string())
  }

  pub fn handle(&self, payload: &str) -> Response {
    let command = payload
      .parse::<CommandRequest>()
      .and_then(|request| request.name.parse::<Command>());

    match command {
      Ok(command) => self.execute(command),
      Err(e) => {
        warn!("拒绝命令: {}", e);
        Response::Error(e)
      }
    }
  }

  /// 处理一条命令并把回执发往指挥链路
  pub fn serve<U: Uplink + ?Sized>(&self, payload: &str, uplink: &U) -> Response {
    uplink.send(UplinkMessage::ReceivedCommand {
      info: "info".to_string(),
    });
    let response = self.handle(payload);
    uplink.send(UplinkMessage::Data {
      message_type: MessageType::Json,
      topic: ACK_TOPIC.to_string(),
      data: response.to_payload(),
    });
    response
  }
}
