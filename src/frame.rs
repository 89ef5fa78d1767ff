// 该文件是 Wangyue （望月） 项目的一部分。
// src/frame.rs - 压缩帧与帧解码
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

use chrono::{DateTime, Local};
use image::RgbImage;
use thiserror::Error;

/// 传输层送达的一帧压缩图像
///
/// 数据对节点而言是不透明的字节，时间戳在订阅线程收到时生成，不来自消息本身。
#[derive(Debug, Clone)]
pub struct Frame {
  data: Box<[u8]>,
  received_at: DateTime<Local>,
}

impl Frame {
  pub fn received(data: Vec<u8>) -> Self {
    Self {
      data: data.into_boxed_slice(),
      received_at: Local::now(),
    }
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn received_at(&self) -> DateTime<Local> {
    self.received_at
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("空的图像缓冲区")]
  Empty,
  #[error("图像解码错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 将压缩字节解码为 RGB 图像
///
/// 单通道（mono8）输入会被扩展为三通道，保证下游看到的颜色模型固定。
pub fn decode(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
  if bytes.is_empty() {
    return Err(DecodeError::Empty);
  }
  let image = image::load_from_memory(bytes)?;
  Ok(image.to_rgb8())
}
