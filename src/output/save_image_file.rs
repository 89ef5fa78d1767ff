// 该文件是 Wangyue （望月） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;
use tracing::{info, warn};

const FILE_PREFIX: &str = "IMG_";
const FILE_EXTENSION: &str = "jpg";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S%3f";
const DEFAULT_JPEG_QUALITY: u8 = 100;
// 同一毫秒内最多尝试的后缀数
const MAX_NAME_SUFFIX: u32 = 1000;

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("无法为时间戳 {0} 分配文件名")]
  NameExhausted(String),
}

/// 按时间戳命名保存标注图像的目录
///
/// 文件名为 `IMG_<yyyyMMdd_HHmmssSSS>.jpg`。同一毫秒内的第二个文件不会覆盖前一个，
/// 而是依次加上 `_1`、`_2` 等后缀。
#[derive(Debug, Clone)]
pub struct ImageStore {
  directory: PathBuf,
  quality: u8,
}

impl ImageStore {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      quality: DEFAULT_JPEG_QUALITY,
    }
  }

  pub fn with_quality(mut self, quality: u8) -> Self {
    self.quality = quality.clamp(1, 100);
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn file_name(timestamp: &DateTime<Local>) -> String {
    numbered_file_name(&timestamp.format(TIMESTAMP_FORMAT).to_string(), 0)
  }

  pub fn persist(&self, image: &RgbImage) -> Result<PathBuf, SaveImageFileError> {
    self.persist_at(image, &Local::now())
  }

  pub fn persist_at(
    &self,
    image: &RgbImage,
    timestamp: &DateTime<Local>,
  ) -> Result<PathBuf, SaveImageFileError> {
    let (path, file) = self.create_unique(timestamp)?;

    if let Err(e) = self.encode(image, file) {
      // 写了一半的文件没有意义
      if let Err(remove) = std::fs::remove_file(&path) {
        warn!("无法删除不完整的图像文件 {}: {}", path.display(), remove);
      }
      return Err(e);
    }

    info!("图像已保存到: {}", path.display());
    Ok(path)
  }

  fn create_unique(
    &self,
    timestamp: &DateTime<Local>,
  ) -> Result<(PathBuf, File), SaveImageFileError> {
    let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
    for suffix in 0..MAX_NAME_SUFFIX {
      let path = self.directory.join(numbered_file_name(&stamp, suffix));
      match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => return Ok((path, file)),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
        Err(e) => return Err(e.into()),
      }
    }
    Err(SaveImageFileError::NameExhausted(stamp))
  }

  fn encode(&self, image: &RgbImage, file: File) -> Result<(), SaveImageFileError> {
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, self.quality).encode_image(image)?;
    writer.flush()?;
    Ok(())
  }
}

// 序号为 0 时不带后缀
fn numbered_file_name(stamp: &str, suffix: u32) -> String {
  if suffix == 0 {
    format!("{}{}.{}", FILE_PREFIX, stamp, FILE_EXTENSION)
  } else {
    format!("{}{}_{}.{}", FILE_PREFIX, stamp, suffix, FILE_EXTENSION)
  }
}
