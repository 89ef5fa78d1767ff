// 该文件是 Wangyue （望月） 项目的一部分。
// src/output.rs - 输出定义
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

use tracing::info;

use crate::model::DetectItem;

pub mod draw;

mod save_image_file;
pub use self::save_image_file::{ImageStore, SaveImageFileError};

/// 单条检测结果的上报
///
/// 流水线对每个检测结果按模型顺序调用一次 `report`。
pub trait DetectionReport: Send {
  fn report(&self, item: &DetectItem);
}

/// 检测结果的文本形式：标签、得分和框中心
pub fn describe(item: &DetectItem) -> String {
  let (cx, cy) = item.center();
  format!("{} [{:.2}]: {:.1}, {:.1}", item.label, item.score, cx, cy)
}

/// 以日志形式上报检测结果
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReport;

impl DetectionReport for TracingReport {
  fn report(&self, item: &DetectItem) {
    let (cx, cy) = item.center();
    info!(
      label = %item.label,
      score = item.score,
      center_x = cx,
      center_y = cy,
      "检测到: {}",
      describe(item)
    );
  }
}
