// 该文件是 Wangyue （望月） 项目的一部分。
// src/control.rs - 运行时开关
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

use std::sync::atomic::{AtomicBool, Ordering};

/// 流水线读取、命令写入的两个开关
///
/// 两个开关互相独立，各自是一个原子变量，不存在联合读写。
#[derive(Debug)]
pub struct ControlState {
  run_inference: AtomicBool,
  save_outputs: AtomicBool,
}

impl Default for ControlState {
  fn default() -> Self {
    Self::new(false, true)
  }
}

impl ControlState {
  pub fn new(run_inference: bool, save_outputs: bool) -> Self {
    Self {
      run_inference: AtomicBool::new(run_inference),
      save_outputs: AtomicBool::new(save_outputs),
    }
  }

  /// 分别读取两个开关，不保证联合一致
  pub fn get(&self) -> (bool, bool) {
    (self.run_inference(), self.save_outputs())
  }

  pub fn run_inference(&self) -> bool {
    self.run_inference.load(Ordering::Acquire)
  }

  pub fn save_outputs(&self) -> bool {
    self.save_outputs.load(Ordering::Acquire)
  }

  pub fn set_run_inference(&self, enable: bool) {
    self.run_inference.store(enable, Ordering::Release);
  }

  pub fn set_save_outputs(&self, enable: bool) {
    self.save_outputs.store(enable, Ordering::Release);
  }
}
