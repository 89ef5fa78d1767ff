// 该文件是 Wangyue （望月） 项目的一部分。
// src/pipeline.rs - 逐帧检测流水线
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

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::control::ControlState;
use crate::frame::{Frame, decode};
use crate::model::{DetectorHandle, Engine, InferenceError};
use crate::output::draw::Draw;
use crate::output::{DetectionReport, ImageStore, TracingReport};

const DEFAULT_SLOW_INFERENCE: Duration = Duration::from_secs(2);

/// 一帧处理结束时所处的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
  /// 检测关闭，未做任何处理
  Disabled,
  DecodeFailed,
  InferenceFailed,
  LoggedOnly {
    detections: usize,
  },
  Annotated {
    detections: usize,
    boxes: usize,
    saved: Option<PathBuf>,
  },
}

impl FrameOutcome {
  pub fn is_skipped(&self) -> bool {
    matches!(
      self,
      FrameOutcome::Disabled | FrameOutcome::DecodeFailed | FrameOutcome::InferenceFailed
    )
  }
}

pub struct DetectionPipeline<E, R = TracingReport> {
  control: Arc<ControlState>,
  detector: Arc<DetectorHandle<E>>,
  store: ImageStore,
  draw: Draw,
  report: R,
  slow_inference: Duration,
}

impl<E: Engine> DetectionPipeline<E> {
  pub fn new(
    control: Arc<ControlState>,
    detector: Arc<DetectorHandle<E>>,
    store: ImageStore,
  ) -> Self {
    Self {
      control,
      detector,
      store,
      draw: Draw::default(),
      report: TracingReport,
      slow_inference: DEFAULT_SLOW_INFERENCE,
    }
  }
}

impl<E: Engine, R: DetectionReport> DetectionPipeline<E, R> {
  pub fn with_report<R2: DetectionReport>(self, report: R2) -> DetectionPipeline<E, R2> {
    DetectionPipeline {
      control: self.control,
      detector: self.detector,
      store: self.store,
      draw: self.draw,
      report,
      slow_inference: self.slow_inference,
    }
  }

  /// 处理一帧；所有错误都在帧内消化并记录日志
  pub fn process(&self, frame: &Frame) -> FrameOutcome {
    // 每个开关在一帧内只读一次
    if !self.control.run_inference() {
      return FrameOutcome::Disabled;
    }

    let image = match decode(frame.data()) {
      Ok(image) => image,
      Err(e) => {
        error!("帧解码失败（{} 字节）: {}", frame.len(), e);
        return FrameOutcome::DecodeFailed;
      }
    };

    let now = Instant::now();
    let result = match self.detector.infer(&image) {
      Ok(result) => result,
      Err(InferenceError::Unavailable) => {
        warn!("检测器不可用，跳过该帧");
        return FrameOutcome::InferenceFailed;
      }
      Err(e) => {
        error!("推理失败: {}", e);
        return FrameOutcome::InferenceFailed;
      }
    };
    let elapsed = now.elapsed();
    if elapsed > self.slow_inference {
      warn!("推理耗时过长: {:.2?}", elapsed);
    } else {
      debug!("推理完成，耗时: {:.2?}", elapsed);
    }

    let save_outputs = self.control.save_outputs();

    for item in result.iter() {
      self.report.report(item);
    }

    if !save_outputs {
      return FrameOutcome::LoggedOnly {
        detections: result.len(),
      };
    }

    let (annotated, boxes) = self.draw.draw_detection(&image, &result);
    let saved = match self.store.persist(&annotated) {
      Ok(path) => Some(path),
      Err(e) => {
        error!("保存标注图像失败: {}", e);
        None
      }
    };

    debug!(
      "帧处理完成，距接收 {} ms",
      (chrono::Local::now() - frame.received_at()).num_milliseconds()
    );

    FrameOutcome::Annotated {
      detections: result.len(),
      boxes,
      saved,
    }
  }
}
