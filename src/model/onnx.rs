// 该文件是 Wangyue （望月） 项目的一部分。
// src/model/onnx.rs - 基于 tract 的 ONNX 检测后端
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

//! SSD 风格的 ONNX 检测模型。
//!
//! 模型地址形如 `onnx:///opt/models/dock.onnx?labels=/opt/models/labels.txt&width=320&height=320`。
//! 输入为 NHWC、取值 `[0, 1]` 的 f32 张量；输出依次为
//! 归一化的 `[ymin, xmin, ymax, xmax]` 框 `[1, N, 4]`、类别 `[1, N]` 与得分 `[1, N]`。

use std::collections::HashMap;

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::FromUrlWithScheme;
use crate::model::{DetectItem, DetectResult, DetectorOptions, Engine, EngineLoader, LoadError};

const ONNX_DEFAULT_INPUT_W: u32 = 320;
const ONNX_DEFAULT_INPUT_H: u32 = 320;

#[derive(Error, Debug)]
pub enum OnnxError {
  #[error("tract 错误: {0}")]
  Tract(String),
  #[error("模型输出不符合预期: {0}")]
  Output(String),
}

fn tract_error(e: TractError) -> OnnxError {
  OnnxError::Tract(format!("{e:#}"))
}

pub struct OnnxDetector {
  model: TypedRunnableModel<TypedModel>,
  width: u32,
  height: u32,
  labels: Vec<String>,
  options: DetectorOptions,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxLoader;

impl FromUrlWithScheme for OnnxLoader {
  const SCHEME: &'static str = "onnx";
}

impl crate::FromUrl for OnnxLoader {
  type Error = LoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LoadError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    Ok(OnnxLoader)
  }
}

impl EngineLoader for OnnxLoader {
  type Engine = OnnxDetector;

  fn load(&self, model: &Url, options: &DetectorOptions) -> Result<OnnxDetector, LoadError> {
    use crate::FromUrl;
    Self::from_url(model)?;

    let query: HashMap<String, String> = model
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let width = query
      .get("width")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(ONNX_DEFAULT_INPUT_W);
    let height = query
      .get("height")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(ONNX_DEFAULT_INPUT_H);

    let labels = match query.get("labels") {
      Some(path) => std::fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .map(String::from)
        .collect(),
      None => Vec::new(),
    };

    // tract 自行管理线程，这里只记录提示值
    debug!("线程数提示: {}", options.threads);

    let path = model.path();
    info!("加载 ONNX 模型: {} ({}x{})", path, width, height);
    let model = tract_onnx::onnx()
      .model_for_path(path)
      .and_then(|m| {
        m.with_input_fact(
          0,
          InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, height as usize, width as usize, 3),
          ),
        )
      })
      .and_then(|m| m.into_optimized())
      .and_then(|m| m.into_runnable())
      .map_err(|e| LoadError::ModelInvalid(format!("{e:#}")))?;

    Ok(OnnxDetector {
      model,
      width,
      height,
      labels,
      options: options.clone(),
    })
  }
}

impl OnnxDetector {
  fn build_input(&self, image: &RgbImage) -> Tensor {
    let resized = image::imageops::resize(image, self.width, self.height, FilterType::Triangle);
    tract_ndarray::Array4::from_shape_fn(
      (1, self.height as usize, self.width as usize, 3),
      |(_, y, x, c)| resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
    )
    .into_tensor()
  }

  fn label(&self, class_id: usize) -> String {
    self
      .labels
      .get(class_id)
      .cloned()
      .unwrap_or_else(|| format!("class_{}", class_id))
  }
}

fn flatten(value: &TValue, name: &str) -> Result<Vec<f32>, OnnxError> {
  let view = value
    .to_array_view::<f32>()
    .map_err(|e| OnnxError::Output(format!("{} 不是 f32 张量: {e}", name)))?;
  Ok(view.iter().copied().collect())
}

impl Engine for OnnxDetector {
  type Error = OnnxError;

  fn detect(&mut self, image: &RgbImage) -> Result<DetectResult, Self::Error> {
    let input = self.build_input(image);
    let outputs = self.model.run(tvec!(input.into())).map_err(tract_error)?;
    if outputs.len() < 3 {
      return Err(OnnxError::Output(format!(
        "期望至少 3 个输出，实际 {}",
        outputs.len()
      )));
    }

    let boxes = flatten(&outputs[0], "boxes")?;
    let classes = flatten(&outputs[1], "classes")?;
    let scores = flatten(&outputs[2], "scores")?;
    let count = scores.len().min(classes.len()).min(boxes.len() / 4);

    let (w, h) = (image.width() as f32, image.height() as f32);
    let items = (0..count).map(|i| {
      let b = &boxes[i * 4..i * 4 + 4];
      DetectItem::new(
        self.label(classes[i].max(0.0) as usize),
        scores[i],
        [b[1] * w, b[0] * h, b[3] * w, b[2] * h],
      )
    });

    Ok(self.options.retain(items))
  }
}
