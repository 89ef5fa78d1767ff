// 该文件是 Wangyue （望月） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::model::{DetectItem, DetectResult};

const BOX_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const BOX_THICKNESS: i32 = 3;

pub struct Draw {
  color: [u8; 3],
  thickness: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      color: BOX_COLOR,
      thickness: BOX_THICKNESS,
    }
  }
}

impl Draw {
  // 边框以 bbox 边线为中心加粗；宽或高为零的框画成线段。返回是否画出了边框
  fn draw_bbox(&self, image: &mut RgbImage, item: &DetectItem) -> bool {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return false;
    }

    let x_min = (item.bbox[0].round() as i32).clamp(0, w - 1);
    let y_min = (item.bbox[1].round() as i32).clamp(0, h - 1);
    let x_max = (item.bbox[2].round() as i32).clamp(0, w - 1);
    let y_max = (item.bbox[3].round() as i32).clamp(0, h - 1);

    if x_min > x_max || y_min > y_max {
      return false;
    }

    let half = self.thickness / 2;
    for offset in -half..(self.thickness - half) {
      let width = (x_max - x_min + 1 - 2 * offset).max(1);
      let height = (y_max - y_min + 1 - 2 * offset).max(1);
      let rect = Rect::at(x_min + offset, y_min + offset).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, Rgb(self.color));
    }
    true
  }

  /// 在图像上绘制所有检测框，返回画出的框数
  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult) -> usize {
    result
      .iter()
      .filter(|item| self.draw_bbox(image, item))
      .count()
  }

  /// 在图像副本上绘制检测框，原图保持不变
  pub fn draw_detection(&self, image: &RgbImage, result: &DetectResult) -> (RgbImage, usize) {
    let mut canvas = image.clone();
    let drawn = self.draw_detections_on_image(&mut canvas, result);
    (canvas, drawn)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const RED: Rgb<u8> = Rgb([255, 0, 0]);

  fn gray(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([128, 128, 128]))
  }

  #[test]
  fn draws_red_rectangle_on_copy() {
    let image = gray(64, 64);
    let result: DetectResult = vec![DetectItem::new("panel", 0.82, [10.0, 10.0, 50.0, 50.0])].into();

    let (annotated, drawn) = Draw::default().draw_detection(&image, &result);

    assert_eq!(drawn, 1);
    assert_eq!(*annotated.get_pixel(10, 10), RED);
    assert_eq!(*annotated.get_pixel(50, 50), RED);
    assert_eq!(*annotated.get_pixel(10, 30), RED);
    assert_eq!(*annotated.get_pixel(50, 30), RED);
    assert_eq!(*annotated.get_pixel(30, 10), RED);
    // 三像素粗的边框向内外各扩一像素
    assert_eq!(*annotated.get_pixel(9, 30), RED);
    assert_eq!(*annotated.get_pixel(11, 30), RED);
    assert_ne!(*annotated.get_pixel(12, 30), RED);
    assert_ne!(*annotated.get_pixel(30, 30), RED);

    // 原图不被修改
    assert!(image.pixels().all(|p| *p == Rgb([128, 128, 128])));
  }

  #[test]
  fn counts_every_box() {
    let image = gray(100, 100);
    let result: DetectResult = vec![
      DetectItem::new("a", 0.9, [5.0, 5.0, 20.0, 20.0]),
      DetectItem::new("b", 0.8, [30.0, 30.0, 90.0, 70.0]),
      DetectItem::new("c", 0.7, [60.0, 10.0, 95.0, 25.0]),
    ]
    .into();
    let (_, drawn) = Draw::default().draw_detection(&image, &result);
    assert_eq!(drawn, result.len());
  }

  #[test]
  fn clamps_boxes_to_image() {
    let image = gray(32, 32);
    let result: DetectResult =
      vec![DetectItem::new("partly-out", 0.9, [-10.0, -10.0, 20.0, 20.0])].into();
    let (annotated, drawn) = Draw::default().draw_detection(&image, &result);
    assert_eq!(drawn, 1);
    assert_eq!(*annotated.get_pixel(0, 10), RED);
    assert_eq!(*annotated.get_pixel(20, 10), RED);
  }

  #[test]
  fn zero_width_and_zero_height_boxes_are_drawn_as_lines() {
    let image = gray(64, 64);
    let result: DetectResult = vec![
      DetectItem::new("vertical", 0.9, [20.0, 10.0, 20.0, 40.0]),
      DetectItem::new("horizontal", 0.9, [30.0, 50.0, 60.0, 50.0]),
      DetectItem::new("panel", 0.9, [10.0, 10.0, 50.0, 50.0]),
    ]
    .into();
    let (annotated, drawn) = Draw::default().draw_detection(&image, &result);
    assert_eq!(drawn, result.len());
    for x in 19..=21 {
      assert_eq!(*annotated.get_pixel(x, 25), RED);
    }
    assert_ne!(*annotated.get_pixel(23, 25), RED);
    for y in 49..=51 {
      assert_eq!(*annotated.get_pixel(55, y), RED);
    }
  }
}
