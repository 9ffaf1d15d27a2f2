//! 霍夫梯度圆检测
//!
//! 二值图先做高斯平滑, 使边缘梯度方向接近圆的法向. 边缘点沿梯度正反方向
//! 以一个像素为步长在降采样累加器中投票, 取累加器局部极大值作为候选圆心,
//! 再由边缘点距离直方图估计半径.

use image::{GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// 检测参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoughParams {
    /// 累加器分辨率与图像分辨率之比
    pub dp: f64,
    /// 检测到的圆心之间的最小距离 (像素)
    pub min_dist: f64,
    /// 边缘梯度幅值阈值
    pub edge_threshold: f64,
    /// 圆心累加器阈值, 同时作为半径支持度阈值
    pub accumulator_threshold: u32,
    pub min_radius: usize,
    /// 0 表示不限制 (取图像最大边长)
    pub max_radius: usize,
    /// 梯度计算前的高斯平滑标准差, 0 表示不平滑
    pub blur_sigma: f32,
}

impl Default for HoughParams {
    fn default() -> Self {
        Self {
            dp: 2.4,
            min_dist: 100.0,
            edge_threshold: 100.0,
            accumulator_threshold: 100,
            min_radius: 0,
            max_radius: 0,
            blur_sigma: 2.0,
        }
    }
}

/// 检测到的圆, 像素坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoughCircle {
    pub center_row: f64,
    pub center_col: f64,
    pub radius: f64,
    pub votes: u32,
}

struct EdgePoint {
    row: f64,
    col: f64,
    dir_row: f64,
    dir_col: f64,
}

fn to_gray(image: &ArrayView2<u8>) -> GrayImage {
    let (rows, cols) = image.dim();
    GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        Luma([image[[y as usize, x as usize]]])
    })
}

fn sobel_edges(image: &ArrayView2<u8>, params: &HoughParams) -> Vec<EdgePoint> {
    let (rows, cols) = image.dim();
    let mut edges = Vec::new();
    if rows < 3 || cols < 3 {
        return edges;
    }

    let mut gray = to_gray(image);
    if params.blur_sigma > 0.0 {
        gray = gaussian_blur_f32(&gray, params.blur_sigma);
    }
    let gx = horizontal_sobel(&gray);
    let gy = vertical_sobel(&gray);

    for (x, y, dx) in gx.enumerate_pixels() {
        let dx = dx[0] as f64;
        let dy = gy.get_pixel(x, y)[0] as f64;
        let magnitude = dx.hypot(dy);
        if magnitude >= params.edge_threshold && magnitude > 0.0 {
            edges.push(EdgePoint {
                row: y as f64,
                col: x as f64,
                dir_row: dy / magnitude,
                dir_col: dx / magnitude,
            });
        }
    }
    edges
}

/// 像素 `p` 的中心在累加器坐标中位于 `(p + 0.5) / dp`
fn vote(edges: &[EdgePoint], shape: (usize, usize), params: &HoughParams, max_radius: f64) -> Array2<u32> {
    let acc_rows = (shape.0 as f64 / params.dp).ceil() as usize + 1;
    let acc_cols = (shape.1 as f64 / params.dp).ceil() as usize + 1;
    let mut acc = Array2::<u32>::zeros((acc_rows, acc_cols));

    let first_step = params.min_radius.max(1);
    let last_step = max_radius.floor() as usize;

    for edge in edges {
        let ar = (edge.row + 0.5) / params.dp;
        let ac = (edge.col + 0.5) / params.dp;
        let step_row = edge.dir_row / params.dp;
        let step_col = edge.dir_col / params.dp;
        for sign in [1.0, -1.0] {
            for step in first_step..=last_step {
                let k = sign * step as f64;
                let r = ar + k * step_row;
                let c = ac + k * step_col;
                if r < 0.0 || c < 0.0 {
                    break;
                }
                let (ri, ci) = (r as usize, c as usize);
                if ri >= acc_rows || ci >= acc_cols {
                    break;
                }
                acc[[ri, ci]] += 1;
            }
        }
    }
    acc
}

fn local_maxima(acc: &Array2<u32>, threshold: u32) -> Vec<(usize, usize, u32)> {
    let (rows, cols) = acc.dim();
    let mut peaks = Vec::new();
    if rows < 3 || cols < 3 {
        return peaks;
    }
    for i in 1..rows - 1 {
        for j in 1..cols - 1 {
            let v = acc[[i, j]];
            if v > threshold
                && v > acc[[i, j - 1]]
                && v >= acc[[i, j + 1]]
                && v > acc[[i - 1, j]]
                && v >= acc[[i + 1, j]]
            {
                peaks.push((i, j, v));
            }
        }
    }
    peaks.sort_by(|a, b| b.2.cmp(&a.2).then((a.0, a.1).cmp(&(b.0, b.1))));
    peaks
}

/// 3x3 邻域加权质心, 换算回像素中心坐标
fn refine_center(acc: &Array2<u32>, i: usize, j: usize, dp: f64) -> (f64, f64) {
    let (mut sum, mut sr, mut sc) = (0.0, 0.0, 0.0);
    for di in i - 1..=i + 1 {
        for dj in j - 1..=j + 1 {
            let w = acc[[di, dj]] as f64;
            sum += w;
            sr += w * (di as f64 + 0.5);
            sc += w * (dj as f64 + 0.5);
        }
    }
    (sr / sum * dp - 0.5, sc / sum * dp - 0.5)
}

/// 按边缘点到圆心的距离直方图估计半径, 返回 (半径, 支持度)
fn estimate_radius(
    edges: &[EdgePoint],
    center: (f64, f64),
    min_radius: f64,
    max_radius: f64,
) -> Option<(f64, u32)> {
    let bins = max_radius.ceil() as usize + 2;
    let mut histogram = vec![0u32; bins];
    let mut distances = Vec::with_capacity(edges.len());
    for edge in edges {
        let d = (edge.row - center.0).hypot(edge.col - center.1);
        if d < min_radius || d > max_radius {
            continue;
        }
        histogram[d.round() as usize] += 1;
        distances.push(d);
    }

    let mut best: Option<(usize, u32)> = None;
    for r in 1..bins - 1 {
        let support = histogram[r - 1] + histogram[r] + histogram[r + 1];
        if support > 0 && best.map_or(true, |(_, s)| support > s) {
            best = Some((r, support));
        }
    }
    let (bin, support) = best?;

    let window: Vec<f64> = distances
        .into_iter()
        .filter(|d| (d - bin as f64).abs() <= 1.5)
        .collect();
    let radius = window.iter().sum::<f64>() / window.len() as f64;
    Some((radius, support))
}

/// 在二值图像上检测圆, 按累加器票数降序返回
pub fn detect_circles(image: ArrayView2<u8>, params: &HoughParams) -> Vec<HoughCircle> {
    let shape = image.dim();
    if params.dp <= 0.0 {
        return Vec::new();
    }
    let max_radius = if params.max_radius == 0 {
        shape.0.max(shape.1) as f64
    } else {
        params.max_radius as f64
    };
    let min_radius = params.min_radius as f64;

    let edges = sobel_edges(&image, params);
    if edges.is_empty() {
        return Vec::new();
    }

    let acc = vote(&edges, shape, params, max_radius);
    let peaks = local_maxima(&acc, params.accumulator_threshold);
    trace!("霍夫检测: {} 个边缘点, {} 个候选圆心", edges.len(), peaks.len());

    let mut circles: Vec<HoughCircle> = Vec::new();
    for (i, j, votes) in peaks {
        let (row, col) = refine_center(&acc, i, j, params.dp);
        let too_close = circles
            .iter()
            .any(|c| (c.center_row - row).hypot(c.center_col - col) < params.min_dist);
        if too_close {
            continue;
        }

        let Some((radius, support)) = estimate_radius(&edges, (row, col), min_radius, max_radius)
        else {
            continue;
        };
        if support < params.accumulator_threshold {
            continue;
        }

        circles.push(HoughCircle {
            center_row: row,
            center_col: col,
            radius,
            votes,
        });
    }
    circles
}
