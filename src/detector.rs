use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DetectorOptions;
use crate::sample::{FEATURE_DIM, Features, NUM_LANDMARKS};

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("无法启动检测器 {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("与检测器通信失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("检测器返回了无效的 JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("检测器协议错误: {0}")]
    Protocol(String),
    #[error("检测器报告错误: {0}")]
    Remote(String),
    #[error("检测器已退出")]
    Closed,
}

/// RGB 排列的像素数据，行优先，每个像素 3 字节
#[derive(Debug, Clone, PartialEq)]
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }
}

/// 归一化的关键点坐标
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// 一只手的 21 个关键点
#[derive(Debug, Clone, PartialEq)]
pub struct Hand {
    landmarks: [Landmark; NUM_LANDMARKS],
}

impl Hand {
    pub fn new(landmarks: [Landmark; NUM_LANDMARKS]) -> Self {
        Self { landmarks }
    }

    pub fn from_points(points: &[[f32; 3]]) -> Result<Self, DetectorError> {
        if points.len() != NUM_LANDMARKS {
            return Err(DetectorError::Protocol(format!(
                "每只手应有 {} 个关键点，实际为 {}",
                NUM_LANDMARKS,
                points.len()
            )));
        }
        let mut landmarks = [Landmark::default(); NUM_LANDMARKS];
        for (lm, &[x, y, z]) in landmarks.iter_mut().zip(points) {
            *lm = Landmark { x, y, z };
        }
        Ok(Self { landmarks })
    }

    pub fn landmarks(&self) -> &[Landmark; NUM_LANDMARKS] {
        &self.landmarks
    }

    /// 按 x0, y0, z0, x1, ... 的顺序展开
    pub fn flatten(&self) -> Features {
        let mut features = [0.; FEATURE_DIM];
        for (chunk, lm) in features.chunks_exact_mut(3).zip(&self.landmarks) {
            chunk.copy_from_slice(&[lm.x, lm.y, lm.z]);
        }
        features
    }
}

/// 手部关键点检测器
///
/// 每次只处理一张静态图片，最多返回一只手
pub trait LandmarkDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Option<Hand>, DetectorError>;
}

impl<D: LandmarkDetector + ?Sized> LandmarkDetector for &mut D {
    fn detect(&mut self, image: &RgbImage) -> Result<Option<Hand>, DetectorError> {
        (**self).detect(image)
    }
}

#[derive(Serialize)]
struct Request {
    width: u32,
    height: u32,
    max_num_hands: u32,
    min_detection_confidence: f32,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    hands: Vec<Vec<[f32; 3]>>,
    #[serde(default)]
    error: Option<String>,
}

/// 通过子进程调用外部检测器（比如 MediaPipe 的封装脚本）
///
/// 每张图片先发送一行 JSON 头，紧跟 `width * height * 3` 字节的 RGB 数据，
/// 检测器回复一行 JSON：`{"hands": [[[x, y, z], ...], ...]}`
pub struct ProcessDetector {
    child: Arc<Mutex<Child>>,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    min_detection_confidence: f32,
}

impl ProcessDetector {
    pub fn spawn(opts: &DetectorOptions) -> Result<Self, DetectorError> {
        let mut cmd = Command::new(&opts.detector);
        cmd.args(&opts.detector_arg)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        // 子进程放到单独的进程组，Ctrl+C 只由本进程处理
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child =
            cmd.spawn().map_err(|e| DetectorError::Spawn(opts.detector.clone(), e))?;
        let stdin = child.stdin.take().ok_or(DetectorError::Closed)?;
        let stdout = child.stdout.take().ok_or(DetectorError::Closed)?;
        debug!("检测器已启动: {} (pid {})", opts.detector, child.id());

        Ok(Self {
            child: Arc::new(Mutex::new(child)),
            stdin,
            stdout: BufReader::new(stdout),
            min_detection_confidence: opts.min_detection_confidence,
        })
    }

    /// 可以在其它线程结束检测器进程，正在等待的 [`LandmarkDetector::detect`] 会返回错误
    pub fn kill_handle(&self) -> KillHandle {
        KillHandle(self.child.clone())
    }
}

#[derive(Debug, Clone)]
pub struct KillHandle(Arc<Mutex<Child>>);

impl KillHandle {
    pub fn kill(&self) {
        if let Ok(mut child) = self.0.lock() {
            match child.kill() {
                Ok(()) => debug!("已结束检测器进程 (pid {})", child.id()),
                Err(e) => debug!("结束检测器进程失败: {}", e),
            }
        }
    }
}

impl LandmarkDetector for ProcessDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Option<Hand>, DetectorError> {
        let expected = image.width as usize * image.height as usize * 3;
        if image.data.len() != expected {
            return Err(DetectorError::Protocol(format!(
                "像素数据长度应为 {}，实际为 {}",
                expected,
                image.data.len()
            )));
        }

        let request = Request {
            width: image.width,
            height: image.height,
            max_num_hands: 1,
            min_detection_confidence: self.min_detection_confidence,
        };
        serde_json::to_writer(&mut self.stdin, &request)?;
        self.stdin.write_all(b"\n")?;
        self.stdin.write_all(&image.data)?;
        self.stdin.flush()?;

        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(DetectorError::Closed);
        }
        let response: Response = serde_json::from_str(line.trim_end())?;
        if let Some(err) = response.error {
            return Err(DetectorError::Remote(err));
        }

        response.hands.first().map(|points| Hand::from_points(points)).transpose()
    }
}

impl Drop for ProcessDetector {
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
