use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use indicatif::ProgressBar;
use log::{debug, info, warn};

use crate::checkpoint::save_checkpoint;
use crate::detector::{DetectorError, LandmarkDetector};
use crate::sample::{Dataset, FEATURE_DIM, Features, ProcessedKey, Sample};
use crate::scan::InputTree;
use crate::utils;

/// 提取一张图片的特征
///
/// 图片无法读取或解码时返回 `Ok(None)`，未检测到手时返回全 0 向量
pub fn extract_one<D>(detector: &mut D, path: &Path) -> Result<Option<Features>, DetectorError>
where
    D: LandmarkDetector + ?Sized,
{
    let image = match utils::imread_rgb(path) {
        Ok(Some(image)) => image,
        Ok(None) => return Ok(None),
        Err(e) => {
            debug!("无法解码图片 {}: {}", path.display(), e);
            return Ok(None);
        }
    };
    let features = match detector.detect(&image)? {
        Some(hand) => hand.flatten(),
        None => [0.; FEATURE_DIM],
    };
    Ok(Some(features))
}

/// 协作式的取消标记，在两张图片之间检查
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// 本次新增的样本
    pub added: usize,
    /// 其中未检测到手的样本
    pub no_hand: usize,
    /// 无法读取的图片
    pub unreadable: usize,
    /// 之前已经处理过的图片
    pub already_processed: usize,
    /// 与已有样本 key 冲突而被忽略的图片
    pub duplicated: usize,
}

impl RunReport {
    fn new() -> Self {
        Self {
            outcome: RunOutcome::Completed,
            added: 0,
            no_hand: 0,
            unreadable: 0,
            already_processed: 0,
            duplicated: 0,
        }
    }
}

/// 可断点续传的批量特征提取
pub struct Extractor<D> {
    detector: D,
    checkpoint: PathBuf,
    checkpoint_every: usize,
    cancel: CancelFlag,
    pb: ProgressBar,
}

impl<D: LandmarkDetector> Extractor<D> {
    pub fn new(detector: D, checkpoint: impl Into<PathBuf>, cancel: CancelFlag) -> Self {
        Self {
            detector,
            checkpoint: checkpoint.into(),
            checkpoint_every: 0,
            cancel,
            pb: ProgressBar::hidden(),
        }
    }

    /// 每新增多少条样本保存一次检查点，0 表示只在结束和中断时保存
    ///
    /// 每次保存都会重新压缩并写入全部样本，耗时随数据集大小线性增长。
    /// 数据集很大（几十万张图片）时应相应调大这个值
    pub fn checkpoint_every(mut self, n: usize) -> Self {
        self.checkpoint_every = n;
        self
    }

    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    /// 处理 `tree` 中所有尚未出现在 `dataset` 里的图片
    ///
    /// 结束时写入检查点。如果收到取消信号，会在当前图片处理完后保存并返回
    /// [`RunOutcome::Interrupted`]
    pub fn run(&mut self, tree: &InputTree, dataset: &mut Dataset) -> Result<RunReport> {
        let total = tree.count_files()?;
        info!("共 {} 张图片，已有 {} 条样本", total, dataset.len());

        self.pb.set_length(total as u64);
        self.pb.set_position(0);

        let mut report = RunReport::new();
        let mut unsaved = 0;

        for label in tree.labels() {
            let label = label?;
            let files = tree.files(&label)?;
            let nfiles = files.len();

            for (idx, file) in files.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    return self.interrupt(dataset, report);
                }

                let key = ProcessedKey::new(&label.label, &file.name);
                if dataset.contains(&key) {
                    report.already_processed += 1;
                    self.pb.inc(1);
                    continue;
                }

                let features = match extract_one(&mut self.detector, &file.path) {
                    Ok(features) => features,
                    // 子进程可能和本进程一起收到了中断信号
                    Err(e) if self.cancel.is_cancelled() => {
                        warn!("检测 {} 时被中断: {}", file.path.display(), e);
                        return self.interrupt(dataset, report);
                    }
                    Err(e) => return Err(e.into()),
                };

                self.pb.inc(1);
                self.pb.set_message(format!(
                    "{} {}/{} ({:.2}%)",
                    label.label,
                    idx + 1,
                    nfiles,
                    (idx + 1) as f64 / nfiles as f64 * 100.
                ));

                let Some(features) = features else {
                    debug!("跳过无法读取的图片: {}", file.path.display());
                    report.unreadable += 1;
                    continue;
                };

                let sample = Sample::new(&label.label, &file.name, features);
                let no_hand = sample.is_empty();
                if !dataset.push(sample) {
                    // 不同的非 UTF-8 文件名可能得到相同的 key
                    warn!("重复的样本 {}/{}，已忽略: {}", label.label, file.name, file.path.display());
                    report.duplicated += 1;
                    continue;
                }
                if no_hand {
                    report.no_hand += 1;
                }
                report.added += 1;
                unsaved += 1;

                if self.checkpoint_every != 0 && unsaved >= self.checkpoint_every {
                    save_checkpoint(&self.checkpoint, dataset)?;
                    debug!("已保存检查点: {} 条样本", dataset.len());
                    unsaved = 0;
                }
            }
        }

        save_checkpoint(&self.checkpoint, dataset)?;
        info!("已保存 {} 条样本 → {}", dataset.len(), self.checkpoint.display());
        Ok(report)
    }

    fn interrupt(&self, dataset: &Dataset, mut report: RunReport) -> Result<RunReport> {
        self.pb.println("正在暂停，保存当前进度...");
        save_checkpoint(&self.checkpoint, dataset)?;
        info!("已保存 {} 条样本 → {}", dataset.len(), self.checkpoint.display());
        report.outcome = RunOutcome::Interrupted;
        Ok(report)
    }
}
