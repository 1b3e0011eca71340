//! 检查点文件的读写
//!
//! 检查点是一个压缩的 npz 文件，可以直接用 `numpy.load` 打开：
//!
//! | 名称         | 类型 | 形状    | 内容                                   |
//! |--------------|------|---------|----------------------------------------|
//! | `features`   | f32  | (N, 63) | 特征向量                               |
//! | `label`      | u32  | (N,)    | 每条样本的标签在 `labels` 中的下标     |
//! | `labels`     | u8   | (bytes) | 标签名，UTF-8，每个以 NUL 结尾         |
//! | `file_names` | u8   | (bytes) | 每条样本的文件名，UTF-8，每个以 NUL 结尾 |

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::Path;

use log::{info, warn};
use ndarray::{Array1, Array2};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError, WriteNpzError};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::sample::{Dataset, FEATURE_DIM, Sample};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("读写检查点失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("读取 npz 失败: {0}")]
    ReadNpz(#[from] ReadNpzError),
    #[error("写入 npz 失败: {0}")]
    WriteNpz(#[from] WriteNpzError),
    #[error("数组形状错误: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("检查点格式错误: {0}")]
    Malformed(String),
}

/// 加载检查点，任何失败都视为从头开始
///
/// * `resume` 为 false 或文件不存在时返回空数据集
/// * 文件损坏时打印警告并返回空数据集
pub fn load_checkpoint(path: &Path, resume: bool) -> Dataset {
    if !resume || !path.exists() {
        return Dataset::new();
    }
    match read_checkpoint(path) {
        Ok(dataset) => {
            info!("从 {} 恢复了 {} 条样本", path.display(), dataset.len());
            dataset
        }
        Err(e) => {
            warn!("无法读取检查点 {}，将从头开始: {}", path.display(), e);
            Dataset::new()
        }
    }
}

/// 严格读取检查点
pub fn read_checkpoint(path: &Path) -> Result<Dataset, CheckpointError> {
    let file = BufReader::new(File::open(path)?);
    let mut npz = NpzReader::new(file)?;

    let features: Array2<f32> = npz.by_name("features")?;
    let label: Array1<u32> = npz.by_name("label")?;
    let labels: Array1<u8> = npz.by_name("labels")?;
    let file_names: Array1<u8> = npz.by_name("file_names")?;

    let labels = split_strings(&labels.to_vec())?;
    let file_names = split_strings(&file_names.to_vec())?;

    let n = features.nrows();
    if features.ncols() != FEATURE_DIM {
        return Err(CheckpointError::Malformed(format!(
            "特征维度应为 {}，实际为 {}",
            FEATURE_DIM,
            features.ncols()
        )));
    }
    if label.len() != n || file_names.len() != n {
        return Err(CheckpointError::Malformed(format!(
            "样本数量不一致: features={}, label={}, file_names={}",
            n,
            label.len(),
            file_names.len()
        )));
    }

    let mut samples = Vec::with_capacity(n);
    for ((row, &idx), file_name) in features.rows().into_iter().zip(&label).zip(file_names) {
        let label = labels
            .get(idx as usize)
            .ok_or_else(|| CheckpointError::Malformed(format!("标签下标越界: {}", idx)))?;
        let mut values = [0.; FEATURE_DIM];
        for (dst, src) in values.iter_mut().zip(row) {
            *dst = *src;
        }
        samples.push(Sample { label: label.clone(), file_name, features: values });
    }

    Ok(Dataset::from_samples(samples))
}

/// 保存检查点
///
/// 先写入同目录下的临时文件，再重命名覆盖旧文件，写入过程中崩溃不会损坏旧的检查点
pub fn save_checkpoint(path: &Path, dataset: &Dataset) -> Result<(), CheckpointError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let samples = dataset.samples();

    let mut label_ids = HashMap::new();
    let mut labels = vec![];
    let mut label = Vec::with_capacity(samples.len());
    let mut file_names = vec![];
    let mut features = Vec::with_capacity(samples.len() * FEATURE_DIM);

    for sample in samples {
        let next = label_ids.len() as u32;
        let id = *label_ids.entry(sample.label.as_str()).or_insert_with(|| {
            labels.extend_from_slice(sample.label.as_bytes());
            labels.push(0);
            next
        });
        label.push(id);
        file_names.extend_from_slice(sample.file_name.as_bytes());
        file_names.push(0);
        features.extend_from_slice(&sample.features);
    }

    let features = Array2::from_shape_vec((samples.len(), FEATURE_DIM), features)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut npz = NpzWriter::new_compressed(tmp.as_file_mut());
        npz.add_array("features", &features)?;
        npz.add_array("label", &Array1::from(label))?;
        npz.add_array("labels", &Array1::from(labels))?;
        npz.add_array("file_names", &Array1::from(file_names))?;
        npz.finish()?.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

/// 拆分以 NUL 结尾的字符串序列
fn split_strings(bytes: &[u8]) -> Result<Vec<String>, CheckpointError> {
    let Some((&last, body)) = bytes.split_last() else {
        return Ok(vec![]);
    };
    if last != 0 {
        return Err(CheckpointError::Malformed("字符串表缺少结尾的 NUL".to_owned()));
    }
    body.split(|&b| b == 0)
        .map(|s| {
            String::from_utf8(s.to_vec())
                .map_err(|e| CheckpointError::Malformed(format!("无效的 UTF-8: {}", e)))
        })
        .collect()
}
