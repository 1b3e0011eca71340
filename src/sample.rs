use std::collections::HashSet;

/// 每只手的关键点数量
pub const NUM_LANDMARKS: usize = 21;
/// 特征向量长度，21 个关键点 × (x, y, z)
pub const FEATURE_DIM: usize = NUM_LANDMARKS * 3;

pub type Features = [f32; FEATURE_DIM];

/// 一张图片对应的一条带标签的特征
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub label: String,
    pub file_name: String,
    pub features: Features,
}

impl Sample {
    pub fn new(label: impl Into<String>, file_name: impl Into<String>, features: Features) -> Self {
        Self { label: label.into(), file_name: file_name.into(), features }
    }

    /// 未检测到手时特征全为 0
    pub fn is_empty(&self) -> bool {
        self.features.iter().all(|&v| v == 0.)
    }

    pub fn key(&self) -> ProcessedKey {
        ProcessedKey::new(&self.label, &self.file_name)
    }
}

/// 用于判断一张图片是否已经处理过
///
/// 使用文件名而不是目录中的序号，这样目录顺序变化或新增文件都不会影响断点续传
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessedKey {
    pub label: String,
    pub file_name: String,
}

impl ProcessedKey {
    pub fn new(label: &str, file_name: &str) -> Self {
        Self { label: label.to_owned(), file_name: file_name.to_owned() }
    }
}

/// 内存中的全部样本，按添加顺序排列
#[derive(Debug, Default, Clone)]
pub struct Dataset {
    samples: Vec<Sample>,
    processed: HashSet<ProcessedKey>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_samples(samples: Vec<Sample>) -> Self {
        let processed = samples.iter().map(Sample::key).collect();
        Self { samples, processed }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn contains(&self, key: &ProcessedKey) -> bool {
        self.processed.contains(key)
    }

    /// 添加一条样本，如果该图片已经处理过则返回 false
    pub fn push(&mut self, sample: Sample) -> bool {
        if !self.processed.insert(sample.key()) {
            return false;
        }
        self.samples.push(sample);
        true
    }
}
