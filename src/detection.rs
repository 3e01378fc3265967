use rand::Rng;
use serde::{Deserialize, Serialize};

// ==========================================
// 1. 检测结果 (DetectionResult)
// ==========================================

/// 判定标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    #[serde(rename = "AI")]
    Ai,
    Real,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Ai => "AI",
            Label::Real => "Real",
        }
    }
}

/// 各模态命中的信号标签，按出现顺序排列。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDetails {
    #[serde(default)]
    pub text_signals: Vec<String>,
    #[serde(default)]
    pub image_signals: Vec<String>,
    #[serde(default)]
    pub video_signals: Vec<String>,
}

/// 一次真伪检测的输出。创建后不可变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub label: Label,

    // 置信度，百分制 [0, 100]
    pub confidence: f64,

    // 疑似生成模型 (仅 AI 判定时给出)
    #[serde(default)]
    pub model_hint: Option<String>,

    pub explanation: String,

    #[serde(default)]
    pub analysis_details: AnalysisDetails,
}

// ==========================================
// 2. 检测请求 (Wire DTO)
// ==========================================

/// 提交方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    Text,
    File,
}

impl SubmissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionKind::Text => "text",
            SubmissionKind::File => "file",
        }
    }
}

/// `POST /api/detect` 的请求体。
///
/// 字段都是 Option，`type` 也按原始字符串收下：缺字段或空串要返回 400，
/// 而不是让反序列化直接失败。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectRequest {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(rename = "fileName", default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl DetectRequest {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: Some(SubmissionKind::Text.as_str().to_string()),
            content: Some(content.into()),
            file_name: None,
        }
    }

    pub fn file(content: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            kind: Some(SubmissionKind::File.as_str().to_string()),
            content: Some(content.into()),
            file_name: Some(file_name.into()),
        }
    }

    /// 类型与内容都必须存在且非空。
    pub fn is_complete(&self) -> bool {
        let present = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.is_empty());
        present(&self.kind) && present(&self.content)
    }

    /// 已知的提交方式；其它取值返回 None (仍然可以检测)。
    pub fn submission_kind(&self) -> Option<SubmissionKind> {
        match self.kind.as_deref() {
            Some("text") => Some(SubmissionKind::Text),
            Some("file") => Some(SubmissionKind::File),
            _ => None,
        }
    }
}

// ==========================================
// 3. 检测器 (占位接口)
// ==========================================

/// 检测器接口。
///
/// 目前没有真实的检测算法，`MockDetector` 只是占位实现，
/// 将来接入模型时替换这里即可，HTTP 层不用动。
pub trait Detector: Send + Sync {
    fn detect(&self, request: &DetectRequest) -> DetectionResult;
}

/// 抛硬币决定标签，置信度落在 70.0 ~ 99.0 之间。
#[derive(Debug, Default, Clone)]
pub struct MockDetector;

impl Detector for MockDetector {
    fn detect(&self, _request: &DetectRequest) -> DetectionResult {
        let mut rng = rand::thread_rng();
        let is_ai = rng.gen_bool(0.5);
        let confidence: f64 = 70.0 + rng.gen::<f64>() * 29.0;
        mock_result(is_ai, (confidence * 10.0).round() / 10.0)
    }
}

/// 按标签拼出固定文案的结果。
pub fn mock_result(is_ai: bool, confidence: f64) -> DetectionResult {
    if is_ai {
        DetectionResult {
            label: Label::Ai,
            confidence,
            model_hint: Some("GPT-4".to_string()),
            explanation: "The content exhibits high perplexity and consistent sentence structures typical of AI models.".to_string(),
            analysis_details: AnalysisDetails {
                text_signals: vec![
                    "low_perplexity".to_string(),
                    "repetitive_structure".to_string(),
                ],
                ..Default::default()
            },
        }
    } else {
        DetectionResult {
            label: Label::Real,
            confidence,
            model_hint: None,
            explanation: "The content shows natural variation and human-like irregularities.".to_string(),
            analysis_details: AnalysisDetails::default(),
        }
    }
}
