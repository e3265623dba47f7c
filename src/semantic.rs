use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::model::{CandidateQuestion, OptionLabel};
use crate::util::sha256_hex;

pub const DEFAULT_MODEL_ID: &str = "local-hash-1024-v1";
pub const DEFAULT_MODEL_NAME: &str = "local-token-bigram-hash";
pub const DEFAULT_EMBEDDING_DIM: usize = 1024;
pub const DEFAULT_NORMALIZATION: &str = "l2";
pub const DEFAULT_BACKEND: &str = "local-hash-v1";
pub const ENCODER_SERVICE: &str = "encoder";

/// Separator between the question text and each option in the embedding payload.
pub const QUESTION_PAYLOAD_SEPARATOR: &str = "\n";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticModelConfig {
    pub model_id: String,
    pub model_name: String,
    pub dimensions: usize,
    pub normalization: String,
    pub backend: String,
}

pub fn resolve_model_config(model_id: &str) -> SemanticModelConfig {
    let trimmed = model_id.trim();
    let resolved_id = if trimmed.is_empty() {
        DEFAULT_MODEL_ID
    } else {
        trimmed
    };

    let model_name = if resolved_id == DEFAULT_MODEL_ID {
        DEFAULT_MODEL_NAME
    } else {
        resolved_id
    };

    SemanticModelConfig {
        model_id: resolved_id.to_string(),
        model_name: model_name.to_string(),
        dimensions: DEFAULT_EMBEDDING_DIM,
        normalization: DEFAULT_NORMALIZATION.to_string(),
        backend: DEFAULT_BACKEND.to_string(),
    }
}

/// Text-to-vector collaborator. Every vector an encoder returns has `dimensions()` entries.
pub trait Encoder: Send + Sync {
    fn model(&self) -> &SemanticModelConfig;

    fn encode(&self, text: &str) -> Result<Vec<f32>, ServiceError>;

    fn dimensions(&self) -> usize {
        self.model().dimensions
    }

    /// `encode`, rejecting a vector whose length is not `dimensions()`.
    fn encode_checked(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let vector = self.encode(text)?;
        if vector.len() != self.dimensions() {
            return Err(ServiceError::new(
                ENCODER_SERVICE,
                format!(
                    "model {} returned {} dimensions, expected {}",
                    self.model().model_id,
                    vector.len(),
                    self.dimensions()
                ),
            ));
        }
        Ok(vector)
    }
}

#[derive(Debug, Clone)]
pub struct LocalHashEncoder {
    model: SemanticModelConfig,
}

impl LocalHashEncoder {
    pub fn new(model: SemanticModelConfig) -> Self {
        Self { model }
    }
}

impl Default for LocalHashEncoder {
    fn default() -> Self {
        Self::new(resolve_model_config(DEFAULT_MODEL_ID))
    }
}

impl Encoder for LocalHashEncoder {
    fn model(&self) -> &SemanticModelConfig {
        &self.model
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        Ok(embed_text_local(text, self.model.dimensions))
    }
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Question text followed by every option in A→E order.
///
/// Options are part of the payload so that two questions probing the same
/// answer space land near each other even when their stems are worded
/// differently. Returns `None` for questions that are missing any option.
pub fn question_payload_for_embedding(question: &CandidateQuestion) -> Option<String> {
    let question_text = normalize_whitespace(question.question_text());
    if question_text.is_empty() {
        return None;
    }

    let mut parts = Vec::<String>::with_capacity(OptionLabel::ALL.len() + 1);
    parts.push(question_text);
    for label in OptionLabel::ALL {
        let option = normalize_whitespace(question.option_text(label)?);
        parts.push(format!("{label}. {option}"));
    }

    Some(parts.join(QUESTION_PAYLOAD_SEPARATOR))
}

pub fn legal_payload_for_embedding(content: &str) -> Option<String> {
    let normalized = normalize_whitespace(content);
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

pub fn embedding_text_hash(payload: &str) -> String {
    sha256_hex(payload)
}

pub fn embed_text_local(payload: &str, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(8);
    let mut vector = vec![0_f32; dims];
    let tokens = tokenize_payload(payload);

    for token in tokens {
        let hash = stable_hash(&token);
        let index = (hash as usize) % dims;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += sign * weight;
    }

    normalize_vector(&mut vector);
    vector
}

/// Cosine similarity; vectors of unequal length score zero.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut left_norm = 0.0_f64;
    let mut right_norm = 0.0_f64;
    for (left_value, right_value) in left.iter().zip(right.iter()) {
        let (l, r) = (f64::from(*left_value), f64::from(*right_value));
        dot += l * r;
        left_norm += l * l;
        right_norm += r * r;
    }

    if left_norm <= 0.0 || right_norm <= 0.0 {
        return 0.0;
    }

    dot / (left_norm.sqrt() * right_norm.sqrt())
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f32>> {
    if expected_dim == 0 || blob.len() != expected_dim.saturating_mul(4) {
        return None;
    }

    let out = blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect::<Vec<f32>>();

    (out.len() == expected_dim).then_some(out)
}

/// Lowercased alphanumeric words of at least three characters, deduplicated.
pub fn signal_tokens(text: &str) -> Vec<String> {
    const STOPWORDS: &[&str] = &[
        "and", "are", "for", "from", "its", "not", "the", "this", "that", "was", "which", "with",
    ];

    let mut tokens = text
        .to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| token.chars().count() >= 3)
        .filter(|token| STOPWORDS.iter().all(|stopword| stopword != token))
        .map(str::to_string)
        .collect::<Vec<String>>();
    tokens.sort();
    tokens.dedup();
    tokens
}

/// Fraction of query tokens present in the haystack.
pub fn token_overlap_score(query_tokens: &[String], haystack: &str) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }

    let haystack = haystack.to_lowercase();
    let overlap = query_tokens
        .iter()
        .filter(|token| haystack.contains(token.as_str()))
        .count();
    overlap as f64 / query_tokens.len() as f64
}

fn stable_hash(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn tokenize_payload(payload: &str) -> Vec<String> {
    let words = payload
        .split_whitespace()
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>();

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

fn normalize_vector(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    for value in values {
        *value /= norm;
    }
}
