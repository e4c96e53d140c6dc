//! Config based size estimator
//!
//! Estimates the parameter count of a hub model from its `config.json`. Models
//! whose architecture cannot be read from the config fall back to the
//! parameter total the hub reports for safetensors weights.

use async_trait::async_trait;
use serde_json::Value;

use crate::oracle::SizeOracle;
use crate::storage::hub::{build_client, HUB_URL};
use crate::types::size::SizeResult;

/// Model types whose MLP has gate, up and down projections
const GATED_MLP_MODEL_TYPES: &[&str] = &[
    "llama", "mistral", "mixtral", "qwen2", "qwen2_moe", "qwen3", "gemma", "gemma2", "phi3",
    "olmo", "cohere", "deepseek", "yi", "internlm2",
];

pub struct HubConfigEstimator {
    client: reqwest::Client,
    base_url: String,
}

impl HubConfigEstimator {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client()?,
            base_url: HUB_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Fetch `config.json`; `None` when the repo has no such file
    async fn fetch_config(&self, model_id: &str) -> Result<Option<Value>, String> {
        let url = format!("{}/{}/resolve/main/config.json", self.base_url, model_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("Failed to fetch config: {}", e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(format!("Config request failed with status: {}", status));
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| format!("Failed to parse config: {}", e))
    }

    /// Parameter total reported by the hub for safetensors weights
    async fn fetch_weight_total(&self, model_id: &str) -> Result<Option<u64>, String> {
        let url = format!(
            "{}/api/models/{}?expand%5B%5D=safetensors",
            self.base_url, model_id
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("Failed to fetch model info: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("API error: {}", response.status()));
        }

        let info: Value = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse model info: {}", e))?;
        Ok(info["safetensors"]["total"].as_u64())
    }
}

#[async_trait]
impl SizeOracle for HubConfigEstimator {
    async fn estimate(&self, model_id: &str, allow_fallback: bool) -> SizeResult {
        let config = match self.fetch_config(model_id).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                return SizeResult::unsupported(
                    model_id,
                    format!("{} does not appear to have a file named config.json", model_id),
                )
            }
            Err(e) => return SizeResult::unsupported(model_id, e),
        };

        if let Some(params) = estimate_parameters(&config) {
            return SizeResult::ok(model_id, params as f64 / 1e9);
        }

        if !allow_fallback {
            return SizeResult::needs_weights(model_id, None);
        }

        tracing::info!("Calculating the size of {} from its weights", model_id);
        match self.fetch_weight_total(model_id).await {
            Ok(Some(total)) => SizeResult::ok(model_id, total as f64 / 1e9),
            Ok(None) => SizeResult::unsupported(model_id, "no safetensors weights to count"),
            Err(e) => SizeResult::unsupported(model_id, e),
        }
    }
}

fn field(config: &Value, names: &[&str]) -> Option<u64> {
    names.iter().find_map(|name| config.get(*name).and_then(Value::as_u64))
}

/// Estimate the parameter count of a decoder-only transformer config
///
/// Counts embeddings, attention (with grouped KV heads), MLP (gated or not,
/// times the number of experts) and norms. Biases are ignored. Returns `None`
/// when the config does not describe such a model.
pub fn estimate_parameters(config: &Value) -> Option<u64> {
    if config.get("is_encoder_decoder").and_then(Value::as_bool) == Some(true) {
        return None;
    }
    if field(config, &["hidden_size", "n_embd", "d_model"]).is_none() {
        // Multimodal configs nest the language model
        return config.get("text_config").and_then(estimate_parameters);
    }

    let hidden = field(config, &["hidden_size", "n_embd", "d_model"])?;
    let layers = field(config, &["num_hidden_layers", "n_layer", "num_layers"])?;
    let vocab = field(config, &["vocab_size"])?;
    let heads = field(config, &["num_attention_heads", "n_head", "num_heads"])?;
    if heads == 0 {
        return None;
    }
    let kv_heads = field(config, &["num_key_value_heads"]).unwrap_or(heads);
    let head_dim = field(config, &["head_dim"]).unwrap_or(hidden / heads);
    let intermediate =
        field(config, &["intermediate_size", "n_inner", "ffn_dim", "d_ff"]).unwrap_or(4 * hidden);
    let experts = field(config, &["num_local_experts", "num_experts"]).unwrap_or(1).max(1);
    let tied = config
        .get("tie_word_embeddings")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let gated = config
        .get("model_type")
        .and_then(Value::as_str)
        .map(|model_type| GATED_MLP_MODEL_TYPES.contains(&model_type))
        .unwrap_or(false);

    let embeddings = vocab * hidden * if tied { 1 } else { 2 };
    let attention = 2 * hidden * heads * head_dim + 2 * hidden * kv_heads * head_dim;
    let projections = if gated { 3 } else { 2 };
    let mut mlp = projections * hidden * intermediate * experts;
    if experts > 1 {
        mlp += hidden * experts;
    }
    let norms = 2 * hidden;

    Some(embeddings + layers * (attention + mlp + norms) + hidden)
}
