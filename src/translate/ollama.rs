use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::Translator;
use crate::config::TranslateConfig;
use crate::error::{DubError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SingleResult {
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BatchResult {
    translations: Vec<String>,
}

/// Translator backed by a local Ollama model
pub struct OllamaTranslator {
    client: Client,
    config: TranslateConfig,
}

impl OllamaTranslator {
    pub fn new(config: TranslateConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    async fn generate(&self, prompt: String) -> Result<String> {
        let request = GenerateRequest {
            model: self.config.model.clone(),
            prompt,
            stream: false,
            format: "json".to_string(),
        };

        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
        debug!("Sending translation request to: {}", url);

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DubError::Config(format!("Ollama API error {}: {}", status, error_text)));
        }

        let generated: GenerateResponse = response.json().await?;
        let raw = generated.response.trim().to_string();
        debug!("Raw Ollama response: {}", raw);

        if raw.is_empty() {
            return Err(DubError::Config("Empty translation received".to_string()));
        }
        Ok(raw)
    }

    async fn generate_with_retries(&self, prompt: &str) -> Result<String> {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.generate(prompt.to_string()).await {
                Ok(raw) => return Ok(raw),
                Err(e) => {
                    warn!("Translation attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DubError::Config("No translation attempts made".to_string())))
    }
}

#[async_trait]
impl Translator for OllamaTranslator {
    async fn translate_batch(
        &self,
        texts: Vec<String>,
        source_language: String,
        target_language: String,
    ) -> Result<Vec<String>> {
        match texts.as_slice() {
            [] => Ok(Vec::new()),
            [single] => {
                let prompt = build_single_prompt(single, &source_language, &target_language);
                let raw = self.generate_with_retries(&prompt).await?;
                Ok(vec![parse_single_response(&raw)])
            }
            many => {
                let prompt = build_batch_prompt(many, &source_language, &target_language);
                let raw = self.generate_with_retries(&prompt).await?;
                parse_batch_response(&raw)
            }
        }
    }
}

fn build_single_prompt(text: &str, source_language: &str, target_language: &str) -> String {
    let target_name = language_code_to_name(target_language);
    let source_name = language_code_to_name(source_language);
    format!(
        "You are a professional translator for video dubbing.\n\
         \n\
         CRITICAL: You must translate the text from {} to {} ONLY. Do not translate to any other language.\n\
         The translation will be spoken aloud, so keep it natural and about as long as the source.\n\
         \n\
         Return ONLY the translation in JSON format as {{\"text\":\"your {} translation here\"}}.\n\
         Do not include any explanations, alternatives, or text in other languages.\n\
         \n\
         Text to translate: \"{}\"\n",
        source_name, target_name, target_name, text
    )
}

fn build_batch_prompt(texts: &[String], source_language: &str, target_language: &str) -> String {
    let target_name = language_code_to_name(target_language);
    let source_name = language_code_to_name(source_language);
    let numbered = json!(texts).to_string();
    format!(
        "You are a professional translator for video dubbing.\n\
         \n\
         CRITICAL: You must translate each line from {} to {} ONLY.\n\
         The lines are consecutive subtitles of one video. Translate each one separately;\n\
         never merge or split lines.\n\
         \n\
         Return ONLY JSON in the format {{\"translations\":[...]}} with exactly {} strings,\n\
         in the same order as the input.\n\
         \n\
         [Lines to translate]\n\
         {}\n",
        source_name,
        target_name,
        texts.len(),
        numbered
    )
}

fn parse_single_response(raw: &str) -> String {
    if let Ok(result) = serde_json::from_str::<SingleResult>(raw) {
        return result.text.trim().to_string();
    }
    clean_translation_response(raw)
}

fn parse_batch_response(raw: &str) -> Result<Vec<String>> {
    if let Ok(result) = serde_json::from_str::<BatchResult>(raw) {
        return Ok(result.translations.into_iter().map(|t| t.trim().to_string()).collect());
    }
    // Some models answer with a bare array
    if let Ok(list) = serde_json::from_str::<Vec<String>>(raw) {
        return Ok(list.into_iter().map(|t| t.trim().to_string()).collect());
    }
    Err(DubError::Config(format!("Unparseable batch translation: {}", raw)))
}

/// Convert language code to full language name for clearer prompts
pub fn language_code_to_name(code: &str) -> String {
    let name = match code.to_lowercase().as_str() {
        "ja" => "Japanese",
        "ko" => "Korean",
        "zh" => "Chinese",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "ru" => "Russian",
        "it" => "Italian",
        "pt" => "Portuguese",
        "pl" => "Polish",
        "nl" => "Dutch",
        "tr" => "Turkish",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "th" => "Thai",
        "vi" => "Vietnamese",
        "sv" => "Swedish",
        "uk" => "Ukrainian",
        "cs" => "Czech",
        "hu" => "Hungarian",
        "he" => "Hebrew",
        "bn" => "Bengali",
        "ta" => "Tamil",
        "te" => "Telugu",
        "mr" => "Marathi",
        "gu" => "Gujarati",
        "kn" => "Kannada",
        "ml" => "Malayalam",
        "pa" => "Punjabi",
        "ur" => "Urdu",
        "en" => "English",
        _ => return code.to_string(),
    };
    name.to_string()
}

/// Pull the translation out of a free-form answer
fn clean_translation_response(response: &str) -> String {
    let lines: Vec<&str> = response.lines().collect();

    for &line in &lines {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with("Here are")
            || trimmed.starts_with("Option")
            || trimmed.starts_with("**Option")
            || trimmed.starts_with("Translation:")
            || trimmed.starts_with("- ")
            || trimmed.starts_with("* ")
        {
            continue;
        }

        if trimmed.starts_with("**") && trimmed.ends_with("**") {
            continue;
        }

        if trimmed.chars().count() > 3 {
            return trimmed.trim_matches('"').to_string();
        }
    }

    lines
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .unwrap_or(response)
        .to_string()
}

/// Check if Ollama is available and the model is loaded
pub async fn check_ollama_availability(endpoint: &str, model: &str) -> Result<()> {
    let client = Client::new();
    let url = format!("{}/api/show", endpoint.trim_end_matches('/'));

    let response = client
        .post(&url)
        .json(&json!({ "name": model }))
        .send()
        .await
        .map_err(|e| DubError::Config(format!("Failed to connect to Ollama: {}", e)))?;

    if response.status().is_success() {
        info!("Ollama model '{}' is available", model);
        Ok(())
    } else {
        Err(DubError::Config(format!(
            "Ollama model '{}' not found. Please pull the model first: ollama pull {}",
            model, model
        )))
    }
}
