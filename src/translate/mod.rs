// Translation collaborators and the Translation Adapter
//
// - Ollama: local LLM translation over the Ollama HTTP API

pub mod ollama;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub use ollama::{check_ollama_availability, OllamaTranslator};

use crate::config::TranslateConfig;
use crate::error::{DubError, Result};
use crate::transcript::{Transcript, TranslatedUnit, Translation};

/// Text translation collaborator. Implementations must return exactly one
/// output per input, in input order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate_batch(
        &self,
        texts: Vec<String>,
        source_language: String,
        target_language: String,
    ) -> Result<Vec<String>>;
}

/// Factory for creating translator instances
pub struct TranslatorFactory;

impl TranslatorFactory {
    pub fn create_translator(config: TranslateConfig) -> Result<Box<dyn Translator>> {
        Ok(Box::new(OllamaTranslator::new(config)?))
    }
}

/// Maps timed units to translated units one-to-one, batching calls to the
/// translator without disturbing order.
pub struct TranslationAdapter {
    translator: Arc<dyn Translator>,
    batch_size: usize,
}

impl TranslationAdapter {
    pub fn new(translator: Arc<dyn Translator>, batch_size: usize) -> Self {
        Self {
            translator,
            batch_size: batch_size.max(1),
        }
    }

    /// Translate every unit. A failing unit does not stop the rest of the
    /// batch from being attempted, but any failure fails the whole call with
    /// the index of the first failing unit.
    pub async fn translate(&self, transcript: &Transcript, target_language: &str) -> Result<Translation> {
        let source_language = transcript.source_language.clone();
        let mut translated: Vec<Option<String>> = vec![None; transcript.units.len()];

        // Blank units carry no speech and pass through untouched
        let pending: Vec<usize> = transcript
            .units
            .iter()
            .enumerate()
            .filter_map(|(i, unit)| {
                if unit.text.trim().is_empty() {
                    translated[i] = Some(String::new());
                    None
                } else {
                    Some(i)
                }
            })
            .collect();

        info!(
            "Translating {} units {} -> {} in batches of {}",
            pending.len(),
            source_language,
            target_language,
            self.batch_size
        );

        let mut failures: Vec<(usize, String)> = Vec::new();

        for chunk in pending.chunks(self.batch_size) {
            let texts: Vec<String> = chunk.iter().map(|&i| transcript.units[i].text.clone()).collect();

            match self
                .translator
                .translate_batch(texts, source_language.clone(), target_language.to_string())
                .await
            {
                Ok(outputs) if outputs.len() == chunk.len() && outputs.iter().all(|t| !t.trim().is_empty()) => {
                    for (&i, text) in chunk.iter().zip(outputs) {
                        translated[i] = Some(text.trim().to_string());
                    }
                    debug!("Batch of {} units translated", chunk.len());
                }
                outcome => {
                    match outcome {
                        Ok(outputs) => warn!(
                            "Batch returned {} usable translations for {} units, retrying one by one",
                            outputs.iter().filter(|t| !t.trim().is_empty()).count(),
                            chunk.len()
                        ),
                        Err(e) => warn!("Batch translation failed ({}), retrying one by one", e),
                    }
                    for &i in chunk {
                        match self.translate_one(&transcript.units[i].text, &source_language, target_language).await {
                            Ok(text) => translated[i] = Some(text),
                            Err(message) => {
                                error!("Translation of unit {} failed: {}", i, message);
                                failures.push((i, message));
                            }
                        }
                    }
                }
            }
        }

        if let Some((index, message)) = failures.first() {
            let message = if failures.len() > 1 {
                let indices: Vec<String> = failures.iter().map(|(i, _)| i.to_string()).collect();
                format!("{} (units failed: {})", message, indices.join(", "))
            } else {
                message.clone()
            };
            return Err(DubError::Translation { index: *index, message });
        }

        let units = transcript
            .units
            .iter()
            .zip(translated)
            .map(|(unit, text)| TranslatedUnit {
                source: unit.clone(),
                text: text.unwrap_or_default(),
                target_language: target_language.to_string(),
            })
            .collect();

        Ok(Translation {
            source_language,
            target_language: target_language.to_string(),
            units,
        })
    }

    async fn translate_one(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> std::result::Result<String, String> {
        let outputs = self
            .translator
            .translate_batch(
                vec![text.to_string()],
                source_language.to_string(),
                target_language.to_string(),
            )
            .await
            .map_err(|e| e.to_string())?;

        match outputs.as_slice() {
            [single] if !single.trim().is_empty() => Ok(single.trim().to_string()),
            [_] => Err("empty translation".to_string()),
            other => Err(format!("expected 1 translation, got {}", other.len())),
        }
    }
}
