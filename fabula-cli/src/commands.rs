//! One-shot subcommand handlers.

use fabula_core::providers::{GeminiClient, illustration_chain};
use fabula_core::error::VoiceError;
use fabula_core::voice::{SpeechProvider, inspect};
use fabula_core::{AudioAsset, FabulaConfig, IllustrationSource};
use std::path::Path;
use std::sync::Arc;

use crate::assets::AssetWriter;

pub async fn speak(config: &FabulaConfig, text: &str, output: &Path) -> anyhow::Result<()> {
    let client = GeminiClient::new(config)?;
    println!(
        "Synthesizing: \"{}\" (voice: {})",
        text, config.gemini.speech_voice
    );

    let pcm = client
        .synthesize(text, config.language)
        .await?
        .ok_or(VoiceError::NoAudio)?;
    let asset = AudioAsset::from_pcm(&pcm);
    let summary = inspect(&asset.wav)?;

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, &asset.wav)?;
    println!(
        "Saved {} ({:.1}s, {} Hz, {} ch)",
        output.display(),
        summary.duration_secs,
        summary.format.sample_rate_hz,
        summary.format.channels
    );
    Ok(())
}

pub async fn illustrate(config: &FabulaConfig, text: &str, out_dir: &Path) -> anyhow::Result<()> {
    let client = Arc::new(GeminiClient::new(config)?);
    let chain = illustration_chain(&client, config);
    let illustration = chain.generate(&config.language.image_prompt(text)).await;

    match &illustration.source {
        IllustrationSource::Generated { strategy } => println!("Generated by {}", strategy),
        IllustrationSource::Placeholder => {
            println!("All image models failed; using the placeholder")
        }
    }
    let writer = AssetWriter::new(out_dir);
    let saved = writer.write_image("illustration", &illustration.image)?;
    println!("{}", saved);
    Ok(())
}

/// Print the effective configuration, with any inline API key masked.
pub fn show_config(config: &FabulaConfig, workspace: &Path) -> anyhow::Result<()> {
    let mut shown = config.clone();
    if shown.gemini.api_key.is_some() {
        shown.gemini.api_key = Some("********".to_string());
    }
    if !fabula_core::config::config_exists(Some(workspace)) {
        println!("# No config file found; showing defaults and environment overrides.");
    }
    println!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}
