//! Main entry point for the generation job runner

use anyhow::{bail, Context};
use genjob_client::{
    backend::{GenerationKind, GenerationOutput, GenerationRequest},
    config::Settings,
    session::{GenerationSession, PlanLimits, UsageCounter},
    upload::FileRef,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "usage: genjob <image|video|tts|text> <prompt> [file]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Pick up VITE_* and GENJOB__* values from a local .env file
    let _ = dotenvy::dotenv();

    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let registry = tracing_subscriber::registry().with(filter);
    if settings.logging.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!(
        api = %settings.api.base_url,
        upload_mode = ?settings.upload.mode,
        "Loaded configuration"
    );

    let mut args = std::env::args().skip(1);
    let (Some(kind), Some(prompt)) = (args.next(), args.next()) else {
        bail!(USAGE);
    };
    let kind: GenerationKind = kind.parse()?;

    let mut request = GenerationRequest::new(kind, prompt);
    if let Some(path) = args.next() {
        let file = FileRef::from_path(&path)
            .await
            .with_context(|| format!("failed to read {}", path))?;
        request = request.with_primary_asset(file);
    }

    let limits = PlanLimits::from_config(&settings.plans);
    let usage = Arc::new(UsageCounter::new(
        settings.plans.default_plan.clone(),
        &limits,
        0,
    ));
    let session = GenerationSession::from_settings(&settings, usage)?;

    let session = Arc::new(session);
    let interrupt = {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                session.unmount();
            }
        })
    };

    let result = session.generate(request).await;
    interrupt.abort();

    match result {
        Ok(GenerationOutput::Asset { url, metadata }) => {
            println!("{}", url);
            if let Some(metadata) = metadata {
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            }
            Ok(())
        }
        Ok(GenerationOutput::Text { content }) => {
            println!("{}", content);
            Ok(())
        }
        Err(e) => {
            let message = session
                .state()
                .last_notice
                .map(|notice| notice.message)
                .unwrap_or_else(|| e.code().user_message().to_string());
            eprintln!("{}", message);
            Err(e.into())
        }
    }
}
