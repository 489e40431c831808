use std::path::PathBuf;

use anyhow::Context;
use tillscan_ocr::{PipelineConfig, ReceiptPipeline};
use tillscan_server::{start_server, AppState, DynRecognizer};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match std::env::var_os("TILLSCAN_CONFIG").map(PathBuf::from) {
        Some(path) => PipelineConfig::load(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let recognizer = recognizer(&config)?;
    let pipeline = ReceiptPipeline::new(recognizer, &config).context("compiling field rules")?;
    #[cfg(feature = "pdfium")]
    let pipeline = pipeline.with_rasterizer(std::sync::Arc::new(tillscan_ocr::PdfiumRasterizer::new(
        config.input.max_pages,
    )));
    if !pipeline.supports_pdf() {
        tracing::warn!("built without the `pdfium` feature; PDF uploads will be rejected");
    }

    let addr = std::env::var("TILLSCAN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    start_server(&addr, AppState::new(pipeline)).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tillscan=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var_os("TILLSCAN_LOG_JSON").is_some() {
        registry
            .with(JsonStorageLayer)
            .with(BunyanFormattingLayer::new("tillscan".into(), std::io::stdout))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg(feature = "tesseract")]
fn recognizer(config: &PipelineConfig) -> anyhow::Result<DynRecognizer> {
    Ok(std::sync::Arc::new(tillscan_ocr::TesseractRecognizer::new(
        config.ocr.tessdata_path.clone(),
        &config.ocr.language,
    )))
}

#[cfg(not(feature = "tesseract"))]
fn recognizer(_config: &PipelineConfig) -> anyhow::Result<DynRecognizer> {
    anyhow::bail!("no OCR engine available: rebuild tillscan-server with `--features tesseract`")
}
