//! HTTP polling server with both job kinds mounted.
//!
//! Analysis jobs fan out to three scripted specialists; ingestion jobs run a
//! scripted extraction/OCR/chunking/embedding pipeline. Configuration comes
//! from `CONCLAVE_*` environment variables (a `.env` file is honoured).
//!
//! ```text
//! cargo run --example polling_server
//! curl -s -XPOST localhost:8080/analysis/jobs -H 'content-type: application/json' \
//!      -d '{"query": "persistent cough"}'
//! curl -s localhost:8080/analysis/jobs/<job_id>
//! curl -s localhost:8080/analysis/jobs/<job_id>/result
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use conclave::progress::ingestion_stages::{CHUNKING, EMBEDDING, EXTRACTION, OCR, PERSISTENCE};
use conclave::{
    ConclaveConfig, EngineBuilder, IngestionPipeline, JobEventPayload, TextSnippet, WorkerRegistry,
};
use conclave_testkit::{EchoSynthesizer, ScriptedStage, SlowWorker, StaticRetriever, StaticWorker};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,conclave=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ConclaveConfig::from_env()?;
    let bind_addr = config.http.bind_addr;
    let engine = EngineBuilder::new(config).build()?;

    let retriever = StaticRetriever::new(vec![
        TextSnippet::new("guideline-7", "Cough lasting over three weeks warrants imaging")
            .with_score(0.88),
        TextSnippet::new("note-42", "Non-smoker, no fever reported"),
    ]);
    let registry = WorkerRegistry::new()
        .with_worker(
            "pulmonology",
            Arc::new(SlowWorker::new(
                Duration::from_secs(2),
                json!({"opinion": "order chest x-ray"}),
            )),
        )?
        .with_worker(
            "allergy",
            Arc::new(StaticWorker::new(json!({"opinion": "consider seasonal triggers"}))),
        )?
        .with_worker(
            "gastroenterology",
            Arc::new(SlowWorker::new(
                Duration::from_millis(800),
                json!({"opinion": "rule out reflux"}),
            )),
        )?;
    let analysis = engine.analysis_service(
        Arc::new(retriever),
        registry,
        Arc::new(EchoSynthesizer::new()),
    );

    let ingestion = engine.ingestion_service(
        IngestionPipeline::new()
            .with_stage(Arc::new(ScriptedStage::new(EXTRACTION).report(0.5)))
            .with_stage(Arc::new(
                ScriptedStage::new(OCR).only_for_extension("pdf").report(0.5),
            ))
            .with_stage(Arc::new(ScriptedStage::new(CHUNKING).producing_chunks(8)))
            .with_stage(Arc::new(ScriptedStage::new(EMBEDDING).embedding()))
            .with_stage(Arc::new(ScriptedStage::new(PERSISTENCE))),
    )?;

    let mut events = engine.events().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let JobEventPayload::Errored { kind, message } = &event.payload {
                        tracing::warn!(job_id = %event.meta.job_id, %kind, %message, "job failed");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app = Router::new()
        .nest("/analysis", engine.routes(Arc::new(analysis)))
        .nest("/ingestion", engine.routes(Arc::new(ingestion)));

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "polling server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if !engine.shutdown().await {
        tracing::warn!(
            in_flight = engine.executor().in_flight(),
            "shutdown timed out with jobs still running"
        );
    }
    Ok(())
}
