//! demo - end-to-end synthetic run for AutoVision
//!
//! Processes a synthetic video, answers every stored event with simulated operator
//! feedback and prints how the adaptive threshold reacted.

use anyhow::{anyhow, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::IsTerminal;
use std::sync::Arc;

use autovision::ingest::SyntheticSpec;
use autovision::jobs::RunnerSettings;
use autovision::{
    AnalyticsParts, ControllerSettings, FeedbackRequest, FileOpener, InMemoryStore,
    JobState, KnowledgeBaseRetriever, ScorerRegistry, ScorerSettings, SqliteStore,
    ThresholdController, VideoAnalytics,
};

#[path = "../ui.rs"]
mod ui;

const DEMO_USER: &str = "demo-operator";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of synthetic frames to decode.
    #[arg(long, default_value_t = 1800)]
    frames: u64,
    /// Frames per second of the synthetic source.
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Scorer backend (simulated|luma).
    #[arg(long, default_value = "simulated")]
    scorer: String,
    /// Events scoring below this are reported as false positives by the simulated operator.
    #[arg(long, default_value_t = 0.7)]
    false_positive_below: f64,
    /// SQLite database; in-memory stores when omitted.
    #[arg(long)]
    db: Option<String>,
    /// Optional deterministic seed for scorer, controller and operator.
    #[arg(long)]
    seed: Option<u64>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    if args.frames == 0 {
        return Err(anyhow!("frames must be >= 1"));
    }
    let is_tty = std::io::stderr().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !std::io::stdout().is_terminal());

    let service = {
        let _stage = ui.stage("Assemble pipeline");
        build_service(&args)?
    };

    let source = SyntheticSpec {
        name: "demo".to_string(),
        frames: args.frames,
        fps: f64::from(args.fps),
        ..SyntheticSpec::default()
    }
    .to_path();
    let handle = service.submit_video(DEMO_USER, &source)?;
    let report = match ui.wait_job(&handle) {
        JobState::Completed(report) => report,
        other => return Err(anyhow!("demo video did not complete: {:?}", other)),
    };

    println!("demo: video {} from {}", report.video_id, source);
    println!(
        "  {} frames decoded, {} scored, {} anomalies, {} events stored",
        report.frames_decoded, report.frames_scored, report.anomalies, report.events_persisted
    );
    if let Some(first) = report.records.iter().find(|r| r.is_anomaly) {
        println!("  first anomaly: {}", first.summary);
    }

    let analysis = service.video_analysis(handle.video_id(), DEMO_USER)?;
    let mut operator = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    {
        let _stage = ui.stage("Simulate operator feedback");
        for event in &analysis.events {
            let is_false_positive = event.event.anomaly_score < args.false_positive_below;
            let feedback_score = if is_false_positive {
                operator.gen_range(0.0..0.4)
            } else {
                operator.gen_range(0.6..=1.0)
            };
            let threshold = service.provide_feedback(&FeedbackRequest {
                event_id: event.id,
                user_id: DEMO_USER.to_string(),
                is_false_positive,
                feedback_score,
            })?;
            log::debug!("event {} feedback -> threshold {:.3}", event.id, threshold);
        }
    }

    let status = service.system_status()?;
    let metrics = &status.controller.metrics;
    println!();
    println!("controller ({})", status.controller.algorithm);
    println!(
        "  threshold {:.3} after {} adjustments ({} false positives)",
        metrics.current_threshold, metrics.total_adjustments, metrics.false_positives
    );
    println!(
        "  avg reward {:.3}, q-table states {}, transitions journaled {}",
        metrics.avg_reward, metrics.q_table_size, metrics.data_saved
    );
    println!(
        "retriever: {} patterns, cache {}/{} (hit rate {:.1}%)",
        status.retriever.knowledge_base_size,
        status.retriever.cache_size,
        status.retriever.cache_capacity,
        status.retriever.cache_hit_rate * 100.0
    );

    service.shutdown()?;
    Ok(())
}

fn build_service(args: &Args) -> Result<VideoAnalytics> {
    let scorer = ScorerRegistry::with_builtin().build(
        &args.scorer,
        &ScorerSettings {
            seed: args.seed,
            ..ScorerSettings::default()
        },
    )?;
    let controller = ThresholdController::new(ControllerSettings {
        seed: args.seed,
        ..ControllerSettings::default()
    })?;

    match &args.db {
        Some(path) => {
            let store = Arc::new(SqliteStore::open(path)?);
            VideoAnalytics::new(AnalyticsParts {
                scorer,
                retriever: Arc::new(KnowledgeBaseRetriever::default()),
                controller: Arc::new(controller.with_journal(store.clone())),
                events: store.clone(),
                videos: store,
                opener: Arc::new(FileOpener),
                runner: RunnerSettings::default(),
            })
        }
        None => {
            let store = Arc::new(InMemoryStore::default());
            VideoAnalytics::new(AnalyticsParts {
                scorer,
                retriever: Arc::new(KnowledgeBaseRetriever::default()),
                controller: Arc::new(controller),
                events: store.clone(),
                videos: store,
                opener: Arc::new(FileOpener),
                runner: RunnerSettings::default(),
            })
        }
    }
}
