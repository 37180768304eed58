//! autovisiond - AutoVision video analytics runner
//!
//! This daemon:
//! 1. Loads static configuration (file named by AUTOVISION_CONFIG, then env overrides)
//! 2. Opens the SQLite event store and training journal
//! 3. Queues every given video for the single background worker
//! 4. Waits for each job and prints its statistics
//!
//! Ctrl-C cancels all outstanding jobs; each stops at its next yield point.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use autovision::{AppConfig, JobReport, JobState, VideoAnalytics};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "autovisiond",
    version,
    about = "Score sampled frames of surveillance videos for anomalies"
)]
struct Args {
    /// Video paths (local files, or stub://name?frames=N for a synthetic source)
    #[arg(required = true, value_name = "VIDEO")]
    videos: Vec<String>,

    /// Owner recorded on the videos and their events
    #[arg(long, default_value = "operator", env = "AUTOVISION_USER")]
    user: String,

    /// Config file (.toml or .json); overrides AUTOVISION_CONFIG
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the per-video analysis as JSON on stdout
    #[arg(long)]
    json: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        match &args.config {
            Some(path) => AppConfig::load_from(path)?,
            None => AppConfig::load()?,
        }
    };
    let service = {
        let _stage = ui.stage("Open stores");
        VideoAnalytics::from_config(&cfg)?
    };

    let mut handles = Vec::with_capacity(args.videos.len());
    for path in &args.videos {
        let handle = service.submit_video(&args.user, path)?;
        log::info!("video {} queued from {}", handle.video_id(), path);
        handles.push((path.clone(), handle));
    }

    let cancel_handles: Vec<_> = handles.iter().map(|(_, h)| h.clone()).collect();
    ctrlc::set_handler(move || {
        log::warn!("interrupt received, cancelling {} job(s)", cancel_handles.len());
        for handle in &cancel_handles {
            handle.cancel();
        }
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let mut failures = 0usize;
    for (path, handle) in &handles {
        match ui.wait_job(handle) {
            JobState::Completed(report) => {
                print_report(path, &report);
                if args.json {
                    let analysis = service.video_analysis(handle.video_id(), &args.user)?;
                    println!("{}", serde_json::to_string_pretty(&analysis)?);
                }
            }
            JobState::Failed(reason) => {
                failures += 1;
                println!("{}: failed: {}", path, reason);
            }
            JobState::Cancelled => {
                failures += 1;
                println!("{}: cancelled", path);
            }
            other => {
                failures += 1;
                println!("{}: unexpected job state {:?}", path, other);
            }
        }
    }

    let status = service.system_status()?;
    println!();
    println!(
        "processed {} video(s), {} failed, {} frames scored, {} anomalies in {:.2}s",
        status.statistics.videos_processed,
        status.statistics.videos_failed,
        status.statistics.frames_processed,
        status.statistics.anomalies_detected,
        status.statistics.processing_time_total
    );
    println!(
        "threshold {:.3} after {} adjustment(s)",
        status.current_threshold, status.controller.metrics.total_adjustments
    );

    service.shutdown()?;
    if failures > 0 {
        return Err(anyhow!("{} of {} video(s) did not complete", failures, handles.len()));
    }
    Ok(())
}

fn print_report(path: &str, report: &JobReport) {
    println!("{} (video {})", path, report.video_id);
    println!(
        "  frames: {} decoded, {} scored, {} degraded",
        report.frames_decoded, report.frames_scored, report.degraded_frames
    );
    println!(
        "  anomalies: {} ({} high risk), events stored {} / dropped {}",
        report.anomalies, report.high_risk_events, report.events_persisted, report.events_failed
    );
    println!(
        "  scores: max {:.2}, avg {:.2}, histogram {:?}",
        report.max_score, report.avg_score, report.score_histogram
    );
    for (kind, count) in &report.anomaly_types {
        println!("  {}: {}", kind, count);
    }
    println!("  took {:.2}s", report.processing_secs);
}
