use anyhow::Context;
use avrec::capture::channels_for;
use avrec::config::{parse_retention, Settings};
use avrec::recorder::{run_session, CaptureMode, CaptureSession, MergeStatus, SessionReport};
use avrec::retention::RetentionSweeper;
use avrec::transcode::{FfmpegTranscoder, TranscodeClient};
use avrec::utils::{AppError, ErrorResponse};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::oneshot;

#[derive(Parser)]
#[command(name = "avrec")]
#[command(about = "Record microphone and/or webcam, merge to MP4, and expire old recordings")]
#[command(version)]
struct Cli {
    /// Directory receiving recordings (created if missing)
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Base file name, without extension
    #[arg(short, long)]
    name: String,

    /// Capture mode: 1 / audio, 2 / video, 3 / both
    #[arg(short, long)]
    mode: String,

    /// Seconds before a file in the output directory is deleted (default: 3600)
    #[arg(short, long)]
    retention: Option<String>,

    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the session report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    avrec::init_tracing();

    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let retention = parse_retention(cli.retention.as_deref(), settings.retention_window());

    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("failed to create {}", cli.output_dir.display()))?;

    let sweeper = RetentionSweeper::spawn(
        cli.output_dir.clone(),
        retention,
        settings.sweep_interval(),
    );

    let mode = match cli.mode.parse::<CaptureMode>() {
        Ok(mode) => mode,
        Err(e) => {
            report_error(&e, cli.json);
            sweeper.stop().await;
            return Ok(ExitCode::FAILURE);
        }
    };

    let session = match CaptureSession::new(mode, &cli.output_dir, &cli.name, retention) {
        Ok(session) => session,
        Err(e) => {
            report_error(&e, cli.json);
            sweeper.stop().await;
            return Ok(ExitCode::FAILURE);
        }
    };

    let client = TranscodeClient::new(FfmpegTranscoder::new(
        settings.ffmpeg_path.clone(),
        settings.ffprobe_path.clone(),
    ));
    let channels = channels_for(&session, &settings);

    let enter = wait_for_enter();
    let mut interrupted = false;
    let stop_request = async {
        tokio::select! {
            Ok(()) = enter => {}
            _ = tokio::signal::ctrl_c() => interrupted = true,
        }
    };

    if !cli.json {
        println!(
            "Recording {} as {:?} into {}. Press Enter to stop.",
            session.mode(),
            session.base_name(),
            session.output_dir().display()
        );
    }

    let result = run_session(&session, channels, &client, stop_request).await;

    let succeeded = match &result {
        Ok(report) => {
            print_report(report, cli.json)?;
            report.succeeded()
        }
        Err(e) => {
            report_error(e, cli.json);
            false
        }
    };

    if !interrupted {
        if !cli.json {
            println!(
                "Files in {} are deleted {}s after creation. Press Ctrl-C to exit.",
                session.output_dir().display(),
                retention.as_secs()
            );
        }
        tokio::signal::ctrl_c().await?;
    }

    let passes = sweeper.stop().await;
    tracing::debug!("Exiting after {} sweep passes", passes);

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Resolves when a line is read from stdin. Closed stdin never resolves it.
fn wait_for_enter() -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        if let Ok(n) = std::io::stdin().read_line(&mut line) {
            if n > 0 {
                let _ = tx.send(());
            }
        }
    });
    rx
}

fn report_error(error: &AppError, json: bool) {
    let response = ErrorResponse::from(error);
    if json {
        match serde_json::to_string(&response) {
            Ok(line) => println!("{line}"),
            Err(_) => eprintln!("{}: {}", response.code, response.message),
        }
    } else {
        eprintln!("{}: {}", response.code, response.message);
    }
}

fn print_report(report: &SessionReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "Session {} ({}, started {})",
        report.session_id,
        report.mode,
        report.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    for stream in &report.capture.streams {
        println!(
            "  {}: {:?}, {} units in {} ms -> {}{}",
            stream.kind,
            stream.status,
            stream.units_written,
            stream.duration_ms(),
            stream.sink_path.display(),
            if stream.finalized { "" } else { " (not finalized, data lost)" }
        );
    }

    match &report.merge {
        MergeStatus::NotRequired => {}
        MergeStatus::Skipped { reason } => println!("  merge skipped: {reason}"),
        MergeStatus::Merged { output } => {
            println!("  merged into {}", output.output_path.display());
            if !output.intermediates_removed {
                println!("  some raw files could not be deleted");
            }
        }
        MergeStatus::Failed { code, message } => {
            println!("  merge failed ({code}): {message}");
            println!("  raw files kept for recovery");
        }
    }

    match &report.final_output {
        Some(path) => println!("Output: {}", path.display()),
        None => println!("No output produced"),
    }
    Ok(())
}
