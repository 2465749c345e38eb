use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zr_client::{
    Asset, AutopilotConfig, AutopilotEvent, ClientConfig, Controller, HttpJobApi, JobEvent, MutationPolicy, ZrEvent,
};
use zr_core::{AnimationParams, Candidate, ParameterSet};

/// Client for the Z-Realism synthesis engine.
///
/// Connection settings come from `ZR_*` environment variables (or a `.env`
/// file); run with `RUST_LOG=debug` for per-poll detail.
#[derive(Parser, Debug)]
#[command(name = "zrealism", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report the engine's hardware backend
    Health,
    /// Force-release the engine's hardware lock after a stuck job
    Unlock,
    /// Ask the engine for recommended parameters for a source image
    Analyze {
        source: PathBuf,
        #[arg(long, default_value = "")]
        character: String,
    },
    /// Still-image synthesis, optionally under autopilot
    Transform(TransformArgs),
    /// Short video synthesis from a still image
    Animate(AnimateArgs),
}

#[derive(Args, Debug)]
struct TransformArgs {
    source: PathBuf,
    #[arg(long, default_value = "")]
    character: String,
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long)]
    steps: Option<u32>,
    #[arg(long)]
    cfg_scale: Option<f64>,
    #[arg(long)]
    depth: Option<f64>,
    #[arg(long)]
    pose: Option<f64>,
    #[arg(long)]
    strength: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,
    /// Start from the engine's own analysis of the source
    #[arg(long)]
    use_analysis: bool,
    /// Keep resubmitting mutated parameters until the target or budget is hit
    #[arg(long)]
    autopilot: bool,
    #[arg(long, default_value_t = 0.92)]
    target: f64,
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,
    #[arg(long, default_value = "outputs")]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct AnimateArgs {
    source: PathBuf,
    #[arg(long, default_value = "")]
    character: String,
    #[arg(long)]
    motion: Option<String>,
    #[arg(long)]
    frames: Option<u32>,
    #[arg(long)]
    fps: Option<u32>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value = "outputs")]
    out: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::load()?;
    let policy = MutationPolicy::from_env()?;
    info!("Engine at {}", config.api_url);

    let api = HttpJobApi::new(&config)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let mut controller = Controller::new(api, config, policy).with_events(tx);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_ctrl_c.cancel();
        }
    });
    let printer = tokio::spawn(print_events(rx));

    match cli.command {
        Command::Health => {
            let health = controller.health().await?;
            println!("hardware: {}", health.hardware);
        }
        Command::Unlock => {
            println!("{}", controller.unlock().await?);
        }
        Command::Analyze { source, character } => {
            let asset = Asset::from_path(&source).await?;
            let base = ParameterSet::default().with_character(character);
            let (report, params) = controller.analyze(&asset, &base).await?;
            println!("detected: {}", report.detected_essence);
            println!("{}", serde_json::to_string_pretty(&params)?);
        }
        Command::Transform(args) => {
            let asset = Asset::from_path(&args.source).await?;
            let mut params = ParameterSet {
                feature_prompt: args.prompt.clone(),
                ..Default::default()
            }
            .with_character(args.character.clone());
            if args.use_analysis {
                params = controller.analyze(&asset, &params).await?.1;
            }
            apply_overrides(&mut params, &args);

            let autopilot = args.autopilot.then_some(AutopilotConfig {
                target_threshold: args.target,
                max_attempts: args.max_attempts,
            });
            let report = controller.generate(&asset, params, autopilot, &cancel).await?;
            for candidate in &report.candidates {
                save(candidate, &args.out).await?;
            }
            if let Some(best) = &report.best {
                println!("best: {} (fitness {:.3})", best.job_id(), best.fitness());
            }
            if let Some(reason) = report.stop_reason {
                println!("autopilot stopped: {reason:?}");
            }
        }
        Command::Animate(args) => {
            let asset = Asset::from_path(&args.source).await?;
            let d = AnimationParams::default();
            let params = AnimationParams {
                character_name: args.character,
                motion_prompt: args.motion.unwrap_or(d.motion_prompt),
                duration_frames: args.frames.unwrap_or(d.duration_frames),
                fps: args.fps.unwrap_or(d.fps),
                seed: args.seed.unwrap_or(d.seed),
                ..d
            };
            let candidate = controller.animate(&asset, params, &cancel).await?;
            save(&candidate, &args.out).await?;
        }
    }

    drop(controller);
    printer.await?;
    Ok(())
}

fn apply_overrides(params: &mut ParameterSet, args: &TransformArgs) {
    if let Some(v) = args.steps {
        params.steps = v;
    }
    if let Some(v) = args.cfg_scale {
        params.cfg_scale = v;
    }
    if let Some(v) = args.depth {
        params.depth = v;
    }
    if let Some(v) = args.pose {
        params.pose = v;
    }
    if let Some(v) = args.strength {
        params.strength = v;
    }
    if let Some(v) = args.seed {
        params.seed = v;
    }
}

async fn save(candidate: &Candidate, dir: &Path) -> Result<()> {
    let bytes = candidate.artifact().bytes();
    let extension = image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or_else(|| candidate.params().pipeline().default_extension());

    let stamp = candidate.created_at().format("%Y%m%d-%H%M%S");
    let path = dir.join(format!("{stamp}_{}.{extension}", candidate.job_id()));
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    let kind = if candidate.artifact().is_video() { "video" } else { "image" };
    println!("saved {kind} {} (fitness {:.3})", path.display(), candidate.fitness());
    Ok(())
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<ZrEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ZrEvent::Job(JobEvent::Submitted { job_id, pipeline }) => {
                println!("submitted {} job {}", pipeline.name(), job_id);
            }
            ZrEvent::Job(JobEvent::Progress(p)) => {
                let eta = p.eta.map(|d| format!(", ~{}s left", d.as_secs())).unwrap_or_default();
                println!("[{:>3}%] {}{}", p.percent, p.phase.label(), eta);
            }
            ZrEvent::Job(JobEvent::Completed { job_id, metrics }) => {
                println!(
                    "{} done: ssim {:.3}, identity {:.3}, {:.1}s",
                    job_id, metrics.structural_similarity, metrics.identity_preservation, metrics.inference_time
                );
            }
            ZrEvent::Job(JobEvent::Failed { job_id, error }) => {
                println!("{} failed: {}", job_id.as_deref().unwrap_or("submission"), error);
            }
            ZrEvent::Autopilot(AutopilotEvent::Started {
                target_threshold,
                max_attempts,
                ..
            }) => {
                println!("autopilot: target {target_threshold:.2}, up to {max_attempts} attempts");
            }
            ZrEvent::Autopilot(AutopilotEvent::Mutated { attempt, next }) => {
                println!(
                    "autopilot attempt {}: depth {:.3}, strength {:.3}, pose {:.3}, seed {}",
                    attempt + 1,
                    next.depth,
                    next.strength,
                    next.pose,
                    next.seed
                );
            }
            ZrEvent::Autopilot(AutopilotEvent::Stopped {
                reason,
                attempts,
                best_score,
            }) => {
                println!("autopilot stopped after {attempts}: {reason:?} (best {best_score:.3})");
            }
        }
    }
}
