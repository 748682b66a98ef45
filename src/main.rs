//! Build driver command line.

use assetforge::{build_project, channel, BuildEvent, Project, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Options for the build driver.
#[derive(Parser)]
#[command(
    name = "assetforge",
    version,
    about = "Incremental content build pipeline for game assets"
)]
struct Opts {
    /// Suppress build progress output.
    #[arg(long)]
    silent: bool,

    /// Path to the project root directory.
    #[arg(long, value_name = "PATH")]
    project: PathBuf,

    /// Platform to build; generic when omitted.
    #[arg(long, default_value = "")]
    platform: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let opts = Opts::parse();

    if !opts.silent {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "assetforge=info".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if !opts.project.is_dir() {
        eprintln!("project not found: {}", opts.project.display());
        return ExitCode::from(2);
    }

    match run(&opts).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(errors) => {
            eprintln!("build finished with {} error(s)", errors);
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("build failed: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(opts: &Opts) -> Result<usize> {
    let project_name = opts
        .project
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let project_root = opts.project.parent().unwrap_or(Path::new(".")).to_path_buf();
    let mut project = Project::create(&project_root, &project_name)?;

    let (events, mut receiver) = channel();
    let silent = opts.silent;
    let reporter = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if !silent {
                report(&event);
            }
        }
    });

    let summary = build_project(&mut project, &opts.platform, &events).await?;
    drop(events);
    let _ = reporter.await;

    if !silent {
        info!(
            packages = summary.packages,
            built = summary.built,
            skipped = summary.skipped,
            errors = summary.errors,
            "build summary"
        );
    }
    Ok(summary.errors)
}

fn report(event: &BuildEvent) {
    match event {
        BuildEvent::Ready => info!("compilers ready"),
        BuildEvent::PackageStarted { package } => info!(%package, "package started"),
        BuildEvent::FileStarted {
            package,
            source_path,
        } => info!(%package, source = %source_path.display(), "compiling"),
        BuildEvent::FileSkipped {
            package,
            source_path,
            reason,
        } => info!(%package, source = %source_path.display(), %reason, "skipped"),
        BuildEvent::FileSuccess {
            package,
            source_path,
        } => info!(%package, source = %source_path.display(), "compiled"),
        BuildEvent::FileError {
            package,
            source_path,
            errors,
        } => {
            for message in errors {
                error!(%package, source = %source_path.display(), "{}", message);
            }
        }
        BuildEvent::PackageComplete {
            package,
            error_count,
        } => info!(%package, error_count, "package complete"),
        BuildEvent::ProjectComplete { error_count } => info!(error_count, "project complete"),
    }
}
