use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use tracing::error;
use venue_sync::{
    DefaultSession,
    config::Config,
    progress::{ProgressReporter, SyncPhase, create_reporter},
};

#[derive(Parser)]
struct Opts {
    #[clap(short, long, env = "VENUE_SYNC_CONFIG")]
    config: PathBuf,
    /// Work from the local cache only.
    #[clap(long)]
    offline: bool,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List known venues.
    Venues,
    /// List the sections of a venue.
    Sections { venue: String },
    /// Show the images and content of a section.
    Section { venue: String, section: String },
    /// Upload the pending images of a section.
    Upload { venue: String, section: String },
    /// Generate sensory content from the images of a section.
    Generate { venue: String, section: String },
    /// Submit the content of a section.
    Save { venue: String, section: String },
    /// Show or replace the generation prompt.
    Prompt {
        #[clap(long)]
        set: Option<String>,
    },
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_venue(session: &DefaultSession, venue: &str) -> anyhow::Result<()> {
    let venues = session.fetch_venues().await.unwrap_or_default();
    let venue = venues
        .into_iter()
        .find(|candidate| candidate.value == venue || candidate.label == venue)
        .ok_or_else(|| anyhow!("unknown venue: {venue}"))?;
    session.select_venue(Some(venue)).await;
    Ok(())
}

async fn open_section(session: &DefaultSession, venue: &str, section: &str) -> anyhow::Result<()> {
    open_venue(session, venue).await?;
    let section = session
        .state()
        .sections
        .into_iter()
        .find(|candidate| candidate.value == section || candidate.label == section)
        .ok_or_else(|| anyhow!("unknown section: {section}"))?;
    session.select_section(Some(section)).await;
    Ok(())
}

async fn dispatch(session: &DefaultSession, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Venues => print_json(&session.fetch_venues().await.unwrap_or_default()),
        Command::Sections { venue } => {
            open_venue(session, &venue).await?;
            print_json(&session.state().sections)
        }
        Command::Section { venue, section } => {
            open_section(session, &venue, &section).await?;
            let state = session.state();
            print_json(&serde_json::json!({
                "images": state.section_images,
                "areas": state.section_data,
            }))
        }
        Command::Upload { venue, section } => {
            open_section(session, &venue, &section).await?;
            let report = session.upload_images().await;
            if report.failed() > 0 {
                return Err(anyhow!(
                    "{} of {} images failed to upload",
                    report.failed(),
                    report.total()
                ));
            }
            Ok(())
        }
        Command::Generate { venue, section } => {
            open_section(session, &venue, &section).await?;
            let area = session
                .generate_content()
                .await
                .ok_or_else(|| anyhow!("no content generated"))?;
            print_json(&area)
        }
        Command::Save { venue, section } => {
            open_section(session, &venue, &section).await?;
            if !session.save_content().await {
                return Err(anyhow!("content was not saved"));
            }
            Ok(())
        }
        Command::Prompt { set } => {
            session.fetch_prompt().await;
            if let Some(prompt) = set {
                session.update_prompt(&prompt).await;
            }
            println!("{}", session.state().prompt);
            Ok(())
        }
    }
}

async fn run(opts: Opts, reporter: Arc<dyn ProgressReporter>) -> anyhow::Result<()> {
    reporter.set_phase(SyncPhase::LoadingConfig);
    let config = Config::load(&opts.config)
        .await
        .with_context(|| format!("load config from {}", opts.config.display()))?;
    let session = venue_sync::connect(&config, reporter)
        .await
        .with_context(|| "open session")?;
    if opts.offline {
        session.set_online(false);
    }
    let result = dispatch(&session, opts.command).await;
    session.teardown();
    result
}

fn main() {
    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let reporter = create_reporter();
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(?e, "failed to start runtime");
            std::process::exit(1);
        }
    };
    match runtime.block_on(run(opts, reporter.clone())) {
        Ok(()) => {
            reporter.set_phase(SyncPhase::Completed);
            reporter.finish();
        }
        Err(e) => {
            reporter.set_phase(SyncPhase::Failed(e.to_string()));
            reporter.finish();
            error!(?e, "critical error");
            std::process::exit(1);
        }
    }
}
