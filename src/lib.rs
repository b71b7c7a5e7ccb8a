pub mod convert;
pub mod dom;
pub mod observer;
pub mod settings;
pub mod text;
pub mod utils;

use std::{fs, path::PathBuf, rc::Rc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::task::LocalSet;

use convert::{BackgroundService, ZhConvertClient};
use dom::Page;
use observer::commands::{restore_enabled, set_enabled};
use observer::{MutationController, ScanOutcome};
use settings::SettingsStore;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

#[derive(Parser)]
#[command(
    name = "twhighlight",
    about = "Mark words that change when a page's Chinese text is converted to Taiwan usage"
)]
struct Cli {
    /// Extension-local settings file.
    #[arg(long, global = true, default_value = "twhighlight-settings.json")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scan/convert/annotate pass over an HTML file.
    Annotate {
        file: PathBuf,
        /// Write the annotated document here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Annotate even when the stored flag is off.
        #[arg(long)]
        force: bool,
    },
    /// Persist the on/off flag, as the popup checkbox does.
    Toggle {
        #[arg(value_enum)]
        state: ToggleState,
    },
    /// Print the stored settings.
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum ToggleState {
    On,
    Off,
}

pub fn run() -> Result<()> {
    utils::logging::init();

    let cli = Cli::parse();
    let store = SettingsStore::new(cli.settings.clone())?;

    match cli.command {
        Command::Annotate {
            file,
            output,
            force,
        } => {
            let html = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to build tokio runtime")?;
            let local = LocalSet::new();
            let annotated = local.block_on(&runtime, annotate_page(&store, &html, force))?;

            match output {
                Some(path) => fs::write(&path, annotated)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => println!("{annotated}"),
            }
        }
        Command::Toggle { state } => {
            let is_enabled = matches!(state, ToggleState::On);
            // no live page from the command line; show what would be sent
            let message = set_enabled(&store, None, is_enabled)?;
            println!("{}", message.to_json()?);
        }
        Command::Status => {
            let settings = store.snapshot()?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }

    Ok(())
}

/// Parse `html`, run a single controller pass through the background
/// service and return the resulting document.
pub async fn annotate_page(store: &SettingsStore, html: &str, force: bool) -> Result<String> {
    let converter_settings = store.converter()?;
    let mut background = BackgroundService::start(ZhConvertClient::new(&converter_settings));

    let page = Rc::new(Page::parse(html));
    let (mut controller, _handle) = MutationController::new(
        Rc::clone(&page),
        background.converter(),
        converter_settings.quiet_window(),
    );

    let enabled = if force {
        controller.enable();
        true
    } else {
        restore_enabled(&mut controller, store)?
    };

    if enabled {
        match controller.process_page().await {
            ScanOutcome::Annotated(report) => log_info!(
                "annotated {} nodes ({} skipped)",
                report.annotated,
                report.skipped
            ),
            other => log_info!("page left unannotated: {other:?}"),
        }
    } else {
        log_info!("highlighting is off; page left untouched");
    }

    background.stop().await?;
    log_info!(
        "controller state: {}",
        serde_json::to_string(&controller.snapshot())?
    );

    page.to_html()
}
