use chrono::{Local, NaiveTime};
use clap::{Parser, Subcommand};
use dialoguer::{Confirm, Input, Password, Select};
use humansize::{DECIMAL, format_size};
use indicatif::{ProgressBar, ProgressStyle};
use plex_downloader::{
    BatchError, Catalog, CatalogError, CatalogItem, Config, ConfigError, ConfigStore,
    Destination, Downloader, Episode, InterruptFlag, InterruptResponse, MediaKind, Movie,
    PlexAccount, PlexDownloaderError, PlexServer, ProgressEvent, Reporter, ResolvedConfig, Season,
    Show, expand_home, find_leftover_temp_files, next_start, remove_leftovers, show_directory,
    transfer_range, transfer_show, wait_until,
};
use std::fs;
use std::io;
use std::path::Path;
use std::process::{self, ExitCode};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit status of a run that was interrupted during a transfer
const EXIT_INTERRUPTED: u8 = 130;

type Result<T> = std::result::Result<T, PlexDownloaderError>;

#[derive(Parser)]
#[command(name = "plex-dl")]
#[command(version, about = "Download movies and shows from your Plex server in original quality")]
struct Cli {
    /// Print debug logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and choose server and directories
    #[command(alias = "setup")]
    Config,

    /// Search the server and download a movie, an episode or a whole show
    Search {
        /// Title to search for
        query: String,

        /// Select now, start the download at night
        #[arg(long)]
        at_night: bool,

        /// Hour of the scheduled start (local time)
        #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(0..24))]
        hour: u32,
    },

    /// Delete leftover temporary files from interrupted downloads
    Cleanup,
}

/// Renders progress events on the terminal
struct ConsoleReporter {
    bar: Option<ProgressBar>,
    /// Unattended run: never ask questions
    scheduled: bool,
}

impl ConsoleReporter {
    fn new(scheduled: bool) -> Self {
        Self {
            bar: None,
            scheduled,
        }
    }

    fn start_bar(&mut self, total_bytes: Option<u64>) {
        let bar = match total_bytes {
            Some(total) => {
                let bar = ProgressBar::new(total);
                let style = ProgressStyle::with_template(
                    "  [{bar:40.cyan/blue}] {bytes}/{total_bytes} @ {bytes_per_sec}, {eta} left",
                )
                .map(|s| s.progress_chars("=> "))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
                bar.set_style(style);
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                if let Ok(style) =
                    ProgressStyle::with_template("  {spinner} {bytes} @ {bytes_per_sec}")
                {
                    bar.set_style(style);
                }
                bar
            }
        };
        bar.enable_steady_tick(Duration::from_millis(200));
        self.bar = Some(bar);
    }

    fn clear_bar(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl Reporter for ConsoleReporter {
    fn report(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::ShowStarted {
                show_title,
                season_count,
                episode_count,
            } => {
                println!(
                    "\n{}: {} season(s), {} episode(s)",
                    show_title, season_count, episode_count
                );
            }
            ProgressEvent::EpisodeStarted {
                index,
                total,
                episode,
            } => {
                println!("\n[{}/{}] {}", index + 1, total, episode);
            }
            ProgressEvent::DownloadStarted {
                filename,
                total_bytes,
                ..
            } => {
                match total_bytes {
                    Some(total) => {
                        println!("Downloading {} ({})", filename, format_size(total, DECIMAL))
                    }
                    None => println!("Downloading {} (size unknown)", filename),
                }
                self.start_bar(total_bytes);
            }
            ProgressEvent::DownloadProgress { downloaded, .. } => {
                if let Some(bar) = &self.bar {
                    bar.set_position(downloaded);
                }
            }
            ProgressEvent::DownloadFinished { path, bytes, .. } => {
                self.clear_bar();
                println!("Saved {} ({})", path.display(), format_size(bytes, DECIMAL));
            }
            ProgressEvent::DownloadFailed { filename, error } => {
                self.clear_bar();
                eprintln!("Download of {} failed: {}", filename, error);
            }
            ProgressEvent::DownloadInterrupted { filename } => {
                self.clear_bar();
                eprintln!("\nDownload of {} interrupted, partial file removed.", filename);
            }
            ProgressEvent::Skipped { path, .. } => {
                println!("Skipping, file already exists: {}", path.display());
            }
            ProgressEvent::NoMedia { title } => {
                eprintln!("No media file found for {}", title);
            }
            ProgressEvent::Relocating {
                source,
                destination,
            } => {
                println!("Moving {} to {}...", source.display(), destination);
            }
            ProgressEvent::MoverUnavailable => {
                println!("rclone is not available, moving locally.");
            }
            ProgressEvent::Relocated { destination, .. } => {
                println!("Moved to {}", destination);
            }
            ProgressEvent::RelocationFailed { source, reason } => {
                eprintln!(
                    "Could not move {}: {}. The file stays in the download directory.",
                    source.display(),
                    reason
                );
            }
            ProgressEvent::BatchComplete { report } => {
                println!(
                    "\nDone: {} downloaded, {} skipped, {} failed ({} total)",
                    report.succeeded, report.skipped, report.failed, report.attempted
                );
            }
        }
    }

    fn confirm_overwrite(&mut self, path: &Path) -> bool {
        if self.scheduled {
            println!("File already exists, not overwriting: {}", path.display());
            return false;
        }

        Confirm::new()
            .with_prompt(format!("File already exists: {}. Overwrite?", path.display()))
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}

/// What the user chose to download
enum Plan {
    Movie(Movie),
    Episode { show: Show, episode: Episode },
    Show(Show),
    Range { show: Show, season: Season, start: usize },
}

fn prompt_error(e: dialoguer::Error) -> PlexDownloaderError {
    io::Error::other(e.to_string()).into()
}

fn init_logging(verbose: bool) {
    let default_directives = if verbose {
        "warn,plex_downloader=debug,plex_dl=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn install_interrupt_handler(interrupt: &InterruptFlag) {
    let flag = interrupt.clone();
    let result = ctrlc::set_handler(move || match flag.request() {
        InterruptResponse::Idle => {
            eprintln!("\nCancelled.");
            process::exit(0);
        }
        // A running transfer picks the request up at the next chunk
        InterruptResponse::Deferred => {
            eprintln!("\nStopping after the current chunk, press Ctrl+C again to abort now.");
        }
        InterruptResponse::Abandoned => {
            eprintln!("\nAborted, partial file removed.");
            process::exit(EXIT_INTERRUPTED.into());
        }
    });

    if let Err(e) = result {
        tracing::warn!(error = %e, "Could not install Ctrl+C handler");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let interrupt = InterruptFlag::new();
    install_interrupt_handler(&interrupt);

    let result = match cli.command {
        Command::Config => run_config(),
        Command::Search {
            query,
            at_night,
            hour,
        } => run_search(&query, at_night.then_some(hour), &interrupt),
        Command::Cleanup => run_cleanup(),
    };

    match result {
        Ok(code) => code,
        Err(PlexDownloaderError::Interrupted(_))
        | Err(PlexDownloaderError::Batch(BatchError::Interrupted(_))) => {
            eprintln!("Interrupted.");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_config() -> Result<ExitCode> {
    let store = ConfigStore::open()?;
    let mut config = store.load()?;
    configure(&store, &mut config)?;
    Ok(ExitCode::SUCCESS)
}

fn run_cleanup() -> Result<ExitCode> {
    let store = ConfigStore::open()?;
    let config = store.load()?;

    match config.download_path.as_deref() {
        Some(path) if !path.trim().is_empty() => {
            if !offer_cleanup(&expand_home(path))? {
                println!("No leftover temporary files found.");
            }
        }
        _ => println!("No download directory configured yet. Run `plex-dl config` first."),
    }
    Ok(ExitCode::SUCCESS)
}

fn run_search(query: &str, at_night: Option<u32>, interrupt: &InterruptFlag) -> Result<ExitCode> {
    let store = ConfigStore::open()?;
    let mut config = store.load()?;
    if config.client_identifier.is_none() {
        config.client_identifier();
        store.save(&config)?;
    }

    let resolved = match config.resolve() {
        Ok(resolved) => resolved,
        Err(ConfigError::Incomplete(key)) => {
            println!("Configuration incomplete ({} missing). Let's set it up.", key);
            configure_everything(&mut config)?;
            store.save(&config)?;
            config.resolve()?
        }
        Err(e) => return Err(e.into()),
    };

    offer_cleanup(&resolved.download_dir)?;

    let Some((server, resolved)) = connect(&store, &mut config, resolved)? else {
        return Ok(ExitCode::FAILURE);
    };

    let mut results = server.search(query, MediaKind::Movie)?;
    results.extend(server.search(query, MediaKind::Show)?);
    if results.is_empty() {
        println!("No results for '{}'.", query);
        return Ok(ExitCode::SUCCESS);
    }

    let Some(plan) = choose_plan(&server, &results)? else {
        println!("Cancelled.");
        return Ok(ExitCode::SUCCESS);
    };

    if let Some(hour) = at_night {
        wait_for_hour(hour);
    }

    fs::create_dir_all(&resolved.download_dir)?;
    let downloader = Downloader::connect(server.handle().clone(), interrupt.clone())?;
    let destination = resolved.destination.as_ref();
    let mut reporter = ConsoleReporter::new(at_night.is_some());

    match plan {
        Plan::Movie(movie) => {
            downloader.transfer_movie(&movie, &resolved.download_dir, destination, &mut reporter)?;
        }
        Plan::Episode { show, episode } => {
            let show_dir = show_directory(&resolved.download_dir, &show)?;
            downloader.transfer_episode(
                &episode,
                &show,
                &show_dir,
                false,
                destination,
                &mut reporter,
            )?;
        }
        Plan::Show(show) => {
            transfer_show(
                &downloader,
                &server,
                &show,
                &resolved.download_dir,
                destination,
                &mut reporter,
            )?;
        }
        Plan::Range {
            show,
            season,
            start,
        } => {
            transfer_range(
                &downloader,
                &server,
                &show,
                &season,
                start,
                &resolved.download_dir,
                destination,
                &mut reporter,
            )?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Connects to the configured server, offering to reconfigure on failure
///
/// Returns `None` when the user declines.
fn connect(
    store: &ConfigStore,
    config: &mut Config,
    resolved: ResolvedConfig,
) -> Result<Option<(PlexServer, ResolvedConfig)>> {
    let client_identifier = config.client_identifier().to_string();
    let attempt = |resolved: &ResolvedConfig| -> std::result::Result<PlexServer, CatalogError> {
        PlexAccount::from_token(&resolved.token, &client_identifier)?.connect(&resolved.server_name)
    };

    println!("Connecting to {}...", resolved.server_name);
    match attempt(&resolved) {
        Ok(server) => return Ok(Some((server, resolved))),
        Err(e) => eprintln!("Could not connect to '{}': {}", resolved.server_name, e),
    }

    let reconfigure = Confirm::new()
        .with_prompt("Sign in again and choose the server?")
        .default(true)
        .interact()
        .map_err(prompt_error)?;
    if !reconfigure {
        return Ok(None);
    }

    configure_account(config)?;
    store.save(config)?;
    let resolved = config.resolve()?;

    match attempt(&resolved) {
        Ok(server) => Ok(Some((server, resolved))),
        Err(e) => {
            eprintln!("Could not connect to '{}': {}", resolved.server_name, e);
            Ok(None)
        }
    }
}

fn describe(item: &CatalogItem) -> String {
    let kind = match item.kind() {
        MediaKind::Movie => "Movie",
        MediaKind::Show => "Show",
    };
    match item.year() {
        Some(year) => format!("[{}] {} ({})", kind, item.title(), year),
        None => format!("[{}] {}", kind, item.title()),
    }
}

fn choose_plan(server: &PlexServer, results: &[CatalogItem]) -> Result<Option<Plan>> {
    let items: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(index, item)| format!("{:>2}. {}", index + 1, describe(item)))
        .collect();
    let selection = Select::new()
        .with_prompt("Select a title (Esc to cancel)")
        .items(&items)
        .default(0)
        .interact_opt()
        .map_err(prompt_error)?;

    let Some(index) = selection else {
        return Ok(None);
    };

    match &results[index] {
        CatalogItem::Movie(movie) => Ok(Some(Plan::Movie(movie.clone()))),
        CatalogItem::Show(show) => choose_show_plan(server, show),
    }
}

fn choose_show_plan(server: &PlexServer, show: &Show) -> Result<Option<Plan>> {
    let options = [
        "Whole series",
        "Single episode",
        "From an episode to the end of its season",
    ];
    let choice = Select::new()
        .with_prompt(format!("What do you want to download from {}?", show.title))
        .items(&options)
        .default(0)
        .interact_opt()
        .map_err(prompt_error)?;

    match choice {
        Some(0) => {
            let seasons = match show.season_count {
                Some(count) => format!("all {} season(s)", count),
                None => "all seasons".to_string(),
            };
            let confirmed = Confirm::new()
                .with_prompt(format!("Download {} of {}?", seasons, show.title))
                .default(false)
                .interact()
                .map_err(prompt_error)?;
            Ok(confirmed.then(|| Plan::Show(show.clone())))
        }
        Some(1) => {
            let Some(season) = choose_season(server, show)? else {
                return Ok(None);
            };
            let episodes = server.episodes(&season)?;
            Ok(choose_episode(&episodes)?.map(|index| Plan::Episode {
                show: show.clone(),
                episode: episodes[index].clone(),
            }))
        }
        Some(2) => {
            let Some(season) = choose_season(server, show)? else {
                return Ok(None);
            };
            let episodes = server.episodes(&season)?;
            let Some(start) = choose_episode(&episodes)? else {
                return Ok(None);
            };
            let confirmed = Confirm::new()
                .with_prompt(format!(
                    "Download {} episode(s) from {} to the end of {}?",
                    episodes.len() - start,
                    episodes[start].token(),
                    season.title
                ))
                .default(true)
                .interact()
                .map_err(prompt_error)?;
            Ok(confirmed.then(|| Plan::Range {
                show: show.clone(),
                season,
                start,
            }))
        }
        _ => Ok(None),
    }
}

fn choose_season(server: &PlexServer, show: &Show) -> Result<Option<Season>> {
    let seasons = server.seasons(show)?;
    if seasons.is_empty() {
        println!("{} has no seasons.", show.title);
        return Ok(None);
    }

    let items: Vec<String> = seasons.iter().map(|s| s.title.clone()).collect();
    let selection = Select::new()
        .with_prompt("Select a season")
        .items(&items)
        .default(0)
        .interact_opt()
        .map_err(prompt_error)?;

    Ok(selection.map(|index| seasons[index].clone()))
}

fn choose_episode(episodes: &[Episode]) -> Result<Option<usize>> {
    if episodes.is_empty() {
        println!("This season has no episodes.");
        return Ok(None);
    }

    let items: Vec<String> = episodes
        .iter()
        .map(|e| format!("{} - {}", e.token(), e.title))
        .collect();
    Select::new()
        .with_prompt("Select an episode")
        .items(&items)
        .default(0)
        .interact_opt()
        .map_err(prompt_error)
}

fn wait_for_hour(hour: u32) {
    let Some(at) = NaiveTime::from_hms_opt(hour, 0, 0) else {
        return;
    };
    let target = next_start(Local::now().naive_local(), at);
    println!(
        "Download scheduled for {}. Press Ctrl+C to cancel.",
        target.format("%Y-%m-%d %H:%M")
    );

    wait_until(target, |remaining| {
        let secs = remaining.as_secs();
        println!(
            "Starting in {:02}:{:02}:{:02}",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        );
    });
    println!("Starting download.");
}

/// Lists leftover temp files and deletes them if confirmed
///
/// Returns whether any were found.
fn offer_cleanup(download_dir: &Path) -> Result<bool> {
    let leftovers = find_leftover_temp_files(download_dir)?;
    if leftovers.is_empty() {
        return Ok(false);
    }

    println!("Found {} leftover temporary file(s):", leftovers.len());
    for file in &leftovers {
        println!("  - {} ({})", file.path.display(), format_size(file.size, DECIMAL));
    }

    let delete = Confirm::new()
        .with_prompt("Delete them?")
        .default(true)
        .interact()
        .map_err(prompt_error)?;
    if !delete {
        println!("Keeping the temporary files.");
        return Ok(true);
    }

    let report = remove_leftovers(&leftovers);
    for (path, reason) in &report.failed {
        eprintln!("Could not delete {}: {}", path.display(), reason);
    }
    println!(
        "Deleted {} file(s), {} failed.",
        report.deleted.len(),
        report.failed.len()
    );
    Ok(true)
}

fn configure(store: &ConfigStore, config: &mut Config) -> Result<()> {
    if config.token.is_none() {
        configure_everything(config)?;
    } else {
        let options = [
            "Plex account and server",
            "Download directory",
            "Media server path",
            "Everything",
        ];
        let choice = Select::new()
            .with_prompt("What do you want to change?")
            .items(&options)
            .default(0)
            .interact_opt()
            .map_err(prompt_error)?;

        match choice {
            Some(0) => configure_account(config)?,
            Some(1) => configure_download_dir(config)?,
            Some(2) => configure_media_path(config)?,
            Some(3) => configure_everything(config)?,
            _ => return Ok(()),
        }
    }

    store.save(config)?;
    println!("Configuration saved to {}", store.path().display());
    Ok(())
}

fn configure_everything(config: &mut Config) -> Result<()> {
    configure_account(config)?;
    configure_download_dir(config)?;
    configure_media_path(config)
}

fn configure_account(config: &mut Config) -> Result<()> {
    let client_identifier = config.client_identifier().to_string();

    let username: String = Input::new()
        .with_prompt("Plex username or email")
        .interact_text()
        .map_err(prompt_error)?;
    let password = Password::new()
        .with_prompt("Plex password")
        .interact()
        .map_err(prompt_error)?;

    let account = PlexAccount::sign_in(&username, &password, &client_identifier)?;
    println!("Signed in as {}.", account.username().unwrap_or(&username));

    let servers = account.servers()?;
    if servers.is_empty() {
        return Err(CatalogError::ServerNotFound("no media server on this account".into()).into());
    }

    let items: Vec<String> = servers
        .iter()
        .map(|s| match &s.product_version {
            Some(version) => format!("{} ({})", s.name, version),
            None => s.name.clone(),
        })
        .collect();
    let index = Select::new()
        .with_prompt("Select your Plex server")
        .items(&items)
        .default(0)
        .interact()
        .map_err(prompt_error)?;

    config.token = Some(account.token().to_string());
    config.server_name = Some(servers[index].name.clone());
    Ok(())
}

fn configure_download_dir(config: &mut Config) -> Result<()> {
    let current = config
        .download_path
        .clone()
        .unwrap_or_else(|| "~/Downloads".to_string());

    loop {
        let input: String = Input::new()
            .with_prompt("Download directory")
            .default(current.clone())
            .interact_text()
            .map_err(prompt_error)?;
        let path = expand_home(input.trim());

        if ensure_directory(&path)? {
            config.download_path = Some(path.display().to_string());
            return Ok(());
        }
    }
}

fn configure_media_path(config: &mut Config) -> Result<()> {
    let current = config
        .media_server_path
        .clone()
        .unwrap_or_else(|| "~/Media".to_string());

    loop {
        let input: String = Input::new()
            .with_prompt("Media server path (directory or rclone remote like nas:media, '-' for none)")
            .default(current.clone())
            .interact_text()
            .map_err(prompt_error)?;
        let input = input.trim();

        if input == "-" {
            config.media_server_path = None;
            return Ok(());
        }

        match Destination::parse(input) {
            Destination::Remote(remote) => {
                config.media_server_path = Some(remote);
                return Ok(());
            }
            Destination::Local(_) => {
                let path = expand_home(input);
                if ensure_directory(&path)? {
                    config.media_server_path = Some(path.display().to_string());
                    return Ok(());
                }
            }
        }
    }
}

/// Makes sure `path` is a directory, offering to create it
///
/// Returns `false` if the user should pick another path.
fn ensure_directory(path: &Path) -> Result<bool> {
    if path.is_dir() {
        return Ok(true);
    }
    if path.exists() {
        eprintln!("{} exists but is not a directory.", path.display());
        return Ok(false);
    }

    let create = Confirm::new()
        .with_prompt(format!("{} does not exist. Create it?", path.display()))
        .default(true)
        .interact()
        .map_err(prompt_error)?;
    if !create {
        return Ok(false);
    }

    fs::create_dir_all(path)?;
    Ok(true)
}
