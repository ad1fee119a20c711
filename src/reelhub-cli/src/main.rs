use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use reelhub_core::{
    init_logging, AppDirs, CapabilityRegistry, Config, InstalledPlugins, PackageStore,
    PluginDescriptor, ResumeStore,
};
use reelhub_plugin::{CatalogClient, PluginLoader, SidecarSupervisor};
use reelhub_search::{Orchestrator, SearchStatus};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(name = "reelhub", version, about = "Plugin-driven streaming catalog host")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the plugins published by a repository (defaults to the configured ones)
    Repo { url: Option<String> },
    /// List installed plugins
    Plugins,
    /// Install a plugin from a repository
    Install(PluginRef),
    /// Deactivate a plugin, keeping its record
    Uninstall { name: String },
    /// Drop the cached package and install a fresh download
    Reinstall(PluginRef),
    /// Re-activate a previously installed plugin
    Enable { name: String },
    /// Uninstall and remove all traces of a plugin
    Forget { name: String },
    /// Search every active plugin
    Search {
        query: String,
        /// Restrict the search to these plugins
        #[arg(long = "provider")]
        providers: Vec<String>,
        /// Only query plugins advertising quick search
        #[arg(long)]
        quick: bool,
    },
    /// Load the detail page of a search result
    Load { provider: String, url: String },
    /// Resume position bookkeeping
    #[command(subcommand)]
    Resume(ResumeCommand),
    /// Foreign-runtime sidecar control
    #[command(subcommand)]
    Sidecar(SidecarCommand),
}

#[derive(Debug, Args, Clone)]
struct PluginRef {
    /// Internal name (or display name) of the plugin
    name: String,
    /// Repository URL (defaults to the first configured repository)
    #[arg(long)]
    repo: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ResumeCommand {
    /// Show the stored position for a content id
    Get { id: String },
    /// Record a position
    Set {
        id: String,
        position: u64,
        #[arg(default_value_t = 0)]
        duration: u64,
        #[arg(long, default_value = "")]
        label: String,
    },
    /// Forget the stored position
    Clear { id: String },
    /// List all stored positions
    List,
}

#[derive(Debug, Subcommand)]
enum SidecarCommand {
    /// Probe the sidecar health endpoint
    Status,
    /// Run the sidecar in the foreground until interrupted
    Run,
    /// List plugins currently loaded in the sidecar
    Plugins,
}

#[derive(Debug, Error)]
enum SelectionError {
    #[error("no repository given and none configured; pass --repo or add repositories to config.toml")]
    NoRepository,
    #[error("plugin '{name}' is not published by {repo}")]
    NotInCatalog { name: String, repo: String },
}

impl PluginRef {
    fn repository(&self, config: &Config) -> Result<String, SelectionError> {
        self.repo
            .clone()
            .or_else(|| config.repositories.first().cloned())
            .ok_or(SelectionError::NoRepository)
    }
}

/// Exact internal-name match first, then a case-insensitive display-name match.
fn find_descriptor<'a>(
    descriptors: &'a [PluginDescriptor],
    name: &str,
) -> Option<&'a PluginDescriptor> {
    descriptors
        .iter()
        .find(|d| d.internal_name == name)
        .or_else(|| descriptors.iter().find(|d| d.name.eq_ignore_ascii_case(name)))
}

struct App {
    config: Config,
    catalog: CatalogClient,
    loader: PluginLoader,
    sidecar: Arc<SidecarSupervisor>,
    orchestrator: Orchestrator,
    resume: ResumeStore,
}

impl App {
    fn new(dirs: &AppDirs, config: Config) -> Result<Self> {
        let registry = Arc::new(CapabilityRegistry::new());
        let catalog = CatalogClient::new()?;
        let sidecar = Arc::new(SidecarSupervisor::new(
            config.sidecar.clone(),
            dirs.sidecar_dir(),
        )?);
        let loader = PluginLoader::new(
            Arc::clone(&registry),
            PackageStore::new(dirs.plugins_dir()),
            Arc::new(InstalledPlugins::open(dirs.data_dir())),
            Arc::new(catalog.clone()),
        )
        .with_sidecar(Arc::clone(&sidecar));
        let orchestrator = Orchestrator::new(registry, config.search.clone());

        Ok(Self {
            resume: ResumeStore::open(dirs.data_dir()),
            config,
            catalog,
            loader,
            sidecar,
            orchestrator,
        })
    }

    async fn descriptor(&self, plugin: &PluginRef) -> Result<PluginDescriptor> {
        let repo = plugin.repository(&self.config)?;
        let descriptors = self.catalog.fetch_descriptors(&repo).await?;
        let descriptor = find_descriptor(&descriptors, &plugin.name)
            .cloned()
            .ok_or_else(|| SelectionError::NotInCatalog {
                name: plugin.name.clone(),
                repo,
            })?;
        Ok(descriptor)
    }

    async fn restore(&self) {
        for (name, err) in self.loader.restore_enabled().await {
            eprintln!("warning: plugin '{name}' not available ({} stage): {err}", err.stage());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = AppDirs::discover()?;
    let config = Config::load_or_default(&dirs)?;
    let _logging = init_logging(&config.logging, &dirs)?;
    tracing::debug!(config_dir = %dirs.config_dir().display(), "starting reelhub");

    let app = App::new(&dirs, config)?;
    let outcome = run(&app, cli.command).await;
    app.sidecar.stop().await;
    outcome
}

async fn run(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Repo { url } => {
            let repos = match url {
                Some(url) => vec![url],
                None => app.config.repositories.clone(),
            };
            if repos.is_empty() {
                return Err(SelectionError::NoRepository.into());
            }
            for repo in repos {
                let descriptors = app.catalog.fetch_descriptors(&repo).await?;
                println!("{repo} ({} plugins)", descriptors.len());
                for d in descriptors {
                    let status = if d.is_down() { " [down]" } else { "" };
                    println!("  {:<24} v{:<4} {}{}", d.internal_name, d.version, d.name, status);
                }
            }
        }
        Command::Plugins => print_installed(app),
        Command::Install(plugin) => {
            let descriptor = app.descriptor(&plugin).await?;
            app.loader.install(&descriptor).await?;
            println!("Installed {} (v{})", descriptor.internal_name, descriptor.version);
        }
        Command::Uninstall { name } => {
            app.loader.uninstall(&name).await?;
            println!("Uninstalled {name}");
        }
        Command::Reinstall(plugin) => {
            let descriptor = app.descriptor(&plugin).await?;
            app.loader.reinstall(&descriptor).await?;
            println!("Reinstalled {} (v{})", descriptor.internal_name, descriptor.version);
        }
        Command::Enable { name } => {
            app.loader.enable(&name).await?;
            println!("Enabled {name}");
        }
        Command::Forget { name } => {
            app.loader.forget(&name).await?;
            println!("Forgot {name}");
        }
        Command::Search {
            query,
            providers,
            quick,
        } => {
            app.restore().await;
            let outcome = if quick {
                app.orchestrator.quick_search(&query).await
            } else if providers.is_empty() {
                app.orchestrator.search(&query, None).await
            } else {
                app.orchestrator.search(&query, Some(providers.as_slice())).await
            };
            match outcome.status {
                SearchStatus::Idle => println!("Query too short."),
                SearchStatus::NoProviders => println!("No active plugins to search."),
                SearchStatus::AllFailed => println!("Every plugin failed to answer."),
                SearchStatus::Completed if outcome.merged.is_empty() => println!("No results."),
                SearchStatus::Completed => {
                    for result in &outcome.merged {
                        let year = result.year.map(|y| format!(" ({y})")).unwrap_or_default();
                        println!("[{}] {}{}\n    {}", result.provider_name, result.name, year, result.url);
                    }
                }
            }
            for failure in &outcome.errors {
                eprintln!("warning: {} failed: {}", failure.provider, failure.error);
            }
        }
        Command::Load { provider, url } => {
            app.restore().await;
            let detail = app.orchestrator.load(&url, &provider).await?;
            println!("{}", detail.name);
            if let Some(plot) = &detail.plot {
                println!("  {plot}");
            }
            if !detail.tags.is_empty() {
                println!("  tags: {}", detail.tags.join(", "));
            }
            for episode in &detail.episodes {
                let label = episode.name.as_deref().unwrap_or(&episode.data);
                match (episode.season, episode.episode) {
                    (Some(s), Some(e)) => println!("  S{s:02}E{e:02} {label}"),
                    (_, Some(e)) => println!("  E{e:02} {label}"),
                    _ => println!("  {label}"),
                }
            }
        }
        Command::Resume(cmd) => run_resume(&app.resume, cmd)?,
        Command::Sidecar(cmd) => run_sidecar(app, cmd).await?,
    }
    Ok(())
}

fn print_installed(app: &App) {
    let records = app.loader.installed();
    if records.is_empty() {
        println!("No plugins installed.");
        return;
    }
    for record in records {
        let state = if record.enabled { "enabled" } else { "disabled" };
        let kind = record.kind.map(|k| k.as_str()).unwrap_or("unknown");
        println!(
            "{:<24} v{:<4} {:<8} {:<15} {}",
            record.internal_name, record.version, state, kind, record.repository_url
        );
    }
}

fn run_resume(store: &ResumeStore, cmd: ResumeCommand) -> Result<()> {
    match cmd {
        ResumeCommand::Get { id } => match store.get(&id) {
            Some(entry) => println!(
                "{id}: {}s of {}s{}",
                entry.position_seconds,
                entry.duration_seconds,
                if entry.is_resumable() { "" } else { " (not resumable)" }
            ),
            None => println!("{id}: no stored position"),
        },
        ResumeCommand::Set {
            id,
            position,
            duration,
            label,
        } => store.upsert(&id, position, duration, &label)?,
        ResumeCommand::Clear { id } => store.clear(&id)?,
        ResumeCommand::List => {
            for (id, entry) in store.entries() {
                println!(
                    "{id}: {}s/{}s {}",
                    entry.position_seconds, entry.duration_seconds, entry.label
                );
            }
        }
    }
    Ok(())
}

async fn run_sidecar(app: &App, cmd: SidecarCommand) -> Result<()> {
    match cmd {
        SidecarCommand::Status => {
            let client = app.sidecar.client();
            match client.health().await {
                Ok(health) => println!(
                    "sidecar at {}: {} ({} plugins)",
                    client.base_url(),
                    health.status,
                    health.active_plugin_count
                ),
                Err(e) => println!("sidecar at {}: unreachable ({e})", client.base_url()),
            }
        }
        SidecarCommand::Run => {
            app.sidecar.start().await?;
            app.sidecar.ensure_healthy().await?;
            println!("sidecar {}; press Ctrl-C to stop", app.sidecar.state());
            tokio::signal::ctrl_c().await?;
        }
        SidecarCommand::Plugins => {
            for plugin in app.sidecar.client().loaded_plugins().await? {
                println!("{plugin}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(internal_name: &str, name: &str) -> PluginDescriptor {
        PluginDescriptor::from_record(&reelhub_core::InstalledPluginRecord {
            internal_name: internal_name.into(),
            name: name.into(),
            url: format!("https://cdn.example/{internal_name}"),
            version: 1,
            repository_url: "https://repo.example/repo.json".into(),
            kind: None,
            enabled: false,
        })
    }

    #[test]
    fn descriptor_lookup_prefers_internal_name() {
        let descriptors = vec![
            descriptor("films", "Cinema"),
            descriptor("cinema", "Films"),
        ];
        assert_eq!(
            find_descriptor(&descriptors, "films").unwrap().internal_name,
            "films"
        );
        assert_eq!(
            find_descriptor(&descriptors, "CINEMA").unwrap().internal_name,
            "films"
        );
        assert!(find_descriptor(&descriptors, "series").is_none());
    }

    #[test]
    fn repository_falls_back_to_config() {
        let plugin = PluginRef {
            name: "films".into(),
            repo: None,
        };
        let mut config = Config::default();
        assert!(matches!(
            plugin.repository(&config),
            Err(SelectionError::NoRepository)
        ));

        config.repositories = vec!["https://repo.example/repo.json".into()];
        assert_eq!(
            plugin.repository(&config).unwrap(),
            "https://repo.example/repo.json"
        );
    }

    #[test]
    fn explicit_repository_wins() {
        let plugin = PluginRef {
            name: "films".into(),
            repo: Some("https://other.example/repo.json".into()),
        };
        let mut config = Config::default();
        config.repositories = vec!["https://repo.example/repo.json".into()];
        assert_eq!(
            plugin.repository(&config).unwrap(),
            "https://other.example/repo.json"
        );
    }

    #[test]
    fn cli_parses_search_filters() {
        let cli = Cli::try_parse_from([
            "reelhub", "search", "dune", "--provider", "films", "--provider", "series",
        ])
        .unwrap();
        match cli.command {
            Command::Search {
                query,
                providers,
                quick,
            } => {
                assert_eq!(query, "dune");
                assert_eq!(providers, vec!["films", "series"]);
                assert!(!quick);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_resume_set_defaults() {
        let cli = Cli::try_parse_from(["reelhub", "resume", "set", "movie-1", "42"]).unwrap();
        match cli.command {
            Command::Resume(ResumeCommand::Set {
                id,
                position,
                duration,
                label,
            }) => {
                assert_eq!(id, "movie-1");
                assert_eq!(position, 42);
                assert_eq!(duration, 0);
                assert!(label.is_empty());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
