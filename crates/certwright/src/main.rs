//! Certwright - Main entry point
//!
//! Runs one renewal scheduler per configured site until SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use certwright::{
    BackendRegistry, CertificateStore, ChallengeStore, DnsChallengePublisher, HickoryTxtResolver,
    HttpZoneClient, InstantAcmeClient, OrderOrchestrator, RenewalScheduler,
};
use certwright_common::{RetryPolicy, SiteName};
use certwright_config::{Config, SiteConfig};

/// Certwright - automated ACME certificate issuance and renewal
#[derive(Parser, Debug)]
#[command(name = "certwright")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "CERTWRIGHT_CONFIG", global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the renewal schedulers (default)
    Run,
    /// Validate configuration file and exit
    Check,
    /// Renew one site's certificate now
    Renew {
        /// Site name
        site: String,
    },
    /// Show the stored certificate of a site
    Show {
        /// Site name
        site: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let config_path = cli
        .config
        .as_deref()
        .context("No configuration file given (use --config or CERTWRIGHT_CONFIG)")?;
    info!("Loading configuration from: {}", config_path);
    let config = Config::from_file(config_path).context("Failed to load configuration file")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Check => check(&config, config_path),
        Commands::Renew { site } => renew(config, &site).await,
        Commands::Show { site } => show(&config, &site).await,
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

/// Validate, report warnings, fail on errors
fn validate(config: &Config) -> Result<()> {
    let result = config.validate();
    for warning in &result.warnings {
        warn!("{}", warning);
    }
    for error in &result.errors {
        error!("{}", error);
    }
    if !result.is_ok() {
        bail!(
            "Configuration validation failed with {} error(s)",
            result.errors.len()
        );
    }
    Ok(())
}

fn check(config: &Config, config_path: &str) -> Result<()> {
    validate(config)?;

    info!("Configuration test successful:");
    info!("  - {} site(s)", config.sites.len());
    info!("  - {} storage backend(s)", config.storage.backends.len());
    info!(
        "  - DNS-01 {}",
        if config.dns.is_some() { "enabled" } else { "disabled" }
    );

    println!(
        "certwright: configuration file {} test is successful",
        config_path
    );
    Ok(())
}

/// Everything the schedulers of all sites share
struct Engine {
    config: Config,
    store: CertificateStore,
    challenges: ChallengeStore,
    client: Arc<InstantAcmeClient>,
    dns: Option<Arc<DnsChallengePublisher>>,
}

impl Engine {
    fn new(config: Config) -> Result<Self> {
        let registry = BackendRegistry::from_config(&config.storage)
            .context("Failed to create store backends")?;
        let store = certificate_store(&config, &registry)?;
        let challenges = ChallengeStore::new(
            registry
                .fanout(&config.storage.challenge_backends)
                .context("Invalid challenge backends")?,
        );

        let client = Arc::new(InstantAcmeClient::new(
            config.account.directory_url(),
            config.account.email.as_str(),
            Arc::new(store.clone()),
        ));

        let dns = match config.dns {
            Some(ref dns) => {
                let zones = HttpZoneClient::from_config(dns).context("Invalid DNS zone API")?;
                let resolver = HickoryTxtResolver::new(&dns.nameservers);
                Some(Arc::new(DnsChallengePublisher::from_config(
                    dns,
                    Arc::new(zones),
                    Arc::new(resolver),
                )))
            }
            None => None,
        };

        Ok(Self {
            config,
            store,
            challenges,
            client,
            dns,
        })
    }

    fn scheduler(&self, site: &SiteConfig) -> Result<RenewalScheduler<InstantAcmeClient>> {
        let password = site
            .resolve_password()
            .with_context(|| format!("No PFX password for site '{}'", site.name))?;

        let mut orchestrator = OrderOrchestrator::new(self.client.clone(), self.challenges.clone())
            .with_validation(RetryPolicy::new(
                site.renewal.validation_retries,
                site.renewal.validation_delay(),
            ));
        if let Some(ref dns) = self.dns {
            orchestrator = orchestrator.with_dns(dns.clone());
        }

        Ok(RenewalScheduler::new(
            site,
            password,
            Arc::new(orchestrator),
            self.store.clone(),
        ))
    }

    fn site(&self, name: &str) -> Result<&SiteConfig> {
        self.config
            .site(name)
            .with_context(|| format!("Unknown site '{}'", name))
    }
}

fn certificate_store(config: &Config, registry: &BackendRegistry) -> Result<CertificateStore> {
    let accounts = registry
        .fanout(std::slice::from_ref(&config.account.backend))
        .context("Invalid account backend")?;
    let certificates = registry
        .fanout(&config.storage.certificate_backends)
        .context("Invalid certificate backends")?;
    Ok(CertificateStore::new(accounts, certificates))
}

async fn run(config: Config) -> Result<()> {
    validate(&config)?;
    let engine = Engine::new(config)?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let mut tasks = JoinSet::new();
    for site in &engine.config.sites {
        let scheduler = engine.scheduler(site)?;
        let cancel = cancel.clone();
        tasks.spawn(async move { scheduler.run(cancel).await });
    }
    info!(sites = tasks.len(), "Certwright started");

    let mut failed: Option<anyhow::Error> = None;
    while let Some(result) = tasks.join_next().await {
        let error = match result {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => anyhow::Error::new(e),
            Err(e) => anyhow::Error::new(e).context("Scheduler task panicked"),
        };
        // An unhandled renewal failure stops every site
        cancel.cancel();
        if failed.is_none() {
            failed = Some(error);
        }
    }

    match failed {
        Some(e) => Err(e.context("Renewal scheduler failed")),
        None => {
            info!("Shutdown complete");
            Ok(())
        }
    }
}

async fn renew(config: Config, site: &str) -> Result<()> {
    validate(&config)?;
    let engine = Engine::new(config)?;
    let scheduler = engine.scheduler(engine.site(site)?)?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    match scheduler
        .trigger(&cancel)
        .await
        .with_context(|| format!("Renewal of site '{}' failed", site))?
    {
        Some(certificate) => {
            println!(
                "certwright: renewed '{}' ({}), valid until {}",
                site, certificate.subject, certificate.not_after
            );
            Ok(())
        }
        None => bail!("A renewal of site '{}' is already running", site),
    }
}

async fn show(config: &Config, site: &str) -> Result<()> {
    let site_config = config
        .site(site)
        .with_context(|| format!("Unknown site '{}'", site))?;
    let password = site_config
        .resolve_password()
        .with_context(|| format!("No PFX password for site '{}'", site))?;
    let registry = BackendRegistry::from_config(&config.storage)
        .context("Failed to create store backends")?;
    let store = certificate_store(config, &registry)?;

    let certificate = store
        .load_certificate(&SiteName::new(site), &password)
        .await
        .with_context(|| format!("No certificate stored for site '{}'", site))?;

    println!("site:      {}", site);
    println!("subject:   {}", certificate.subject);
    println!("not after: {}", certificate.not_after);
    println!(
        "remaining: {} day(s)",
        certificate.remaining(Utc::now()).num_days()
    );
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM
async fn shutdown_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Received shutdown signal, initiating graceful shutdown");
    token.cancel();
}
