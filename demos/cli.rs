use clap::{Parser, Subcommand};
use mailwatch_rs::{
    detect_verification_code, Config, CountdownDisplay, EmailWatcher, Error, FreshnessPoller,
    MailApi, PollPhase, PollerOptions, SystemClipboard, TracingNotifier, WatchOptions,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "mailwatch",
    about = "Watch Outlook mailboxes on the dashboard API and pick up verification codes",
    arg_required_else_help = true
)]
struct Cli {
    #[arg(short, long, help = "TOML config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Dashboard API base URL")]
    base_url: Option<String>,

    #[arg(long, env = "MAILWATCH_API_KEY", help = "API key")]
    api_key: Option<String>,

    #[arg(long, help = "Proxy URL (optional)")]
    proxy: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll an account's inbox and report new mail until Ctrl+C
    Watch {
        #[arg(long)]
        account: String,
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long, help = "Do not copy detected codes to the clipboard")]
        no_copy: bool,
    },
    /// Show the newest verification code in an account's inbox
    Latest {
        #[arg(long)]
        account: String,
    },
    /// Detect a verification code in the given text
    Detect {
        #[arg(long, default_value = "")]
        subject: String,
        #[arg(long, default_value = "")]
        body: String,
    },
    /// Follow a batch job until it finishes
    Batch {
        #[arg(long)]
        job: String,
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    match cli.command {
        Commands::Detect { subject, body } => match detect_verification_code(&subject, &body) {
            Some(code) => println!("{code}"),
            None => println!("No verification code found."),
        },
        Commands::Latest { account } => {
            let api = MailApi::new(Some(config))?;
            match api.latest_verification_code(&account).await? {
                Some((email, code)) => {
                    println!("{code}");
                    println!("   Subject: {}", email.subject);
                    if let Some(from) = &email.from_email {
                        println!("   From: {from}");
                    }
                    if let Some(at) = email.received_at_utc() {
                        println!("   Received: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
                    }
                    println!("   {}", email.text());
                }
                None => println!("No verification code found."),
            }
        }
        Commands::Watch {
            account,
            interval,
            no_copy,
        } => {
            let api = MailApi::new(Some(config.clone()))?;
            let options = WatchOptions {
                poller: PollerOptions {
                    interval_secs: interval.unwrap_or(config.poll_interval_secs),
                    display: CountdownDisplay::default(),
                },
                auto_copy: config.auto_copy_codes && !no_copy,
            };
            let watcher = EmailWatcher::new(
                api.email_source(&account),
                Arc::new(TracingNotifier),
                Arc::new(SystemClipboard),
                options,
            );

            let outcome = watcher.refresh_now().await;
            println!("{} email(s) in {account} ({outcome:?})", watcher.emails().len());
            if !watcher.start() {
                println!("Nothing to watch.");
                return Ok(());
            }

            let mut status = watcher.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let s = status.borrow().clone();
                        if s.phase == PollPhase::Waiting {
                            tracing::debug!(remaining = s.remaining_secs, "next refresh");
                        }
                    }
                }
            }
            watcher.stop();
        }
        Commands::Batch { job, interval } => {
            let api = MailApi::new(Some(config))?;
            let poller = FreshnessPoller::builder(api.batch_source(&job))
                .interval_secs(interval)
                .on_new_items(|results| {
                    for r in results {
                        let state = if r.success { "ok" } else { "failed" };
                        println!(
                            "{}: {state} {}",
                            r.email,
                            r.message.as_deref().unwrap_or("")
                        );
                    }
                })
                .build();
            poller.seed(Vec::new());
            poller.start();

            let mut status = poller.subscribe();
            while status.changed().await.is_ok() {
                let source = poller.source();
                tracing::debug!(percent = source.last_percent(), "batch progress");
                if source.last_status().is_finished() {
                    break;
                }
            }
            poller.stop();
            println!(
                "Job {job}: {:?} ({}%)",
                poller.source().last_status(),
                poller.source().last_percent()
            );
        }
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<Config, Error> {
    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(url) = &cli.base_url {
        cfg.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(key) = &cli.api_key {
        cfg.api_key = Some(key.clone());
    }
    if let Some(proxy) = &cli.proxy {
        cfg.proxy_url = Some(proxy.clone());
    }
    Ok(cfg)
}
