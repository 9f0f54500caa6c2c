//! audible-converter command line
//!
//! `serve` runs the web front-end; the other subcommands do one job each and
//! exit non-zero when it fails.

use anyhow::{bail, Context, Result};
use audible_converter::api::{Credentials, Locale};
use audible_converter::audio::{ConversionProgress, ConversionStage};
use audible_converter::discovery::{DiscoveryContext, DiscoveryResult, KeyPrompt, Method, ProvidedKey, TerminalPrompt};
use audible_converter::{ActivationBytes, ConverterConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "audible-converter")]
#[command(about = "Convert Audible audiobooks to MP3 and find activation bytes")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "AUDIBLE_CONVERTER_CONFIG")]
    config: Option<PathBuf>,

    /// Activation bytes file, overriding the configured one
    #[arg(long, global = true, env = "AUDIBLE_CONVERTER_KEY_FILE")]
    key_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web server
    Serve {
        /// Listen address
        #[arg(short, long, env = "AUDIBLE_CONVERTER_BIND")]
        bind: Option<String>,
    },

    /// Find activation bytes and save them
    Extract {
        #[arg(long, env = "AUDIBLE_EMAIL")]
        email: Option<String>,

        #[arg(long, env = "AUDIBLE_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// auto, cli, auth, browser, file or manual
        #[arg(short, long, default_value = "auto")]
        method: Method,

        /// Marketplace code (us, uk, de, ...)
        #[arg(short, long)]
        locale: Option<Locale>,

        /// Show the browser and log in by hand
        #[arg(long)]
        debug: bool,

        /// Hex device id for the player-auth-token callback
        #[arg(long)]
        player_id: Option<String>,

        /// Key for the manual method; prompts when missing
        #[arg(long)]
        activation_bytes: Option<String>,
    },

    /// Test a key against a local .aax file
    Verify { activation_bytes: ActivationBytes },

    /// Save a key for later conversions
    Save { activation_bytes: String },

    /// Print the saved key
    Load,

    /// List candidate keys found in local files
    Scan,

    /// Convert an .aax/.aa file to a ZIP of MP3 chunks
    Convert {
        input: PathBuf,

        /// Defaults to the saved key for .aax files
        #[arg(short, long)]
        activation_bytes: Option<ActivationBytes>,

        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audible_converter=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    info!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let mut config = ConverterConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(key_file) = cli.key_file {
        config.key_file = key_file;
    }

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            audible_converter::server::serve(config).await?;
        }

        Command::Extract {
            email,
            password,
            method,
            locale,
            debug,
            player_id,
            activation_bytes,
        } => {
            let ctx = DiscoveryContext {
                credentials: Credentials::from_parts(email.as_deref(), password.as_deref()),
                locale: match locale {
                    Some(locale) => locale,
                    None => config.locale()?,
                },
                debug: debug || config.debug_browser,
                player_id,
            };
            let prompt: Arc<dyn KeyPrompt> = match activation_bytes {
                Some(key) => Arc::new(ProvidedKey(Some(key))),
                None => Arc::new(TerminalPrompt),
            };

            let report = config.key_discovery(prompt).run(&ctx, method).await;
            for attempt in &report.attempts {
                println!("  [{:?}] {}: {}", attempt.status, attempt.method, attempt.detail);
            }
            match &report.result {
                DiscoveryResult::Success { activation_bytes } => {
                    println!("Activation bytes: {}", activation_bytes);
                }
                DiscoveryResult::Unverified { activation_bytes, reason } => {
                    println!("Activation bytes: {} (not verified: {})", activation_bytes, reason);
                }
                DiscoveryResult::Failure(failure) => {
                    println!("Suggestions:");
                    for suggestion in &report.suggestions {
                        println!("  - {}", suggestion);
                    }
                    bail!("{}", failure);
                }
            }
        }

        Command::Verify { activation_bytes } => {
            let outcome = config.validator().verify(&activation_bytes).await;
            println!("{}", outcome.message());
            if !outcome.is_verified() {
                bail!("activation bytes not verified ({})", outcome.label());
            }
        }

        Command::Save { activation_bytes } => {
            let store = config.key_store();
            let key = store.save_str(&activation_bytes)?;
            println!("Activation bytes saved: {} ({})", key, store.path().display());
        }

        Command::Load => {
            let key = config.key_store().load()?;
            println!("{}", key);
        }

        Command::Scan => {
            let candidates = config.file_scan().candidates().await?;
            if candidates.is_empty() {
                bail!("no activation bytes found in local files");
            }
            for candidate in candidates {
                println!("{}", candidate);
            }
        }

        Command::Convert {
            input,
            activation_bytes,
            output_dir,
        } => {
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            let summary = config
                .pipeline()
                .with_progress(Arc::new(print_progress))
                .convert_file(&input, activation_bytes.as_ref())
                .await
                .with_context(|| format!("Failed to convert {}", input.display()))?;
            println!(
                "{} chunks, {:.2} MB -> {}",
                summary.total_chunks,
                summary.total_size_mb,
                config.output_dir.join(&summary.zip_name).display()
            );
        }
    }

    Ok(())
}

/// One stderr line per stage change or finished chunk
fn print_progress(progress: ConversionProgress) {
    match progress.stage {
        ConversionStage::Splitting if progress.chunks_total > 0 => eprintln!(
            "  chunk {}/{} ({:.0}%)",
            progress.chunks_done,
            progress.chunks_total,
            progress.as_fraction() * 100.0
        ),
        ConversionStage::Failed => eprintln!(
            "  failed after {:.1}s: {}",
            progress.elapsed.as_secs_f64(),
            progress.error_message.as_deref().unwrap_or("unknown error")
        ),
        stage => eprintln!("  {:?} ({:.1}s)", stage, progress.elapsed.as_secs_f64()),
    }
}
