//! Command-line uploader for slicedrop servers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use slicedrop_client::{HttpUploadApi, UploadEvent, Uploader, UploaderConfig};
use slicedrop_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENT, HashAlgorithm};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slicedrop")]
#[command(about = "Resumable chunked uploads to a slicedrop server")]
#[command(version)]
struct Cli {
    /// Server base URL
    #[arg(long, env = "SLICEDROP_SERVER", default_value = "http://127.0.0.1:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files, resuming anything the server already has
    Upload {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        options: UploadArgs,
    },
    /// Print the link of files already on the server
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Hash algorithm (md5 or sha256)
        #[arg(long, default_value = "md5")]
        algorithm: HashAlgorithm,
    },
}

#[derive(Args, Clone)]
struct UploadArgs {
    /// Chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Chunk uploads in flight at once
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT)]
    concurrency: usize,

    /// Retry rounds for failed chunks
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Per-chunk timeout in seconds (0 disables)
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Hash algorithm (md5 or sha256)
    #[arg(long, default_value = "md5")]
    algorithm: HashAlgorithm,
}

impl UploadArgs {
    fn uploader_config(&self) -> UploaderConfig {
        UploaderConfig {
            chunk_size: self.chunk_size,
            max_concurrent: self.concurrency,
            task_timeout: (self.timeout > 0).then(|| Duration::from_secs(self.timeout)),
            max_retries: self.retries,
            algorithm: self.algorithm,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let api = Arc::new(HttpUploadApi::new(&cli.server)?);

    match cli.command {
        Commands::Upload { files, options } => {
            let uploader = Uploader::new(api, options.uploader_config());
            for path in &files {
                upload(&uploader, &cli.server, path).await?;
            }
        }
        Commands::Check { files, algorithm } => {
            let uploader = Uploader::new(
                api,
                UploaderConfig {
                    algorithm,
                    ..UploaderConfig::default()
                },
            );
            for path in &files {
                let href = uploader
                    .check(path)
                    .await
                    .with_context(|| format!("checking {}", path.display()))?;
                match href {
                    Some(href) => println!(
                        "{}\t{}{href}",
                        path.display(),
                        cli.server.trim_end_matches('/')
                    ),
                    None => println!("{}\tnot uploaded", path.display()),
                }
            }
        }
    }
    Ok(())
}

async fn upload(uploader: &Uploader, server: &str, path: &Path) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel(256);
    let name = path.display().to_string();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                UploadEvent::Status(status) => eprintln!("{name}: {status:?}"),
                UploadEvent::Skipped { indices } => {
                    eprintln!("{name}: {} chunk(s) already on server", indices.len())
                }
                UploadEvent::ChunkFailed {
                    index,
                    attempt,
                    error,
                } => eprintln!("{name}: chunk {index} failed (attempt {attempt}): {error}"),
                UploadEvent::Progress(p) => eprintln!(
                    "{name}: {:.1}% ({}/{} chunks, {:.0} KiB/s)",
                    p.percentage(),
                    p.completed_chunks,
                    p.total_chunks,
                    p.bytes_per_second / 1024.0
                ),
                UploadEvent::Hashed { .. } | UploadEvent::ChunkUploaded { .. } => {}
            }
        }
    });

    let result = uploader
        .upload_file(path, tx)
        .await
        .with_context(|| format!("uploading {}", path.display()));
    printer.await?;

    let outcome = result?;
    let note = if outcome.instant { " (already on server)" } else { "" };
    println!(
        "{}\t{}{}{note}",
        path.display(),
        server.trim_end_matches('/'),
        outcome.href
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload_args(args: &[&str]) -> (Vec<PathBuf>, UploadArgs) {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Upload { files, options } => (files, options),
            Commands::Check { .. } => panic!("expected upload"),
        }
    }

    #[test]
    fn upload_defaults() {
        let (files, options) = upload_args(&["slicedrop", "upload", "a.bin", "b.bin"]);
        assert_eq!(files, vec![PathBuf::from("a.bin"), PathBuf::from("b.bin")]);

        let config = options.uploader_config();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.task_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.algorithm, HashAlgorithm::Md5);
    }

    #[test]
    fn upload_flags() {
        let cli = Cli::try_parse_from([
            "slicedrop",
            "--server",
            "http://uploads.local:8080",
            "upload",
            "--chunk-size",
            "1024",
            "--concurrency",
            "2",
            "--retries",
            "0",
            "--timeout",
            "0",
            "--algorithm",
            "sha256",
            "big.iso",
        ])
        .unwrap();
        assert_eq!(cli.server, "http://uploads.local:8080");
        let Commands::Upload { files, options } = cli.command else {
            panic!("expected upload");
        };
        assert_eq!(files, vec![PathBuf::from("big.iso")]);

        let config = options.uploader_config();
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.task_timeout, None);
        assert_eq!(config.algorithm, HashAlgorithm::Sha256);
    }

    #[test]
    fn check_parses_algorithm() {
        let cli =
            Cli::try_parse_from(["slicedrop", "check", "--algorithm", "sha256", "x.txt"]).unwrap();
        let Commands::Check { files, algorithm } = cli.command else {
            panic!("expected check");
        };
        assert_eq!(files, vec![PathBuf::from("x.txt")]);
        assert_eq!(algorithm, HashAlgorithm::Sha256);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(Cli::try_parse_from(["slicedrop", "upload"]).is_err());
        assert!(Cli::try_parse_from(["slicedrop", "check"]).is_err());
        assert!(Cli::try_parse_from(["slicedrop", "check", "--algorithm", "crc32", "x"]).is_err());
        assert!(Cli::try_parse_from(["slicedrop", "upload", "--chunk-size", "big", "x"]).is_err());
        assert!(Cli::try_parse_from(["slicedrop"]).is_err());
    }
}
