use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oss_transfer::config;
use oss_transfer::oss::{ListOptions, OssApi, ProgressCallback};
use oss_transfer::utils::format_size;

/// Upload, download and list objects in OSS buckets / OSS对象存储命令行工具
#[derive(Parser, Debug)]
#[command(author, about, version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BUILD_TIME"), ")"))]
struct Cli {
    /// Config file (default: ./config.json) / 配置文件
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file / 上传文件
    Upload {
        bucket: String,
        object: String,
        file: PathBuf,
    },
    /// Download an object to a local file / 下载对象
    Download {
        bucket: String,
        object: String,
        dest: PathBuf,
    },
    /// List bucket content / 列出存储桶内容
    List {
        bucket: String,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        begins_with: Option<String>,
        #[arg(long)]
        start_at: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oss_transfer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration / 加载配置
    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let app_config = config::load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;
    let api = OssApi::new(&app_config).context("Failed to create OSS client")?;

    match cli.command {
        Command::Upload { bucket, object, file } => {
            let progress: ProgressCallback = Arc::new(|done: u64, total: u64| {
                tracing::info!("Uploaded {} of {}", format_size(done), format_size(total));
            });
            let result = api
                .upload_object_with_progress(&bucket, &object, &file, Some(progress))
                .await
                .with_context(|| format!("Failed to upload {:?} to {}/{}", file, bucket, object))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Download { bucket, object, dest } => {
            let written = api
                .download_object_to(&bucket, &object, &dest)
                .await
                .with_context(|| format!("Failed to download {}/{}", bucket, object))?;
            tracing::info!("Saved {} to {:?}", format_size(written), dest);
        }
        Command::List { bucket, limit, begins_with, start_at } => {
            let options = ListOptions { limit, begins_with, start_at };
            let content = api
                .list_objects(&bucket, &options)
                .await
                .with_context(|| format!("Failed to list bucket {}", bucket))?;
            for item in &content.items {
                println!("{}\t{}\t{}", item.object_key, item.size, item.object_id);
            }
            if let Some(next) = content.next {
                println!("next: {}", next);
            }
        }
    }

    Ok(())
}
