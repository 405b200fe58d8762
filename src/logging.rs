use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// stdout と `logs/<prefix>_<日時>.log` の両方に出力する subscriber を設定する
pub fn init(prefix: &str, level: Level) -> Result<PathBuf> {
    fs::create_dir_all("logs").context("failed to create logs/")?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = PathBuf::from(format!("logs/{}_{}.log", prefix, ts));
    let file = fs::File::create(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stdout.and(Mutex::new(file)))
        .with_max_level(level)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))?;

    eprintln!("Log: {}", path.display());
    Ok(path)
}
