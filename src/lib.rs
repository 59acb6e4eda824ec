pub mod cache;
pub mod cli;
pub mod logging;
pub mod manifest;
pub mod populate;
pub mod settings;
pub mod util;

use std::path::Path;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::{
    cache::{CacheKey, RecordStore, StreamedRecord, unix_now, weak_validator},
    cli::Command,
    populate::{BatchDriver, BatchReport, PopulationClient, PopulationRequest},
    settings::Settings,
};

pub async fn run(settings: Settings, command: Command) -> Result<()> {
    match command {
        Command::Populate {
            manifest,
            concurrency,
        } => {
            let requests = manifest::load_manifest(&manifest)?;
            let concurrency = concurrency.unwrap_or(settings.concurrency);
            populate(&settings, requests, concurrency).await
        }
        Command::PopulateFile {
            host,
            path,
            content_type,
            validator,
            file,
        } => {
            let request = PopulationRequest::file(host, path, content_type, file)
                .with_validator(validator.unwrap_or_default());
            populate(&settings, vec![request], 1).await
        }
        Command::WriteRecord {
            target,
            content_type,
            validator,
            weak_validator: weak,
            out_dir,
            body_file,
        } => {
            let key = target.key()?;
            let created_at = unix_now();
            let validator = if weak {
                weak_validator(created_at)
            } else {
                validator.unwrap_or_default()
            };
            let store = RecordStore::new(out_dir.unwrap_or_else(|| settings.record_dir.clone()));
            let written = store
                .write_streamed(
                    &key,
                    StreamedRecord {
                        created_at,
                        content_type: &content_type,
                        validator: &validator,
                        body_path: &body_file,
                    },
                )
                .await?;
            println!("{}", written.display());
            Ok(())
        }
        Command::InspectRecord { file } => inspect(&file).await,
        Command::Key { target } => {
            let key = target.key()?;
            info!(
                host = key.host(),
                path = key.path(),
                scheme = CacheKey::SCHEME,
                key = %key,
                "derived cache key"
            );
            println!("{key}");
            Ok(())
        }
    }
}

async fn populate(
    settings: &Settings,
    requests: Vec<PopulationRequest>,
    concurrency: usize,
) -> Result<()> {
    let client = PopulationClient::new(settings.client_config()?)?;
    info!(
        proxy = client.target(),
        entries = requests.len(),
        concurrency,
        "populating cache"
    );
    let report = BatchDriver::new(client, concurrency).run(requests).await;
    print_report(&report);

    let failed = report.failed().count();
    if failed > 0 {
        bail!("{failed} of {} cache entries failed to populate", report.len());
    }
    Ok(())
}

fn print_report(report: &BatchReport) {
    for result in &report.results {
        match &result.outcome {
            Ok(receipt) => println!(
                "stored  {}{} key={} status={} bytes={}",
                result.host,
                result.path,
                receipt.key,
                receipt.status.as_u16(),
                receipt.body_bytes
            ),
            Err(err) => {
                warn!(
                    host = %result.host,
                    path = %result.path,
                    outcome = err.outcome(),
                    error = %err,
                    "cache entry not populated"
                );
                println!("failed  {}{}: {err}", result.host, result.path);
            }
        }
    }
}

async fn inspect(file: &Path) -> Result<()> {
    let record = RecordStore::read_path(file).await?;
    info!(
        file = %file.display(),
        created_at = record.created_at,
        content_type = %record.content_type,
        validator = %record.validator,
        body_bytes = record.body.len(),
        "decoded cache record"
    );
    println!("created_at:   {}", record.created_at);
    println!("content_type: {}", record.content_type);
    println!(
        "validator:    {}",
        if record.validator.is_empty() {
            "(none)"
        } else {
            record.validator.as_str()
        }
    );
    println!("body_bytes:   {}", record.body.len());
    Ok(())
}
