use std::path::PathBuf;

use anyhow::Result;
use tempfile::TempDir;

use cachefill::{
    cache::{CacheEntry, CacheKey, RecordError, RecordStore, record},
    cli::{Command, KeyTarget},
    run,
    settings::Settings,
};

fn url_target(url: &str) -> KeyTarget {
    KeyTarget {
        url: Some(url.to_string()),
        host: None,
        path: None,
    }
}

#[tokio::test]
async fn write_record_command_names_file_after_key() -> Result<()> {
    let dir = TempDir::new()?;
    let body_path = dir.path().join("body.html");
    std::fs::write(&body_path, "<h1>Hello</h1>")?;
    let out_dir = dir.path().join("records");

    run(
        Settings::default(),
        Command::WriteRecord {
            target: url_target("http://example.com/test"),
            content_type: "text/html".to_string(),
            validator: None,
            weak_validator: true,
            out_dir: Some(out_dir.clone()),
            body_file: body_path,
        },
    )
    .await?;

    let key = CacheKey::derive("example.com", "/test")?;
    let written = out_dir.join(key.as_hex());
    let decoded = RecordStore::read_path(&written).await?;
    assert_eq!(decoded.content_type, "text/html");
    assert_eq!(decoded.validator, format!("w/{}", decoded.created_at));
    assert_eq!(&decoded.body[..], b"<h1>Hello</h1>");

    let store = RecordStore::new(&out_dir);
    assert_eq!(store.read(&key).await?, decoded);
    Ok(())
}

#[tokio::test]
async fn write_record_uses_settings_record_dir_by_default() -> Result<()> {
    let dir = TempDir::new()?;
    let body_path = dir.path().join("data.json");
    std::fs::write(&body_path, r#"{"id":123}"#)?;

    let settings = Settings {
        record_dir: dir.path().join("default-records"),
        ..Settings::default()
    };
    run(
        settings,
        Command::WriteRecord {
            target: KeyTarget {
                url: None,
                host: Some("example.com".to_string()),
                path: Some("/api/data".to_string()),
            },
            content_type: "application/json".to_string(),
            validator: Some("\"v1\"".to_string()),
            weak_validator: false,
            out_dir: None,
            body_file: body_path,
        },
    )
    .await?;

    let key = CacheKey::derive("example.com", "/api/data")?;
    let record = RecordStore::new(dir.path().join("default-records"))
        .read(&key)
        .await?;
    assert_eq!(record.validator, "\"v1\"");
    assert_eq!(record.content_type, "application/json");
    Ok(())
}

#[tokio::test]
async fn write_record_reports_missing_body_file() -> Result<()> {
    let dir = TempDir::new()?;
    let err = run(
        Settings::default(),
        Command::WriteRecord {
            target: url_target("http://example.com/missing"),
            content_type: "text/html".to_string(),
            validator: None,
            weak_validator: false,
            out_dir: Some(dir.path().to_path_buf()),
            body_file: PathBuf::from("/nonexistent/body.html"),
        },
    )
    .await
    .unwrap_err();
    assert!(format!("{err:#}").contains("failed to open body file"));
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn inspect_record_decodes_stored_entry() -> Result<()> {
    let dir = TempDir::new()?;
    let store = RecordStore::new(dir.path());
    let entry = CacheEntry::new("example.com", "/about", "text/html", "<p>about</p>")
        .with_created_at(1_700_000_000)
        .with_validator("w/1700000000");
    let path = store.write(&entry).await?;

    run(Settings::default(), Command::InspectRecord { file: path }).await?;
    Ok(())
}

#[tokio::test]
async fn inspect_record_rejects_truncated_file() -> Result<()> {
    let dir = TempDir::new()?;
    let entry = CacheEntry::new("example.com", "/about", "text/html", "<p>about</p>");
    let encoded = record::encode(&entry.record());
    let path = dir.path().join("truncated");
    std::fs::write(&path, &encoded[..encoded.len() - 3])?;

    let err = run(Settings::default(), Command::InspectRecord { file: path })
        .await
        .unwrap_err();
    let cause = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<RecordError>())
        .expect("record error in chain");
    assert!(cause.is_truncated());
    Ok(())
}

#[tokio::test]
async fn key_command_accepts_both_forms() -> Result<()> {
    run(
        Settings::default(),
        Command::Key {
            target: url_target("http://example.com/test"),
        },
    )
    .await?;

    let err = run(
        Settings::default(),
        Command::Key {
            target: KeyTarget {
                url: None,
                host: Some("  ".to_string()),
                path: Some("/".to_string()),
            },
        },
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("host"));
    Ok(())
}
