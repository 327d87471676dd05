//! `rollcall` command line: take attendance from the camera and inspect or
//! sync the recorded attendance.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::Gallery;
use rollcall_hw::Camera;
use rollcall_store::AttendanceStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod preview;
mod roster;

use config::Config;
use engine::{SessionEnd, SessionParams, SessionResources};
use roster::ClassRoster;

#[derive(Parser)]
#[command(name = "rollcall", about = "Classroom attendance by face recognition")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take attendance from the camera until Ctrl-C
    Take {
        /// Class code from the roster (e.g., "IF101")
        #[arg(short, long)]
        class: String,
        /// Meeting number
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
        meeting: u32,
        /// Class PIN
        #[arg(short, long)]
        pin: String,
    },
    /// List attendance records of a class
    Records {
        #[arg(short, long)]
        class: String,
        /// Only this meeting
        #[arg(short, long)]
        meeting: Option<u32>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Mark pending records as synced
    Sync {
        /// Only this class (default: every class)
        #[arg(short, long)]
        class: Option<String>,
    },
    /// List classes with attendance totals
    Classes,
    /// Show enrolled gallery statistics
    Gallery,
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Take { class, meeting, pin } => take(&config, &class, meeting, &pin).await,
        Commands::Records {
            class,
            meeting,
            json,
        } => records(&config, &class, meeting, json),
        Commands::Sync { class } => sync(&config, class),
        Commands::Classes => classes(&config),
        Commands::Gallery => gallery(&config),
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
    }
}

fn open_store(config: &Config) -> Result<AttendanceStore> {
    AttendanceStore::open(&config.db_path)
        .with_context(|| format!("opening attendance database {}", config.db_path.display()))
}

async fn take(config: &Config, class_code: &str, meeting: u32, pin: &str) -> Result<()> {
    let roster = ClassRoster::load(&config.classes_path)?;
    let class = roster.authorize(class_code, pin)?.clone();

    let store = Arc::new(open_store(config)?);
    store.ensure_class(&class.class_code)?;
    let gallery = engine::load_gallery(&config.gallery_path);

    let resources = SessionResources {
        camera_device: config.camera_device.clone(),
        capture_size: (config.capture_width, config.capture_height),
        read_timeout: config.read_timeout(),
        warmup_frames: config.warmup_frames,
        scrfd_path: config.scrfd_model_path(),
        arcface_path: config.arcface_model_path(),
        font_path: config.font_path.clone(),
        settings: config.recognition(),
    };
    let params = SessionParams {
        class_code: class.class_code.clone(),
        class_name: class.class_name.clone(),
        meeting,
    };

    println!(
        "Taking attendance: {} ({}), meeting {}. Press Ctrl-C to finish.",
        class.class_name, class.class_code, meeting
    );

    let handle = engine::spawn_session(resources, gallery, Arc::clone(&store), params)?;
    let preview = tokio::spawn(preview::run_preview(
        handle.subscribe(),
        config.preview_path.clone(),
        preview::PREVIEW_REFRESH,
    ));

    let stop = handle.stop_flag();
    let mut session = tokio::task::spawn_blocking(move || handle.join());
    let report = tokio::select! {
        joined = &mut session => joined??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("stopping session");
            stop.store(true, Ordering::Relaxed);
            session.await??
        }
    };
    preview.await?;

    let finished = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    println!();
    println!("Session {} finished at {finished}", report.session_id);
    println!(
        "  frames: {} read, {} processed, {} faces",
        report.frames_read, report.frames_processed, report.faces_seen
    );
    println!("  newly recorded: {}", report.recorded.len());
    for (id, name) in &report.recorded {
        println!("    {name} ({id})");
    }
    println!("  already recorded: {}", report.already_recorded);
    if report.store_failures > 0 {
        println!("  storage failures: {}", report.store_failures);
    }
    if report.frame_errors > 0 {
        println!("  frames skipped on errors: {}", report.frame_errors);
    }
    match &report.end {
        SessionEnd::Stopped => {}
        SessionEnd::CameraFailed(e) => println!("  ended by camera failure: {e}"),
        SessionEnd::FrameRejected(e) => println!("  ended by unreadable frame: {e}"),
    }
    Ok(())
}

fn records(config: &Config, class_code: &str, meeting: Option<u32>, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let records = store.records(class_code, meeting)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No attendance records for {class_code}");
        return Ok(());
    }
    println!("{:>5}  {:<12}  {:<24}  {:>7}  {:<19}  status", "id", "nim", "name", "meeting", "timestamp");
    for r in &records {
        println!(
            "{:>5}  {:<12}  {:<24}  {:>7}  {:<19}  {}",
            r.id, r.identity_id, r.display_name, r.meeting, r.timestamp, r.status
        );
    }
    Ok(())
}

/// Class codes from the roster, or from the store's tables when the roster
/// cannot be read.
fn known_class_codes(config: &Config, store: &AttendanceStore) -> Result<Vec<String>> {
    match ClassRoster::load(&config.classes_path) {
        Ok(roster) => Ok(roster.classes().iter().map(|c| c.class_code.clone()).collect()),
        Err(e) => {
            tracing::warn!(error = %e, "class roster unavailable; using classes found in the database");
            Ok(store.classes()?)
        }
    }
}

fn sync(config: &Config, class: Option<String>) -> Result<()> {
    let store = open_store(config)?;
    let codes = match class {
        Some(code) => vec![code],
        None => known_class_codes(config, &store)?,
    };

    let mut total = 0;
    let mut failed = 0;
    for code in &codes {
        match store.sync_pending(code) {
            Ok(0) => {}
            Ok(updated) => {
                println!("{code}: {updated} record(s) synced");
                total += updated;
            }
            Err(e) => {
                tracing::warn!(class = %code, error = %e, "sync failed");
                println!("{code}: sync failed: {e}");
                failed += 1;
            }
        }
    }
    if total == 0 {
        println!("Nothing to sync");
    } else {
        println!("Sync complete: {total} record(s) synced");
    }
    if failed > 0 {
        anyhow::bail!("{failed} class(es) could not be synced");
    }
    Ok(())
}

fn classes(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let roster = ClassRoster::load(&config.classes_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "class roster unavailable");
        ClassRoster::default()
    });

    let mut codes: Vec<String> = roster.classes().iter().map(|c| c.class_code.clone()).collect();
    for code in store.classes()? {
        if !codes.contains(&code) {
            codes.push(code);
        }
    }

    println!("{:<10}  {:<28}  {:>7}  {:>7}  {:>6}  {:>8}  {:>8}", "class", "name", "records", "pending", "synced", "meetings", "students");
    for code in codes {
        let name = roster.find(&code).map(|c| c.class_name.as_str()).unwrap_or("-");
        let s = match store.summary(&code) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(class = %code, error = %e, "cannot summarize class");
                println!("{:<10}  {:<28}  error: {e}", code, name);
                continue;
            }
        };
        println!(
            "{:<10}  {:<28}  {:>7}  {:>7}  {:>6}  {:>8}  {:>8}",
            code, name, s.records, s.pending, s.synced, s.meetings, s.identities
        );
    }
    Ok(())
}

fn gallery(config: &Config) -> Result<()> {
    let gallery = Gallery::load(&config.gallery_path)?;
    println!("Gallery: {}", config.gallery_path.display());
    println!("  entries:    {}", gallery.len());
    println!("  identities: {}", gallery.identity_count());
    match gallery.dimension() {
        Some(dim) => println!("  dimension:  {dim}"),
        None => println!("  dimension:  -"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_continues_past_a_bad_class() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::with_data_dir(dir.path());
        std::fs::write(
            &config.classes_path,
            r#"{"classes": [
                {"class_code": "", "class_name": "Broken", "pin": "0"},
                {"class_code": "IF-101", "class_name": "Algorithms", "pin": "1234"}
            ]}"#,
        )
        .unwrap();
        {
            let store = open_store(&config).unwrap();
            assert!(store.record_attendance("IF-101", "S1", "Ann", 1).is_success());
        }

        assert!(sync(&config, None).is_err());
        let store = open_store(&config).unwrap();
        assert!(store.pending_ids("IF-101").unwrap().is_empty());
        assert!(classes(&config).is_ok());
    }
}
