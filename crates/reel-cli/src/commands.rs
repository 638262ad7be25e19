use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;

use reel_artifact::Metadata;
use reel_backup::{BackupKind, ImportOutcome, RestoreOutcome};
use reel_quota::{render_report, Health, StorageStatus};
use reel_sdk::{Reel, ReelConfig};
use reel_types::{ArtifactKind, BackupId, ProjectId};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let reel = open(&cli.root, cli.config.as_deref())?;
    let format = cli.format;
    match cli.command {
        Command::Status => cmd_status(&reel, format),
        Command::Stats => cmd_stats(&reel, format),
        Command::Usage(args) => cmd_usage(&reel, args, format),
        Command::Analyze => cmd_analyze(&reel, format),
        Command::Optimize => cmd_optimize(&reel, format),
        Command::Cleanup => cmd_cleanup(&reel, format),
        Command::Backup(args) => cmd_backup(&reel, args.action, format),
        Command::Store(args) => cmd_store(&reel, args, format),
        Command::Artifacts(args) => cmd_artifacts(&reel, args, format),
    }
}

fn open(root: &Path, config: Option<&Path>) -> anyhow::Result<Reel> {
    let config = match config {
        Some(path) => ReelConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ReelConfig::default(),
    };
    Reel::open_dir(root, config).with_context(|| format!("opening {}", root.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Unix milliseconds as a UTC date and time.
fn when(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn health_label(health: Health) -> colored::ColoredString {
    match health {
        Health::Healthy => health.to_string().green().bold(),
        Health::Warning => health.to_string().yellow().bold(),
        Health::Critical => health.to_string().red().bold(),
    }
}

fn print_status(status: &StorageStatus) {
    println!(
        "Storage: {} / {} ({:.1}%) {}",
        human_bytes(status.used_bytes).bold(),
        human_bytes(status.max_bytes),
        status.ratio * 100.0,
        health_label(status.health)
    );
    println!("  Available: {}", human_bytes(status.available_bytes));
    for r in &status.recommendations {
        println!("  {} {}", "→".cyan(), r.message);
    }
}

// ---- Quota ----

fn cmd_status(reel: &Reel, format: OutputFormat) -> anyhow::Result<()> {
    let status = reel.quota().storage_status()?;
    if format == OutputFormat::Json {
        return print_json(&status);
    }
    print_status(&status);
    if let Some(r) = reel.artifacts().recommendation()? {
        println!("  {} {}", "→".cyan(), r.message);
    }
    Ok(())
}

fn cmd_stats(reel: &Reel, format: OutputFormat) -> anyhow::Result<()> {
    let stats = reel.quota().storage_stats()?;
    let artifacts = reel.artifacts().stats()?;
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "storage": stats, "artifacts": artifacts }));
    }
    print_status(&stats.status);
    println!("Entries: {}", stats.item_count.to_string().bold());
    println!(
        "Artifacts: {} in {} projects ({} materialized, {} referenced, {})",
        artifacts.artifacts.to_string().bold(),
        artifacts.projects,
        artifacts.materialized.to_string().green(),
        artifacts.referenced.to_string().yellow(),
        human_bytes(artifacts.materialized_bytes)
    );
    if !artifacts.hot_projects.is_empty() {
        let hot: Vec<String> = artifacts.hot_projects.iter().map(ToString::to_string).collect();
        println!("Hot projects: {}", hot.join(", ").cyan());
    }
    if !stats.largest.is_empty() {
        println!("\nLargest entries:");
        for u in &stats.largest {
            println!("  {:>10}  {:>5.1}%  {}", human_bytes(u.bytes), u.percent, u.key);
        }
    }
    Ok(())
}

fn cmd_usage(reel: &Reel, args: UsageArgs, format: OutputFormat) -> anyhow::Result<()> {
    let usage: Vec<_> = reel.quota().detailed_usage()?.into_iter().take(args.limit).collect();
    if format == OutputFormat::Json {
        return print_json(&usage);
    }
    if usage.is_empty() {
        println!("Store is empty.");
    }
    for u in &usage {
        println!(
            "{:>10}  {:>5.1}%  {:<6} {:>5}  {}",
            human_bytes(u.bytes),
            u.percent,
            format!("{:?}", u.shape).to_lowercase(),
            u.item_count,
            u.key.bold()
        );
    }
    Ok(())
}

fn cmd_analyze(reel: &Reel, format: OutputFormat) -> anyhow::Result<()> {
    let analysis = reel.quota().analyze_optimization()?;
    if format == OutputFormat::Json {
        return print_json(&analysis);
    }
    print!("{}", render_report(&analysis));
    Ok(())
}

fn cmd_optimize(reel: &Reel, format: OutputFormat) -> anyhow::Result<()> {
    let report = reel.quota().execute_optimization();
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    let mark = if report.is_clean() { "✓".green().bold() } else { "!".yellow().bold() };
    println!("{mark} Optimization saved {}", human_bytes(report.saved_bytes).bold());
    println!(
        "  Compressed: {} entries ({})",
        report.compression.compressed_count,
        human_bytes(report.compression.saved_bytes)
    );
    println!(
        "  Deduplicated: {} entries ({})",
        report.deduplication.removed_count,
        human_bytes(report.deduplication.saved_bytes)
    );
    println!(
        "  Swept: {} stale entries ({})",
        report.cleanup.cleaned_count,
        human_bytes(report.cleanup.freed_bytes)
    );
    for e in &report.errors {
        println!("  {} {}", "error:".red(), e);
    }
    Ok(())
}

fn cmd_cleanup(reel: &Reel, format: OutputFormat) -> anyhow::Result<()> {
    let report = reel.quota().cleanup_storage()?;
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    println!(
        "{} Removed {} stale entries, freed {}",
        "✓".green().bold(),
        report.cleaned_count,
        human_bytes(report.freed_bytes).bold()
    );
    Ok(())
}

// ---- Backups ----

fn parse_backup_id(raw: &str) -> anyhow::Result<BackupId> {
    raw.parse().with_context(|| format!("invalid backup id {raw}"))
}

fn cmd_backup(reel: &Reel, action: BackupAction, format: OutputFormat) -> anyhow::Result<()> {
    let backups = reel.backups();
    match action {
        BackupAction::Create { description, kind } => {
            let kind: BackupKind = kind.parse().map_err(anyhow::Error::msg)?;
            let snapshot = backups.create_backup_of_kind(kind, &description)?;
            if format == OutputFormat::Json {
                return print_json(&snapshot.summary());
            }
            println!("{} Created {} backup {}", "✓".green().bold(), kind, snapshot.id.to_string().yellow());
            println!("  Items: {}, size {}", snapshot.item_count, human_bytes(snapshot.size_bytes));
        }
        BackupAction::List => {
            let list = backups.list_backups()?;
            if format == OutputFormat::Json {
                let summaries: Vec<_> = list.iter().map(|s| s.summary()).collect();
                return print_json(&summaries);
            }
            if list.is_empty() {
                println!("No backups.");
            }
            for s in &list {
                println!(
                    "{}  {:<9} {:>10}  {}  {}",
                    s.id.to_string().yellow(),
                    s.kind.to_string().cyan(),
                    human_bytes(s.size_bytes),
                    when(s.timestamp).dimmed(),
                    s.description
                );
            }
        }
        BackupAction::Restore { id } => {
            let outcome = backups.restore_backup(&parse_backup_id(&id)?)?;
            if format == OutputFormat::Json {
                print_json(&outcome)?;
            }
            match outcome {
                RestoreOutcome::Restored { keys, .. } => {
                    if format == OutputFormat::Text {
                        println!("{} Restored {} keys from {}", "✓".green().bold(), keys.len(), id.yellow());
                    }
                }
                RestoreOutcome::Failed { reason } => bail!("restore failed: {reason}"),
            }
        }
        BackupAction::Delete { ids } => {
            let ids = ids
                .iter()
                .map(|raw| parse_backup_id(raw))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let report = backups.delete_selected(&ids)?;
            if format == OutputFormat::Json {
                return print_json(&report);
            }
            println!(
                "{} Deleted {} backups, freed {}",
                "✓".green().bold(),
                report.deleted.len(),
                human_bytes(report.freed_bytes)
            );
            for e in &report.errors {
                println!("  {} {}", "error:".red(), e);
            }
        }
        BackupAction::Export { id, output } => {
            let Some(doc) = backups.export_backup(&parse_backup_id(&id)?)? else {
                bail!("backup {id} not found");
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, doc).with_context(|| format!("writing {}", path.display()))?;
                    println!("{} Exported {} to {}", "✓".green().bold(), id.yellow(), path.display());
                }
                None => println!("{doc}"),
            }
        }
        BackupAction::Import { file } => {
            let doc = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let outcome = backups.import_backup(&doc)?;
            if format == OutputFormat::Json {
                print_json(&outcome)?;
            }
            match outcome {
                ImportOutcome::Imported { id } => {
                    if format == OutputFormat::Text {
                        println!("{} Imported as {}", "✓".green().bold(), id.to_string().yellow());
                    }
                }
                ImportOutcome::Rejected { reason } => bail!("import rejected: {reason}"),
            }
        }
        BackupAction::Prune => {
            let report = backups.apply_retention()?;
            if format == OutputFormat::Json {
                return print_json(&report);
            }
            println!(
                "{} Pruned {} backups, freed {}",
                "✓".green().bold(),
                report.deleted.len(),
                human_bytes(report.freed_bytes)
            );
        }
        BackupAction::Analysis => {
            let analysis = backups.analysis()?;
            if format == OutputFormat::Json {
                return print_json(&analysis);
            }
            println!(
                "Backups: {} ({})",
                analysis.total_backups.to_string().bold(),
                human_bytes(analysis.total_bytes)
            );
            for (label, summary) in [
                ("Newest", &analysis.newest),
                ("Oldest", &analysis.oldest),
                ("Largest", &analysis.largest),
            ] {
                if let Some(s) = summary {
                    println!(
                        "  {label}: {} ({}, {})",
                        s.id.to_string().yellow(),
                        human_bytes(s.size_bytes),
                        when(s.timestamp)
                    );
                }
            }
            for (kind, count) in &analysis.count_by_kind {
                let bytes = analysis.bytes_by_kind.get(kind).copied().unwrap_or(0);
                println!("  {:<9} {count} ({})", kind.to_string().cyan(), human_bytes(bytes));
            }
        }
    }
    Ok(())
}

// ---- Artifacts ----

fn cmd_store(reel: &Reel, args: StoreArgs, format: OutputFormat) -> anyhow::Result<()> {
    let project = ProjectId::new(args.project.as_str())?;
    let kind: ArtifactKind = args.kind.parse()?;
    let data = std::fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let mut metadata = Metadata::new();
    if let Some(name) = args.file.file_name().and_then(|n| n.to_str()) {
        metadata.insert("fileName".into(), name.into());
    }
    let receipt = reel.artifacts().store_image(&project, kind, data, metadata)?;
    if format == OutputFormat::Json {
        return print_json(&receipt);
    }
    let tier = if receipt.materialized { "materialized".green() } else { "referenced".yellow() };
    println!(
        "{} Stored {} ({})",
        "✓".green().bold(),
        receipt.artifact_id.to_string().yellow(),
        tier
    );
    if receipt.demoted + receipt.evicted > 0 {
        println!("  Demoted: {}, evicted: {}", receipt.demoted, receipt.evicted);
    }
    for p in &receipt.deleted_projects {
        println!("  {} project {}", "deleted".red(), p);
    }
    Ok(())
}

fn cmd_artifacts(reel: &Reel, args: ArtifactsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let project = ProjectId::new(args.project.as_str())?;
    let artifacts = reel.artifacts().project_artifacts(&project)?;
    if format == OutputFormat::Json {
        let rows: Vec<_> = artifacts
            .iter()
            .map(|a| {
                serde_json::json!({
                    "id": a.id,
                    "kind": a.kind,
                    "mime": a.mime,
                    "materialized": a.is_materialized(),
                    "bytes": a.materialized_len(),
                    "createdAt": a.created_at,
                })
            })
            .collect();
        return print_json(&rows);
    }
    if artifacts.is_empty() {
        println!("No artifacts for {}.", project.to_string().bold());
    }
    for a in &artifacts {
        let tier = if a.is_materialized() {
            human_bytes(a.materialized_len()).green()
        } else {
            "ref".yellow()
        };
        println!(
            "{}  {:<11} {:<24} {:>10}  {}",
            a.id.short_id().yellow(),
            a.kind.to_string(),
            a.mime,
            tier,
            a.created_at.to_string().dimmed()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn timestamps_render_as_utc() {
        assert_eq!(when(0), "1970-01-01 00:00");
        assert_eq!(when(1_700_000_000_000), "2023-11-14 22:13");
        assert_eq!(when(u64::MAX), u64::MAX.to_string());
    }

    #[test]
    fn commands_run_against_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("hero.png");
        std::fs::write(&image, b"\x89PNG\r\n\x1a\nrest").unwrap();
        let root = dir.path().join("data");

        let run = |args: &[&str]| {
            let mut argv = vec!["reel", "--root", root.to_str().unwrap()];
            argv.extend_from_slice(args);
            run_command(<Cli as clap::Parser>::try_parse_from(argv).unwrap())
        };
        run(&["store", "p1", "character", image.to_str().unwrap()]).unwrap();
        run(&["artifacts", "p1"]).unwrap();
        run(&["status"]).unwrap();
        run(&["--format", "json", "stats"]).unwrap();
        run(&["backup", "create", "-d", "t"]).unwrap();
        run(&["backup", "list"]).unwrap();
        run(&["cleanup"]).unwrap();
        run(&["optimize"]).unwrap();
        assert!(run(&["backup", "restore", "not-a-uuid"]).is_err());
        assert!(run(&["store", "p1", "poster", image.to_str().unwrap()]).is_err());
    }
}
