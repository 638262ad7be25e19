use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "reel",
    about = "Reel: tiered artifact storage, quota and backup maintenance",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Data directory (primary store and backups)
    #[arg(long, global = true, default_value = ".reel")]
    pub root: PathBuf,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show usage and health
    Status,
    /// Show usage plus the largest entries
    Stats,
    /// Per-key usage, largest first
    Usage(UsageArgs),
    /// Show what an optimization would reclaim
    Analyze,
    /// Run compression, deduplication and the stale sweep
    Optimize,
    /// Remove stale transient entries
    Cleanup,
    /// Manage metadata snapshots
    Backup(BackupArgs),
    /// Store an image file as an artifact of a project
    Store(StoreArgs),
    /// List a project's artifacts
    Artifacts(ArtifactsArgs),
}

#[derive(Args)]
pub struct UsageArgs {
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}

#[derive(Args)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub action: BackupAction,
}

#[derive(Subcommand)]
pub enum BackupAction {
    /// Snapshot the current metadata
    Create {
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(long, default_value = "manual")]
        kind: String,
    },
    /// List snapshots, newest first
    List,
    /// Restore a snapshot into the primary store
    Restore { id: String },
    /// Delete one or more snapshots
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Print or write a snapshot as JSON
    Export {
        id: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import a snapshot from an exported JSON file
    Import { file: PathBuf },
    /// Apply age and count retention
    Prune,
    /// Aggregate view of all snapshots
    Analysis,
}

#[derive(Args)]
pub struct StoreArgs {
    pub project: String,
    /// character, background or settingCut
    pub kind: String,
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ArtifactsArgs {
    pub project: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status() {
        let cli = Cli::try_parse_from(["reel", "status"]).unwrap();
        assert!(matches!(cli.command, Command::Status));
        assert_eq!(cli.root, PathBuf::from(".reel"));
    }

    #[test]
    fn parse_root_and_format() {
        let cli = Cli::try_parse_from(["reel", "--root", "/data", "--format", "json", "stats"]).unwrap();
        assert_eq!(cli.root, PathBuf::from("/data"));
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn parse_usage_limit() {
        let cli = Cli::try_parse_from(["reel", "usage", "-n", "5"]).unwrap();
        if let Command::Usage(args) = cli.command {
            assert_eq!(args.limit, 5);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_backup_create() {
        let cli = Cli::try_parse_from(["reel", "backup", "create", "-d", "before edit", "--kind", "scheduled"]).unwrap();
        if let Command::Backup(BackupArgs { action: BackupAction::Create { description, kind } }) = cli.command {
            assert_eq!(description, "before edit");
            assert_eq!(kind, "scheduled");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_backup_delete_requires_ids() {
        assert!(Cli::try_parse_from(["reel", "backup", "delete"]).is_err());
        let cli = Cli::try_parse_from(["reel", "backup", "delete", "a", "b"]).unwrap();
        if let Command::Backup(BackupArgs { action: BackupAction::Delete { ids } }) = cli.command {
            assert_eq!(ids, vec!["a", "b"]);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_store() {
        let cli = Cli::try_parse_from(["reel", "store", "p1", "character", "hero.png"]).unwrap();
        if let Command::Store(args) = cli.command {
            assert_eq!(args.project, "p1");
            assert_eq!(args.kind, "character");
            assert_eq!(args.file, PathBuf::from("hero.png"));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_verbose_after_subcommand() {
        let cli = Cli::try_parse_from(["reel", "cleanup", "--verbose"]).unwrap();
        assert!(cli.verbose);
    }
}
