use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use rustmemodb_record::{MemoryStore, MigrationScripts, ShadowMigrator, TableName};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "audit-tool")]
#[command(about = "Developer tooling for audit shadow-table scripts")]
struct Cli {
    /// Log every step at DEBUG
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the migrations a shadow table at `--from` still needs
    Plan {
        #[arg(long)]
        scripts: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        from: u32,
    },
    /// Print every script rendered for one source table
    Render {
        #[arg(long)]
        scripts: Option<PathBuf>,
        #[arg(long)]
        table: String,
        #[arg(long)]
        schema: Option<String>,
        #[arg(long, default_value = "audit_")]
        prefix: String,
    },
    /// Apply the full set twice against an in-memory store
    Check {
        #[arg(long)]
        scripts: Option<PathBuf>,
        #[arg(long, default_value = "audit_check")]
        table: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Plan { scripts, from } => {
            let scripts = load_scripts(scripts.as_deref()).await?;
            plan(&scripts, from);
            Ok(())
        }
        Command::Render {
            scripts,
            table,
            schema,
            prefix,
        } => {
            let scripts = load_scripts(scripts.as_deref()).await?;
            let shadow = match schema {
                Some(schema) => TableName::qualified(schema, format!("{}{}", prefix, table)),
                None => TableName::new(format!("{}{}", prefix, table)),
            };
            render(&scripts, &shadow);
            Ok(())
        }
        Command::Check { scripts, table } => {
            let scripts = load_scripts(scripts.as_deref()).await?;
            check(scripts, &TableName::parse(&table)).await
        }
    }
}

async fn load_scripts(dir: Option<&Path>) -> Result<MigrationScripts> {
    match dir {
        Some(dir) => MigrationScripts::from_dir(dir)
            .await
            .with_context(|| format!("Failed to load scripts from '{}'", dir.display())),
        None => Ok(MigrationScripts::embedded()),
    }
}

fn plan(scripts: &MigrationScripts, from: u32) {
    let target = scripts.target_version();
    let pending: Vec<u32> = scripts.pending(from, target).map(|(v, _)| v).collect();
    if pending.is_empty() {
        println!("Up to date at version {} (target {})", from, target);
        return;
    }
    println!("Version {} -> {}:", from, target);
    for version in pending {
        println!("  {}.sql", version);
    }
}

fn render(scripts: &MigrationScripts, shadow: &TableName) {
    println!("-- base");
    println!("{}", MigrationScripts::render(scripts.base(), shadow).trim_end());
    let target = scripts.target_version();
    for (version, sql) in scripts.pending(0, target) {
        println!("-- {}", version);
        println!("{}", MigrationScripts::render(sql, shadow).trim_end());
    }
}

async fn check(scripts: MigrationScripts, shadow: &TableName) -> Result<()> {
    let store = MemoryStore::new();
    let scripts = Arc::new(scripts);
    let registry = TableName::new(rustmemodb_record::config::DEFAULT_REGISTRY_TABLE);

    // Two migrators share the store but not their memo, like two processes.
    let first = ShadowMigrator::new(Arc::new(store.clone()), registry.clone(), scripts.clone());
    let second = ShadowMigrator::new(Arc::new(store.clone()), registry, scripts.clone());
    let v1 = first.ensure(shadow).await?;
    let v2 = second.force(shadow).await?;
    if v1 != v2 || v2 != scripts.target_version() {
        return Err(anyhow!(
            "Versions disagree: first run {}, second run {}, target {}",
            v1,
            v2,
            scripts.target_version()
        ));
    }

    let table = store.table(shadow).await?;
    println!("{} at version {}", shadow, v2);
    for column in table.schema().columns() {
        let null = if column.nullable { "" } else { " NOT NULL" };
        println!("  {} {}{}", column.name, column.data_type, null);
    }
    println!("marker: {}", table.comment().unwrap_or("<none>"));
    Ok(())
}
