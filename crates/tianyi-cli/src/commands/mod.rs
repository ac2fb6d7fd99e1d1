use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::PathBuf;
use tracing::debug;

use tianyi_config::{ConfigLoader, TianyiConfig, WarningSeverity};
use tianyi_core::{Role, TianyiError};
use tianyi_memory::MemoryManager;

mod graph;
mod memory;

/// Tianyi: hybrid conversational memory (buffer + vector store + knowledge graph)
#[derive(Parser)]
#[command(name = "tianyi", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to tianyi.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one dialogue turn
    Remember {
        text: String,
        /// Who said it: user or agent
        #[arg(short, long, default_value = "user")]
        role: Role,
    },
    /// Build the memory context for a query
    Recall {
        query: String,
        /// Maximum number of vector + graph items
        #[arg(short = 'k', long, conflicts_with = "max_tokens")]
        max_items: Option<usize>,
        /// Maximum estimated tokens of vector + graph items
        #[arg(short = 't', long)]
        max_tokens: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage knowledge graph entities
    Entity {
        #[command(subcommand)]
        action: EntityAction,
    },
    /// Manage knowledge graph relations
    Relation {
        #[command(subcommand)]
        action: RelationAction,
    },
    /// List the direct neighbors of an entity
    Neighbors {
        /// Entity id, name or alias
        entity: String,
        /// Only follow relations of this type
        #[arg(short = 't', long = "type")]
        relation_type: Option<String>,
    },
    /// Find paths between two entities
    Path {
        from: String,
        to: String,
        /// Maximum number of hops
        #[arg(short, long, default_value = "3")]
        depth: usize,
        /// Maximum number of paths to list
        #[arg(short = 'n', long, default_value = "5")]
        limit: usize,
    },
    /// Import a knowledge graph JSON file
    ImportGraph {
        file: PathBuf,
        /// Alias map JSON file ({"alias": "entity id"})
        #[arg(short, long)]
        aliases: Option<PathBuf>,
    },
    /// Delete vector records (or entities with --entity)
    Forget {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Treat ids as graph entity ids
        #[arg(long)]
        entity: bool,
    },
    /// Show memory statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Audit configuration
    Doctor,
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum EntityAction {
    /// Create or overwrite an entity
    Add {
        id: String,
        /// Entity type, e.g. person, song, concept
        #[arg(short = 't', long = "type")]
        entity_type: String,
        /// Display name (defaults to the id)
        #[arg(short, long)]
        name: Option<String>,
        /// Alternative name; repeatable
        #[arg(short, long)]
        alias: Vec<String>,
        /// Attributes as key=value pairs; repeatable
        #[arg(long, value_parser = parse_key_val)]
        attr: Vec<(String, String)>,
    },
    /// Show an entity found by id, name or alias
    Show { name: String },
}

#[derive(Subcommand)]
enum RelationAction {
    /// Create or overwrite a relation between two existing entities
    Add {
        from: String,
        #[arg(name = "type")]
        relation_type: String,
        to: String,
        /// Attributes as key=value pairs; repeatable
        #[arg(long, value_parser = parse_key_val)]
        attr: Vec<(String, String)>,
    },
}

/// Parse "key=value" CLI arguments.
fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// The memory as the CLI sees it: always checkpointed, so separate
/// invocations continue one conversation.
async fn open_manager(mut config: TianyiConfig) -> tianyi_core::Result<MemoryManager> {
    if config.memory.buffer.checkpoint_path.is_some() {
        config.memory.buffer.checkpoint = true;
    }
    debug!(
        vector = %config.memory.vector.backend,
        graph = %config.memory.graph.backend,
        checkpoint = config.memory.buffer.checkpoint,
        "opening memory"
    );
    MemoryManager::from_config(&config).await
}

impl Cli {
    pub async fn run(self) -> tianyi_core::Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(&config.logging.level)
        };
        init_tracing(log_level, &config.logging.format);

        match self.command {
            Commands::Remember { text, role } => {
                memory::cmd_remember(open_manager(config).await?, role, text).await
            }
            Commands::Recall {
                query,
                max_items,
                max_tokens,
                json,
            } => {
                let manager = open_manager(config).await?;
                memory::cmd_recall(&manager, &query, max_items, max_tokens, json).await
            }
            Commands::Entity { action } => {
                let manager = open_manager(config).await?;
                match action {
                    EntityAction::Add {
                        id,
                        entity_type,
                        name,
                        alias,
                        attr,
                    } => graph::cmd_entity_add(&manager, id, entity_type, name, alias, attr).await,
                    EntityAction::Show { name } => graph::cmd_entity_show(&manager, &name).await,
                }
            }
            Commands::Relation {
                action:
                    RelationAction::Add {
                        from,
                        relation_type,
                        to,
                        attr,
                    },
            } => {
                let manager = open_manager(config).await?;
                graph::cmd_relation_add(&manager, from, relation_type, to, attr).await
            }
            Commands::Neighbors {
                entity,
                relation_type,
            } => {
                let manager = open_manager(config).await?;
                graph::cmd_neighbors(&manager, &entity, relation_type.as_deref()).await
            }
            Commands::Path {
                from,
                to,
                depth,
                limit,
            } => {
                let manager = open_manager(config).await?;
                graph::cmd_path(&manager, &from, &to, depth, limit).await
            }
            Commands::ImportGraph { file, aliases } => {
                let manager = open_manager(config).await?;
                graph::cmd_import_graph(&manager, &file, aliases.as_deref()).await
            }
            Commands::Forget { ids, entity } => {
                let manager = open_manager(config).await?;
                memory::cmd_forget(&manager, ids, entity).await
            }
            Commands::Stats { json } => {
                let manager = open_manager(config).await?;
                memory::cmd_stats(&manager, json).await
            }
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Doctor => Self::cmd_doctor(config),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    fn cmd_config(config: TianyiConfig, json: bool) -> tianyi_core::Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| TianyiError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_doctor(config: TianyiConfig) -> tianyi_core::Result<()> {
        println!("🩺 Tianyi Doctor — Configuration Audit");
        println!();

        let warnings = match config.validate() {
            Ok(w) => w,
            Err(e) => {
                println!("{e}");
                return Ok(());
            }
        };

        let mut warn_count = 0;
        let mut info_count = 0;
        for w in &warnings {
            println!("  {w}");
            match w.severity {
                WarningSeverity::Warning => warn_count += 1,
                WarningSeverity::Info => info_count += 1,
                WarningSeverity::Error => {}
            }
        }

        let memory = &config.memory;
        if memory.vector.backend == "memory" || memory.graph.backend == "memory" {
            println!("  💡 in-memory backends forget everything when the process exits");
            info_count += 1;
        }
        if memory.embedding.provider == "hash" {
            println!("  💡 hash embeddings only match on shared characters, not meaning");
            info_count += 1;
        }

        println!();
        println!("  ⚠️  {warn_count} warnings, 💡 {info_count} suggestions");
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> tianyi_core::Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "tianyi", &mut std::io::stdout());
        Ok(())
    }
}

/// Logs go to stderr so command output stays pipeable.
fn init_tracing(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        "json" => builder.json().with_target(true).init(),
        "compact" => builder.compact().with_target(false).init(),
        _ => builder.with_target(false).init(),
    }
}

/// Truncate a string to `max` characters, appending "..." if truncated.
fn truncate_output(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() <= max {
        flat
    } else {
        format!("{}...", flat.chars().take(max).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("summary=中文虚拟歌手").unwrap(),
            ("summary".to_string(), "中文虚拟歌手".to_string())
        );
        assert_eq!(parse_key_val("a=b=c").unwrap().1, "b=c");
        assert!(parse_key_val("novalue").is_err());
    }

    #[test]
    fn test_parse_recall_budget_flags() {
        let cli = Cli::try_parse_from(["tianyi", "recall", "洛天依是谁", "-k", "4"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Recall { max_items: Some(4), max_tokens: None, .. }
        ));
        assert!(Cli::try_parse_from(["tianyi", "recall", "q", "-k", "4", "-t", "100"]).is_err());
    }

    #[test]
    fn test_parse_remember_role() {
        let cli = Cli::try_parse_from(["tianyi", "remember", "你好", "--role", "agent"]).unwrap();
        assert!(matches!(cli.command, Commands::Remember { role: Role::Agent, .. }));
        assert!(Cli::try_parse_from(["tianyi", "remember", "x", "--role", "robot"]).is_err());
    }

    #[test]
    fn test_truncate_output_counts_chars() {
        assert_eq!(truncate_output("洛天依\n你好", 10), "洛天依 你好");
        assert_eq!(truncate_output("洛天依你好", 3), "洛天依...");
    }
}
