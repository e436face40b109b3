use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use schemavc::logging::{self, Profile};
use schemavc::store::validate_project_id;
use schemavc::timeline::{SnapshotTags, TagFailure};
use schemavc::{
    diff, AutoCommitOptions, ChangeStatus, Config, ConflictDetector, ConflictReport, DiffResult,
    DiffSummary, EnvironmentConfig, EnvironmentMapping, EnvironmentResolver, FsStore, Git,
    LocalOverride, ProjectMetadata, ResolvedEnvironment, Severity, SnapshotFile, SnapshotHistory,
    SnapshotStore, Timeline,
};
use serde::Serialize;
use std::io;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "schemavc")]
#[command(author, version, about = "Version control for database schema snapshots")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Home directory (default: $SCHEMAVC_HOME or ~/.schemavc)
    #[arg(long, global = true)]
    home: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a project with an empty snapshot
    Init {
        /// Project id (default: a new UUID)
        project: Option<String>,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Connection this project snapshots
        #[arg(long)]
        connection: Option<String>,
    },

    /// List projects in the store
    Projects,

    /// Diff two snapshot files; a missing file is an empty snapshot
    Diff { before: PathBuf, after: PathBuf },

    /// Commits that touched a project's snapshot, newest first
    Timeline {
        project: String,

        /// Maximum number of commits
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Compute a change summary for each commit
        #[arg(long)]
        summaries: bool,
    },

    /// Change summary of one commit against its parent
    Show { project: String, commit: String },

    /// Commit the current snapshot
    Commit {
        project: String,

        /// Commit message (default: generated from the diff)
        #[arg(short, long)]
        message: Option<String>,

        /// Tag the commit (placed under the reserved tag prefix)
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Reserved snapshot tags
    Tags { project: String },

    /// Branch to environment mappings
    Env {
        #[command(subcommand)]
        action: EnvCommand,
    },

    /// Structural conflicts a merge of TARGET into the current branch would cause
    Conflicts { project: String, target: String },

    /// Generate shell completions
    Completion { shell: Shell },
}

#[derive(Subcommand, Debug)]
enum EnvCommand {
    /// Show the committed mapping
    Show { project: String },

    /// Resolve the environment of the current branch
    Resolve { project: String },

    /// Map a branch to an environment
    Set {
        project: String,
        branch: String,
        environment: String,

        /// Shared connection URL for this branch
        #[arg(long)]
        connection: Option<String>,

        /// Mark the environment as production
        #[arg(long)]
        production: Option<bool>,
    },

    /// Remove a branch mapping
    Remove { project: String, branch: String },

    /// Set the default environment; omit the label to clear it
    Default {
        project: String,
        environment: Option<String>,
    },

    /// Machine-local connection override, never committed
    Local {
        project: String,

        #[arg(long)]
        connection: Option<String>,

        #[arg(long)]
        note: Option<String>,

        /// Remove the override
        #[arg(long, conflicts_with_all = ["connection", "note"])]
        clear: bool,
    },
}

struct Context {
    config: Config,
    store: FsStore,
    git: Git,
    json: bool,
}

impl Context {
    fn history(&self) -> SnapshotHistory<'_, Git, FsStore> {
        SnapshotHistory::new(&self.git, &self.store, self.config.versioning.clone())
    }

    fn resolver(&self) -> EnvironmentResolver<'_, Git, FsStore> {
        EnvironmentResolver::new(&self.git, &self.store)
            .with_fallback(self.config.environments.fallback.clone())
    }

    /// Print `value` as JSON, or hand it to the text renderer
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> schemavc::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text(value);
        }
        Ok(())
    }
}

fn main() {
    let cli = Cli::parse();

    let profile = if cli.log_json {
        Profile::Production
    } else {
        Profile::Development
    };
    logging::init(profile, cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> schemavc::Result<()> {
    if let Command::Completion { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "schemavc", &mut io::stdout());
        return Ok(());
    }

    let config = Config::load();
    let home = cli.home.unwrap_or_else(Config::home_dir);
    let ctx = Context {
        store: FsStore::new(config.projects_dir(&home), config.local_dir(&home)),
        git: Git::new(),
        config,
        json: cli.json,
    };

    match cli.command {
        Command::Init {
            project,
            name,
            connection,
        } => init(&ctx, project, name, connection),
        Command::Projects => {
            let projects = ctx.store.list_projects()?;
            ctx.emit(&projects, |projects| {
                if projects.is_empty() {
                    println!("No projects in {}", ctx.store.projects_dir().display());
                }
                for id in projects {
                    println!("{}", id);
                }
            })
        }
        Command::Diff { before, after } => {
            let before = SnapshotFile::load(&before);
            let after = SnapshotFile::load(&after);
            let result = diff(before.as_ref(), after.as_ref());
            ctx.emit(&result, print_diff)
        }
        Command::Timeline {
            project,
            limit,
            summaries,
        } => {
            let limit = limit.unwrap_or(ctx.config.versioning.timeline_limit);
            let history = ctx.history();
            let timeline = if summaries {
                history.timeline_with_summaries(&project, limit)
            } else {
                history.timeline(&project, limit)
            };
            ctx.emit(&timeline, print_timeline)
        }
        Command::Show { project, commit } => {
            let summary = ctx.history().commit_summary(&project, &commit);
            ctx.emit(&summary, |summary| match summary {
                Some(summary) => println!("{} {}", commit.yellow(), describe(summary)),
                None => println!("{} not found in the history of {}", commit, project),
            })
        }
        Command::Commit {
            project,
            message,
            tag,
        } => {
            let options = AutoCommitOptions { message, tag };
            let committed = ctx.history().auto_commit(&project, options)?;
            ctx.emit(&committed, |committed| {
                println!(
                    "{} {} {}",
                    "Committed".green(),
                    short(&committed.hash).yellow(),
                    committed.message
                );
                if let Some(tag) = &committed.tag {
                    println!("{} {}", "Tagged".green(), tag.cyan());
                }
                if let Some(error) = &committed.tag_error {
                    eprintln!("{} tag was not created: {}", "Warning:".yellow().bold(), error);
                }
            })
        }
        Command::Tags { project } => {
            let tags = ctx.history().snapshot_tags(&project);
            ctx.emit(&tags, print_tags)
        }
        Command::Env { action } => env(&ctx, action),
        Command::Conflicts { project, target } => {
            let detector =
                ConflictDetector::new(&ctx.git, &ctx.store, ctx.config.versioning.clone());
            let report = detector.detect_conflicts(&project, &target);
            ctx.emit(&report, print_conflicts)
        }
        Command::Completion { .. } => Ok(()),
    }
}

fn init(
    ctx: &Context,
    project: Option<String>,
    name: Option<String>,
    connection: Option<String>,
) -> schemavc::Result<()> {
    let id = project.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    validate_project_id(&id)?;
    let existed = ctx.store.get_project_metadata(&id).is_some();

    let mut metadata = ProjectMetadata::new(&id);
    metadata.name = name;
    metadata.connection_id = connection;
    ctx.store.create_project(&metadata)?;

    // Report what is on disk; an existing project keeps its metadata
    let metadata = ctx.store.get_project_metadata(&id).unwrap_or(metadata);
    let dir = ctx.store.project_dir(&id);
    ctx.emit(&metadata, |metadata| {
        if existed {
            println!("{} {} already exists", "Project".yellow(), metadata.id);
        } else {
            println!("   {} {}", "Creating".green(), dir.display());
            println!("\n{} {}", "Project initialized:".green().bold(), metadata.id);
        }
    })
}

fn env(ctx: &Context, action: EnvCommand) -> schemavc::Result<()> {
    let resolver = ctx.resolver();
    match action {
        EnvCommand::Show { project } => ctx.emit(&resolver.get_config(&project), print_env_config),
        EnvCommand::Resolve { project } => ctx.emit(&resolver.resolve(&project), print_resolved),
        EnvCommand::Set {
            project,
            branch,
            environment,
            connection,
            production,
        } => {
            let mapping = EnvironmentMapping {
                branch,
                environment,
                connection_url: connection,
                is_production: production,
            };
            ctx.emit(&resolver.set_mapping(&project, mapping)?, print_env_config)
        }
        EnvCommand::Remove { project, branch } => {
            let (config, removed) = resolver.remove_mapping(&project, &branch)?;
            if !removed && !ctx.json {
                println!("No mapping for branch {}", branch);
                return Ok(());
            }
            ctx.emit(&config, print_env_config)
        }
        EnvCommand::Default {
            project,
            environment,
        } => ctx.emit(&resolver.set_default(&project, environment)?, print_env_config),
        EnvCommand::Local {
            project,
            connection,
            note,
            clear,
        } => {
            let local = if clear {
                resolver.clear_local_override(&project)?;
                LocalOverride::default()
            } else {
                let local = LocalOverride {
                    connection_url: connection,
                    environment_note: note,
                };
                resolver.set_local_override(&project, &local)?;
                local
            };
            ctx.emit(&local, |local| {
                if local.is_empty() {
                    println!("{} local override", "Cleared".green());
                } else {
                    println!("{} local override (not committed)", "Saved".green());
                }
            })
        }
    }
}

fn short(hash: &str) -> &str {
    hash.get(..7).unwrap_or(hash)
}

fn describe(summary: &DiffSummary) -> String {
    if summary.has_changes {
        summary.describe()
    } else {
        "no structural changes".dimmed().to_string()
    }
}

fn status_marker(status: ChangeStatus) -> colored::ColoredString {
    match status {
        ChangeStatus::Added => "+".green(),
        ChangeStatus::Removed => "-".red(),
        ChangeStatus::Modified => "~".yellow(),
        ChangeStatus::Unchanged => " ".normal(),
    }
}

fn print_diff(result: &DiffResult) {
    for schema in &result.schemas {
        for table in schema.tables.iter().filter(|t| t.status.is_change()) {
            println!(
                "{} {}.{}",
                status_marker(table.status),
                schema.name,
                table.name.bold()
            );
            for column in table.changed_columns() {
                let attributes: Vec<&str> = column
                    .changed_attributes
                    .iter()
                    .map(|a| a.as_str())
                    .collect();
                if attributes.is_empty() {
                    println!("    {} {}", status_marker(column.status), column.name);
                } else {
                    println!(
                        "    {} {} ({})",
                        status_marker(column.status),
                        column.name,
                        attributes.join(", ").dimmed()
                    );
                }
            }
        }
    }
    println!("{}", describe(&result.summary));
}

fn print_tag_failures(failures: &[TagFailure]) {
    for failure in failures {
        eprintln!(
            "{} skipped tag {}: {}",
            "Warning:".yellow().bold(),
            failure.tag,
            failure.reason
        );
    }
}

fn print_timeline(timeline: &Timeline) {
    if timeline.entries.is_empty() {
        println!("No snapshot history");
    }
    for entry in &timeline.entries {
        let date = chrono::DateTime::parse_from_rfc3339(&entry.date)
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|_| entry.date.clone());
        let mut line = format!(
            "{} {} {}",
            entry.short_hash.yellow(),
            date.dimmed(),
            entry.subject
        );
        if !entry.tags.is_empty() {
            line.push_str(&format!(" {}", format!("({})", entry.tags.join(", ")).cyan()));
        }
        if entry.is_auto_commit {
            line.push_str(&format!(" {}", "[snapshot]".dimmed()));
        }
        println!("{}", line);
        if let Some(summary) = &entry.summary {
            println!("        {}", describe(summary));
        }
    }
    print_tag_failures(&timeline.unresolved_tags);
}

fn print_tags(tags: &SnapshotTags) {
    if tags.tags.is_empty() {
        println!("No snapshot tags");
    }
    for tag in &tags.tags {
        println!("{} {}", short(&tag.commit).yellow(), tag.name.cyan());
    }
    print_tag_failures(&tags.unresolved);
}

fn print_env_config(config: &EnvironmentConfig) {
    if config.mappings.is_empty() {
        println!("No branch mappings");
    }
    for mapping in &config.mappings {
        let mut line = format!("{} -> {}", mapping.branch.bold(), mapping.environment.cyan());
        if mapping.is_production == Some(true) {
            line.push_str(&format!(" {}", "[production]".red()));
        }
        if let Some(url) = &mapping.connection_url {
            line.push_str(&format!(" {}", url.dimmed()));
        }
        println!("{}", line);
    }
    if let Some(default) = &config.default_environment {
        println!("default: {}", default.cyan());
    }
}

fn print_resolved(resolved: &ResolvedEnvironment) {
    let branch = resolved.branch.as_deref().unwrap_or("(no branch)");
    let mut environment = resolved.environment.cyan().bold().to_string();
    if resolved.is_production {
        environment.push_str(&format!(" {}", "[production]".red().bold()));
    }
    println!("{} -> {}", branch.bold(), environment);
    if let Some(url) = &resolved.connection_url {
        println!("connection: {} ({})", url, resolved.connection_source);
    }
    if let Some(note) = &resolved.local_note {
        println!("note: {}", note.dimmed());
    }
}

fn print_conflicts(report: &ConflictReport) {
    let current = report.current_branch.as_deref().unwrap_or("HEAD");
    println!("{} <- {}", current.bold(), report.target_branch.bold());

    for conflict in &report.conflicts {
        let severity = match conflict.severity {
            Severity::High => "high".red().bold(),
            Severity::Medium => "medium".yellow(),
            Severity::Low => "low".dimmed(),
        };
        println!("  [{}] {}", severity, conflict.description);
    }
    for path in &report.textual_conflicts {
        println!("  {} {}", "textual".magenta(), path);
    }

    if report.has_conflicts() {
        println!("{}", report.summary.yellow());
    } else {
        println!("{}", report.summary.green());
    }
}
