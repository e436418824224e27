use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod db;
mod flags;
mod models;
mod names;
mod report;
mod rules;
mod store;

use config::Config;
use db::{ImportKind, PgStore};
use models::{FlagCategory, FlagCondition, FlagRule, StudentRecord};
use names::NameCache;
use rules::RuleBook;
use store::StudentStore;

#[derive(Parser)]
#[command(name = "student-flags")]
#[command(about = "Student flag rules and name lookup for Group Scholar records", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage flag rules
    Rules {
        #[command(subcommand)]
        command: RuleCommand,
    },
    #[command(flatten)]
    Records(RecordCommand),
}

/// Commands that read or write the student records database.
#[derive(Subcommand)]
enum RecordCommand {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import students or records from a CSV file
    Import {
        #[arg(long, value_enum)]
        kind: ImportKind,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Evaluate active flag rules
    Flags {
        #[arg(long)]
        grade: Option<i32>,
        #[arg(long)]
        homeroom: Option<String>,
    },
    /// Generate a markdown flag report
    Report {
        #[arg(long)]
        grade: Option<i32>,
        #[arg(long)]
        homeroom: Option<String>,
        #[arg(long, default_value = "flag_report.md")]
        out: PathBuf,
    },
    /// Render a student's profile card
    Profile {
        #[arg(long)]
        name: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Look up one student by name or student number
    Find {
        #[arg(long)]
        name: String,
    },
    /// Search students by partial name
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Swap student names and identifiers in a piece of text
    #[command(group(
        ArgGroup::new("direction")
            .args(["to_ids", "to_names"])
            .required(true)
            .multiple(false)
    ))]
    Translate {
        #[arg(long)]
        to_ids: bool,
        #[arg(long)]
        to_names: bool,
        text: String,
    },
}

#[derive(Subcommand)]
enum RuleCommand {
    /// Show every rule
    List,
    /// Add a rule
    Add {
        #[arg(long)]
        name: String,
        /// attendance, grades, discipline or <subject>-assessment
        #[arg(long)]
        category: String,
        /// below, above or equals
        #[arg(long)]
        condition: String,
        #[arg(long)]
        threshold: f64,
        #[arg(long = "grade")]
        grades: Vec<i32>,
        #[arg(long = "homeroom")]
        homerooms: Vec<String>,
        #[arg(long, default_value = "#d97706")]
        color: String,
    },
    /// Delete a rule
    Remove { id: Uuid },
    /// Turn a rule on
    Enable { id: Uuid },
    /// Turn a rule off
    Disable { id: Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Rules { command } => run_rules(&cli.config.rules_path, command),
        Commands::Records(command) => run_with_db(&cli.config, command).await,
    }
}

fn run_rules(path: &Path, command: RuleCommand) -> anyhow::Result<()> {
    let mut book = RuleBook::load(path)?;

    match command {
        RuleCommand::List => {
            if book.rules.is_empty() {
                println!("No flag rules in {}.", path.display());
                return Ok(());
            }
            for rule in book.rules.iter() {
                println!(
                    "- {} {} ({} {} {}){}",
                    rule.id,
                    rule.name,
                    rule.category.as_str(),
                    rule.condition.as_str(),
                    rule.threshold,
                    if rule.active { "" } else { " [inactive]" }
                );
            }
            return Ok(());
        }
        RuleCommand::Add {
            name,
            category,
            condition,
            threshold,
            grades,
            homerooms,
            color,
        } => {
            let category = FlagCategory::from(category);
            if let FlagCategory::Unrecognized(label) = &category {
                anyhow::bail!("unknown flag category '{label}'");
            }
            let condition = FlagCondition::from(condition);
            if let FlagCondition::Unrecognized(label) = &condition {
                anyhow::bail!("unknown flag condition '{label}'");
            }
            let id = book.add(FlagRule {
                id: Uuid::new_v4(),
                name,
                category,
                condition,
                threshold,
                grades,
                homerooms,
                color,
                active: true,
            });
            println!("Added rule {id}.");
        }
        RuleCommand::Remove { id } => {
            let removed = book.remove(id)?;
            println!("Removed rule {} ({}).", removed.id, removed.name);
        }
        RuleCommand::Enable { id } => {
            book.set_active(id, true)?;
            println!("Enabled rule {id}.");
        }
        RuleCommand::Disable { id } => {
            book.set_active(id, false)?;
            println!("Disabled rule {id}.");
        }
    }

    book.save(path)?;
    Ok(())
}

async fn run_with_db(config: &Config, command: RecordCommand) -> anyhow::Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool);
    let mut names = NameCache::new(config.cache_ttl());

    match command {
        RecordCommand::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        RecordCommand::Seed => {
            db::seed(store.pool()).await?;
            println!("Seed data inserted.");
        }
        RecordCommand::Import { kind, csv } => {
            let inserted = db::import_csv(store.pool(), kind, &csv).await?;
            println!("Imported {inserted} rows from {}.", csv.display());
        }
        RecordCommand::Flags { grade, homeroom } => {
            let book = RuleBook::load(&config.rules_path)?;
            let students = scoped_students(&store, grade, homeroom.as_deref()).await?;
            let flags = flags::evaluate_rules(&store, &students, &book.rules).await;
            info!(
                students = students.len(),
                rules = book.active().count(),
                flagged = flags.len(),
                "evaluated flag rules"
            );

            if flags.is_empty() {
                println!("No students flagged.");
                return Ok(());
            }

            println!("Flagged students:");
            for flag in flags.iter() {
                println!(
                    "- {} ({}, grade {}) {}: {}",
                    flag.student.full_name(),
                    flag.student.homeroom,
                    flag.student.grade,
                    flag.rule.name,
                    flag.result.message
                );
            }
        }
        RecordCommand::Report {
            grade,
            homeroom,
            out,
        } => {
            let book = RuleBook::load(&config.rules_path)?;
            let students = scoped_students(&store, grade, homeroom.as_deref()).await?;
            let flags = flags::evaluate_rules(&store, &students, &book.rules).await;
            let scope = match (grade, homeroom.as_deref()) {
                (Some(grade), Some(room)) => Some(format!("grade {grade}, homeroom {room}")),
                (Some(grade), None) => Some(format!("grade {grade}")),
                (None, Some(room)) => Some(format!("homeroom {room}")),
                (None, None) => None,
            };
            let report = report::build_flag_report(
                scope.as_deref(),
                Utc::now().date_naive(),
                &flags,
                &book.rules,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        RecordCommand::Profile { name, out } => {
            let Some(student) = names.find_student_by_name(&store, &name).await? else {
                println!("No student matches '{name}'.");
                return Ok(());
            };
            let book = RuleBook::load(&config.rules_path)?;
            let flags =
                flags::evaluate_rules(&store, std::slice::from_ref(&student), &book.rules).await;
            let profile = report::load_profile(&store, &student).await?;
            let card = report::build_student_profile(&student, &profile, &flags);

            match out {
                Some(path) => {
                    std::fs::write(&path, card)?;
                    println!("Profile written to {}.", path.display());
                }
                None => print!("{card}"),
            }
        }
        RecordCommand::Find { name } => {
            let found = names.find_student_by_name(&store, &name).await?;
            match found.as_ref().and_then(|s| names.mapping(s.id).map(|m| (s, m))) {
                Some((student, mapping)) => println!(
                    "{} ({}, grade {}, student number {}) id {}",
                    mapping.full_name,
                    student.homeroom,
                    student.grade,
                    mapping.reference_number.as_deref().unwrap_or("n/a"),
                    mapping.student_id
                ),
                None => println!("No student matches '{name}'."),
            }
        }
        RecordCommand::Search { query, limit } => {
            let hits = names.search_students_by_name(&store, &query, limit).await?;
            if hits.is_empty() {
                println!(
                    "No matches among {} students.",
                    names.student_count()
                );
                return Ok(());
            }
            for hit in hits.iter() {
                println!(
                    "- {} ({}, grade {}) score {:.2}",
                    hit.student.full_name(),
                    hit.student.homeroom,
                    hit.student.grade,
                    hit.score
                );
            }
        }
        RecordCommand::Translate {
            to_ids,
            to_names: _,
            text,
        } => {
            if to_ids {
                let translation = names.translate_names_to_ids(&store, &text).await?;
                println!("{}", translation.text);
                for substitution in translation.substitutions.iter() {
                    info!(
                        original = %substitution.original,
                        student_id = %substitution.student_id,
                        name = %substitution.display_name,
                        "substituted student name"
                    );
                }
            } else {
                println!("{}", names.translate_ids_to_names(&store, &text).await?);
            }
        }
    }

    Ok(())
}

async fn scoped_students<S: StudentStore>(
    store: &S,
    grade: Option<i32>,
    homeroom: Option<&str>,
) -> anyhow::Result<Vec<StudentRecord>> {
    let students = store.all_students().await?;
    Ok(students
        .into_iter()
        .filter(|s| grade.map_or(true, |g| s.grade == g))
        .filter(|s| homeroom.map_or(true, |h| s.homeroom.eq_ignore_ascii_case(h)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_commands_do_not_route_through_the_database() {
        let cli = Cli::try_parse_from(["student-flags", "rules", "list"]).expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Rules {
                command: RuleCommand::List
            }
        ));

        let cli =
            Cli::try_parse_from(["student-flags", "find", "--name", "Bob Jones"]).expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Records(RecordCommand::Find { ref name }) if name == "Bob Jones"
        ));
    }

    #[test]
    fn translate_requires_exactly_one_direction() {
        assert!(Cli::try_parse_from(["student-flags", "translate", "hello"]).is_err());
        assert!(
            Cli::try_parse_from(["student-flags", "translate", "--to-ids", "--to-names", "x"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["student-flags", "translate", "--to-ids", "x"]).is_ok());
    }
}
