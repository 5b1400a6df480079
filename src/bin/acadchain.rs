#![forbid(unsafe_code)]
//! Command-line front end for the credential ledger

use acadchain::blockchain::{ChainValidation, GENESIS_PREVIOUS_HASH};
use acadchain::config::{load_config, Config};
use acadchain::crypto::generate_credential_id;
use acadchain::directory::InstitutionDirectory;
use acadchain::models::{
    CertificateUpload, Credential, CredentialLevel, CredentialType, Institution,
};
use acadchain::registry::{CredentialQuery, CredentialRegistry};
use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Color as TableColor;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "acadchain.toml")]
    config: PathBuf,
    /// Override the database path from the configuration
    #[arg(long)]
    db: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create (or open) the ledger and print its state
    Init,
    /// Register an institution
    RegisterInstitution {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        location: String,
        /// Register without verified status
        #[arg(long)]
        unverified: bool,
    },
    /// Issue a credential on behalf of an institution
    Issue {
        /// Credential id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        student: String,
        #[arg(long)]
        student_name: Option<String>,
        #[arg(long)]
        institution: String,
        #[arg(long)]
        title: String,
        #[arg(long = "type", default_value = "degree")]
        credential_type: CredentialType,
        #[arg(long)]
        level: Option<CredentialLevel>,
        #[arg(long)]
        field: Option<String>,
        #[arg(long)]
        grade: Option<String>,
    },
    /// Verify a credential against the ledger
    Verify { credential_id: String },
    /// Seal pending transactions into a block
    Mine {
        /// Identity credited with the mining reward
        #[arg(long)]
        miner: Option<String>,
        /// Give up after this long, e.g. "30s"
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },
    /// Check hashes and linkage of the whole ledger
    Validate,
    /// Show registry and ledger statistics
    Stats,
    /// Search credentials
    Search {
        #[arg(long)]
        student_name: Option<String>,
        #[arg(long)]
        institution_name: Option<String>,
        #[arg(long)]
        field: Option<String>,
        #[arg(long = "type")]
        credential_type: Option<CredentialType>,
        #[arg(long)]
        level: Option<CredentialLevel>,
    },
    /// List the most recent blocks
    Blocks {
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
    /// Search the institution catalog
    Directory {
        /// Matched against name, affiliation and courses
        #[arg(default_value = "")]
        query: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// Record the hash of an uploaded certificate file
    Upload {
        file: PathBuf,
        #[arg(long)]
        student: String,
        #[arg(long)]
        student_name: String,
        #[arg(long)]
        institution_name: String,
    },
}

fn header_cell(text: &str) -> Cell {
    Cell::new(text)
        .fg(TableColor::Cyan)
        .add_attribute(Attribute::Bold)
}

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| header_cell(h)).collect::<Vec<_>>());
    table
}

fn short(hash: &str) -> String {
    hash.chars().take(16).collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config: Config = load_config(&cli.config)?;
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    let registry = CredentialRegistry::open(&config)?;

    match cli.command {
        Commands::Init => {
            let chain = registry.node().chain();
            let genesis = &chain.blocks()[0];
            println!("{}", "Ledger ready".bright_green().bold());
            println!("  Database:    {}", config.database.path.bright_yellow());
            println!("  Blocks:      {}", chain.len());
            println!("  Difficulty:  {}", chain.difficulty());
            println!("  Genesis:     {}", genesis.hash_hex());
            println!(
                "  Sentinel ok: {}",
                genesis.previous_hash == GENESIS_PREVIOUS_HASH
            );
        }
        Commands::RegisterInstitution {
            id,
            name,
            location,
            unverified,
        } => {
            let institution = Institution::new(&id, &name, &location, !unverified);
            let tx_id = registry.register_institution(institution)?;
            println!(
                "{} {} (transaction {})",
                "Registered".bright_green(),
                id.bright_yellow(),
                tx_id
            );
        }
        Commands::Issue {
            id,
            student,
            student_name,
            institution,
            title,
            credential_type,
            level,
            field,
            grade,
        } => {
            let id = id.unwrap_or_else(|| generate_credential_id("CRED"));
            let mut credential =
                Credential::new(&id, &student, &institution, &title).with_type(credential_type);
            credential.student_name = student_name;
            credential.level = level;
            credential.field_of_study = field;
            credential.grade = grade;

            let receipt = registry.issue_credential(credential, &institution)?;
            println!(
                "{} {}",
                "Issued credential".bright_green(),
                receipt.credential_id.bright_yellow()
            );
            println!("  Hash:        {}", receipt.credential_hash);
            println!("  Transaction: {}", receipt.transaction_id);
            match (receipt.block_index, receipt.block_hash) {
                (Some(index), Some(hash)) => {
                    println!("  Sealed in block #{} ({})", index, short(&hash))
                }
                _ => println!("  {}", "Pending until the next mining cycle".yellow()),
            }
        }
        Commands::Verify { credential_id } => {
            let verification = registry.verify_credential(&credential_id)?;
            if verification.valid {
                println!("{} {}", "VALID".bright_green().bold(), credential_id);
            } else {
                println!(
                    "{} {}: {}",
                    "INVALID".bright_red().bold(),
                    credential_id,
                    verification.reason.unwrap_or_default()
                );
            }
            println!("  Title:       {}", verification.credential.title);
            println!("  Student:     {}", verification.credential.student_id);
            println!("  Institution: {}", verification.credential.institution_id);
            println!(
                "  Block:       #{} ({})",
                verification.block_index,
                short(&verification.block_hash)
            );
            println!("  Transaction: {}", verification.transaction_id);
        }
        Commands::Mine { miner, timeout } => {
            let miner = miner.unwrap_or_else(|| config.ledger.miner_identity.clone());
            let pending = registry.pending_transactions().len();

            let spinner = ProgressBar::new_spinner();
            spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
            spinner.set_message(format!("Mining {} pending transactions...", pending));
            spinner.enable_steady_tick(Duration::from_millis(100));
            let result = registry.mine_pending_async(&miner, timeout).await;
            spinner.finish_and_clear();

            let block = result?;
            println!(
                "{} block #{} with {} transactions",
                "Mined".bright_green().bold(),
                block.index,
                block.transactions.len()
            );
            println!("  Hash:  {}", block.hash_hex());
            println!("  Nonce: {}", block.nonce);
        }
        Commands::Validate => match registry.node().validate() {
            ChainValidation::Valid => println!(
                "{} ({} blocks)",
                "Ledger is valid".bright_green().bold(),
                registry.node().chain().len()
            ),
            ChainValidation::Invalid { index, reason } => {
                println!(
                    "{} at block #{}: {}",
                    "Ledger is INVALID".bright_red().bold(),
                    index,
                    reason
                );
                std::process::exit(1);
            }
        },
        Commands::Stats => {
            let stats = registry.statistics();
            let mut table = new_table(&["Metric", "Value"]);
            let rows: Vec<(&str, String)> = vec![
                ("Credentials", stats.total_credentials.to_string()),
                ("Institutions", stats.total_institutions.to_string()),
                ("Verified institutions", stats.verified_institutions.to_string()),
                ("Students", stats.total_students.to_string()),
                ("Research papers", stats.total_research_papers.to_string()),
                ("Pending transactions", stats.pending_transactions.to_string()),
                ("Blocks", stats.blockchain_length.to_string()),
                ("Sealed transactions", stats.total_transactions.to_string()),
                ("Difficulty", stats.difficulty.to_string()),
                ("Latest block", short(&stats.latest_block_hash)),
                ("Valid", stats.is_valid.to_string()),
            ];
            for (metric, value) in rows {
                table.add_row(vec![Cell::new(metric), Cell::new(value)]);
            }
            for (kind, count) in &stats.credential_types {
                table.add_row(vec![Cell::new(format!("Type: {}", kind)), Cell::new(count)]);
            }
            for (level, count) in &stats.credential_levels {
                table.add_row(vec![Cell::new(format!("Level: {}", level)), Cell::new(count)]);
            }
            println!("{}", table);
        }
        Commands::Search {
            student_name,
            institution_name,
            field,
            credential_type,
            level,
        } => {
            let results = registry.search_credentials(&CredentialQuery {
                student_name,
                institution_name,
                field_of_study: field,
                credential_type,
                level,
            });
            if results.is_empty() {
                println!("{}", "No matching credentials".yellow());
                return Ok(());
            }
            let mut table = new_table(&[
                "Credential",
                "Title",
                "Student",
                "Institution",
                "Type",
                "Status",
            ]);
            for credential in &results {
                table.add_row(vec![
                    Cell::new(&credential.credential_id),
                    Cell::new(&credential.title),
                    Cell::new(&credential.student_id),
                    Cell::new(&credential.institution_id),
                    Cell::new(credential.credential_type),
                    Cell::new(format!("{:?}", credential.status)),
                ]);
            }
            println!("{}", table);
        }
        Commands::Blocks { count } => {
            let chain = registry.node().chain();
            let mut table =
                new_table(&["Block", "Hash", "Previous", "Nonce", "Transactions", "Time"]);
            for block in chain.recent_blocks(count) {
                let time = chrono::DateTime::from_timestamp_millis(block.timestamp)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                table.add_row(vec![
                    Cell::new(format!("#{}", block.index)).fg(TableColor::White),
                    Cell::new(short(&block.hash_hex())),
                    Cell::new(short(&hex::encode(block.previous_hash))).fg(TableColor::Grey),
                    Cell::new(block.nonce),
                    Cell::new(block.transactions.len()),
                    Cell::new(time).fg(TableColor::Grey),
                ]);
            }
            println!("{}", table);
        }
        Commands::Directory { query, category } => {
            let directory = InstitutionDirectory::from_config(&config.directory)?;
            let matches = directory.search(&query, category.as_deref());
            if matches.is_empty() {
                println!("{}", "No matching institutions".yellow());
                return Ok(());
            }
            let mut table = new_table(&["Id", "Name", "Location", "Category", "Verified"]);
            for institution in matches {
                table.add_row(vec![
                    Cell::new(&institution.institution_id),
                    Cell::new(&institution.name),
                    Cell::new(&institution.location),
                    Cell::new(institution.category.as_deref().unwrap_or("-")),
                    Cell::new(institution.is_verified),
                ]);
            }
            println!("{}", table);
        }
        Commands::Upload {
            file,
            student,
            student_name,
            institution_name,
        } => {
            let contents = std::fs::read(&file)?;
            let upload = CertificateUpload::from_file_bytes(
                &student,
                &student_name,
                &institution_name,
                &contents,
            );
            let certificate_id = registry.record_certificate_upload(&upload)?;
            println!(
                "{} {} (file hash {})",
                "Recorded upload".bright_green(),
                certificate_id.bright_yellow(),
                short(&upload.file_hash)
            );
        }
    }

    Ok(())
}
