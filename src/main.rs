use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use engagement_core::codes::ApplicationDetails;
use engagement_core::models::CreditKind;
use engagement_core::notify::LogNotifier;
use engagement_core::{db, report, Config, Engagement, PgStore};

#[derive(Parser)]
#[command(name = "engagement")]
#[command(about = "Access gating, reading progress and reward codes for course content", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small demo catalog and member set
    Seed,
    /// Import content catalog rows from a CSV file
    ImportCatalog {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Show how much of a content item a user may read
    Access {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        content: i64,
    },
    /// Record the first read of a content item
    Begin {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        content: i64,
    },
    /// Report reading progress
    Update {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        content: i64,
        #[arg(long)]
        percent: i32,
        #[arg(long)]
        elapsed: i64,
    },
    /// Complete a content item and grant completion credit if earned
    Complete {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        content: i64,
    },
    /// Add credit to a user's topic balance
    Credit {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        topic: i64,
        #[arg(long)]
        kind: CreditKind,
        #[arg(long)]
        amount: i64,
    },
    /// Count a completed item against an existing topic balance
    MarkTopic {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        topic: i64,
    },
    /// Show balances for a user, or a single topic
    Balance {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        topic: Option<i64>,
    },
    /// Generate a markdown credit report
    Report {
        #[arg(long)]
        user: i64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Apply for a reward code
    Submit {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        contact: String,
        #[arg(long, default_value = "")]
        justification: String,
    },
    /// Approve a pending application and mint its code
    Approve {
        #[arg(long)]
        application: Uuid,
    },
    /// Reject a pending application
    Reject {
        #[arg(long)]
        application: Uuid,
    },
    /// List applications awaiting a decision
    Pending,
    /// Check whether a code can be redeemed
    Validate {
        #[arg(long)]
        code: String,
    },
    /// Redeem a code
    Redeem {
        #[arg(long)]
        code: String,
    },
    /// Issue a one-time secret for an identity
    IssueSecret {
        #[arg(long)]
        identity: String,
        #[arg(long)]
        purpose: String,
    },
    /// Verify and consume a one-time secret
    VerifySecret {
        #[arg(long)]
        identity: String,
        #[arg(long)]
        purpose: String,
        #[arg(long)]
        secret: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("engagement_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let pool = db::connect(&cli.config).await?;
    let settings = cli.config.settings();
    let store = Arc::new(PgStore::new(pool.clone(), cli.config.lock_timeout_ms));
    let engagement = Engagement::new(store, Arc::new(LogNotifier), &settings);

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportCatalog { csv } => {
            let inserted = db::import_catalog(&pool, &csv).await?;
            println!("Inserted {inserted} content items from {}.", csv.display());
        }
        Commands::Access { user, content } => {
            let tier = engagement.access.resolve_access(user, content).await?;
            print_json(&tier)?;
        }
        Commands::Begin { user, content } => {
            let record = engagement.progress.begin(user, content).await?;
            print_json(&record)?;
        }
        Commands::Update {
            user,
            content,
            percent,
            elapsed,
        } => {
            let record = engagement
                .progress
                .update(user, content, percent, elapsed)
                .await?;
            print_json(&record)?;
        }
        Commands::Complete { user, content } => {
            let finished = engagement.finish_reading(user, content).await?;
            print_json(&finished)?;
        }
        Commands::Credit {
            user,
            topic,
            kind,
            amount,
        } => {
            let balance = engagement.ledger.add_credit(user, topic, kind, amount).await?;
            print_json(&balance)?;
        }
        Commands::MarkTopic { user, topic } => {
            let balance = engagement.ledger.mark_topic_completed(user, topic).await?;
            print_json(&balance)?;
        }
        Commands::Balance { user, topic } => match topic {
            Some(topic) => {
                let balance = engagement
                    .ledger
                    .get_balance(user, topic)
                    .await?
                    .with_context(|| format!("no balance for user {user} on topic {topic}"))?;
                print_json(&balance)?;
            }
            None => {
                let balances = engagement.ledger.get_user_balances(user).await?;
                let total = engagement.ledger.get_user_total(user).await?;
                print_json(&serde_json::json!({ "total": total, "balances": balances }))?;
            }
        },
        Commands::Report { user, out } => {
            let balances = engagement.ledger.get_user_balances(user).await?;
            let total = engagement.ledger.get_user_total(user).await?;
            let report = report::build_report(user, &balances, total);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Submit {
            user,
            contact,
            justification,
        } => {
            let application = engagement
                .codes
                .submit(
                    user,
                    ApplicationDetails {
                        contact,
                        justification,
                    },
                )
                .await?;
            print_json(&application)?;
        }
        Commands::Approve { application } => {
            let (application, code) = engagement.codes.approve(application).await?;
            print_json(&serde_json::json!({ "application": application, "code": code }))?;
        }
        Commands::Reject { application } => {
            let application = engagement.codes.reject(application).await?;
            print_json(&application)?;
        }
        Commands::Pending => {
            let pending = engagement.codes.list_pending().await?;
            if pending.is_empty() {
                println!("No applications awaiting a decision.");
                return Ok(());
            }
            for application in pending {
                println!(
                    "- {} user {} ({}) submitted {}",
                    application.id, application.user_id, application.contact, application.submitted_at
                );
            }
        }
        Commands::Validate { code } => {
            let validation = engagement.codes.validate(&code).await?;
            print_json(&validation)?;
        }
        Commands::Redeem { code } => {
            let redeemed = engagement.codes.redeem(&code).await?;
            print_json(&redeemed)?;
        }
        Commands::IssueSecret { identity, purpose } => {
            let issued = engagement.secrets.issue(&identity, &purpose).await?;
            // Delivery is out of scope; the operator relays the secret.
            println!("Secret {} valid until {}.", issued.secret, issued.expires_at);
        }
        Commands::VerifySecret {
            identity,
            purpose,
            secret,
        } => {
            engagement.secrets.verify(&identity, &purpose, &secret).await?;
            println!("Secret accepted.");
        }
    }

    Ok(())
}
