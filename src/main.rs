mod config;
mod db;
mod error;
mod ingest;
mod migrate;
mod models;
mod reconcile;
mod scrape;
mod timefmt;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use db::{Database, JobFilter, NewCompany};
use ingest::{Ingester, RunReport};
use models::{ApplicationStatus, Company, JobStatus, Sponsorship};
use scrape::{HttpClient, Registry};

#[derive(Parser)]
#[command(name = "hunt")]
#[command(about = "Job search automation - track open positions across company career sites")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true, env = "HUNT_DB")]
    db: Option<PathBuf>,

    /// Directory holding the schema migrations
    #[arg(long, global = true, env = "HUNT_MIGRATIONS")]
    migrations: Option<PathBuf>,

    /// Maximum concurrent career-site fetches
    #[arg(long, global = true, env = "HUNT_WORKERS")]
    workers: Option<usize>,

    /// Per-company fetch timeout in seconds
    #[arg(long, global = true, env = "HUNT_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// User-Agent sent to career sites
    #[arg(long, global = true, env = "HUNT_USER_AGENT")]
    user_agent: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,

    /// List supported career-site platforms
    Platforms,

    /// Manage tracked companies
    Company {
        #[command(subcommand)]
        command: CompanyCommands,
    },

    /// Fetch postings and reconcile them into the tracker
    Scrape {
        /// Only this company (ID or unique prefix)
        #[arg(short, long)]
        company: Option<String>,
    },

    /// List jobs (open only unless --status or --all)
    Jobs {
        /// Filter by company (ID or unique prefix)
        #[arg(short, long)]
        company: Option<String>,

        /// Filter by status (open, closed)
        #[arg(short, long)]
        status: Option<String>,

        /// Include closed jobs
        #[arg(long)]
        all: bool,
    },

    /// Show job details
    Show {
        /// Job ID or unique prefix
        id: String,
    },

    /// Mark a job as applied
    Apply {
        /// Job ID or unique prefix
        job_id: String,

        /// Notes about the application
        #[arg(short, long, default_value = "")]
        notes: String,
    },

    /// Move an application to another pipeline stage
    Track {
        /// Application ID or unique prefix
        application_id: String,

        /// applied, screening, interviewing, offer, rejected, withdrawn
        status: String,
    },

    /// List applications, newest first
    Applications,

    /// Show application pipeline summary
    Status,

    /// Manage the job cart (companies watched for new postings)
    Cart {
        #[command(subcommand)]
        command: CartCommands,
    },
}

#[derive(Subcommand)]
enum CompanyCommands {
    /// Start tracking a company
    Add {
        /// Display name
        name: String,

        /// Career-site platform (see `hunt platforms`)
        #[arg(short, long)]
        platform: String,

        /// Company identifier on the platform
        #[arg(short, long)]
        slug: String,

        /// Career page URL
        #[arg(short, long)]
        url: Option<String>,
    },

    /// List tracked companies
    List,

    /// Show company details
    Show {
        /// Company ID or unique prefix
        id: String,
    },

    /// Stop tracking a company and drop its jobs
    Rm {
        /// Company ID or unique prefix
        id: String,
    },

    /// Include a company in scrape runs
    Enable {
        /// Company ID or unique prefix
        id: String,
    },

    /// Skip a company in scrape runs
    Disable {
        /// Company ID or unique prefix
        id: String,
    },

    /// Record H-1B sponsorship data
    Sponsor {
        /// Company ID or unique prefix
        id: String,

        #[arg(long)]
        sponsor_id: Option<String>,

        #[arg(long)]
        sponsors: Option<bool>,

        #[arg(long)]
        approval_rate: Option<f64>,

        #[arg(long)]
        filed: Option<i64>,
    },
}

#[derive(Subcommand)]
enum CartCommands {
    /// Put a company in the cart
    Add {
        /// Company ID or unique prefix
        id: String,
    },

    /// Take a company out of the cart
    Rm {
        /// Company ID or unique prefix
        id: String,
    },

    /// List companies in the cart
    List,

    /// Scrape cart companies and report jobs posted since the last scan
    Scan,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hunt=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::default()
        .with_database_path(cli.db)
        .with_migrations_dir(cli.migrations)
        .with_workers(cli.workers)
        .with_fetch_timeout_secs(cli.timeout_secs)
        .with_user_agent(cli.user_agent);

    let http = HttpClient::new(&config.user_agent, config.fetch_timeout)?;
    let ingester = Ingester::from_config(Registry::with_builtin(http), &config);

    if let Commands::Platforms = cli.command {
        for platform in ingester.registry().platforms() {
            println!("{}", platform);
        }
        return Ok(());
    }

    let mut db = Database::open(&config.database_path)
        .with_context(|| format!("Failed to open database at {}", config.database_path.display()))?;
    let applied = match &config.migrations_dir {
        Some(dir) => db.migrate(dir),
        None => db.migrate_embedded(),
    }
    .context("Failed to migrate database")?;

    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Commands::Platforms => {}

        Commands::Migrate => {
            if applied.is_empty() {
                println!("Database at {} is up to date.", db.path().display());
            } else {
                for file in &applied {
                    println!("Applied migration: {}", file);
                }
            }
        }

        Commands::Company { command } => match command {
            CompanyCommands::Add {
                name,
                platform,
                slug,
                url,
            } => {
                ingester.registry().resolve(&platform).map_err(|e| {
                    let known: Vec<_> = ingester.registry().platforms().collect();
                    anyhow!("{} (supported: {})", e, known.join(", "))
                })?;
                let company = db.create_company(&NewCompany {
                    name,
                    platform,
                    slug,
                    career_url: url,
                })?;
                println!("Added {} ({})", company.name, short_id(&company.id));
            }

            CompanyCommands::List => {
                let companies = db.list_companies()?;
                if companies.is_empty() {
                    println!("No companies tracked. Add one with: hunt company add <name> -p <platform> -s <slug>");
                } else {
                    println!(
                        "{:<10} {:<24} {:<11} {:<20} {:<4} {:<4} {:<16}",
                        "ID", "NAME", "PLATFORM", "SLUG", "ON", "CART", "LAST SCRAPED"
                    );
                    println!("{}", "-".repeat(95));
                    for c in companies {
                        println!(
                            "{:<10} {:<24} {:<11} {:<20} {:<4} {:<4} {:<16}",
                            short_id(&c.id),
                            truncate(&c.name, 22),
                            c.platform,
                            truncate(&c.slug, 18),
                            if c.enabled { "yes" } else { "no" },
                            if c.in_cart { "yes" } else { "" },
                            format_when(c.last_scraped_at)
                        );
                    }
                }
            }

            CompanyCommands::Show { id } => {
                let company = db.get_company(&id)?;
                print_company(&db, &company)?;
            }

            CompanyCommands::Rm { id } => {
                let company = db.delete_company(&id).with_context(|| {
                    format!("Could not remove company {} (jobs with applications are kept)", id)
                })?;
                println!("Removed {} and its jobs.", company.name);
            }

            CompanyCommands::Enable { id } => {
                let company = db.set_company_enabled(&id, true)?;
                println!("Enabled {}.", company.name);
            }

            CompanyCommands::Disable { id } => {
                let company = db.set_company_enabled(&id, false)?;
                println!("Disabled {}.", company.name);
            }

            CompanyCommands::Sponsor {
                id,
                sponsor_id,
                sponsors,
                approval_rate,
                filed,
            } => {
                let company = db.update_sponsorship(
                    &id,
                    &Sponsorship {
                        h1b_sponsor_id: sponsor_id,
                        sponsors_h1b: sponsors,
                        h1b_approval_rate: approval_rate,
                        h1b_total_filed: filed,
                    },
                )?;
                println!("Updated sponsorship for {}.", company.name);
            }
        },

        Commands::Scrape { company } => {
            if let Some(prefix) = company {
                let report = ingester.reconcile_company(&mut db, &prefix, &cancel).await?;
                print_run_report(&RunReport {
                    companies: vec![report],
                });
                return Ok(());
            }
            let companies = db.list_enabled_companies()?;
            if companies.is_empty() {
                println!("No enabled companies to scrape.");
                return Ok(());
            }
            println!("Scraping {} compan{}...", companies.len(), if companies.len() == 1 { "y" } else { "ies" });
            let report = ingester.run(&mut db, companies, &cancel).await;
            print_run_report(&report);
        }

        Commands::Jobs {
            company,
            status,
            all,
        } => {
            let company_id = match company {
                Some(prefix) => Some(db.get_company(&prefix)?.id),
                None => None,
            };
            let status = match (status, all) {
                (Some(s), _) => Some(s.parse::<JobStatus>()?),
                (None, true) => None,
                (None, false) => Some(JobStatus::Open),
            };
            let jobs = db.list_jobs(&JobFilter { company_id, status })?;
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                let names = company_names(&db)?;
                println!(
                    "{:<10} {:<7} {:<36} {:<18} {:<20} {:<6}",
                    "ID", "STATUS", "TITLE", "COMPANY", "LOCATION", "REMOTE"
                );
                println!("{}", "-".repeat(100));
                for job in jobs {
                    let company = names
                        .iter()
                        .find(|(id, _)| *id == job.company_id)
                        .map(|(_, name)| name.as_str())
                        .unwrap_or("?");
                    println!(
                        "{:<10} {:<7} {:<36} {:<18} {:<20} {:<6}",
                        short_id(&job.id),
                        job.status,
                        truncate(&job.title, 34),
                        truncate(company, 16),
                        truncate(&job.location, 18),
                        if job.remote { "yes" } else { "" }
                    );
                }
            }
        }

        Commands::Show { id } => {
            let job = db.get_job(&id)?;
            let company = db.get_company(&job.company_id)?;
            println!("Job {}", job.id);
            println!("Title: {}", job.title);
            println!("Company: {}", company.name);
            println!("Status: {}", job.status);
            if !job.location.is_empty() {
                println!("Location: {}{}", job.location, if job.remote { " (remote)" } else { "" });
            }
            if !job.department.is_empty() {
                println!("Department: {}", job.department);
            }
            if !job.url.is_empty() {
                println!("URL: {}", job.url);
            }
            if let Some(posted) = job.posted_at {
                println!("Posted: {}", posted.format("%Y-%m-%d"));
            }
            println!("First seen: {}", format_when(Some(job.first_seen_at)));
            println!("Last seen: {}", format_when(Some(job.last_seen_at)));
            if !job.description.is_empty() {
                println!("\n--- Description ---\n{}", job.description);
            }
        }

        Commands::Apply { job_id, notes } => {
            let job = db.get_job(&job_id).context("Finding job")?;
            let app = db.create_application(&job.id, &notes)?;
            let company_name = db
                .get_company(&job.company_id)
                .map(|c| c.name)
                .unwrap_or_else(|_| short_id(&job.company_id).to_string());
            println!(
                "Marked as applied: {} @ {} (app id: {})",
                job.title,
                company_name,
                short_id(&app.id)
            );
        }

        Commands::Track {
            application_id,
            status,
        } => {
            let status = status.parse::<ApplicationStatus>()?;
            let app = db.update_application_status(&application_id, status)?;
            println!("Application {} is now {}.", short_id(&app.id), app.status);
        }

        Commands::Applications => {
            let apps = db.list_applications()?;
            if apps.is_empty() {
                println!("No applications yet. Apply with: hunt apply <job-id>");
            } else {
                println!(
                    "{:<10} {:<13} {:<36} {:<16} {:<20}",
                    "ID", "STATUS", "JOB", "APPLIED", "NOTES"
                );
                println!("{}", "-".repeat(98));
                for app in apps {
                    let title = db
                        .get_job(&app.job_id)
                        .map(|j| j.title)
                        .unwrap_or_else(|_| short_id(&app.job_id).to_string());
                    println!(
                        "{:<10} {:<13} {:<36} {:<16} {:<20}",
                        short_id(&app.id),
                        app.status,
                        truncate(&title, 34),
                        format_when(Some(app.created_at)),
                        truncate(&app.notes, 20)
                    );
                }
            }
        }

        Commands::Status => {
            let summary = db.application_summary()?;
            if summary.is_empty() {
                println!("No applications yet. Apply with: hunt apply <job-id>");
            } else {
                println!("{:<14} {:>6}", "STATUS", "COUNT");
                let mut total = 0;
                for s in &summary {
                    println!("{:<14} {:>6}", s.status, s.count);
                    total += s.count;
                }
                println!("{:<14} {:>6}", "---", "---");
                println!("{:<14} {:>6}", "total", total);
            }
        }

        Commands::Cart { command } => match command {
            CartCommands::Add { id } => {
                let company = db.add_to_cart(&id)?;
                println!("Added {} to the cart.", company.name);
            }

            CartCommands::Rm { id } => {
                let company = db.remove_from_cart(&id)?;
                println!("Removed {} from the cart.", company.name);
            }

            CartCommands::List => {
                let companies = db.list_cart_companies()?;
                if companies.is_empty() {
                    println!("Cart is empty.");
                } else {
                    println!("{:<10} {:<24} {:<11} {:<16} {:<16}", "ID", "NAME", "PLATFORM", "ADDED", "NOTIFIED");
                    println!("{}", "-".repeat(80));
                    for c in companies {
                        println!(
                            "{:<10} {:<24} {:<11} {:<16} {:<16}",
                            short_id(&c.id),
                            truncate(&c.name, 22),
                            c.platform,
                            format_when(c.cart_added_at),
                            format_when(c.last_notified_at)
                        );
                    }
                }
            }

            CartCommands::Scan => {
                let (report, findings) = ingester.scan_cart(&mut db, &cancel).await?;
                print_run_report(&report);
                if findings.is_empty() {
                    println!("\nNo new jobs since the last scan.");
                }
                for finding in findings {
                    println!("\n{} - {} new job(s):", finding.company.name, finding.new_jobs.len());
                    for job in finding.new_jobs {
                        println!("  {} {} {}", short_id(&job.id), job.title, job.url);
                    }
                }
            }
        },
    }

    Ok(())
}

/// Cancel in-flight fetches on ctrl-c.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let notifier = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            notifier.cancel();
        }
    });
    token
}

fn print_company(db: &Database, c: &Company) -> Result<()> {
    println!("Company {}", c.id);
    println!("Name: {}", c.name);
    println!("Platform: {} ({})", c.platform, c.slug);
    if let Some(url) = &c.career_url {
        println!("Careers: {}", url);
    }
    println!("Enabled: {}", if c.enabled { "yes" } else { "no" });
    println!("Last scraped: {}", format_when(c.last_scraped_at));
    if c.in_cart {
        println!("In cart since: {}", format_when(c.cart_added_at));
    }
    let s = &c.sponsorship;
    if let Some(sponsors) = s.sponsors_h1b {
        println!("Sponsors H-1B: {}", if sponsors { "yes" } else { "no" });
    }
    if let Some(rate) = s.h1b_approval_rate {
        println!("H-1B approval rate: {:.0}%", rate * 100.0);
    }
    if let Some(filed) = s.h1b_total_filed {
        println!("H-1B filed: {}", filed);
    }

    let jobs = db.jobs_for_company(&c.id)?;
    let open = jobs.iter().filter(|j| j.status == JobStatus::Open).count();
    println!("\nJobs: {} open, {} closed", open, jobs.len() - open);
    Ok(())
}

fn print_run_report(report: &RunReport) {
    println!(
        "{:<24} {:>8} {:>11} {:>8}  {}",
        "COMPANY", "NEW", "REOPENED", "CLOSED", "ERROR"
    );
    println!("{}", "-".repeat(70));
    for r in &report.companies {
        println!(
            "{:<24} {:>8} {:>11} {:>8}  {}",
            truncate(&r.company_name, 22),
            r.counts.inserted,
            r.counts.reactivated,
            r.counts.expired,
            r.error.as_ref().map(|e| e.to_string()).unwrap_or_default()
        );
    }
    let totals = report.totals();
    println!(
        "\nTotal: {} new, {} reopened, {} closed, {} failed",
        totals.inserted,
        totals.reactivated,
        totals.expired,
        report.failures().count()
    );
}

fn company_names(db: &Database) -> Result<Vec<(String, String)>> {
    Ok(db
        .list_companies()?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect())
}

fn format_when(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
