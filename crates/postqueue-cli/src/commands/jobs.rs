use std::sync::Arc;

use clap::Subcommand;

use postqueue_core::models::{JobPriority, JobStatus, Platform};
use postqueue_core::scheduler::NewJob;
use postqueue_core::timeutil::{format_vn, parse_user_datetime};
use postqueue_core::{Config, Error, FanOutHub, Result, Scheduler};

#[derive(Subcommand)]
pub enum JobsCommands {
    /// List jobs, optionally filtered
    List {
        #[arg(short, long, help = "Filter by account id")]
        account: Option<String>,

        #[arg(short, long, help = "Filter by status")]
        status: Option<String>,
    },

    /// Schedule a new job
    Add {
        #[arg(short, long, help = "Target account id")]
        account: Option<String>,

        #[arg(short, long, help = "Post content")]
        content: String,

        #[arg(short, long, help = "Scheduled time (ISO-8601; naive = UTC+7)")]
        time: String,

        #[arg(short, long, default_value = "normal", help = "low|normal|high|urgent")]
        priority: String,

        #[arg(long, default_value = "threads", help = "threads|facebook")]
        platform: String,

        #[arg(long, default_value_t = 3, help = "Retry budget")]
        max_retries: u32,

        #[arg(long, help = "Affiliate link posted as a comment")]
        link_aff: Option<String>,
    },

    /// Remove a job by id
    Remove {
        job_id: String,
    },

    /// Report state inconsistencies across all stored jobs
    Doctor,
}

async fn open_scheduler(config: &Config) -> Result<Arc<Scheduler>> {
    Scheduler::new(config, Arc::new(FanOutHub::new())).await
}

pub async fn run(config: Config, command: JobsCommands) -> Result<()> {
    match command {
        JobsCommands::List { account, status } => {
            let scheduler = open_scheduler(&config).await?;
            let status = match status.as_deref() {
                Some(raw) => Some(
                    JobStatus::parse(raw)
                        .ok_or_else(|| Error::validation(format!("unknown status '{}'", raw)))?,
                ),
                None => None,
            };

            let jobs = scheduler.list_jobs(account.as_deref(), status);
            if jobs.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }

            for job in jobs {
                println!(
                    "{}  {:<9}  {:<7}  {:<8}  {}  {}",
                    &job.job_id[..8.min(job.job_id.len())],
                    job.status.to_string(),
                    job.priority.to_string(),
                    job.platform.to_string(),
                    format_vn(job.scheduled_time),
                    job.account_id.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }

        JobsCommands::Add {
            account,
            content,
            time,
            priority,
            platform,
            max_retries,
            link_aff,
        } => {
            let scheduled_time = parse_user_datetime(&time)
                .ok_or_else(|| Error::invalid_schedule_time(format!("cannot parse '{}'", time)))?;
            let priority = JobPriority::parse(&priority)
                .ok_or_else(|| Error::validation(format!("unknown priority '{}'", priority)))?;
            let platform = Platform::parse(&platform)
                .ok_or_else(|| Error::validation(format!("unknown platform '{}'", platform)))?;

            let scheduler = open_scheduler(&config).await?;
            let job_id = scheduler
                .add_job(NewJob {
                    account_id: account,
                    content,
                    scheduled_time,
                    priority,
                    platform,
                    max_retries,
                    link_aff,
                })
                .await?;

            println!("Scheduled job {} for {}", job_id, format_vn(scheduled_time));
            Ok(())
        }

        JobsCommands::Remove { job_id } => {
            let scheduler = open_scheduler(&config).await?;
            scheduler.remove_job(&job_id).await?;
            println!("Removed job {}", job_id);
            Ok(())
        }

        JobsCommands::Doctor => {
            let scheduler = open_scheduler(&config).await?;
            let issues = scheduler.validate_all_jobs();
            if issues.is_empty() {
                println!("All jobs look consistent.");
                return Ok(());
            }
            for (job_id, messages) in issues {
                println!("{}:", job_id);
                for message in messages {
                    println!("  {}", message);
                }
            }
            Ok(())
        }
    }
}

/// `postqueue status`
pub async fn status(config: Config) -> Result<()> {
    let scheduler = open_scheduler(&config).await?;
    let status = scheduler.status();
    println!(
        "running: {}\nactive jobs: {}",
        status.running, status.active_jobs_count
    );
    Ok(())
}
