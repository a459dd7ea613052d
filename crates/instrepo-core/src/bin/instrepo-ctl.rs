// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instrepo Control CLI
//!
//! CLI tool for inspecting and maintaining a workflow instance store.
//!
//! Usage:
//!   instrepo-ctl <command> [options]
//!
//! Commands:
//!   count [--status <s>]          Count instances
//!   page <n> [--status <s>]       Show one page
//!   first | last                  Show the first or last page
//!   next <n> | prev <n>           Navigate from page n
//!   get <id>                      Show one instance
//!   metadata <id>                 Show the shared context of an instance
//!   set-status <id> <status>      Change the status of an instance
//!   clear                         Delete every instance

use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use instrepo_core::{InstancePage, InstanceStore, StoreConfig};

fn print_usage() {
    eprintln!(
        r#"Usage: instrepo-ctl <command> [options]

Inspect and maintain a workflow instance store.

COMMANDS:
    count                           Count instances
    page <n>                        Show page n (1-based)
    first                           Show the first page
    last                            Show the last page
    next <n>                        Show the page after page n
    prev <n>                        Show the page before page n
    get <instance_id>               Show one instance
    metadata <instance_id>          Show the shared context of an instance
    set-status <instance_id> <status>
                                    Change the status of an instance
    clear                           Delete every instance

COUNT / PAGE OPTIONS:
    --status <status>               Only instances with this status

ENVIRONMENT:
    INSTREPO_BACKEND                sqlite | index | memory (default: memory)
    INSTREPO_PAGE_SIZE              Instances per page (default: 20)
    INSTREPO_DATABASE_URL           SQLite URL (sqlite backend)
    INSTREPO_MAX_CONNECTIONS        SQLite pool size (default: 5)
    INSTREPO_INDEX_PATH             Index directory (index backend)
    RUST_LOG                        Log filter (default: instrepo_core=info)

EXAMPLES:
    # How many instances are still running?
    instrepo-ctl count --status RUNNING

    # Second page of finished instances
    instrepo-ctl page 2 --status FINISHED

    # Unblock an instance by hand
    instrepo-ctl set-status 42 RUNNING
"#
    );
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Count { status: Option<String> },
    Page { page_num: i64, status: Option<String> },
    First,
    Last,
    Next { page_num: i64 },
    Prev { page_num: i64 },
    Get { instance_id: String },
    Metadata { instance_id: String },
    SetStatus { instance_id: String, status: String },
    Clear,
    Help,
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(&args)
}

fn parse_status_option(args: &[String], start: usize) -> Result<Option<String>, String> {
    let mut status = None;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--status" => {
                i += 1;
                status = Some(args.get(i).ok_or("--status requires a value")?.clone());
            }
            arg => return Err(format!("Unknown argument: {}", arg)),
        }
        i += 1;
    }
    Ok(status)
}

fn parse_page_num(args: &[String]) -> Result<i64, String> {
    args.get(2)
        .ok_or("Page number required")?
        .parse()
        .map_err(|_| "Invalid page number".to_string())
}

fn parse_args_from_vec(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => Ok(Command::Help),
        "count" => Ok(Command::Count {
            status: parse_status_option(args, 2)?,
        }),
        "page" => Ok(Command::Page {
            page_num: parse_page_num(args)?,
            status: parse_status_option(args, 3)?,
        }),
        "first" => Ok(Command::First),
        "last" => Ok(Command::Last),
        "next" => Ok(Command::Next {
            page_num: parse_page_num(args)?,
        }),
        "prev" => Ok(Command::Prev {
            page_num: parse_page_num(args)?,
        }),
        "get" => {
            let instance_id = args.get(2).ok_or("Instance ID required")?.clone();
            Ok(Command::Get { instance_id })
        }
        "metadata" => {
            let instance_id = args.get(2).ok_or("Instance ID required")?.clone();
            Ok(Command::Metadata { instance_id })
        }
        "set-status" => {
            let instance_id = args.get(2).ok_or("Instance ID required")?.clone();
            let status = args.get(3).ok_or("Status required")?.clone();
            Ok(Command::SetStatus {
                instance_id,
                status,
            })
        }
        "clear" => Ok(Command::Clear),
        cmd => Err(format!("Unknown command: {}", cmd)),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn execute_command(store: &InstanceStore, cmd: Command) -> Result<()> {
    match cmd {
        Command::Help => print_usage(),
        Command::Count { status } => {
            let count = match &status {
                Some(status) => store.count_by_status(status).await?,
                None => store.count().await?,
            };
            println!("{}", count);
        }
        Command::Page { page_num, status } => {
            print_json(&store.get_page(page_num, status.as_deref()).await?)?;
        }
        Command::First => print_json(&store.get_first_page().await?)?,
        Command::Last => print_json(&store.get_last_page().await?)?,
        Command::Next { page_num } => {
            let current = store.get_page(page_num, None).await?;
            print_json(&navigate_from(store, current, true).await?)?;
        }
        Command::Prev { page_num } => {
            let current = store.get_page(page_num, None).await?;
            print_json(&navigate_from(store, current, false).await?)?;
        }
        Command::Get { instance_id } => match store.get_by_id(&instance_id).await? {
            Some(instance) => print_json(&instance)?,
            None => bail!("Instance not found: {}", instance_id),
        },
        Command::Metadata { instance_id } => match store.instance_metadata(&instance_id).await? {
            Some(metadata) => print_json(&metadata)?,
            None => bail!("Instance not found: {}", instance_id),
        },
        Command::SetStatus {
            instance_id,
            status,
        } => {
            if !store.update_status(&instance_id, &status).await? {
                bail!("Instance not found: {}", instance_id);
            }
            println!("Instance {} is now {}", instance_id, status);
        }
        Command::Clear => {
            store.clear_all().await?;
            println!("All instances cleared");
        }
    }
    Ok(())
}

async fn navigate_from(store: &InstanceStore, current: InstancePage, forward: bool) -> Result<InstancePage> {
    let current = if current.is_blank() { None } else { Some(&current) };
    let page = if forward {
        store.get_next_page(current).await?
    } else {
        store.get_prev_page(current).await?
    };
    Ok(page)
}

async fn run(cmd: Command) -> Result<()> {
    let config = StoreConfig::from_env().context("Configuration error")?;
    let store = InstanceStore::from_config(&config)
        .await
        .context("Failed to open instance store")?;
    execute_command(&store, cmd).await
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays machine-readable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("instrepo_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cmd = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match run(cmd).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
