//! Nozoki CLI - コマンドラインインターフェース
//!
//! 停止中のプロセスの値を調べて書き換えるためのREPLインターフェース

mod command;
mod session;

use anyhow::Result;
use clap::{Parser, Subcommand};
use command::Command;
use nozoki_eval::InspectConfig;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use session::Session;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Nozoki - live value inspector
#[derive(Parser)]
#[command(name = "nozoki")]
#[command(version = "0.1.0")]
#[command(about = "Inspect and edit values inside a stopped process", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: NozokiCommand,
}

#[derive(Subcommand)]
enum NozokiCommand {
    /// Attach to an existing process
    Attach {
        /// Process ID to attach to
        #[arg(short, long)]
        pid: i32,

        /// Maximum nesting depth when formatting values
        #[arg(long, default_value_t = 3)]
        max_depth: usize,

        /// Maximum number of array elements shown inline
        #[arg(long, default_value_t = 16)]
        max_array_elements: usize,

        /// Default number of children listed by 'children'
        #[arg(long, default_value_t = 100)]
        children_page_size: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    println!("Nozoki - live value inspector");
    println!("Version 0.1.0");
    println!();

    let cli = Cli::parse();
    let mut session = init_session(cli.command)?;
    run_repl(&mut session)?;

    Ok(())
}

/// プロセスにアタッチしてセッションを作る
fn init_session(command: NozokiCommand) -> Result<Session> {
    match command {
        NozokiCommand::Attach {
            pid,
            max_depth,
            max_array_elements,
            children_page_size,
        } => {
            println!("Attaching to process: {}", pid);
            let config = InspectConfig {
                max_depth,
                max_array_elements,
                children_page_size,
            };
            let session = Session::attach(pid, config)?;
            println!(
                "Attached to process {} (pc=0x{:x}, fb=0x{:x})",
                session.pid(),
                session.frame().pc,
                session.frame().frame_base
            );
            println!();
            Ok(session)
        }
    }
}

/// 履歴ファイルのパス
fn history_path() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(".nozoki_history"))
}

/// REPLループを実行する
fn run_repl(session: &mut Session) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;
    let history = history_path();
    if let Some(path) = &history {
        // 初回起動時は履歴ファイルがない
        let _ = rl.load_history(path);
    }

    loop {
        match rl.readline("(nozoki) ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                match Command::parse(line) {
                    Some(Command::Quit) => break,
                    Some(command) => {
                        if let Err(e) = handle_command(session, command) {
                            eprintln!("Error: {}", e);
                        }
                    }
                    None => {
                        println!("Unknown command: {}", line);
                        println!("Type 'help' for available commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Some(path) = &history {
        if let Err(e) = rl.save_history(path) {
            tracing::warn!("failed to save history to {}: {}", path.display(), e);
        }
    }
    println!("Goodbye!");
    Ok(())
}

fn handle_command(session: &mut Session, command: Command) -> Result<()> {
    match command {
        Command::Local {
            name,
            type_info,
            address,
        } => session.add_local(&name, type_info, &address)?,
        Command::Locals => session.print_locals()?,
        Command::Print { expression, hex } => session.print(&expression, hex)?,
        Command::Children {
            expression,
            index,
            count,
        } => session.print_children(&expression, index, count)?,
        Command::Set { target, value } => session.set(&target, &value)?,
        Command::Refresh => session.refresh()?,
        Command::Help => print_help(),
        Command::Quit => {}
    }

    Ok(())
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help                          - Show this help message");
    println!("  quit/exit/q                   - Detach and exit");
    println!();
    println!("Inspection commands:");
    println!("  local <name> <type> <addr>    - Register a local (addr may be fb-relative)");
    println!("  locals (l)                    - Show registered locals");
    println!("  print (p) <expr>              - Show a value (p/x for hex)");
    println!("  children (ch) <expr> [i] [n]  - List n children starting at i");
    println!("  set <expr> = <rhs>            - Assign a value");
    println!("  refresh (r)                   - End the session and re-read registers");
    println!();
    println!("Types: i8..i64, u8..u64, isize, usize, f32, f64, bool, char, *T, &T, [T; N]");
    println!();
    println!("Examples:");
    println!("  local counter i32 fb-0x14");
    println!("  local buf [u8; 16] 0x7ffd1234");
    println!("  p/x counter");
    println!("  children buf 8 4");
    println!("  set buf[0] = 0x41");
}
