mod backend;
mod cli;
mod config;
mod error;
mod fields;
mod history;
mod log;
mod message;
mod render;
mod row_index;
mod session;
mod store;
mod surface;
mod thread;

use config::Config;
use std::path::PathBuf;
use store::MessageStore;

fn default_config_path() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("mhdr").join("config.toml")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home)
            .join(".config")
            .join("mhdr")
            .join("config.toml")
    } else {
        PathBuf::from("config.toml")
    }
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    let prefix = format!("--{}=", name);
    args.iter()
        .find(|a| a.starts_with(&prefix))
        .map(|a| &a[prefix.len()..])
}

fn print_usage() {
    eprintln!("Usage: mhdr [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config=PATH    Use config file at PATH instead of default");
    eprintln!("  --store=PATH     Load messages from the JSON dump at PATH");
    eprintln!("  --query=EXPR     Run one query and print the header list");
    eprintln!("  --color          Use ANSI colors when printing");
    eprintln!("  --cli            Run in JSON-over-stdin/stdout CLI mode");
    eprintln!("  --clear-log      Truncate the log file at startup");
    eprintln!("  --log-path       Print the log file location");
    eprintln!("  --help-cli       Print CLI mode protocol documentation");
    eprintln!("  --help-config    Print default config path and all options");
    eprintln!("  --help           Show this help");
}

fn print_help_config() {
    let config_path = default_config_path();
    println!("Default config file: {}", config_path.display());
    println!();
    println!("Available options:");
    println!();
    println!("[headers]");
    println!("  fields = [{{ field = \"date\", width = 12 }}, ...]  # Columns; only the last may omit width");
    println!("  precise_alignment = false    # Measure display cells instead of graphemes");
    println!("  fancy_glyphs = false         # Unicode thread and flag glyphs");
    println!("  results_limit = 500          # Maximum results per query (-1 = unlimited)");
    println!("  show_threads = true          # Ask the index for threaded results");
    println!("  skip_duplicates = true       # Hide messages with a repeated message-id");
    println!("  include_related = false      # Include the rest of each matching thread");
    println!("  sort_field = \"date\"          # date, subject, size, from, to, maildir, message-id");
    println!("  sort_direction = \"descending\" # ascending or descending");
    println!("  history_depth = 20           # Queries kept in each history stack");
    println!("  date_format = \"%x\"           # Date column for older messages (chrono format)");
    println!("  time_format = \"%X\"           # Date column for messages from today");
    println!("  full_date_format = \"%c\"      # full-date column");
    println!("  from_prefix = \"\"             # Prefix for from-or-to when showing the sender");
    println!("  to_prefix = \"To \"            # Prefix for from-or-to when showing recipients");
    println!();
    println!("[mail]");
    println!("  my_email_regex = \"^$\"        # Your addresses; from-or-to shows To for these");
    println!();
    println!("[mailing_lists]                 # Shortnames for the mailing-list column");
    println!("  \"dev.lists.example.org\" = \"dev\"");
    println!();
    println!("[custom_fields.NAME]            # Column showing one extra header");
    println!("  header = \"X-Mailer\"           # Header to show (required)");
    println!("  shortname = \"Mailer\"          # Column title (default: NAME)");
    println!();
    println!("[query_aliases]                 # Words expanded before a query is run");
    println!("  inbox = \"maildir:/inbox\"");
    println!();
    println!("Fields: date, full-date, flags, mailing-list, from, to, cc, from-or-to,");
    println!("subject, thread-subject, size, maildir, path, message-id, tags, or a custom field.");
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        std::process::exit(0);
    }

    if args.iter().any(|a| a == "--help-cli") {
        cli::print_help_cli();
        std::process::exit(0);
    }

    if args.iter().any(|a| a == "--help-config") {
        print_help_config();
        std::process::exit(0);
    }

    let log_path = log::log_path();
    if args.iter().any(|a| a == "--log-path") {
        println!("{}", log_path.display());
        std::process::exit(0);
    }

    if args.iter().any(|a| a == "--clear-log") {
        if let Err(e) = log::clear(&log_path) {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }

    if let Err(e) = log::init(&log_path) {
        eprintln!("Warning: logging disabled: {}", e);
    }

    let explicit_config = flag_value(&args, "config").map(PathBuf::from);
    let config = match &explicit_config {
        Some(path) => Config::load(path).map_err(|e| (path.clone(), e)),
        None => {
            let path = default_config_path();
            if path.exists() {
                Config::load(&path).map_err(|e| (path, e))
            } else {
                Config::parse("").map_err(|e| (path, e))
            }
        }
    };
    let config = match config {
        Ok(c) => c,
        Err((path, e)) => {
            eprintln!("Error loading config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };

    let store = match flag_value(&args, "store") {
        Some(path) => match MessageStore::load(path) {
            Ok(store) => {
                if store.is_empty() {
                    tracing::warn!(path, "message store is empty");
                } else {
                    tracing::info!(path, messages = store.len(), "loaded message store");
                }
                store
            }
            Err(e) => {
                eprintln!("Error loading message store from {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => MessageStore::default(),
    };

    let color = args.iter().any(|a| a == "--color");

    let result = if args.iter().any(|a| a == "--cli") {
        cli::run_cli(config, store, color)
    } else if let Some(query) = flag_value(&args, "query") {
        cli::run_query(&config, store, query, color)
    } else {
        print_usage();
        std::process::exit(1);
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
