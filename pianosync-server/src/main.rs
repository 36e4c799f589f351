mod config;
mod network;

use std::fs::File;
use std::path::Path;

fn init_logging(verbose: bool, log_file: Option<&str>) {
    use simplelog::*;

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };

    let result = match log_file.map(File::create) {
        Some(Ok(file)) => WriteLogger::init(log_level, Config::default(), file),
        Some(Err(e)) => {
            eprintln!("Cannot create log file, logging to terminal: {}", e);
            TermLogger::init(log_level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)
        }
        None => TermLogger::init(log_level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto),
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize logger: {}", e);
    }

    log::info!("pianosync starting (log level: {:?})", log_level);
}

fn print_usage() {
    println!(
        "usage: pianosync [--server] [--bind ADDR] [--connect ADDR] [--config PATH] [--log-file PATH] [--verbose]"
    );
}

fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let flag_value = |flag: &str| {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1).cloned())
    };

    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    let log_file = flag_value("--log-file");
    init_logging(verbose, log_file.as_deref());

    let config = match flag_value("--config") {
        Some(path) => config::Config::load_from(Path::new(&path)),
        None => config::Config::load(),
    };

    if let Some(addr) = flag_value("--connect") {
        return network::run_monitor(&config, &addr);
    }

    network::run_server(&config, flag_value("--bind").as_deref())
}
