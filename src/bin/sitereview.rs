use sitereview::config::{default_global_config_path, Settings};
use sitereview::history::HistoryStore;
use sitereview::runtime::run_bot;
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

const USAGE: &str = "Usage: sitereview <run|init-db|doctor>

  run       start the Telegram bot
  init-db   create the task database and schema
  doctor    validate configuration and exit

Configuration is read from ~/.sitereview/config.yaml, or the path in
SITEREVIEW_CONFIG.";

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let verb = args.first().map(String::as_str);
    let result = match verb {
        Some("run") => run(),
        Some("init-db") => init_db(),
        Some("doctor") => doctor(),
        _ => {
            eprintln!("{USAGE}");
            exit(2);
        }
    };
    if let Err(message) = result {
        eprintln!("error: {message}");
        exit(1);
    }
}

fn config_path() -> Result<PathBuf, String> {
    if let Some(path) = std::env::var_os("SITEREVIEW_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    default_global_config_path().map_err(|err| err.to_string())
}

fn load_settings() -> Result<Settings, String> {
    let path = config_path()?;
    Settings::load(&path).map_err(|err| err.to_string())
}

fn run() -> Result<(), String> {
    let settings = load_settings()?;
    println!("sitereview: polling as model {}", settings.model);
    let stop = Arc::new(AtomicBool::new(false));
    run_bot(settings, stop).map_err(|err| err.to_string())
}

fn init_db() -> Result<(), String> {
    let settings = load_settings()?;
    let db_path = settings.resolve_db_path();
    HistoryStore::open(&db_path).map_err(|err| err.to_string())?;
    println!("database ready at {}", db_path.display());
    Ok(())
}

fn doctor() -> Result<(), String> {
    let path = config_path()?;
    let settings = Settings::load(&path).map_err(|err| err.to_string())?;
    println!("config: {}", path.display());
    println!("project root: {}", settings.project_root.display());
    println!("database: {}", settings.resolve_db_path().display());
    println!("model: {}", settings.model);
    println!("allowed users: {}", settings.allowed_user_ids.len());
    println!("ok");
    Ok(())
}
