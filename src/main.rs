use clap::Parser;
use log::{error, info, warn};
use netadapter::configuration::config::{Args, Config, ServerSettings};
use netadapter::configuration::layout::RuntimeLayout;
use netadapter::logging::{init_logging, RotatingLogFile, SharedLogFile, SERVER_TYPE_STRING};
use netadapter::process_supervision::SshLauncher;
use netadapter::server::ServerWorld;
use netadapter::storage::DatabaseStorage;
use std::sync::{Arc, Mutex};

fn fail(message: String) -> ! {
    error!("{}", message);
    eprintln!("{}", message);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if args.ver {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return;
    }

    // a peer closing mid-write must surface as EPIPE, not kill the server
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let config = Config::from_env().unwrap_or_else(|e| fail(format!("Unable to import configuration: {}", e)));
    let layout = RuntimeLayout::from_env(&config.common.netadapter_start_dir_name)
        .unwrap_or_else(|e| fail(format!("Unable to resolve the runtime layout: {}", e)));
    let settings = ServerSettings::resolve(&args, &config, layout)
        .unwrap_or_else(|e| fail(format!("Invalid settings: {}", e)));
    if let Err(e) = settings.layout.ensure_directories() {
        fail(format!("Unable to create runtime directories: {}", e));
    }

    let log_file: Option<SharedLogFile> = match RotatingLogFile::open(
        &settings.layout.log_dir,
        SERVER_TYPE_STRING,
        &settings.name,
        settings.log_cycle,
    ) {
        Ok(file) => Some(Arc::new(Mutex::new(file))),
        Err(e) => {
            eprintln!("Log file unavailable, logging to stderr only: {}", e);
            None
        }
    };
    init_logging(log_file.clone());
    info!(
        "{} {} starting as {} ({})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        settings.name,
        settings.role
    );

    let db = match DatabaseStorage::open(&settings.db_url) {
        Ok(db) => Arc::new(db),
        Err(e) => fail(format!("Unable to open the configuration database {}: {}", settings.db_url, e)),
    };
    let launcher = Arc::new(SshLauncher::new(&settings.advertise_ip));

    let world = match ServerWorld::app_start(settings, db, launcher, log_file) {
        Ok(world) => world,
        Err(e) => fail(format!("Unable to start the server: {}", e)),
    };
    let code = world.run().await;
    if code != 0 {
        warn!("Server stopped with code {}", code);
    } else {
        info!("Server stopped");
    }
    std::process::exit(code);
}
