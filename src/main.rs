use clap::Parser;
use log::error;
use timetable_solver::config::Config;
use timetable_solver::server;

#[tokio::main]
async fn main() {
    let config = Config::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    if let Err(err) = server::run_server(config).await {
        error!("{err}");
        std::process::exit(1);
    }
}
