// src/main.rs

use loaddag::types::RunOutcome;
use loaddag::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(RunOutcome::Succeeded) => {}
        Ok(_) => std::process::exit(1),
        Err(err) => {
            eprintln!("loaddag error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<RunOutcome> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
