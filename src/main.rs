// src/main.rs

use taskdag::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();
    logging::init_logging(args.verbose);

    if let Err(err) = run(args).await {
        // A canceled run (Ctrl-C) is not a failure worth reporting.
        if !err.is_canceled() {
            eprintln!("taskdag: {err}");
            std::process::exit(1);
        }
    }
}
