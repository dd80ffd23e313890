//! `promptmint-worker` entrypoint.

use std::process;

#[tokio::main]
async fn main() {
    if let Err(e) = promptmint_worker::run().await {
        eprintln!("{e}");
        process::exit(1);
    }
}
