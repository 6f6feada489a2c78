pub mod cmd;

use lxdlab::utils::tracing::init_tracing;

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = cmd::run_cli().await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
