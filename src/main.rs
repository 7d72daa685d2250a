#[tokio::main]
async fn main() {
    if let Err(e) = lexiscan::run().await {
        eprintln!("lexiscan: {e}");
        std::process::exit(1);
    }
}
