#[tokio::main]
async fn main() {
    if let Err(e) = drug_pipeline::run().await {
        eprintln!("drug-pipeline: {e}");
        std::process::exit(1);
    }
}
