use valorimob_pipeline::run;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("valorimob error: {err}");
        std::process::exit(1);
    }
}
