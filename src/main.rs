#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    estudify_schedule::run().await
}
