#[tokio::main]
async fn main() -> anyhow::Result<()> {
    printwatch_agent::run().await
}
