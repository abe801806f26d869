#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nav_gateway::server::run().await
}
