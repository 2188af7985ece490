#[tokio::main]
async fn main() -> anyhow::Result<()> {
    loyalty::run_cli().await
}
