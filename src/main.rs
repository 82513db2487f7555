#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "--reset-credentials") {
        local_pos::reset_credentials()?;
        println!("Terminal credentials cleared.");
        return Ok(());
    }
    local_pos::run().await
}
