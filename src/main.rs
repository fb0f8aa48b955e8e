#[tokio::main]
async fn main() -> anyhow::Result<()> {
    switchboard::init_tracing();
    let options = switchboard::LaunchOptions::from_args(std::env::args().skip(1))?;
    if let Err(e) = switchboard::run(options).await {
        tracing::error!(error = %format!("{e:#}"), "switchboard exited with error");
        return Err(e);
    }
    Ok(())
}
