use anyhow::Result;

use warta_daemon::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = telemetry::init("warta-daemon")?;
    warta_daemon::server::run().await
}
