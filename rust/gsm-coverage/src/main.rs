use gsm_coverage::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    gsm_coverage::run().await
}
