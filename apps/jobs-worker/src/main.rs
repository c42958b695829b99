//! Jobs Worker Service - Entry Point
//!
//! Consumes every jobs-domain queue and promotes their delayed jobs.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    jobs_worker::run().await
}
