//! Multi-model embedding inference server.
use embedserve_cmd::error::ApiError;
use embedserve_cmd::run;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    run().await
}
