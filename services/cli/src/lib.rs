mod cli;
mod commands;
mod infra;

use mlm_engine::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
