use tracing::{Instrument, trace_span};
use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use pgpipe::Result;

mod pipeline;
mod copy;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::Registry::default()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    pipeline::main().instrument(trace_span!("pipeline")).await?;
    copy::main().instrument(trace_span!("copy")).await?;

    Ok(())
}
