mod clock;
mod cycle;
mod host;
mod phases;
mod pump;
mod relays;
mod requests;
mod sensors;
mod signal;
mod status;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
