//! slabd binary.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    slabd_node_commands::run().await
}
