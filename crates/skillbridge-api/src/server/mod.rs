//! Web server for the delegation API.

pub mod router;
pub mod types;

pub use router::create_router;
pub use types::{MAX_REQUEST_BODY_SIZE, ServerState};

use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: ServerState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state_for_cleanup = state.clone();
    let app = create_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    crate::shutdown::cleanup_resources(&state_for_cleanup).await;
    Ok(())
}

/// Start the web server on a specific address.
///
/// Returns after Ctrl+C or SIGTERM once in-flight requests have drained.
pub async fn run(bind: SocketAddr, state: ServerState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!(
        "Delegation API listening on http://{} ({} skills registered)",
        listener.local_addr()?,
        state.skills.len()
    );

    serve(listener, state, crate::shutdown::shutdown_signal()).await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}
