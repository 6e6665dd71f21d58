use bridge_server::{bootstrap::bootstrap, routes::router};

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_target(false)
		.init();

	let state = match bootstrap().await {
		Ok(state) => state,
		Err(err) => {
			tracing::error!("failed to start: {err}");
			std::process::exit(1);
		}
	};

	let listen_addr = state.config.listen_addr.clone();
	let listener = match tokio::net::TcpListener::bind(listen_addr.as_ref()).await {
		Ok(listener) => listener,
		Err(err) => {
			tracing::error!("failed to bind {listen_addr}: {err}");
			std::process::exit(1);
		}
	};

	tracing::info!("listening on {listen_addr}");
	let app = router(state).layer(tower_http::trace::TraceLayer::new_for_http());
	if let Err(err) = axum::serve(listener, app).await {
		tracing::error!("server error: {err}");
		std::process::exit(1);
	}
}

// vim: ts=4
