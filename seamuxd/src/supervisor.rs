//! Daemon orchestration
//!
//! Brings the system up in the order that keeps the lifecycle sound:
//! every endpoint registers before any task runs (so the
//! initialization barrier covers them all), the engine and signal
//! handling start before the endpoints, and the supervisor then sits
//! in the reaper until every endpoint has died and been joined.
//! Shutdown needs no special path: a termination signal stops the
//! inputs, the last input closes the central queue, the engine closes
//! every output queue, and the reaper drains what remains.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use seamux_core::{engine, Router};

use crate::config::EndpointSpec;
use crate::io::{self, AdapterError};

/// Run the multiplexer until every endpoint has gone.
pub async fn run(router: Arc<Router>, specs: Vec<EndpointSpec>) -> Result<(), AdapterError> {
    let mut pending = Vec::new();
    for spec in &specs {
        pending.extend(io::init_endpoint(&router, spec).await?);
    }

    tokio::spawn(signal_watcher(router.clone()));
    let engine_task = tokio::spawn(engine::run(router.clone()));

    let mut tasks = HashMap::new();
    for endpoint in pending {
        tasks.insert(endpoint.id, tokio::spawn(endpoint.task));
    }

    router.wait_initialized().await;
    info!(
        inputs = router.input_count(),
        outputs = router.output_count(),
        "endpoints up"
    );

    // No inputs means the stream is already over; close the central
    // queue so the outputs drain and exit instead of waiting forever.
    if router.input_count() == 0 {
        router.central().close();
    }

    router.run_reaper(&mut tasks).await;
    let _ = engine_task.await;
    info!("shutdown complete");
    Ok(())
}

/// Translate SIGTERM/SIGINT into a shutdown request, as often as they
/// arrive.
async fn signal_watcher(router: Arc<Router>) {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler");
            return;
        }
    };
    let mut int = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "cannot install SIGINT handler");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = term.recv() => {}
            _ = int.recv() => {}
        }
        info!("termination signal received");
        router.request_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::config::parse_spec;

    #[tokio::test]
    async fn file_pipeline_fans_out_and_exits_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.nmea");
        let out_a = dir.path().join("a.nmea");
        let out_b = dir.path().join("b.nmea");
        std::fs::write(&input, "$HELLO*00\r\n$WORLD*00\r\n").unwrap();

        let specs = vec![
            parse_spec(&format!("file:direction=in,filename={}", input.display())).unwrap(),
            parse_spec(&format!("file:direction=out,filename={}", out_a.display())).unwrap(),
            parse_spec(&format!("file:direction=out,filename={}", out_b.display())).unwrap(),
        ];

        let router = Router::new(16);
        timeout(Duration::from_secs(5), run(router, specs))
            .await
            .expect("pipeline finished")
            .expect("pipeline succeeded");

        let expected = "$HELLO*00\r\n$WORLD*00\r\n";
        assert_eq!(std::fs::read_to_string(&out_a).unwrap(), expected);
        assert_eq!(std::fs::read_to_string(&out_b).unwrap(), expected);
    }

    #[tokio::test]
    async fn outputs_without_inputs_exit_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.nmea");
        let specs =
            vec![parse_spec(&format!("file:direction=out,filename={}", out.display())).unwrap()];

        let router = Router::new(16);
        timeout(Duration::from_secs(5), run(router, specs))
            .await
            .expect("finished without inputs")
            .expect("succeeded");
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "");
    }

    #[tokio::test]
    async fn shutdown_request_ends_a_listening_input() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.nmea");
        let specs = vec![
            parse_spec("tcp:mode=listen,direction=in,address=127.0.0.1,port=0").unwrap(),
            parse_spec(&format!("file:direction=out,filename={}", out.display())).unwrap(),
        ];

        let router = Router::new(16);
        let daemon = tokio::spawn(run(router.clone(), specs));

        tokio::time::sleep(Duration::from_millis(100)).await;
        router.request_shutdown();

        timeout(Duration::from_secs(5), daemon)
            .await
            .expect("daemon stopped after shutdown request")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn bad_endpoint_is_startup_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nonexistent.nmea");
        let specs =
            vec![parse_spec(&format!("file:direction=in,filename={}", missing.display())).unwrap()];

        let router = Router::new(16);
        let err = run(router, specs).await.unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }
}
