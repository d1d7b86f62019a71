use std::{any::Any, num::NonZeroUsize, sync::Arc, time::Instant};

use metrics::{counter, histogram};
use tokio::{sync::Semaphore, task};
use tracing::{info, warn};

use crate::domain::{
    error::RenderFailure,
    types::{RenderOutput, RenderRequest},
};

use super::RenderEngine;

/// Runs render requests against an engine with bounded concurrency.
///
/// Every engine failure, including a panic inside the engine, comes back as a
/// [`RenderFailure`]; nothing escapes to the caller's cleanup path.
#[derive(Clone)]
pub struct RenderDispatcher {
    engine: Arc<dyn RenderEngine>,
    permits: Arc<Semaphore>,
}

impl RenderDispatcher {
    pub fn new(engine: Arc<dyn RenderEngine>, max_concurrency: NonZeroUsize) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(max_concurrency.get())),
        }
    }

    pub async fn dispatch(&self, request: RenderRequest) -> Result<RenderOutput, RenderFailure> {
        let started_at = Instant::now();
        let format = request.format;
        let main_file = request.main_file.display().to_string();

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| RenderFailure::new("render executor is shut down"))?;
        let queued_ms = started_at.elapsed().as_millis() as u64;

        let engine = Arc::clone(&self.engine);
        let joined = task::spawn_blocking(move || {
            let _permit = permit;
            engine.render(&request)
        })
        .await;

        let result = match joined {
            Ok(Ok(bytes)) if bytes.is_empty() => {
                Err(RenderFailure::new("render engine produced no output"))
            }
            Ok(Ok(bytes)) => Ok(RenderOutput::new(bytes, format)),
            Ok(Err(failure)) => Err(failure),
            Err(err) if err.is_panic() => Err(RenderFailure::new(format!(
                "render engine panicked: {}",
                panic_message(err.into_panic().as_ref())
            ))),
            Err(err) => Err(RenderFailure::new(format!("render task aborted: {err}"))),
        };

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        counter!("rendergate_render_total", "format" => format.as_str()).increment(1);
        histogram!("rendergate_render_ms", "format" => format.as_str()).record(elapsed_ms as f64);

        match &result {
            Ok(output) => info!(
                target = "rendergate::render",
                op = "render::dispatch",
                result = "ok",
                engine = self.engine.name(),
                format = format.as_str(),
                main_file = %main_file,
                queued_ms,
                elapsed_ms,
                bytes = output.bytes.len(),
                "document rendered"
            ),
            Err(failure) => {
                counter!("rendergate_render_failure_total", "format" => format.as_str())
                    .increment(1);
                warn!(
                    target = "rendergate::render",
                    op = "render::dispatch",
                    result = "error",
                    engine = self.engine.name(),
                    format = format.as_str(),
                    main_file = %main_file,
                    queued_ms,
                    elapsed_ms,
                    error = %failure,
                    "document render failed"
                );
            }
        }

        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    use crate::domain::types::OutputFormat;

    use super::*;

    struct Scripted(fn(&RenderRequest) -> Result<Vec<u8>, RenderFailure>);

    impl RenderEngine for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderFailure> {
            (self.0)(request)
        }
    }

    fn dispatcher(engine: impl RenderEngine) -> RenderDispatcher {
        RenderDispatcher::new(Arc::new(engine), NonZeroUsize::MIN)
    }

    fn request(format: OutputFormat) -> RenderRequest {
        RenderRequest::new("/workspace", "/workspace/main.typ", format)
    }

    #[tokio::test]
    async fn output_carries_format_mime_type() {
        let dispatcher = dispatcher(Scripted(|_| Ok(b"<svg/>".to_vec())));
        let output = dispatcher
            .dispatch(request(OutputFormat::Svg))
            .await
            .expect("render");
        assert_eq!(output.mime_type(), "image/svg+xml");
        assert_eq!(output.bytes.as_ref(), b"<svg/>");
    }

    #[tokio::test]
    async fn engine_failures_pass_through() {
        let dispatcher =
            dispatcher(Scripted(|_| Err(RenderFailure::new("error: file not found"))));
        let failure = dispatcher
            .dispatch(request(OutputFormat::Pdf))
            .await
            .expect_err("failure");
        assert_eq!(failure.message(), "error: file not found");
    }

    #[tokio::test]
    async fn engine_panics_become_render_failures() {
        let dispatcher = dispatcher(Scripted(|_| panic!("layout exploded")));
        let failure = dispatcher
            .dispatch(request(OutputFormat::Pdf))
            .await
            .expect_err("panic is contained");
        assert!(failure.message().contains("layout exploded"));
    }

    #[tokio::test]
    async fn empty_output_is_a_failure() {
        let dispatcher = dispatcher(Scripted(|_| Ok(Vec::new())));
        assert!(dispatcher.dispatch(request(OutputFormat::Pdf)).await.is_err());
    }

    struct Counting {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl RenderEngine for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn render(&self, _request: &RenderRequest) -> Result<Vec<u8>, RenderFailure> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(b"%PDF".to_vec())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded_by_permits() {
        let engine = Arc::new(Counting {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let limit = NonZeroUsize::new(2).expect("non-zero");
        let dispatcher = RenderDispatcher::new(engine.clone(), limit);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                dispatcher.dispatch(request(OutputFormat::Pdf)).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("render");
        }

        assert!(engine.peak.load(Ordering::SeqCst) <= 2);
    }
}
