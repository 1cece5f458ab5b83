//! Functional tests for end-to-end generation against a mock backend

use async_trait::async_trait;
use genjob_client::backend::{
    GenerationKind, GenerationOutput, GenerationRequest, HttpBackend, IdField, JobHandle,
    RetryPolicy,
};
use genjob_client::config::UploadConfig;
use genjob_client::error::{AppError, ErrorCode};
use genjob_client::poller::{
    DelaySchedule, PollPhase, PollProfile, PollProfiles, Poller, ResultUrlRewrite,
};
use genjob_client::session::{GenerationSession, PlanLimits, UsageCounter};
use genjob_client::time::{RecordingSleeper, Sleeper};
use genjob_client::upload::{FileRef, ProxyUploader};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use tokio_util::sync::CancellationToken;
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

/// Sleeper that never wakes up
struct PendingSleeper;

#[async_trait]
impl Sleeper for PendingSleeper {
    async fn sleep(&self, _duration: Duration) {
        futures::future::pending::<()>().await
    }
}

struct Harness {
    session: Arc<GenerationSession>,
    usage: Arc<UsageCounter>,
    backend_sleeper: Arc<RecordingSleeper>,
}

fn harness(server: &MockServer, used: u32, poll_sleeper: Arc<dyn Sleeper>) -> Harness {
    let backend_sleeper = Arc::new(RecordingSleeper::new());
    let backend = HttpBackend::new(
        &server.uri(),
        Duration::from_secs(5),
        RetryPolicy::default(),
        backend_sleeper.clone(),
    )
    .unwrap();
    let uploader = ProxyUploader::new(
        &server.uri(),
        UploadConfig::default(),
        Duration::from_secs(5),
        RetryPolicy::default(),
        Arc::new(RecordingSleeper::new()),
    )
    .unwrap();
    let poller = Poller::with_sleeper(ResultUrlRewrite::identity(), poll_sleeper);
    let usage = Arc::new(UsageCounter::new("free", &PlanLimits::default(), used));

    let session = GenerationSession::new(
        Arc::new(backend),
        Arc::new(uploader),
        Arc::new(poller),
        PollProfiles::default(),
        usage.clone(),
        UploadConfig::default(),
    );

    Harness {
        session: Arc::new(session),
        usage,
        backend_sleeper,
    }
}

/// Matches multipart bodies containing `needle`; file bytes are not UTF-8
fn body_has(needle: &'static str) -> impl Fn(&Request) -> bool {
    move |request: &Request| {
        request
            .body
            .windows(needle.len())
            .any(|window| window == needle.as_bytes())
    }
}

fn product_image() -> FileRef {
    FileRef::from_bytes("product.png", "image/png", PNG.to_vec())
}

async fn requests_to(server: &MockServer, route: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == route)
        .collect()
}

#[tokio::test]
async fn test_image_job_polled_to_completion() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate-branded-ad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"generation_id": "abc"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/stable-diffusion/image-result/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/stable-diffusion/image-result/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "image_url": "https://x/y.png",
            "metadata": {"seed": 42}
        })))
        .mount(&server)
        .await;

    let h = harness(&server, 0, Arc::new(RecordingSleeper::new()));
    let request = GenerationRequest::new(GenerationKind::Image, "luxury perfume ocean sunset")
        .with_primary_asset(product_image());

    let output = h.session.generate(request).await.unwrap();

    assert_eq!(output.url(), Some("https://x/y.png"));
    assert_eq!(server.received_requests().await.unwrap().len(), 5);

    let state = h.session.state();
    assert!(!state.is_generating);
    assert_eq!(state.phase, Some(PollPhase::Completed));
    assert_eq!(state.job_id.as_deref(), Some("abc"));
    assert_eq!(state.generated_url.as_deref(), Some("https://x/y.png"));
    assert_eq!(state.metadata, Some(json!({"seed": 42})));
    assert_eq!(state.previews.len(), 1);
    assert!(state.previews[0].starts_with("data:image/png;base64,"));
    assert_eq!(h.usage.used(), 1);
}

#[tokio::test]
async fn test_image_ready_without_polling() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate-branded-ad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "imageUrl": "https://x/ready.png"
        })))
        .mount(&server)
        .await;

    let h = harness(&server, 0, Arc::new(RecordingSleeper::new()));
    let request = GenerationRequest::new(GenerationKind::Image, "studio shot")
        .with_primary_asset(product_image());

    let output = h.session.generate(request).await.unwrap();

    assert_eq!(output.url(), Some("https://x/ready.png"));
    assert_eq!(h.session.state().job_id, None);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(h.usage.used(), 1);
}

#[tokio::test]
async fn test_video_submit_retries_rate_limits() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"url": "https://cdn.test/src.png"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate-video-json"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": "slow down"})))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate-video-json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"video_url": "https://x/v.mp4"})),
        )
        .mount(&server)
        .await;

    let h = harness(&server, 0, Arc::new(RecordingSleeper::new()));
    let request = GenerationRequest::new(GenerationKind::Video, "slow pan across the bottle")
        .with_primary_asset(product_image());

    let output = h.session.generate(request).await.unwrap();

    assert_eq!(output.url(), Some("https://x/v.mp4"));
    assert_eq!(h.backend_sleeper.total(), Duration::from_millis(21000));

    let submits = requests_to(&server, "/api/generate-video-json").await;
    assert_eq!(submits.len(), 3);
    let body: Value = submits[2].body_json().unwrap();
    assert_eq!(body["promptImageUrl"], "https://cdn.test/src.png");
    assert_eq!(body["promptText"], "slow pan across the bottle");
    assert_eq!(body["model"], "gen4_turbo");
    assert!(body.get("referenceImageUrl").is_none());
    assert_eq!(h.usage.used(), 1);
}

#[tokio::test]
async fn test_video_job_id_polled_on_video_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .and(body_has("product.png"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"url": "https://cdn.test/src.png"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .and(body_has("end.png"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"url": "https://cdn.test/end.png"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate-video-json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "j-7"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/video-status/j-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "queued"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/video-status/j-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "video_url": "https://x/j7.mp4"
        })))
        .mount(&server)
        .await;

    let poll_sleeper = Arc::new(RecordingSleeper::new());
    let h = harness(&server, 0, poll_sleeper.clone());
    let request = GenerationRequest::new(GenerationKind::Video, "orbit")
        .with_primary_asset(product_image())
        .with_reference_asset(FileRef::from_bytes("end.png", "image/png", PNG.to_vec()));

    let output = h.session.generate(request).await.unwrap();

    assert_eq!(output.url(), Some("https://x/j7.mp4"));
    assert_eq!(
        poll_sleeper.delays(),
        vec![Duration::from_millis(10000), Duration::from_millis(10000)]
    );
    assert_eq!(requests_to(&server, "/api/upload").await.len(), 2);

    let submit = &requests_to(&server, "/api/generate-video-json").await[0];
    let body: Value = submit.body_json().unwrap();
    assert_eq!(body["promptImageUrl"], "https://cdn.test/src.png");
    assert_eq!(body["referenceImageUrl"], "https://cdn.test/end.png");
    assert_eq!(h.session.state().previews.len(), 2);
}

#[tokio::test]
async fn test_video_task_id_polled_on_video_task() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"url": "https://cdn.test/src.png"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate-video-json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "t-1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/video-task/t-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "SUCCEEDED",
            "output": ["https://x/t1.mp4"]
        })))
        .mount(&server)
        .await;

    let poll_sleeper = Arc::new(RecordingSleeper::new());
    let h = harness(&server, 0, poll_sleeper.clone());
    let request = GenerationRequest::new(GenerationKind::Video, "zoom")
        .with_primary_asset(product_image());

    let output = h.session.generate(request).await.unwrap();

    assert_eq!(output.url(), Some("https://x/t1.mp4"));
    assert_eq!(poll_sleeper.delays(), vec![Duration::from_millis(5000)]);
}

#[tokio::test]
async fn test_content_rejection_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate-branded-ad"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "prompt flagged",
            "code": "nsfw"
        })))
        .mount(&server)
        .await;

    let h = harness(&server, 0, Arc::new(RecordingSleeper::new()));
    let request = GenerationRequest::new(GenerationKind::Image, "something unsafe")
        .with_primary_asset(product_image());

    let err = h.session.generate(request).await.unwrap_err();

    assert!(matches!(err, AppError::ContentRejected(_)));
    let state = h.session.state();
    assert!(!state.is_generating);
    assert_eq!(state.phase, Some(PollPhase::Failed));
    let notice = state.last_notice.unwrap();
    assert_eq!(notice.code, ErrorCode::ContentRejected);
    assert_eq!(notice.message, ErrorCode::ContentRejected.user_message());
    assert_eq!(h.usage.used(), 0);
}

#[tokio::test]
async fn test_plan_limit_blocks_before_network() {
    let server = MockServer::start().await;

    let h = harness(&server, 3, Arc::new(RecordingSleeper::new()));
    let request = GenerationRequest::new(GenerationKind::Text, "tagline for a perfume");

    let err = h.session.generate(request).await.unwrap_err();

    assert!(matches!(err, AppError::PlanLimitExceeded(_)));
    assert_eq!(
        h.session.state().last_notice.map(|n| n.code),
        Some(ErrorCode::PlanLimit)
    );
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_request_makes_no_calls() {
    let server = MockServer::start().await;

    let h = harness(&server, 0, Arc::new(RecordingSleeper::new()));
    let request = GenerationRequest::new(GenerationKind::Video, "no source image");

    let err = h.session.generate(request).await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::Validation);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unmount_stops_polling_and_freezes_state() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate-branded-ad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"generation_id": "slow"})))
        .mount(&server)
        .await;

    let h = harness(&server, 0, Arc::new(PendingSleeper));
    let task = {
        let session = h.session.clone();
        tokio::spawn(async move {
            let request = GenerationRequest::new(GenerationKind::Image, "never finishes")
                .with_primary_asset(product_image());
            session.generate(request).await
        })
    };

    while h.session.state().phase != Some(PollPhase::Polling) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let busy = h
        .session
        .generate(GenerationRequest::new(GenerationKind::Text, "second"))
        .await;
    assert!(matches!(busy, Err(AppError::Busy)));

    let before = h.session.state();
    h.session.unmount();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(AppError::Cancelled)));
    assert_eq!(h.session.state(), before);
    assert!(h.session.state().last_notice.is_none());
    assert_eq!(h.usage.used(), 0);

    let after = h
        .session
        .generate(GenerationRequest::new(GenerationKind::Text, "late"))
        .await;
    assert!(matches!(after, Err(AppError::Cancelled)));
    assert!(requests_to(&server, "/api/v1/stable-diffusion/image-result/slow")
        .await
        .is_empty());
}

#[tokio::test]
async fn test_speech_and_text_are_synchronous() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/text-to-speech"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"audio_url": "https://x/a.mp3"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate-text"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"text": "Bottled ocean light."})),
        )
        .mount(&server)
        .await;

    let h = harness(&server, 0, Arc::new(RecordingSleeper::new()));

    let speech = h
        .session
        .generate(GenerationRequest::new(GenerationKind::Tts, "Welcome to the launch"))
        .await
        .unwrap();
    assert_eq!(speech.url(), Some("https://x/a.mp3"));

    let tts = &requests_to(&server, "/api/text-to-speech").await[0];
    let body: Value = tts.body_json().unwrap();
    assert_eq!(body["text"], "Welcome to the launch");
    assert_eq!(body["voice_id"], "21m00Tcm4TlvDq8ikWAM");

    let text = h
        .session
        .generate(GenerationRequest::new(GenerationKind::Text, "tagline"))
        .await
        .unwrap();
    assert_eq!(
        text,
        GenerationOutput::Text {
            content: "Bottled ocean light.".to_string()
        }
    );
    assert_eq!(
        h.session.state().generated_text.as_deref(),
        Some("Bottled ocean light.")
    );
    assert_eq!(h.usage.used(), 2);
}

#[tokio::test]
async fn test_abandoned_generate_releases_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate-branded-ad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"generation_id": "slow"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate-text"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "Still here."})))
        .mount(&server)
        .await;

    let h = harness(&server, 0, Arc::new(PendingSleeper));
    let request = GenerationRequest::new(GenerationKind::Image, "never finishes")
        .with_primary_asset(product_image());

    let abandoned =
        tokio::time::timeout(Duration::from_millis(300), h.session.generate(request)).await;
    assert!(abandoned.is_err());
    assert!(!h.session.state().is_generating);

    let output = h
        .session
        .generate(GenerationRequest::new(GenerationKind::Text, "tagline"))
        .await
        .unwrap();
    assert_eq!(
        output,
        GenerationOutput::Text {
            content: "Still here.".to_string()
        }
    );
    assert_eq!(h.usage.used(), 1);
}

#[tokio::test]
async fn test_rate_limited_status_checks_are_sent_once_per_attempt() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/stable-diffusion/image-result/busy"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": "slow down"})))
        .mount(&server)
        .await;

    let backend_sleeper = Arc::new(RecordingSleeper::new());
    let backend = HttpBackend::new(
        &server.uri(),
        Duration::from_secs(5),
        RetryPolicy::default(),
        backend_sleeper.clone(),
    )
    .unwrap();
    let poll_sleeper = Arc::new(RecordingSleeper::new());
    let poller = Poller::with_sleeper(ResultUrlRewrite::identity(), poll_sleeper.clone());
    let profile = PollProfile {
        schedule: DelaySchedule::Fixed(Duration::from_millis(10000)),
        max_attempts: 2,
    };
    let handle = JobHandle::new("busy", IdField::GenerationId, GenerationKind::Image);

    let err = poller
        .poll(&backend, &handle, &profile, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::TimedOut { attempts: 2, .. }));
    assert_eq!(
        requests_to(&server, "/api/v1/stable-diffusion/image-result/busy")
            .await
            .len(),
        2
    );
    assert!(backend_sleeper.delays().is_empty());
    assert_eq!(poll_sleeper.total(), Duration::from_millis(20000));
}
