use shorts_assistant::llm::mock::MockGenerativeService;
use shorts_assistant::{
    AnalysisPipeline, AssistantError, ChatRole, ChatTurn, Config, ConfigBuilder, ErrorKind, FileState,
    SessionState, Suggestion, VideoStager, SEED_REQUEST,
};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const MP4_HEADER: &[u8] = b"\x00\x00\x00\x18ftypmp42\x00\x00\x00\x00mp42isom";

fn test_config(dir: &TempDir) -> Config {
    ConfigBuilder::new()
        .with_poll_interval(Duration::from_millis(1))
        .with_temp_dir(dir.path().to_path_buf())
        .build()
}

async fn analyzed_session(config: &Config, service: &MockGenerativeService) -> SessionState {
    let pipeline = AnalysisPipeline::new(config);
    let video = VideoStager::new(config.video.clone())
        .stage_bytes("short.mp4", Some("video/mp4"), MP4_HEADER)
        .await
        .unwrap();
    let mut session = SessionState::new();
    pipeline
        .analyze_into(service, &mut session, video, &CancellationToken::new())
        .await
        .unwrap();
    session
}

#[tokio::test]
async fn test_chat_history_grows_by_two_per_message() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = MockGenerativeService::new().with_analysis("【タイトル】Test");
    let pipeline = AnalysisPipeline::new(&config);
    let mut session = analyzed_session(&config, &service).await;

    for (i, message) in ["もっと短く", "英語版も", "絵文字を追加"].iter().enumerate() {
        pipeline.chat(&service, &mut session, message).await.unwrap();
        assert_eq!(session.chat_history.len(), 2 + 2 * (i + 1));
    }

    let roles: Vec<ChatRole> = session.chat_history.iter().map(|turn| turn.role).collect();
    for (i, role) in roles.iter().enumerate() {
        let expected = if i % 2 == 0 { ChatRole::User } else { ChatRole::Model };
        assert_eq!(*role, expected);
    }
    assert_eq!(session.chat_history[2].content, "もっと短く");
    assert_eq!(session.chat_history[6].content, "絵文字を追加");
}

#[tokio::test]
async fn test_title_scenario_seeds_transcript() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = MockGenerativeService::new().with_analysis("【タイトル】Test");
    let session = analyzed_session(&config, &service).await;

    assert_eq!(session.analysis_result.as_deref(), Some("【タイトル】Test"));
    assert_eq!(
        session.chat_history,
        vec![ChatTurn::user(SEED_REQUEST), ChatTurn::model("【タイトル】Test")]
    );
    assert_eq!(session.uploaded_file.as_deref(), Some("files/mock-video"));

    let suggestion = Suggestion::parse(session.analysis_result.as_deref().unwrap());
    assert_eq!(suggestion.title.as_deref(), Some("Test"));
}

#[tokio::test]
async fn test_failed_processing_leaves_session_unset() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = MockGenerativeService::new().with_poll_states(vec![FileState::Processing, FileState::Failed]);
    let pipeline = AnalysisPipeline::new(&config);
    let video = VideoStager::new(config.video.clone())
        .stage_bytes("short.mp4", None, MP4_HEADER)
        .await
        .unwrap();

    let mut session = SessionState::new();
    let err = pipeline
        .analyze_into(&service, &mut session, video, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AssistantError::ProcessingFailed(_)));
    assert_eq!(err.kind(), ErrorKind::RemoteProcessing);
    assert!(session.analysis_result.is_none());
    assert!(session.chat_history.is_empty());
    assert!(session.uploaded_file.is_none());
    assert_eq!(service.calls().generations, 0);
    assert_eq!(service.calls().polls, 2);
}

#[tokio::test]
async fn test_reanalysis_resets_history() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = MockGenerativeService::new()
        .with_analysis("first")
        .with_analysis("second");
    let pipeline = AnalysisPipeline::new(&config);
    let mut session = analyzed_session(&config, &service).await;

    pipeline.chat(&service, &mut session, "hello").await.unwrap();
    assert_eq!(session.chat_history.len(), 4);

    let video = VideoStager::new(config.video.clone())
        .stage_bytes("again.mp4", None, MP4_HEADER)
        .await
        .unwrap();
    pipeline
        .analyze_into(&service, &mut session, video, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.analysis_result.as_deref(), Some("second"));
    assert_eq!(session.chat_history, vec![ChatTurn::user(SEED_REQUEST), ChatTurn::model("second")]);
}

#[tokio::test]
async fn test_failed_reanalysis_keeps_previous_result() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = MockGenerativeService::new()
        .with_analysis("first")
        .with_analysis_error("model overloaded");
    let pipeline = AnalysisPipeline::new(&config);
    let mut session = analyzed_session(&config, &service).await;
    pipeline.chat(&service, &mut session, "hello").await.unwrap();
    let before = session.clone();

    let video = VideoStager::new(config.video.clone())
        .stage_bytes("again.mp4", None, MP4_HEADER)
        .await
        .unwrap();
    let err = pipeline
        .analyze_into(&service, &mut session, video, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RemoteCall);
    assert_eq!(session.analysis_result, before.analysis_result);
    assert_eq!(session.uploaded_file, before.uploaded_file);
    assert_eq!(session.chat_history, before.chat_history);
    assert_eq!(session.chat_history.len(), 4);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_duplicate_messages_are_kept() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = MockGenerativeService::new();
    let pipeline = AnalysisPipeline::new(&config);
    let mut session = analyzed_session(&config, &service).await;

    pipeline.chat(&service, &mut session, "もう一案").await.unwrap();
    pipeline.chat(&service, &mut session, "もう一案").await.unwrap();

    assert_eq!(session.chat_history.len(), 6);
    assert_eq!(session.chat_history[2], session.chat_history[4]);
    assert_eq!(session.chat_history[3].content, "Mock reply 1");
    assert_eq!(session.chat_history[5].content, "Mock reply 2");
}

#[tokio::test]
async fn test_chat_replays_transcript_before_new_message() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = MockGenerativeService::new().with_analysis("analysis");
    let pipeline = AnalysisPipeline::new(&config);
    let mut session = analyzed_session(&config, &service).await;

    pipeline.chat(&service, &mut session, "one").await.unwrap();
    pipeline.chat(&service, &mut session, "two").await.unwrap();

    let histories = service.chat_histories();
    assert_eq!(histories[0].len(), 2);
    assert_eq!(histories[1].len(), 4);
    assert_eq!(histories[1][2], ChatTurn::user("one"));
}

#[tokio::test]
async fn test_context_window_keeps_seed_turns() {
    let dir = TempDir::new().unwrap();
    let config = ConfigBuilder::new()
        .with_poll_interval(Duration::from_millis(1))
        .with_temp_dir(dir.path().to_path_buf())
        .with_max_context_turns(2)
        .build();
    let service = MockGenerativeService::new().with_analysis("analysis");
    let pipeline = AnalysisPipeline::new(&config);
    let mut session = analyzed_session(&config, &service).await;

    for message in ["a", "b", "c"] {
        pipeline.chat(&service, &mut session, message).await.unwrap();
    }

    // The full transcript is still kept locally
    assert_eq!(session.chat_history.len(), 8);

    let last = service.chat_histories().pop().unwrap();
    assert_eq!(
        last,
        vec![
            ChatTurn::user(SEED_REQUEST),
            ChatTurn::model("analysis"),
            ChatTurn::user("b"),
            ChatTurn::model("Mock reply 2"),
        ]
    );
}

#[tokio::test]
async fn test_chat_failure_keeps_user_turn() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = MockGenerativeService::new().with_reply_error("quota exceeded");
    let pipeline = AnalysisPipeline::new(&config);
    let mut session = analyzed_session(&config, &service).await;

    let err = pipeline.chat(&service, &mut session, "retry?").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteCall);
    assert_eq!(session.chat_history.len(), 3);
    assert_eq!(session.chat_history[2], ChatTurn::user("retry?"));
}

#[tokio::test]
async fn test_chat_before_analysis_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = MockGenerativeService::new();
    let pipeline = AnalysisPipeline::new(&config);
    let mut session = SessionState::new();

    let err = pipeline.chat(&service, &mut session, "hi").await.unwrap_err();
    assert!(matches!(err, AssistantError::NoAnalysis));
    assert!(session.chat_history.is_empty());
    assert_eq!(service.calls().chats, 0);
}

#[tokio::test]
async fn test_staged_file_is_gone_after_analysis() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let service = MockGenerativeService::new();
    analyzed_session(&config, &service).await;

    let uploaded = service.uploaded_paths();
    assert_eq!(uploaded.len(), 1);
    assert!(uploaded[0].1, "file should exist while uploading");
    assert!(!uploaded[0].0.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
