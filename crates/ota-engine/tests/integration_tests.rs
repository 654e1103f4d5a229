//! Integration tests for the update lifecycle against mock collaborators

use ota_engine::prelude::*;
use ota_test_helpers::prelude::*;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> OtaConfig {
    OtaConfig {
        primary_index_url: PRIMARY_INDEX.to_string(),
        fallback_index_url: FALLBACK_INDEX.to_string(),
        restart_delay_ms: 0,
        ..Default::default()
    }
}

struct Rig {
    transport: Arc<MockTransport>,
    flash: Arc<MockFlash>,
    orchestrator: UpdateOrchestrator,
}

fn rig_with(running_version: &str, flash: MockFlash, config: OtaConfig) -> Rig {
    let transport = Arc::new(MockTransport::new());
    let flash = Arc::new(flash);
    let identity = Arc::new(StaticIdentity::new(TEST_PROJECT, running_version));
    let orchestrator = must(UpdateOrchestrator::new(
        config,
        transport.clone(),
        flash.clone(),
        identity,
    ));
    Rig {
        transport,
        flash,
        orchestrator,
    }
}

fn rig(running_version: &str) -> Rig {
    rig_with(running_version, MockFlash::new(), test_config())
}

async fn run(rig: &Rig, target: Option<&str>) -> UpdateAttempt {
    let handle = must_some(rig.orchestrator.launch(target), "launch was dropped");
    must(must_within(WAIT, handle).await)
}

mod update_flow {
    use super::*;

    #[tokio::test]
    async fn test_latest_selects_newest_and_flashes_it() {
        let rig = rig("v1.0.0-1");
        let image = firmware_image(20_000, 7);
        rig.transport.route(
            PRIMARY_INDEX,
            200,
            index_html(&["PROJ_v1.0.0-1.bin", "PROJ_v1.0.1-2.bin", "PROJ_v0.9.0-7.bin"]),
        );
        rig.transport.route(
            &format!("{PRIMARY_INDEX}PROJ_v1.0.1-2.bin"),
            200,
            pack_image(&image),
        );

        let attempt = run(&rig, None).await;

        assert_eq!(attempt.outcome, AttemptOutcome::RebootPending);
        assert_eq!(attempt.filename.as_deref(), Some("PROJ_v1.0.1-2.bin"));
        assert_eq!(attempt.index_url.as_deref(), Some(PRIMARY_INDEX));
        assert_eq!(attempt.bytes_written, image.len() as u64);
        assert_eq!(attempt.partition, Some(Partition::B));
        assert_eq!(rig.flash.image(), image);
        assert_eq!(rig.flash.boot_partition(), Some(Partition::B));
        assert_eq!(rig.flash.abort_count(), 0);
        assert_eq!(rig.flash.restart_count(), 1);
        assert_eq!(rig.orchestrator.state(), UpdateState::RebootPending);
        assert!(!rig.orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_specific_pins_given_components() {
        let rig = rig("v2.0.0-0");
        let image = firmware_image(5_000, 1);
        rig.transport.route(
            PRIMARY_INDEX,
            200,
            index_html(&["PROJ_v1.0.1-2.bin", "PROJ_v1.0.0-1.bin"]),
        );
        rig.transport.route(
            &format!("{PRIMARY_INDEX}PROJ_v1.0.0-1.bin"),
            200,
            pack_image(&image),
        );

        let attempt = run(&rig, Some("v1.0.0")).await;

        assert_eq!(attempt.filename.as_deref(), Some("PROJ_v1.0.0-1.bin"));
        assert_eq!(attempt.target.as_deref(), Some("v1.0.0"));
        assert_eq!(rig.flash.image(), image);
    }

    #[tokio::test]
    async fn test_empty_target_means_latest() {
        let rig = rig("v1.0.0-1");
        rig.transport
            .route(PRIMARY_INDEX, 200, index_html(&["PROJ_v1.1.0-0.bin"]));
        rig.transport.route(
            &format!("{PRIMARY_INDEX}PROJ_v1.1.0-0.bin"),
            200,
            pack_image(&firmware_image(100, 0)),
        );

        let attempt = run(&rig, Some("  ")).await;

        assert_eq!(attempt.target, None);
        assert_eq!(attempt.outcome, AttemptOutcome::RebootPending);
    }

    #[tokio::test]
    async fn test_index_read_in_small_chunks() {
        let rig = rig("v1.0.0-1");
        let listing = index_html(&["PROJ_v1.0.0-1.bin", "PROJ_v1.2.0-5.bin", "PROJ_v1.1.9-9.bin"]);
        rig.transport.route_chunked(PRIMARY_INDEX, 200, listing, 3);
        rig.transport.route_chunked(
            &format!("{PRIMARY_INDEX}PROJ_v1.2.0-5.bin"),
            200,
            pack_image(&firmware_image(9_000, 4)),
            17,
        );

        let attempt = run(&rig, None).await;

        assert_eq!(attempt.filename.as_deref(), Some("PROJ_v1.2.0-5.bin"));
        assert_eq!(attempt.outcome, AttemptOutcome::RebootPending);
    }

    #[tokio::test]
    async fn test_fallback_index_used_when_primary_unavailable() {
        let rig = rig("v1.0.0-1");
        rig.transport.refuse(PRIMARY_INDEX, "host unreachable");
        rig.transport
            .route(FALLBACK_INDEX, 200, index_html(&["PROJ_v1.0.2-0.bin"]));
        rig.transport.route(
            &format!("{FALLBACK_INDEX}PROJ_v1.0.2-0.bin"),
            200,
            pack_image(&firmware_image(3_000, 9)),
        );

        let attempt = run(&rig, None).await;

        assert_eq!(attempt.index_url.as_deref(), Some(FALLBACK_INDEX));
        assert_eq!(attempt.outcome, AttemptOutcome::RebootPending);
        assert_eq!(
            rig.transport.requests(),
            vec![
                PRIMARY_INDEX.to_string(),
                FALLBACK_INDEX.to_string(),
                format!("{FALLBACK_INDEX}PROJ_v1.0.2-0.bin"),
            ]
        );
    }

    #[tokio::test]
    async fn test_fallback_used_when_primary_has_no_candidate() {
        let rig = rig("v1.0.0-1");
        rig.transport
            .route(PRIMARY_INDEX, 200, index_html(&["PROJ_v0.1.0-0.bin"]));
        rig.transport
            .route(FALLBACK_INDEX, 200, index_html(&["PROJ_v1.3.0-0.bin"]));
        rig.transport.route(
            &format!("{FALLBACK_INDEX}PROJ_v1.3.0-0.bin"),
            200,
            pack_image(&firmware_image(3_000, 2)),
        );

        let attempt = run(&rig, None).await;
        assert_eq!(attempt.filename.as_deref(), Some("PROJ_v1.3.0-0.bin"));
    }

    #[tokio::test]
    async fn test_up_to_date_is_no_candidate() {
        let rig = rig("v1.0.0-1");
        rig.transport
            .route(PRIMARY_INDEX, 200, index_html(&["PROJ_v1.0.0-1.bin"]));
        rig.transport.route(FALLBACK_INDEX, 500, "");

        let attempt = run(&rig, None).await;

        assert_eq!(attempt.outcome, AttemptOutcome::NoCandidate);
        assert!(matches!(rig.orchestrator.state(), UpdateState::Failed { .. }));
        assert!(rig.flash.events().is_empty());
    }

    #[tokio::test]
    async fn test_second_launch_is_dropped() {
        let rig = rig("v1.0.0-1");
        rig.transport
            .route(PRIMARY_INDEX, 200, index_html(&["PROJ_v1.0.0-1.bin"]));

        let first = must_some(rig.orchestrator.launch(None), "first launch");
        assert!(rig.orchestrator.is_running());
        assert!(rig.orchestrator.launch(Some("v2")).is_none());
        assert!(matches!(
            rig.orchestrator.try_launch_with(None, |_| {}),
            Err(OtaError::UpdateInProgress)
        ));

        let attempt = must(must_within(WAIT, first).await);
        assert_eq!(attempt.outcome, AttemptOutcome::NoCandidate);
        assert!(!rig.orchestrator.is_running());
        assert!(rig.orchestrator.launch(None).is_some());
    }

    #[tokio::test]
    async fn test_subscribers_observe_final_state() {
        let rig = rig("v1.0.0-1");
        rig.transport
            .route(PRIMARY_INDEX, 200, index_html(&["PROJ_v1.0.5-0.bin"]));
        rig.transport.route(
            &format!("{PRIMARY_INDEX}PROJ_v1.0.5-0.bin"),
            200,
            pack_image(&firmware_image(1_000, 5)),
        );
        let mut states = rig.orchestrator.subscribe();

        run(&rig, None).await;

        must(states.changed().await);
        assert_eq!(*states.borrow(), UpdateState::RebootPending);
    }
}

mod failure_paths {
    use super::*;

    fn serve_listing(rig: &Rig) -> String {
        rig.transport
            .route(PRIMARY_INDEX, 200, index_html(&["PROJ_v1.1.0-0.bin"]));
        format!("{PRIMARY_INDEX}PROJ_v1.1.0-0.bin")
    }

    fn assert_untouched(rig: &Rig) {
        assert_eq!(rig.flash.boot_partition(), None);
        assert_eq!(rig.flash.restart_count(), 0);
        assert!(
            !rig.flash
                .events()
                .iter()
                .any(|e| matches!(e, FlashEvent::SetBoot(_)))
        );
    }

    #[tokio::test]
    async fn test_download_status_must_be_200() {
        let rig = rig("v1.0.0-1");
        let url = serve_listing(&rig);
        rig.transport.route(&url, 403, "forbidden");

        let attempt = run(&rig, None).await;

        assert!(
            matches!(&attempt.outcome, AttemptOutcome::Failed { reason } if reason.contains("403"))
        );
        assert!(rig.flash.events().is_empty());
        assert_untouched(&rig);
    }

    #[tokio::test]
    async fn test_oversized_block_aborts_write() {
        let rig = rig("v1.0.0-1");
        let url = serve_listing(&rig);
        let mut stream = pack_image(&firmware_image(1_000, 3));
        stream.extend(raw_block(5_000, &[0u8; 16]));
        rig.transport.route(&url, 200, stream);

        let attempt = run(&rig, None).await;

        assert!(matches!(attempt.outcome, AttemptOutcome::Failed { .. }));
        assert_eq!(rig.flash.count(|e| matches!(e, FlashEvent::Write(_))), 1);
        assert_eq!(rig.flash.abort_count(), 1);
        assert_untouched(&rig);
    }

    #[tokio::test]
    async fn test_connection_reset_aborts_write() {
        let rig = rig("v1.0.0-1");
        let url = serve_listing(&rig);
        let stream = pack_image(&firmware_image(30_000, 8));
        let cut = stream.len() / 2;
        rig.transport.route_truncated(&url, stream, cut);

        let attempt = run(&rig, None).await;

        assert!(matches!(attempt.outcome, AttemptOutcome::Failed { .. }));
        assert_eq!(rig.flash.abort_count(), 1);
        assert_untouched(&rig);
    }

    #[tokio::test]
    async fn test_truncated_stream_aborts_write() {
        let rig = rig("v1.0.0-1");
        let url = serve_listing(&rig);
        let mut stream = pack_image(&firmware_image(8_000, 8));
        stream.truncate(stream.len() - 3);
        rig.transport.route(&url, 200, stream);

        let attempt = run(&rig, None).await;

        assert!(matches!(attempt.outcome, AttemptOutcome::Failed { .. }));
        assert_eq!(rig.flash.abort_count(), 1);
        assert_untouched(&rig);
    }

    #[tokio::test]
    async fn test_empty_download_is_failure() {
        let rig = rig("v1.0.0-1");
        let url = serve_listing(&rig);
        rig.transport.route(&url, 200, Vec::new());

        let attempt = run(&rig, None).await;

        assert!(
            matches!(&attempt.outcome, AttemptOutcome::Failed { reason } if reason.contains("No firmware data"))
        );
        assert_eq!(rig.flash.abort_count(), 1);
        assert_untouched(&rig);
    }

    #[tokio::test]
    async fn test_flash_write_error_aborts() {
        let rig = rig_with("v1.0.0-1", MockFlash::new().fail_write_after(4_000), test_config());
        let url = serve_listing(&rig);
        rig.transport
            .route(&url, 200, pack_image(&firmware_image(20_000, 1)));

        let attempt = run(&rig, None).await;

        assert!(matches!(attempt.outcome, AttemptOutcome::Failed { .. }));
        assert_eq!(rig.flash.abort_count(), 1);
        assert_untouched(&rig);
    }

    #[tokio::test]
    async fn test_end_write_failure_keeps_boot_target() {
        let rig = rig_with("v1.0.0-1", MockFlash::new().fail_end(), test_config());
        let url = serve_listing(&rig);
        rig.transport
            .route(&url, 200, pack_image(&firmware_image(2_000, 1)));

        let attempt = run(&rig, None).await;

        assert!(matches!(attempt.outcome, AttemptOutcome::Failed { .. }));
        assert_eq!(rig.flash.abort_count(), 0);
        assert_untouched(&rig);
    }

    #[tokio::test]
    async fn test_begin_failure_reported() {
        let rig = rig_with("v1.0.0-1", MockFlash::new().fail_begin(), test_config());
        let url = serve_listing(&rig);
        rig.transport
            .route(&url, 200, pack_image(&firmware_image(2_000, 1)));

        let attempt = run(&rig, None).await;

        assert!(
            matches!(&attempt.outcome, AttemptOutcome::Failed { reason } if reason.contains("begin write"))
        );
        assert_untouched(&rig);
    }
}

mod lifecycle {
    use super::*;

    fn manager(flash: &Arc<MockFlash>) -> PartitionLifecycleManager {
        PartitionLifecycleManager::new(flash.clone(), &test_config())
    }

    #[test]
    fn test_validate_true_on_valid_is_noop() {
        let flash = Arc::new(MockFlash::with_state(Some(PartitionState::Valid)));
        let outcome = manager(&flash).validate(true);
        assert_eq!(outcome, ValidateOutcome::NotPending(PartitionState::Valid));
        assert!(flash.events().is_empty());
    }

    #[test]
    fn test_validate_false_on_pending_rolls_back_once() {
        let flash = Arc::new(MockFlash::with_state(Some(PartitionState::PendingVerify)));
        let manager = manager(&flash);
        assert_eq!(manager.validate(false), ValidateOutcome::RolledBack);
        assert_eq!(flash.state(), Some(PartitionState::Invalid));
        assert_eq!(flash.rollback_count(), 1);
    }

    #[test]
    fn test_validate_true_on_pending_confirms() {
        let flash = Arc::new(MockFlash::with_state(Some(PartitionState::PendingVerify)));
        assert_eq!(manager(&flash).validate(true), ValidateOutcome::Confirmed);
        assert_eq!(flash.state(), Some(PartitionState::Valid));
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_check_times_out_slow_check() {
        let flash = Arc::new(MockFlash::with_state(Some(PartitionState::PendingVerify)));
        let mut manager = manager(&flash);
        manager.register_check(Arc::new(MockSelfCheck::passing("storage")));
        manager.register_check(Arc::new(
            MockSelfCheck::passing("cloud").with_delay(Duration::from_secs(60)),
        ));

        let report = manager.boot_check().await;

        assert_eq!(report.outcome, ValidateOutcome::RolledBack);
        let summary = must_some(report.summary, "self-checks ran");
        assert_eq!(summary.failed_checks, 1);
        assert!(
            summary
                .results
                .iter()
                .any(|r| r.error.as_deref().is_some_and(|e| e.contains("timed out")))
        );
        assert_eq!(flash.rollback_count(), 1);
    }

    #[tokio::test]
    async fn test_boot_check_confirms_when_checks_pass() {
        let flash = Arc::new(MockFlash::with_state(Some(PartitionState::PendingVerify)));
        let mut manager = manager(&flash);
        manager.register_check(Arc::new(MockSelfCheck::passing("storage")));
        manager.register_check(Arc::new(MockSelfCheck::failing("leds").non_critical()));

        let report = manager.boot_check().await;

        assert_eq!(report.initial_state, PartitionState::PendingVerify);
        assert_eq!(report.outcome, ValidateOutcome::Confirmed);
        assert_eq!(flash.rollback_count(), 0);
    }
}

mod commands {
    use super::*;

    struct CommandRig {
        rig: Rig,
        acks: Arc<RecordingAcks>,
        registry: CommandRegistry,
    }

    fn command_rig(flash: MockFlash) -> CommandRig {
        let rig = rig_with("v1.0.0-1", flash, test_config());
        let lifecycle = Arc::new(PartitionLifecycleManager::new(
            rig.flash.clone(),
            rig.orchestrator.config(),
        ));
        let acks = Arc::new(RecordingAcks::new());
        let mut registry = CommandRegistry::new(acks.clone());
        must(registry.register(Arc::new(OtaCommands::new(
            rig.orchestrator.clone(),
            lifecycle,
        ))));
        CommandRig {
            rig,
            acks,
            registry,
        }
    }

    #[tokio::test]
    async fn test_status_unknown_sends_exactly_one_fail() {
        let cr = command_rig(MockFlash::unreadable());
        cr.registry.dispatch(Command::new(CMD_STATUS, "m1"));

        let acks = cr.acks.wait_for(1, WAIT).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cr.acks.acks().len(), 1);
        let ack = must_some(acks.first().cloned(), "status ack");
        assert_eq!(ack.kind, AckKind::Fail);
        assert_eq!(ack.payload, "OTA: Image state unknown");
        assert_eq!(ack.correlation_id, "m1");
    }

    #[tokio::test]
    async fn test_status_pending_reports_and_confirms() {
        let cr = command_rig(MockFlash::with_state(Some(PartitionState::PendingVerify)));
        cr.registry.dispatch(Command::new(CMD_STATUS, "m2"));

        let acks = cr.acks.wait_for(1, WAIT).await;
        let ack = must_some(acks.first().cloned(), "status ack");
        assert_eq!(ack.kind, AckKind::Ok);
        assert_eq!(ack.payload, "OTA: Image is PENDING_VERIFY");
        assert_eq!(cr.rig.flash.state(), Some(PartitionState::Valid));
    }

    #[tokio::test]
    async fn test_validate_false_rolls_back() {
        let cr = command_rig(MockFlash::with_state(Some(PartitionState::PendingVerify)));
        cr.registry
            .dispatch(Command::new(CMD_VALIDATE, "m3").with_param(DEFAULT_PARAM, "false"));

        let acks = cr.acks.wait_for(1, WAIT).await;
        let ack = must_some(acks.first().cloned(), "validate ack");
        assert_eq!(ack.kind, AckKind::Ok);
        assert_eq!(cr.rig.flash.rollback_count(), 1);
    }

    #[tokio::test]
    async fn test_update_acks_filename() {
        let cr = command_rig(MockFlash::new());
        cr.rig
            .transport
            .route(PRIMARY_INDEX, 200, index_html(&["PROJ_v1.4.0-2.bin"]));
        cr.rig.transport.route(
            &format!("{PRIMARY_INDEX}PROJ_v1.4.0-2.bin"),
            200,
            pack_image(&firmware_image(4_000, 6)),
        );

        cr.registry
            .dispatch(Command::new(CMD_UPDATE, "m4").with_param(DEFAULT_PARAM, ""));

        let acks = cr.acks.wait_for(1, WAIT).await;
        let ack = must_some(acks.first().cloned(), "update ack");
        assert_eq!(ack.kind, AckKind::Ok);
        assert_eq!(ack.payload, "PROJ_v1.4.0-2.bin");
        assert_eq!(ack.correlation_id, "m4");
    }

    #[tokio::test]
    async fn test_update_while_busy_fails_fast() {
        let cr = command_rig(MockFlash::new());
        cr.rig
            .transport
            .route(PRIMARY_INDEX, 200, index_html(&["PROJ_v1.0.0-1.bin"]));

        let running = must_some(cr.rig.orchestrator.launch(None), "first launch");
        cr.registry.dispatch(Command::new(CMD_UPDATE, "m5"));

        let acks = cr.acks.wait_for(1, WAIT).await;
        let ack = must_some(acks.first().cloned(), "busy ack");
        assert_eq!(ack.kind, AckKind::Fail);
        assert_eq!(ack.payload, OtaError::UpdateInProgress.to_string());
        must(must_within(WAIT, running).await);
    }

    #[tokio::test]
    async fn test_unknown_command_rejected() {
        let cr = command_rig(MockFlash::new());
        cr.registry.dispatch(Command::new("FWXX", "m6"));

        let acks = cr.acks.wait_for(1, WAIT).await;
        let ack = must_some(acks.first().cloned(), "unknown ack");
        assert_eq!(ack.kind, AckKind::Fail);
        assert_eq!(cr.registry.commands().len(), 3);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let cr = command_rig(MockFlash::new());
        let mut registry = CommandRegistry::new(cr.acks.clone());
        let lifecycle = Arc::new(PartitionLifecycleManager::new(
            cr.rig.flash.clone(),
            &test_config(),
        ));
        let provider = Arc::new(OtaCommands::new(cr.rig.orchestrator.clone(), lifecycle));
        must(registry.register(provider.clone()));
        assert!(registry.register(provider).is_err());
    }
}

mod config_loading {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = must(tempfile::NamedTempFile::new());
        must(write!(
            file,
            r#"{{ "primary_index_url": "https://fw.example/", "dictionary_size": 8192 }}"#
        ));

        let config = must(OtaConfig::load(file.path()).await);

        assert_eq!(config.primary_index_url, "https://fw.example/");
        assert_eq!(config.dictionary_size, 8192);
        assert_eq!(config.fallback_index_url, "https://raspi00/fware/obs/");
    }

    #[tokio::test]
    async fn test_load_missing_file_is_io_error() {
        let dir = must(tempfile::tempdir());
        let result = OtaConfig::load(dir.path().join("absent.json")).await;
        assert!(matches!(result, Err(OtaError::Io(_))));
    }
}
