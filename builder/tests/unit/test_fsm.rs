//! FSM unit tests

use build_runner::deploy::fsm::{PipelineEvent, PipelineFsm, PipelineState};

#[test]
fn test_fsm_initial_state() {
    let fsm = PipelineFsm::new();
    assert_eq!(fsm.state(), PipelineState::Init);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.history(), &[PipelineState::Init]);
}

#[test]
fn test_fsm_upload_failure_flow() {
    let mut fsm = PipelineFsm::new();

    fsm.process(PipelineEvent::Connect).unwrap();
    fsm.process(PipelineEvent::Connected).unwrap();
    fsm.process(PipelineEvent::BuildSucceeded).unwrap();
    assert_eq!(fsm.state(), PipelineState::Uploading);

    fsm.process(PipelineEvent::UploadFailed("bucket gone".to_string()))
        .unwrap();
    assert_eq!(fsm.state(), PipelineState::UploadFailed);
    assert_eq!(fsm.error(), Some("bucket gone"));
    assert!(fsm.state().is_terminal());
}

#[test]
fn test_fsm_connect_failure_disconnects() {
    let mut fsm = PipelineFsm::new();

    fsm.process(PipelineEvent::Connect).unwrap();
    fsm.process(PipelineEvent::Disconnect).unwrap();

    assert_eq!(fsm.state(), PipelineState::Disconnected);
    assert_eq!(fsm.outcome(), PipelineState::Connecting);
}

#[test]
fn test_fsm_never_reenters_earlier_state() {
    let mut fsm = PipelineFsm::new();

    // Can't build before connecting
    assert!(fsm.process(PipelineEvent::BuildSucceeded).is_err());

    fsm.process(PipelineEvent::Connect).unwrap();
    fsm.process(PipelineEvent::Connected).unwrap();
    assert!(fsm.process(PipelineEvent::Connect).is_err());

    // Can't disconnect mid-build
    assert!(fsm.process(PipelineEvent::Disconnect).is_err());

    fsm.process(PipelineEvent::BuildSucceeded).unwrap();
    fsm.process(PipelineEvent::UploadSucceeded).unwrap();
    fsm.process(PipelineEvent::Disconnect).unwrap();

    // Nothing after disconnect
    assert!(fsm.process(PipelineEvent::Disconnect).is_err());
    assert!(fsm.process(PipelineEvent::Connect).is_err());

    assert_eq!(
        fsm.history(),
        &[
            PipelineState::Init,
            PipelineState::Connecting,
            PipelineState::Building,
            PipelineState::Uploading,
            PipelineState::Completed,
            PipelineState::Disconnected,
        ]
    );
}
