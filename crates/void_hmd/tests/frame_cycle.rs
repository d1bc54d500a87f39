//! End-to-end frame tests: driver, host engine and mock runtime together

use std::collections::HashMap;
use std::sync::Arc;

use approx::assert_relative_eq;
use glam::{Mat4, Quat, Vec3};
use void_hmd::*;

#[derive(Debug, Clone, PartialEq)]
struct TestAnchor {
    name: String,
    parent: Option<AnchorId>,
    visible: bool,
    position: Vec3,
    orientation: Quat,
}

#[derive(Default)]
struct TestHost {
    anchors: Vec<TestAnchor>,
    cameras: HashMap<usize, (Mat4, Vec3, Quat)>,
    exits: Vec<ExitReason>,
}

impl TestHost {
    fn anchor(&self, id: AnchorId) -> &TestAnchor {
        &self.anchors[id.0 as usize]
    }
}

impl PoseSink for TestHost {
    fn update_pose(&mut self, anchor: AnchorId, position: Vec3, orientation: Quat) {
        let node = &mut self.anchors[anchor.0 as usize];
        node.visible = true;
        node.position = position;
        node.orientation = orientation;
    }

    fn hide(&mut self, anchor: AnchorId) {
        self.anchors[anchor.0 as usize].visible = false;
    }
}

impl HostEngine for TestHost {
    fn create_anchor(&mut self, name: &str, parent: Option<AnchorId>) -> AnchorId {
        self.anchors.push(TestAnchor {
            name: name.to_string(),
            parent,
            visible: false,
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        });
        AnchorId(self.anchors.len() as u64 - 1)
    }

    fn set_camera(&mut self, view_index: usize, projection: Mat4, position: Vec3, orientation: Quat) {
        self.cameras
            .insert(view_index, (projection, position, orientation));
    }

    fn request_exit(&mut self, reason: ExitReason) {
        self.exits.push(reason);
    }
}

fn start_with(device: MockDevice, config: HmdConfig) -> (Arc<MockRuntime>, HmdDriver, TestHost) {
    let runtime = Arc::new(MockRuntime::new(device));
    let mut host = TestHost::default();
    let driver = HmdDriver::new(
        runtime.clone(),
        config,
        GraphicsBinding::headless(),
        &mut host,
    )
    .unwrap();
    runtime.push_startup(driver.session().handle());
    (runtime, driver, host)
}

fn start() -> (Arc<MockRuntime>, HmdDriver, TestHost) {
    start_with(MockDevice::stereo(), HmdConfig::default())
}

fn run(driver: &mut HmdDriver, host: &mut TestHost) -> Vec<RenderTarget> {
    let mut targets = Vec::new();
    let control = driver
        .run_frame(host, |target| targets.push(*target))
        .unwrap();
    assert_eq!(control, SessionControl::Continue);
    targets
}

#[test]
fn test_anchor_hierarchy() {
    let (_runtime, driver, host) = start();
    let names: Vec<&str> = host.anchors.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "tracking-space-anchor",
            "hmd-anchor",
            "view-space",
            "left-hand-anchor",
            "right-hand-anchor",
        ]
    );

    let anchors = *driver.anchors();
    assert_eq!(host.anchor(anchors.tracking_space).parent, None);
    assert_eq!(host.anchor(anchors.view_space).parent, None);
    for child in [anchors.hmd, anchors.left_hand, anchors.right_hand] {
        assert_eq!(host.anchor(child).parent, Some(anchors.tracking_space));
    }
}

#[test]
fn test_frame_submits_projection_layer() {
    let (runtime, mut driver, mut host) = start();
    let targets = run(&mut driver, &mut host);

    assert_eq!(targets.len(), 2);
    assert_eq!(
        targets.iter().map(|t| t.view_index).collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert!(targets.iter().all(|t| t.width == 1440 && t.height == 1600));
    assert_eq!(driver.frame_count(), 1);

    let submission = runtime.last_submission().unwrap();
    assert_eq!(submission.display_time, driver.session().predicted_display_time());
    assert_eq!(submission.layers.len(), 1);
    let CompositionLayer::Projection(layer) = &submission.layers[0];
    assert_eq!(layer.space, driver.tracking_space().handle());
    assert_eq!(layer.views.len(), 2);
    for (view, swapchain) in layer.views.iter().zip(driver.swapchains()) {
        assert_eq!(view.sub_image.swapchain, swapchain.handle());
        assert_eq!(view.sub_image.image_rect, Rect2Di::full(1440, 1600));
        assert_eq!(view.sub_image.image_array_index, 0);
    }
    assert_relative_eq!(layer.views[0].pose.position.x, -0.032, epsilon = 1e-6);
    assert_relative_eq!(layer.views[1].fov.angle_right, 0.96);

    // Every image was released before the frame ended
    assert!(driver
        .swapchains()
        .iter()
        .all(|s| s.acquired_index().is_none()));
}

#[test]
fn test_protocol_call_order() {
    let (runtime, mut driver, mut host) = start();
    run(&mut driver, &mut host);

    let frame_calls: Vec<RuntimeCall> = runtime
        .calls()
        .into_iter()
        .filter(|c| {
            matches!(
                c,
                RuntimeCall::WaitFrame
                    | RuntimeCall::BeginFrame
                    | RuntimeCall::LocateViews
                    | RuntimeCall::SyncActions
                    | RuntimeCall::AcquireImage { .. }
                    | RuntimeCall::WaitImage(_)
                    | RuntimeCall::ReleaseImage(_)
                    | RuntimeCall::EndFrame { .. }
            )
        })
        .collect();

    let left = driver.swapchains()[0].handle();
    let right = driver.swapchains()[1].handle();
    assert_eq!(
        frame_calls,
        vec![
            RuntimeCall::WaitFrame,
            RuntimeCall::BeginFrame,
            RuntimeCall::LocateViews,
            RuntimeCall::SyncActions,
            RuntimeCall::AcquireImage {
                swapchain: left,
                index: 0
            },
            RuntimeCall::WaitImage(left),
            RuntimeCall::ReleaseImage(left),
            RuntimeCall::AcquireImage {
                swapchain: right,
                index: 0
            },
            RuntimeCall::WaitImage(right),
            RuntimeCall::ReleaseImage(right),
            RuntimeCall::EndFrame { layers: 1 },
        ]
    );
}

#[test]
fn test_cameras_use_engine_axes() {
    let (_runtime, mut driver, mut host) = start();
    run(&mut driver, &mut host);

    let fov = Fovf::new(-0.96, 0.75, 0.83, -0.94);
    let expected = CoordinateSystem::ZUpRightHanded
        .convert_projection(projection_from_fov(&fov, 0.01, 100.0, ClipSpace::OpenGl));
    let (projection, position, orientation) = host.cameras[&0];
    assert!(projection.abs_diff_eq(expected, 1e-5));

    // Runtime (x, y, z) is engine (x, -z, y); eyes sit at 1.6 m
    assert_relative_eq!(position.x, -0.032, epsilon = 1e-6);
    assert_relative_eq!(position.y, 0.0, epsilon = 1e-6);
    assert_relative_eq!(position.z, 1.6, epsilon = 1e-6);
    assert!(orientation.abs_diff_eq(Quat::IDENTITY, 1e-6));

    let hmd = host.anchor(driver.anchors().hmd);
    assert!(hmd.visible);
    assert_relative_eq!(hmd.position.z, 1.6, epsilon = 1e-6);
}

#[test]
fn test_infinite_far_plane() {
    let config = HmdConfig {
        far: 0.0,
        ..Default::default()
    };
    let (_runtime, mut driver, mut host) = start_with(MockDevice::stereo(), config);
    run(&mut driver, &mut host);

    let view = driver.layer().view(0).unwrap();
    let m = view.projection().to_cols_array();
    assert_relative_eq!(m[10], -1.0);
    assert_relative_eq!(m[14], -2.0 * 0.01);
}

#[test]
fn test_hands_follow_grip_pose() {
    let (_runtime, mut driver, mut host) = start();
    run(&mut driver, &mut host);

    let anchors = *driver.anchors();
    let left = host.anchor(anchors.left_hand);
    let right = host.anchor(anchors.right_hand);
    assert!(left.visible && right.visible);
    assert!(left.position.abs_diff_eq(Vec3::new(-0.2, 0.3, 1.0), 1e-5));
    assert!(right.position.abs_diff_eq(Vec3::new(0.2, 0.3, 1.0), 1e-5));
}

#[test]
fn test_partial_hand_pose_hides_anchor() {
    let (runtime, mut driver, mut host) = start();
    run(&mut driver, &mut host);

    runtime.with_device(|d| d.hand_location_flags[0] = SpaceLocationFlags::POSITION_VALID);
    run(&mut driver, &mut host);
    let anchors = *driver.anchors();
    assert!(!host.anchor(anchors.left_hand).visible);
    assert!(host.anchor(anchors.right_hand).visible);

    runtime.with_device(|d| d.hand_location_flags[0] = MockDevice::FULLY_TRACKED);
    run(&mut driver, &mut host);
    assert!(host.anchor(anchors.left_hand).visible);
}

#[test]
fn test_inactive_hand_action_hides_anchor() {
    let (runtime, mut driver, mut host) = start();
    runtime.with_device(|d| d.hand_active[1] = false);
    run(&mut driver, &mut host);

    let anchors = *driver.anchors();
    assert!(host.anchor(anchors.left_hand).visible);
    assert!(!host.anchor(anchors.right_hand).visible);
}

#[test]
fn test_invalid_view_pose_skips_rendering() {
    let (runtime, mut driver, mut host) = start();
    runtime.with_device(|d| d.view_state = ViewStateFlags::ORIENTATION_VALID);
    let targets = run(&mut driver, &mut host);

    assert!(targets.is_empty());
    assert!(host.cameras.is_empty());
    assert_eq!(
        runtime.count_calls(|c| matches!(c, RuntimeCall::AcquireImage { .. })),
        0
    );
    // The frame is still closed, with nothing composited
    assert_eq!(runtime.submissions().len(), 1);
    assert!(runtime.last_submission().unwrap().layers.is_empty());
    assert!(!driver.layer().pose_valid());

    runtime.with_device(|d| d.view_state = ViewStateFlags::from_bits(0b1111));
    assert_eq!(run(&mut driver, &mut host).len(), 2);
    assert_eq!(runtime.last_submission().unwrap().layers.len(), 1);
}

#[test]
fn test_should_render_false_submits_empty_frame() {
    let mut device = MockDevice::stereo();
    device.should_render = false;
    let (runtime, mut driver, mut host) = start_with(device, HmdConfig::default());
    let targets = run(&mut driver, &mut host);

    assert!(targets.is_empty());
    assert_eq!(runtime.count_calls(|c| *c == RuntimeCall::LocateViews), 0);
    assert_eq!(runtime.count_calls(|c| *c == RuntimeCall::EndFrame { layers: 0 }), 1);
}

#[test]
fn test_sync_outside_focus_does_not_fail_frame() {
    let (runtime, mut driver, mut host) = start();
    run(&mut driver, &mut host);

    runtime.push_state_change(driver.session().handle(), SessionState::Visible);
    runtime.with_device(|d| d.hand_poses[0].position = Vec3::new(-0.5, 1.2, 0.0));
    run(&mut driver, &mut host);

    assert_eq!(driver.session().state(), SessionState::Visible);
    assert_eq!(runtime.count_calls(|c| *c == RuntimeCall::SyncActions), 2);
    assert_eq!(driver.frame_count(), 2);
}

#[test]
fn test_hands_hidden_outside_focus() {
    let (runtime, mut driver, mut host) = start();
    run(&mut driver, &mut host);
    let left = driver.anchors().left_hand;
    let right = driver.anchors().right_hand;
    assert!(host.anchor(left).visible);
    assert!(host.anchor(right).visible);

    runtime.push_state_change(driver.session().handle(), SessionState::Visible);
    runtime.with_device(|d| d.hand_active[0] = false);
    run(&mut driver, &mut host);

    assert!(!host.anchor(left).visible);
    assert!(!host.anchor(right).visible);

    // Focus regained: poses come back
    runtime.push_state_change(driver.session().handle(), SessionState::Focused);
    run(&mut driver, &mut host);
    assert!(!host.anchor(left).visible);
    assert!(host.anchor(right).visible);
}

#[test]
fn test_failed_draw_still_ends_frame() {
    let mut device = MockDevice::stereo();
    device.acquire_order = vec![7];
    let (runtime, mut driver, mut host) = start_with(device, HmdConfig::default());

    let err = driver.run_frame(&mut host, |_| {}).unwrap_err();
    assert!(matches!(err, HmdError::OutOfRange { index: 7, len: 3, .. }));
    assert_eq!(driver.session().frame_phase(), FramePhase::Idle);
    assert_eq!(driver.swapchains()[0].acquired_index(), None);
    assert_eq!(runtime.count_calls(|c| *c == RuntimeCall::EndFrame { layers: 0 }), 1);

    runtime.with_device(|d| d.acquire_order.clear());
    let targets = run(&mut driver, &mut host);
    assert_eq!(targets.len(), 2);
    assert_eq!(runtime.count_calls(|c| *c == RuntimeCall::EndFrame { layers: 1 }), 1);
    assert_eq!(driver.frame_count(), 2);
}

#[test]
fn test_end_frame_latch() {
    let (runtime, mut driver, mut host) = start();
    driver.poll_events(&mut host).unwrap();
    assert!(driver.wait_frame().unwrap());
    assert!(driver.update_views(&mut host).unwrap());
    driver.poll_actions(&mut host).unwrap();
    driver.render_views(|_| {}).unwrap();

    // The last view already ended the frame
    assert!(!driver.end_frame().unwrap());
    assert_eq!(runtime.count_calls(|c| matches!(c, RuntimeCall::EndFrame { .. })), 1);

    // Without draw hooks the end step submits exactly once
    assert!(driver.wait_frame().unwrap());
    driver.update_views(&mut host).unwrap();
    assert!(driver.end_frame().unwrap());
    assert!(!driver.end_frame().unwrap());
    assert_eq!(runtime.count_calls(|c| matches!(c, RuntimeCall::EndFrame { .. })), 2);
    assert!(runtime.last_submission().unwrap().layers.is_empty());
    assert_eq!(driver.frame_count(), 2);
}

#[test]
fn test_scheduled_steps_match_run_frame() {
    let (runtime, mut driver, mut host) = start();
    let mut steps = FrameStep::ALL;
    steps.sort_by_key(|s| s.priority());
    for step in steps {
        driver.run_step(step, &mut host).unwrap();
        if step == FrameStep::PollActions {
            driver.render_views(|_| {}).unwrap();
        }
    }
    assert_eq!(runtime.count_calls(|c| *c == RuntimeCall::EndFrame { layers: 1 }), 1);
    assert_eq!(driver.frame_count(), 1);
}

#[test]
fn test_acquired_slot_reaches_draw_hook() {
    let mut device = MockDevice::stereo();
    device.acquire_order = vec![2, 0, 1];
    let (_runtime, mut driver, mut host) = start_with(device, HmdConfig::default());

    let first = run(&mut driver, &mut host);
    let second = run(&mut driver, &mut host);
    assert_eq!(
        first.iter().map(|t| t.image.index).collect::<Vec<_>>(),
        vec![2, 2]
    );
    assert_eq!(
        second.iter().map(|t| t.image.index).collect::<Vec<_>>(),
        vec![0, 0]
    );
    assert_eq!(first[0].image, driver.swapchains()[0].images()[2]);
    assert_eq!(first[1].image, driver.swapchains()[1].images()[2]);
}

#[test]
fn test_render_view_out_of_range() {
    let (_runtime, mut driver, mut host) = start();
    driver.poll_events(&mut host).unwrap();
    driver.wait_frame().unwrap();
    driver.update_views(&mut host).unwrap();
    assert_eq!(
        driver.render_view(5, |_| {}),
        Err(HmdError::OutOfRange {
            what: "views",
            index: 5,
            len: 2
        })
    );
}

#[test]
fn test_exit_forwarded_once() {
    let (runtime, mut driver, mut host) = start();
    run(&mut driver, &mut host);

    let session = driver.session().handle();
    runtime.push_shutdown(session);
    assert_eq!(
        driver.run_frame(&mut host, |_| {}).unwrap(),
        SessionControl::Exit(ExitReason::Exiting)
    );
    runtime.push_state_change(session, SessionState::Exiting);
    runtime.push_state_change(session, SessionState::LossPending);
    driver.poll_events(&mut host).unwrap();

    assert_eq!(host.exits, vec![ExitReason::Exiting]);
    assert_eq!(driver.exit_reason(), Some(ExitReason::Exiting));
    assert_eq!(runtime.count_calls(|c| *c == RuntimeCall::EndSession), 1);
}

#[test]
fn test_frames_skipped_while_idle() {
    let runtime = Arc::new(MockRuntime::default());
    let mut host = TestHost::default();
    let mut driver = HmdDriver::new(
        runtime.clone(),
        HmdConfig::default(),
        GraphicsBinding::headless(),
        &mut host,
    )
    .unwrap();

    let targets = run(&mut driver, &mut host);
    assert!(targets.is_empty());
    assert_eq!(runtime.count_calls(|c| *c == RuntimeCall::WaitFrame), 0);
    assert_eq!(driver.frame_count(), 0);
}

#[test]
fn test_teardown_releases_everything() {
    let (runtime, mut driver, mut host) = start();
    run(&mut driver, &mut host);
    assert!(runtime.live_objects() > 0);
    runtime.clear_calls();

    drop(driver);
    assert_eq!(runtime.live_objects(), 0);

    let calls = runtime.calls();
    assert!(matches!(calls.last(), Some(RuntimeCall::DestroyInstance(_))));
    let position = |pred: fn(&RuntimeCall) -> bool| calls.iter().position(pred).unwrap();
    let action_set = position(|c| matches!(c, RuntimeCall::DestroyActionSet(_)));
    let swapchain = position(|c| matches!(c, RuntimeCall::DestroySwapchain(_)));
    let session = position(|c| matches!(c, RuntimeCall::DestroySession(_)));
    assert!(action_set < session);
    assert!(swapchain < session);
}
