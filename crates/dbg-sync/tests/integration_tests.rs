mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ManualRemote, RemoteState, ScriptedRemote, frame, script};
use dbg_sync::protocol::StepAction;
use dbg_sync::store::read;
use dbg_sync::{Notification, RunState, SessionPhase, UiBreakpoint, ValueKind};
use serde_json::json;

fn stopped_in_foo() -> RemoteState {
    RemoteState {
        scripts: vec![
            script(7, "/srv/app/foo.js"),
            script(8, "chrome-extension://abc/inject.js"),
        ],
        frames: vec![frame(0, "foo", 7, 10), frame(1, "main", 7, 30)],
        next_breakpoint: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_attach_synchronizes_scripts_stack_and_breakpoints() {
    let (transport, remote) = ScriptedRemote::spawn(stopped_in_foo());
    let (controller, notifications) = common::controller(transport);
    controller
        .host()
        .breakpoints
        .append(UiBreakpoint::new("/workspace/foo.js", 5));

    controller.attach().await.unwrap();

    assert_eq!(
        remote.commands()[..4],
        ["scripts", "backtrace", "setbreakpoint", "listbreakpoints"]
    );
    assert_eq!(controller.phase(), SessionPhase::Attached);
    assert_eq!(controller.run_state(), Some(RunState::Stopped));
    assert_eq!(controller.registered_breakpoints(), vec!["/srv/app/foo.js|5:0"]);

    let sources = controller.host().sources.all();
    assert_eq!(sources.len(), 1);
    assert_eq!(read(&sources[0]).path, "/workspace/foo.js");
    assert_eq!(controller.script_id_from_path("/workspace/foo.js"), Some(7));

    let stack = controller.host().stack.all();
    assert_eq!(stack.len(), 2);
    assert!(read(&stack[0]).is_top);
    assert_eq!(read(&stack[0]).name, "foo(n)");
    assert!(Arc::ptr_eq(&controller.active_frame().unwrap(), &stack[0]));

    let published = common::drain(&notifications);
    assert!(matches!(published.first(), Some(Notification::FrameChanged { frame: None })));
    assert!(published.iter().any(|n| matches!(n, Notification::Attached)));
    assert!(published.iter().any(
        |n| matches!(n, Notification::Break { frame: Some(frame) } if Arc::ptr_eq(frame, &stack[0]))
    ));
}

#[tokio::test]
async fn test_initial_stop_on_sentinel_is_continued() {
    let (transport, remote) = ScriptedRemote::spawn(RemoteState {
        listed: vec![json!({"number": 1, "line": 10, "column": 0, "script_name": "/srv/app/foo.js"})],
        ..stopped_in_foo()
    });
    let (controller, notifications) = common::controller(transport);

    controller.attach().await.unwrap();

    assert_eq!(remote.requests("continue").len(), 1);
    common::eventually(|| remote.requests("clearbreakpoint") == vec![json!({"breakpoint": 1})]).await;
    assert!(controller.active_frame().is_none());
    assert_eq!(controller.run_state(), Some(RunState::Running));

    let breaks = common::drain(&notifications)
        .into_iter()
        .filter_map(|n| match n {
            Notification::Break { frame } => Some(frame),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(breaks.len(), 1);
    assert!(breaks[0].is_none());
}

#[tokio::test]
async fn test_initial_stop_is_kept_for_enabled_breakpoint() {
    let (transport, remote) = ScriptedRemote::spawn(RemoteState {
        listed: vec![json!({"number": 1, "line": 10, "column": 0, "script_name": "/srv/app/foo.js"})],
        ..stopped_in_foo()
    });
    let (controller, notifications) = common::controller(transport);
    controller
        .host()
        .breakpoints
        .append(UiBreakpoint::new("/workspace/foo.js", 10));

    controller.attach().await.unwrap();

    assert!(remote.requests("continue").is_empty());
    assert!(controller.active_frame().is_some());
    common::next_matching(&notifications, |n| {
        matches!(n, Notification::Break { frame: Some(_) })
    })
    .await;
}

#[tokio::test]
async fn test_break_in_same_frameset_patches_frames_in_place() {
    let (transport, remote) = ScriptedRemote::spawn(stopped_in_foo());
    let (controller, notifications) = common::controller(transport);
    controller.attach().await.unwrap();
    let before = controller.host().stack.all();
    common::drain(&notifications);

    remote.state.lock().unwrap().frames[0] = frame(0, "foo", 7, 12);
    remote.event("break", json!({"sourceLine": 12}));

    let Notification::Break { frame: Some(top) } = common::next_matching(&notifications, |n| {
        matches!(n, Notification::Break { .. })
    })
    .await
    else {
        panic!("break without frame");
    };
    let after = controller.host().stack.all();
    assert_eq!(after.len(), 2);
    assert!(Arc::ptr_eq(&top, &before[0]));
    assert!(before.iter().zip(&after).all(|(a, b)| Arc::ptr_eq(a, b)));
    assert_eq!(read(&top).line, 12);
    assert_eq!(read(&top).vars[1].value, "12");
    assert_eq!(read(&top).id, "foo");
}

#[tokio::test]
async fn test_break_in_new_frameset_rebuilds_stack() {
    let (transport, remote) = ScriptedRemote::spawn(stopped_in_foo());
    let (controller, notifications) = common::controller(transport);
    controller.attach().await.unwrap();
    let before = controller.host().stack.all();
    common::drain(&notifications);

    remote.state.lock().unwrap().frames = vec![frame(0, "bar", 7, 2)];
    remote.event("break", json!({}));

    common::next_matching(&notifications, |n| matches!(n, Notification::Break { .. })).await;
    let after = controller.host().stack.all();
    assert_eq!(after.len(), 1);
    assert!(!Arc::ptr_eq(&after[0], &before[0]));
    assert!(read(&after[0]).is_top);
    assert_eq!(read(&after[0]).name, "bar(n)");
}

#[tokio::test]
async fn test_detach_during_backtrace_drops_late_response() {
    let (transport, mut remote) = ManualRemote::new();
    let (controller, notifications) = common::controller(transport);

    let attaching = tokio::spawn({
        let controller = controller.clone();
        async move { controller.attach().await }
    });
    let scripts = remote.expect("scripts").await;
    remote.respond(&scripts, json!([script(7, "/srv/app/foo.js")]), None);
    let backtrace = remote.expect("backtrace").await;

    controller.detach().await.unwrap();

    assert!(controller.active_frame().is_none());
    assert_eq!(controller.run_state(), None);
    assert_eq!(controller.phase(), SessionPhase::Detached);
    assert!(common::drain(&notifications).iter().any(
        |n| matches!(n, Notification::StateChanged { state: None })
    ));

    remote.respond(&backtrace, json!({"frames": [frame(0, "foo", 7, 10)]}), Some(false));
    assert!(attaching.await.unwrap().is_ok());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(controller.host().stack.all().is_empty());
    assert!(controller.active_frame().is_none());
    assert!(common::drain(&notifications).is_empty());
}

#[tokio::test]
async fn test_failed_backtrace_does_not_stop_attach_sync() {
    let (transport, remote) = ScriptedRemote::spawn(RemoteState {
        backtrace_error: Some("No frames".to_string()),
        running: true,
        ..stopped_in_foo()
    });
    let (controller, notifications) = common::controller(transport);
    controller
        .host()
        .breakpoints
        .append(UiBreakpoint::new("/workspace/foo.js", 5));

    controller.attach().await.unwrap();

    assert_eq!(
        remote.commands(),
        ["scripts", "backtrace", "setbreakpoint", "listbreakpoints"]
    );
    assert_eq!(controller.registered_breakpoints(), vec!["/srv/app/foo.js|5:0"]);
    assert_eq!(controller.run_state(), Some(RunState::Running));
    assert!(controller.active_frame().is_none());
    assert!(controller.host().stack.all().is_empty());

    let published = common::drain(&notifications);
    assert!(published.iter().any(|n| matches!(n, Notification::Break { frame: None })));
    assert!(published.iter().any(
        |n| matches!(n, Notification::StateChanged { state: Some(RunState::Running) })
    ));
}

#[tokio::test]
async fn test_breakpoint_removed_while_add_in_flight_is_cleared() {
    let (transport, mut remote) = ManualRemote::new();
    let (controller, _notifications) = common::controller(transport);

    let attaching = tokio::spawn({
        let controller = controller.clone();
        async move { controller.attach().await }
    });
    let request = remote.expect("scripts").await;
    remote.respond(&request, json!([]), None);
    let request = remote.expect("backtrace").await;
    remote.respond(&request, json!({"frames": []}), Some(false));
    let request = remote.expect("listbreakpoints").await;
    remote.respond(&request, json!({"breakpoints": []}), None);
    attaching.await.unwrap().unwrap();

    let breakpoints = &controller.host().breakpoints;
    let declared = breakpoints.append(UiBreakpoint::new("/workspace/foo.js", 5));
    let adding = tokio::spawn({
        let controller = controller.clone();
        async move { controller.update_breakpoints().await }
    });
    let set = remote.expect("setbreakpoint").await;
    assert_eq!(set["arguments"]["target"], "/srv/app/foo.js");

    breakpoints.remove(&declared);
    controller.update_breakpoints().await.unwrap();
    assert!(controller.registered_breakpoints().is_empty());

    remote.respond(
        &set,
        json!({"breakpoint": 5, "script_name": "/srv/app/foo.js", "line": 5, "column": 0}),
        None,
    );
    adding.await.unwrap().unwrap();

    let clear = remote.expect("clearbreakpoint").await;
    assert_eq!(clear["arguments"], json!({"breakpoint": 5}));
    assert!(controller.registered_breakpoints().is_empty());
}

#[tokio::test]
async fn test_after_compile_upserts_script() {
    let (transport, remote) = ScriptedRemote::spawn(stopped_in_foo());
    let (controller, _notifications) = common::controller(transport);
    controller.attach().await.unwrap();

    remote.event("afterCompile", json!({"script": script(7, "/srv/app/renamed.js")}));
    remote.event("afterCompile", json!({"script": script(9, "/srv/app/lazy.js")}));

    common::eventually(|| controller.script_id_from_path("/workspace/lazy.js") == Some(9)).await;
    assert_eq!(controller.path_from_script_id(7).as_deref(), Some("/workspace/renamed.js"));
    assert_eq!(controller.script_id_from_path("/workspace/foo.js"), None);
    assert_eq!(controller.host().sources.all().len(), 2);
}

#[tokio::test]
async fn test_unchanged_breakpoints_issue_no_remote_calls() {
    let (transport, remote) = ScriptedRemote::spawn(stopped_in_foo());
    let (controller, _notifications) = common::controller(transport);
    let breakpoints = &controller.host().breakpoints;
    let declared = breakpoints.append(UiBreakpoint::new("/workspace/foo.js", 5));
    breakpoints.append(UiBreakpoint::new("/workspace/lib/later.js", 1).with_condition("ready"));
    controller.attach().await.unwrap();
    assert_eq!(
        remote
            .requests("setbreakpoint")
            .iter()
            .map(|args| args["target"].clone())
            .collect::<Vec<_>>(),
        vec![json!("/srv/app/foo.js"), json!("/srv/app/lib/later.js")]
    );
    remote.clear_log();

    controller.update_breakpoints().await.unwrap();
    assert!(remote.commands().is_empty());

    breakpoints.set_attribute(&declared, &|bp| bp.enabled = false);
    controller.update_breakpoints().await.unwrap();

    common::eventually(|| remote.requests("clearbreakpoint") == vec![json!({"breakpoint": 2})]).await;
    assert!(remote.requests("setbreakpoint").is_empty());
    assert_eq!(
        controller.registered_breakpoints(),
        vec!["/srv/app/lib/later.js|1:0"]
    );
}

#[tokio::test]
async fn test_exception_event_publishes_exception() {
    let (transport, remote) = ScriptedRemote::spawn(stopped_in_foo());
    let (controller, notifications) = common::controller(transport);
    controller.attach().await.unwrap();

    remote.event(
        "exception",
        json!({"uncaught": true, "exception": {"type": "object", "className": "TypeError", "ref": 70}}),
    );

    let Notification::Exception { frame, exception } = common::next_matching(&notifications, |n| {
        matches!(n, Notification::Exception { .. })
    })
    .await
    else {
        unreachable!()
    };
    assert!(frame.is_some());
    assert_eq!(exception.value, "[TypeError]");
    assert_eq!(exception.handle, Some(70));
}

#[tokio::test]
async fn test_evaluate() {
    let (transport, remote) = ScriptedRemote::spawn(stopped_in_foo());
    let (controller, _notifications) = common::controller(transport);
    controller.attach().await.unwrap();

    remote.state.lock().unwrap().evaluation =
        Some(Ok(json!({"type": "number", "value": 3, "text": "3", "handle": 12})));
    let entry = controller.evaluate(" n + 1 ", Some(0), false, true).await.unwrap();
    assert_eq!(entry.name, "n + 1");
    assert_eq!(entry.value, "3");
    assert_eq!(entry.kind, ValueKind::Number);
    assert_eq!(remote.requests("evaluate")[0]["frame"], json!(0));

    remote.state.lock().unwrap().evaluation = Some(Err("ReferenceError: y is not defined".to_string()));
    let entry = controller.evaluate("y", None, true, false).await.unwrap();
    assert_eq!(entry.kind, ValueKind::Error);
    assert_eq!(entry.name, "y");
    assert_eq!(entry.value, "ReferenceError: y is not defined");
}

#[tokio::test]
async fn test_inspection() {
    let mut state = stopped_in_foo();
    state.objects.insert(
        80,
        json!({"handle": 80, "type": "object", "className": "Object",
               "properties": [{"name": "a", "ref": 81}, {"name": 0, "ref": 82}]}),
    );
    state.objects.insert(81, json!({"handle": 81, "type": "number", "value": 1}));
    state.objects.insert(82, json!({"handle": 82, "type": "string", "value": "x"}));
    state.scopes.insert(
        1,
        json!({"index": 1, "frameIndex": 0, "type": 3,
               "object": {"properties": [{"name": "captured", "value": {"type": "number", "value": 5}}]}}),
    );
    let (transport, remote) = ScriptedRemote::spawn(state);
    let (controller, _notifications) = common::controller(transport);
    controller.attach().await.unwrap();

    let entries = controller.load_objects(80).await.unwrap();
    assert_eq!(
        entries
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_str()))
            .collect::<Vec<_>>(),
        vec![("a", "1"), ("0", "x")]
    );

    let top = read(&controller.active_frame().unwrap()).clone();
    let closure = controller.load_frame(&top).await.unwrap();
    assert_eq!(closure.len(), 1);
    assert_eq!(closure[0].name, "captured");
    assert_eq!(remote.requests("scope").len(), 1);

    let source = controller.load_script_source(7).await.unwrap();
    assert!(source.unwrap().starts_with("// source of"));
}

#[tokio::test]
async fn test_execution_control() {
    let (transport, remote) = ScriptedRemote::spawn(stopped_in_foo());
    let (controller, notifications) = common::controller(transport);
    controller.attach().await.unwrap();
    common::drain(&notifications);

    controller
        .continue_script(Some(StepAction::Next), Some(2))
        .await
        .unwrap();
    assert_eq!(
        remote.requests("continue")[0],
        json!({"stepaction": "next", "stepcount": 2})
    );
    common::next_matching(&notifications, |n| {
        matches!(n, Notification::StateChanged { state: Some(RunState::Running) })
    })
    .await;

    controller.suspend().await.unwrap();
    common::next_matching(&notifications, |n| {
        matches!(n, Notification::StateChanged { state: Some(RunState::Stopped) })
    })
    .await;

    remote.clear_log();
    controller.change_live(7, "exports.x = 1;", false).await.unwrap();
    let change = &remote.requests("changelive")[0];
    assert_eq!(
        change["new_source"],
        json!("(function (exports, require, module, __filename, __dirname) { exports.x = 1;\n});")
    );
    assert_eq!(remote.commands(), vec!["changelive", "backtrace"]);
}

#[tokio::test]
async fn test_remote_hang_up_detaches() {
    let (transport, remote) = ScriptedRemote::spawn(stopped_in_foo());
    let (controller, notifications) = common::controller(transport);
    controller.attach().await.unwrap();
    common::drain(&notifications);

    remote.hang_up();

    common::next_matching(&notifications, |n| {
        matches!(n, Notification::StateChanged { state: None })
    })
    .await;
    common::eventually(|| controller.phase() == SessionPhase::Detached).await;
    assert!(!controller.is_attached());
}

#[tokio::test]
async fn test_attach_twice_is_noop() {
    let (transport, remote) = ScriptedRemote::spawn(stopped_in_foo());
    let (controller, _notifications) = common::controller(transport);
    controller.attach().await.unwrap();
    let calls = remote.commands().len();

    controller.attach().await.unwrap();

    assert_eq!(remote.commands().len(), calls);
    controller.detach().await.unwrap();
    assert_eq!(controller.phase(), SessionPhase::Detached);
}
