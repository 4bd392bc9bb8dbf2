#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::Receiver;
use dbg_sync::{ChannelTransport, Host, Notification, SessionConfig, SessionController};
use serde_json::{Value, json};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub const WORKSPACE: &str = "/srv/app";
const WAIT: Duration = Duration::from_secs(5);

pub fn config() -> SessionConfig {
    SessionConfig::from_value(json!({
        "workspaceDir": WORKSPACE,
        "davPrefix": "/workspace"
    }))
    .unwrap()
}

pub fn script(id: u64, name: &str) -> Value {
    json!({"handle": 100 + id, "type": "script", "id": id, "name": name, "lineOffset": 0, "text": name})
}

pub fn frame(index: usize, name: &str, script_id: u64, line: u32) -> Value {
    json!({
        "type": "frame",
        "index": index,
        "ref": 50 + index,
        "func": {"type": "function", "name": name, "scriptId": script_id},
        "script": {"ref": 100 + script_id},
        "receiver": {"type": "object", "className": "Object", "ref": 60},
        "arguments": [{"name": "n", "value": {"type": "number", "value": line}}],
        "locals": [
            {"name": ".arguments", "value": {"type": "object", "ref": 61}},
            {"name": "total", "value": {"type": "number", "value": line * 2}}
        ],
        "scopes": [{"index": 0, "type": 1}, {"index": 1, "type": 3}],
        "line": line,
        "column": 4,
        "position": 120
    })
}

/// Mutable state of the fake remote process.
#[derive(Default)]
pub struct RemoteState {
    pub scripts: Vec<Value>,
    pub frames: Vec<Value>,
    pub listed: Vec<Value>,
    pub objects: HashMap<u64, Value>,
    pub scopes: HashMap<u64, Value>,
    pub evaluation: Option<Result<Value, String>>,
    /// Makes `backtrace` fail with this message.
    pub backtrace_error: Option<String>,
    pub next_breakpoint: u64,
    pub running: bool,
}

impl RemoteState {
    fn reply(&mut self, command: &str, args: &Value) -> (Result<Value, String>, Vec<Value>, Option<bool>) {
        match command {
            "scripts" => {
                let ids = args.get("ids").and_then(Value::as_array).cloned();
                let scripts = self
                    .scripts
                    .iter()
                    .filter(|script| ids.as_ref().is_none_or(|ids| ids.contains(&script["id"])))
                    .map(|script| {
                        let mut script = script.clone();
                        if args["includeSource"] == json!(true) {
                            script["source"] = json!(format!("// source of {}", script["name"]));
                        }
                        script
                    })
                    .collect::<Vec<_>>();
                (Ok(json!(scripts)), Vec::new(), None)
            }
            "backtrace" if self.backtrace_error.is_some() => (
                Err(self.backtrace_error.clone().unwrap_or_default()),
                Vec::new(),
                Some(self.running),
            ),
            "backtrace" => (
                Ok(json!({
                    "fromFrame": 0,
                    "toFrame": self.frames.len(),
                    "totalFrames": self.frames.len(),
                    "frames": self.frames
                })),
                self.scripts.clone(),
                Some(self.running),
            ),
            "setbreakpoint" => {
                self.next_breakpoint += 1;
                (
                    Ok(json!({
                        "type": "scriptName",
                        "breakpoint": self.next_breakpoint,
                        "script_name": args["target"],
                        "line": args["line"],
                        "column": args["column"]
                    })),
                    Vec::new(),
                    None,
                )
            }
            "clearbreakpoint" => (Ok(json!({"breakpoint": args["breakpoint"]})), Vec::new(), None),
            "listbreakpoints" => (
                Ok(json!({"breakpoints": self.listed, "breakOnExceptions": false})),
                Vec::new(),
                None,
            ),
            "lookup" => {
                let body = args["handles"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_u64)
                    .filter_map(|handle| {
                        self.objects
                            .get(&handle)
                            .map(|object| (handle.to_string(), object.clone()))
                    })
                    .collect::<serde_json::Map<_, _>>();
                (Ok(Value::Object(body)), Vec::new(), None)
            }
            "scope" => {
                let number = args["number"].as_u64().unwrap_or_default();
                match self.scopes.get(&number) {
                    Some(scope) => (Ok(scope.clone()), Vec::new(), None),
                    None => (Err(format!("No scope {}", number)), Vec::new(), None),
                }
            }
            "evaluate" => (
                self.evaluation
                    .clone()
                    .unwrap_or_else(|| Ok(json!({"type": "undefined", "text": "undefined"}))),
                Vec::new(),
                None,
            ),
            "continue" => {
                self.running = true;
                (Ok(Value::Null), Vec::new(), Some(true))
            }
            "suspend" => {
                self.running = false;
                (Ok(Value::Null), Vec::new(), Some(false))
            }
            "changelive" => (Ok(json!({"change_log": []})), Vec::new(), None),
            other => (Err(format!("Unknown command {}", other)), Vec::new(), None),
        }
    }
}

fn response(request: &Value, result: Result<Value, String>, refs: Vec<Value>, running: Option<bool>) -> Value {
    let mut response = json!({
        "seq": 0,
        "type": "response",
        "request_seq": request["seq"],
        "command": request["command"],
        "refs": refs
    });
    match result {
        Ok(body) => {
            response["success"] = json!(true);
            response["body"] = body;
        }
        Err(message) => {
            response["success"] = json!(false);
            response["message"] = json!(message);
        }
    }
    if let Some(running) = running {
        response["running"] = json!(running);
    }
    response
}

/// A remote that answers every request from [`RemoteState`].
pub struct ScriptedRemote {
    pub state: Arc<Mutex<RemoteState>>,
    pub log: Arc<Mutex<Vec<(String, Value)>>>,
    events: UnboundedSender<Value>,
}

impl ScriptedRemote {
    pub fn spawn(state: RemoteState) -> (Arc<ChannelTransport>, Self) {
        let (outbound, mut requests) = mpsc::unbounded_channel::<Value>();
        let (events, inbound) = mpsc::unbounded_channel();
        let transport = Arc::new(ChannelTransport::new(outbound, inbound));

        let state = Arc::new(Mutex::new(state));
        let log = Arc::new(Mutex::new(Vec::new()));
        // weak so that `hang_up` ends the inbound stream
        let responses = events.downgrade();
        let remote = Self {
            state: Arc::clone(&state),
            log: Arc::clone(&log),
            events,
        };

        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let command = request["command"].as_str().unwrap_or_default().to_string();
                let args = request.get("arguments").cloned().unwrap_or(Value::Null);
                log.lock().unwrap().push((command.clone(), args.clone()));
                let (result, refs, running) = state.lock().unwrap().reply(&command, &args);
                let Some(events) = responses.upgrade() else {
                    break;
                };
                if events.send(response(&request, result, refs, running)).is_err() {
                    break;
                }
            }
        });

        (transport, remote)
    }

    pub fn event(&self, event: &str, body: Value) {
        let _ = self.events.send(json!({"seq": 0, "type": "event", "event": event, "body": body}));
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(command, _)| command.clone()).collect()
    }

    pub fn requests(&self, command: &str) -> Vec<Value> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == command)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Ends the inbound stream, as a dropped socket would.
    pub fn hang_up(self) {
        drop(self.events);
    }
}

/// A remote driven request by request from the test body.
pub struct ManualRemote {
    requests: UnboundedReceiver<Value>,
    events: UnboundedSender<Value>,
}

impl ManualRemote {
    pub fn new() -> (Arc<ChannelTransport>, Self) {
        let (outbound, requests) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        (
            Arc::new(ChannelTransport::new(outbound, inbound)),
            Self { requests, events },
        )
    }

    pub async fn expect(&mut self, command: &str) -> Value {
        let request = tokio::time::timeout(WAIT, self.requests.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("request stream closed");
        assert_eq!(request["command"], command, "unexpected request {}", request);
        request
    }

    pub fn respond(&self, request: &Value, body: Value, running: Option<bool>) {
        let _ = self.events.send(response(request, Ok(body), Vec::new(), running));
    }
}

pub fn controller(transport: Arc<ChannelTransport>) -> (SessionController, Receiver<Notification>) {
    let (host, notifications) = Host::in_memory();
    (SessionController::new(config(), host, transport), notifications)
}

/// Waits for the first notification matching `predicate`, discarding the others.
pub async fn next_matching(
    notifications: &Receiver<Notification>,
    predicate: impl Fn(&Notification) -> bool,
) -> Notification {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        while let Ok(notification) = notifications.try_recv() {
            if predicate(&notification) {
                return notification;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "notification never arrived");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn drain(notifications: &Receiver<Notification>) -> Vec<Notification> {
    notifications.try_iter().collect()
}

pub async fn eventually(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
