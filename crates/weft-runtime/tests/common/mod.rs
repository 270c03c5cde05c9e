//! Shared helpers for the end-to-end tests.

use weft_runtime::{start_graph_cmd, AddonRegistry, App, Client, Cmd, CmdResult, Loc, Message};

/// Builds the app property document for a test app.
pub fn app_props(uri: &str) -> String {
    format!(r#"{{ "weft": {{ "uri": "{uri}", "log": {{ "level": 2 }} }} }}"#)
}

/// Creates an app, hands out its client, and runs it on a background
/// thread.
pub fn spawn_app(registry: AddonRegistry, uri: &str) -> (Client, std::thread::JoinHandle<()>) {
    let app = App::new(registry, &app_props(uri)).expect("app properties");
    let client = app.client();
    let join = std::thread::spawn(move || app.run());
    (client, join)
}

/// Starts a graph and returns its id from the reply's `detail`.
pub fn start_graph(client: &Client, definition_json: &str) -> String {
    let cmd = start_graph_cmd(definition_json).expect("valid graph json");
    let reply = client.send_cmd_and_recv_result(cmd).expect("start_graph reply");
    assert!(
        reply.status_code.is_ok(),
        "start_graph failed: {:?}",
        reply.get_property_string("error.message")
    );
    reply.get_property_string("detail").expect("graph id in detail")
}

/// Builds a command explicitly addressed at one extension of a graph.
pub fn cmd_to(name: &str, uri: &str, graph_id: &str, extension: &str) -> Cmd {
    let mut cmd = Cmd::new(name);
    cmd.set_dests(vec![Loc::new(Some(uri), Some(graph_id), Some(extension))]);
    cmd
}

/// Asserts an OK result carrying the given `detail` string.
pub fn check_ok_detail(result: &CmdResult, detail: &str) {
    assert!(result.status_code.is_ok(), "result not OK: {result:?}");
    assert_eq!(
        result.get_property_string("detail").expect("detail"),
        detail
    );
}
