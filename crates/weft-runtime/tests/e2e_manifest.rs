//! Manifest-declared property schemas gate inbound commands.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use weft_runtime::{AddonRegistry, Cmd, Extension, ExtensionEnv, Message};

struct StrictReceiver {
    reached: Arc<AtomicBool>,
}

impl Extension for StrictReceiver {
    fn on_configure(&mut self, env: &mut ExtensionEnv) {
        env.init_manifest_from_json(
            r#"{
                "type": "extension",
                "name": "strict_receiver",
                "version": "0.1.0",
                "api": {
                    "cmd_in": [{
                        "name": "store",
                        "property": {
                            "properties": { "key": { "type": "string" } },
                            "required": ["key"]
                        }
                    }]
                }
            }"#,
        )
        .expect("manifest");
        env.on_configure_done().expect("configure ack");
    }

    fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Cmd) {
        self.reached.store(true, Ordering::SeqCst);
        let mut result =
            weft_runtime::CmdResult::from_cmd(weft_runtime::StatusCode::Ok, &cmd);
        result.set_property("detail", "stored").expect("set detail");
        env.return_result(result).expect("client reachable");
    }
}

fn setup(
    uri: &str,
) -> (
    weft_runtime::Client,
    std::thread::JoinHandle<()>,
    String,
    Arc<AtomicBool>,
) {
    let reached = Arc::new(AtomicBool::new(false));
    let reached_factory = Arc::clone(&reached);

    let mut registry = AddonRegistry::new();
    registry.register("strict_receiver", move || StrictReceiver {
        reached: Arc::clone(&reached_factory),
    });

    let (client, app_join) = common::spawn_app(registry, uri);
    let graph_id = common::start_graph(
        &client,
        r#"{
            "nodes": [{
                "type": "extension", "name": "receiver", "addon": "strict_receiver"
            }]
        }"#,
    );
    (client, app_join, graph_id, reached)
}

#[test]
fn missing_required_property_is_refused() {
    let uri = "test://manifest-required";
    let (client, app_join, graph_id, reached) = setup(uri);

    // No "key" property: the runtime answers on the receiver's behalf.
    let result = client
        .send_cmd_and_recv_result(common::cmd_to("store", uri, &graph_id, "receiver"))
        .expect("result");
    assert!(!result.status_code.is_ok());
    assert_eq!(
        result.get_property_string("error.code").expect("code"),
        "RT_INVALID_ARGUMENT"
    );
    assert!(
        !reached.load(Ordering::SeqCst),
        "violating command never reached on_cmd"
    );

    client.close_app().expect("close");
    app_join.join().expect("app join");
}

#[test]
fn conforming_command_passes_schema() {
    let uri = "test://manifest-ok";
    let (client, app_join, graph_id, reached) = setup(uri);

    let mut cmd = common::cmd_to("store", uri, &graph_id, "receiver");
    cmd.set_property("key", "alpha").expect("set");
    let result = client.send_cmd_and_recv_result(cmd).expect("result");
    common::check_ok_detail(&result, "stored");
    assert!(reached.load(Ordering::SeqCst));

    client.close_app().expect("close");
    app_join.join().expect("app join");
}

#[test]
fn wrong_property_type_is_refused() {
    let uri = "test://manifest-type";
    let (client, app_join, graph_id, _reached) = setup(uri);

    let mut cmd = common::cmd_to("store", uri, &graph_id, "receiver");
    cmd.set_property("key", 42i32).expect("set");
    let result = client.send_cmd_and_recv_result(cmd).expect("result");
    assert!(!result.status_code.is_ok());
    let message = result.get_property_string("error.message").expect("message");
    assert!(message.contains("string"), "names the declared type: {message}");

    client.close_app().expect("close");
    app_join.join().expect("app join");
}
