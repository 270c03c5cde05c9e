//! Opaque pointer properties travel between in-process extensions but
//! never through the byte codec.

mod common;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use weft_runtime::{
    AddonRegistry, Cmd, CmdResult, Envelope, Extension, ExtensionEnv, Message, OpaquePtr,
    PropertyValue, StatusCode,
};

static TEST_DATA: i32 = 12_344_321;

struct PtrSender;

impl Extension for PtrSender {
    fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Cmd) {
        assert_eq!(cmd.name, "hello_world");

        let mut ptr_cmd = Cmd::new("send_ptr");
        ptr_cmd
            .set_property("test data", OpaquePtr::from_ref(&TEST_DATA))
            .expect("set pointer");

        let original = cmd;
        env.send_cmd_with(ptr_cmd, move |env, result, err| {
            assert!(err.is_none(), "unexpected error: {err:?}");
            let result = result.expect("result");
            assert!(result.status_code.is_ok());

            let mut reply = CmdResult::from_cmd(StatusCode::Ok, &original);
            let detail = result.get_property_string("detail").expect("detail");
            reply.set_property("detail", detail).expect("set detail");
            env.return_result(reply).expect("client reachable");
        })
        .expect("route declared");
    }
}

struct PtrReader {
    seen: Arc<AtomicI32>,
}

impl Extension for PtrReader {
    fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Cmd) {
        assert_eq!(cmd.name, "send_ptr");
        let ptr = cmd.get_property_ptr("test data").expect("pointer property");
        // The pointee is a static in this process; the address is live.
        let value = unsafe { *ptr.as_ptr::<i32>() };
        self.seen.store(value, Ordering::SeqCst);

        let mut result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
        result.set_property("detail", "hello world, too").expect("set detail");
        env.return_result(result).expect("sender reachable");
    }
}

#[test]
fn opaque_pointer_transits_in_process() {
    let uri = "test://opaque-pointer";
    let seen = Arc::new(AtomicI32::new(0));
    let seen_factory = Arc::clone(&seen);

    let mut registry = AddonRegistry::new();
    registry.register("ptr_sender", || PtrSender);
    registry.register("ptr_reader", move || PtrReader {
        seen: Arc::clone(&seen_factory),
    });

    let (client, app_join) = common::spawn_app(registry, uri);
    let graph_id = common::start_graph(
        &client,
        r#"{
            "nodes": [
                { "type": "extension", "name": "sender", "addon": "ptr_sender",
                  "extension_group": "shared" },
                { "type": "extension", "name": "reader", "addon": "ptr_reader",
                  "extension_group": "shared" }
            ],
            "connections": [{
                "extension": "sender",
                "cmd": [{ "name": "send_ptr", "dest": [{ "extension": "reader" }] }]
            }]
        }"#,
    );

    let result = client
        .send_cmd_and_recv_result(common::cmd_to("hello_world", uri, &graph_id, "sender"))
        .expect("result");
    common::check_ok_detail(&result, "hello world, too");
    assert_eq!(seen.load(Ordering::SeqCst), TEST_DATA, "pointer dereferenced");

    client.close_app().expect("close");
    app_join.join().expect("app join");
}

#[test]
fn opaque_pointer_never_serializes() {
    let mut cmd = Cmd::new("send_ptr");
    cmd.set_property("p", PropertyValue::Ptr(OpaquePtr::from_ref(&TEST_DATA)))
        .expect("set pointer");

    let err = Envelope::from(cmd).to_bytes().expect_err("must refuse");
    assert!(err.to_string().contains("process"));
}
